//! Shows how writes invalidate cached reads, including a range relation that lets
//! provably disjoint ranges survive.

// std
use std::{sync::Arc, time::Duration};
// crates.io
use color_eyre::Result;
use serde_json::json;
// self
use sheets_broker::cache::{CacheKey, ResponseCache, WriteScope};

// Toy relation: ranges on different tabs never overlap.
fn different_tabs(written: &str, cached: &str) -> bool {
	match (written.split_once('!'), cached.split_once('!')) {
		(Some((a, _)), Some((b, _))) => a != b,
		_ => false,
	}
}

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let cache = <ResponseCache>::new(Duration::from_secs(60))
		.with_range_relation(Arc::new(different_tabs));
	let orders = CacheKey::builder("values.get").resource("demo-sheet").range("Orders!A1:D50").build();
	let stock = CacheKey::builder("values.get").resource("demo-sheet").range("Stock!A1:B20").build();

	cache.store(&orders, json!({ "values": [["order", "qty"]] }), cache.default_ttl());
	cache.store(&stock, json!({ "values": [["sku", "count"]] }), cache.default_ttl());

	println!("Cached entries: {}.", cache.len());

	let removed = cache.invalidate(&WriteScope::resource("demo-sheet").range("Stock!B2"));

	println!("Write to Stock!B2 invalidated {removed} entry.");
	println!("Orders still cached: {}.", cache.contains(&orders));
	println!("Stock still cached: {}.", cache.contains(&stock));

	cache.invalidate(&WriteScope::unknown());

	println!("Unknown write left {} entries.", cache.len());

	Ok(())
}
