//! Time-boxed response cache placed in front of read calls.
//!
//! Entries expire after their TTL and are evicted by the read that finds them expired. Writes
//! invalidate through [`ResponseCache::invalidate`], which prefers dropping too much over keeping
//! a stale value:
//!
//! 1. keys the write names explicitly are removed;
//! 2. a write with no known resource clears the whole cache;
//! 3. entries on the written resource survive only when a [`RangeRelation`] proves their ranges
//!    disjoint from the write's; otherwise a batch entry clears the whole cache and any other
//!    entry is removed.
//!
//! Reads that go upstream take a [`CacheTicket`] first and store through
//! [`ResponseCache::store_if_current`], so a value fetched before a concurrent write lands is
//! discarded instead of cached.

// std
use std::sync::atomic::{AtomicU64, Ordering};
// crates.io
use tokio::time::Instant;
// self
use crate::{
	_prelude::*,
	obs::{self, CacheEvent},
};

/// Deterministic cache key: `<operation>|<param>:<value>|...` with parameters sorted by name.
///
/// Besides the rendered string the key remembers which resource and ranges the cached read
/// covered, which is what write invalidation inspects.
#[derive(Clone, Debug)]
pub struct CacheKey {
	rendered: String,
	resource: Option<String>,
	ranges: Vec<String>,
	batch: bool,
}
impl CacheKey {
	/// Starts a key for `operation`.
	pub fn builder(operation: impl Into<String>) -> CacheKeyBuilder {
		CacheKeyBuilder {
			operation: operation.into(),
			params: BTreeMap::new(),
			resource: None,
			ranges: Vec::new(),
			batch: false,
		}
	}

	/// Rendered key string.
	pub fn as_str(&self) -> &str {
		&self.rendered
	}

	/// Resource (spreadsheet id) the read targeted, if known.
	pub fn resource(&self) -> Option<&str> {
		self.resource.as_deref()
	}

	/// Ranges the read covered.
	pub fn ranges(&self) -> &[String] {
		&self.ranges
	}

	/// Returns `true` for multi-range reads.
	pub fn is_batch(&self) -> bool {
		self.batch
	}
}
impl PartialEq for CacheKey {
	fn eq(&self, other: &Self) -> bool {
		self.rendered == other.rendered
	}
}
impl Eq for CacheKey {}
impl Hash for CacheKey {
	fn hash<H>(&self, state: &mut H)
	where
		H: std::hash::Hasher,
	{
		self.rendered.hash(state);
	}
}
impl Display for CacheKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.rendered)
	}
}

/// Builder for [`CacheKey`].
#[derive(Clone, Debug)]
pub struct CacheKeyBuilder {
	operation: String,
	params: BTreeMap<String, String>,
	resource: Option<String>,
	ranges: Vec<String>,
	batch: bool,
}
impl CacheKeyBuilder {
	/// Records the target spreadsheet; rendered as the `spreadsheet_id` parameter.
	pub fn resource(mut self, spreadsheet_id: impl Into<String>) -> Self {
		let id = spreadsheet_id.into();

		self.params.insert("spreadsheet_id".into(), id.clone());
		self.resource = Some(id);

		self
	}

	/// Adds a scalar parameter; a repeated name replaces the earlier value.
	pub fn param(mut self, name: impl Into<String>, value: impl Display) -> Self {
		self.params.insert(name.into(), value.to_string());

		self
	}

	/// Adds a list parameter, rendered sorted and comma-joined.
	pub fn list_param<I, S>(mut self, name: impl Into<String>, values: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.params.insert(name.into(), sorted_join(values.into_iter().map(Into::into).collect()));

		self
	}

	/// Records a single-range read.
	pub fn range(mut self, range: impl Into<String>) -> Self {
		let range = range.into();

		self.params.insert("range".into(), range.clone());
		self.ranges = vec![range];

		self
	}

	/// Records a multi-range (batch) read.
	pub fn ranges<I, S>(mut self, ranges: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		let mut ranges = ranges.into_iter().map(Into::into).collect::<Vec<String>>();

		ranges.sort();
		ranges.dedup();
		self.params.insert("ranges".into(), ranges.join(","));
		self.ranges = ranges;
		self.batch = true;

		self
	}

	/// Renders the key.
	pub fn build(self) -> CacheKey {
		let mut rendered = self.operation;

		for (name, value) in &self.params {
			rendered.push('|');
			rendered.push_str(name);
			rendered.push(':');
			rendered.push_str(value);
		}

		CacheKey { rendered, resource: self.resource, ranges: self.ranges, batch: self.batch }
	}
}

/// Decides whether two A1 ranges on the same spreadsheet provably do not overlap.
///
/// Range parsing lives outside this crate; plug an implementation in with
/// [`ResponseCache::with_range_relation`].
pub trait RangeRelation
where
	Self: Send + Sync,
{
	/// Returns `true` only when `written` and `cached` cannot share a cell.
	fn disjoint(&self, written: &str, cached: &str) -> bool;
}
impl<F> RangeRelation for F
where
	F: Send + Sync + Fn(&str, &str) -> bool,
{
	fn disjoint(&self, written: &str, cached: &str) -> bool {
		self(written, cached)
	}
}

/// Relation that can never prove disjointness, so every same-resource entry is invalidated.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnknownRangeRelation;
impl RangeRelation for UnknownRangeRelation {
	fn disjoint(&self, _: &str, _: &str) -> bool {
		false
	}
}

/// What a write may have touched.
#[derive(Clone, Debug, Default)]
pub struct WriteScope {
	resource: Option<String>,
	ranges: Vec<String>,
	keys: Vec<CacheKey>,
}
impl WriteScope {
	/// Write against an unknown target; invalidating it clears the whole cache.
	pub fn unknown() -> Self {
		Self::default()
	}

	/// Write against `spreadsheet_id` with unknown ranges.
	pub fn resource(spreadsheet_id: impl Into<String>) -> Self {
		Self { resource: Some(spreadsheet_id.into()), ..Default::default() }
	}

	/// Adds a range the write touched.
	pub fn range(mut self, range: impl Into<String>) -> Self {
		self.ranges.push(range.into());

		self
	}

	/// Adds several ranges the write touched.
	pub fn ranges<I, S>(mut self, ranges: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.ranges.extend(ranges.into_iter().map(Into::into));

		self
	}

	/// Names a key that must be dropped regardless of ranges.
	pub fn key(mut self, key: CacheKey) -> Self {
		self.keys.push(key);

		self
	}

	/// Written resource, if known.
	pub fn target(&self) -> Option<&str> {
		self.resource.as_deref()
	}
}

/// Epoch snapshot taken before an upstream read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheTicket(u64);

struct Entry<V> {
	value: V,
	expires_at: Instant,
	key: CacheKey,
}
impl<V> Entry<V> {
	fn is_live(&self, now: Instant) -> bool {
		now <= self.expires_at
	}
}

/// TTL cache keyed by [`CacheKey`], generic over the cached value.
pub struct ResponseCache<V = serde_json::Value> {
	entries: RwLock<HashMap<String, Entry<V>>>,
	epoch: AtomicU64,
	default_ttl: Duration,
	relation: Arc<dyn RangeRelation>,
}
impl<V> ResponseCache<V>
where
	V: Clone,
{
	/// Creates an empty cache whose read-through entries live for `default_ttl`.
	pub fn new(default_ttl: Duration) -> Self {
		Self {
			entries: RwLock::new(HashMap::new()),
			epoch: AtomicU64::new(0),
			default_ttl,
			relation: Arc::new(UnknownRangeRelation),
		}
	}

	/// Uses `relation` to keep entries whose ranges a write provably did not touch.
	pub fn with_range_relation(mut self, relation: Arc<dyn RangeRelation>) -> Self {
		self.relation = relation;

		self
	}

	/// TTL applied by read-through callers.
	pub fn default_ttl(&self) -> Duration {
		self.default_ttl
	}

	/// Stores `value` under `key` for `ttl`, replacing any previous entry.
	pub fn store(&self, key: &CacheKey, value: V, ttl: Duration) {
		self.entries.write().insert(key.rendered.clone(), Entry {
			value,
			expires_at: Instant::now() + ttl,
			key: key.clone(),
		});
	}

	/// Returns the live value under `key`; an expired entry is evicted.
	pub fn retrieve(&self, key: &CacheKey) -> Option<V> {
		let now = Instant::now();

		{
			let entries = self.entries.read();

			match entries.get(&key.rendered) {
				Some(entry) if entry.is_live(now) => {
					obs::record_cache_event(CacheEvent::Hit);

					return Some(entry.value.clone());
				},
				None => {
					obs::record_cache_event(CacheEvent::Miss);

					return None;
				},
				Some(_) => (),
			}
		}

		self.evict_expired(key, now);
		obs::record_cache_event(CacheEvent::Miss);

		None
	}

	/// Returns `true` if a live entry exists under `key`; an expired entry is evicted.
	pub fn contains(&self, key: &CacheKey) -> bool {
		let now = Instant::now();
		let live = self.entries.read().get(&key.rendered).map(|entry| entry.is_live(now));

		match live {
			Some(true) => true,
			Some(false) => {
				self.evict_expired(key, now);

				false
			},
			None => false,
		}
	}

	/// Removes the entry under `key`, returning its value if it was still live.
	pub fn remove(&self, key: &CacheKey) -> Option<V> {
		let now = Instant::now();

		self.entries.write().remove(&key.rendered).filter(|entry| entry.is_live(now)).map(|e| e.value)
	}

	/// Drops every entry.
	pub fn clear(&self) {
		let mut entries = self.entries.write();

		self.epoch.fetch_add(1, Ordering::AcqRel);
		entries.clear();
	}

	/// Number of stored entries, including expired ones not yet evicted.
	pub fn len(&self) -> usize {
		self.entries.read().len()
	}

	/// Returns `true` if nothing is stored.
	pub fn is_empty(&self) -> bool {
		self.entries.read().is_empty()
	}

	/// Evicts every expired entry and returns how many were dropped.
	pub fn purge_expired(&self) -> usize {
		let now = Instant::now();
		let mut entries = self.entries.write();
		let before = entries.len();

		entries.retain(|_, entry| entry.is_live(now));

		before - entries.len()
	}

	/// Snapshots the write epoch before an upstream read.
	pub fn ticket(&self) -> CacheTicket {
		CacheTicket(self.epoch.load(Ordering::Acquire))
	}

	/// Stores `value` only if no invalidation happened since `ticket` was taken.
	///
	/// Returns `false` when the value was discarded.
	pub fn store_if_current(&self, ticket: CacheTicket, key: &CacheKey, value: V, ttl: Duration) -> bool {
		let mut entries = self.entries.write();

		if self.epoch.load(Ordering::Acquire) != ticket.0 {
			obs::record_cache_event(CacheEvent::StaleDiscarded);

			return false;
		}

		entries.insert(key.rendered.clone(), Entry {
			value,
			expires_at: Instant::now() + ttl,
			key: key.clone(),
		});

		true
	}

	/// Drops every entry `write` may have affected and returns how many were removed.
	pub fn invalidate(&self, write: &WriteScope) -> usize {
		let mut entries = self.entries.write();
		let before = entries.len();

		self.epoch.fetch_add(1, Ordering::AcqRel);

		for key in &write.keys {
			entries.remove(&key.rendered);
		}

		let Some(resource) = write.resource.as_deref() else {
			entries.clear();
			obs::record_cache_event(CacheEvent::Cleared);

			return before;
		};
		let mut doomed = Vec::new();
		let mut clear_all = false;

		for (rendered, entry) in entries.iter() {
			match entry.key.resource() {
				Some(cached) if cached != resource => continue,
				_ => (),
			}

			if self.provably_disjoint(&write.ranges, &entry.key.ranges) {
				continue;
			}
			if entry.key.batch {
				clear_all = true;

				break;
			}

			doomed.push(rendered.clone());
		}

		if clear_all {
			entries.clear();
			obs::record_cache_event(CacheEvent::Cleared);

			return before;
		}

		for rendered in doomed {
			entries.remove(&rendered);
		}

		let removed = before - entries.len();

		if removed > 0 {
			obs::record_cache_event(CacheEvent::Invalidated);
		}

		removed
	}

	fn provably_disjoint(&self, written: &[String], cached: &[String]) -> bool {
		if written.is_empty() || cached.is_empty() {
			return false;
		}

		written.iter().all(|w| cached.iter().all(|c| self.relation.disjoint(w, c)))
	}

	fn evict_expired(&self, key: &CacheKey, now: Instant) {
		let mut entries = self.entries.write();

		// Another caller may have stored a fresh value since the read lock was released.
		if entries.get(&key.rendered).is_some_and(|entry| !entry.is_live(now)) {
			entries.remove(&key.rendered);
		}
	}
}
impl<V> Debug for ResponseCache<V> {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ResponseCache")
			.field("entries", &self.entries.read().len())
			.field("epoch", &self.epoch.load(Ordering::Relaxed))
			.field("default_ttl", &self.default_ttl)
			.finish_non_exhaustive()
	}
}

fn sorted_join(mut values: Vec<String>) -> String {
	values.sort();

	values.join(",")
}
