// std
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters for token-endpoint exchanges made by one provider.
///
/// Only exchanges that actually reach the network are counted; callers that joined an
/// in-flight exchange or were served from the store do not add attempts.
#[derive(Debug, Default)]
pub struct ExchangeMetrics {
	attempts: AtomicU64,
	success: AtomicU64,
	failure: AtomicU64,
	store_failures: AtomicU64,
}
impl ExchangeMetrics {
	/// Returns the total number of exchanges started.
	pub fn attempts(&self) -> u64 {
		self.attempts.load(Ordering::Relaxed)
	}

	/// Returns the number of exchanges that produced a credential.
	pub fn successes(&self) -> u64 {
		self.success.load(Ordering::Relaxed)
	}

	/// Returns the number of failed exchanges.
	pub fn failures(&self) -> u64 {
		self.failure.load(Ordering::Relaxed)
	}

	/// Returns the number of store writes that failed after the exchange itself had settled.
	pub fn store_failures(&self) -> u64 {
		self.store_failures.load(Ordering::Relaxed)
	}

	pub(crate) fn record_attempt(&self) {
		self.attempts.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_outcome<T, E>(&self, result: &Result<T, E>) {
		match result {
			Ok(_) => self.success.fetch_add(1, Ordering::Relaxed),
			Err(_) => self.failure.fetch_add(1, Ordering::Relaxed),
		};
	}

	pub(crate) fn record_store_failure(&self) {
		self.store_failures.fetch_add(1, Ordering::Relaxed);
	}
}
