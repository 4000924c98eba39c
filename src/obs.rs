//! Optional observability helpers for token flows, retries, and the response cache.
//!
//! # Feature Flags
//!
//! - Enable `tracing` to emit spans named `sheets_broker.flow` with the `flow` and `stage` fields,
//!   plus a `warn` event for every scheduled retry.
//! - Enable `metrics` to increment `sheets_broker_flow_total` (labels `flow`, `outcome`),
//!   `sheets_broker_retry_total` (labels `operation`, `class`), and `sheets_broker_cache_total`
//!   (label `event`), and `sheets_broker_store_failure_total` (label `operation`).
//!
//! [`ExchangeMetrics`] counters are always available and are exposed by both providers.

mod exchange;
mod metrics;
mod tracing;

pub use exchange::*;
pub use metrics::*;
pub use tracing::*;

// self
use crate::{
	_prelude::*,
	retry::ErrorClass,
	store::{StoreError, StoreKey},
};

/// Flow kinds observed by the crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowKind {
	/// Authorization-code exchange.
	AuthorizationCode,
	/// Refresh-token exchange.
	Refresh,
	/// Signed-assertion (JWT bearer) exchange.
	SignedAssertion,
	/// Executor-driven API call.
	ApiCall,
}
impl FlowKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowKind::AuthorizationCode => "authorization_code",
			FlowKind::Refresh => "refresh",
			FlowKind::SignedAssertion => "signed_assertion",
			FlowKind::ApiCall => "api_call",
		}
	}
}
impl Display for FlowKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowOutcome {
	/// Entry to a flow.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
}
impl FlowOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowOutcome::Attempt => "attempt",
			FlowOutcome::Success => "success",
			FlowOutcome::Failure => "failure",
		}
	}
}
impl Display for FlowOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Response cache events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CacheEvent {
	/// Read served from the cache.
	Hit,
	/// Read went upstream.
	Miss,
	/// Entries removed by a write.
	Invalidated,
	/// Whole cache cleared by a write.
	Cleared,
	/// Upstream value discarded because a write raced the read.
	StaleDiscarded,
}
impl CacheEvent {
	/// Returns a stable label suitable for metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			CacheEvent::Hit => "hit",
			CacheEvent::Miss => "miss",
			CacheEvent::Invalidated => "invalidated",
			CacheEvent::Cleared => "cleared",
			CacheEvent::StaleDiscarded => "stale_discarded",
		}
	}
}

/// Records a scheduled retry through every enabled backend.
pub fn record_retry(operation: &str, attempt: u32, delay: Duration, class: ErrorClass) {
	log_retry(operation, attempt, delay, class);
	record_retry_total(operation, class);
}

/// Records a store write that failed after its exchange settled.
pub fn record_store_failure(operation: &str, key: &StoreKey, error: &StoreError) {
	log_store_failure(operation, key, error);
	record_store_failure_total(operation);
}

/// Runs `fut` inside a flow span and records attempt plus outcome counters around it.
pub async fn observe_flow<T, Fut>(kind: FlowKind, stage: &str, fut: Fut) -> Result<T>
where
	Fut: Future<Output = Result<T>>,
{
	let span = FlowSpan::new(kind, stage);

	record_flow_outcome(kind, FlowOutcome::Attempt);

	let result = span.instrument(fut).await;

	match &result {
		Ok(_) => record_flow_outcome(kind, FlowOutcome::Success),
		Err(_) => record_flow_outcome(kind, FlowOutcome::Failure),
	}

	result
}
