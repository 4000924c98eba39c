// self
use crate::{
	obs::{CacheEvent, FlowKind, FlowOutcome},
	retry::ErrorClass,
};

/// Records a flow outcome via the global metrics recorder (when enabled).
pub fn record_flow_outcome(kind: FlowKind, outcome: FlowOutcome) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"sheets_broker_flow_total",
			"flow" => kind.as_str(),
			"outcome" => outcome.as_str()
		)
		.increment(1);
	}
	#[cfg(not(feature = "metrics"))]
	{
		let _ = (kind, outcome);
	}
}

/// Counts a scheduled retry.
pub fn record_retry_total(operation: &str, class: ErrorClass) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"sheets_broker_retry_total",
			"operation" => operation.to_owned(),
			"class" => class.as_str()
		)
		.increment(1);
	}
	#[cfg(not(feature = "metrics"))]
	{
		let _ = (operation, class);
	}
}

/// Counts a response cache event.
pub fn record_cache_event(event: CacheEvent) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!("sheets_broker_cache_total", "event" => event.as_str()).increment(1);
	}
	#[cfg(not(feature = "metrics"))]
	{
		let _ = event;
	}
}

/// Counts a credential store write that failed after its exchange settled.
pub fn record_store_failure_total(operation: &str) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!("sheets_broker_store_failure_total", "operation" => operation.to_owned())
			.increment(1);
	}
	#[cfg(not(feature = "metrics"))]
	{
		let _ = operation;
	}
}
