// self
use crate::{
	_prelude::*,
	obs::FlowKind,
	retry::ErrorClass,
	store::{StoreError, StoreKey},
};

/// Type alias that resolves to an instrumented future when tracing is enabled.
#[cfg(feature = "tracing")]
pub type InstrumentedFlow<F> = tracing::instrument::Instrumented<F>;
/// Passthrough future type when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub type InstrumentedFlow<F> = F;

/// Span wrapper used around token flows and API calls.
#[derive(Clone, Debug)]
pub struct FlowSpan {
	#[cfg(feature = "tracing")]
	span: tracing::Span,
}
impl FlowSpan {
	/// Creates a new span tagged with the provided flow kind + stage.
	pub fn new(kind: FlowKind, stage: &str) -> Self {
		#[cfg(feature = "tracing")]
		{
			let span = tracing::info_span!("sheets_broker.flow", flow = kind.as_str(), stage);

			Self { span }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = (kind, stage);

			Self {}
		}
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> InstrumentedFlow<Fut>
	where
		Fut: Future,
	{
		#[cfg(feature = "tracing")]
		{
			use tracing::Instrument;

			fut.instrument(self.span.clone())
		}
		#[cfg(not(feature = "tracing"))]
		{
			fut
		}
	}
}

/// Emits a `warn` event describing a scheduled retry.
pub fn log_retry(operation: &str, attempt: u32, delay: Duration, class: ErrorClass) {
	#[cfg(feature = "tracing")]
	{
		tracing::warn!(
			operation,
			attempt,
			delay_ms = delay.as_millis() as u64,
			class = class.as_str(),
			"retrying after failure"
		);
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = (operation, attempt, delay, class);
	}
}

/// Emits a `warn` event for a store write that failed after its exchange settled.
pub fn log_store_failure(operation: &str, key: &StoreKey, error: &StoreError) {
	#[cfg(feature = "tracing")]
	{
		tracing::warn!(operation, key = %key, error = %error, "credential store write failed");
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = (operation, key, error);
	}
}
