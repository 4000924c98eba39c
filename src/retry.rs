//! Classification-driven retries around a single outbound call.
//!
//! [`RetryingExecutor::execute`] runs one attempt at a time: acquire a token, pass the rate
//! limiter, run the call under a per-attempt timeout. Failures are classified through
//! [`Error::class`]:
//!
//! - [`ErrorClass::Fatal`] propagates unchanged.
//! - [`ErrorClass::Auth`] forces one credential refresh and re-attempts immediately without
//!   spending the retry budget.
//! - [`ErrorClass::Transient`] and [`ErrorClass::RateLimited`] sleep and retry until
//!   [`RetryConfig::max_retries`] is used up, then surface [`Error::RetriesExhausted`].

// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	error::{ConfigError, DEFAULT_RATE_LIMIT_DELAY, TransientError},
	obs::{self, FlowKind},
	provider::TokenProvider,
	rate_limit::RateLimiter,
};

/// Retry-relevant category of a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
	/// Temporary failure; retry with backoff.
	Transient,
	/// Upstream throttling; retry after the hinted delay.
	RateLimited {
		/// Server-provided wait, if any.
		retry_after: Option<Duration>,
	},
	/// Credential rejected; refresh before retrying.
	Auth,
	/// Retrying cannot help.
	Fatal,
}
impl ErrorClass {
	/// Stable label for logs and metrics.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Transient => "transient",
			Self::RateLimited { .. } => "rate_limited",
			Self::Auth => "auth",
			Self::Fatal => "fatal",
		}
	}
}

/// Backoff and retry policy.
///
/// The delay before retry `n` (counting from 1) is
/// `min(max_delay, base_delay * multiplier^(n - 1))`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
	/// Retries allowed after the first attempt.
	pub max_retries: u32,
	/// Delay before the first retry.
	#[serde(with = "millis")]
	pub base_delay: Duration,
	/// Upper bound for backoff delays.
	#[serde(with = "millis")]
	pub max_delay: Duration,
	/// Growth factor applied per retry.
	pub multiplier: f64,
	/// Deadline applied to each individual attempt.
	#[serde(with = "millis")]
	pub attempt_timeout: Duration,
	/// Wait used for a rate-limited failure that carried no `Retry-After`.
	#[serde(with = "millis")]
	pub rate_limit_fallback: Duration,
	/// Credential refreshes allowed per operation after auth failures.
	pub max_auth_refreshes: u32,
}
impl RetryConfig {
	/// Policy that runs every operation exactly once.
	pub fn no_retries() -> Self {
		Self { max_retries: 0, ..Default::default() }
	}

	/// Backoff delay before retry `retry` (1-based).
	pub fn delay_for(&self, retry: u32) -> Duration {
		let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
		let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);

		if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
			return self.max_delay;
		}

		Duration::try_from_secs_f64(secs).unwrap_or(self.max_delay)
	}

	/// Rejects settings that would make backoff meaningless.
	pub fn validate(&self) -> Result<()> {
		let invalid = |field: &'static str, reason: &'static str| -> Result<()> {
			Err(ConfigError::InvalidRetryConfig { field, reason }.into())
		};

		if self.base_delay.is_zero() {
			return invalid("base_delay", "must be greater than zero");
		}
		if self.max_delay < self.base_delay {
			return invalid("max_delay", "must not be shorter than base_delay");
		}
		if !self.multiplier.is_finite() || self.multiplier < 1. {
			return invalid("multiplier", "must be a finite number no smaller than 1");
		}
		if self.attempt_timeout.is_zero() {
			return invalid("attempt_timeout", "must be greater than zero");
		}

		Ok(())
	}
}
impl Default for RetryConfig {
	fn default() -> Self {
		Self {
			max_retries: 3,
			base_delay: Duration::from_secs(1),
			max_delay: Duration::from_secs(60),
			multiplier: 2.,
			attempt_timeout: Duration::from_secs(30),
			rate_limit_fallback: DEFAULT_RATE_LIMIT_DELAY,
			max_auth_refreshes: 1,
		}
	}
}

/// Runs outbound calls with token acquisition, pacing, timeouts, and retries.
pub struct RetryingExecutor {
	provider: Arc<dyn TokenProvider>,
	limiter: Arc<RateLimiter>,
	config: RetryConfig,
}
impl RetryingExecutor {
	/// Creates an executor with no rate limit.
	pub fn new(provider: Arc<dyn TokenProvider>, config: RetryConfig) -> Result<Self> {
		config.validate()?;

		Ok(Self { provider, limiter: Arc::new(RateLimiter::unlimited()), config })
	}

	/// Shares `limiter` with this executor.
	pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
		self.limiter = limiter;

		self
	}

	/// Active retry policy.
	pub fn config(&self) -> &RetryConfig {
		&self.config
	}

	/// Token provider consulted before every attempt.
	pub fn provider(&self) -> &Arc<dyn TokenProvider> {
		&self.provider
	}

	/// Rate limiter gating every attempt.
	pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
		&self.limiter
	}

	/// Runs `call` until it succeeds, fails fatally, or exhausts the retry budget.
	///
	/// `call` receives a fresh access token for every attempt. `operation` labels spans, retry
	/// events, and [`Error::RetriesExhausted`].
	pub async fn execute<T, F, Fut>(&self, operation: &str, call: F) -> Result<T>
	where
		F: FnMut(TokenSecret) -> Fut,
		Fut: Future<Output = Result<T>>,
	{
		obs::observe_flow(FlowKind::ApiCall, operation, self.run(operation, call)).await
	}

	async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T>
	where
		F: FnMut(TokenSecret) -> Fut,
		Fut: Future<Output = Result<T>>,
	{
		let mut attempts = 0_u32;
		let mut retries = 0_u32;
		let mut refreshes = 0_u32;

		loop {
			attempts += 1;

			let error = match self.attempt(&mut call).await {
				Ok(value) => return Ok(value),
				Err(e) => e,
			};

			match error.class() {
				ErrorClass::Fatal => return Err(error),
				ErrorClass::Auth => {
					if refreshes >= self.config.max_auth_refreshes {
						return Err(error);
					}

					refreshes += 1;

					self.provider.refresh().await.map_err(acquisition_failure)?;
				},
				class => {
					if retries >= self.config.max_retries {
						return Err(Error::RetriesExhausted {
							operation: operation.to_owned(),
							attempts,
							last: Box::new(error),
						});
					}

					retries += 1;

					let delay = match class {
						ErrorClass::RateLimited { retry_after } =>
							retry_after.unwrap_or(self.config.rate_limit_fallback),
						_ => self.config.delay_for(retries),
					};

					obs::record_retry(operation, attempts, delay, class);
					tokio::time::sleep(delay).await;
				},
			}
		}
	}

	async fn attempt<T, F, Fut>(&self, call: &mut F) -> Result<T>
	where
		F: FnMut(TokenSecret) -> Fut,
		Fut: Future<Output = Result<T>>,
	{
		let token = self.provider.access_token().await.map_err(acquisition_failure)?;

		self.limiter.acquire().await;

		let after = self.config.attempt_timeout;

		tokio::time::timeout(after, call(token))
			.await
			.unwrap_or_else(|_| Err(TransientError::Timeout { after }.into()))
	}
}
impl Debug for RetryingExecutor {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RetryingExecutor")
			.field("limiter", &self.limiter)
			.field("config", &self.config)
			.finish_non_exhaustive()
	}
}

// Refreshing cannot repair a grant the token endpoint already rejected.
fn acquisition_failure(error: Error) -> Error {
	match error.class() {
		ErrorClass::Auth => Error::Unauthenticated { reason: error.to_string() },
		_ => error,
	}
}

mod millis {
	// crates.io
	use serde::{Deserializer, Serializer};
	// self
	use crate::_prelude::*;

	pub(super) fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
	}

	pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		u64::deserialize(deserializer).map(Duration::from_millis)
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::{AtomicU32, Ordering};
	// crates.io
	use tokio::time::Instant;
	// self
	use super::*;
	use crate::{
		auth::Credential,
		provider::{ProviderFuture, StaticTokenProvider},
	};

	/// Hands out `token-N`, bumping `N` on every refresh.
	#[derive(Default)]
	struct RotatingProvider {
		generation: AtomicU32,
	}
	impl TokenProvider for RotatingProvider {
		fn access_token(&self) -> ProviderFuture<'_, TokenSecret> {
			Box::pin(async move {
				Ok(TokenSecret::new(format!("token-{}", self.generation.load(Ordering::SeqCst))))
			})
		}

		fn refresh(&self) -> ProviderFuture<'_, Credential> {
			Box::pin(async move {
				let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

				Ok(Credential::builder()
					.access_token(format!("token-{generation}"))
					.expires_in(Duration::from_secs(3600))
					.build()
					.expect("Credential fixture should build."))
			})
		}

		fn is_authenticated(&self) -> ProviderFuture<'_, bool> {
			Box::pin(async { Ok(true) })
		}

		fn clear_tokens(&self) -> ProviderFuture<'_, ()> {
			Box::pin(async { Ok(()) })
		}
	}

	fn executor(config: RetryConfig) -> RetryingExecutor {
		let provider = StaticTokenProvider::bearer("static-token", Duration::from_secs(3600))
			.expect("Static provider should build.");

		RetryingExecutor::new(Arc::new(provider), config).expect("Executor should build.")
	}

	fn config(max_retries: u32) -> RetryConfig {
		RetryConfig { max_retries, ..Default::default() }
	}

	#[test]
	fn backoff_grows_geometrically_and_caps() {
		let config = RetryConfig {
			base_delay: Duration::from_millis(500),
			max_delay: Duration::from_secs(3),
			..Default::default()
		};

		assert_eq!(config.delay_for(1), Duration::from_millis(500));
		assert_eq!(config.delay_for(2), Duration::from_secs(1));
		assert_eq!(config.delay_for(3), Duration::from_secs(2));
		assert_eq!(config.delay_for(4), Duration::from_secs(3));
		assert_eq!(config.delay_for(u32::MAX), Duration::from_secs(3));
	}

	#[test]
	fn validation_names_the_offending_field() {
		let cases = [
			(RetryConfig { base_delay: Duration::ZERO, ..Default::default() }, "base_delay"),
			(RetryConfig { max_delay: Duration::from_millis(10), ..Default::default() }, "max_delay"),
			(RetryConfig { multiplier: 0.5, ..Default::default() }, "multiplier"),
			(RetryConfig { multiplier: f64::NAN, ..Default::default() }, "multiplier"),
			(RetryConfig { attempt_timeout: Duration::ZERO, ..Default::default() }, "attempt_timeout"),
		];

		for (config, expected) in cases {
			match config.validate() {
				Err(Error::Config(ConfigError::InvalidRetryConfig { field, .. })) =>
					assert_eq!(field, expected),
				other => panic!("Expected {expected} to be rejected, got {other:?}."),
			}
		}

		assert!(RetryConfig::default().validate().is_ok());
	}

	#[test]
	fn config_deserializes_milliseconds_with_defaults() {
		let config: RetryConfig = serde_json::from_str(r#"{"max_retries":5,"base_delay":250}"#)
			.expect("Retry config should deserialize.");

		assert_eq!(config.max_retries, 5);
		assert_eq!(config.base_delay, Duration::from_millis(250));
		assert_eq!(config.rate_limit_fallback, Duration::from_secs(60));
	}

	#[tokio::test(start_paused = true)]
	async fn transient_failures_retry_until_the_ceiling() {
		let executor = executor(config(2));
		let calls = &AtomicU32::new(0);
		let started = Instant::now();
		let result = executor
			.execute("values.get", move |_| async move {
				calls.fetch_add(1, Ordering::SeqCst);

				Err::<(), _>(Error::from_status(503, None, "backend unavailable"))
			})
			.await;

		assert_eq!(calls.load(Ordering::SeqCst), 3);
		assert!(matches!(result, Err(Error::RetriesExhausted { attempts: 3, .. })));
		// 1 s + 2 s of backoff.
		assert_eq!(started.elapsed(), Duration::from_secs(3));
	}

	#[tokio::test(start_paused = true)]
	async fn zero_retries_runs_exactly_once() {
		let executor = executor(RetryConfig::no_retries());
		let calls = &AtomicU32::new(0);
		let result = executor
			.execute("values.get", move |_| async move {
				calls.fetch_add(1, Ordering::SeqCst);

				Err::<(), _>(Error::from_status(500, None, "boom"))
			})
			.await;

		assert_eq!(calls.load(Ordering::SeqCst), 1);
		assert!(matches!(result, Err(Error::RetriesExhausted { attempts: 1, .. })));
	}

	#[tokio::test(start_paused = true)]
	async fn rate_limits_honor_retry_after_then_fallback() {
		let executor = executor(config(2));
		let calls = &AtomicU32::new(0);
		let started = Instant::now();
		let value = executor
			.execute("values.get", move |_| async move {
				match calls.fetch_add(1, Ordering::SeqCst) {
					0 => Err(Error::from_status(429, Some(Duration::from_secs(5)), "slow down")),
					1 => Err(Error::from_status(429, None, "slow down")),
					_ => Ok("rows"),
				}
			})
			.await
			.expect("Third attempt should succeed.");

		assert_eq!(value, "rows");
		assert_eq!(started.elapsed(), Duration::from_secs(65));
	}

	#[tokio::test(start_paused = true)]
	async fn fatal_failures_are_not_retried() {
		let executor = executor(config(3));
		let calls = &AtomicU32::new(0);
		let result = executor
			.execute("values.update", move |_| async move {
				calls.fetch_add(1, Ordering::SeqCst);

				Err::<(), _>(Error::from_status(400, None, "bad range"))
			})
			.await;

		assert_eq!(calls.load(Ordering::SeqCst), 1);
		assert!(matches!(result, Err(Error::BadRequest { status: 400, .. })));
	}

	#[tokio::test(start_paused = true)]
	async fn auth_failures_refresh_once_without_spending_retries() {
		let provider = Arc::new(RotatingProvider::default());
		let executor =
			RetryingExecutor::new(provider.clone(), RetryConfig::no_retries()).expect("Executor should build.");
		let seen = &Mutex::new(Vec::new());
		let started = Instant::now();
		let value = executor
			.execute("values.get", move |token| {
				seen.lock().push(token.expose().to_owned());

				let fresh = token.expose() == "token-1";

				async move {
					if fresh { Ok(42) } else { Err(Error::from_status(401, None, "expired")) }
				}
			})
			.await
			.expect("Retry with refreshed token should succeed.");

		assert_eq!(value, 42);
		assert_eq!(*seen.lock(), vec!["token-0".to_owned(), "token-1".to_owned()]);
		assert_eq!(started.elapsed(), Duration::ZERO, "Auth retries must not back off.");
	}

	#[tokio::test(start_paused = true)]
	async fn repeated_auth_failures_surface_after_one_refresh() {
		let provider = Arc::new(RotatingProvider::default());
		let executor =
			RetryingExecutor::new(provider.clone(), config(3)).expect("Executor should build.");
		let calls = &AtomicU32::new(0);
		let result = executor
			.execute("values.get", move |_| async move {
				calls.fetch_add(1, Ordering::SeqCst);

				Err::<(), _>(Error::from_status(401, None, "revoked"))
			})
			.await;

		assert!(matches!(result, Err(Error::Unauthorized { .. })));
		assert_eq!(calls.load(Ordering::SeqCst), 2);
		assert_eq!(provider.generation.load(Ordering::SeqCst), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn slow_attempts_time_out_as_transient() {
		let executor = executor(RetryConfig {
			max_retries: 1,
			attempt_timeout: Duration::from_secs(2),
			..Default::default()
		});
		let calls = &AtomicU32::new(0);
		let value = executor
			.execute("values.get", move |_| {
				let first = calls.fetch_add(1, Ordering::SeqCst) == 0;

				async move {
					if first {
						tokio::time::sleep(Duration::from_secs(10)).await;
					}

					Ok("late")
				}
			})
			.await
			.expect("Second attempt should beat the timeout.");

		assert_eq!(value, "late");
		assert_eq!(calls.load(Ordering::SeqCst), 2);
	}

	#[tokio::test(start_paused = true)]
	async fn token_acquisition_failures_are_not_refreshed() {
		let executor = RetryingExecutor::new(Arc::new(StaticTokenProvider::default()), config(3))
			.expect("Executor should build.");
		let result = executor.execute("values.get", move |_| async move { Ok(()) }).await;

		assert!(matches!(result, Err(Error::Unauthenticated { .. })));
	}

	#[test]
	fn acquisition_auth_failures_become_fatal() {
		let error = acquisition_failure(Error::Unauthorized { reason: "token endpoint".into() });

		assert_eq!(error.class(), ErrorClass::Fatal);
	}
}
