//! Call-start pacing shared by every caller of one executor.
//!
//! The limiter bounds throughput, not concurrency: each admitted call pushes the next
//! admission `1 / rate` into the future, and waiters queue on a fair lock so they are admitted
//! in arrival order.

// crates.io
use tokio::{sync::Mutex as AsyncMutex, time::Instant};
// self
use crate::{_prelude::*, error::ConfigError};

/// Serializable limiter settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
	/// Maximum sustained calls per second; `None` disables pacing.
	pub calls_per_second: Option<f64>,
}

/// First-come first-served gate on call start times.
#[derive(Debug)]
pub struct RateLimiter {
	interval: Option<Duration>,
	next: AsyncMutex<Option<Instant>>,
}
impl RateLimiter {
	/// Admits at most `calls_per_second` calls per second.
	pub fn per_second(calls_per_second: f64) -> Result<Self> {
		if !calls_per_second.is_finite() || calls_per_second <= 0. {
			return Err(ConfigError::InvalidRateLimit { calls_per_second }.into());
		}

		let interval = Duration::try_from_secs_f64(1. / calls_per_second)
			.map_err(|_| ConfigError::InvalidRateLimit { calls_per_second })?;

		Ok(Self::with_interval(interval))
	}

	/// Admits one call per `interval`; a zero interval disables pacing.
	pub fn with_interval(interval: Duration) -> Self {
		Self { interval: (!interval.is_zero()).then_some(interval), next: AsyncMutex::new(None) }
	}

	/// Admits every call immediately.
	pub fn unlimited() -> Self {
		Self { interval: None, next: AsyncMutex::new(None) }
	}

	/// Builds a limiter from configuration.
	pub fn from_config(config: &RateLimitConfig) -> Result<Self> {
		match config.calls_per_second {
			Some(rate) => Self::per_second(rate),
			None => Ok(Self::unlimited()),
		}
	}

	/// Minimum spacing between admitted calls, if pacing is enabled.
	pub fn interval(&self) -> Option<Duration> {
		self.interval
	}

	/// Waits for this caller's turn and returns the admitted start time.
	pub async fn acquire(&self) -> Instant {
		let Some(interval) = self.interval else {
			return Instant::now();
		};
		let mut next = self.next.lock().await;
		let now = Instant::now();
		let start = match *next {
			Some(at) if at > now => {
				tokio::time::sleep_until(at).await;

				at
			},
			_ => now,
		};

		*next = Some(start + interval);

		start
	}
}
impl Default for RateLimiter {
	fn default() -> Self {
		Self::unlimited()
	}
}
