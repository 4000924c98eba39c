//! Crate-level error types shared by providers, the executor, stores, and the cache.
//!
//! [`Error`] is `Clone` so a single in-flight token exchange can hand the same failure to every
//! caller that joined it; wrapped sources therefore live behind [`Arc`].

// self
use crate::{_prelude::*, retry::ErrorClass};

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type SharedError = Arc<dyn StdError + Send + Sync>;

/// Delay suggested for a rate-limited failure that carried no retry-after hint.
pub const DEFAULT_RATE_LIMIT_DELAY: Duration = Duration::from_secs(60);

/// Canonical error exposed by public APIs.
#[derive(Clone, Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Temporary upstream failure; retry with backoff.
	#[error(transparent)]
	Transient(#[from] TransientError),
	/// Transport failure (DNS, TCP, TLS, connection reset).
	#[error(transparent)]
	Transport(#[from] TransportError),

	/// Upstream asked the client to slow down (HTTP 429).
	#[error("Rate limit exceeded.")]
	RateLimited {
		/// Server-provided wait, when a `Retry-After` header was present.
		retry_after: Option<Duration>,
	},
	/// API rejected the presented access token (HTTP 401).
	#[error("Request was rejected as unauthorized: {reason}.")]
	Unauthorized {
		/// Upstream-supplied reason string.
		reason: String,
	},
	/// No usable credential exists and none can be obtained without user interaction.
	#[error("No usable credentials are available: {reason}.")]
	Unauthenticated {
		/// Why the provider could not produce a token.
		reason: String,
	},
	/// Token endpoint rejected the grant (expired or revoked refresh token, bad code, bad
	/// assertion).
	#[error("Token endpoint rejected the grant: {reason}.")]
	InvalidGrant {
		/// Provider-supplied reason string.
		reason: String,
	},
	/// Client authentication failed or client credentials are malformed.
	#[error("Client authentication failed: {reason}.")]
	InvalidClient {
		/// Provider-supplied reason string.
		reason: String,
	},
	/// Caller lacks permission or the token lacks the required scope (HTTP 403).
	#[error("Access denied: {reason}.")]
	AccessDenied {
		/// Upstream-supplied reason string.
		reason: String,
	},
	/// Target resource does not exist (HTTP 404).
	#[error("Resource not found: {reason}.")]
	NotFound {
		/// Upstream-supplied reason string.
		reason: String,
	},
	/// Request was rejected as malformed or otherwise unacceptable (HTTP 400 and other 4xx).
	#[error("Request was rejected with status {status}: {reason}.")]
	BadRequest {
		/// HTTP status code returned by upstream.
		status: u16,
		/// Upstream-supplied reason string.
		reason: String,
	},
	/// Retryable failures persisted past the configured retry ceiling.
	#[error("Operation `{operation}` failed after {attempts} attempt(s).")]
	RetriesExhausted {
		/// Operation label passed to the executor.
		operation: String,
		/// Number of attempts made, including the first.
		attempts: u32,
		/// Failure observed on the final attempt.
		#[source]
		last: Box<Error>,
	},
}
impl Error {
	/// Maps a non-success API status code to the matching error variant.
	pub fn from_status(status: u16, retry_after: Option<Duration>, reason: impl Into<String>) -> Self {
		let reason = reason.into();

		match status {
			400 => Self::BadRequest { status, reason },
			401 => Self::Unauthorized { reason },
			403 => Self::AccessDenied { reason },
			404 => Self::NotFound { reason },
			429 => Self::RateLimited { retry_after },
			500..=599 => TransientError::Server { status, message: reason }.into(),
			400..=499 => Self::BadRequest { status, reason },
			_ => TransientError::Server { status, message: format!("unexpected status: {reason}") }
				.into(),
		}
	}

	/// Classifies the failure for retry decisions.
	pub fn class(&self) -> ErrorClass {
		match self {
			Self::Transient(_) | Self::Transport(_) => ErrorClass::Transient,
			Self::RateLimited { retry_after } => ErrorClass::RateLimited { retry_after: *retry_after },
			Self::Unauthorized { .. } => ErrorClass::Auth,
			Self::RetriesExhausted { last, .. } => last.class(),
			Self::Storage(_)
			| Self::Config(_)
			| Self::Unauthenticated { .. }
			| Self::InvalidGrant { .. }
			| Self::InvalidClient { .. }
			| Self::AccessDenied { .. }
			| Self::NotFound { .. }
			| Self::BadRequest { .. } => ErrorClass::Fatal,
		}
	}

	/// Returns `true` when repeating the same request may succeed.
	pub fn is_retryable(&self) -> bool {
		matches!(self.class(), ErrorClass::Transient | ErrorClass::RateLimited { .. })
	}

	/// Returns `true` when refreshing the access credential may fix the failure.
	pub fn should_refresh_credentials(&self) -> bool {
		matches!(self.class(), ErrorClass::Auth)
	}

	/// Delay suggested before a caller-driven retry, if any.
	pub fn suggested_delay(&self) -> Option<Duration> {
		match self {
			Self::RateLimited { retry_after } => Some(retry_after.unwrap_or(DEFAULT_RATE_LIMIT_DELAY)),
			Self::Transient(TransientError::TokenEndpoint { retry_after, .. }) => *retry_after,
			Self::RetriesExhausted { last, .. } => last.suggested_delay(),
			_ => None,
		}
	}
}

/// Configuration and validation failures.
#[derive(Clone, Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: SharedError,
	},
	/// HTTP request construction failed.
	#[error("HTTP request could not be constructed.")]
	HttpRequest {
		/// Underlying request builder failure.
		#[source]
		source: Arc<oauth2::http::Error>,
	},
	/// Endpoint configuration is invalid.
	#[error(transparent)]
	Endpoint(#[from] EndpointConfigError),
	/// A required field is absent or empty.
	#[error("Required field `{field}` is missing or empty.")]
	MissingField {
		/// Field name.
		field: &'static str,
	},
	/// Key material could not be loaded.
	#[error("Field `{field}` does not hold a usable key: {reason}.")]
	InvalidKey {
		/// Field name holding the key.
		field: &'static str,
		/// Parser-supplied reason.
		reason: String,
	},
	/// Credential file could not be read.
	#[error("Credential file `{path}` could not be read.")]
	CredentialFile {
		/// File path as configured.
		path: String,
		/// Underlying I/O failure.
		#[source]
		source: Arc<std::io::Error>,
	},
	/// Credential file is not valid JSON or a field has the wrong shape.
	#[error("Credential file is malformed at `{field}`: {message}.")]
	CredentialFormat {
		/// JSON path of the offending field.
		field: String,
		/// Parser-supplied message.
		message: String,
	},
	/// Required environment variable is not set.
	#[error("Environment variable `{name}` is not set.")]
	MissingEnvVar {
		/// Variable name.
		name: &'static str,
	},
	/// Assertion could not be signed.
	#[error("Assertion could not be signed.")]
	Signing {
		/// Signing backend failure.
		#[source]
		source: SharedError,
	},
	/// Authorization callback carried a state value that does not match the session.
	#[error("Authorization state does not match the pending session.")]
	StateMismatch,
	/// Requested scopes cannot be normalized.
	#[error("Requested scopes are invalid.")]
	InvalidScope(#[from] crate::auth::ScopeError),
	/// Store identifier is invalid.
	#[error("Store identifier is invalid.")]
	InvalidIdentifier(#[from] crate::auth::IdentifierError),
	/// Impersonated subject cannot be embedded in a store identity.
	#[error("Impersonated subject `{subject}` cannot be used as a store identity.")]
	InvalidSubject {
		/// Rejected subject.
		subject: String,
		/// Identifier validation failure.
		#[source]
		source: crate::auth::IdentifierError,
	},
	/// Credential builder validation failed.
	#[error("Unable to build credential.")]
	CredentialBuild(#[from] crate::auth::CredentialBuilderError),
	/// Token endpoint response omitted `expires_in`.
	#[error("Token endpoint response is missing expires_in.")]
	MissingExpiresIn,
	/// Token endpoint returned an excessively large `expires_in`.
	#[error("The expires_in value exceeds the supported range.")]
	ExpiresInOutOfRange,
	/// Token endpoint returned a non-positive duration.
	#[error("The expires_in value must be positive.")]
	NonPositiveExpiresIn,
	/// Token endpoint issued a token kind other than bearer.
	#[error("Token endpoint issued unsupported token type `{found}`.")]
	UnsupportedTokenType {
		/// Token type string returned by the endpoint.
		found: String,
	},
	/// Retry configuration is inconsistent.
	#[error("Retry configuration field `{field}` is invalid: {reason}.")]
	InvalidRetryConfig {
		/// Field name.
		field: &'static str,
		/// Validation failure.
		reason: &'static str,
	},
	/// Rate limit must be a positive, finite number of calls per second.
	#[error("Rate limit of {calls_per_second} calls per second is invalid.")]
	InvalidRateLimit {
		/// Rejected rate.
		calls_per_second: f64,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + StdError) -> Self {
		Self::HttpClientBuild { source: Arc::new(src) }
	}

	/// Wraps a signing backend failure.
	pub fn signing(src: impl 'static + Send + Sync + StdError) -> Self {
		Self::Signing { source: Arc::new(src) }
	}
}
impl From<oauth2::http::Error> for ConfigError {
	fn from(e: oauth2::http::Error) -> Self {
		Self::HttpRequest { source: Arc::new(e) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}
impl From<serde_path_to_error::Error<serde_json::Error>> for ConfigError {
	fn from(e: serde_path_to_error::Error<serde_json::Error>) -> Self {
		Self::CredentialFormat { field: e.path().to_string(), message: e.inner().to_string() }
	}
}

/// Endpoint and client configuration failures.
#[derive(Clone, Debug, ThisError)]
pub enum EndpointConfigError {
	/// Endpoint URL could not be parsed.
	#[error("Endpoint `{field}` is not a valid URL.")]
	InvalidUrl {
		/// Configuration field name.
		field: &'static str,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Endpoint uses plain HTTP against a non-loopback host.
	#[error("Endpoint `{field}` must use HTTPS: {url}.")]
	InsecureEndpoint {
		/// Configuration field name.
		field: &'static str,
		/// Offending URL.
		url: String,
	},
	/// Required endpoint or client field was not supplied.
	#[error("Client configuration is missing `{field}`.")]
	Missing {
		/// Configuration field name.
		field: &'static str,
	},
}

/// Temporary failure variants (safe to retry).
#[derive(Clone, Debug, ThisError)]
pub enum TransientError {
	/// Token endpoint returned an unexpected but non-fatal response.
	#[error("Token endpoint returned an unexpected response: {message}.")]
	TokenEndpoint {
		/// Provider- or client-supplied message summarizing the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
	/// Token endpoint responded with malformed JSON that could not be parsed.
	#[error("Token endpoint returned malformed JSON.")]
	TokenResponseParse {
		/// Structured parsing failure.
		#[source]
		source: Arc<serde_path_to_error::Error<serde_json::Error>>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// API answered with a server-side failure.
	#[error("Server responded with status {status}: {message}.")]
	Server {
		/// HTTP status code.
		status: u16,
		/// Upstream-supplied message.
		message: String,
	},
	/// API answered with a success status but an unparseable body.
	#[error("Response body with status {status} is not valid JSON.")]
	MalformedBody {
		/// HTTP status code.
		status: u16,
		/// Parser failure.
		#[source]
		source: Arc<serde_json::Error>,
	},
	/// A single attempt exceeded its deadline.
	#[error("Attempt timed out after {after:?}.")]
	Timeout {
		/// Per-attempt deadline that elapsed.
		after: Duration,
	},
}
impl TransientError {
	/// Wraps a token response parse failure.
	pub fn token_response_parse(
		source: serde_path_to_error::Error<serde_json::Error>,
		status: Option<u16>,
	) -> Self {
		Self::TokenResponseParse { source: Arc::new(source), status }
	}
}

/// Transport-level failures (network, IO).
#[derive(Clone, Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling upstream.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: SharedError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling upstream.")]
	Io {
		/// Underlying I/O failure.
		#[source]
		source: Arc<std::io::Error>,
	},
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + StdError) -> Self {
		Self::Network { source: Arc::new(src) }
	}
}
impl From<std::io::Error> for TransportError {
	fn from(e: std::io::Error) -> Self {
		Self::Io { source: Arc::new(e) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}
