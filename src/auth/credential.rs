//! Access credentials, their expiry rules, and the builder used by every issuance path.

// self
use crate::{_prelude::*, auth::TokenSecret};

/// Credentials are treated as expired this long before their literal expiry.
pub const EXPIRY_SAFETY_BUFFER: Duration = Duration::from_secs(300);

/// Kind of access token; the token endpoint always issues bearer tokens.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenType {
	/// RFC 6750 bearer token.
	#[default]
	#[serde(rename = "Bearer", alias = "bearer")]
	Bearer,
}
impl TokenType {
	/// Parses the `token_type` field of a token response (case-insensitive).
	pub fn parse(raw: &str) -> Option<Self> {
		raw.eq_ignore_ascii_case("bearer").then_some(Self::Bearer)
	}
}

/// Errors produced by [`CredentialBuilder`].
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum CredentialBuilderError {
	/// No access token value was provided.
	#[error("Access token is required.")]
	MissingAccessToken,
	/// No expiry (absolute or relative) was configured.
	#[error("Expiry must be supplied via expires_at or expires_in.")]
	MissingExpiry,
	/// Expiry does not come after issuance.
	#[error("Expiry must be later than the issued-at instant.")]
	ExpiryNotAfterIssuance,
}

/// Access credential issued by a token endpoint.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credential {
	/// Access token presented to the API; callers must avoid logging it.
	pub access_token: TokenSecret,
	/// Refresh token, only present for delegated authorization.
	pub refresh_token: Option<TokenSecret>,
	/// Token kind.
	#[serde(default)]
	pub token_type: TokenType,
	/// Space-delimited scopes the endpoint reported as granted.
	#[serde(default)]
	pub scope: Option<String>,
	/// Instant the credential was issued.
	pub issued_at: OffsetDateTime,
	/// Instant the endpoint stops accepting the access token.
	pub expires_at: OffsetDateTime,
}
impl Credential {
	/// Returns a builder.
	pub fn builder() -> CredentialBuilder {
		CredentialBuilder::default()
	}

	/// Returns `true` once `instant` is within [`EXPIRY_SAFETY_BUFFER`] of the expiry.
	pub fn is_expired_at(&self, instant: OffsetDateTime) -> bool {
		instant >= self.expires_at - EXPIRY_SAFETY_BUFFER
	}

	/// Checks [`is_expired_at`](Self::is_expired_at) against the current UTC clock.
	pub fn is_expired(&self) -> bool {
		self.is_expired_at(OffsetDateTime::now_utc())
	}

	/// Usable lifetime left at `instant`, after subtracting the safety buffer.
	pub fn remaining_at(&self, instant: OffsetDateTime) -> Duration {
		let usable_until = self.expires_at - EXPIRY_SAFETY_BUFFER;

		(usable_until - instant).try_into().unwrap_or(Duration::ZERO)
	}

	/// Returns `true` if a refresh token is available.
	pub fn can_refresh(&self) -> bool {
		self.refresh_token.is_some()
	}

	/// Keeps `previous` as the refresh token when this credential was issued without one.
	pub fn with_refresh_fallback(mut self, previous: Option<TokenSecret>) -> Self {
		if self.refresh_token.is_none() {
			self.refresh_token = previous;
		}

		self
	}
}
impl Debug for Credential {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Credential")
			.field("access_token", &"<redacted>")
			.field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
			.field("token_type", &self.token_type)
			.field("scope", &self.scope)
			.field("issued_at", &self.issued_at)
			.field("expires_at", &self.expires_at)
			.finish()
	}
}

/// Builder for [`Credential`].
#[derive(Clone, Debug, Default)]
pub struct CredentialBuilder {
	access_token: Option<TokenSecret>,
	refresh_token: Option<TokenSecret>,
	token_type: TokenType,
	scope: Option<String>,
	issued_at: Option<OffsetDateTime>,
	expires_at: Option<OffsetDateTime>,
	expires_in: Option<Duration>,
}
impl CredentialBuilder {
	/// Provides the access token value.
	pub fn access_token(mut self, token: impl Into<String>) -> Self {
		self.access_token = Some(TokenSecret::new(token));

		self
	}

	/// Provides the refresh token value.
	pub fn refresh_token(mut self, token: impl Into<String>) -> Self {
		self.refresh_token = Some(TokenSecret::new(token));

		self
	}

	/// Sets the granted scope string.
	pub fn scope(mut self, scope: impl Into<String>) -> Self {
		self.scope = Some(scope.into());

		self
	}

	/// Sets the token kind.
	pub fn token_type(mut self, token_type: TokenType) -> Self {
		self.token_type = token_type;

		self
	}

	/// Sets the issued-at instant; defaults to the current clock.
	pub fn issued_at(mut self, instant: OffsetDateTime) -> Self {
		self.issued_at = Some(instant);

		self
	}

	/// Sets an absolute expiry instant.
	pub fn expires_at(mut self, instant: OffsetDateTime) -> Self {
		self.expires_at = Some(instant);

		self
	}

	/// Sets the lifetime relative to the issued-at instant.
	pub fn expires_in(mut self, lifetime: Duration) -> Self {
		self.expires_in = Some(lifetime);

		self
	}

	/// Consumes the builder and produces a [`Credential`].
	pub fn build(self) -> Result<Credential, CredentialBuilderError> {
		let access_token = self
			.access_token
			.filter(|token| !token.is_empty())
			.ok_or(CredentialBuilderError::MissingAccessToken)?;
		let issued_at = self.issued_at.unwrap_or_else(OffsetDateTime::now_utc);
		let expires_at = match (self.expires_at, self.expires_in) {
			(Some(instant), _) => instant,
			(None, Some(lifetime)) => issued_at + lifetime,
			(None, None) => return Err(CredentialBuilderError::MissingExpiry),
		};

		if expires_at <= issued_at {
			return Err(CredentialBuilderError::ExpiryNotAfterIssuance);
		}

		Ok(Credential {
			access_token,
			refresh_token: self.refresh_token,
			token_type: self.token_type,
			scope: self.scope,
			issued_at,
			expires_at,
		})
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	fn credential_expiring_at(expires_at: OffsetDateTime) -> Credential {
		Credential::builder()
			.access_token("access")
			.issued_at(macros::datetime!(2025-01-01 00:00 UTC))
			.expires_at(expires_at)
			.build()
			.expect("Credential fixture should build.")
	}

	#[test]
	fn expiry_applies_five_minute_buffer() {
		let credential = credential_expiring_at(macros::datetime!(2025-01-01 01:00 UTC));

		assert!(!credential.is_expired_at(macros::datetime!(2025-01-01 00:54:59 UTC)));
		assert!(credential.is_expired_at(macros::datetime!(2025-01-01 00:55 UTC)));
		assert!(credential.is_expired_at(macros::datetime!(2025-01-01 01:30 UTC)));
		assert_eq!(
			credential.remaining_at(macros::datetime!(2025-01-01 00:50 UTC)),
			Duration::from_secs(300)
		);
		assert_eq!(credential.remaining_at(macros::datetime!(2025-01-01 02:00 UTC)), Duration::ZERO);
	}

	#[test]
	fn builder_rejects_incomplete_or_inverted_input() {
		assert_eq!(
			Credential::builder().expires_in(Duration::from_secs(60)).build().unwrap_err(),
			CredentialBuilderError::MissingAccessToken
		);
		assert_eq!(
			Credential::builder().access_token("a").build().unwrap_err(),
			CredentialBuilderError::MissingExpiry
		);
		assert_eq!(
			Credential::builder()
				.access_token("a")
				.issued_at(macros::datetime!(2025-01-01 00:00 UTC))
				.expires_at(macros::datetime!(2025-01-01 00:00 UTC))
				.build()
				.unwrap_err(),
			CredentialBuilderError::ExpiryNotAfterIssuance
		);
	}

	#[test]
	fn refresh_fallback_keeps_previous_token_only_when_missing() {
		let issued = credential_expiring_at(macros::datetime!(2025-01-01 01:00 UTC));
		let kept = issued.clone().with_refresh_fallback(Some(TokenSecret::new("old-refresh")));

		assert_eq!(kept.refresh_token.as_ref().map(TokenSecret::expose), Some("old-refresh"));

		let rotated = Credential::builder()
			.access_token("access")
			.refresh_token("new-refresh")
			.expires_in(Duration::from_secs(3600))
			.build()
			.expect("Rotated credential should build.")
			.with_refresh_fallback(Some(TokenSecret::new("old-refresh")));

		assert_eq!(rotated.refresh_token.as_ref().map(TokenSecret::expose), Some("new-refresh"));
	}

	#[test]
	fn debug_redacts_secrets_and_token_type_parses() {
		let credential = credential_expiring_at(macros::datetime!(2025-01-01 01:00 UTC));
		let rendered = format!("{credential:?}");

		assert!(rendered.contains("<redacted>"));
		assert!(!rendered.contains("access\""));
		assert_eq!(TokenType::parse("bearer"), Some(TokenType::Bearer));
		assert_eq!(TokenType::parse("mac"), None);
	}
}
