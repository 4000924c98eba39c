//! Service-account key material and RS256 signed assertions for the JWT bearer grant.
//!
//! An assertion is built fresh for every token exchange and consumed by it. Claims follow
//! RFC 7523: `iss` is the service identity, `aud` the token endpoint, `scope` the space-joined
//! scope set, `exp = iat + 3600`, and `sub` names the user being impersonated, if any.

// std
use std::path::Path;
// crates.io
use jsonwebtoken::{Algorithm, EncodingKey, Header};
// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, TokenSecret},
	error::{ConfigError, EndpointConfigError},
};

/// Environment variable naming the service-account key file.
pub const CREDENTIALS_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS";
/// Fixed lifetime of every assertion.
pub const ASSERTION_LIFETIME: Duration = Duration::from_secs(3600);

/// Service-account key file contents.
///
/// Only `client_email`, `private_key`, and `token_uri` are required; the other fields of the
/// downloaded key file are kept when present and otherwise ignored.
#[derive(Clone, Serialize, Deserialize)]
pub struct ServiceAccountKey {
	/// Service identity email, used as the assertion issuer.
	pub client_email: String,
	/// PEM-encoded RSA private key (PKCS#1 or PKCS#8).
	pub private_key: String,
	/// Token endpoint, used as the assertion audience and exchange target.
	pub token_uri: Url,
	/// Key identifier placed in the JWT header.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub private_key_id: Option<String>,
	/// Owning project.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub project_id: Option<String>,
	/// Numeric client id of the service identity.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub client_id: Option<String>,
}
impl ServiceAccountKey {
	/// Parses key file contents, naming the first missing or malformed field.
	pub fn from_json(bytes: &[u8]) -> Result<Self> {
		let deserializer = &mut serde_json::Deserializer::from_slice(bytes);
		let raw: RawServiceAccountKey =
			serde_path_to_error::deserialize(deserializer).map_err(ConfigError::from)?;
		let client_email = required(raw.client_email, "client_email")?;
		let private_key = required(raw.private_key, "private_key")?;
		let token_uri = required(raw.token_uri, "token_uri")?;
		let token_uri = Url::parse(&token_uri)
			.map_err(|source| EndpointConfigError::InvalidUrl { field: "token_uri", source })
			.map_err(ConfigError::from)?;

		Ok(Self {
			client_email,
			private_key,
			token_uri,
			private_key_id: raw.private_key_id.filter(|id| !id.is_empty()),
			project_id: raw.project_id,
			client_id: raw.client_id,
		})
	}

	/// Reads and parses a key file.
	pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref();
		let bytes = std::fs::read(path).map_err(|e| ConfigError::CredentialFile {
			path: path.display().to_string(),
			source: Arc::new(e),
		})?;

		Self::from_json(&bytes)
	}

	/// Reads the key file named by [`CREDENTIALS_ENV`].
	pub fn from_env() -> Result<Self> {
		let path = std::env::var_os(CREDENTIALS_ENV)
			.filter(|value| !value.is_empty())
			.ok_or(ConfigError::MissingEnvVar { name: CREDENTIALS_ENV })?;

		Self::from_file(path)
	}
}
impl Debug for ServiceAccountKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ServiceAccountKey")
			.field("client_email", &self.client_email)
			.field("private_key", &"<redacted>")
			.field("token_uri", &self.token_uri.as_str())
			.field("private_key_id", &self.private_key_id)
			.field("project_id", &self.project_id)
			.finish()
	}
}

#[derive(Deserialize)]
struct RawServiceAccountKey {
	#[serde(default)]
	client_email: Option<String>,
	#[serde(default)]
	private_key: Option<String>,
	#[serde(default)]
	token_uri: Option<String>,
	#[serde(default)]
	private_key_id: Option<String>,
	#[serde(default)]
	project_id: Option<String>,
	#[serde(default)]
	client_id: Option<String>,
}

/// JWT claims carried by a signed assertion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionClaims {
	/// Service identity email.
	pub iss: String,
	/// Space-joined requested scopes.
	pub scope: String,
	/// Token endpoint URL.
	pub aud: String,
	/// Expiry, seconds since the Unix epoch.
	pub exp: i64,
	/// Issued-at, seconds since the Unix epoch.
	pub iat: i64,
	/// Impersonated user, when domain-wide delegation is in use.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub sub: Option<String>,
}

/// Encoded assertion ready for a single exchange.
#[derive(Debug)]
pub struct SignedAssertion {
	claims: AssertionClaims,
	encoded: TokenSecret,
}
impl SignedAssertion {
	/// Claims that were signed.
	pub fn claims(&self) -> &AssertionClaims {
		&self.claims
	}

	/// Consumes the assertion, returning the compact `header.claims.signature` form.
	pub fn into_encoded(self) -> TokenSecret {
		self.encoded
	}
}

/// Builds and signs assertions for one service identity and scope set.
pub struct SignedAssertionIssuer {
	service_email: String,
	token_uri: Url,
	key_id: Option<String>,
	scope: ScopeSet,
	encoding_key: EncodingKey,
}
impl SignedAssertionIssuer {
	/// Loads the private key and binds the issuer to `scope`.
	pub fn new(key: &ServiceAccountKey, scope: ScopeSet) -> Result<Self> {
		if scope.is_empty() {
			return Err(ConfigError::MissingField { field: "scope" }.into());
		}

		let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes()).map_err(|e| {
			ConfigError::InvalidKey { field: "private_key", reason: e.to_string() }
		})?;

		Ok(Self {
			service_email: key.client_email.clone(),
			token_uri: key.token_uri.clone(),
			key_id: key.private_key_id.clone(),
			scope,
			encoding_key,
		})
	}

	/// Service identity email.
	pub fn service_email(&self) -> &str {
		&self.service_email
	}

	/// Token endpoint the assertions are addressed to.
	pub fn token_uri(&self) -> &Url {
		&self.token_uri
	}

	/// Requested scopes.
	pub fn scope(&self) -> &ScopeSet {
		&self.scope
	}

	/// Claims for an assertion issued at `issued_at`.
	pub fn claims_at(&self, issued_at: OffsetDateTime, subject: Option<&str>) -> AssertionClaims {
		let iat = issued_at.unix_timestamp();

		AssertionClaims {
			iss: self.service_email.clone(),
			scope: self.scope.normalized(),
			aud: self.token_uri.to_string(),
			exp: iat + ASSERTION_LIFETIME.as_secs() as i64,
			iat,
			sub: subject.map(str::to_owned),
		}
	}

	/// Signs a fresh assertion stamped with the current clock.
	pub fn issue(&self, subject: Option<&str>) -> Result<SignedAssertion> {
		self.issue_at(OffsetDateTime::now_utc(), subject)
	}

	/// Signs an assertion stamped with `issued_at`.
	pub fn issue_at(
		&self,
		issued_at: OffsetDateTime,
		subject: Option<&str>,
	) -> Result<SignedAssertion> {
		let claims = self.claims_at(issued_at, subject);
		let mut header = Header::new(Algorithm::RS256);

		header.kid = self.key_id.clone();

		let encoded = jsonwebtoken::encode(&header, &claims, &self.encoding_key)
			.map_err(ConfigError::signing)?;

		Ok(SignedAssertion { claims, encoded: TokenSecret::new(encoded) })
	}
}
impl Debug for SignedAssertionIssuer {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("SignedAssertionIssuer")
			.field("service_email", &self.service_email)
			.field("token_uri", &self.token_uri.as_str())
			.field("key_id", &self.key_id)
			.field("scope", &self.scope)
			.finish_non_exhaustive()
	}
}

fn required(value: Option<String>, field: &'static str) -> Result<String, ConfigError> {
	value.filter(|v| !v.trim().is_empty()).ok_or(ConfigError::MissingField { field })
}
