//! Delegated-authorization client configuration.

// self
use crate::{
	_prelude::*,
	auth::{Namespace, ScopeSet},
	error::{ConfigError, EndpointConfigError},
};

/// Google's consent endpoint.
pub const GOOGLE_AUTHORIZATION_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
/// Google's token endpoint.
pub const GOOGLE_TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";

/// Validated configuration of an installed or web OAuth client.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "RawClientConfig")]
pub struct OAuthClientConfig {
	client_id: String,
	client_secret: Option<String>,
	authorization_endpoint: Url,
	token_endpoint: Url,
	redirect_uri: Url,
	scope: ScopeSet,
	namespace: Namespace,
	offline_access: bool,
}
impl OAuthClientConfig {
	/// Starts a builder for `client_id`, pre-filled with Google's endpoints.
	pub fn builder(client_id: impl Into<String>) -> OAuthClientConfigBuilder {
		OAuthClientConfigBuilder::new(client_id)
	}

	/// OAuth client identifier.
	pub fn client_id(&self) -> &str {
		&self.client_id
	}

	/// OAuth client secret, absent for public clients.
	pub fn client_secret(&self) -> Option<&str> {
		self.client_secret.as_deref()
	}

	/// Consent endpoint.
	pub fn authorization_endpoint(&self) -> &Url {
		&self.authorization_endpoint
	}

	/// Token endpoint.
	pub fn token_endpoint(&self) -> &Url {
		&self.token_endpoint
	}

	/// Redirect URI registered for the client.
	pub fn redirect_uri(&self) -> &Url {
		&self.redirect_uri
	}

	/// Requested scopes.
	pub fn scope(&self) -> &ScopeSet {
		&self.scope
	}

	/// Store namespace credentials are kept under; defaults to the client id.
	pub fn namespace(&self) -> &Namespace {
		&self.namespace
	}

	/// Whether consent URLs ask for offline access (a refresh token) with forced consent.
	pub fn offline_access(&self) -> bool {
		self.offline_access
	}
}
impl Debug for OAuthClientConfig {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("OAuthClientConfig")
			.field("client_id", &self.client_id)
			.field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
			.field("authorization_endpoint", &self.authorization_endpoint.as_str())
			.field("token_endpoint", &self.token_endpoint.as_str())
			.field("redirect_uri", &self.redirect_uri.as_str())
			.field("scope", &self.scope)
			.field("namespace", &self.namespace)
			.field("offline_access", &self.offline_access)
			.finish()
	}
}

/// Builder for [`OAuthClientConfig`].
#[derive(Debug)]
pub struct OAuthClientConfigBuilder {
	client_id: String,
	client_secret: Option<String>,
	authorization_endpoint: Option<Url>,
	token_endpoint: Option<Url>,
	redirect_uri: Option<Url>,
	scope: ScopeSet,
	namespace: Option<Namespace>,
	offline_access: bool,
}
impl OAuthClientConfigBuilder {
	fn new(client_id: impl Into<String>) -> Self {
		Self {
			client_id: client_id.into(),
			client_secret: None,
			authorization_endpoint: None,
			token_endpoint: None,
			redirect_uri: None,
			scope: ScopeSet::spreadsheets(),
			namespace: None,
			offline_access: true,
		}
	}

	/// Sets the client secret.
	pub fn client_secret(mut self, secret: impl Into<String>) -> Self {
		self.client_secret = Some(secret.into());

		self
	}

	/// Overrides the consent endpoint.
	pub fn authorization_endpoint(mut self, url: Url) -> Self {
		self.authorization_endpoint = Some(url);

		self
	}

	/// Overrides the token endpoint.
	pub fn token_endpoint(mut self, url: Url) -> Self {
		self.token_endpoint = Some(url);

		self
	}

	/// Sets the redirect URI (required).
	pub fn redirect_uri(mut self, url: Url) -> Self {
		self.redirect_uri = Some(url);

		self
	}

	/// Replaces the requested scopes (defaults to full spreadsheet access).
	pub fn scope(mut self, scope: ScopeSet) -> Self {
		self.scope = scope;

		self
	}

	/// Sets the store namespace.
	pub fn namespace(mut self, namespace: Namespace) -> Self {
		self.namespace = Some(namespace);

		self
	}

	/// Toggles `access_type=offline&prompt=consent` on consent URLs.
	pub fn offline_access(mut self, enabled: bool) -> Self {
		self.offline_access = enabled;

		self
	}

	/// Validates and produces the configuration.
	pub fn build(self) -> Result<OAuthClientConfig> {
		if self.client_id.trim().is_empty() {
			return Err(ConfigError::MissingField { field: "client_id" }.into());
		}
		if self.scope.is_empty() {
			return Err(ConfigError::MissingField { field: "scope" }.into());
		}

		let authorization_endpoint = match self.authorization_endpoint {
			Some(url) => url,
			None => parse_endpoint("authorization_endpoint", GOOGLE_AUTHORIZATION_ENDPOINT)?,
		};
		let token_endpoint = match self.token_endpoint {
			Some(url) => url,
			None => parse_endpoint("token_endpoint", GOOGLE_TOKEN_ENDPOINT)?,
		};
		let redirect_uri = self
			.redirect_uri
			.ok_or(EndpointConfigError::Missing { field: "redirect_uri" })
			.map_err(ConfigError::from)?;

		ensure_secure("authorization_endpoint", &authorization_endpoint)?;
		ensure_secure("token_endpoint", &token_endpoint)?;

		let namespace = match self.namespace {
			Some(namespace) => namespace,
			None => Namespace::new(self.client_id.as_str()).map_err(ConfigError::from)?,
		};

		Ok(OAuthClientConfig {
			client_id: self.client_id,
			client_secret: self.client_secret.filter(|secret| !secret.is_empty()),
			authorization_endpoint,
			token_endpoint,
			redirect_uri,
			scope: self.scope,
			namespace,
			offline_access: self.offline_access,
		})
	}
}

#[derive(Deserialize)]
struct RawClientConfig {
	client_id: String,
	#[serde(default)]
	client_secret: Option<String>,
	#[serde(default)]
	authorization_endpoint: Option<Url>,
	#[serde(default)]
	token_endpoint: Option<Url>,
	redirect_uri: Url,
	#[serde(default)]
	scope: Option<ScopeSet>,
	#[serde(default)]
	namespace: Option<Namespace>,
	#[serde(default = "default_offline_access")]
	offline_access: bool,
}
impl TryFrom<RawClientConfig> for OAuthClientConfig {
	type Error = Error;

	fn try_from(raw: RawClientConfig) -> Result<Self> {
		let mut builder = OAuthClientConfig::builder(raw.client_id)
			.redirect_uri(raw.redirect_uri)
			.offline_access(raw.offline_access);

		if let Some(secret) = raw.client_secret {
			builder = builder.client_secret(secret);
		}
		if let Some(url) = raw.authorization_endpoint {
			builder = builder.authorization_endpoint(url);
		}
		if let Some(url) = raw.token_endpoint {
			builder = builder.token_endpoint(url);
		}
		if let Some(scope) = raw.scope {
			builder = builder.scope(scope);
		}
		if let Some(namespace) = raw.namespace {
			builder = builder.namespace(namespace);
		}

		builder.build()
	}
}

fn default_offline_access() -> bool {
	true
}

fn parse_endpoint(field: &'static str, raw: &str) -> Result<Url> {
	Url::parse(raw)
		.map_err(|source| EndpointConfigError::InvalidUrl { field, source })
		.map_err(|e| ConfigError::from(e).into())
}

/// Requires HTTPS, except for loopback hosts used by local development servers.
pub(crate) fn ensure_secure(field: &'static str, url: &Url) -> Result<()> {
	let loopback = match url.host() {
		Some(url::Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
		Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
		Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
		None => false,
	};

	if url.scheme() == "https" || (url.scheme() == "http" && loopback) {
		return Ok(());
	}

	Err(ConfigError::from(EndpointConfigError::InsecureEndpoint { field, url: url.to_string() })
		.into())
}
