//! Token-endpoint exchanges and their error classification.
//!
//! Refresh and authorization-code grants go through the `oauth2` crate; the JWT bearer grant
//! is posted directly through the same [`TokenHttpClient`] so every exchange shares one
//! transport, one metadata slot contract, and one classification table.

pub use oauth2;

// crates.io
use oauth2::{
	AuthType, AuthUrl, AuthorizationCode, ClientId, ClientSecret, EndpointNotSet, EndpointSet,
	HttpClientError, PkceCodeVerifier, RedirectUrl, RefreshToken, RequestTokenError,
	TokenResponse, TokenUrl,
	basic::{BasicClient, BasicErrorResponse, BasicRequestTokenError, BasicTokenType},
};
// self
use crate::{
	_prelude::*,
	auth::{Credential, TokenSecret, TokenType},
	error::{ConfigError, TransientError, TransportError},
	http::{self, ResponseMetadata, ResponseMetadataSlot, TokenHttpClient},
	provider::OAuthClientConfig,
};

/// `grant_type` value of the RFC 7523 JWT bearer grant.
pub const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

const BODY_PREVIEW_LIMIT: usize = 256;

pub(crate) type ConfiguredBasicClient =
	BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Grant used by a token exchange, for error mapping and telemetry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TokenGrant {
	/// `refresh_token` grant.
	RefreshToken,
	/// `authorization_code` grant with PKCE.
	AuthorizationCode,
	/// JWT bearer grant with a signed assertion.
	JwtBearer,
}
impl TokenGrant {
	/// Stable label for logs.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::RefreshToken => "refresh_token",
			Self::AuthorizationCode => "authorization_code",
			Self::JwtBearer => "jwt_bearer",
		}
	}
}

/// Maps HTTP transport failures into crate [`Error`] values.
pub trait TransportErrorMapper<E>
where
	Self: 'static + Send + Sync,
	E: 'static + Send + Sync + StdError,
{
	/// Converts an [`HttpClientError`] emitted by the transport.
	fn map_transport_error(
		&self,
		grant: TokenGrant,
		metadata: Option<&ResponseMetadata>,
		error: HttpClientError<E>,
	) -> Error;
}

/// Default mapper for reqwest-backed transports.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransportErrorMapper;
#[cfg(feature = "reqwest")]
impl TransportErrorMapper<ReqwestError> for ReqwestTransportErrorMapper {
	fn map_transport_error(
		&self,
		grant: TokenGrant,
		meta: Option<&ResponseMetadata>,
		err: HttpClientError<ReqwestError>,
	) -> Error {
		match err {
			HttpClientError::Reqwest(inner) => map_reqwest_error(grant, meta, *inner),
			HttpClientError::Http(inner) => ConfigError::from(inner).into(),
			HttpClientError::Io(inner) => TransportError::from(inner).into(),
			HttpClientError::Other(message) => transient(
				format!("HTTP client error during the {} grant: {message}", grant.as_str()),
				meta,
			),
			_ => transient(format!("HTTP client error during the {} grant", grant.as_str()), meta),
		}
	}
}

/// Builds the `oauth2` client for a delegated-authorization configuration.
///
/// Client credentials travel in the request body, matching the refresh form
/// `grant_type=refresh_token&refresh_token=..&client_id=..&client_secret=..`.
pub(crate) fn basic_client(config: &OAuthClientConfig) -> ConfiguredBasicClient {
	let mut client = BasicClient::new(ClientId::new(config.client_id().to_owned()))
		.set_auth_uri(AuthUrl::from_url(config.authorization_endpoint().clone()))
		.set_token_uri(TokenUrl::from_url(config.token_endpoint().clone()))
		.set_redirect_uri(RedirectUrl::from_url(config.redirect_uri().clone()))
		.set_auth_type(AuthType::RequestBody);

	if let Some(secret) = config.client_secret() {
		client = client.set_client_secret(ClientSecret::new(secret.to_owned()));
	}

	client
}

/// Executes token exchanges over a shared transport.
pub(crate) struct TokenExchange<C, M> {
	http_client: Arc<C>,
	error_mapper: Arc<M>,
}
impl<C, M> TokenExchange<C, M>
where
	C: TokenHttpClient,
	M: TransportErrorMapper<C::TransportError>,
{
	pub(crate) fn new(http_client: Arc<C>, error_mapper: Arc<M>) -> Self {
		Self { http_client, error_mapper }
	}

	pub(crate) async fn refresh(
		&self,
		client: &ConfiguredBasicClient,
		refresh_token: &TokenSecret,
	) -> Result<Credential> {
		let meta = ResponseMetadataSlot::default();
		let instrumented = self.http_client.with_metadata(meta.clone());
		let secret = RefreshToken::new(refresh_token.expose().to_owned());
		let response = client
			.exchange_refresh_token(&secret)
			.request_async(&instrumented)
			.await
			.map_err(|e| self.map_request_error(TokenGrant::RefreshToken, meta.take(), e))?;

		credential_from_response(&response)
	}

	pub(crate) async fn authorization_code(
		&self,
		client: &ConfiguredBasicClient,
		code: &str,
		pkce_verifier: &str,
	) -> Result<Credential> {
		let meta = ResponseMetadataSlot::default();
		let instrumented = self.http_client.with_metadata(meta.clone());
		let response = client
			.exchange_code(AuthorizationCode::new(code.to_owned()))
			.set_pkce_verifier(PkceCodeVerifier::new(pkce_verifier.to_owned()))
			.request_async(&instrumented)
			.await
			.map_err(|e| self.map_request_error(TokenGrant::AuthorizationCode, meta.take(), e))?;

		credential_from_response(&response)
	}

	pub(crate) async fn jwt_bearer(
		&self,
		token_uri: &Url,
		assertion: TokenSecret,
	) -> Result<Credential> {
		let meta = ResponseMetadataSlot::default();
		let handle = self.http_client.with_metadata(meta.clone());
		let request = http::form_request(token_uri, &[
			("grant_type", JWT_BEARER_GRANT),
			("assertion", assertion.expose()),
		])?;

		drop(assertion);

		let response = oauth2::AsyncHttpClient::call(&handle, request).await.map_err(|e| {
			self.error_mapper.map_transport_error(TokenGrant::JwtBearer, meta.take().as_ref(), e)
		})?;
		let status = response.status().as_u16();

		if response.status().is_success() {
			let deserializer = &mut serde_json::Deserializer::from_slice(response.body());
			let parsed: TokenEndpointResponse = serde_path_to_error::deserialize(deserializer)
				.map_err(|e| TransientError::token_response_parse(e, Some(status)))?;

			return parsed.into_credential();
		}

		let meta = ResponseMetadata {
			status: Some(status),
			retry_after: http::parse_retry_after(response.headers()),
		};
		let body = serde_json::from_slice::<OAuthErrorBody>(response.body()).ok();

		Err(match body {
			Some(body) => token_failure(
				Some(&body.error),
				body.error_description.as_deref(),
				None,
				Some(&meta),
			),
			None => token_failure(
				None,
				None,
				Some(&String::from_utf8_lossy(response.body())),
				Some(&meta),
			),
		})
	}

	fn map_request_error(
		&self,
		grant: TokenGrant,
		meta: Option<ResponseMetadata>,
		err: BasicRequestTokenError<HttpClientError<C::TransportError>>,
	) -> Error {
		let meta = meta.as_ref();

		match err {
			RequestTokenError::ServerResponse(response) => server_response_error(&response, meta),
			RequestTokenError::Request(error) =>
				self.error_mapper.map_transport_error(grant, meta, error),
			RequestTokenError::Parse(error, body) => match meta.and_then(|m| m.status) {
				Some(status) if !(200..300).contains(&status) => token_failure(
					None,
					None,
					Some(&String::from_utf8_lossy(&body)),
					meta,
				),
				status => TransientError::token_response_parse(error, status).into(),
			},
			RequestTokenError::Other(message) =>
				transient(format!("unexpected token response: {message}"), meta),
		}
	}
}
impl<C, M> Clone for TokenExchange<C, M> {
	fn clone(&self) -> Self {
		Self { http_client: Arc::clone(&self.http_client), error_mapper: Arc::clone(&self.error_mapper) }
	}
}

/// Token endpoint success body.
#[derive(Debug, Deserialize)]
struct TokenEndpointResponse {
	access_token: String,
	#[serde(default)]
	refresh_token: Option<String>,
	#[serde(default)]
	expires_in: Option<i64>,
	#[serde(default)]
	token_type: Option<String>,
	#[serde(default)]
	scope: Option<String>,
}
impl TokenEndpointResponse {
	fn into_credential(self) -> Result<Credential> {
		let token_type = match self.token_type.as_deref() {
			None => TokenType::Bearer,
			Some(raw) => TokenType::parse(raw)
				.ok_or_else(|| ConfigError::UnsupportedTokenType { found: raw.to_owned() })?,
		};
		let expires_in = match self.expires_in {
			None => return Err(ConfigError::MissingExpiresIn.into()),
			Some(secs) if secs <= 0 => return Err(ConfigError::NonPositiveExpiresIn.into()),
			Some(secs) => lifetime_from_secs(secs as u64)?,
		};
		let mut builder = Credential::builder()
			.access_token(self.access_token)
			.token_type(token_type)
			.expires_in(expires_in);

		if let Some(refresh) = self.refresh_token.filter(|token| !token.is_empty()) {
			builder = builder.refresh_token(refresh);
		}
		if let Some(scope) = self.scope {
			builder = builder.scope(scope);
		}

		Ok(builder.build().map_err(ConfigError::from)?)
	}
}

/// RFC 6749 section 5.2 error body.
#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
	error: String,
	#[serde(default)]
	error_description: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TokenFailure {
	InvalidGrant,
	InvalidClient,
	AccessDenied,
	Transient,
}

fn credential_from_response(response: &oauth2::basic::BasicTokenResponse) -> Result<Credential> {
	if !matches!(response.token_type(), BasicTokenType::Bearer) {
		return Err(ConfigError::UnsupportedTokenType {
			found: response.token_type().as_ref().to_owned(),
		}
		.into());
	}

	let expires_in = response.expires_in().ok_or(ConfigError::MissingExpiresIn)?;

	if expires_in.is_zero() {
		return Err(ConfigError::NonPositiveExpiresIn.into());
	}

	let mut builder = Credential::builder()
		.access_token(response.access_token().secret().to_owned())
		.expires_in(lifetime_from_secs(expires_in.as_secs())?);

	if let Some(refresh) = response.refresh_token() {
		builder = builder.refresh_token(refresh.secret().to_owned());
	}
	if let Some(scopes) = response.scopes() {
		builder =
			builder.scope(scopes.iter().map(|scope| scope.as_str()).collect::<Vec<_>>().join(" "));
	}

	Ok(builder.build().map_err(ConfigError::from)?)
}

fn lifetime_from_secs(secs: u64) -> Result<Duration> {
	// Anything past a decade is a broken endpoint, and keeps expiry arithmetic in range.
	const MAX_LIFETIME_SECS: u64 = 10 * 365 * 24 * 3600;

	if secs > MAX_LIFETIME_SECS {
		return Err(ConfigError::ExpiresInOutOfRange.into());
	}

	Ok(Duration::from_secs(secs))
}

fn server_response_error(response: &BasicErrorResponse, meta: Option<&ResponseMetadata>) -> Error {
	token_failure(
		Some(response.error().as_ref()),
		response.error_description().map(String::as_str),
		None,
		meta,
	)
}

fn token_failure(
	oauth_error: Option<&str>,
	description: Option<&str>,
	body: Option<&str>,
	meta: Option<&ResponseMetadata>,
) -> Error {
	let status = meta.and_then(|m| m.status);

	if status == Some(429) {
		return Error::RateLimited { retry_after: meta.and_then(|m| m.retry_after) };
	}

	let kind = oauth_error
		.and_then(classify_oauth_value)
		.or_else(|| description.and_then(classify_oauth_value))
		.or_else(|| classify_body(description))
		.or_else(|| classify_body(body))
		.unwrap_or_else(|| classify_status(status));
	let reason = match (oauth_error, description) {
		(Some(code), Some(description)) => format!("{code}: {description}"),
		(Some(code), None) => code.to_owned(),
		(None, Some(description)) => description.to_owned(),
		(None, None) => match (status, body.map(truncate_preview)) {
			(Some(status), Some(preview)) if !preview.is_empty() =>
				format!("status {status}: {preview}"),
			(Some(status), _) => format!("status {status}"),
			(None, _) => "no details".into(),
		},
	};

	match kind {
		TokenFailure::InvalidGrant => Error::InvalidGrant { reason },
		TokenFailure::InvalidClient => Error::InvalidClient { reason },
		TokenFailure::AccessDenied => Error::AccessDenied { reason },
		TokenFailure::Transient => transient(reason, meta),
	}
}

fn transient(message: String, meta: Option<&ResponseMetadata>) -> Error {
	TransientError::TokenEndpoint {
		message,
		status: meta.and_then(|m| m.status),
		retry_after: meta.and_then(|m| m.retry_after),
	}
	.into()
}

fn classify_oauth_value(value: &str) -> Option<TokenFailure> {
	if value.eq_ignore_ascii_case("invalid_grant") || value.eq_ignore_ascii_case("access_denied") {
		Some(TokenFailure::InvalidGrant)
	} else if value.eq_ignore_ascii_case("invalid_client")
		|| value.eq_ignore_ascii_case("unauthorized_client")
	{
		Some(TokenFailure::InvalidClient)
	} else if value.eq_ignore_ascii_case("invalid_scope")
		|| value.eq_ignore_ascii_case("insufficient_scope")
	{
		Some(TokenFailure::AccessDenied)
	} else if value.eq_ignore_ascii_case("temporarily_unavailable")
		|| value.eq_ignore_ascii_case("server_error")
	{
		Some(TokenFailure::Transient)
	} else {
		None
	}
}

fn classify_body(body: Option<&str>) -> Option<TokenFailure> {
	let lowered = body?.to_ascii_lowercase();

	match lowered.as_str() {
		text if text.contains("invalid_grant") => Some(TokenFailure::InvalidGrant),
		text if text.contains("invalid_client") => Some(TokenFailure::InvalidClient),
		text if text.contains("insufficient_scope") || text.contains("invalid_scope") =>
			Some(TokenFailure::AccessDenied),
		text if text.contains("temporarily_unavailable") => Some(TokenFailure::Transient),
		_ => None,
	}
}

fn classify_status(status: Option<u16>) -> TokenFailure {
	match status {
		Some(400 | 404 | 410) => TokenFailure::InvalidGrant,
		Some(401) => TokenFailure::InvalidClient,
		Some(403) => TokenFailure::AccessDenied,
		_ => TokenFailure::Transient,
	}
}

fn truncate_preview(body: &str) -> String {
	let trimmed = body.trim();

	if trimmed.chars().count() <= BODY_PREVIEW_LIMIT {
		return trimmed.to_owned();
	}

	let mut preview = trimmed.chars().take(BODY_PREVIEW_LIMIT).collect::<String>();

	preview.push('…');

	preview
}

#[cfg(feature = "reqwest")]
fn map_reqwest_error(grant: TokenGrant, meta: Option<&ResponseMetadata>, err: ReqwestError) -> Error {
	if err.is_builder() {
		return ConfigError::from(err).into();
	}
	if err.is_timeout() {
		return transient(format!("{} request timed out", grant.as_str()), meta);
	}

	TransportError::from(err).into()
}
