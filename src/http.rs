//! Transport primitives for token-endpoint exchanges.
//!
//! [`TokenHttpClient`] is the crate's only dependency on an HTTP stack for token traffic.
//! Handles it produces carry a [`ResponseMetadataSlot`] so status codes and `Retry-After`
//! hints survive into error classification even when `oauth2` swallows the raw response.

// std
use std::ops::Deref;
// crates.io
use oauth2::{
	AsyncHttpClient, HttpClientError, HttpRequest, HttpResponse,
	http::{
		HeaderMap, HeaderValue, Method,
		header::{ACCEPT, CONTENT_TYPE, RETRY_AFTER},
	},
};
use time::format_description::well_known::Rfc2822;
// self
use crate::{_prelude::*, error::ConfigError};

/// Transport able to execute token-endpoint requests while publishing response metadata.
///
/// Implementations must be `Send + Sync + 'static` so providers can share them across tasks,
/// and the handles they return must own whatever state their request futures need so those
/// futures stay `Send` while a shared token exchange is in flight.
pub trait TokenHttpClient
where
	Self: 'static + Send + Sync,
{
	/// Concrete error emitted by the underlying transport.
	type TransportError: 'static + Send + Sync + StdError;

	/// [`AsyncHttpClient`] handle tied to a [`ResponseMetadataSlot`].
	type Handle: for<'c> AsyncHttpClient<
			'c,
			Error = HttpClientError<Self::TransportError>,
			Future: 'c + Send,
		>
		+ 'static
		+ Send
		+ Sync;

	/// Builds a handle that records outcomes in `slot`.
	///
	/// Handles call [`ResponseMetadataSlot::take`] before sending and
	/// [`ResponseMetadataSlot::store`] as soon as a status line is known.
	fn with_metadata(&self, slot: ResponseMetadataSlot) -> Self::Handle;
}

/// Metadata from the most recent HTTP response, used for error mapping.
#[derive(Clone, Debug, Default)]
pub struct ResponseMetadata {
	/// HTTP status code returned by the endpoint, if available.
	pub status: Option<u16>,
	/// Retry-After hint expressed as a relative duration.
	pub retry_after: Option<Duration>,
}

/// Thread-safe slot sharing [`ResponseMetadata`] between transport and error layers.
#[derive(Clone, Debug, Default)]
pub struct ResponseMetadataSlot(Arc<Mutex<Option<ResponseMetadata>>>);
impl ResponseMetadataSlot {
	/// Stores new metadata for the current request.
	pub fn store(&self, meta: ResponseMetadata) {
		*self.0.lock() = Some(meta);
	}

	/// Returns the captured metadata, if any, consuming it from the slot.
	pub fn take(&self) -> Option<ResponseMetadata> {
		self.0.lock().take()
	}
}

/// Builds a `application/x-www-form-urlencoded` POST for a token endpoint.
pub fn form_request(endpoint: &Url, params: &[(&str, &str)]) -> Result<HttpRequest> {
	let body = url::form_urlencoded::Serializer::new(String::new()).extend_pairs(params).finish();
	let request = oauth2::http::Request::builder()
		.method(Method::POST)
		.uri(endpoint.as_str())
		.header(CONTENT_TYPE, HeaderValue::from_static("application/x-www-form-urlencoded"))
		.header(ACCEPT, HeaderValue::from_static("application/json"))
		.body(body.into_bytes())
		.map_err(ConfigError::from)?;

	Ok(request)
}

/// Parses a `Retry-After` header given either as delta-seconds or as an HTTP-date.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
	let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();

	if let Ok(secs) = raw.parse::<u64>() {
		return Some(Duration::from_secs(secs));
	}

	let normalized = match raw.strip_suffix(" GMT") {
		Some(prefix) => format!("{prefix} +0000"),
		None => raw.to_owned(),
	};
	let moment = OffsetDateTime::parse(&normalized, &Rfc2822).ok()?;

	(moment - OffsetDateTime::now_utc()).try_into().ok()
}

/// Reqwest-backed [`TokenHttpClient`].
///
/// Token endpoints answer directly, so [`ReqwestHttpClient::new`] disables redirect following;
/// configure any custom client passed to [`with_client`](Self::with_client) the same way.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug)]
pub struct ReqwestHttpClient(pub ReqwestClient);
#[cfg(feature = "reqwest")]
impl ReqwestHttpClient {
	/// Builds a client with redirects disabled.
	pub fn new() -> Result<Self> {
		let client = ReqwestClient::builder()
			.redirect(reqwest::redirect::Policy::none())
			.build()
			.map_err(ConfigError::from)?;

		Ok(Self(client))
	}

	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}
}
#[cfg(feature = "reqwest")]
impl Deref for ReqwestHttpClient {
	type Target = ReqwestClient;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl TokenHttpClient for ReqwestHttpClient {
	type Handle = InstrumentedHandle;
	type TransportError = ReqwestError;

	fn with_metadata(&self, slot: ResponseMetadataSlot) -> Self::Handle {
		InstrumentedHandle(Arc::new(Instrumented { client: self.0.clone(), slot }))
	}
}

#[cfg(feature = "reqwest")]
struct Instrumented {
	client: ReqwestClient,
	slot: ResponseMetadataSlot,
}

/// Handle returned by [`ReqwestHttpClient`] that records response metadata.
#[cfg(feature = "reqwest")]
#[derive(Clone)]
pub struct InstrumentedHandle(Arc<Instrumented>);
#[cfg(feature = "reqwest")]
impl<'c> AsyncHttpClient<'c> for InstrumentedHandle {
	type Error = HttpClientError<ReqwestError>;
	type Future =
		Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + 'c + Send + Sync>>;

	fn call(&'c self, request: HttpRequest) -> Self::Future {
		let inner = Arc::clone(&self.0);

		Box::pin(async move {
			inner.slot.take();

			let response =
				inner.client.execute(request.try_into().map_err(Box::new)?).await.map_err(Box::new)?;
			let status = response.status();
			let headers = response.headers().to_owned();

			inner.slot.store(ResponseMetadata {
				status: Some(status.as_u16()),
				retry_after: parse_retry_after(&headers),
			});

			let mut converted =
				HttpResponse::new(response.bytes().await.map_err(Box::new)?.to_vec());

			*converted.status_mut() = status;
			*converted.headers_mut() = headers;

			Ok(converted)
		})
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn headers_with_retry_after(value: &str) -> HeaderMap {
		let mut headers = HeaderMap::new();

		headers.insert(RETRY_AFTER, HeaderValue::from_str(value).expect("Header should be valid."));

		headers
	}

	#[test]
	fn retry_after_accepts_seconds_and_dates() {
		assert_eq!(
			parse_retry_after(&headers_with_retry_after("5")),
			Some(Duration::from_secs(5))
		);
		assert_eq!(parse_retry_after(&HeaderMap::new()), None);
		assert_eq!(parse_retry_after(&headers_with_retry_after("soon")), None);

		let future = OffsetDateTime::now_utc() + Duration::from_secs(120);
		let rendered = future.format(&Rfc2822).expect("Date should format.");
		let parsed = parse_retry_after(&headers_with_retry_after(&rendered))
			.expect("HTTP-date in the future should parse.");

		assert!(parsed <= Duration::from_secs(120) && parsed >= Duration::from_secs(100));
		assert_eq!(
			parse_retry_after(&headers_with_retry_after("Sun, 06 Nov 1994 08:49:37 GMT")),
			None,
			"Dates in the past yield no delay."
		);
	}

	#[test]
	fn form_request_encodes_parameters() {
		let endpoint = Url::parse("https://oauth2.googleapis.com/token").expect("URL should parse.");
		let request = form_request(&endpoint, &[
			("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
			("assertion", "a.b.c"),
		])
		.expect("Form request should build.");

		assert_eq!(request.method(), Method::POST);
		assert_eq!(
			request.headers().get(CONTENT_TYPE).map(HeaderValue::as_bytes),
			Some(&b"application/x-www-form-urlencoded"[..])
		);
		assert_eq!(
			String::from_utf8_lossy(request.body()),
			"grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer&assertion=a.b.c"
		);
	}
}
