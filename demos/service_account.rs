//! Issues a service-account token against a mock token endpoint, then reads a range through
//! the paced, retrying API client.

// std
use std::sync::Arc;
// crates.io
use color_eyre::Result;
use httpmock::prelude::*;
use url::Url;
// self
use sheets_broker::{
	api::{ApiClient, ApiRequest},
	assertion::ServiceAccountKey,
	auth::{ScopeSet, scope},
	http::ReqwestHttpClient,
	oauth::ReqwestTransportErrorMapper,
	provider::{ServiceAccountTokenProvider, TokenProvider},
	rate_limit::RateLimiter,
	reqwest::Client,
	retry::{RetryConfig, RetryingExecutor},
};

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let server = MockServer::start_async().await;
	let token_mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(200).header("content-type", "application/json").body(
				"{\"access_token\":\"demo-service-token\",\"token_type\":\"Bearer\",\"expires_in\":3599}",
			);
		})
		.await;
	let values_mock = server
		.mock_async(|when, then| {
			when.method(GET)
				.path("/v4/spreadsheets/demo-sheet/values/A1:C3")
				.header("authorization", "Bearer demo-service-token");
			then.status(200)
				.header("content-type", "application/json")
				.body("{\"range\":\"A1:C3\",\"values\":[[\"id\",\"name\",\"qty\"],[\"1\",\"bolt\",\"40\"]]}");
		})
		.await;
	let key = ServiceAccountKey::from_json(
		serde_json::json!({
			"type": "service_account",
			"private_key_id": "demo-key",
			"private_key": include_str!("../tests/fixtures/service_account.pem"),
			"client_email": "demo@sheets-demo.iam.gserviceaccount.com",
			"token_uri": server.url("/token"),
		})
		.to_string()
		.as_bytes(),
	)?;
	// httpmock serves a self-signed certificate.
	let http = Client::builder()
		.danger_accept_invalid_certs(true)
		.danger_accept_invalid_hostnames(true)
		.build()?;
	let provider = ServiceAccountTokenProvider::with_http_client(
		&key,
		ScopeSet::new([scope::SPREADSHEETS_READONLY])?,
		ReqwestHttpClient::with_client(http.clone()),
		ReqwestTransportErrorMapper,
	)?;
	let executor = RetryingExecutor::new(Arc::new(provider), RetryConfig::default())?
		.with_rate_limiter(Arc::new(RateLimiter::per_second(5.)?));
	let client = ApiClient::with_base_url(Url::parse(&server.url("/v4/"))?, Arc::new(executor))?
		.with_http_client(http);
	let values = client
		.read_uncached("values.get", ApiRequest::get("spreadsheets/demo-sheet/values/A1:C3"))
		.await?;

	println!("Fetched {}.", values["values"]);
	println!(
		"Token still usable: {}.",
		client.executor().provider().is_authenticated().await?
	);

	token_mock.assert_async().await;
	values_mock.assert_async().await;

	Ok(())
}
