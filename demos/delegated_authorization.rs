//! Walks a user through consent, redeems the returned code, and persists the credential in a
//! file store so a later run can refresh it without prompting again.

// std
use std::sync::Arc;
// crates.io
use color_eyre::Result;
use httpmock::prelude::*;
use url::Url;
// self
use sheets_broker::{
	auth::{ScopeSet, scope},
	http::ReqwestHttpClient,
	oauth::ReqwestTransportErrorMapper,
	provider::{DelegatedTokenProvider, OAuthClientConfig, TokenProvider},
	reqwest::Client,
	store::{CredentialStore, FileStore},
};

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let server = MockServer::start_async().await;
	let token_mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(200).header("content-type", "application/json").body(
				"{\"access_token\":\"demo-user-token\",\"refresh_token\":\"demo-refresh\",\"token_type\":\"Bearer\",\"expires_in\":3599}",
			);
		})
		.await;
	let config = OAuthClientConfig::builder("demo-client.apps.example.com")
		.client_secret("demo-secret")
		.authorization_endpoint(Url::parse(&server.url("/authorize"))?)
		.token_endpoint(Url::parse(&server.url("/token"))?)
		.redirect_uri(Url::parse("http://127.0.0.1:8085/callback")?)
		.scope(ScopeSet::new([scope::SPREADSHEETS, scope::DRIVE_FILE])?)
		.build()?;
	let path = std::env::temp_dir().join("sheets-broker-demo-credentials.json");
	let store: Arc<dyn CredentialStore> = Arc::new(FileStore::open(&path)?);
	let provider = <DelegatedTokenProvider<ReqwestHttpClient, ReqwestTransportErrorMapper>>::with_http_client(
		config,
		store,
		ReqwestHttpClient::with_client(
			Client::builder()
				.danger_accept_invalid_certs(true)
				.danger_accept_invalid_hostnames(true)
				.build()?,
		),
		ReqwestTransportErrorMapper,
	);
	let session = provider.start_authorization();

	println!("Send your user to {}.", &session.authorize_url);

	// The redirect handler receives `code` and `state` as query parameters.
	let credential = provider.exchange_code(&session, "demo-code", &session.state).await?;

	println!("Stored credential expiring at {}.", credential.expires_at);
	println!("Credentials persisted to {}.", path.display());
	println!("Authenticated: {}.", provider.is_authenticated().await?);

	provider.clear_tokens().await?;
	token_mock.assert_async().await;

	Ok(())
}
