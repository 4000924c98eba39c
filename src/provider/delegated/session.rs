//! Authorization-code + PKCE handshake state.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{Rng, distr::Alphanumeric};
use sha2::{Digest, Sha256};
// self
use crate::{_prelude::*, auth::ScopeSet, error::ConfigError, provider::OAuthClientConfig};

const STATE_LEN: usize = 32;
const PKCE_VERIFIER_LEN: usize = 64;

/// Pending consent handshake returned by
/// [`DelegatedTokenProvider::start_authorization`](super::DelegatedTokenProvider::start_authorization).
///
/// Send the user to [`authorize_url`](Self::authorize_url); when the redirect comes back, hand
/// the session, the `code`, and the returned `state` to
/// [`exchange_code`](super::DelegatedTokenProvider::exchange_code).
#[derive(Clone)]
pub struct AuthorizationSession {
	/// Requested scope set.
	pub scope: ScopeSet,
	/// Opaque state value that must round-trip through the redirect.
	pub state: String,
	/// Redirect URI embedded in the consent URL.
	pub redirect_uri: Url,
	/// Consent URL to open in the user's browser.
	pub authorize_url: Url,
	pkce_verifier: String,
	code_challenge: String,
}
impl AuthorizationSession {
	pub(super) fn start(config: &OAuthClientConfig) -> Self {
		let state = random_string(STATE_LEN);
		let pkce_verifier = random_string(PKCE_VERIFIER_LEN);
		let code_challenge = pkce_challenge(&pkce_verifier);
		let authorize_url = authorize_url(config, &state, &code_challenge);

		Self {
			scope: config.scope().clone(),
			state,
			redirect_uri: config.redirect_uri().clone(),
			authorize_url,
			pkce_verifier,
			code_challenge,
		}
	}

	/// PKCE S256 code challenge derived from the secret verifier.
	pub fn code_challenge(&self) -> &str {
		&self.code_challenge
	}

	/// Rejects a redirect whose `state` does not belong to this session.
	pub fn validate_state(&self, returned_state: &str) -> Result<()> {
		if returned_state == self.state {
			Ok(())
		} else {
			Err(ConfigError::StateMismatch.into())
		}
	}

	pub(super) fn pkce_verifier(&self) -> &str {
		&self.pkce_verifier
	}
}
impl Debug for AuthorizationSession {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AuthorizationSession")
			.field("scope", &self.scope)
			.field("state", &self.state)
			.field("redirect_uri", &self.redirect_uri.as_str())
			.field("authorize_url", &self.authorize_url.as_str())
			.field("code_challenge", &self.code_challenge)
			.finish_non_exhaustive()
	}
}

fn authorize_url(config: &OAuthClientConfig, state: &str, code_challenge: &str) -> Url {
	let mut url = config.authorization_endpoint().clone();

	{
		let mut pairs = url.query_pairs_mut();

		pairs.append_pair("response_type", "code");
		pairs.append_pair("client_id", config.client_id());
		pairs.append_pair("redirect_uri", config.redirect_uri().as_str());
		pairs.append_pair("scope", &config.scope().normalized());
		pairs.append_pair("state", state);
		pairs.append_pair("code_challenge", code_challenge);
		pairs.append_pair("code_challenge_method", "S256");

		if config.offline_access() {
			pairs.append_pair("access_type", "offline");
			pairs.append_pair("prompt", "consent");
		}
	}

	url
}

fn random_string(len: usize) -> String {
	rand::rng().sample_iter(Alphanumeric).take(len).map(char::from).collect()
}

fn pkce_challenge(verifier: &str) -> String {
	URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}
