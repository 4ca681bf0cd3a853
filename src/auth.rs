//! Directory API authentication
//!
//! Exchanges the long-lived refresh token for a short-lived access token.
//! There is no retry here: every subsequent call depends on the token, so a
//! rejected credential fails the run immediately instead of masking it with
//! partial partition results. The token is treated as valid for the run's
//! duration (runs are bounded well under typical token lifetimes).

use crate::config::Config;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Short-lived bearer token for the directory API
#[derive(Debug, Clone)]
pub struct AccessToken(String);

impl AccessToken {
    /// The `Authorization` header value for API requests
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }

    /// Fabricate a token without an auth round-trip (tests only)
    #[cfg(test)]
    pub(crate) fn test_only(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Exchange the configured refresh token for an access token.
///
/// Fails with [`Error::Auth`] when the credential is rejected, the call
/// times out, or the response carries no token.
pub async fn authenticate(client: &reqwest::Client, config: &Config) -> Result<AccessToken> {
    let refresh_token = config
        .api
        .refresh_token
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::Auth("no refresh token configured".to_string()))?;

    let url = format!("{}/tokens", config.api.base_url);
    info!(url = %url, "authenticating against the feed directory API");

    let response = client
        .post(&url)
        .json(&TokenRequest { refresh_token })
        .timeout(config.api.timeout)
        .send()
        .await
        .map_err(|e| Error::Auth(format!("token request failed: {e}")))?;

    if !response.status().is_success() {
        return Err(Error::Auth(format!(
            "token endpoint returned HTTP {}",
            response.status().as_u16()
        )));
    }

    let body: TokenResponse = response
        .json()
        .await
        .map_err(|e| Error::Auth(format!("malformed token response: {e}")))?;

    info!("directory API authentication succeeded");
    Ok(AccessToken(body.access_token))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> Config {
        let mut config = Config::default();
        config.api.base_url = server.uri();
        config.api.refresh_token = Some("refresh-123".to_string());
        config
    }

    #[tokio::test]
    async fn exchanges_refresh_token_for_access_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tokens"))
            .and(body_json(serde_json::json!({"refresh_token": "refresh-123"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"access_token": "jwt-abc"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let token = authenticate(&client, &config_for(&server)).await.unwrap();
        assert_eq!(token.bearer(), "Bearer jwt-abc");
    }

    #[tokio::test]
    async fn rejected_credential_is_an_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tokens"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let err = authenticate(&client, &config_for(&server)).await.unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
        assert!(err.to_string().contains("401"));
    }

    #[tokio::test]
    async fn missing_refresh_token_fails_before_any_network_call() {
        let server = MockServer::start().await;
        // No mock mounted: a request would 404 and register as received
        let mut config = config_for(&server);
        config.api.refresh_token = None;

        let client = reqwest::Client::new();
        let err = authenticate(&client, &config).await.unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_token_response_is_an_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tokens"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let err = authenticate(&client, &config_for(&server)).await.unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
    }
}
