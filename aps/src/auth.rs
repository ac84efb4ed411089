//! Two-legged OAuth against the APS authentication service.

use anyhow::{bail, Error};
use async_std::sync::Mutex;
use serde::Deserialize;
use std::time::{Duration, Instant};
use surf::{http::Method, Body, RequestBuilder, Url};

/// Scopes requested by default.
///
/// `viewables:read` is required by the Model Derivative API.
pub const DEFAULT_SCOPES: &str = "data:read data:write data:create bucket:read viewables:read";

/// Tokens are treated as expired this long before APS says they are.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Application credentials for the client-credentials grant.
#[derive(Clone, Debug, Default)]
pub struct Credentials {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub scopes: String,
}

#[derive(Clone, Debug)]
struct Token {
    access_token: String,
    expires_at: Instant,
}

#[derive(Clone, Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// A cached access token, refreshed on demand.
///
/// The cache is shared by every request in the process. Refreshes are serialized, so a burst of
/// concurrent requests with a stale token results in a single call to the token endpoint.
pub struct TokenCache {
    http: surf::Client,
    url: Url,
    credentials: Credentials,
    cached: Mutex<Option<Token>>,
}

impl TokenCache {
    pub fn new(http: surf::Client, base_url: &Url, credentials: Credentials) -> Result<Self, Error> {
        Ok(Self {
            http,
            url: base_url.join("/authentication/v2/token")?,
            credentials,
            cached: Mutex::new(None),
        })
    }

    /// Get a valid access token.
    ///
    /// If `force_refresh` is set, a new token is requested even if the cached one has not expired
    /// yet. This is used to recover from a token that APS has rejected.
    pub async fn token(&self, force_refresh: bool) -> Result<String, Error> {
        let (Some(client_id), Some(client_secret)) = (
            &self.credentials.client_id,
            &self.credentials.client_secret,
        ) else {
            tracing::error!("APS credentials missing");
            bail!("APS credentials missing.");
        };

        let mut cached = self.cached.lock().await;
        if !force_refresh {
            if let Some(token) = &*cached {
                let now = Instant::now();
                if now < token.expires_at {
                    tracing::debug!(
                        "using cached token (expires in {}s)",
                        (token.expires_at - now).as_secs()
                    );
                    return Ok(token.access_token.clone());
                }
            }
        }

        tracing::info!(scopes = %self.credentials.scopes, "authenticating with APS");
        let form = [
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
            ("grant_type", "client_credentials"),
            ("scope", self.credentials.scopes.as_str()),
        ];
        let req = RequestBuilder::new(Method::Post, self.url.clone())
            .body(Body::from_form(&form).map_err(Error::msg)?)
            .build();
        let mut res = self.http.send(req).await.map_err(Error::msg)?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.body_string().await.unwrap_or_default();
            tracing::error!(%status, "token refresh failed: {body}");
            bail!("token request failed ({status}): {body}");
        }

        let data: TokenResponse = res.body_json().await.map_err(Error::msg)?;
        let lifetime = Duration::from_secs(data.expires_in).saturating_sub(EXPIRY_MARGIN);
        *cached = Some(Token {
            access_token: data.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(data.access_token)
    }

    /// Forget the cached token, so the next call to [`token`](Self::token) requests a new one.
    pub async fn clear(&self) {
        *self.cached.lock().await = None;
        tracing::info!("token cache cleared");
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::{fixtures, MockAps};
    use futures::future::join_all;

    fn cache(mock: &MockAps, credentials: Credentials) -> TokenCache {
        TokenCache::new(surf::Client::new(), mock.base_url(), credentials).unwrap()
    }

    fn credentials() -> Credentials {
        Credentials {
            client_id: Some("client".into()),
            client_secret: Some("secret".into()),
            scopes: DEFAULT_SCOPES.into(),
        }
    }

    #[async_std::test]
    async fn test_token_is_cached() {
        let mock = MockAps::start().await;
        let tokens = cache(&mock, credentials());

        let first = tokens.token(false).await.unwrap();
        let second = tokens.token(false).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(mock.token_requests(), 1);
    }

    #[async_std::test]
    async fn test_concurrent_requests_share_one_refresh() {
        let mock = MockAps::start().await;
        let tokens = cache(&mock, credentials());

        let results = join_all((0..8).map(|_| tokens.token(false))).await;
        let tokens = results
            .into_iter()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert!(tokens.iter().all(|token| *token == tokens[0]), "{tokens:?}");
        assert_eq!(mock.token_requests(), 1);
    }

    #[async_std::test]
    async fn test_token_within_expiry_margin_is_refreshed() {
        let mock = MockAps::start().await;
        let tokens = cache(
            &mock,
            Credentials {
                client_id: Some(fixtures::SHORT_LIVED_CLIENT_ID.into()),
                ..credentials()
            },
        );

        // The token is valid for another 60 seconds, which is not enough to be worth caching.
        let first = tokens.token(false).await.unwrap();
        let second = tokens.token(false).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(mock.token_requests(), 2);
    }

    #[async_std::test]
    async fn test_force_refresh_and_clear() {
        let mock = MockAps::start().await;
        let tokens = cache(&mock, credentials());

        let first = tokens.token(false).await.unwrap();
        let refreshed = tokens.token(true).await.unwrap();
        assert_ne!(first, refreshed);

        tokens.clear().await;
        let after_clear = tokens.token(false).await.unwrap();
        assert_ne!(refreshed, after_clear);
        assert_eq!(mock.token_requests(), 3);
    }

    #[async_std::test]
    async fn test_scopes_are_sent() {
        let mock = MockAps::start().await;
        let tokens = cache(&mock, credentials());
        tokens.token(false).await.unwrap();
        assert_eq!(mock.last_scope().await.as_deref(), Some(DEFAULT_SCOPES));
    }

    #[async_std::test]
    async fn test_missing_credentials() {
        let mock = MockAps::start().await;
        let tokens = cache(
            &mock,
            Credentials {
                client_secret: None,
                ..credentials()
            },
        );
        let err = tokens.token(false).await.unwrap_err();
        assert_eq!(err.to_string(), "APS credentials missing.");
        assert_eq!(mock.token_requests(), 0);
    }

    #[async_std::test]
    async fn test_rejected_credentials() {
        let mock = MockAps::start().await;
        let tokens = cache(
            &mock,
            Credentials {
                client_secret: Some("wrong".into()),
                ..credentials()
            },
        );
        let err = tokens.token(false).await.unwrap_err();
        assert!(err.to_string().contains("invalid_client"), "{err}");
    }
}
