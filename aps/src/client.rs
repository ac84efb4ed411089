//! The HTTP client through which every APS request is made.
//!
//! Every request automatically gets:
//! * `Authorization: Bearer <token>`, from the shared [`TokenCache`]
//! * `x-ads-region`, so data is served from the configured region
//! * a timeout (15s by default, 120s for streaming downloads)
//! * one retry on 401, with a freshly minted token
//! * one retry on 429, after waiting as long as `Retry-After` asks
//!
//! Any response with an error status is turned into an [`ApiError`].

use crate::auth::{Credentials, TokenCache};
use anyhow::Error;
use async_std::task::sleep;
use derive_more::Display;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use surf::{
    http::{Method, StatusCode},
    RequestBuilder, Response, Url,
};

/// Timeout for ordinary API calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Timeout for streaming downloads of large model metadata.
pub const STREAMING_TIMEOUT: Duration = Duration::from_secs(120);

/// How long to wait after a 429 which does not specify `Retry-After`.
const DEFAULT_RETRY_AFTER: u64 = 5;

/// An error response from an APS endpoint.
#[derive(Clone, Debug, Display, PartialEq, Eq)]
#[display(fmt = "Autodesk API Error {}: {}", status, detail)]
pub struct ApiError {
    pub status: u16,
    pub detail: String,
}

impl std::error::Error for ApiError {}

impl ApiError {
    /// Extract the most useful description of an error from an APS response body.
    ///
    /// APS services are not consistent about error formats. Some return a JSON object with an
    /// `errors` array, some a JSON object with `detail`, and some plain text.
    pub fn from_body(status: u16, body: &str) -> Self {
        let detail = match serde_json::from_str::<Value>(body) {
            Ok(Value::Object(obj)) => match (obj.get("errors"), obj.get("detail")) {
                (Some(errors), _) => errors.to_string(),
                (None, Some(Value::String(detail))) => detail.clone(),
                (None, Some(detail)) => detail.to_string(),
                (None, None) => body.to_string(),
            },
            _ => body.to_string(),
        };
        Self { status, detail }
    }
}

/// An authenticated APS client.
pub struct Client {
    http: surf::Client,
    streaming: surf::Client,
    base_url: Url,
    region: String,
    tokens: TokenCache,
}

impl Client {
    /// Create a client for the APS deployment at `base_url`.
    pub fn new(base_url: Url, region: String, credentials: Credentials) -> Result<Self, Error> {
        let http: surf::Client = surf::Config::new()
            .set_timeout(Some(DEFAULT_TIMEOUT))
            .try_into()
            .map_err(Error::msg)?;
        let streaming: surf::Client = surf::Config::new()
            .set_timeout(Some(STREAMING_TIMEOUT))
            .try_into()
            .map_err(Error::msg)?;
        let tokens = TokenCache::new(http.clone(), &base_url, credentials)?;
        Ok(Self {
            http,
            streaming,
            base_url,
            region,
            tokens,
        })
    }

    /// The token cache used to authenticate requests.
    pub fn tokens(&self) -> &TokenCache {
        &self.tokens
    }

    /// Start building a request.
    ///
    /// `path` may be relative to the base URL (`/project/v1/hubs`) or absolute, which is how
    /// pagination links come back from APS.
    pub fn request(&self, method: Method, path: impl AsRef<str>) -> Request<'_> {
        Request {
            client: self,
            method,
            url: self.base_url.join(path.as_ref()).map_err(Error::from),
            headers: vec![],
            body: None,
            retry_on_401: true,
            streaming: false,
        }
    }

    pub fn get(&self, path: impl AsRef<str>) -> Request<'_> {
        self.request(Method::Get, path)
    }

    pub fn post(&self, path: impl AsRef<str>) -> Request<'_> {
        self.request(Method::Post, path)
    }

    pub fn patch(&self, path: impl AsRef<str>) -> Request<'_> {
        self.request(Method::Patch, path)
    }
}

/// A request under construction.
pub struct Request<'a> {
    client: &'a Client,
    method: Method,
    url: Result<Url, Error>,
    headers: Vec<(String, String)>,
    body: Option<Value>,
    retry_on_401: bool,
    streaming: bool,
}

impl<'a> Request<'a> {
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Send `body` as JSON.
    ///
    /// The content type defaults to `application/json`; set a `Content-Type` header to override
    /// it (for example with the JSON:API media type).
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Fail immediately on 401 instead of retrying with a fresh token.
    pub fn no_retry_on_401(mut self) -> Self {
        self.retry_on_401 = false;
        self
    }

    /// Use the long timeout meant for streaming large response bodies.
    pub fn streaming(mut self) -> Self {
        self.streaming = true;
        self
    }

    /// Send the request and return the successful response.
    pub async fn send(self) -> Result<Response, Error> {
        let url = match &self.url {
            Ok(url) => url.clone(),
            Err(err) => return Err(Error::msg(format!("invalid request URL: {err}"))),
        };
        let max_attempts = if self.retry_on_401 { 2 } else { 1 };

        let mut res = None;
        for attempt in 0..max_attempts {
            let token = self.client.tokens.token(attempt > 0).await?;
            let attempt_res = self.attempt(&url, &token).await?;

            match attempt_res.status() {
                StatusCode::TooManyRequests => {
                    let wait = retry_after(&attempt_res);
                    tracing::warn!(method = %self.method, %url, "429, waiting {wait}s");
                    sleep(Duration::from_secs(wait)).await;
                    res = Some(self.attempt(&url, &token).await?);
                    break;
                }
                StatusCode::Unauthorized if attempt == 0 && self.retry_on_401 => {
                    tracing::warn!(method = %self.method, %url, "401, refreshing token");
                    continue;
                }
                _ => {
                    res = Some(attempt_res);
                    break;
                }
            }
        }
        let Some(mut res) = res else {
            return Err(Error::msg(format!("no response from {url}")));
        };

        let status = res.status();
        if status.is_client_error() || status.is_server_error() {
            let body = res.body_string().await.unwrap_or_default();
            let err = ApiError::from_body(status.into(), &body);
            tracing::error!(method = %self.method, %url, "API HTTP error ({}): {}", err.status, err.detail);
            return Err(err.into());
        }
        Ok(res)
    }

    /// Send the request and parse the response body as JSON.
    pub async fn recv_json<T: DeserializeOwned>(self) -> Result<T, Error> {
        let mut res = self.send().await?;
        res.body_json().await.map_err(Error::msg)
    }

    async fn attempt(&self, url: &Url, token: &str) -> Result<Response, Error> {
        let mut builder = RequestBuilder::new(self.method, url.clone())
            .header("Authorization", format!("Bearer {token}"))
            .header("x-ads-region", self.client.region.as_str());
        let mut content_type = None;
        for (name, value) in &self.headers {
            if name.eq_ignore_ascii_case("content-type") {
                content_type = Some(value.as_str());
            } else {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }
        if let Some(body) = &self.body {
            builder = builder.body_json(body).map_err(Error::msg)?;
        }
        if let Some(content_type) = content_type {
            builder = builder.header("Content-Type", content_type);
        }

        let http = if self.streaming {
            &self.client.streaming
        } else {
            &self.client.http
        };
        tracing::debug!(method = %self.method, %url, "APS request");
        http.send(builder.build()).await.map_err(Error::msg)
    }
}

fn retry_after(res: &Response) -> u64 {
    parse_retry_after(res.header("Retry-After").map(|values| values.last().as_str()))
}

fn parse_retry_after(header: Option<&str>) -> u64 {
    header
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::MockAps;

    #[test]
    fn test_error_detail() {
        let err = ApiError::from_body(403, r#"{"errors":[{"detail":"forbidden"}]}"#);
        assert_eq!(err.detail, r#"[{"detail":"forbidden"}]"#);
        assert_eq!(
            err.to_string(),
            r#"Autodesk API Error 403: [{"detail":"forbidden"}]"#
        );

        let err = ApiError::from_body(404, r#"{"detail":"no such item"}"#);
        assert_eq!(err.to_string(), "Autodesk API Error 404: no such item");

        let err = ApiError::from_body(400, r#"{"developerMessage":"bad"}"#);
        assert_eq!(err.detail, r#"{"developerMessage":"bad"}"#);

        let err = ApiError::from_body(500, "Internal Server Error");
        assert_eq!(err.detail, "Internal Server Error");
    }

    #[test]
    fn test_retry_after() {
        assert_eq!(parse_retry_after(None), DEFAULT_RETRY_AFTER);
        assert_eq!(DEFAULT_RETRY_AFTER, 5);
        assert_eq!(parse_retry_after(Some("7")), 7);
        assert_eq!(parse_retry_after(Some(" 0 ")), 0);
        // HTTP dates are allowed by the standard but APS does not send them.
        assert_eq!(
            parse_retry_after(Some("Wed, 21 Oct 2015 07:28:00 GMT")),
            DEFAULT_RETRY_AFTER
        );
    }

    #[async_std::test]
    async fn test_auth_headers() {
        let mock = MockAps::start().await;
        let client = mock.client();
        let echo: Value = client.get("/test/echo").recv_json().await.unwrap();
        assert_eq!(echo["authorization"], "Bearer token-1");
        assert_eq!(echo["region"], "EMEA");
    }

    #[async_std::test]
    async fn test_retry_on_401() {
        let mock = MockAps::start().await;
        let client = mock.client();

        // Warm the cache with a token that the endpoint will reject.
        client.tokens().token(false).await.unwrap();
        let res: Value = client
            .get("/test/reject-first-token")
            .recv_json()
            .await
            .unwrap();
        assert_eq!(res["token"], "token-2");
        assert_eq!(mock.token_requests(), 2);
    }

    #[async_std::test]
    async fn test_no_retry_on_401() {
        let mock = MockAps::start().await;
        let client = mock.client();
        let err = client
            .get("/test/reject-first-token")
            .no_retry_on_401()
            .send()
            .await
            .unwrap_err();
        let err = err.downcast::<ApiError>().unwrap();
        assert_eq!(err.status, 401);
        assert_eq!(mock.token_requests(), 1);
    }

    #[async_std::test]
    async fn test_retry_on_429() {
        let mock = MockAps::start().await;
        let client = mock.client();
        let res: Value = client.get("/test/rate-limited").recv_json().await.unwrap();
        assert_eq!(res["attempts"], 2);
    }

    #[async_std::test]
    async fn test_error_status() {
        let mock = MockAps::start().await;
        let client = mock.client();
        let err = client.get("/test/forbidden").send().await.unwrap_err();
        assert_eq!(
            err.to_string(),
            r#"Autodesk API Error 403: [{"detail":"forbidden"}]"#
        );
    }

    #[async_std::test]
    async fn test_json_body_and_content_type() {
        let mock = MockAps::start().await;
        let client = mock.client();
        let echo: Value = client
            .post("/test/echo")
            .header("Content-Type", "application/vnd.api+json")
            .header("User-Id", "admin-uid")
            .json(serde_json::json!({ "hello": "world" }))
            .recv_json()
            .await
            .unwrap();
        assert_eq!(echo["content_type"], "application/vnd.api+json");
        assert_eq!(echo["user_id"], "admin-uid");
        assert_eq!(echo["body"]["hello"], "world");
    }
}
