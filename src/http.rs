//! HTTP client with retry logic, timeouts, and cookie support
//!
//! One `HttpClient` is one router session: it owns the cookie jar the router
//! ties the login to, so dropping it is the same as forgetting the session.

use crate::config::HttpConfig;
use crate::error::RouterError;
use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, RequestBuilder, Response, Url};
use std::sync::Arc;
use std::time::Duration;

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Routers reject clients that do not carry this cookie
const MARKER_COOKIE: &str = "_TESTCOOKIESUPPORT=1";

pub struct HttpClient {
    inner: Client,
    max_retries: u32,
}

impl HttpClient {
    pub fn new(base_url: &str, config: &HttpConfig, verify_ssl: bool) -> Result<Self, RouterError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/javascript, */*; q=0.01"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        headers.insert("DNT", HeaderValue::from_static("1"));

        let url = Url::parse(base_url)
            .map_err(|e| RouterError::Protocol(format!("invalid router URL {}: {}", base_url, e)))?;
        let jar = Arc::new(Jar::default());
        jar.add_cookie_str(MARKER_COOKIE, &url);

        let client = Client::builder()
            .cookie_provider(jar)
            .timeout(Duration::from_secs(config.timeout))
            .connect_timeout(Duration::from_secs(config.connect_timeout))
            .danger_accept_invalid_certs(!verify_ssl)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            inner: client,
            max_retries: config.max_retries.max(1),
        })
    }

    pub async fn get(&self, url: &str) -> Result<Response, RouterError> {
        self.with_retry(self.max_retries, || self.inner.get(url)).await
    }

    pub async fn get_with_timeout(&self, url: &str, timeout: Duration) -> Result<Response, RouterError> {
        self.with_retry(self.max_retries, || self.inner.get(url).timeout(timeout))
            .await
    }

    // POSTs change router state (credential submit, restart, logoff) and go
    // out exactly once.

    pub async fn post_form<T: serde::Serialize + ?Sized>(
        &self,
        url: &str,
        form: &T,
    ) -> Result<Response, RouterError> {
        self.with_retry(1, || self.inner.post(url).form(form)).await
    }

    /// POST a pre-encoded form body verbatim, so a signature over it stays valid
    pub async fn post_raw_form_with_headers(
        &self,
        url: &str,
        body: &str,
        headers: HeaderMap,
        timeout: Duration,
    ) -> Result<Response, RouterError> {
        self.with_retry(1, || {
            self.inner
                .post(url)
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .headers(headers.clone())
                .timeout(timeout)
                .body(body.to_string())
        })
        .await
    }

    /// Send up to `attempts` times with exponential backoff
    async fn with_retry<F>(&self, attempts: u32, build_request: F) -> Result<Response, RouterError>
    where
        F: Fn() -> RequestBuilder,
    {
        let attempts = attempts.max(1);
        let mut last_err = None;

        for attempt in 0..attempts {
            let is_last = attempt + 1 >= attempts;
            match build_request().send().await {
                Ok(resp) if resp.status().is_success() => {
                    tracing::debug!("{} -> {}", resp.url().path(), resp.status());
                    return Ok(resp);
                }
                Ok(resp) if resp.status().is_server_error() && !is_last => {
                    let delay = Duration::from_secs(1 << attempt);
                    tracing::warn!(
                        "Server error {}, retrying in {:?}... (attempt {}/{})",
                        resp.status(),
                        delay,
                        attempt + 1,
                        attempts
                    );
                    tokio::time::sleep(delay).await;
                }
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    return Err(RouterError::HttpStatus {
                        status,
                        body: text.chars().take(50).collect(),
                    });
                }
                Err(e) if !is_last => {
                    let delay = Duration::from_secs(1 << attempt);
                    tracing::warn!(
                        "Request error: {}, retrying in {:?}... (attempt {}/{})",
                        e,
                        delay,
                        attempt + 1,
                        attempts
                    );
                    last_err = Some(e);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(last_err
            .map(Into::into)
            .unwrap_or_else(|| RouterError::Protocol("max retries exceeded".to_string())))
    }
}
