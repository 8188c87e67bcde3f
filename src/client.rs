// HTTP executor for upstream calls: auth injection, proxy support, and a
// retry loop (403 → forced token refresh, 429/5xx → exponential backoff).

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, Response};
use serde_json::Value;
use tracing::{info, warn};

use crate::auth::TokenManager;
use crate::config::{Config, APP_VERSION};

/// Wraps a pooled reqwest client with retry logic and auth injection.
pub struct HttpClient {
    client: reqwest::Client,
    token_manager: Arc<TokenManager>,
    max_retries: u32,
    base_retry_delay: f64,
}

/// Build the shared reqwest client: connection pool, streaming read
/// timeout as the overall bound, optional proxy.
pub fn build_http_client(cfg: &Config) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder()
        .pool_max_idle_per_host(20)
        .pool_idle_timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(30))
        .timeout(Duration::from_secs_f64(
            cfg.streaming_read_timeout.max(1.0),
        ));

    if !cfg.vpn_proxy_url.is_empty() {
        let mut proxy_url = cfg.vpn_proxy_url.clone();
        if !proxy_url.contains("://") {
            proxy_url = format!("http://{}", proxy_url);
        }
        match reqwest::Proxy::all(&proxy_url) {
            Ok(proxy) => {
                info!("Proxy configured: {}", proxy_url);
                builder = builder.proxy(proxy);
            }
            Err(e) => warn!("Invalid proxy URL {}: {}", proxy_url, e),
        }
    }

    builder.build()
}

impl HttpClient {
    pub fn new(cfg: &Config, token_manager: Arc<TokenManager>) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_http_client(cfg)?,
            token_manager,
            max_retries: cfg.max_retries,
            base_retry_delay: cfg.base_retry_delay,
        })
    }

    /// Issue a request with retries. 403 forces a token refresh before the
    /// next attempt; 429 and 5xx back off and retry; everything else (and
    /// success) returns immediately.
    pub async fn request_with_retry(
        &self,
        method: Method,
        url: &str,
        payload: Option<&Value>,
        stream: bool,
    ) -> Result<Response, String> {
        let mut last_err = String::from("no attempts made");

        for attempt in 0..self.max_retries {
            if attempt > 0 {
                let delay = self.base_retry_delay * (1u64 << attempt) as f64;
                warn!(
                    "Retry attempt {}/{} after {:.1}s",
                    attempt + 1,
                    self.max_retries,
                    delay
                );
                tokio::time::sleep(Duration::from_secs_f64(delay)).await;
            }

            let response = match self.do_request(method.clone(), url, payload, stream).await {
                Ok(r) => r,
                Err(e) => {
                    last_err = e;
                    continue;
                }
            };

            let status = response.status().as_u16();

            if status == 403 {
                info!("Received 403, attempting token refresh...");
                if let Err(e) = self.token_manager.force_refresh().await {
                    warn!("Token refresh failed: {}", e);
                }
                last_err = format!("upstream returned 403 on attempt {}", attempt + 1);
                continue;
            }
            if status == 429 {
                warn!("Rate limited (429), waiting before retry...");
                last_err = format!("upstream returned 429 on attempt {}", attempt + 1);
                continue;
            }
            if status >= 500 {
                warn!("Server error ({}), retrying...", status);
                last_err = format!("upstream returned {} on attempt {}", status, attempt + 1);
                continue;
            }

            return Ok(response);
        }

        Err(format!(
            "all {} retry attempts failed: {}",
            self.max_retries, last_err
        ))
    }

    async fn do_request(
        &self,
        method: Method,
        url: &str,
        payload: Option<&Value>,
        stream: bool,
    ) -> Result<Response, String> {
        let token = self
            .token_manager
            .get_access_token()
            .await
            .map_err(|e| format!("failed to get access token: {}", e))?;

        let mut request = self
            .client
            .request(method, url)
            .header("Authorization", format!("Bearer {}", token))
            .header("Content-Type", "application/json")
            .header("User-Agent", format!("KiroGateway/{}", APP_VERSION));

        request = if stream {
            request.header("Accept", "text/event-stream")
        } else {
            request.header("Accept", "application/json, text/event-stream")
        };

        if let Some(arn) = self.token_manager.profile_arn().await {
            request = request.header("X-Amz-Profile-Arn", arn);
        }

        if let Some(body) = payload {
            request = request.json(body);
        }

        request
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))
    }

    /// POST expecting a streaming response body.
    pub async fn post_stream(&self, url: &str, payload: &Value) -> Result<Response, String> {
        self.request_with_retry(Method::POST, url, Some(payload), true)
            .await
    }

    /// Plain GET with retries.
    pub async fn get(&self, url: &str) -> Result<Response, String> {
        self.request_with_retry(Method::GET, url, None, false).await
    }
}
