use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::PlatformError;
use crate::config::TransportConfig;

const USER_AGENT: &str = "pr-reconciler";

/// Upper bound on pages read by [`HttpTransport::get_all`].
const MAX_PAGES: usize = 100;

/// How requests authenticate against the platform API.
#[derive(Clone)]
pub enum Auth {
    /// `Authorization: Bearer <token>` (GitHub).
    Bearer(String),
    /// `PRIVATE-TOKEN: <token>` (GitLab).
    PrivateToken(String),
}

impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Auth::Bearer(_) => write!(f, "Bearer(***)"),
            Auth::PrivateToken(_) => write!(f, "PrivateToken(***)"),
        }
    }
}

/// A response that has been read to completion.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub method: Method,
    pub url: String,
    pub status: StatusCode,
    pub body: String,
    /// URL of the next page of a paginated listing.
    pub next_page: Option<String>,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Turn a non-2xx response into [`PlatformError::Status`].
    pub fn error_for_status(self) -> Result<Self, PlatformError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(self.into_error())
        }
    }

    pub fn into_error(self) -> PlatformError {
        PlatformError::Status {
            method: self.method.to_string(),
            url: self.url,
            status: self.status.as_u16(),
            body: self.body,
        }
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, PlatformError> {
        serde_json::from_str(&self.body).map_err(|source| PlatformError::Decode {
            url: self.url.clone(),
            source,
        })
    }
}

/// HTTP client shared by the platform implementations.
///
/// Requests that fail with 429, a 5xx status, a connect error or a timeout
/// are retried up to `max_attempts` times in total, sleeping
/// `base_delay * 2^(attempt - 1)` between attempts. Every other response is
/// returned to the caller as is.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    auth: Auth,
    max_attempts: u32,
    base_delay: Duration,
}

impl HttpTransport {
    pub fn new(base_url: &str, auth: Auth, config: &TransportConfig) -> Result<Self, PlatformError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn get(&self, path: &str) -> Result<ApiResponse, PlatformError> {
        self.send(Method::GET, path, None).await
    }

    /// GET every page of a listing, following `Link: rel="next"` (GitHub)
    /// or `X-Next-Page` (GitLab).
    ///
    /// Next-page URLs outside the API root are not followed, so credentials
    /// never leave the configured host.
    pub async fn get_all<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, PlatformError> {
        let mut items = Vec::new();
        let mut target = path.to_string();

        for page in 1..=MAX_PAGES {
            let response = self.get(&target).await?.error_for_status()?;
            let batch: Vec<T> = response.json()?;
            items.extend(batch);

            match response.next_page {
                Some(next) if next.starts_with(&self.base_url) => target = next,
                Some(next) => {
                    warn!(url = %next, "not following next page outside the API root");
                    break;
                }
                None => break,
            }
            if page == MAX_PAGES {
                warn!(url = %target, pages = MAX_PAGES, "stopped paginating at page limit");
            }
        }
        Ok(items)
    }

    pub async fn post(&self, path: &str, body: &serde_json::Value) -> Result<ApiResponse, PlatformError> {
        self.send(Method::POST, path, Some(body)).await
    }

    pub async fn put(&self, path: &str, body: &serde_json::Value) -> Result<ApiResponse, PlatformError> {
        self.send(Method::PUT, path, Some(body)).await
    }

    pub async fn patch(&self, path: &str, body: &serde_json::Value) -> Result<ApiResponse, PlatformError> {
        self.send(Method::PATCH, path, Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<ApiResponse, PlatformError> {
        self.send(Method::DELETE, path, None).await
    }

    /// Send a request, retrying transient failures.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<ApiResponse, PlatformError> {
        let url = if path.starts_with(&self.base_url) {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        };
        let mut attempt = 1;

        loop {
            debug!(%method, %url, attempt, "sending request");
            let outcome = self.send_once(method.clone(), &url, body).await;

            let retryable = match &outcome {
                Ok(response) => is_retryable_status(response.status),
                Err(PlatformError::Http(err)) => err.is_connect() || err.is_timeout(),
                Err(_) => false,
            };
            if !retryable || attempt >= self.max_attempts {
                return outcome;
            }

            let delay = self.base_delay * 2u32.saturating_pow(attempt - 1);
            match &outcome {
                Ok(response) => warn!(%method, %url, status = %response.status, attempt, ?delay, "retrying request"),
                Err(err) => warn!(%method, %url, error = %err, attempt, ?delay, "retrying request"),
            }
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn send_once(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<ApiResponse, PlatformError> {
        let mut request = self.client.request(method.clone(), url);
        request = match &self.auth {
            Auth::Bearer(token) => request
                .bearer_auth(token)
                .header("Accept", "application/vnd.github+json"),
            Auth::PrivateToken(token) => request.header("PRIVATE-TOKEN", token),
        };
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let next_page = next_page(response.headers(), url);
        let body = response.text().await?;
        Ok(ApiResponse {
            method,
            url: url.to_string(),
            status,
            body,
            next_page,
        })
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn next_page(headers: &HeaderMap, url: &str) -> Option<String> {
    if let Some(link) = headers.get("link").and_then(|value| value.to_str().ok()) {
        if let Some(next) = next_link(link) {
            return Some(next);
        }
    }
    let page = headers.get("x-next-page")?.to_str().ok()?.trim();
    if page.is_empty() {
        return None;
    }
    with_page(url, page)
}

/// Target of the `rel="next"` entry of an RFC 8288 `Link` header.
fn next_link(link: &str) -> Option<String> {
    link.split(',').find_map(|entry| {
        let (target, params) = entry.split_once(';')?;
        let is_next = params
            .split(';')
            .any(|param| param.trim().replace(' ', "") == r#"rel="next""#);
        let target = target.trim().strip_prefix('<')?.strip_suffix('>')?;
        is_next.then(|| target.to_string())
    })
}

/// `url` with its `page` query parameter set to `page`.
fn with_page(url: &str, page: &str) -> Option<String> {
    let mut parsed = Url::parse(url).ok()?;
    let params: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(key, _)| key != "page")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    parsed
        .query_pairs_mut()
        .clear()
        .extend_pairs(params)
        .append_pair("page", page);
    Some(parsed.to_string())
}
