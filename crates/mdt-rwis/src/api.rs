//! RWIS REST API client.
//!
//! Three GET endpoints share a base URL and take `siteId` / `apiKey` query
//! parameters. Every call is bounded by [`REQUEST_TIMEOUT`]; nothing is
//! retried here, the next scheduled poll is the retry.

use async_trait::async_trait;
use reqwest::Url;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::json::Field;
use crate::model::{FetchResult, SiteOption};

// ── Constants ───────────────────────────────────────────────────────

/// Production API root.
pub const DEFAULT_BASE_URL: &str = "https://app.mdt.mt.gov/atms/api/conditions/v1";

/// Upper bound for a single API call (site polls share one budget).
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const ACCEPT_JSON: &str = "application/json";

// ── Errors ──────────────────────────────────────────────────────────

/// Errors from RWIS API operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    #[error("API error (status {status}): {body}")]
    Status { status: u16, body: String },

    #[error("HTTP error: {0}")]
    Transport(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid JSON: {0}")]
    Json(String),

    #[error("unexpected response shape: {0}")]
    Shape(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl ApiError {
    /// True only for HTTP 401, which means the API key was rejected.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Status { status: 401, .. })
    }

    /// True for failures reaching the API or getting a non-200 answer.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            ApiError::Status { .. } | ApiError::Transport(_) | ApiError::Timeout(_)
        ) && !self.is_unauthorized()
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;

// ── Transport ───────────────────────────────────────────────────────

/// A completed HTTP exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Seam between the API client and the network.
///
/// Entities and the coordinator depend on this trait instead of a concrete
/// HTTP client, which keeps them testable with in-memory implementations.
#[async_trait]
pub trait HttpTransport: Send + Sync + 'static {
    /// Issue a GET. `accept` sets the `accept` header when given.
    async fn get(&self, url: &str, accept: Option<&str>) -> Result<HttpResponse>;
}

/// Production transport backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str, accept: Option<&str>) -> Result<HttpResponse> {
        let mut request = self.client.get(url);
        if let Some(accept) = accept {
            request = request.header(reqwest::header::ACCEPT, accept);
        }

        let response = request.send().await.map_err(from_reqwest)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(from_reqwest)?;
        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }
}

/// Map a reqwest error, dropping the request URL: it carries the API key.
fn from_reqwest(err: reqwest::Error) -> ApiError {
    let err = err.without_url();
    if err.is_timeout() {
        ApiError::Timeout(REQUEST_TIMEOUT)
    } else {
        ApiError::Transport(err.to_string())
    }
}

// ── Client ──────────────────────────────────────────────────────────

/// RWIS API client bound to one API key.
#[derive(Clone)]
pub struct RwisClient {
    transport: Arc<dyn HttpTransport>,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl fmt::Debug for RwisClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RwisClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"***")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RwisClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            timeout: REQUEST_TIMEOUT,
        }
    }

    /// Override the per-call time budget.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn transport(&self) -> Arc<dyn HttpTransport> {
        self.transport.clone()
    }

    pub fn all_sites_url(&self) -> Result<Url> {
        self.endpoint("current", &[])
    }

    pub fn site_data_url(&self, site_id: &str) -> Result<Url> {
        self.endpoint("current/site", &[("siteId", site_id)])
    }

    pub fn site_images_url(&self, site_id: &str) -> Result<Url> {
        self.endpoint("current/images/site", &[("siteId", site_id)])
    }

    fn endpoint(&self, path: &str, params: &[(&str, &str)]) -> Result<Url> {
        let mut query: Vec<(&str, &str)> = params.to_vec();
        query.push(("apiKey", self.api_key.as_str()));
        Url::parse_with_params(&format!("{}/{}", self.base_url, path), &query)
            .map_err(|e| ApiError::InvalidUrl(format!("{}: {}", self.base_url, e)))
    }

    /// Fetch conditions then camera images for one site.
    ///
    /// Both requests share a single timeout budget. Either failing fails
    /// the whole fetch; no partial result is returned.
    pub async fn fetch_site(&self, site_id: &str) -> Result<FetchResult> {
        let weather_url = self.site_data_url(site_id)?;
        let camera_url = self.site_images_url(site_id)?;

        let fetch = async {
            log::debug!("[Api] fetching weather data from {}", redact(&weather_url));
            let weather = self.get_json(&weather_url, "weather data").await?;

            log::debug!("[Api] fetching camera data from {}", redact(&camera_url));
            let cameras = self.get_json(&camera_url, "camera data").await?;

            Ok::<_, ApiError>(FetchResult::new(weather, cameras))
        };

        tokio::time::timeout(self.timeout, fetch)
            .await
            .map_err(|_| ApiError::Timeout(self.timeout))?
    }

    /// List every site visible to this API key, in API order.
    pub async fn fetch_all_sites(&self) -> Result<Vec<SiteOption>> {
        let url = self.all_sites_url()?;
        log::debug!("[Api] fetching all sites from {}", redact(&url));

        let data = tokio::time::timeout(self.timeout, self.get_json(&url, "site list"))
            .await
            .map_err(|_| ApiError::Timeout(self.timeout))??;

        let features = Field::of(&data).key("features");
        if !features.value().is_some_and(Value::is_array) {
            return Err(ApiError::Shape("site list has no features array".into()));
        }

        let sites = features
            .items()
            .iter()
            .filter_map(|feature| {
                let props = Field::of(feature).key("properties");
                let id = props.key("id").as_id();
                if id.is_none() {
                    log::warn!("[Api] skipping site without id: {}", feature);
                }
                let id = id?;
                let name = props
                    .key("name")
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| id.clone());
                Some(SiteOption { id, name })
            })
            .collect::<Vec<_>>();

        log::debug!("[Api] {} sites received", sites.len());
        Ok(sites)
    }

    /// Download raw image bytes from an absolute URL.
    pub async fn fetch_image(&self, url: &str) -> Result<Vec<u8>> {
        let response = tokio::time::timeout(self.timeout, self.transport.get(url, None))
            .await
            .map_err(|_| ApiError::Timeout(self.timeout))??;

        if response.status != 200 {
            return Err(ApiError::Status {
                status: response.status,
                body: response.text(),
            });
        }
        Ok(response.body)
    }

    async fn get_json(&self, url: &Url, what: &str) -> Result<Value> {
        let response = self.transport.get(url.as_str(), Some(ACCEPT_JSON)).await?;

        if response.status != 200 {
            let body = response.text();
            log::error!("[Api] {} fetch failed: {} - {}", what, response.status, body);
            return Err(ApiError::Status {
                status: response.status,
                body,
            });
        }

        let value: Value =
            serde_json::from_slice(&response.body).map_err(|e| ApiError::Json(e.to_string()))?;
        log::trace!("[Api] {} received: {}", what, value);
        Ok(value)
    }
}

/// Render a URL for logs with the API key masked.
pub fn redact(url: &Url) -> String {
    let mut masked = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == "apiKey" { "***".to_string() } else { v.into_owned() };
            (k.into_owned(), v)
        })
        .collect();
    if pairs.is_empty() {
        return masked.to_string();
    }
    masked.query_pairs_mut().clear().extend_pairs(pairs);
    masked.to_string()
}

// ── Test support ────────────────────────────────────────────────────
