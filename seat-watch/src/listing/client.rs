//! Left-ticket listing HTTP client.
//!
//! Issues one listing query per call through whichever egress the caller
//! leased. Session headers come from an [`AuthSession`]; acquiring that
//! session is somebody else's job.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::NaiveDate;
use reqwest::header::{self, HeaderMap, HeaderValue};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::domain::StationCode;
use crate::egress::Egress;

use super::error::QueryError;
use super::types::ListingResponse;

/// Default service origin.
const DEFAULT_BASE_URL: &str = "https://kyfw.12306.cn";

/// Query endpoints, tried in order. The service moves between them.
const DEFAULT_QUERY_PATHS: &[&str] = &["/otn/leftTicket/query", "/otn/leftTicket/queryZ"];

/// Default per-call timeout.
const DEFAULT_TIMEOUT_SECS: u64 = 10;

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko)";

/// How much of an unexpected body to keep in errors.
const BODY_SNIPPET_CHARS: usize = 500;

/// One (route, date) listing query.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QueryTarget {
    /// Boarding station.
    pub from: StationCode,
    /// Alighting station.
    pub to: StationCode,
    /// Travel date.
    pub date: NaiveDate,
    /// Passenger type, "ADULT" unless booking student tickets.
    #[serde(default = "default_purpose")]
    pub purpose: String,
}

fn default_purpose() -> String {
    "ADULT".to_string()
}

impl QueryTarget {
    /// Create an adult-ticket query target.
    pub fn new(from: StationCode, to: StationCode, date: NaiveDate) -> Self {
        Self {
            from,
            to,
            date,
            purpose: default_purpose(),
        }
    }

    fn query_params(&self) -> [(&'static str, String); 4] {
        [
            ("leftTicketDTO.train_date", self.date.format("%Y-%m-%d").to_string()),
            ("leftTicketDTO.from_station", self.from.to_string()),
            ("leftTicketDTO.to_station", self.to.to_string()),
            ("purpose_codes", self.purpose.clone()),
        ]
    }
}

impl fmt::Display for QueryTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}→{} on {}", self.from, self.to, self.date)
    }
}

/// Something that can answer listing queries.
///
/// This abstraction lets the poll loop run against recorded responses.
#[allow(async_fn_in_trait)]
pub trait ListingSource {
    /// Run one listing query through the given egress.
    async fn query(
        &self,
        target: &QueryTarget,
        egress: &Egress,
    ) -> Result<ListingResponse, QueryError>;
}

/// Supplies authenticated session headers (cookies, tokens).
pub trait AuthSession: Send + Sync {
    /// Headers to attach to every listing request.
    fn headers(&self) -> HeaderMap;
}

/// A session backed by a fixed cookie string.
#[derive(Debug, Clone, Default)]
pub struct StaticSession {
    cookie: Option<HeaderValue>,
}

impl StaticSession {
    /// Create a session that sends `cookie` verbatim.
    pub fn new(cookie: &str) -> Result<Self, QueryError> {
        let cookie = HeaderValue::from_str(cookie)
            .map_err(|_| QueryError::Setup("invalid cookie header value".to_string()))?;
        Ok(Self {
            cookie: Some(cookie),
        })
    }

    /// A session that sends no credentials.
    pub fn anonymous() -> Self {
        Self::default()
    }
}

impl AuthSession for StaticSession {
    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(cookie) = &self.cookie {
            headers.insert(header::COOKIE, cookie.clone());
        }
        headers
    }
}

/// Configuration for the listing client.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ListingConfig {
    /// Service origin.
    pub base_url: String,
    /// Query endpoint paths, tried in order.
    pub query_paths: Vec<String>,
    /// Per-call timeout in seconds.
    pub timeout_secs: u64,
    /// User-Agent header.
    pub user_agent: String,
}

impl ListingConfig {
    /// Set a custom base URL (for testing).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the per-call timeout.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Per-call timeout as a Duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            query_paths: DEFAULT_QUERY_PATHS.iter().map(|s| s.to_string()).collect(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Listing API client.
///
/// Keeps one reqwest client per egress so that connection pools are not
/// shared between proxies.
pub struct ListingClient {
    config: ListingConfig,
    session: Arc<dyn AuthSession>,
    direct: reqwest::Client,
    proxied: Mutex<HashMap<String, reqwest::Client>>,
}

impl ListingClient {
    /// Create a new listing client.
    pub fn new(config: ListingConfig, session: Arc<dyn AuthSession>) -> Result<Self, QueryError> {
        let direct = build_http(&config, None)?;
        Ok(Self {
            config,
            session,
            direct,
            proxied: Mutex::new(HashMap::new()),
        })
    }

    /// The client configuration.
    pub fn config(&self) -> &ListingConfig {
        &self.config
    }

    fn http_for(&self, egress: &Egress) -> Result<reqwest::Client, QueryError> {
        let Egress::Proxy(url) = egress else {
            return Ok(self.direct.clone());
        };

        let mut proxied = self
            .proxied
            .lock()
            .map_err(|_| QueryError::Setup("proxy client cache poisoned".to_string()))?;
        if let Some(client) = proxied.get(url) {
            return Ok(client.clone());
        }

        let client = build_http(&self.config, Some(url))?;
        proxied.insert(url.clone(), client.clone());
        Ok(client)
    }

    async fn query_path(
        &self,
        http: &reqwest::Client,
        path: &str,
        target: &QueryTarget,
    ) -> Result<ListingResponse, QueryError> {
        let url = format!("{}{}", self.config.base_url, path);

        let response = http
            .get(&url)
            .headers(self.session.headers())
            .query(&target.query_params())
            .send()
            .await?;

        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(QueryError::Status {
                status: status.as_u16(),
                body: body.chars().take(BODY_SNIPPET_CHARS).collect(),
            });
        }

        let body = response.text().await?;

        let listing: ListingResponse =
            serde_json::from_str(&body).map_err(|e| QueryError::Json {
                message: e.to_string(),
                body: Some(body.chars().take(BODY_SNIPPET_CHARS).collect()),
            })?;

        if !listing.status {
            return Err(QueryError::Rejected {
                httpstatus: listing.httpstatus,
                messages: listing.all_messages(),
            });
        }

        Ok(listing)
    }
}

impl ListingSource for ListingClient {
    async fn query(
        &self,
        target: &QueryTarget,
        egress: &Egress,
    ) -> Result<ListingResponse, QueryError> {
        let http = self.http_for(egress)?;
        let mut last_error = None;

        for path in &self.config.query_paths {
            match self.query_path(&http, path, target).await {
                Ok(listing) => {
                    debug!(%target, path = %path, records = listing.records().len(), "listing query ok");
                    return Ok(listing);
                }
                Err(e) => {
                    warn!(%target, path = %path, error = %e, "listing query failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| QueryError::Setup("no query paths configured".into())))
    }
}

/// Build an HTTP client with the service's expected headers.
fn build_http(config: &ListingConfig, proxy: Option<&str>) -> Result<reqwest::Client, QueryError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static("application/json, text/plain, */*"),
    );
    headers.insert(
        header::ACCEPT_LANGUAGE,
        HeaderValue::from_static("zh-CN,zh;q=0.9"),
    );

    let referer = format!("{}/otn/leftTicket/init", config.base_url);
    let referer = HeaderValue::from_str(&referer)
        .map_err(|_| QueryError::Setup("invalid base URL".to_string()))?;
    headers.insert(header::REFERER, referer);
    let origin = HeaderValue::from_str(&config.base_url)
        .map_err(|_| QueryError::Setup("invalid base URL".to_string()))?;
    headers.insert(header::ORIGIN, origin);

    let builder = reqwest::Client::builder()
        .default_headers(headers)
        .user_agent(config.user_agent.clone())
        .timeout(config.timeout());

    let builder = match proxy {
        Some(url) => {
            let proxy = reqwest::Proxy::all(url)
                .map_err(|e| QueryError::Setup(format!("invalid proxy URL: {e}")))?;
            builder.proxy(proxy)
        }
        None => builder.no_proxy(),
    };

    builder.build().map_err(QueryError::from)
}
