//! Endpoint health probing.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

/// Checks whether a proxy can reach the service.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Probe through the proxy at `proxy_url`. True when healthy.
    async fn check(&self, proxy_url: &str) -> bool;
}

/// Probes by fetching a page through the proxy and expecting HTTP 200.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    target: String,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(target: impl Into<String>, timeout: Duration) -> Self {
        Self {
            target: target.into(),
            timeout,
        }
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn check(&self, proxy_url: &str) -> bool {
        let client = match reqwest::Proxy::all(proxy_url)
            .and_then(|proxy| {
                reqwest::Client::builder()
                    .proxy(proxy)
                    .timeout(self.timeout)
                    .build()
            }) {
            Ok(client) => client,
            Err(e) => {
                debug!(error = %e, "Could not build probe client");
                return false;
            }
        };

        match client.get(&self.target).send().await {
            Ok(response) => response.status() == reqwest::StatusCode::OK,
            Err(e) => {
                debug!(error = %e, "Health probe failed");
                false
            }
        }
    }
}
