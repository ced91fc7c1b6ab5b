//! Mock listing source for running without hitting the service.
//!
//! Loads recorded listing responses from JSON files and serves them as if
//! they were live answers.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::domain::StationCode;
use crate::egress::Egress;

use super::client::{ListingSource, QueryTarget};
use super::error::QueryError;
use super::types::ListingResponse;

type RouteKey = (StationCode, StationCode);

/// Mock listing source that serves responses from JSON files.
///
/// Useful for development and for exercising the poll loop without
/// credentials or network access.
#[derive(Clone)]
pub struct MockListingClient {
    /// Pre-loaded responses, keyed by route.
    listings: Arc<RwLock<HashMap<RouteKey, ListingResponse>>>,
}

impl MockListingClient {
    /// Create a mock by loading JSON files from a directory.
    ///
    /// Expects files named `{FROM}-{TO}.json` (e.g. `BJP-SHH.json`).
    pub fn new(data_dir: impl AsRef<Path>) -> Result<Self, QueryError> {
        let listings = load_dir(data_dir.as_ref())?;
        Ok(Self {
            listings: Arc::new(RwLock::new(listings)),
        })
    }

    /// List the routes available in the mock data.
    pub async fn available_routes(&self) -> Vec<RouteKey> {
        let listings = self.listings.read().await;
        listings.keys().copied().collect()
    }

    /// Replace the response for a route.
    pub async fn set(&self, from: StationCode, to: StationCode, response: ListingResponse) {
        self.listings.write().await.insert((from, to), response);
    }

    /// Reload mock data from disk.
    pub async fn reload(&self, data_dir: impl AsRef<Path>) -> Result<(), QueryError> {
        let fresh = load_dir(data_dir.as_ref())?;
        *self.listings.write().await = fresh;
        Ok(())
    }
}

impl ListingSource for MockListingClient {
    /// Egress is ignored; mock data is static.
    async fn query(
        &self,
        target: &QueryTarget,
        _egress: &Egress,
    ) -> Result<ListingResponse, QueryError> {
        let listings = self.listings.read().await;

        let listing = listings
            .get(&(target.from, target.to))
            .ok_or_else(|| QueryError::Status {
                status: 404,
                body: format!("no mock listing for {}-{}", target.from, target.to),
            })?;

        if !listing.status {
            return Err(QueryError::Rejected {
                httpstatus: listing.httpstatus,
                messages: listing.all_messages(),
            });
        }

        Ok(listing.clone())
    }
}

fn load_dir(data_dir: &Path) -> Result<HashMap<RouteKey, ListingResponse>, QueryError> {
    let mut listings = HashMap::new();

    let entries = std::fs::read_dir(data_dir).map_err(|e| {
        QueryError::Setup(format!("failed to read mock data directory: {e}"))
    })?;

    for entry in entries {
        let entry = entry
            .map_err(|e| QueryError::Setup(format!("failed to read directory entry: {e}")))?;

        let path = entry.path();
        if !path.is_file() || path.extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }

        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| QueryError::Setup(format!("invalid filename: {path:?}")))?;

        let route = parse_route(stem)
            .ok_or_else(|| QueryError::Setup(format!("invalid route in filename: {stem}")))?;

        let json = std::fs::read_to_string(&path)
            .map_err(|e| QueryError::Setup(format!("failed to read {path:?}: {e}")))?;

        let listing: ListingResponse = serde_json::from_str(&json).map_err(|e| QueryError::Json {
            message: format!("{path:?}: {e}"),
            body: None,
        })?;

        listings.insert(route, listing);
    }

    if listings.is_empty() {
        return Err(QueryError::Setup(format!(
            "no mock listing files found in {data_dir:?}"
        )));
    }

    Ok(listings)
}

/// Parse `BJP-SHH` into a route key.
fn parse_route(stem: &str) -> Option<RouteKey> {
    let (from, to) = stem.split_once('-')?;
    Some((StationCode::parse(from).ok()?, StationCode::parse(to).ok()?))
}
