use reqwest::header::HeaderMap;
use serde::Deserialize;

use super::{ApiLinks, ZoteroClient, ZoteroError};

/// A collection inside a user or group library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionRef {
    /// `users/<id>` or `groups/<id>`
    pub account_path: String,
    /// Collection key, e.g. `A1B2C3D4`
    pub collection_id: String,
}

impl CollectionRef {
    pub fn new(account_path: impl Into<String>, collection_id: impl Into<String>) -> Self {
        Self {
            account_path: account_path.into(),
            collection_id: collection_id.into(),
        }
    }

    fn describe(&self) -> String {
        format!("{}/collections/{}", self.account_path, self.collection_id)
    }
}

#[derive(Debug, Deserialize)]
struct CollectionResponse {
    #[serde(default)]
    links: ApiLinks,
}

/// Fetches collection metadata and returns its human-facing HTML link.
pub async fn fetch_collection_meta(
    client: &mut ZoteroClient,
    collection: &CollectionRef,
) -> Result<String, ZoteroError> {
    let mut url = client.endpoint(&[
        collection.account_path.as_str(),
        "collections",
        collection.collection_id.as_str(),
    ])?;
    url.query_pairs_mut().append_pair("format", "json");

    let response = client.get(&url, &HeaderMap::new()).await?;
    let decoded: CollectionResponse =
        serde_json::from_slice(&response.content).map_err(|source| ZoteroError::Decode {
            context: collection.describe(),
            source,
        })?;

    decoded
        .links
        .alternate
        .map(|link| link.href)
        .ok_or_else(|| ZoteroError::MissingLink {
            context: collection.describe(),
            field: "links.alternate.href",
        })
}

/// Fetches up to `maximum` top-level item keys, most recently modified first.
///
/// # Errors
///
/// [`ZoteroError::Oversize`] when the server returns more than `maximum + 1`
/// keys; the feed is aborted rather than silently truncated.
pub async fn fetch_top_keys(
    client: &mut ZoteroClient,
    collection: &CollectionRef,
    maximum: usize,
) -> Result<Vec<String>, ZoteroError> {
    let mut url = client.endpoint(&[
        collection.account_path.as_str(),
        "collections",
        collection.collection_id.as_str(),
        "items",
        "top",
    ])?;
    url.query_pairs_mut()
        .append_pair("format", "keys")
        .append_pair("sort", "dateModified")
        .append_pair("direction", "desc")
        .append_pair("limit", &maximum.to_string());

    tracing::debug!(url = %url, "Fetching collection key list");
    let response = client.get(&url, &HeaderMap::new()).await?;

    if response.total_results == Some(0) {
        tracing::warn!(collection = %collection.describe(), "Collection has no top-level items");
    }

    let keys = parse_key_list(&response.text());
    tracing::info!(
        collection = %collection.describe(),
        keys = keys.len(),
        total = ?response.total_results,
        "Resolved collection keys"
    );
    bound_keys(keys, maximum)
}

/// Splits a newline-delimited key list, dropping blank lines.
pub fn parse_key_list(body: &str) -> Vec<String> {
    body.split('\n')
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .collect()
}

/// Enforces the requested bound. One extra key is tolerated (and dropped) to
/// absorb off-by-one counts from the server.
pub fn bound_keys(mut keys: Vec<String>, maximum: usize) -> Result<Vec<String>, ZoteroError> {
    let returned = keys.len();
    if returned > maximum.saturating_add(1) {
        tracing::error!(returned, maximum, "Server returned too many keys");
        return Err(ZoteroError::Oversize { returned, maximum });
    }
    if returned > maximum {
        tracing::warn!(returned, maximum, "Dropping surplus key beyond requested limit");
        keys.truncate(maximum);
    }
    Ok(keys)
}
