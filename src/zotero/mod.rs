//! Zotero web API (v3) access.
//!
//! - [`client`] - Rate-limited GET with operator pacing, server backoff and
//!   a single retry on `429 Too Many Requests`
//! - [`collection`] - Collection metadata and the bounded top-level key list
//! - [`record`] - Individual item records and their formatted citations
//!
//! Every call goes through a single [`ZoteroClient`] borrowed mutably, so
//! requests are issued strictly one after another.

pub mod client;
pub mod collection;
pub mod record;

use serde::Deserialize;
use thiserror::Error;

pub use client::{ApiResponse, ClientError, ClientSettings, ThrottleState, ZoteroClient};
pub use collection::{fetch_collection_meta, fetch_top_keys, CollectionRef};
pub use record::{fetch_citation, fetch_record, Creator, ItemFields, ItemType, RawRecord};

/// Errors raised while talking to the API or decoding what it returned.
#[derive(Debug, Error)]
pub enum ZoteroError {
    #[error(transparent)]
    Client(#[from] ClientError),

    /// The server returned more keys than the requested bound permits.
    #[error("Server returned {returned} keys for a limit of {maximum}")]
    Oversize { returned: usize, maximum: usize },

    #[error("Failed to decode {context}: {source}")]
    Decode {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Response for {context} has no {field}")]
    MissingLink { context: String, field: &'static str },

    /// The bibliography body had fewer lines than the citation position.
    #[error("Citation for item {key} is malformed")]
    MalformedCitation { key: String },
}

/// `links` object shared by collection and item responses.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ApiLinks {
    #[serde(rename = "self")]
    pub self_link: Option<Href>,
    pub alternate: Option<Href>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Href {
    pub href: String,
}
