//! # zotfeed
//!
//! Builds an Atom feed from the top-level items of one Zotero collection.
//!
//! ```text
//! ZoteroClient → collection keys → item records → FeedAssembler → FeedSink
//! ```
//!
//! - [`zotero`]: rate-limited API client, collection and item retrieval
//! - [`feed`]: entry building, attachment linkage, Atom output
//! - [`app`]: the end-to-end pipeline
//! - [`config`]: file + command-line configuration

pub mod app;
pub mod config;
pub mod feed;
pub mod util;
pub mod zotero;
