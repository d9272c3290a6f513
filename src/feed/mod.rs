//! Feed construction from Zotero records.
//!
//! - [`entry`] - Feed and entry data types
//! - [`assembler`] - Record classification, entry building and attachment linkage
//! - [`sink`] - The output port and its Atom file implementation
//!
//! The feed is all-or-nothing: any error aborts the run before the sink is
//! finalized, so no partial document is ever written.

pub mod assembler;
pub mod entry;
pub mod sink;

use thiserror::Error;

use crate::zotero::ZoteroError;

pub use assembler::{AssemblyStats, EntryIndex, FeedAssembler, LinkedAttachment};
pub use entry::{Content, ContentKind, FeedEntry, FeedIdentity, FeedMetadata, Link, LinkRel, Person};
pub use sink::{AtomFileSink, FeedSink, SinkError};

/// Errors that abort feed generation.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error(transparent)]
    Zotero(#[from] ZoteroError),

    /// Only attachments that link to a URL are handled.
    #[error("Attachment {key} has unsupported linkMode \"{link_mode}\"")]
    UnsupportedAttachment { key: String, link_mode: String },

    /// An attachment's parent is not among the processed items.
    #[error("Attachment {key} references parent {parent}, which is not in the feed")]
    DanglingAttachment { key: String, parent: String },

    #[error("Item {key} has no title")]
    MissingTitle { key: String },

    #[error("Item {key} is missing required field {field}")]
    MissingField { key: String, field: &'static str },

    #[error("Item {key} has invalid {field} timestamp \"{value}\"")]
    InvalidTimestamp {
        key: String,
        field: &'static str,
        value: String,
    },

    #[error(transparent)]
    Sink(#[from] SinkError),
}
