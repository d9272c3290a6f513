//! End-to-end feed generation: collection lookup, item assembly, sink output.
use chrono::Utc;
use std::path::Path;

use crate::feed::{AssemblyStats, FeedAssembler, FeedError, FeedIdentity, FeedSink};
use crate::zotero::{fetch_collection_meta, fetch_top_keys, CollectionRef, ZoteroClient};

/// What to build and where to put it.
#[derive(Debug, Clone)]
pub struct FeedJob<'a> {
    pub collection: &'a CollectionRef,
    pub maximum: usize,
    pub identity: &'a FeedIdentity,
    pub destination: &'a Path,
}

/// Builds the feed for `job` and hands it to `sink`.
///
/// Requests are issued one at a time through `client`. Nothing reaches the
/// sink unless every key was processed successfully.
pub async fn generate_feed<S: FeedSink>(
    client: &mut ZoteroClient,
    job: &FeedJob<'_>,
    sink: &mut S,
) -> Result<AssemblyStats, FeedError> {
    let alternate_link = fetch_collection_meta(client, job.collection).await?;
    let keys = fetch_top_keys(client, job.collection, job.maximum).await?;

    let mut assembler = FeedAssembler::new(client, job.collection.account_path.clone());
    for key in &keys {
        assembler.process_key(key).await?;
    }
    let (entries, stats) = assembler.finish()?;

    sink.set_metadata(job.identity.metadata(alternate_link, Utc::now()));
    for entry in entries {
        sink.append_entry(entry);
    }
    sink.finalize(job.destination)?;

    tracing::info!(
        entries = stats.entries,
        notes_skipped = stats.notes_skipped,
        attachments_linked = stats.attachments_linked,
        "Feed generated"
    );
    Ok(stats)
}
