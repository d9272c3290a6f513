use chrono::{DateTime, Utc};
use std::collections::HashMap;

use super::entry::{Content, ContentKind, FeedEntry, Link, Person};
use super::FeedError;
use crate::zotero::{fetch_citation, fetch_record, ItemType, RawRecord, ZoteroClient};

/// Namespace authority used in entry tag URIs.
const ENTRY_TAG_AUTHORITY: &str = "zotero.org";

const LINKED_URL: &str = "linked_url";

/// Entries in feed order, plus a key lookup for attaching links later.
#[derive(Debug, Default)]
pub struct EntryIndex {
    entries: Vec<FeedEntry>,
    positions: HashMap<String, usize>,
}

impl EntryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.positions.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&FeedEntry> {
        self.positions.get(key).map(|&pos| &self.entries[pos])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends an entry. Returns false (and drops the entry) if the key is already indexed.
    pub fn register(&mut self, key: impl Into<String>, entry: FeedEntry) -> bool {
        let key = key.into();
        if self.positions.contains_key(&key) {
            return false;
        }
        self.positions.insert(key, self.entries.len());
        self.entries.push(entry);
        true
    }

    /// Adds the attachment's link to its parent and marks the parent as updated at `now`.
    pub fn attach(
        &mut self,
        attachment: &LinkedAttachment,
        now: DateTime<Utc>,
    ) -> Result<(), FeedError> {
        let pos = self.positions.get(&attachment.parent).copied().ok_or_else(|| {
            FeedError::DanglingAttachment {
                key: attachment.key.clone(),
                parent: attachment.parent.clone(),
            }
        })?;

        let entry = &mut self.entries[pos];
        entry
            .links
            .push(Link::alternate(attachment.url.clone(), attachment.title.clone()));
        entry.updated = now;
        Ok(())
    }

    pub fn into_entries(self) -> Vec<FeedEntry> {
        self.entries
    }
}

/// An attachment record of the only supported kind: a link to an external URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedAttachment {
    pub key: String,
    pub parent: String,
    pub url: String,
    pub title: Option<String>,
}

impl LinkedAttachment {
    pub fn from_record(record: &RawRecord) -> Result<Self, FeedError> {
        let fields = &record.fields;
        let link_mode = fields.link_mode.as_deref().unwrap_or_default();
        if link_mode != LINKED_URL {
            return Err(FeedError::UnsupportedAttachment {
                key: record.key.clone(),
                link_mode: link_mode.to_string(),
            });
        }

        let parent = fields
            .parent_item
            .clone()
            .ok_or_else(|| missing(record, "parentItem"))?;
        let url = fields.url.clone().ok_or_else(|| missing(record, "url"))?;

        Ok(Self {
            key: record.key.clone(),
            parent,
            url,
            title: fields.title.clone(),
        })
    }
}

fn missing(record: &RawRecord, field: &'static str) -> FeedError {
    FeedError::MissingField {
        key: record.key.clone(),
        field,
    }
}

/// Fails with [`FeedError::MissingTitle`] when a primary record has no title.
pub fn require_title(record: &RawRecord) -> Result<&str, FeedError> {
    record
        .fields
        .title
        .as_deref()
        .ok_or_else(|| FeedError::MissingTitle {
            key: record.key.clone(),
        })
}

fn parse_timestamp(
    record: &RawRecord,
    field: &'static str,
    value: Option<&str>,
) -> Result<DateTime<Utc>, FeedError> {
    let value = value.ok_or_else(|| missing(record, field))?;
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| FeedError::InvalidTimestamp {
            key: record.key.clone(),
            field,
            value: value.to_string(),
        })
}

/// Builds the entry for a primary (non-note, non-attachment) record.
pub fn build_entry(
    record: &RawRecord,
    account_path: &str,
    citation: String,
) -> Result<FeedEntry, FeedError> {
    let fields = &record.fields;
    let title = require_title(record)?.to_string();

    let date_added = fields.date_added.as_deref();
    let published = parse_timestamp(record, "dateAdded", date_added)?;
    let updated = parse_timestamp(record, "dateModified", fields.date_modified.as_deref())?;

    // Date part exactly as the API wrote it
    let added_day = date_added
        .and_then(|value| value.split('T').next())
        .unwrap_or_default();
    let id = super::entry::tag_uri(
        ENTRY_TAG_AUTHORITY,
        added_day,
        &format!("{}/items/{}", account_path, record.key),
    );

    let authors = fields
        .creators
        .iter()
        .flatten()
        .filter(|creator| creator.is_author())
        .filter_map(|creator| creator.display_name())
        .map(Person::named)
        .collect();

    let html_link = record
        .alternate_href
        .clone()
        .ok_or_else(|| missing(record, "links.alternate.href"))?;

    let mut links = Vec::with_capacity(2);
    if let Some(url) = &fields.url {
        links.push(Link::alternate(
            url.clone(),
            Some("link to resource".to_string()),
        ));
    }
    links.push(Link::alternate(
        html_link,
        Some("link to zotero record (html)".to_string()),
    ));

    Ok(FeedEntry {
        id,
        title,
        authors,
        links,
        summary: fields.abstract_note.clone(),
        content: Some(Content {
            body: citation,
            kind: ContentKind::Xhtml,
        }),
        published,
        updated,
    })
}

/// Counters reported once assembly finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblyStats {
    pub entries: usize,
    pub notes_skipped: usize,
    pub attachments_linked: usize,
    pub duplicates_skipped: usize,
}

/// Turns item keys into feed entries.
///
/// Primary records become entries in the order they are processed. Linked-URL
/// attachments are queued and applied in [`FeedAssembler::finish`], so a
/// parent may appear anywhere in the key list.
pub struct FeedAssembler<'a> {
    client: &'a mut ZoteroClient,
    account_path: String,
    index: EntryIndex,
    pending: Vec<LinkedAttachment>,
    stats: AssemblyStats,
}

impl<'a> FeedAssembler<'a> {
    pub fn new(client: &'a mut ZoteroClient, account_path: impl Into<String>) -> Self {
        Self {
            client,
            account_path: account_path.into(),
            index: EntryIndex::new(),
            pending: Vec::new(),
            stats: AssemblyStats::default(),
        }
    }

    pub fn index(&self) -> &EntryIndex {
        &self.index
    }

    pub async fn process_key(&mut self, key: &str) -> Result<(), FeedError> {
        tracing::info!(key = %key, "Processing item");
        let record = fetch_record(self.client, &self.account_path, key).await?;
        self.process_record(record).await
    }

    pub async fn process_record(&mut self, record: RawRecord) -> Result<(), FeedError> {
        match &record.item_type {
            ItemType::Note => {
                tracing::warn!(key = %record.key, "Ignored note");
                self.stats.notes_skipped += 1;
            }
            ItemType::Attachment => {
                let attachment = LinkedAttachment::from_record(&record)?;
                tracing::debug!(
                    key = %attachment.key,
                    parent = %attachment.parent,
                    "Queued linked attachment"
                );
                self.pending.push(attachment);
            }
            ItemType::Primary(item_type) => {
                if self.index.contains(&record.key) {
                    tracing::warn!(key = %record.key, "Duplicate item key, keeping first entry");
                    self.stats.duplicates_skipped += 1;
                    return Ok(());
                }
                require_title(&record).inspect_err(|_| {
                    tracing::warn!(key = %record.key, item_type = %item_type, "Item has no title");
                })?;

                let citation = fetch_citation(self.client, &self.account_path, &record.key).await?;
                let entry = build_entry(&record, &self.account_path, citation)?;
                self.index.register(record.key.clone(), entry);
            }
        }
        Ok(())
    }

    /// Applies queued attachments and returns the entries in feed order.
    pub fn finish(mut self) -> Result<(Vec<FeedEntry>, AssemblyStats), FeedError> {
        let now = Utc::now();
        for attachment in &self.pending {
            self.index.attach(attachment, now)?;
            self.stats.attachments_linked += 1;
        }
        self.stats.entries = self.index.len();
        Ok((self.index.into_entries(), self.stats))
    }
}
