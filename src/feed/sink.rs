use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::entry::{ContentKind, FeedEntry, FeedMetadata, Link, LinkRel, Person};
use crate::util::atomic_write;

const ATOM_NS: &str = "http://www.w3.org/2005/Atom";
const XHTML_NS: &str = "http://www.w3.org/1999/xhtml";

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Feed metadata was never set")]
    MissingMetadata,

    #[error("Feed was already written")]
    AlreadyFinalized,

    #[error("Failed to render feed XML: {0}")]
    Xml(String),

    #[error("Failed to write feed to '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Output port for a finished feed.
///
/// Callers set the metadata, append entries in feed order, then finalize once.
pub trait FeedSink {
    fn set_metadata(&mut self, metadata: FeedMetadata);
    fn append_entry(&mut self, entry: FeedEntry);
    fn finalize(&mut self, destination: &Path) -> Result<(), SinkError>;
}

/// Renders an Atom 1.0 document and writes it atomically.
#[derive(Debug, Default)]
pub struct AtomFileSink {
    metadata: Option<FeedMetadata>,
    entries: Vec<FeedEntry>,
    finalized: bool,
}

impl AtomFileSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[FeedEntry] {
        &self.entries
    }

    /// Renders the accumulated feed without writing it anywhere.
    pub fn render(&self) -> Result<String, SinkError> {
        let metadata = self.metadata.as_ref().ok_or(SinkError::MissingMetadata)?;
        render_atom(metadata, &self.entries)
    }
}

impl FeedSink for AtomFileSink {
    fn set_metadata(&mut self, metadata: FeedMetadata) {
        self.metadata = Some(metadata);
    }

    fn append_entry(&mut self, entry: FeedEntry) {
        self.entries.push(entry);
    }

    fn finalize(&mut self, destination: &Path) -> Result<(), SinkError> {
        if self.finalized {
            return Err(SinkError::AlreadyFinalized);
        }
        let document = self.render()?;
        atomic_write(destination, document.as_bytes()).map_err(|source| SinkError::Io {
            path: destination.to_path_buf(),
            source,
        })?;
        self.finalized = true;
        tracing::info!(
            path = %destination.display(),
            entries = self.entries.len(),
            "Wrote Atom feed"
        );
        Ok(())
    }
}

type XmlWriter = Writer<Cursor<Vec<u8>>>;

fn xml_err(err: impl std::fmt::Display) -> SinkError {
    SinkError::Xml(err.to_string())
}

fn write_event<'a>(writer: &mut XmlWriter, event: Event<'a>) -> Result<(), SinkError> {
    writer.write_event(event).map_err(xml_err)
}

fn write_text_element(writer: &mut XmlWriter, name: &str, text: &str) -> Result<(), SinkError> {
    write_event(writer, Event::Start(BytesStart::new(name)))?;
    write_event(writer, Event::Text(BytesText::new(text)))?;
    write_event(writer, Event::End(BytesEnd::new(name)))
}

fn write_timestamp(
    writer: &mut XmlWriter,
    name: &str,
    value: &DateTime<Utc>,
) -> Result<(), SinkError> {
    write_text_element(writer, name, &value.to_rfc3339_opts(SecondsFormat::Secs, true))
}

fn write_person(writer: &mut XmlWriter, person: &Person) -> Result<(), SinkError> {
    write_event(writer, Event::Start(BytesStart::new("author")))?;
    write_text_element(writer, "name", &person.name)?;
    if let Some(email) = &person.email {
        write_text_element(writer, "email", email)?;
    }
    write_event(writer, Event::End(BytesEnd::new("author")))
}

fn write_link(writer: &mut XmlWriter, link: &Link) -> Result<(), SinkError> {
    let mut element = BytesStart::new("link");
    element.push_attribute(("href", link.href.as_str()));
    element.push_attribute(("rel", link.rel.as_str()));
    if let Some(title) = &link.title {
        element.push_attribute(("title", title.as_str()));
    }
    write_event(writer, Event::Empty(element))
}

fn write_content(writer: &mut XmlWriter, body: &str, kind: ContentKind) -> Result<(), SinkError> {
    // Citation markup comes from the server; only embed it as XHTML if it parses.
    let kind = match kind {
        ContentKind::Xhtml if !is_well_formed(body) => {
            tracing::warn!("Content is not well-formed XHTML, writing as escaped HTML");
            ContentKind::Html
        }
        other => other,
    };

    match kind {
        ContentKind::Xhtml => {
            let mut content = BytesStart::new("content");
            content.push_attribute(("type", "xhtml"));
            write_event(writer, Event::Start(content))?;
            let mut div = BytesStart::new("div");
            div.push_attribute(("xmlns", XHTML_NS));
            write_event(writer, Event::Start(div))?;
            write_event(writer, Event::Text(BytesText::from_escaped(body)))?;
            write_event(writer, Event::End(BytesEnd::new("div")))?;
            write_event(writer, Event::End(BytesEnd::new("content")))
        }
        ContentKind::Html => {
            let mut content = BytesStart::new("content");
            content.push_attribute(("type", "html"));
            write_event(writer, Event::Start(content))?;
            write_event(writer, Event::Text(BytesText::new(body)))?;
            write_event(writer, Event::End(BytesEnd::new("content")))
        }
    }
}

/// True if `markup` is a balanced XML fragment whose text and attribute values
/// only use the predefined entities or character references.
fn is_well_formed(markup: &str) -> bool {
    let mut reader = Reader::from_str(markup);
    let mut depth: usize = 0;
    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                if !attributes_escaped(&start) {
                    return false;
                }
                depth += 1;
            }
            Ok(Event::Empty(empty)) => {
                if !attributes_escaped(&empty) {
                    return false;
                }
            }
            Ok(Event::Text(text)) => {
                if text.unescape().is_err() {
                    return false;
                }
            }
            Ok(Event::End(_)) => match depth.checked_sub(1) {
                Some(d) => depth = d,
                None => return false,
            },
            Ok(Event::Eof) => return depth == 0,
            Ok(Event::Decl(_)) | Ok(Event::DocType(_)) => return false,
            Ok(_) => {}
            Err(_) => return false,
        }
    }
}

fn attributes_escaped(element: &BytesStart<'_>) -> bool {
    element
        .attributes()
        .all(|attr| attr.is_ok_and(|attr| attr.unescape_value().is_ok()))
}

fn write_entry(writer: &mut XmlWriter, entry: &FeedEntry) -> Result<(), SinkError> {
    write_event(writer, Event::Start(BytesStart::new("entry")))?;
    write_text_element(writer, "id", &entry.id)?;
    write_text_element(writer, "title", &entry.title)?;
    write_timestamp(writer, "updated", &entry.updated)?;
    for author in &entry.authors {
        write_person(writer, author)?;
    }
    for link in &entry.links {
        write_link(writer, link)?;
    }
    if let Some(summary) = &entry.summary {
        write_text_element(writer, "summary", summary)?;
    }
    if let Some(content) = &entry.content {
        write_content(writer, &content.body, content.kind)?;
    }
    write_timestamp(writer, "published", &entry.published)?;
    write_event(writer, Event::End(BytesEnd::new("entry")))
}

/// Serializes a complete Atom 1.0 document.
pub fn render_atom(metadata: &FeedMetadata, entries: &[FeedEntry]) -> Result<String, SinkError> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    write_event(
        &mut writer,
        Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)),
    )?;

    let mut feed = BytesStart::new("feed");
    feed.push_attribute(("xmlns", ATOM_NS));
    feed.push_attribute(("xml:lang", metadata.language.as_str()));
    write_event(&mut writer, Event::Start(feed))?;

    write_text_element(&mut writer, "id", &metadata.id)?;
    write_text_element(&mut writer, "title", &metadata.title)?;
    write_timestamp(&mut writer, "updated", &metadata.updated)?;
    write_person(&mut writer, &metadata.author)?;
    write_link(
        &mut writer,
        &Link {
            href: metadata.self_link.clone(),
            rel: LinkRel::SelfLink,
            title: None,
        },
    )?;
    write_link(
        &mut writer,
        &Link::alternate(metadata.alternate_link.clone(), None),
    )?;
    if let Some(logo) = &metadata.logo {
        write_text_element(&mut writer, "logo", logo)?;
    }
    let mut generator = BytesStart::new("generator");
    generator.push_attribute(("version", env!("CARGO_PKG_VERSION")));
    write_event(&mut writer, Event::Start(generator))?;
    write_event(&mut writer, Event::Text(BytesText::new("zotfeed")))?;
    write_event(&mut writer, Event::End(BytesEnd::new("generator")))?;

    for entry in entries {
        write_entry(&mut writer, entry)?;
    }

    write_event(&mut writer, Event::End(BytesEnd::new("feed")))?;

    let bytes = writer.into_inner().into_inner();
    String::from_utf8(bytes).map_err(xml_err)
}
