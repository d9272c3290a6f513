use reqwest::header::HeaderMap;
use serde::{Deserialize, Deserializer};

use super::{ApiLinks, ZoteroClient, ZoteroError};

/// Position of the citation text in a `format=bib` response.
///
/// The bibliography renderer returns an XML declaration, the opening
/// `csl-bib-body` div, then the entry itself on the third line.
const CITATION_LINE: usize = 2;

/// How a record participates in the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemType {
    Note,
    Attachment,
    /// Any bibliographic item type (`journalArticle`, `book`, ...)
    Primary(String),
}

impl ItemType {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "note" => ItemType::Note,
            "attachment" => ItemType::Attachment,
            other => ItemType::Primary(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ItemType::Note => "note",
            ItemType::Attachment => "attachment",
            ItemType::Primary(name) => name,
        }
    }
}

/// A creator entry from an item's `creators` array.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Creator {
    #[serde(default)]
    pub creator_type: String,
    #[serde(default, deserialize_with = "non_empty")]
    pub first_name: Option<String>,
    #[serde(default, deserialize_with = "non_empty")]
    pub last_name: Option<String>,
    /// Single-field name, used for institutions
    #[serde(default, deserialize_with = "non_empty")]
    pub name: Option<String>,
}

impl Creator {
    pub fn is_author(&self) -> bool {
        self.creator_type == "author"
    }

    /// `name` when given, otherwise first and last name joined by a space.
    pub fn display_name(&self) -> Option<String> {
        if let Some(name) = &self.name {
            return Some(name.trim().to_string());
        }
        let parts: Vec<&str> = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }
}

/// The `data` object of an item. Fields the pipeline reads are typed;
/// empty strings (the API's way of saying "unset") decode as `None`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemFields {
    pub item_type: String,
    #[serde(default, deserialize_with = "non_empty")]
    pub title: Option<String>,
    #[serde(default)]
    pub creators: Option<Vec<Creator>>,
    #[serde(default, deserialize_with = "non_empty")]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "non_empty")]
    pub abstract_note: Option<String>,
    #[serde(default, deserialize_with = "non_empty")]
    pub date_added: Option<String>,
    #[serde(default, deserialize_with = "non_empty")]
    pub date_modified: Option<String>,
    #[serde(default, deserialize_with = "non_empty")]
    pub link_mode: Option<String>,
    #[serde(default, deserialize_with = "non_empty")]
    pub parent_item: Option<String>,
    /// Everything else the API sent
    #[serde(flatten)]
    pub other: serde_json::Map<String, serde_json::Value>,
}

/// A decoded item response.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub key: String,
    pub item_type: ItemType,
    pub fields: ItemFields,
    pub self_href: Option<String>,
    pub alternate_href: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ItemResponse {
    #[serde(default)]
    links: ApiLinks,
    data: ItemFields,
}

fn non_empty<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

/// Decodes an item response body.
pub fn parse_record(key: &str, body: &[u8]) -> Result<RawRecord, ZoteroError> {
    let response: ItemResponse =
        serde_json::from_slice(body).map_err(|source| ZoteroError::Decode {
            context: format!("item {}", key),
            source,
        })?;

    Ok(RawRecord {
        key: key.to_string(),
        item_type: ItemType::parse(&response.data.item_type),
        fields: response.data,
        self_href: response.links.self_link.map(|link| link.href),
        alternate_href: response.links.alternate.map(|link| link.href),
    })
}

pub async fn fetch_record(
    client: &mut ZoteroClient,
    account_path: &str,
    key: &str,
) -> Result<RawRecord, ZoteroError> {
    let url = client.endpoint(&[account_path, "items", key])?;
    let response = client.get(&url, &HeaderMap::new()).await?;
    let record = parse_record(key, &response.content)?;
    tracing::info!(key = %key, item_type = %record.item_type.as_str(), "Fetched item");
    Ok(record)
}

/// Fetches the formatted bibliography entry for an item.
pub async fn fetch_citation(
    client: &mut ZoteroClient,
    account_path: &str,
    key: &str,
) -> Result<String, ZoteroError> {
    let mut url = client.endpoint(&[account_path, "items", key])?;
    url.query_pairs_mut().append_pair("format", "bib");

    let response = client.get(&url, &HeaderMap::new()).await?;
    let citation = extract_citation(key, &response.text())?;
    tracing::debug!(key = %key, citation = %citation, "Fetched citation");
    Ok(citation)
}

/// Pulls the citation out of a `format=bib` body by line position.
pub fn extract_citation(key: &str, body: &str) -> Result<String, ZoteroError> {
    body.split('\n')
        .nth(CITATION_LINE)
        .map(|line| line.trim().to_string())
        .ok_or_else(|| ZoteroError::MalformedCitation {
            key: key.to_string(),
        })
}
