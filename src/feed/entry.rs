use chrono::{DateTime, Utc};

/// Feed or entry author.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Person {
    pub name: String,
    pub email: Option<String>,
}

impl Person {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRel {
    Alternate,
    SelfLink,
}

impl LinkRel {
    pub fn as_str(self) -> &'static str {
        match self {
            LinkRel::Alternate => "alternate",
            LinkRel::SelfLink => "self",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub href: String,
    pub rel: LinkRel,
    pub title: Option<String>,
}

impl Link {
    pub fn alternate(href: impl Into<String>, title: Option<String>) -> Self {
        Self {
            href: href.into(),
            rel: LinkRel::Alternate,
            title,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    /// Markup embedded inside an XHTML `div`
    Xhtml,
    /// Escaped HTML
    Html,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Content {
    pub body: String,
    pub kind: ContentKind,
}

/// One entry of the generated feed.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEntry {
    pub id: String,
    pub title: String,
    pub authors: Vec<Person>,
    pub links: Vec<Link>,
    pub summary: Option<String>,
    pub content: Option<Content>,
    pub published: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl FeedEntry {
    pub fn alternate_links(&self) -> impl Iterator<Item = &Link> {
        self.links
            .iter()
            .filter(|link| link.rel == LinkRel::Alternate)
    }
}

/// Feed-level header handed to the sink before any entry.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedMetadata {
    pub id: String,
    pub title: String,
    pub author: Person,
    pub self_link: String,
    pub alternate_link: String,
    pub language: String,
    pub logo: Option<String>,
    pub updated: DateTime<Utc>,
}

/// Operator-supplied description of the feed being produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedIdentity {
    pub tag_domain: String,
    pub tag_date: String,
    pub tag_slug: String,
    pub title: String,
    pub author: Person,
    pub self_link: String,
    pub language: String,
    pub logo: Option<String>,
}

impl FeedIdentity {
    pub fn feed_id(&self) -> String {
        tag_uri(&self.tag_domain, &self.tag_date, &self.tag_slug)
    }

    pub fn metadata(&self, alternate_link: String, updated: DateTime<Utc>) -> FeedMetadata {
        FeedMetadata {
            id: self.feed_id(),
            title: self.title.clone(),
            author: self.author.clone(),
            self_link: self.self_link.clone(),
            alternate_link,
            language: self.language.clone(),
            logo: self.logo.clone(),
            updated,
        }
    }
}

/// RFC 4151 tag URI: `tag:{authority},{date}:{specific}`.
pub fn tag_uri(authority: &str, date: &str, specific: &str) -> String {
    format!("tag:{},{}:{}", authority, date, specific)
}
