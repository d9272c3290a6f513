//! Configuration for a feed run.
//!
//! Values come from an optional config file (TOML, or JSON when the file ends
//! in `.json`) and are then overlaid with command-line options. Every key is
//! optional at load time; [`Config::settings`] checks that the required ones
//! ended up set and produces typed [`Settings`].
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::feed::{FeedIdentity, Person};
use crate::zotero::client::{DEFAULT_API_BASE, DEFAULT_USER_AGENT};
use crate::zotero::{ClientSettings, CollectionRef};

pub const DEFAULT_MAXIMUM: usize = 25;
pub const DEFAULT_LANGUAGE: &str = "en";
pub const DEFAULT_LOGO: &str = "https://www.zotero.org/support/_media/logo/zotero_256x256x32.png";

/// Environment variable holding the API key; wins over the config file.
pub const API_KEY_ENV: &str = "ZOTERO_API_KEY";

const KNOWN_KEYS: &[&str] = &[
    "zotero_account",
    "zotero_collection",
    "maximum",
    "tag_domain",
    "tag_date",
    "tag_slug",
    "title",
    "author_name",
    "author_email",
    "self",
    "out_path",
    "pause",
    "api_base",
    "user_agent",
    "language",
    "logo",
    "api_key",
];

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid JSON in config file: {0}")]
    Json(#[from] serde_json::Error),

    /// SEC-014: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Raw, mergeable configuration.
///
/// SEC-015: Custom Debug impl masks `api_key`.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// `users/<id>` or `groups/<id>`
    pub zotero_account: Option<String>,
    pub zotero_collection: Option<String>,
    /// Maximum number of items in the feed
    pub maximum: Option<usize>,
    /// Authority part of the feed's tag URI, e.g. `example.org`
    pub tag_domain: Option<String>,
    /// Date part of the feed's tag URI, e.g. `2010-03-07`
    pub tag_date: Option<String>,
    /// Specific part of the feed's tag URI
    pub tag_slug: Option<String>,
    pub title: Option<String>,
    pub author_name: Option<String>,
    pub author_email: Option<String>,
    /// URI the feed will be published at
    #[serde(rename = "self")]
    pub self_link: Option<String>,
    pub out_path: Option<PathBuf>,
    /// Seconds to pause before every API request
    pub pause: Option<f64>,
    pub api_base: Option<String>,
    pub user_agent: Option<String>,
    pub language: Option<String>,
    pub logo: Option<String>,
    pub api_key: Option<String>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("zotero_account", &self.zotero_account)
            .field("zotero_collection", &self.zotero_collection)
            .field("maximum", &self.maximum)
            .field("tag_domain", &self.tag_domain)
            .field("tag_date", &self.tag_date)
            .field("tag_slug", &self.tag_slug)
            .field("title", &self.title)
            .field("author_name", &self.author_name)
            .field("author_email", &self.author_email)
            .field("self_link", &self.self_link)
            .field("out_path", &self.out_path)
            .field("pause", &self.pause)
            .field("api_base", &self.api_base)
            .field("user_agent", &self.user_agent)
            .field("language", &self.language)
            .field("logo", &self.logo)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Validated settings for one run.
#[derive(Debug)]
pub struct Settings {
    pub collection: CollectionRef,
    pub maximum: usize,
    pub identity: FeedIdentity,
    pub out_path: PathBuf,
    pub client: ClientSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Toml,
    Json,
}

impl Format {
    fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Format::Json,
            _ => Format::Toml,
        }
    }
}

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a file the user asked for.
    ///
    /// - Missing file → `Err(ConfigError::Io)`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML/JSON → `Err(ConfigError::Toml)` / `Err(ConfigError::Json)`
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let meta = std::fs::metadata(path)?;
        if meta.len() > Self::MAX_FILE_SIZE {
            return Err(ConfigError::TooLarge(format!(
                "Config file is {} bytes (max {} bytes)",
                meta.len(),
                Self::MAX_FILE_SIZE
            )));
        }

        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        let format = Format::from_path(path);
        let config = Self::parse(&content, format)?;
        tracing::info!(path = %path.display(), format = ?format, "Loaded configuration");
        Ok(config)
    }

    fn parse(content: &str, format: Format) -> Result<Self, ConfigError> {
        match format {
            Format::Toml => {
                if let Ok(raw) = content.parse::<toml::Table>() {
                    warn_unknown_keys(raw.keys());
                }
                Ok(toml::from_str(content)?)
            }
            Format::Json => {
                if let Ok(raw) =
                    serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(content)
                {
                    warn_unknown_keys(raw.keys());
                }
                Ok(serde_json::from_str(content)?)
            }
        }
    }

    /// Replaces each field with `overrides`' value where that one is set.
    pub fn overlay(&mut self, overrides: Config) {
        macro_rules! take {
            ($($field:ident),* $(,)?) => {
                $(
                    if overrides.$field.is_some() {
                        self.$field = overrides.$field;
                    }
                )*
            };
        }
        take!(
            zotero_account,
            zotero_collection,
            maximum,
            tag_domain,
            tag_date,
            tag_slug,
            title,
            author_name,
            author_email,
            self_link,
            out_path,
            pause,
            api_base,
            user_agent,
            language,
            logo,
            api_key,
        );
    }

    /// Validates the merged configuration.
    pub fn settings(&self) -> Result<Settings, ConfigError> {
        let account = required(&self.zotero_account, "zotero_account")?;
        validate_account(&account)?;
        let collection_id = required(&self.zotero_collection, "zotero_collection")?;

        let maximum = self.maximum.unwrap_or(DEFAULT_MAXIMUM);
        if maximum == 0 {
            return Err(ConfigError::Invalid {
                key: "maximum",
                reason: "must be at least 1".to_string(),
            });
        }

        let pause = match self.pause {
            Some(secs) if !secs.is_finite() || secs < 0.0 => {
                return Err(ConfigError::Invalid {
                    key: "pause",
                    reason: format!("{} is not a non-negative number of seconds", secs),
                });
            }
            Some(secs) => {
                Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::Invalid {
                    key: "pause",
                    reason: format!("{} seconds is too long", secs),
                })?
            }
            None => Duration::ZERO,
        };

        let api_base = self.api_base.as_deref().unwrap_or(DEFAULT_API_BASE);
        let base_url = Url::parse(api_base).map_err(|e| ConfigError::Invalid {
            key: "api_base",
            reason: e.to_string(),
        })?;

        let identity = FeedIdentity {
            tag_domain: required(&self.tag_domain, "tag_domain")?,
            tag_date: required(&self.tag_date, "tag_date")?,
            tag_slug: required(&self.tag_slug, "tag_slug")?,
            title: required(&self.title, "title")?,
            author: Person {
                name: required(&self.author_name, "author_name")?,
                email: self.author_email.clone().filter(|e| !e.trim().is_empty()),
            },
            self_link: required(&self.self_link, "self")?,
            language: self
                .language
                .clone()
                .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
            logo: Some(self.logo.clone().unwrap_or_else(|| DEFAULT_LOGO.to_string()))
                .filter(|logo| !logo.is_empty()),
        };

        let out_path = self
            .out_path
            .clone()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or(ConfigError::Missing("out_path"))?;

        let client = ClientSettings {
            base_url,
            pause,
            user_agent: self
                .user_agent
                .clone()
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            api_key: self.resolve_api_key(),
        };

        Ok(Settings {
            collection: CollectionRef::new(account, collection_id),
            maximum,
            identity,
            out_path,
            client,
        })
    }

    fn resolve_api_key(&self) -> Option<SecretString> {
        std::env::var(API_KEY_ENV)
            .ok()
            .or_else(|| self.api_key.clone())
            .filter(|key| !key.trim().is_empty())
            .map(SecretString::from)
    }
}

fn warn_unknown_keys<'a>(keys: impl Iterator<Item = &'a String>) {
    for key in keys {
        if !KNOWN_KEYS.contains(&key.as_str()) {
            tracing::warn!(key = %key, "Unknown key in config file, ignoring");
        }
    }
}

fn required(value: &Option<String>, key: &'static str) -> Result<String, ConfigError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(ConfigError::Missing(key))
}

/// Accepts `users/<digits>` and `groups/<digits>`.
fn validate_account(account: &str) -> Result<(), ConfigError> {
    let valid = match account.split_once('/') {
        Some(("users" | "groups", id)) => !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()),
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            key: "zotero_account",
            reason: format!("expected 'users/<id>' or 'groups/<id>', got '{}'", account),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
