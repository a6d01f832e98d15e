//! Configuration file parser for ~/.config/tagreel/config.toml.
//!
//! Loading happens in two steps. [`Config::load`] reads the TOML with every
//! field defaulted; [`Settings::from_config`] then resolves every filter and
//! sort name against the registry, validates colors, keys and feed URLs, and
//! fails with a [`ConfigError`] on the first problem it finds.
use secrecy::SecretString;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::feed::{Credentials, Source, StoreSettings};
use crate::keybindings::{KeybindingError, KeybindingRegistry};
use crate::tag::{Cursor, FilterId, Registry, RegistryError, SortId};
use crate::theme::{default_colors, validate_colors, ColorSpec, Palette, ThemeError};
use crate::util::{validate_url, UrlValidationError};

/// Tagset entry standing for every group the feeds contribute.
pub const ALL_GROUPS: &str = "*";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("No feeds configured")]
    NoFeeds,

    #[error("Invalid feed URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: UrlValidationError,
    },

    #[error("Feed '{0}' has a username but no password")]
    MissingPassword(String),

    #[error("'{0}' must not be empty")]
    EmptyList(&'static str),

    #[error("'{key}' must be at least {min}")]
    TooSmall { key: &'static str, min: u64 },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Invalid colors: {0}")]
    Colors(#[from] ThemeError),

    #[error("Invalid keybinding: {0}")]
    Keybinding(#[from] KeybindingError),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration as written in the file.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of side-by-side columns the story list is laid out in.
    pub columns: usize,

    /// Feed worker tick length.
    pub tick_millis: u64,

    /// Minutes between fetches of each source.
    pub fetch_interval_minutes: u64,

    /// Delay before retrying a failed fetch.
    pub retry_seconds: u64,

    /// Global filters cycled with next/prev filter. The first is active.
    pub global_filters: Vec<String>,

    /// Filters every group cycles through.
    pub default_tag_filters: Vec<String>,

    /// Sorts every group cycles through.
    pub default_sorts: Vec<String>,

    /// Sets of group names shown together; `"*"` expands to all groups.
    pub tagsets: Vec<Vec<String>>,

    pub colors: Vec<ColorSpec>,

    /// Keybinding overrides. Keys are action names, values are key strings.
    pub keybindings: HashMap<String, String>,

    pub feeds: Vec<FeedConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            columns: 1,
            tick_millis: 1000,
            fetch_interval_minutes: 30,
            retry_seconds: 60,
            global_filters: vec!["all".to_string(), "unread".to_string()],
            default_tag_filters: vec!["all".to_string()],
            default_sorts: vec!["none".to_string(), "newest".to_string()],
            tagsets: vec![vec![ALL_GROUPS.to_string()]],
            colors: default_colors(),
            keybindings: HashMap::new(),
            feeds: Vec::new(),
        }
    }
}

fn default_tags() -> Vec<String> {
    vec![String::new()]
}

fn default_rate() -> u32 {
    60
}

/// One `[[feeds]]` table.
///
/// Custom Debug impl masks `password` so it never lands in logs.
#[derive(Clone, Deserialize)]
pub struct FeedConfig {
    pub url: String,

    /// Groups this feed contributes to. An empty name means the feed title.
    #[serde(default = "default_tags")]
    pub tags: Vec<String>,

    /// Worker ticks between reloads of the document.
    #[serde(default = "default_rate")]
    pub rate: u32,

    /// Entries kept in the document (0 = unlimited).
    #[serde(default)]
    pub keep: usize,

    /// Filter stories must pass to be shown at all.
    #[serde(default)]
    pub filter: Option<String>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,
}

impl std::fmt::Debug for FeedConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedConfig")
            .field("url", &self.url)
            .field("tags", &self.tags)
            .field("rate", &self.rate)
            .field("keep", &self.keep)
            .field("filter", &self.filter)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

const KNOWN_KEYS: [&str; 11] = [
    "columns",
    "tick_millis",
    "fetch_interval_minutes",
    "retry_seconds",
    "global_filters",
    "default_tag_filters",
    "default_sorts",
    "tagsets",
    "colors",
    "keybindings",
    "feeds",
];

const KNOWN_FEED_KEYS: [&str; 7] = ["url", "tags", "rate", "keep", "filter", "username", "password"];

fn warn_unknown_keys(raw: &toml::Table) {
    for key in raw.keys() {
        if !KNOWN_KEYS.contains(&key.as_str()) {
            tracing::warn!(key = %key, "Unknown key in config file, ignoring");
        }
    }
    let feeds = raw.get("feeds").and_then(toml::Value::as_array);
    for table in feeds.into_iter().flatten().filter_map(toml::Value::as_table) {
        for key in table.keys() {
            if !KNOWN_FEED_KEYS.contains(&key.as_str()) {
                tracing::warn!(key = %key, "Unknown key in [[feeds]] entry, ignoring");
            }
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing or empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Size check first so a huge file is never read into memory
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        if let Ok(raw) = content.parse::<toml::Table>() {
            warn_unknown_keys(&raw);
        }
        let config: Config = toml::from_str(content)?;
        tracing::info!(feeds = config.feeds.len(), "Loaded configuration");
        Ok(config)
    }
}

// ============================================================================
// Validated Settings
// ============================================================================

/// A feed with every name resolved.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    pub url: String,
    pub path: PathBuf,
    pub tags: Vec<String>,
    pub rate: u32,
    pub keep: usize,
    pub filter: Option<FilterId>,
    pub credentials: Option<Credentials>,
}

impl FeedSettings {
    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings {
            url: self.url.clone(),
            path: self.path.clone(),
            tags: self.tags.clone(),
            rate: self.rate,
            filter: self.filter,
        }
    }

    pub fn source(&self) -> Source {
        Source {
            url: self.url.clone(),
            path: self.path.clone(),
            keep: self.keep,
            credentials: self.credentials.clone(),
        }
    }
}

/// Everything the application needs, validated.
#[derive(Debug)]
pub struct Settings {
    pub columns: usize,
    pub tick: Duration,
    pub fetch_interval: Duration,
    pub retry: Duration,
    pub global_filters: Cursor<FilterId>,
    pub tag_filters: Cursor<FilterId>,
    pub sorts: Cursor<SortId>,
    pub tagsets: Cursor<usize>,
    /// Raw tagset contents, indexed by the `tagsets` cursor.
    pub tagset_names: Vec<Vec<String>>,
    pub palette: Palette,
    pub keybindings: KeybindingRegistry,
    pub feeds: Vec<FeedSettings>,
}

fn resolve_filters(
    registry: &Registry,
    key: &'static str,
    names: &[String],
) -> Result<Cursor<FilterId>, ConfigError> {
    let ids = names
        .iter()
        .map(|n| registry.resolve_filter_name(n))
        .collect::<Result<Vec<_>, _>>()?;
    Cursor::new(ids).ok_or(ConfigError::EmptyList(key))
}

/// Where a source's document lives under `data_dir`.
pub fn document_path(data_dir: &Path, url: &str) -> PathBuf {
    let digest = Sha256::digest(url.as_bytes());
    let name: String = digest[..8].iter().map(|b| format!("{b:02x}")).collect();
    data_dir.join("feeds").join(format!("{name}.json"))
}

impl Settings {
    pub fn from_config(
        config: &Config,
        registry: &Registry,
        data_dir: &Path,
    ) -> Result<Self, ConfigError> {
        if config.columns == 0 {
            return Err(ConfigError::TooSmall {
                key: "columns",
                min: 1,
            });
        }
        if config.tick_millis < 10 {
            return Err(ConfigError::TooSmall {
                key: "tick_millis",
                min: 10,
            });
        }

        let global_filters = resolve_filters(registry, "global_filters", &config.global_filters)?;
        let tag_filters = resolve_filters(registry, "default_tag_filters", &config.default_tag_filters)?;
        let sort_ids = config
            .default_sorts
            .iter()
            .map(|n| registry.resolve_sort_name(n))
            .collect::<Result<Vec<_>, _>>()?;
        let sorts = Cursor::new(sort_ids).ok_or(ConfigError::EmptyList("default_sorts"))?;

        if config.tagsets.iter().any(Vec::is_empty) {
            return Err(ConfigError::EmptyList("tagsets entry"));
        }
        let tagsets = Cursor::new((0..config.tagsets.len()).collect())
            .ok_or(ConfigError::EmptyList("tagsets"))?;

        let palette = Palette::from_pairs(&validate_colors(&config.colors)?);

        let mut keybindings = KeybindingRegistry::new();
        keybindings.apply_overrides(&config.keybindings)?;

        if config.feeds.is_empty() {
            return Err(ConfigError::NoFeeds);
        }
        let feeds = config
            .feeds
            .iter()
            .map(|feed| Self::resolve_feed(feed, registry, data_dir))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            columns: config.columns,
            tick: Duration::from_millis(config.tick_millis),
            fetch_interval: Duration::from_secs(config.fetch_interval_minutes.max(1) * 60),
            retry: Duration::from_secs(config.retry_seconds.max(1)),
            global_filters,
            tag_filters,
            sorts,
            tagsets,
            tagset_names: config.tagsets.clone(),
            palette,
            keybindings,
            feeds,
        })
    }

    fn resolve_feed(
        feed: &FeedConfig,
        registry: &Registry,
        data_dir: &Path,
    ) -> Result<FeedSettings, ConfigError> {
        let url = validate_url(&feed.url)
            .map_err(|source| ConfigError::InvalidUrl {
                url: feed.url.clone(),
                source,
            })?
            .to_string();

        let filter = feed
            .filter
            .as_deref()
            .map(|name| registry.resolve_filter_name(name))
            .transpose()?;

        let credentials = match (&feed.username, &feed.password) {
            (Some(username), Some(password)) => Some(Credentials {
                username: username.clone(),
                password: SecretString::from(password.clone()),
            }),
            (Some(_), None) => return Err(ConfigError::MissingPassword(url)),
            (None, _) => None,
        };

        let tags = if feed.tags.is_empty() {
            default_tags()
        } else {
            feed.tags.clone()
        };

        Ok(FeedSettings {
            path: document_path(data_dir, &url),
            url,
            tags,
            rate: feed.rate.max(1),
            keep: feed.keep,
            filter,
            credentials,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
