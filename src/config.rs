use crate::types::{DigestError, Result, SourceKind};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// One source descriptor from `feeds.yaml`. Order in the file is the
/// processing order.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub url: String,
    #[serde(rename = "type", default)]
    pub kind: SourceKind,
    #[serde(default)]
    pub feed_url: Option<String>,
    #[serde(default)]
    pub html_fallback_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FeedsFile {
    #[serde(default)]
    sources: Vec<SourceConfig>,
}

/// Load the ordered source list from a YAML file.
pub fn load_sources(path: impl AsRef<Path>) -> Result<Vec<SourceConfig>> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)?;
    let parsed: FeedsFile = serde_yaml::from_str(&raw)
        .map_err(|e| DigestError::Config(format!("failed to parse {}: {}", path.display(), e)))?;
    info!("Loaded {} sources from {}", parsed.sources.len(), path.display());
    Ok(parsed.sources)
}

/// Runtime settings, assembled from defaults plus environment overrides.
#[derive(Debug, Clone)]
pub struct Settings {
    pub db_path: String,
    pub feeds_path: String,
    /// Hard cap on extracted content length per item.
    pub max_chars_per_item: usize,
    /// Cap on items summarized in a single run.
    pub max_items_per_run: i64,
    /// Items published before this date are swept to `skipped` and never
    /// selected for summarization.
    pub summary_cutoff: DateTime<Utc>,
    pub pause_between_sources: Duration,
    pub pause_between_items: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: "data.sqlite".to_string(),
            feeds_path: "feeds.yaml".to_string(),
            max_chars_per_item: 8000,
            max_items_per_run: 25,
            summary_cutoff: DateTime::parse_from_rfc3339("2025-10-01T00:00:00Z")
                .expect("valid cutoff constant")
                .with_timezone(&Utc),
            pause_between_sources: Duration::from_millis(200),
            pause_between_items: Duration::from_millis(500),
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        if let Ok(path) = env::var("DIGEST_DB") {
            settings.db_path = path;
        }
        if let Ok(path) = env::var("FEEDS_FILE") {
            settings.feeds_path = path;
        }
        if let Some(n) = env_number("MAX_CHARS_PER_ITEM") {
            settings.max_chars_per_item = n as usize;
        }
        if let Some(n) = env_number("MAX_NEW_ITEMS_PER_RUN") {
            settings.max_items_per_run = n;
        }
        settings
    }
}

fn env_number(key: &str) -> Option<i64> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}
