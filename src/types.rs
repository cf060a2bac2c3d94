use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A configured content origin, as persisted in the `sources` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: i64,
    pub name: String,
    pub source_url: String,
    pub feed_url: Option<String>,
    pub kind: SourceKind,
    pub active: bool,
    pub last_fetch_at: Option<DateTime<Utc>>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Site,
    Substack,
    Medium,
    Youtube,
}

// Unknown kinds fall back to the generic site behavior instead of failing
// the whole config load.
impl<'de> Deserialize<'de> for SourceKind {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(SourceKind::parse(&raw))
    }
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Site => "site",
            SourceKind::Substack => "substack",
            SourceKind::Medium => "medium",
            SourceKind::Youtube => "youtube",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "substack" => SourceKind::Substack,
            "medium" => SourceKind::Medium,
            "youtube" => SourceKind::Youtube,
            _ => SourceKind::Site,
        }
    }
}

/// One discrete piece of content discovered from a source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: i64,
    pub source_id: i64,
    pub title: String,
    pub url: String,
    pub guid: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
    pub content_text: String,
    pub url_hash: String,
    pub status: ItemStatus,
    pub summary: Option<Summary>,
    pub model_used: Option<String>,
}

/// Fields for an item about to be inserted; the store stamps `fetched_at`
/// and the database assigns the id.
#[derive(Debug, Clone)]
pub struct NewItem {
    pub source_id: i64,
    pub title: String,
    pub url: String,
    pub guid: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub content_text: String,
    pub url_hash: String,
}

/// Item lifecycle. Transitions are one-directional: `new` is the only
/// non-terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    New,
    Summarized,
    Skipped,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::New => "new",
            ItemStatus::Summarized => "summarized",
            ItemStatus::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(ItemStatus::New),
            "summarized" => Some(ItemStatus::Summarized),
            "skipped" => Some(ItemStatus::Skipped),
            _ => None,
        }
    }
}

/// Structured summary payload. All six fields are required; a model response
/// missing any of them never validates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub eli5: String,
    pub eli16: String,
    pub why_this_matters: String,
    pub what_changed: String,
    pub key_quotes: Vec<String>,
    pub confidence_unknowns: String,
}

/// A summarized item joined with its source name, as read by the site
/// renderer.
#[derive(Debug, Clone, Serialize)]
pub struct SummarizedItem {
    pub title: String,
    pub url: String,
    pub source_name: String,
    pub published_at: Option<DateTime<Utc>>,
    pub summary: Summary,
    pub model_used: Option<String>,
}

/// Successful outcome of a fetch: either a body or a 304.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Success(FetchedPage),
    NotModified,
}

#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub status: u16,
    pub body: String,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_base_secs: u64,
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
                         AppleWebKit/537.36 (KHTML, like Gecko) \
                         Chrome/120.0.0.0 Safari/537.36"
                .to_string(),
            timeout_secs: 15,
            max_retries: 3,
            backoff_base_secs: 1,
            max_redirects: 5,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DigestError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} returned HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("origin {0} previously failed; skipping for this run")]
    OriginBlacklisted(String),

    #[error("all {attempts} attempts failed for {url}: {last}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        last: String,
    },

    #[error("feed parse error: {0}")]
    FeedParse(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("invalid timestamp in database: {0}")]
    Timestamp(#[from] chrono::ParseError),

    #[error("item {item_id} is not in 'new' status")]
    NotNew { item_id: i64 },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("no LLM API key configured; set ANTHROPIC_API_KEY or OPENAI_API_KEY")]
    NoProvider,

    #[error("LLM call failed: {0}")]
    Llm(String),

    #[error("model output was not valid summary JSON after repair and one corrective re-prompt")]
    InvalidSummary,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DigestError>;
