//! Ingestion stage: walk the configured sources in order, fetch each feed
//! conditionally, and persist newly discovered items. Failures are contained
//! per source so one broken origin never stops the run.

use crate::config::{Settings, SourceConfig};
use crate::discovery;
use crate::extractor;
use crate::fetcher::Fetcher;
use crate::store::{url_hash, Store};
use crate::types::{DigestError, FetchOutcome, NewItem, Result, Source};
use chrono::Utc;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Entries whose feed-supplied text is shorter than this get a follow-up
/// fetch of the article page.
const MIN_ENTRY_CONTENT_CHARS: usize = 100;

#[derive(Debug, Default, Clone, Copy)]
pub struct IngestReport {
    pub sources_processed: usize,
    pub sources_failed: usize,
    pub sources_inactive: usize,
    pub items_inserted: usize,
}

/// Run the ingestion stage over the full source list, in file order.
pub async fn run_ingest(
    store: &Store,
    fetcher: &Fetcher,
    sources: &[SourceConfig],
    settings: &Settings,
) -> Result<IngestReport> {
    let mut report = IngestReport::default();

    for (index, config) in sources.iter().enumerate() {
        let feed_url = discovery::discover(fetcher, config).await;
        let source = store.upsert_source(config, feed_url.as_deref()).await?;

        if feed_url.is_none() {
            info!("{}: no feed resolved, marked inactive", config.name);
            report.sources_inactive += 1;
        } else {
            match ingest_source(store, fetcher, &source, settings).await {
                Ok(inserted) => {
                    report.sources_processed += 1;
                    report.items_inserted += inserted;
                }
                Err(e) => {
                    warn!("{}: ingestion failed: {}", config.name, e);
                    // A feed endpoint serving unparseable content is not a
                    // feed; deactivate the source until discovery succeeds
                    // again.
                    if matches!(e, DigestError::FeedParse(_)) {
                        store.upsert_source(config, None).await?;
                    }
                    report.sources_failed += 1;
                }
            }
        }

        if index + 1 < sources.len() {
            tokio::time::sleep(settings.pause_between_sources).await;
        }
    }

    info!(
        "Ingestion done: {} items from {} sources ({} failed, {} inactive)",
        report.items_inserted,
        report.sources_processed,
        report.sources_failed,
        report.sources_inactive
    );
    Ok(report)
}

/// Fetch one source's feed with its cached validators and ingest the result.
/// A 304 means nothing changed since the last run.
async fn ingest_source(
    store: &Store,
    fetcher: &Fetcher,
    source: &Source,
    settings: &Settings,
) -> Result<usize> {
    let feed_url = source
        .feed_url
        .as_deref()
        .ok_or_else(|| DigestError::Config(format!("source {} has no feed URL", source.name)))?;

    let page = match fetcher
        .fetch(feed_url, source.etag.as_deref(), source.last_modified.as_deref())
        .await?
    {
        FetchOutcome::Success(page) => page,
        FetchOutcome::NotModified => {
            debug!("{}: not modified since last fetch", source.name);
            return Ok(0);
        }
    };

    ingest_feed_content(
        store,
        fetcher,
        source,
        &page.body,
        page.etag.as_deref(),
        page.last_modified.as_deref(),
        settings,
    )
    .await
}

/// Parse a feed document and commit its new items in one transaction,
/// together with the response validators for the next conditional fetch.
///
/// Takes the feed body directly so tests can drive the full path without a
/// network.
pub async fn ingest_feed_content(
    store: &Store,
    fetcher: &Fetcher,
    source: &Source,
    body: &str,
    etag: Option<&str>,
    last_modified: Option<&str>,
    settings: &Settings,
) -> Result<usize> {
    let feed = feed_rs::parser::parse(body.as_bytes())
        .map_err(|e| DigestError::FeedParse(e.to_string()))?;
    debug!("{}: feed has {} entries", source.name, feed.entries.len());

    let mut seen = HashSet::new();
    let mut new_items = Vec::new();

    for entry in &feed.entries {
        let Some(entry_url) = entry_url(entry) else {
            debug!("{}: entry without link or id, skipping", source.name);
            continue;
        };

        let hash = url_hash(&entry_url);
        // Duplicates within the same feed document.
        if !seen.insert(hash.clone()) {
            continue;
        }
        if store.item_exists(&hash).await? {
            continue;
        }

        let mut content = extractor::entry_text(entry, settings.max_chars_per_item);
        if content.trim().chars().count() < MIN_ENTRY_CONTENT_CHARS {
            content = fetch_article_text(fetcher, &entry_url, settings)
                .await
                .unwrap_or(content);
        }

        let title = entry
            .title
            .as_ref()
            .map(|t| t.content.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "Untitled".to_string());
        let guid = if entry.id.is_empty() {
            None
        } else {
            Some(entry.id.clone())
        };

        new_items.push(NewItem {
            source_id: source.id,
            title,
            url: entry_url,
            guid,
            published_at: entry.published.or(entry.updated),
            content_text: content,
            url_hash: hash,
        });
    }

    let inserted = store
        .commit_source_ingest(source.id, etag, last_modified, Utc::now(), &new_items)
        .await?;
    if inserted > 0 {
        info!("{}: {} new items", source.name, inserted);
    }
    Ok(inserted)
}

/// Canonical URL for an entry: the first link, else a non-empty id that
/// looks like one.
fn entry_url(entry: &feed_rs::model::Entry) -> Option<String> {
    if let Some(link) = entry.links.first() {
        if !link.href.is_empty() {
            return Some(link.href.clone());
        }
    }
    if entry.id.starts_with("http") {
        return Some(entry.id.clone());
    }
    None
}

/// Follow-up fetch of the article page when the feed entry carried little or
/// no text. Best effort; a failure leaves the item with whatever the feed
/// provided.
async fn fetch_article_text(
    fetcher: &Fetcher,
    url: &str,
    settings: &Settings,
) -> Option<String> {
    match fetcher.fetch(url, None, None).await {
        Ok(FetchOutcome::Success(page)) => {
            let text = extractor::extract_text(&page.body, settings.max_chars_per_item);
            if text.trim().is_empty() {
                None
            } else {
                Some(text)
            }
        }
        Ok(FetchOutcome::NotModified) => None,
        Err(e) => {
            debug!("Could not fetch article {}: {}", url, e);
            None
        }
    }
}
