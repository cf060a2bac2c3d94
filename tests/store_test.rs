use chrono::{DateTime, Utc};
use feed_digest::config::SourceConfig;
use feed_digest::store::{url_hash, Store};
use feed_digest::types::{DigestError, ItemStatus, NewItem, SourceKind, Summary};

fn ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

fn sample_summary() -> Summary {
    Summary {
        eli5: "Simple.".into(),
        eli16: "Less simple.".into(),
        why_this_matters: "It matters.".into(),
        what_changed: "New thing.".into(),
        key_quotes: vec![],
        confidence_unknowns: "Unsure about scope.".into(),
    }
}

async fn seed_source(store: &Store) -> i64 {
    let config = SourceConfig {
        name: "Example Blog".into(),
        url: "https://blog.example".into(),
        kind: SourceKind::Site,
        feed_url: None,
        html_fallback_url: None,
    };
    store
        .upsert_source(&config, Some("https://blog.example/feed.xml"))
        .await
        .unwrap()
        .id
}

fn new_item(source_id: i64, url: &str, published: Option<DateTime<Utc>>) -> NewItem {
    NewItem {
        source_id,
        title: format!("Post at {url}"),
        url: url.to_string(),
        guid: Some(url.to_string()),
        published_at: published,
        content_text: "Some article text.".into(),
        url_hash: url_hash(url),
    }
}

#[tokio::test]
async fn duplicate_url_hash_is_rejected() {
    let store = Store::open_in_memory().await.unwrap();
    let source_id = seed_source(&store).await;

    let item = new_item(source_id, "https://blog.example/post-1", None);
    store.insert_item(&item).await.unwrap();

    let err = store.insert_item(&item).await.unwrap_err();
    assert!(matches!(err, DigestError::Database(_)));
    assert_eq!(store.count_by_status(ItemStatus::New).await.unwrap(), 1);
}

#[tokio::test]
async fn item_exists_sees_inserted_hashes() {
    let store = Store::open_in_memory().await.unwrap();
    let source_id = seed_source(&store).await;

    let hash = url_hash("https://blog.example/post-1");
    assert!(!store.item_exists(&hash).await.unwrap());
    store
        .insert_item(&new_item(source_id, "https://blog.example/post-1", None))
        .await
        .unwrap();
    assert!(store.item_exists(&hash).await.unwrap());
}

#[tokio::test]
async fn transition_is_monotonic() {
    let store = Store::open_in_memory().await.unwrap();
    let source_id = seed_source(&store).await;
    let id = store
        .insert_item(&new_item(source_id, "https://blog.example/post-1", None))
        .await
        .unwrap();

    let summary = sample_summary();
    store
        .transition(id, ItemStatus::Summarized, Some(&summary), Some("model-x"))
        .await
        .unwrap();

    let item = store.get_item(id).await.unwrap();
    assert_eq!(item.status, ItemStatus::Summarized);
    assert_eq!(item.summary.as_ref(), Some(&summary));
    assert_eq!(item.model_used.as_deref(), Some("model-x"));

    // Terminal states never change again.
    let err = store
        .transition(id, ItemStatus::Skipped, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, DigestError::NotNew { .. }));
    let item = store.get_item(id).await.unwrap();
    assert_eq!(item.status, ItemStatus::Summarized);
}

#[tokio::test]
async fn eligibility_honors_cutoff_and_ordering() {
    let store = Store::open_in_memory().await.unwrap();
    let source_id = seed_source(&store).await;
    let cutoff = ts("2025-10-01T00:00:00Z");

    store
        .insert_item(&new_item(
            source_id,
            "https://blog.example/old",
            Some(ts("2025-09-01T00:00:00Z")),
        ))
        .await
        .unwrap();
    store
        .insert_item(&new_item(
            source_id,
            "https://blog.example/newer",
            Some(ts("2025-11-15T00:00:00Z")),
        ))
        .await
        .unwrap();
    store
        .insert_item(&new_item(
            source_id,
            "https://blog.example/newest",
            Some(ts("2025-12-01T00:00:00Z")),
        ))
        .await
        .unwrap();
    store
        .insert_item(&new_item(source_id, "https://blog.example/undated", None))
        .await
        .unwrap();

    let eligible = store.eligible_for_summary(25, cutoff).await.unwrap();
    let urls: Vec<&str> = eligible.iter().map(|i| i.url.as_str()).collect();
    assert_eq!(
        urls,
        vec![
            "https://blog.example/newest",
            "https://blog.example/newer",
            "https://blog.example/undated",
        ]
    );

    let capped = store.eligible_for_summary(1, cutoff).await.unwrap();
    assert_eq!(capped.len(), 1);
    assert_eq!(capped[0].url, "https://blog.example/newest");
}

#[tokio::test]
async fn sweep_skips_items_published_before_cutoff() {
    let store = Store::open_in_memory().await.unwrap();
    let source_id = seed_source(&store).await;
    let cutoff = ts("2025-10-01T00:00:00Z");

    store
        .insert_item(&new_item(
            source_id,
            "https://blog.example/old",
            Some(ts("2025-01-01T00:00:00Z")),
        ))
        .await
        .unwrap();
    store
        .insert_item(&new_item(
            source_id,
            "https://blog.example/new",
            Some(ts("2025-11-01T00:00:00Z")),
        ))
        .await
        .unwrap();
    store
        .insert_item(&new_item(source_id, "https://blog.example/undated", None))
        .await
        .unwrap();

    let swept = store.skip_published_before(cutoff).await.unwrap();
    assert_eq!(swept, 1);
    assert_eq!(store.count_by_status(ItemStatus::Skipped).await.unwrap(), 1);
    // Undated items are never swept.
    assert_eq!(store.count_by_status(ItemStatus::New).await.unwrap(), 2);

    // The sweep is idempotent.
    assert_eq!(store.skip_published_before(cutoff).await.unwrap(), 0);
}

#[tokio::test]
async fn commit_source_ingest_stores_validators_and_items() {
    let store = Store::open_in_memory().await.unwrap();
    let config = SourceConfig {
        name: "Example Blog".into(),
        url: "https://blog.example".into(),
        kind: SourceKind::Site,
        feed_url: None,
        html_fallback_url: None,
    };
    let source = store
        .upsert_source(&config, Some("https://blog.example/feed.xml"))
        .await
        .unwrap();

    let items = vec![
        new_item(source.id, "https://blog.example/a", None),
        new_item(source.id, "https://blog.example/b", None),
    ];
    let inserted = store
        .commit_source_ingest(
            source.id,
            Some("\"etag-1\""),
            Some("Mon, 01 Dec 2025 00:00:00 GMT"),
            ts("2025-12-02T08:00:00Z"),
            &items,
        )
        .await
        .unwrap();
    assert_eq!(inserted, 2);
    assert_eq!(store.count_by_status(ItemStatus::New).await.unwrap(), 2);

    // Re-upserting the source keeps the cached validators for the next
    // conditional request.
    let source = store
        .upsert_source(&config, Some("https://blog.example/feed.xml"))
        .await
        .unwrap();
    assert_eq!(source.etag.as_deref(), Some("\"etag-1\""));
    assert_eq!(
        source.last_modified.as_deref(),
        Some("Mon, 01 Dec 2025 00:00:00 GMT")
    );
    assert_eq!(source.last_fetch_at, Some(ts("2025-12-02T08:00:00Z")));
}

#[tokio::test]
async fn upsert_source_without_feed_marks_inactive() {
    let store = Store::open_in_memory().await.unwrap();
    let config = SourceConfig {
        name: "No Feed Here".into(),
        url: "https://nofeed.example".into(),
        kind: SourceKind::Site,
        feed_url: None,
        html_fallback_url: None,
    };

    let source = store.upsert_source(&config, None).await.unwrap();
    assert!(!source.active);
    assert!(source.feed_url.is_none());

    // A later run that does resolve a feed reactivates the same row.
    let source = store
        .upsert_source(&config, Some("https://nofeed.example/rss"))
        .await
        .unwrap();
    assert!(source.active);
    assert_eq!(source.feed_url.as_deref(), Some("https://nofeed.example/rss"));
}

#[tokio::test]
async fn summarized_items_join_source_names() {
    let store = Store::open_in_memory().await.unwrap();
    let source_id = seed_source(&store).await;
    let id = store
        .insert_item(&new_item(
            source_id,
            "https://blog.example/post",
            Some(ts("2025-11-01T00:00:00Z")),
        ))
        .await
        .unwrap();
    store
        .transition(
            id,
            ItemStatus::Summarized,
            Some(&sample_summary()),
            Some("model-x"),
        )
        .await
        .unwrap();

    let rendered = store.summarized_items(10).await.unwrap();
    assert_eq!(rendered.len(), 1);
    assert_eq!(rendered[0].source_name, "Example Blog");
    assert_eq!(rendered[0].summary.eli5, "Simple.");
    assert_eq!(rendered[0].model_used.as_deref(), Some("model-x"));
}
