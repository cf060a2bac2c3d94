use chrono::{DateTime, Utc};
use feed_digest::config::{Settings, SourceConfig};
use feed_digest::llm::MockLlmClient;
use feed_digest::store::{url_hash, Store};
use feed_digest::summarizer::run_summarizer;
use feed_digest::types::{ItemStatus, NewItem, SourceKind};

const VALID_JSON: &str = r#"{
    "eli5": "A thing happened.",
    "eli16": "A more detailed thing happened.",
    "why_this_matters": "It matters.",
    "what_changed": "Something changed.",
    "key_quotes": [],
    "confidence_unknowns": "Unsure about the timeline."
}"#;

fn ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

async fn seed_item(store: &Store, content: &str) -> i64 {
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
    store
        .insert_item(&NewItem {
            source_id: source.id,
            title: "A Post".into(),
            url: "https://blog.example/post".into(),
            guid: None,
            published_at: Some(ts("2025-11-01T00:00:00Z")),
            content_text: content.into(),
            url_hash: url_hash("https://blog.example/post"),
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn valid_response_summarizes_the_item() {
    let store = Store::open_in_memory().await.unwrap();
    let id = seed_item(&store, "Plenty of article text to work with.").await;
    let llm = MockLlmClient::new(vec![VALID_JSON]);

    let report = run_summarizer(&store, &llm, &Settings::default())
        .await
        .unwrap();
    assert_eq!(report.selected, 1);
    assert_eq!(report.summarized, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(llm.call_count(), 1);

    let item = store.get_item(id).await.unwrap();
    assert_eq!(item.status, ItemStatus::Summarized);
    assert_eq!(item.model_used.as_deref(), Some("mock-model"));
    let summary = item.summary.unwrap();
    assert_eq!(summary.eli5, "A thing happened.");

    // The article text reached the prompt.
    let calls = llm.calls();
    assert!(calls[0].1.contains("Plenty of article text"));
}

#[tokio::test]
async fn blank_content_is_skipped_without_calling_the_model() {
    let store = Store::open_in_memory().await.unwrap();
    let id = seed_item(&store, "   \n  ").await;
    let llm = MockLlmClient::new(vec![VALID_JSON]);

    let report = run_summarizer(&store, &llm, &Settings::default())
        .await
        .unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(report.summarized, 0);
    assert_eq!(llm.call_count(), 0);

    let item = store.get_item(id).await.unwrap();
    assert_eq!(item.status, ItemStatus::Skipped);
    assert!(item.summary.is_none());
}

#[tokio::test]
async fn invalid_output_gets_one_reprompt_then_fails() {
    let store = Store::open_in_memory().await.unwrap();
    let id = seed_item(&store, "Some article text.").await;
    let llm = MockLlmClient::new(vec![
        "I am sorry, I cannot produce JSON today.",
        "Still not JSON.",
    ]);

    let report = run_summarizer(&store, &llm, &Settings::default())
        .await
        .unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.summarized, 0);
    // Exactly one corrective re-prompt, never more.
    assert_eq!(llm.call_count(), 2);

    // A failed item stays new and gets retried next run.
    let item = store.get_item(id).await.unwrap();
    assert_eq!(item.status, ItemStatus::New);
}

#[tokio::test]
async fn truncated_json_is_repaired_without_a_reprompt() {
    let store = Store::open_in_memory().await.unwrap();
    let id = seed_item(&store, "Some article text.").await;
    let truncated = r#"{
        "eli5": "A thing happened.",
        "eli16": "More detail.",
        "why_this_matters": "It matters.",
        "what_changed": "Something changed.",
        "key_quotes": [],
        "confidence_unknowns": "Unsure about dates"#;
    let llm = MockLlmClient::new(vec![truncated]);

    let report = run_summarizer(&store, &llm, &Settings::default())
        .await
        .unwrap();
    assert_eq!(report.summarized, 1);
    assert_eq!(llm.call_count(), 1);

    let item = store.get_item(id).await.unwrap();
    assert_eq!(
        item.summary.unwrap().confidence_unknowns,
        "Unsure about dates"
    );
}

#[tokio::test]
async fn corrective_reprompt_recovers_a_bad_first_answer() {
    let store = Store::open_in_memory().await.unwrap();
    let id = seed_item(&store, "Some article text.").await;
    let llm = MockLlmClient::new(vec!["Here is your summary: the thing happened.", VALID_JSON]);

    let report = run_summarizer(&store, &llm, &Settings::default())
        .await
        .unwrap();
    assert_eq!(report.summarized, 1);
    assert_eq!(llm.call_count(), 2);

    // The repair prompt carries the broken output verbatim.
    let calls = llm.calls();
    assert!(calls[1].1.contains("Here is your summary"));

    let item = store.get_item(id).await.unwrap();
    assert_eq!(item.status, ItemStatus::Summarized);
}

#[tokio::test]
async fn old_items_are_swept_before_selection() {
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
    store
        .insert_item(&NewItem {
            source_id: source.id,
            title: "Ancient Post".into(),
            url: "https://blog.example/ancient".into(),
            guid: None,
            published_at: Some(ts("2020-01-01T00:00:00Z")),
            content_text: "Old text.".into(),
            url_hash: url_hash("https://blog.example/ancient"),
        })
        .await
        .unwrap();
    let llm = MockLlmClient::new(vec![]);

    let report = run_summarizer(&store, &llm, &Settings::default())
        .await
        .unwrap();
    assert_eq!(report.swept, 1);
    assert_eq!(report.selected, 0);
    assert_eq!(llm.call_count(), 0);
}
