//! Summarization stage: select eligible items, prompt the LLM, validate the
//! structured output, and persist terminal statuses one item at a time.

use crate::config::Settings;
use crate::llm::{complete_with_retry, LlmClient};
use crate::store::Store;
use crate::types::{DigestError, Item, ItemStatus, Result, Summary};
use tracing::{info, warn};

/// Input text cap in characters, sized as a rough 2000-token allowance.
const MAX_INPUT_CHARS: usize = 2000 * 4;

pub const SUMMARY_SYSTEM_PROMPT: &str = "\
You are a careful technical summarizer. Given an article, respond with a \
single JSON object and nothing else. No markdown, no code fences, no \
commentary before or after the JSON.

The object must have exactly these fields, all required:
  \"eli5\": explain the article like the reader is five (1-2 sentences)
  \"eli16\": explain it for a technically curious teenager (1-2 sentences)
  \"why_this_matters\": the practical significance (1-2 sentences)
  \"what_changed\": what is new or different here (1-2 sentences)
  \"key_quotes\": up to 2 short verbatim quotes from the article, or []
  \"confidence_unknowns\": one sentence on what you are unsure about

Every field except key_quotes is a string. key_quotes is an array of strings \
with at most 2 elements.";

const FIX_SYSTEM_PROMPT: &str = "\
You are a JSON repair tool. The user will give you malformed or incomplete \
JSON. Respond with the corrected JSON object only, no commentary.";

/// Suffixes tried in order when output looks like JSON cut off mid-value.
/// Ordered from the deepest plausible nesting to the shallowest.
const REPAIR_SUFFIXES: [&str; 6] = ["\"}\n}", "\"\n}", "\"]\n}", "]\n}", "\n}", "}"];

#[derive(Debug, Default, Clone, Copy)]
pub struct SummaryReport {
    pub swept: u64,
    pub selected: usize,
    pub summarized: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Drop surrounding Markdown code fences if the model added them anyway.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Opening fence may carry a language tag; skip to the end of that line.
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.trim_end()
        .strip_suffix("```")
        .unwrap_or(rest)
        .trim()
}

/// Parse model output into a [`Summary`], tolerating code fences and
/// truncated tails. Returns `None` only when no repair produces an object
/// with all required fields.
pub fn parse_summary(text: &str) -> Option<Summary> {
    let cleaned = strip_code_fences(text);
    if let Ok(summary) = serde_json::from_str::<Summary>(cleaned) {
        return Some(summary);
    }
    for suffix in REPAIR_SUFFIXES {
        let candidate = format!("{cleaned}{suffix}");
        if let Ok(summary) = serde_json::from_str::<Summary>(&candidate) {
            return Some(summary);
        }
    }
    None
}

/// Cap article text sent to the model, marking the cut explicitly.
pub fn truncate_for_input(text: &str) -> String {
    if text.chars().count() <= MAX_INPUT_CHARS {
        return text.to_string();
    }
    let head: String = text.chars().take(MAX_INPUT_CHARS).collect();
    format!("{head}\n[truncated]")
}

fn user_prompt(item: &Item) -> String {
    format!(
        "Title: {}\nURL: {}\n\nArticle text:\n{}",
        item.title,
        item.url,
        truncate_for_input(&item.content_text)
    )
}

/// Summarize one item. Invalid output gets exactly one corrective re-prompt
/// through the repair system prompt before the item is declared failed.
pub async fn summarize_item(llm: &dyn LlmClient, item: &Item) -> Result<Summary> {
    let prompt = user_prompt(item);
    let raw = complete_with_retry(llm, SUMMARY_SYSTEM_PROMPT, &prompt).await?;
    if let Some(summary) = parse_summary(&raw) {
        return Ok(summary);
    }

    warn!(
        "Item {}: invalid summary JSON, attempting corrective re-prompt",
        item.id
    );
    let repaired = complete_with_retry(llm, FIX_SYSTEM_PROMPT, &raw).await?;
    parse_summary(&repaired).ok_or(DigestError::InvalidSummary)
}

/// Run the summarization stage over everything currently eligible.
///
/// Each item reaches a terminal state (or stays `new` after a failure) in its
/// own commit, so an interrupted run never loses completed work.
pub async fn run_summarizer(
    store: &Store,
    llm: &dyn LlmClient,
    settings: &Settings,
) -> Result<SummaryReport> {
    let mut report = SummaryReport {
        swept: store.skip_published_before(settings.summary_cutoff).await?,
        ..Default::default()
    };
    if report.swept > 0 {
        info!("Skipped {} items published before cutoff", report.swept);
    }

    let items = store
        .eligible_for_summary(settings.max_items_per_run, settings.summary_cutoff)
        .await?;
    report.selected = items.len();
    info!(
        "Summarizing {} items with {} ({})",
        items.len(),
        llm.provider_name(),
        llm.model_name()
    );

    for (index, item) in items.iter().enumerate() {
        if item.content_text.trim().is_empty() {
            store
                .transition(item.id, ItemStatus::Skipped, None, None)
                .await?;
            report.skipped += 1;
            continue;
        }

        match summarize_item(llm, item).await {
            Ok(summary) => {
                store
                    .transition(
                        item.id,
                        ItemStatus::Summarized,
                        Some(&summary),
                        Some(llm.model_name()),
                    )
                    .await?;
                report.summarized += 1;
            }
            Err(e) => {
                // The item stays `new` and is retried on the next run.
                warn!("Item {} failed to summarize: {}", item.id, e);
                report.failed += 1;
            }
        }

        if index + 1 < items.len() {
            tokio::time::sleep(settings.pause_between_items).await;
        }
    }

    info!(
        "Summarization done: {} summarized, {} skipped, {} failed of {} selected",
        report.summarized, report.skipped, report.failed, report.selected
    );
    Ok(report)
}
