//! Scraper agent: fetch a page, extract text, summarize.

use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use scraper::{Html, Selector};
use serde_json::{Value, json};

use relay_db::models::LogLevel;

use super::{AgentContext, AgentOutcome, ArtifactOutput, TaskInfo};
use crate::ai::GenerateOptions;

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Matched elements (or filtered paragraphs) kept per page.
const MAX_ITEMS: usize = 30;
/// Unfiltered paragraphs kept when the >30-char filter leaves nothing.
const MAX_UNFILTERED: usize = 20;
/// Items included in the completion's `sample_data`.
const MAX_SAMPLE: usize = 10;

pub async fn run(ctx: &AgentContext, task: &TaskInfo, payload: &Value) -> Result<AgentOutcome> {
    let url = payload.get("url").and_then(Value::as_str).unwrap_or("");
    let selector = payload.get("selector").and_then(Value::as_str).unwrap_or("");

    if url.is_empty() {
        let error = "URL is required for scraping".to_string();
        ctx.log(&task.id, LogLevel::Error, &error).await;
        let artifact = failure_artifact(task, url, &error);
        return Ok(AgentOutcome::Fail {
            error,
            artifact: Some(artifact),
        });
    }

    ctx.log(&task.id, LogLevel::Info, &format!("Fetching URL: {url}"))
        .await;

    let body = match fetch(ctx, url).await {
        Ok(body) => body,
        Err(error) => {
            ctx.log(&task.id, LogLevel::Error, &error).await;
            let artifact = failure_artifact(task, url, &error);
            return Ok(AgentOutcome::Fail {
                error,
                artifact: Some(artifact),
            });
        }
    };

    let items = match extract_items(&body, selector) {
        Ok(items) => items,
        Err(error) => {
            ctx.log(&task.id, LogLevel::Error, &error).await;
            let artifact = failure_artifact(task, url, &error);
            return Ok(AgentOutcome::Fail {
                error,
                artifact: Some(artifact),
            });
        }
    };
    ctx.log(
        &task.id,
        LogLevel::Info,
        &format!("Extracted {} items", items.len()),
    )
    .await;

    // Best-effort AI summary of the scraped content.
    let preview: String = items
        .iter()
        .take(5)
        .cloned()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(500)
        .collect();
    let prompt = format!(
        "Analyze this scraped web content and provide a brief summary:\n\n\
         URL: {url}\n\
         Content Preview: {preview}\n\n\
         Provide a 2-3 sentence summary of what this webpage contains."
    );
    let ai_summary = match ctx
        .ai
        .generate(
            &prompt,
            &GenerateOptions::for_task("scraper")
                .temperature(0.3)
                .max_tokens(150),
        )
        .await
    {
        Ok(summary) => {
            ctx.log(&task.id, LogLevel::Info, "AI summary generated").await;
            summary
        }
        Err(e) => {
            ctx.log(&task.id, LogLevel::Warn, &format!("AI analysis failed: {e}"))
                .await;
            "AI analysis unavailable".to_string()
        }
    };

    let text = items.join("\n");
    let scraped = json!({
        "url": url,
        "selector": if selector.is_empty() { "all paragraphs" } else { selector },
        "items_found": items.len(),
        "sample_data": items.iter().take(MAX_SAMPLE).collect::<Vec<_>>(),
        "text": text,
        "ai_summary": ai_summary,
        "status": "completed",
        "timestamp": timestamp(),
    });

    let artifact = ArtifactOutput::json(task, "_scrape", "scrape.json", &scraped);
    let result = json!({
        "ok": true,
        "job_id": task.job_id,
        "executor": "scraper",
        "text": text,
        "status": "completed",
        "result": scraped,
    });

    Ok(AgentOutcome::Complete {
        result,
        artifact: Some(artifact),
    })
}

async fn fetch(ctx: &AgentContext, url: &str) -> Result<String, String> {
    let response = ctx
        .http
        .get(url)
        .header(reqwest::header::USER_AGENT, USER_AGENT)
        .timeout(FETCH_TIMEOUT)
        .send()
        .await
        .map_err(|e| format!("Failed to fetch URL: {e}"))?;

    let response = response
        .error_for_status()
        .map_err(|e| format!("Failed to fetch URL: {e}"))?;

    response
        .text()
        .await
        .map_err(|e| format!("Failed to read response body: {e}"))
}

/// Extract text items: selector matches when given, otherwise paragraphs
/// longer than 30 chars (falling back to the first paragraphs unfiltered).
fn extract_items(body: &str, selector: &str) -> Result<Vec<String>, String> {
    let document = Html::parse_document(body);

    if !selector.is_empty() {
        let parsed =
            Selector::parse(selector).map_err(|e| format!("Invalid selector '{selector}': {e}"))?;
        return Ok(document
            .select(&parsed)
            .map(element_text)
            .filter(|text| !text.is_empty())
            .take(MAX_ITEMS)
            .collect());
    }

    let paragraphs = Selector::parse("p").expect("static selector is valid");
    let all: Vec<String> = document
        .select(&paragraphs)
        .map(element_text)
        .filter(|text| !text.is_empty())
        .collect();

    let filtered: Vec<String> = all
        .iter()
        .filter(|text| text.len() > 30)
        .take(MAX_ITEMS)
        .cloned()
        .collect();
    if filtered.is_empty() {
        return Ok(all.into_iter().take(MAX_UNFILTERED).collect());
    }
    Ok(filtered)
}

fn element_text(element: scraper::ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn failure_artifact(task: &TaskInfo, url: &str, error: &str) -> ArtifactOutput {
    let data = json!({
        "url": url,
        "error": error,
        "status": "failed",
        "timestamp": timestamp(),
    });
    ArtifactOutput::json(task, "_scrape", "scrape.json", &data)
}

fn timestamp() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><body>
        <p>short</p>
        <p>Hello world paragraph one that is sufficiently long.</p>
        <div class="item">alpha</div>
        <div class="item">beta</div>
    </body></html>"#;

    #[test]
    fn paragraphs_are_filtered_by_length() {
        let items = extract_items(PAGE, "").unwrap();
        assert_eq!(
            items,
            vec!["Hello world paragraph one that is sufficiently long."]
        );
    }

    #[test]
    fn selector_extracts_matching_elements() {
        let items = extract_items(PAGE, "div.item").unwrap();
        assert_eq!(items, vec!["alpha", "beta"]);
    }

    #[test]
    fn short_paragraphs_fall_back_unfiltered() {
        let page = "<html><body><p>one</p><p>two</p></body></html>";
        let items = extract_items(page, "").unwrap();
        assert_eq!(items, vec!["one", "two"]);
    }

    #[test]
    fn invalid_selector_is_an_error() {
        assert!(extract_items(PAGE, ":::nope").is_err());
    }

    #[test]
    fn item_cap_is_enforced() {
        let many: String = (0..50)
            .map(|i| format!("<p>paragraph number {i} padded to be long enough to pass</p>"))
            .collect();
        let page = format!("<html><body>{many}</body></html>");
        let items = extract_items(&page, "").unwrap();
        assert_eq!(items.len(), 30);
    }
}
