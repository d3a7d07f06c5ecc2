//! Summarizer agent: AI summary with an extractive fallback.

use anyhow::Result;
use serde_json::{Value, json};

use relay_db::models::LogLevel;

use super::{AgentContext, AgentOutcome, ArtifactOutput, TaskInfo};
use crate::ai::GenerateOptions;

/// Input text beyond this many chars is dropped before prompting.
const MAX_INPUT_CHARS: usize = 6_000;
const DEFAULT_MAX_SENTENCES: usize = 3;
/// Rough words-per-sentence divisor used to turn a word budget into a
/// sentence budget for the extractive fallback.
const WORDS_PER_SENTENCE: usize = 20;

pub async fn run(ctx: &AgentContext, task: &TaskInfo, payload: &Value) -> Result<AgentOutcome> {
    let text = payload.get("text").and_then(Value::as_str).unwrap_or("");
    let max_words = payload
        .get("max_words")
        .and_then(Value::as_u64)
        .map(|w| w as usize);
    let max_sentences = payload
        .get("max_sentences")
        .and_then(Value::as_u64)
        .map(|s| s as usize)
        .unwrap_or(DEFAULT_MAX_SENTENCES);

    let (summary, original_length) = if text.is_empty() {
        ("No text provided for summarization.".to_string(), 0)
    } else {
        let truncated: String = text.chars().take(MAX_INPUT_CHARS).collect();
        let constraint = match max_words {
            Some(words) => format!("in at most {words} words"),
            None => format!("in {max_sentences} sentences or less"),
        };
        let prompt = format!(
            "Summarize the following text {constraint}. Be concise and capture the key points:\n\n{truncated}"
        );

        let summary = match ctx
            .ai
            .generate(
                &prompt,
                &GenerateOptions::for_task("summarizer")
                    .temperature(0.5)
                    .max_tokens(300),
            )
            .await
        {
            Ok(summary) => {
                ctx.log(&task.id, LogLevel::Info, "AI summarization completed")
                    .await;
                summary
            }
            Err(e) => {
                ctx.log(
                    &task.id,
                    LogLevel::Warn,
                    &format!("AI summarization failed, using fallback: {e}"),
                )
                .await;
                let budget = sentence_budget(max_words, max_sentences);
                extractive_summary(text, budget)
            }
        };
        (summary, text.chars().count())
    };

    let body = json!({"summary": summary, "original_length": original_length});
    let artifact = ArtifactOutput::json(task, "_summary", "summary.json", &body);
    let result = json!({
        "ok": true,
        "job_id": task.job_id,
        "executor": "summarizer",
        "summary": summary,
        "original_length": original_length,
    });

    Ok(AgentOutcome::Complete {
        result,
        artifact: Some(artifact),
    })
}

/// Sentences to keep: derived from the word budget when one was given.
fn sentence_budget(max_words: Option<usize>, max_sentences: usize) -> usize {
    match max_words {
        Some(words) => (words / WORDS_PER_SENTENCE).max(1),
        None => max_sentences.max(1),
    }
}

/// Take the first N sentences, splitting on sentence punctuation.
fn extractive_summary(text: &str, max_sentences: usize) -> String {
    let sentences: Vec<&str> = text
        .split(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .take(max_sentences)
        .collect();
    if sentences.is_empty() {
        return String::new();
    }
    format!("{}.", sentences.join(". "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extractive_summary_takes_first_sentences() {
        let text = "First point. Second one! Third here? Fourth ignored.";
        assert_eq!(
            extractive_summary(text, 3),
            "First point. Second one. Third here."
        );
    }

    #[test]
    fn extractive_summary_of_short_text() {
        assert_eq!(extractive_summary("Only one sentence.", 3), "Only one sentence.");
        assert_eq!(extractive_summary("", 3), "");
    }

    #[test]
    fn word_budget_overrides_sentence_budget() {
        assert_eq!(sentence_budget(Some(100), 3), 5);
        assert_eq!(sentence_budget(Some(10), 3), 1);
        assert_eq!(sentence_budget(None, 4), 4);
    }
}
