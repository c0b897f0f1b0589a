//! Subtitle translation.
//!
//! Two paths exist: the plain batched translator here, which translates
//! fixed windows of segments one-to-one, and the sentence-aware path in
//! [`sentence`], which regroups fragments into sentences before
//! translating. Both parse the LLM's numbered-line output with the same
//! tolerant parser and both keep the source text when the model fails —
//! segments are never dropped.

pub mod proofread;
pub mod rules;
pub mod sentence;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::Config;
use crate::error::{Result, SubGenError};
use crate::llm::{ChatMessage, ChatParams, LlmClient};
use crate::subtitle::Segment;

use rules::{language_name, load_translation_rules};

/// Cumulative progress callback: `(completed_units, total_units)`.
pub type TranslateProgress<'a> = &'a (dyn Fn(usize, usize) + Send + Sync);

pub(crate) fn chat_params(config: &Config) -> ChatParams {
    ChatParams {
        temperature: config.translation.temperature.clamp(0.0, 0.3),
        timeout: std::time::Duration::from_secs(config.translation.timeout_secs),
    }
}

/// Build the system prompt, injecting per-language rules when present.
pub(crate) fn build_system_prompt(config: &Config) -> String {
    let source = language_name(&config.output.source_language);
    let target = language_name(&config.output.target_language);
    let max_chars = config.output.max_chars_per_line;

    let mut prompt = format!(
        "You are a professional subtitle translator. Translate {} subtitles into {}.\n\
         \n\
         Requirements:\n\
         1. Preserve the original meaning while ensuring natural, fluent expression\n\
         2. Keep subtitles concise for screen display (max {} characters per line)\n\
         3. Maintain consistency across context\n\
         4. Keep proper nouns (names, places) consistent throughout\n\
         5. Use colloquial expressions, avoid overly formal language\n",
        source, target, max_chars
    );

    if let Some(rules) = load_translation_rules(
        &config.output.target_language,
        config.advanced.rules_dir.as_deref(),
    ) {
        prompt.push_str(&format!(
            "\n{} translation rules (MUST follow strictly):\n{}\n",
            target, rules
        ));
    }

    prompt.push_str(
        "\nOutput format:\n\
         - One line per input item, in the form `N: translated text`\n\
         - Do not add explanations or any other text\n\
         - Output exactly one line for every input index",
    );
    prompt
}

/// Parse numbered `N: text` lines into an index → text mapping of size
/// `expected`. Tolerates blank lines, surrounding whitespace, and the
/// enumerator styles LLMs actually emit (`1.`, `1)`, `1:`, `1、`).
/// Unnumbered lines fill the first free slot in order.
pub(crate) fn parse_numbered_lines(text: &str, expected: usize) -> Vec<Option<String>> {
    let mut result: Vec<Option<String>> = vec![None; expected];

    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }

        let mut assigned = false;
        let digits: String = line.chars().take_while(|c| c.is_ascii_digit()).collect();
        if !digits.is_empty() {
            let rest = &line[digits.len()..];
            for separator in [": ", ":", ". ", ") ", "、", "．"] {
                if let Some(content) = rest.strip_prefix(separator) {
                    if let Ok(index) = digits.parse::<usize>() {
                        if index >= 1 && index <= expected && result[index - 1].is_none() {
                            result[index - 1] = Some(content.trim().to_string());
                            assigned = true;
                        }
                    }
                    break;
                }
            }
        }

        if !assigned {
            if let Some(slot) = result.iter_mut().find(|slot| slot.is_none()) {
                *slot = Some(line.to_string());
            }
        }
    }

    result
}

/// Plain batched translation: fixed windows of segments, one output line
/// per input segment. Failed batches keep the source text.
pub async fn translate_segments(
    segments: &mut [Segment],
    config: &Config,
    llm: &dyn LlmClient,
    cancel: &CancellationToken,
    on_progress: TranslateProgress<'_>,
) -> Result<()> {
    let total = segments.len();
    if total == 0 {
        return Ok(());
    }

    let batch_size = config.advanced.translation_batch_size.max(1);
    let system_prompt = build_system_prompt(config);
    let params = chat_params(config);

    let mut completed = 0usize;
    on_progress(0, total);

    for batch in segments.chunks_mut(batch_size) {
        if cancel.is_cancelled() {
            return Err(SubGenError::Cancelled);
        }

        let texts: Vec<String> = batch.iter().map(|s| s.text.trim().to_string()).collect();
        if texts.iter().all(|t| t.is_empty()) {
            for segment in batch.iter_mut() {
                segment.translated = Some(String::new());
            }
            completed += texts.len();
            on_progress(completed, total);
            continue;
        }

        let numbered: String = texts
            .iter()
            .enumerate()
            .map(|(i, t)| format!("{}: {}", i + 1, t))
            .collect::<Vec<_>>()
            .join("\n");
        let user_prompt = format!(
            "Translate the following {} subtitles (one line per index):\n\n{}",
            texts.len(),
            numbered
        );

        let messages = [
            ChatMessage::system(system_prompt.clone()),
            ChatMessage::user(user_prompt),
        ];
        match llm.chat(&messages, &params).await {
            Ok(response) => {
                let parsed = parse_numbered_lines(&response, batch.len());
                for (segment, translation) in batch.iter_mut().zip(parsed) {
                    segment.translated = Some(match translation {
                        Some(text) if !text.is_empty() => text,
                        _ => segment.text.clone(),
                    });
                }
            }
            Err(e) => {
                warn!("translation batch failed, keeping source text: {}", e);
                for segment in batch.iter_mut() {
                    segment.translated = Some(segment.text.clone());
                }
            }
        }

        completed += batch.len();
        on_progress(completed, total);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_numbered_lines_basic() {
        let parsed = parse_numbered_lines("1: 你好\n2: 再见", 2);
        assert_eq!(parsed[0].as_deref(), Some("你好"));
        assert_eq!(parsed[1].as_deref(), Some("再见"));
    }

    #[test]
    fn test_parse_tolerates_noise() {
        let parsed = parse_numbered_lines("\n  1.  first \n\n2) second\n3、third\n", 3);
        assert_eq!(parsed[0].as_deref(), Some("first"));
        assert_eq!(parsed[1].as_deref(), Some("second"));
        assert_eq!(parsed[2].as_deref(), Some("third"));
    }

    #[test]
    fn test_parse_missing_tail() {
        let parsed = parse_numbered_lines("1: only one", 3);
        assert_eq!(parsed[0].as_deref(), Some("only one"));
        assert!(parsed[1].is_none());
        assert!(parsed[2].is_none());
    }

    #[test]
    fn test_parse_unnumbered_fills_in_order() {
        let parsed = parse_numbered_lines("premier\ndeuxième", 2);
        assert_eq!(parsed[0].as_deref(), Some("premier"));
        assert_eq!(parsed[1].as_deref(), Some("deuxième"));
    }

    #[test]
    fn test_parse_out_of_range_index_ignored_as_number() {
        let parsed = parse_numbered_lines("7: stray", 2);
        // The index is out of range, but the line still fills a free slot.
        assert_eq!(parsed[0].as_deref(), Some("7: stray"));
    }

    #[test]
    fn test_system_prompt_mentions_languages() {
        let mut config = Config::default();
        config.output.source_language = "en".to_string();
        config.output.target_language = "ja".to_string();
        let prompt = build_system_prompt(&config);
        assert!(prompt.contains("English"));
        assert!(prompt.contains("Japanese"));
        assert!(prompt.contains("N: translated text"));
    }
}
