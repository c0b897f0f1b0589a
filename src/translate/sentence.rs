//! Sentence-aware translation.
//!
//! Transcription fragments are regrouped into sentences, translated as
//! batched units with rolling context, and the translations are
//! redistributed over the source word timestamps so subtitle timing stays
//! accurate. Every source word ends up in exactly one output segment.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Result, SubGenError};
use crate::llm::{ChatMessage, LlmClient};
use crate::subtitle::{Segment, Word};

use super::rules::language_name;
use super::{build_system_prompt, chat_params, parse_numbered_lines, TranslateProgress};

/// Punctuation that closes a sentence in the supported source languages.
const TERMINAL_PUNCTUATION: &[char] = &['.', '?', '!', '。', '？', '！', '…'];
/// Trailing characters to look through when checking for terminal
/// punctuation (closing quotes and brackets).
const CLOSERS: &[char] = &['"', '\'', '」', '』', '）', ')', ']'];

/// A contiguous run of segments forming one sentence.
#[derive(Debug, Clone)]
pub struct SentenceGroup {
    pub segments: Vec<Segment>,
}

impl SentenceGroup {
    pub fn source_text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.trim())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn words(&self) -> Vec<Word> {
        self.segments.iter().flat_map(|s| s.words.clone()).collect()
    }

    pub fn start(&self) -> f64 {
        self.segments.first().map(|s| s.start).unwrap_or(0.0)
    }

    pub fn end(&self) -> f64 {
        self.segments.last().map(|s| s.end).unwrap_or(0.0)
    }

    fn char_count(&self) -> usize {
        self.segments.iter().map(|s| s.text.chars().count()).sum()
    }
}

fn ends_sentence(text: &str) -> bool {
    text.trim_end()
        .trim_end_matches(CLOSERS)
        .ends_with(TERMINAL_PUNCTUATION)
}

/// Partition segments into sentence groups, greedily left to right.
///
/// A group is closed when its last segment ends with terminal punctuation,
/// when the silence gap to the next segment exceeds the configured
/// maximum, or when appending would blow the size or character budget.
pub fn group_segments(segments: Vec<Segment>, config: &Config) -> Vec<SentenceGroup> {
    let max_gap = config.advanced.sentence_max_gap_sec;
    let max_size = config.advanced.sentence_max_group_size.max(1);
    let char_budget = config.advanced.sentence_char_budget.max(1);

    let mut groups: Vec<SentenceGroup> = Vec::new();
    let mut current: Vec<Segment> = Vec::new();

    for segment in segments {
        if let Some(last) = current.last() {
            let gap = segment.start - last.end;
            let chars: usize = current.iter().map(|s| s.text.chars().count()).sum();
            let closed = ends_sentence(&last.text)
                || gap > max_gap
                || current.len() >= max_size
                || chars + segment.text.chars().count() > char_budget;
            if closed {
                groups.push(SentenceGroup {
                    segments: std::mem::take(&mut current),
                });
            }
        }
        current.push(segment);
    }
    if !current.is_empty() {
        groups.push(SentenceGroup { segments: current });
    }
    groups
}

/// Translate segments sentence-aware, returning the redistributed segment
/// sequence. Progress is cumulative over groups.
pub async fn translate_sentence_aware(
    segments: Vec<Segment>,
    config: &Config,
    llm: &dyn LlmClient,
    cancel: &CancellationToken,
    on_progress: TranslateProgress<'_>,
) -> Result<Vec<Segment>> {
    if segments.is_empty() {
        return Ok(segments);
    }

    let groups = group_segments(segments, config);
    let total_groups = groups.len();
    on_progress(0, total_groups);

    let translations =
        translate_groups(&groups, config, llm, cancel, total_groups, on_progress).await?;

    redistribute_groups(groups, translations, config, llm, cancel).await
}

/// Batched group translation with rolling context. Returns one translation
/// per group; failed groups carry their source text (pass-through).
async fn translate_groups(
    groups: &[SentenceGroup],
    config: &Config,
    llm: &dyn LlmClient,
    cancel: &CancellationToken,
    total_groups: usize,
    on_progress: TranslateProgress<'_>,
) -> Result<Vec<String>> {
    let batch_size = config.advanced.translation_batch_size.max(1);
    let context_groups = config.advanced.translation_context_groups;
    let retries = config.advanced.translation_retries;
    let system_prompt = build_system_prompt(config);
    let params = chat_params(config);

    let mut translations: Vec<String> = Vec::with_capacity(groups.len());
    // Rolling (source, target) pairs from already-finalized groups.
    let mut context: Vec<(String, String)> = Vec::new();

    for batch in groups.chunks(batch_size) {
        if cancel.is_cancelled() {
            return Err(SubGenError::Cancelled);
        }

        let sources: Vec<String> = batch.iter().map(|g| g.source_text()).collect();
        let mut results: Vec<Option<String>> =
            request_batch(&sources, &context, &system_prompt, llm, &params, cancel).await?;

        // Retry the missing tail as fresh sub-batches.
        let mut attempt = 0;
        while results.iter().any(Option::is_none) && attempt < retries {
            attempt += 1;
            let missing: Vec<usize> = results
                .iter()
                .enumerate()
                .filter(|(_, r)| r.is_none())
                .map(|(i, _)| i)
                .collect();
            debug!(
                "retrying {} untranslated groups (attempt {}/{})",
                missing.len(),
                attempt,
                retries
            );
            let retry_sources: Vec<String> = missing.iter().map(|&i| sources[i].clone()).collect();
            let retry_results =
                request_batch(&retry_sources, &context, &system_prompt, llm, &params, cancel)
                    .await?;
            for (slot, result) in missing.into_iter().zip(retry_results) {
                if result.is_some() {
                    results[slot] = result;
                }
            }
        }

        for (source, result) in sources.into_iter().zip(results) {
            let translation = match result {
                Some(text) if !text.is_empty() => text,
                _ => {
                    warn!("group left untranslated after retries, keeping source text");
                    source.clone()
                }
            };
            context.push((source, translation.clone()));
            if context.len() > context_groups {
                let excess = context.len() - context_groups;
                context.drain(..excess);
            }
            translations.push(translation);
        }

        on_progress(translations.len(), total_groups);
    }

    Ok(translations)
}

async fn request_batch(
    sources: &[String],
    context: &[(String, String)],
    system_prompt: &str,
    llm: &dyn LlmClient,
    params: &crate::llm::ChatParams,
    cancel: &CancellationToken,
) -> Result<Vec<Option<String>>> {
    let mut user_prompt = String::new();
    if !context.is_empty() {
        user_prompt.push_str("Previously translated context (source|translation):\n");
        for (source, target) in context {
            user_prompt.push_str(&format!("{}|{}\n", source, target));
        }
        user_prompt.push('\n');
    }
    user_prompt.push_str(&format!(
        "Translate the following {} sentences (one line per index):\n\n",
        sources.len()
    ));
    for (i, source) in sources.iter().enumerate() {
        user_prompt.push_str(&format!("{}: {}\n", i + 1, source));
    }

    let messages = [
        ChatMessage::system(system_prompt.to_string()),
        ChatMessage::user(user_prompt),
    ];

    let chat = llm.chat(&messages, params);
    let response = tokio::select! {
        result = chat => result,
        _ = cancel.cancelled() => return Err(SubGenError::Cancelled),
    };

    match response {
        Ok(text) => Ok(parse_numbered_lines(&text, sources.len())),
        Err(SubGenError::Cancelled) => Err(SubGenError::Cancelled),
        Err(e) => {
            warn!("batch translation call failed: {}", e);
            Ok(vec![None; sources.len()])
        }
    }
}

/// Redistribute each group's translation over its word timestamps. Split
/// requests are independent, so they run concurrently under the configured
/// limit and are reassembled in input order.
async fn redistribute_groups(
    groups: Vec<SentenceGroup>,
    translations: Vec<String>,
    config: &Config,
    llm: &dyn LlmClient,
    cancel: &CancellationToken,
) -> Result<Vec<Segment>> {
    debug_assert_eq!(groups.len(), translations.len());

    let semaphore = Arc::new(Semaphore::new(config.advanced.llm_concurrency.max(1)));
    let target_lang = config.output.target_language.clone();
    let max_chars = config.output.max_chars_per_line;
    let params = chat_params(config);

    let mut results: Vec<Option<Vec<Segment>>> = vec![None; groups.len()];
    let mut pending = Vec::new();

    for (index, (group, translation)) in groups.iter().zip(&translations).enumerate() {
        if group.segments.len() == 1 && group.segments[0].words.is_empty() {
            // Single fragment with no word timing: nothing to realign.
            let mut segment = group.segments[0].clone();
            segment.translated = Some(translation.clone());
            results[index] = Some(vec![segment]);
            continue;
        }
        let words = group.words();
        if words.len() < 2 {
            results[index] = Some(vec![merged_segment(group, translation)]);
            continue;
        }
        pending.push((index, group.clone(), translation.clone(), words));
    }

    let mut handles = Vec::with_capacity(pending.len());
    for (index, group, translation, words) in pending {
        let semaphore = Arc::clone(&semaphore);
        let cancel = cancel.clone();
        let split_prompt = build_split_prompt(&translation, &words, &target_lang, max_chars);
        let params = params.clone();

        let handle = async move {
            let _permit = semaphore.acquire().await.expect("semaphore closed");
            if cancel.is_cancelled() {
                return (index, group, translation, None);
            }
            let messages = [ChatMessage::user(split_prompt)];
            let response = tokio::select! {
                result = llm.chat(&messages, &params) => result.ok(),
                _ = cancel.cancelled() => None,
            };
            let parts = response.as_deref().and_then(parse_split_response);
            (index, group, translation, parts)
        };
        handles.push(handle);
    }

    let outcomes = futures_util::future::join_all(handles).await;
    if cancel.is_cancelled() {
        return Err(SubGenError::Cancelled);
    }
    for (index, group, translation, parts) in outcomes {
        let segments = match parts {
            Some(parts) => apply_split(&group, &translation, &parts)
                .unwrap_or_else(|| vec![merged_segment(&group, &translation)]),
            None => vec![merged_segment(&group, &translation)],
        };
        results[index] = Some(segments);
    }

    Ok(results.into_iter().flatten().flatten().collect())
}

/// One subtitle spanning the whole group — the fallback when a split is
/// unavailable or invalid.
pub(crate) fn merged_segment(group: &SentenceGroup, translation: &str) -> Segment {
    let mut segment = Segment::new(group.start(), group.end(), group.source_text());
    segment.translated = Some(translation.to_string());
    segment.words = group.words();
    segment
}

fn build_split_prompt(
    translation: &str,
    words: &[Word],
    target_lang: &str,
    max_chars: usize,
) -> String {
    let numbered_words: String = words
        .iter()
        .enumerate()
        .map(|(i, w)| format!("{}:{}", i + 1, w.text))
        .collect::<Vec<_>>()
        .join(" ");

    format!(
        "Split this {} translation of one spoken sentence into subtitle \
         fragments at natural break points.\n\
         \n\
         The source sentence has {} words, numbered in speaking order:\n\
         {}\n\
         \n\
         Translation to split:\n\
         {}\n\
         \n\
         Rules:\n\
         - Return between 1 and {} fragments, in order\n\
         - Each fragment should be at most {} characters\n\
         - For each fragment output one line `W: fragment`, where W is the \
         number of the LAST source word that fragment covers\n\
         - The W values must be strictly increasing and the final W must \
         be {}\n\
         - Output only those lines",
        language_name(target_lang),
        words.len(),
        numbered_words,
        translation,
        words.len(),
        max_chars,
        words.len(),
    )
}

/// Parse `W: fragment` lines into (last_word_index, fragment) pairs kept
/// in response order.
pub(crate) fn parse_split_response(text: &str) -> Option<Vec<(usize, String)>> {
    let mut parts = Vec::new();
    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        let digits: String = line.chars().take_while(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            continue;
        }
        let rest = line[digits.len()..].trim_start();
        let Some(fragment) = rest.strip_prefix(':') else {
            continue;
        };
        let index: usize = digits.parse().ok()?;
        parts.push((index, fragment.trim().to_string()));
    }
    (!parts.is_empty()).then_some(parts)
}

/// Build the redistributed segments for one group.
///
/// Validation: the word indexes must be strictly increasing and within
/// range; anything else returns `None` and the caller falls back to one
/// group-spanning subtitle. Indexes that stop short of the last word are
/// fine — the remaining words become a final segment carrying the
/// untranslated tail of the translation, so no word is ever dropped.
pub(crate) fn apply_split(
    group: &SentenceGroup,
    translation: &str,
    parts: &[(usize, String)],
) -> Option<Vec<Segment>> {
    let words = group.words();
    let n = words.len();
    if n == 0 || parts.is_empty() || parts.len() > n {
        return None;
    }

    let mut prev = 0usize;
    for &(index, _) in parts {
        if index <= prev || index > n {
            return None;
        }
        prev = index;
    }

    let mut segments = Vec::with_capacity(parts.len() + 1);
    let mut cursor = 0usize; // byte cursor into `translation`
    let mut prev_index = 0usize;

    for (index, fragment) in parts {
        let slice = &words[prev_index..*index];
        let mut segment = Segment::new(
            slice.first().expect("non-empty slice").start,
            slice.last().expect("non-empty slice").end,
            slice
                .iter()
                .map(|w| w.text.as_str())
                .collect::<Vec<_>>()
                .join(" "),
        );
        segment.translated = Some(fragment.clone());
        segment.words = slice.to_vec();
        segments.push(segment);
        prev_index = *index;

        // Track how much of the translation the fragments consumed so a
        // short split can carry the exact remainder.
        if let Some(offset) = translation[cursor..].find(fragment.as_str()) {
            cursor += offset + fragment.len();
        }
    }

    if prev_index < n {
        let slice = &words[prev_index..];
        let remainder = translation[cursor..].trim();
        let mut segment = Segment::new(
            slice.first().expect("non-empty slice").start,
            slice.last().expect("non-empty slice").end,
            slice
                .iter()
                .map(|w| w.text.as_str())
                .collect::<Vec<_>>()
                .join(" "),
        );
        segment.translated = Some(if remainder.is_empty() {
            translation.to_string()
        } else {
            remainder.to_string()
        });
        segment.words = slice.to_vec();
        segments.push(segment);
    }

    Some(segments)
}
