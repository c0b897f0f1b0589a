//! Second-pass proofreading with rolling whole-document context.

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::Config;
use crate::error::{Result, SubGenError};
use crate::llm::{ChatMessage, LlmClient};
use crate::subtitle::Segment;

use super::rules::language_name;
use super::{chat_params, parse_numbered_lines, TranslateProgress};

fn build_proofread_system_prompt(config: &Config) -> String {
    let target = language_name(&config.output.target_language);
    format!(
        "You are a professional subtitle proofreader for {} subtitles.\n\
         \n\
         You will receive numbered (source -> translation) pairs. Review each \
         translation for accuracy, fluency, consistent character names and \
         terminology, and consistent tone with the surrounding dialogue.\n\
         \n\
         Output format:\n\
         - One line per input item, in the form `N: corrected translation`\n\
         - If a translation needs no change, repeat it unchanged\n\
         - Output exactly one line for every input index, nothing else",
        target
    )
}

/// Proofread every segment's translation in windows, carrying a rolling
/// context of previously finalized pairs. Corrections are written back by
/// index; a window whose call fails or comes back short keeps the
/// existing translations, mirroring the translation pass-through policy.
/// Returns whether every window succeeded.
pub async fn proofread_segments(
    segments: &mut [Segment],
    config: &Config,
    llm: &dyn LlmClient,
    cancel: &CancellationToken,
    on_progress: TranslateProgress<'_>,
) -> Result<bool> {
    let total = segments.len();
    if total == 0 {
        return Ok(true);
    }

    let window_size = config.advanced.proofread_batch_size.max(1);
    let context_budget = config.advanced.proofread_context_chars;
    let system_prompt = build_proofread_system_prompt(config);
    let params = chat_params(config);

    // Rolling context of finalized (source, translation) lines, trimmed
    // from the front to stay under the character budget.
    let mut context: Vec<String> = Vec::new();
    let mut context_chars = 0usize;

    on_progress(0, total);

    let mut all_windows_ok = true;
    let mut start = 0usize;
    while start < total {
        if cancel.is_cancelled() {
            return Err(SubGenError::Cancelled);
        }
        let end = (start + window_size).min(total);
        let window = &mut segments[start..end];

        let mut user_prompt = String::new();
        if !context.is_empty() {
            user_prompt.push_str("Already finalized subtitles, for consistency:\n");
            for line in &context {
                user_prompt.push_str(line);
                user_prompt.push('\n');
            }
            user_prompt.push('\n');
        }
        user_prompt.push_str(&format!(
            "Proofread the following {} translations:\n\n",
            window.len()
        ));
        for (i, segment) in window.iter().enumerate() {
            user_prompt.push_str(&format!(
                "{}: {} -> {}\n",
                i + 1,
                segment.text.trim(),
                segment.translated.as_deref().unwrap_or("").trim()
            ));
        }

        let messages = [
            ChatMessage::system(system_prompt.clone()),
            ChatMessage::user(user_prompt),
        ];
        let chat = llm.chat(&messages, &params);
        let response = tokio::select! {
            result = chat => result,
            _ = cancel.cancelled() => return Err(SubGenError::Cancelled),
        };

        match response {
            Ok(text) => {
                let corrections = parse_numbered_lines(&text, window.len());
                let missing = corrections.iter().filter(|c| c.is_none()).count();
                if missing > 0 {
                    warn!(
                        "proofread window returned {} of {} corrections; keeping originals for the rest",
                        window.len() - missing,
                        window.len()
                    );
                }
                for (segment, correction) in window.iter_mut().zip(corrections) {
                    if let Some(corrected) = correction.filter(|c| !c.is_empty()) {
                        segment.translated = Some(corrected);
                    }
                }
            }
            Err(SubGenError::Cancelled) => return Err(SubGenError::Cancelled),
            Err(e) => {
                warn!(
                    "proofread window {}..{} failed, keeping existing translations: {}",
                    start, end, e
                );
                all_windows_ok = false;
            }
        }

        for segment in window.iter() {
            let line = format!(
                "{} -> {}",
                segment.text.trim(),
                segment.translated.as_deref().unwrap_or("").trim()
            );
            context_chars += line.chars().count();
            context.push(line);
        }
        while context_chars > context_budget && !context.is_empty() {
            context_chars -= context[0].chars().count();
            context.remove(0);
        }

        on_progress(end, total);
        start = end;
    }

    Ok(all_windows_ok)
}
