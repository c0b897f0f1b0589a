//! Per-language translation rules.
//!
//! Rules are plain markdown files named by language code. The code is
//! validated before it touches any path, so a hostile `--to` value can
//! never reach the filesystem.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::config::subgen_dir;
use crate::error::{Result, SubGenError};

/// BCP-47-ish language tag: 2-3 letter primary subtag, optional 2-4
/// alphanumeric region/script subtag.
pub fn language_code_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z]{2,3}(-[A-Za-z0-9]{2,4})?$").expect("static regex"))
}

/// Validate a language code, returning `bad-input` for anything that does
/// not match the tag grammar.
pub fn validate_language_code(code: &str) -> Result<()> {
    if language_code_regex().is_match(code) {
        Ok(())
    } else {
        Err(SubGenError::BadInput(format!(
            "invalid language code '{}'",
            code
        )))
    }
}

fn rules_dirs(configured: Option<&Path>) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(dir) = configured {
        dirs.push(dir.to_path_buf());
    }
    dirs.push(PathBuf::from("rules"));
    dirs.push(subgen_dir().join("rules"));
    dirs
}

/// Load translation rules for a target language.
///
/// Lookup priority inside each candidate directory: exact code
/// (`zh-TW.md`), language family (`zh.md`), then `default.md`. Level-1
/// markdown headings are stripped before the text is injected into a
/// prompt.
pub fn load_translation_rules(lang_code: &str, configured_dir: Option<&Path>) -> Option<String> {
    if validate_language_code(lang_code).is_err() {
        warn!("refusing to load rules for invalid language code");
        return None;
    }

    let family = lang_code.split('-').next().unwrap_or(lang_code);
    let file_names = [
        format!("{}.md", lang_code),
        format!("{}.md", family),
        "default.md".to_string(),
    ];

    for dir in rules_dirs(configured_dir) {
        for file_name in &file_names {
            let candidate = dir.join(file_name);
            match std::fs::read_to_string(&candidate) {
                Ok(content) => {
                    debug!("loaded translation rules from {}", candidate.display());
                    return Some(strip_headings(&content));
                }
                Err(_) => continue,
            }
        }
    }
    None
}

fn strip_headings(content: &str) -> String {
    content
        .lines()
        .filter(|line| !line.starts_with("# "))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Display name used in prompts; falls back to the code itself.
pub fn language_name(code: &str) -> &str {
    match code {
        "auto" => "the source language",
        "zh" => "Simplified Chinese",
        "zh-TW" => "Traditional Chinese",
        "en" => "English",
        "ja" => "Japanese",
        "ko" => "Korean",
        "fr" => "French",
        "de" => "German",
        "es" => "Spanish",
        "pt" => "Portuguese",
        "ru" => "Russian",
        "ar" => "Arabic",
        "th" => "Thai",
        "vi" => "Vietnamese",
        "it" => "Italian",
        "nl" => "Dutch",
        "pl" => "Polish",
        "tr" => "Turkish",
        "id" => "Indonesian",
        "hi" => "Hindi",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_code_validation() {
        for good in ["en", "zh", "zh-TW", "yue", "pt-BR", "az-Latn"] {
            assert!(validate_language_code(good).is_ok(), "{} should pass", good);
        }
        for bad in [
            "",
            "e",
            "english",
            "zh_TW",
            "../etc",
            "zh-",
            "zh-TWTWX",
            "a b",
            "zh/..",
        ] {
            assert!(validate_language_code(bad).is_err(), "{} should fail", bad);
        }
    }

    #[test]
    fn test_rules_priority() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("default.md"), "# Default\nbe neutral").unwrap();
        std::fs::write(dir.path().join("zh.md"), "# Chinese\nuse 简体").unwrap();
        std::fs::write(dir.path().join("zh-TW.md"), "# Taiwan\nuse 繁體").unwrap();

        assert_eq!(
            load_translation_rules("zh-TW", Some(dir.path())).unwrap(),
            "use 繁體"
        );
        assert_eq!(
            load_translation_rules("zh-HK", Some(dir.path())).unwrap(),
            "use 简体"
        );
        assert_eq!(
            load_translation_rules("fr", Some(dir.path())).unwrap(),
            "be neutral"
        );
    }

    #[test]
    fn test_invalid_code_never_reaches_fs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("default.md"), "rules").unwrap();
        assert!(load_translation_rules("../default", Some(dir.path())).is_none());
    }

    #[test]
    fn test_strip_headings() {
        let content = "# Title\nkeep this\n## subtitle stays\n# Another\nalso this";
        assert_eq!(strip_headings(content), "keep this\n## subtitle stays\nalso this");
    }
}
