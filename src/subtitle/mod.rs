//! Subtitle data model and `.project` file persistence.
//!
//! A [`SubtitleProject`] is the unit the engine passes between stages:
//! ordered segments, a style profile, metadata, and processing state.

pub mod ass;
pub mod srt;
pub mod vtt;

use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, SubGenError};
use crate::styles::StyleProfile;

/// Current `.project` file format version.
pub const PROJECT_VERSION: u32 = 2;
/// Versions the loader still understands.
pub const COMPATIBLE_VERSIONS: &[u32] = &[1, 2];

/// Tolerance when checking that word spans sit inside their segment.
pub const WORD_SPAN_TOLERANCE_SEC: f64 = 0.05;

/// Decompose a second count into `(hours, minutes, seconds, subseconds)`
/// at the requested sub-second resolution (1000 for SRT/WebVTT
/// milliseconds, 100 for ASS centiseconds), rounding to the nearest unit.
/// All three encoder timestamp formats are thin wrappers over this.
pub(crate) fn split_seconds(seconds: f64, subsec_per_sec: u64) -> (u64, u64, u64, u64) {
    let total = (seconds * subsec_per_sec as f64).round() as u64;
    let per_minute = 60 * subsec_per_sec;
    let per_hour = 60 * per_minute;
    (
        total / per_hour,
        (total % per_hour) / per_minute,
        (total % per_minute) / subsec_per_sec,
        total % subsec_per_sec,
    )
}

/// A single recognized token with its time span.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Word {
    pub text: String,
    pub start: f64,
    pub end: f64,
}

impl Word {
    pub fn new(text: impl Into<String>, start: f64, end: f64) -> Self {
        Self {
            text: text.into(),
            start,
            end,
        }
    }
}

/// A time-stamped chunk of transcribed (and possibly translated) text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translated: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub words: Vec<Word>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_speech_prob: Option<f64>,
}

impl Segment {
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_translation(mut self, translated: impl Into<String>) -> Self {
        self.translated = Some(translated.into());
        self
    }

    pub fn with_words(mut self, words: Vec<Word>) -> Self {
        self.words = words;
        self
    }

    /// Check the structural invariants: non-negative ordered span, words in
    /// non-decreasing start order and contained in the segment span.
    pub fn validate(&self) -> Result<()> {
        if !self.start.is_finite() || !self.end.is_finite() || self.start < 0.0 {
            return Err(SubGenError::BadInput(format!(
                "segment has invalid span [{}, {}]",
                self.start, self.end
            )));
        }
        if self.end < self.start {
            return Err(SubGenError::BadInput(format!(
                "segment ends before it starts [{}, {}]",
                self.start, self.end
            )));
        }
        let mut prev_start = f64::NEG_INFINITY;
        for word in &self.words {
            if word.start < prev_start {
                return Err(SubGenError::BadInput(format!(
                    "word '{}' out of order at {}",
                    word.text, word.start
                )));
            }
            prev_start = word.start;
            if word.start < self.start - WORD_SPAN_TOLERANCE_SEC
                || word.end > self.end + WORD_SPAN_TOLERANCE_SEC
            {
                return Err(SubGenError::BadInput(format!(
                    "word '{}' [{}, {}] outside segment [{}, {}]",
                    word.text, word.start, word.end, self.start, self.end
                )));
            }
        }
        Ok(())
    }
}

/// Where the segments in a project originally came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceFrom {
    #[default]
    Transcribed,
    Cache,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ProjectMetadata {
    pub video_path: String,
    pub source_lang: String,
    pub target_lang: String,
    pub whisper_provider: String,
    pub llm_provider: String,
    pub llm_model: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub modified_at: String,
    #[serde(default)]
    pub source_from: SourceFrom,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ProjectState {
    pub is_transcribed: bool,
    pub is_translated: bool,
    pub is_proofread: bool,
}

/// Top-level subtitle project container.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SubtitleProject {
    pub version: u32,
    pub segments: Vec<Segment>,
    pub style: StyleProfile,
    pub metadata: ProjectMetadata,
    pub state: ProjectState,
}

impl SubtitleProject {
    pub fn new(segments: Vec<Segment>, style: StyleProfile, metadata: ProjectMetadata) -> Self {
        let is_transcribed = !segments.is_empty();
        let is_translated = is_transcribed
            && segments
                .iter()
                .all(|s| s.translated.as_deref().is_some_and(|t| !t.is_empty()));
        Self {
            version: PROJECT_VERSION,
            segments,
            style,
            metadata,
            state: ProjectState {
                is_transcribed,
                is_translated,
                is_proofread: false,
            },
        }
    }

    /// Validate the project-level invariants: segment ordering, per-segment
    /// word containment, and the state implications from the data model.
    pub fn validate(&self) -> Result<()> {
        let mut prev = f64::NEG_INFINITY;
        for segment in &self.segments {
            segment.validate()?;
            if segment.start < prev {
                return Err(SubGenError::BadInput(format!(
                    "segments out of order at {}",
                    segment.start
                )));
            }
            prev = segment.start;
        }
        if self.state.is_translated {
            let incomplete = self
                .segments
                .iter()
                .any(|s| s.translated.as_deref().map_or(true, str::is_empty));
            if incomplete {
                return Err(SubGenError::BadInput(
                    "project marked translated but a segment has no translation".to_string(),
                ));
            }
        }
        if self.state.is_proofread && !self.state.is_translated {
            return Err(SubGenError::BadInput(
                "project marked proofread but not translated".to_string(),
            ));
        }
        Ok(())
    }

    /// Save to a `.project` JSON file. Writes to a sibling temp file and
    /// renames so an interrupted save never corrupts an existing project.
    pub fn save(&mut self, path: &Path) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        if self.metadata.created_at.is_empty() {
            self.metadata.created_at = now.clone();
        }
        self.metadata.modified_at = now;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SubGenError::io(parent, e))?;
        }
        let content = serde_json::to_string_pretty(self)?;

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| SubGenError::io(dir, e))?;
        use std::io::Write;
        tmp.write_all(content.as_bytes())
            .map_err(|e| SubGenError::io(path, e))?;
        tmp.persist(path)
            .map_err(|e| SubGenError::io(path, e.error))?;
        Ok(())
    }

    /// Load from a `.project` JSON file, warning on unknown versions.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| SubGenError::io(path, e))?;
        let project: SubtitleProject = serde_json::from_str(&content)?;
        if !COMPATIBLE_VERSIONS.contains(&project.version) {
            warn!(
                "project file version {} may be incompatible (supported: {:?})",
                project.version, COMPATIBLE_VERSIONS
            );
        }
        Ok(project)
    }
}
