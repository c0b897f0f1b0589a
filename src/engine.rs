//! Pipeline engine: audio extract → transcribe → translate → proofread →
//! export.
//!
//! The engine never touches the terminal; all progress flows through a
//! `(stage, current, total)` callback with cumulative counts. It holds a
//! deep-immutable configuration — per-run overrides clone it, and exports
//! never mutate the live config.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{self, CacheStore};
use crate::components::ComponentManager;
use crate::config::Config;
use crate::error::{Result, SubGenError};
use crate::llm::{create_client, LlmClient};
use crate::media::MediaProcessor;
use crate::styles::{validate_hex_color, StyleProfile};
use crate::subtitle::{
    ass, srt, vtt, ProjectMetadata, SourceFrom, Segment, SubtitleProject,
};
use crate::transcribe::{create_recognizer, Recognizer, TranscribeOptions};
use crate::translate::rules::validate_language_code;
use crate::translate::{proofread, sentence, translate_segments};

/// Pipeline stage reported through the progress callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Extracting,
    Transcribing,
    Translating,
    Proofreading,
    Exporting,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Extracting => "extracting",
            Stage::Transcribing => "transcribing",
            Stage::Translating => "translating",
            Stage::Proofreading => "proofreading",
            Stage::Exporting => "exporting",
        }
    }
}

/// `(stage, current, total)` — `current` is cumulative within a stage.
pub type ProgressCallback = Arc<dyn Fn(Stage, usize, usize) + Send + Sync>;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub source_lang: Option<String>,
    pub target_lang: Option<String>,
    pub no_translate: bool,
    pub sentence_aware: bool,
    pub proofread: bool,
    pub proofread_only: bool,
    pub force_transcribe: bool,
}

/// Subtitle output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Srt,
    Vtt,
    Ass,
}

impl ExportFormat {
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "srt" => Ok(Self::Srt),
            "vtt" | "webvtt" => Ok(Self::Vtt),
            "ass" => Ok(Self::Ass),
            other => Err(SubGenError::BadInput(format!(
                "unsupported subtitle format '{}'. Supported: srt, vtt, ass",
                other
            ))),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Srt => "srt",
            Self::Vtt => "vtt",
            Self::Ass => "ass",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedMode {
    Soft,
    Hard,
}

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi", "mov", "wmv", "flv", "webm", "ts", "m2ts"];

/// Temp files registered here are removed on every exit path — success,
/// error, or cancellation — via `Drop`.
struct TempFileGuard {
    paths: Vec<PathBuf>,
    keep: bool,
}

impl TempFileGuard {
    fn new(keep: bool) -> Self {
        Self {
            paths: Vec::new(),
            keep,
        }
    }

    fn register(&mut self, path: PathBuf) {
        self.paths.push(path);
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        for path in &self.paths {
            if path.exists() {
                if let Err(e) = std::fs::remove_file(path) {
                    debug!("could not remove temp file {}: {}", path.display(), e);
                }
            }
        }
    }
}

pub struct SubGenEngine {
    config: Config,
    components: ComponentManager,
    progress: Option<ProgressCallback>,
    cancel: CancellationToken,
    recognizer: Option<Box<dyn Recognizer>>,
    llm: Option<Box<dyn LlmClient>>,
}

impl SubGenEngine {
    pub fn new(config: Config) -> Result<Self> {
        Ok(Self {
            config,
            components: ComponentManager::new()?,
            progress: None,
            cancel: CancellationToken::new(),
            recognizer: None,
            llm: None,
        })
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Inject a recognizer (tests use fakes; production resolves from
    /// config on first use).
    pub fn with_recognizer(mut self, recognizer: Box<dyn Recognizer>) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    pub fn with_llm(mut self, llm: Box<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_components(mut self, components: ComponentManager) -> Self {
        self.components = components;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn report(&self, stage: Stage, current: usize, total: usize) {
        if let Some(progress) = &self.progress {
            progress(stage, current, total);
        }
    }

    fn ensure_recognizer(&mut self, config: &Config) -> Result<()> {
        if self.recognizer.is_none() {
            self.recognizer = Some(create_recognizer(&config.whisper, &self.components)?);
        }
        Ok(())
    }

    fn ensure_llm(&mut self, config: &Config) -> Result<()> {
        if self.llm.is_none() {
            self.llm = Some(create_client(&config.translation)?);
        }
        Ok(())
    }

    fn media_processor(&self) -> Result<MediaProcessor> {
        let ffmpeg = self
            .components
            .find_ffmpeg()
            .ok_or_else(|| SubGenError::MissingComponent {
                id: "ffmpeg".to_string(),
            })?;
        Ok(MediaProcessor::new(ffmpeg))
    }

    /// Per-run effective config: a deep copy of the engine's config with
    /// the run options applied. The engine's own config never changes.
    fn effective_config(&self, options: &RunOptions) -> Result<Config> {
        let mut config = self.config.clone();
        if let Some(target) = &options.target_lang {
            validate_language_code(target)?;
            config.output.target_language = target.clone();
        } else {
            validate_language_code(&config.output.target_language)?;
        }
        if let Some(source) = &options.source_lang {
            if source != "auto" {
                validate_language_code(source)?;
            }
            config.output.source_language = source.clone();
            config.whisper.source_language = source.clone();
        }
        Ok(config)
    }

    /// Full pipeline. Returns the project even when a late stage failed so
    /// the caller can retry just that stage.
    pub async fn run(&mut self, input: &Path, options: &RunOptions) -> Result<SubtitleProject> {
        // The language gate and style validation run before any
        // filesystem access.
        let mut config = self.effective_config(options)?;
        self.resolve_style(&config)?;

        if !input.exists() {
            return Err(SubGenError::BadInput(format!(
                "input file not found: {}",
                input.display()
            )));
        }

        if options.proofread_only {
            return self.run_proofread_only(input, &config).await;
        }

        let mut temp_guard = TempFileGuard::new(config.advanced.keep_temp_files);
        let (segments, source_from, detected_lang) = self
            .obtain_segments(input, &mut config, options, &mut temp_guard)
            .await?;

        // A cache hit carries the language the recognizer detected at
        // transcription time; it supersedes whatever the caller passed.
        if let Some(lang) = detected_lang {
            if !lang.is_empty() && lang != "auto" {
                config.output.source_language = lang.clone();
                config.whisper.source_language = lang;
            }
        }

        let mut project = self.build_project(segments, &config, input, source_from);
        if project.segments.is_empty() {
            return Ok(project);
        }

        if options.no_translate {
            return Ok(project);
        }

        self.translate_in_place(&mut project, &config, options.sentence_aware)
            .await?;

        if options.proofread {
            self.proofread_in_place(&mut project, &config).await?;
        }

        Ok(project)
    }

    /// Transcribe only.
    pub async fn transcribe(
        &mut self,
        input: &Path,
        options: &RunOptions,
    ) -> Result<SubtitleProject> {
        let options = RunOptions {
            no_translate: true,
            proofread: false,
            proofread_only: false,
            ..options.clone()
        };
        self.run(input, &options).await
    }

    /// Translate an existing project's segments.
    pub async fn translate(
        &mut self,
        mut project: SubtitleProject,
        options: &RunOptions,
    ) -> Result<SubtitleProject> {
        let config = self.effective_config(options)?;
        self.translate_in_place(&mut project, &config, options.sentence_aware)
            .await?;
        Ok(project)
    }

    /// Proofread an existing, fully translated project.
    pub async fn proofread(&mut self, mut project: SubtitleProject) -> Result<SubtitleProject> {
        if !project.state.is_translated {
            return Err(SubGenError::BadInput(
                "project has no translations to proofread".to_string(),
            ));
        }
        let config = self.config.clone();
        self.proofread_in_place(&mut project, &config).await?;
        Ok(project)
    }

    async fn translate_in_place(
        &mut self,
        project: &mut SubtitleProject,
        config: &Config,
        sentence_aware: bool,
    ) -> Result<()> {
        self.ensure_llm(config)?;
        let cancel = self.cancel.clone();
        let progress = self.progress.clone();
        let report = move |current: usize, total: usize| {
            if let Some(callback) = &progress {
                callback(Stage::Translating, current, total);
            }
        };
        let llm = self.llm.as_deref().expect("resolved above");

        if sentence_aware {
            let segments = std::mem::take(&mut project.segments);
            project.segments =
                sentence::translate_sentence_aware(segments, config, llm, &cancel, &report)
                    .await?;
        } else {
            translate_segments(&mut project.segments, config, llm, &cancel, &report).await?;
        }

        project.state.is_translated = project
            .segments
            .iter()
            .all(|s| s.translated.as_deref().is_some_and(|t| !t.is_empty()));
        project.metadata.llm_provider = llm.name().to_string();
        project.metadata.llm_model = llm.model().to_string();
        Ok(())
    }

    async fn proofread_in_place(
        &mut self,
        project: &mut SubtitleProject,
        config: &Config,
    ) -> Result<()> {
        self.ensure_llm(config)?;
        let cancel = self.cancel.clone();
        let progress = self.progress.clone();
        let report = move |current: usize, total: usize| {
            if let Some(callback) = &progress {
                callback(Stage::Proofreading, current, total);
            }
        };
        let llm = self.llm.as_deref().expect("resolved above");

        let all_windows_ok =
            proofread::proofread_segments(&mut project.segments, config, llm, &cancel, &report)
                .await?;
        // Only flipped once every window has succeeded; a failed window
        // left its pre-proofread translations in place, and the project is
        // still returned so the caller can retry just this stage.
        if all_windows_ok {
            project.state.is_proofread = true;
        } else {
            warn!("proofreading incomplete, keeping pre-proofread translations");
        }
        Ok(())
    }

    async fn run_proofread_only(
        &mut self,
        input: &Path,
        config: &Config,
    ) -> Result<SubtitleProject> {
        // Proofread-only reads an already translated subtitle file.
        let mut segments = srt::read_srt(input, config.output.bilingual)?;
        if segments.is_empty() {
            return Err(SubGenError::BadInput(format!(
                "no cues found in {}",
                input.display()
            )));
        }
        for segment in &mut segments {
            if segment.translated.is_none() {
                segment.translated = Some(segment.text.clone());
            }
        }

        let mut project = self.build_project(segments, config, input, SourceFrom::Cache);
        project.state.is_translated = true;
        self.proofread_in_place(&mut project, config).await?;
        Ok(project)
    }

    async fn obtain_segments(
        &mut self,
        input: &Path,
        config: &mut Config,
        options: &RunOptions,
        temp_guard: &mut TempFileGuard,
    ) -> Result<(Vec<Segment>, SourceFrom, Option<String>)> {
        // Resolve the audio we will fingerprint and transcribe.
        let is_video = input
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| VIDEO_EXTENSIONS.contains(&e.to_lowercase().as_str()))
            .unwrap_or(false);

        let audio_path = if is_video {
            self.report(Stage::Extracting, 0, 1);
            let temp_dir = config.temp_dir();
            std::fs::create_dir_all(&temp_dir).map_err(|e| SubGenError::io(&temp_dir, e))?;
            let stem = input
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "input".to_string());
            let audio_path = temp_dir.join(format!("{}_audio.wav", stem));
            temp_guard.register(audio_path.clone());

            let media = self.media_processor()?;
            media
                .extract_audio(
                    input,
                    &audio_path,
                    config.advanced.extract_timeout_secs,
                    &self.cancel,
                )
                .await?;
            self.report(Stage::Extracting, 1, 1);
            audio_path
        } else {
            input.to_path_buf()
        };

        // Fingerprint over audio content and the recognition parameters.
        self.ensure_recognizer(config)?;
        let (provider, model) = {
            let recognizer = self.recognizer.as_deref().expect("resolved above");
            (
                recognizer.provider_id().to_string(),
                recognizer.model_id().to_string(),
            )
        };
        let audio_hash = cache::hash_file(&audio_path)?;
        let fingerprint =
            cache::fingerprint(&audio_hash, &provider, &model, &config.whisper.source_language);

        if !options.force_transcribe {
            if let Some(entry) = CacheStore::load(input, &fingerprint)? {
                info!("using cached transcription ({} segments)", entry.segments.len());
                return Ok((entry.segments, SourceFrom::Cache, Some(entry.source_lang)));
            }
        }

        // At most one concurrent build per fingerprint.
        let build_lock = CacheStore::build_lock(&fingerprint);
        let _guard = build_lock.lock().await;

        // Another task may have finished the build while we waited.
        if !options.force_transcribe {
            if let Some(entry) = CacheStore::load(input, &fingerprint)? {
                return Ok((entry.segments, SourceFrom::Cache, Some(entry.source_lang)));
            }
        }

        self.report(Stage::Transcribing, 0, 1);
        let transcribe_options = TranscribeOptions {
            language: Some(config.whisper.source_language.clone()),
        };
        let recognizer = self.recognizer.as_deref().expect("resolved above");
        let output = {
            let attempt = recognizer
                .transcribe(&audio_path, &transcribe_options, &self.cancel)
                .await;
            match attempt {
                Ok(output) => output,
                // One retry on transient transport problems.
                Err(e) if e.is_retryable() => {
                    warn!("transcription failed ({}), retrying once", e);
                    recognizer
                        .transcribe(&audio_path, &transcribe_options, &self.cancel)
                        .await?
                }
                Err(e) => return Err(e),
            }
        };
        self.report(Stage::Transcribing, 1, 1);

        if output.segments.is_empty() {
            return Ok((Vec::new(), SourceFrom::Transcribed, None));
        }

        if let Err(e) = CacheStore::save(
            input,
            &output.segments,
            &provider,
            &model,
            &output.detected_lang,
            &fingerprint,
            options.force_transcribe,
        ) {
            debug!("cache save failed: {}", e);
        }

        Ok((
            output.segments,
            SourceFrom::Transcribed,
            Some(output.detected_lang),
        ))
    }

    fn resolve_style(&self, config: &Config) -> Result<StyleProfile> {
        let mut style = StyleProfile::preset(&config.styles.preset)?;
        if let Some(font) = &config.styles.primary_font {
            style.primary.font_name = font.clone();
        }
        if let Some(color) = &config.styles.primary_color {
            validate_hex_color(color)?;
            style.primary.primary_color = color.clone();
        }
        if let Some(font) = &config.styles.secondary_font {
            style.secondary.font_name = font.clone();
        }
        if let Some(color) = &config.styles.secondary_color {
            validate_hex_color(color)?;
            style.secondary.primary_color = color.clone();
        }
        Ok(style)
    }

    fn build_project(
        &self,
        segments: Vec<Segment>,
        config: &Config,
        input: &Path,
        source_from: SourceFrom,
    ) -> SubtitleProject {
        let style = self.resolve_style(config).unwrap_or_default();
        let metadata = ProjectMetadata {
            video_path: input.display().to_string(),
            source_lang: config.output.source_language.clone(),
            target_lang: config.output.target_language.clone(),
            whisper_provider: config.whisper.provider.clone(),
            llm_provider: config.translation.provider.clone(),
            llm_model: config.translation.model.clone(),
            source_from,
            ..ProjectMetadata::default()
        };
        SubtitleProject::new(segments, style, metadata)
    }

    /// Write a subtitle file. Works on a config copy so the engine's
    /// configuration is untouched.
    pub fn export(
        &self,
        project: &SubtitleProject,
        output_path: &Path,
        format: ExportFormat,
        style_override: Option<&StyleProfile>,
    ) -> Result<PathBuf> {
        self.report(Stage::Exporting, 0, 1);
        let config = self.config.clone();
        let bilingual = config.output.bilingual;

        match format {
            ExportFormat::Srt => srt::write_srt(&project.segments, output_path, bilingual)?,
            ExportFormat::Vtt => vtt::write_vtt(&project.segments, output_path, bilingual)?,
            ExportFormat::Ass => {
                let style = style_override.unwrap_or(&project.style);
                ass::write_ass(&project.segments, output_path, style, bilingual)?;
            }
        }
        self.report(Stage::Exporting, 1, 1);
        Ok(output_path.to_path_buf())
    }

    /// Mux or burn the project's subtitles into a video.
    pub async fn export_video(
        &self,
        project: &SubtitleProject,
        video_path: &Path,
        output_path: &Path,
        mode: EmbedMode,
    ) -> Result<PathBuf> {
        self.report(Stage::Exporting, 0, 1);
        let mut temp_guard = TempFileGuard::new(self.config.advanced.keep_temp_files);

        let temp_dir = self.config.temp_dir();
        std::fs::create_dir_all(&temp_dir).map_err(|e| SubGenError::io(&temp_dir, e))?;
        let subtitle_path = temp_dir.join(format!(
            "{}_embed.srt",
            video_path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "video".to_string())
        ));
        temp_guard.register(subtitle_path.clone());
        srt::write_srt(
            &project.segments,
            &subtitle_path,
            self.config.output.bilingual,
        )?;

        let media = self.media_processor()?;
        let timeout = self.config.advanced.extract_timeout_secs;
        match mode {
            EmbedMode::Soft => {
                media
                    .embed_soft(video_path, &subtitle_path, output_path, timeout, &self.cancel)
                    .await?
            }
            EmbedMode::Hard => {
                media
                    .embed_hard(video_path, &subtitle_path, output_path, timeout, &self.cancel)
                    .await?
            }
        }

        self.report(Stage::Exporting, 1, 1);
        Ok(output_path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_format_parsing() {
        assert_eq!(ExportFormat::from_name("SRT").unwrap(), ExportFormat::Srt);
        assert_eq!(ExportFormat::from_name("webvtt").unwrap(), ExportFormat::Vtt);
        assert_eq!(ExportFormat::from_name("ass").unwrap(), ExportFormat::Ass);
        assert!(ExportFormat::from_name("sub").is_err());
    }

    #[test]
    fn test_effective_config_rejects_bad_language_code() {
        let engine = SubGenEngine::new(Config::default()).unwrap();
        let options = RunOptions {
            target_lang: Some("../etc".to_string()),
            ..RunOptions::default()
        };
        let err = engine.effective_config(&options).unwrap_err();
        assert!(matches!(err, SubGenError::BadInput(_)));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_effective_config_is_a_copy() {
        let engine = SubGenEngine::new(Config::default()).unwrap();
        let options = RunOptions {
            target_lang: Some("ja".to_string()),
            ..RunOptions::default()
        };
        let effective = engine.effective_config(&options).unwrap();
        assert_eq!(effective.output.target_language, "ja");
        assert_eq!(engine.config.output.target_language, "zh");
    }

    #[test]
    fn test_temp_guard_removes_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scratch.wav");
        std::fs::write(&path, b"audio").unwrap();
        {
            let mut guard = TempFileGuard::new(false);
            guard.register(path.clone());
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_temp_guard_keeps_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scratch.wav");
        std::fs::write(&path, b"audio").unwrap();
        {
            let mut guard = TempFileGuard::new(true);
            guard.register(path.clone());
        }
        assert!(path.exists());
    }
}
