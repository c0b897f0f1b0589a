//! End-to-end pipeline scenarios with a fake recognizer and a
//! deterministic fake LLM.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use subgen::components::ComponentManager;
use subgen::config::Config;
use subgen::engine::{ExportFormat, RunOptions, Stage, SubGenEngine};
use subgen::error::{Result, SubGenError};
use subgen::llm::{ChatMessage, ChatParams, LlmClient};
use subgen::subtitle::{Segment, Word};
use subgen::transcribe::{Recognizer, TranscribeOptions, TranscriptionOutput};

struct FakeRecognizer {
    segments: Vec<Segment>,
    detected_lang: String,
    calls: Arc<AtomicUsize>,
}

impl FakeRecognizer {
    fn new(segments: Vec<Segment>, detected_lang: &str) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                segments,
                detected_lang: detected_lang.to_string(),
                calls: Arc::clone(&calls),
            },
            calls,
        )
    }
}

#[async_trait]
impl Recognizer for FakeRecognizer {
    async fn transcribe(
        &self,
        _audio_path: &Path,
        _options: &TranscribeOptions,
        _cancel: &CancellationToken,
    ) -> Result<TranscriptionOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(TranscriptionOutput {
            segments: self.segments.clone(),
            detected_lang: self.detected_lang.clone(),
        })
    }

    fn provider_id(&self) -> &str {
        "fake"
    }

    fn model_id(&self) -> &str {
        "fake-model"
    }
}

/// Deterministic fake LLM: answers translation batches from a lookup
/// table, split requests from a second table, and proofreads by echoing
/// the existing translation.
#[derive(Default)]
struct FakeLlm {
    translations: HashMap<String, String>,
    splits: HashMap<String, String>,
}

impl FakeLlm {
    fn with_translations(pairs: &[(&str, &str)]) -> Self {
        Self {
            translations: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            splits: HashMap::new(),
        }
    }

    fn with_split(mut self, translation: &str, response: &str) -> Self {
        self.splits
            .insert(translation.to_string(), response.to_string());
        self
    }
}

#[async_trait]
impl LlmClient for FakeLlm {
    async fn chat(&self, messages: &[ChatMessage], _params: &ChatParams) -> Result<String> {
        let prompt = &messages.last().expect("non-empty conversation").content;

        if prompt.starts_with("Split this") {
            let translation = prompt
                .split("Translation to split:\n")
                .nth(1)
                .and_then(|rest| rest.lines().next())
                .unwrap_or("");
            return Ok(self.splits.get(translation).cloned().unwrap_or_default());
        }

        if prompt.contains("Proofread the following") {
            let mut out = Vec::new();
            for line in prompt.lines() {
                let Some((index, rest)) = line.split_once(": ") else {
                    continue;
                };
                if index.chars().all(|c| c.is_ascii_digit()) && !index.is_empty() {
                    let translated = rest.rsplit_once(" -> ").map(|(_, t)| t).unwrap_or(rest);
                    out.push(format!("{}: {}", index, translated));
                }
            }
            return Ok(out.join("\n"));
        }

        // Batch translation request: respond per numbered input line.
        let mut out = Vec::new();
        let mut in_items = false;
        for line in prompt.lines() {
            if line.starts_with("Translate the following") {
                in_items = true;
                continue;
            }
            if !in_items {
                continue;
            }
            let Some((index, source)) = line.split_once(": ") else {
                continue;
            };
            if index.chars().all(|c| c.is_ascii_digit()) && !index.is_empty() {
                let translated = self
                    .translations
                    .get(source.trim())
                    .cloned()
                    .unwrap_or_else(|| source.trim().to_string());
                out.push(format!("{}: {}", index, translated));
            }
        }
        Ok(out.join("\n"))
    }

    fn name(&self) -> &str {
        "fake"
    }

    fn model(&self) -> &str {
        "fake-model"
    }

    fn requires_auth(&self) -> bool {
        false
    }
}

struct TestBed {
    dir: tempfile::TempDir,
}

impl TestBed {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn audio_file(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, b"RIFF fake wav payload").unwrap();
        path
    }

    fn config(&self) -> Config {
        let mut config = Config::default();
        config.output.source_language = "en".to_string();
        config.output.target_language = "zh".to_string();
        config.advanced.temp_dir = Some(self.dir.path().join("tmp"));
        config
    }

    fn components(&self) -> ComponentManager {
        ComponentManager::with_base_dir(self.dir.path().join("data")).unwrap()
    }
}

fn e1_segments() -> Vec<Segment> {
    vec![
        Segment::new(0.0, 1.2, "Hello."),
        Segment::new(1.3, 2.4, "How are"),
        Segment::new(2.4, 2.9, "you?"),
    ]
}

fn e1_llm() -> FakeLlm {
    FakeLlm::with_translations(&[("Hello.", "你好。"), ("How are you?", "你好吗？")])
}

/// E1: three English fragments, sentence-aware, no proofread. The second
/// and third fragments form one group; the SRT output starts with the
/// first cue exactly as specified.
#[tokio::test]
async fn test_e1_sentence_aware_run() {
    let bed = TestBed::new();
    let input = bed.audio_file("clip.wav");
    let (recognizer, _) = FakeRecognizer::new(e1_segments(), "en");

    let mut engine = SubGenEngine::new(bed.config())
        .unwrap()
        .with_components(bed.components())
        .with_recognizer(Box::new(recognizer))
        .with_llm(Box::new(e1_llm()));

    let options = RunOptions {
        sentence_aware: true,
        ..RunOptions::default()
    };
    let project = engine.run(&input, &options).await.unwrap();
    assert!(project.state.is_translated);
    assert_eq!(project.segments.len(), 2);
    assert_eq!(project.segments[0].translated.as_deref(), Some("你好。"));
    assert_eq!(project.segments[1].translated.as_deref(), Some("你好吗？"));
    assert_eq!(project.segments[1].start, 1.3);
    assert_eq!(project.segments[1].end, 2.9);

    let out = bed.dir.path().join("clip.srt");
    engine
        .export(&project, &out, ExportFormat::Srt, None)
        .unwrap();
    let srt = std::fs::read_to_string(&out).unwrap();
    assert!(
        srt.starts_with("1\n00:00:00,000 --> 00:00:01,200\n你好。\n"),
        "unexpected SRT head: {}",
        &srt[..srt.len().min(120)]
    );
}

/// E2: proofread-only reads an existing SRT and writes a byte-identical
/// file under the `.proofread.srt` name when the LLM changes nothing.
#[tokio::test]
async fn test_e2_proofread_only_identity() {
    let bed = TestBed::new();
    let srt_path = bed.dir.path().join("clip_zh.srt");
    let segments = vec![
        Segment::new(0.0, 1.2, "你好。"),
        Segment::new(1.3, 2.9, "你好吗？"),
    ];
    subgen::subtitle::srt::write_srt(&segments, &srt_path, false).unwrap();
    let original = std::fs::read_to_string(&srt_path).unwrap();

    let mut engine = SubGenEngine::new(bed.config())
        .unwrap()
        .with_components(bed.components())
        .with_llm(Box::new(FakeLlm::default()));

    let options = RunOptions {
        proofread_only: true,
        ..RunOptions::default()
    };
    let project = engine.run(&srt_path, &options).await.unwrap();
    assert!(project.state.is_proofread);

    let out = bed.dir.path().join("clip_zh.proofread.srt");
    engine
        .export(&project, &out, ExportFormat::Srt, None)
        .unwrap();
    assert_eq!(std::fs::read_to_string(&out).unwrap(), original);
}

/// E5 + property 6: a cache hit serves identical segments without calling
/// the recognizer again, and the detected language recorded in the cache
/// wins over the `--from` value.
#[tokio::test]
async fn test_e5_cache_hit_language_and_equivalence() {
    let bed = TestBed::new();
    let input = bed.audio_file("clip.wav");

    let options = RunOptions {
        source_lang: Some("en".to_string()),
        no_translate: true,
        ..RunOptions::default()
    };

    let (recognizer, calls) = FakeRecognizer::new(e1_segments(), "es");
    let mut engine = SubGenEngine::new(bed.config())
        .unwrap()
        .with_components(bed.components())
        .with_recognizer(Box::new(recognizer));
    let first = engine.run(&input, &options).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(first.metadata.source_lang, "es");

    // Fresh engine, same inputs: served from cache, recognizer untouched.
    let (recognizer, second_calls) = FakeRecognizer::new(vec![], "xx");
    let mut engine = SubGenEngine::new(bed.config())
        .unwrap()
        .with_components(bed.components())
        .with_recognizer(Box::new(recognizer));
    let second = engine.run(&input, &options).await.unwrap();
    assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    assert_eq!(second.metadata.source_lang, "es");
    assert_eq!(first.segments, second.segments);
}

/// `--force-transcribe` bypasses and rewrites the cache.
#[tokio::test]
async fn test_force_transcribe_invalidates_cache() {
    let bed = TestBed::new();
    let input = bed.audio_file("clip.wav");
    let options = RunOptions {
        no_translate: true,
        ..RunOptions::default()
    };

    let (recognizer, _) = FakeRecognizer::new(e1_segments(), "en");
    let mut engine = SubGenEngine::new(bed.config())
        .unwrap()
        .with_components(bed.components())
        .with_recognizer(Box::new(recognizer));
    engine.run(&input, &options).await.unwrap();

    let fresh = vec![Segment::new(0.0, 0.5, "Replaced.")];
    let (recognizer, calls) = FakeRecognizer::new(fresh.clone(), "en");
    let mut engine = SubGenEngine::new(bed.config())
        .unwrap()
        .with_components(bed.components())
        .with_recognizer(Box::new(recognizer));
    let forced = RunOptions {
        force_transcribe: true,
        ..options.clone()
    };
    let project = engine.run(&input, &forced).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(project.segments[0].text, "Replaced.");
}

fn worded_segments() -> Vec<Segment> {
    vec![
        Segment::new(0.0, 1.5, "I think that").with_words(vec![
            Word::new("I", 0.0, 0.4),
            Word::new("think", 0.4, 1.0),
            Word::new("that", 1.0, 1.5),
        ]),
        Segment::new(1.6, 2.8, "works fine.").with_words(vec![
            Word::new("works", 1.6, 2.2),
            Word::new("fine.", 2.2, 2.8),
        ]),
    ]
}

/// Properties 1 + 2: after sentence-aware translation with word-aligned
/// redistribution, every source word appears exactly once and segment
/// starts stay non-decreasing.
#[tokio::test]
async fn test_redistribution_coverage_and_ordering() {
    let bed = TestBed::new();
    let input = bed.audio_file("clip.wav");
    let (recognizer, _) = FakeRecognizer::new(worded_segments(), "en");
    let llm = FakeLlm::with_translations(&[("I think that works fine.", "我觉得挺好的。")])
        .with_split("我觉得挺好的。", "3: 我觉得\n5: 挺好的。");

    let mut engine = SubGenEngine::new(bed.config())
        .unwrap()
        .with_components(bed.components())
        .with_recognizer(Box::new(recognizer))
        .with_llm(Box::new(llm));

    let options = RunOptions {
        sentence_aware: true,
        ..RunOptions::default()
    };
    let project = engine.run(&input, &options).await.unwrap();

    assert_eq!(project.segments.len(), 2);
    assert_eq!(project.segments[0].translated.as_deref(), Some("我觉得"));
    assert_eq!(project.segments[1].translated.as_deref(), Some("挺好的。"));

    let words: Vec<String> = project
        .segments
        .iter()
        .flat_map(|s| s.words.iter().map(|w| w.text.clone()))
        .collect();
    assert_eq!(words, vec!["I", "think", "that", "works", "fine."]);

    let mut prev = f64::NEG_INFINITY;
    for segment in &project.segments {
        assert!(segment.start >= prev);
        prev = segment.start;
    }
    project.validate().unwrap();
}

/// An invalid split response falls back to one group-spanning subtitle —
/// still no dropped words.
#[tokio::test]
async fn test_invalid_split_falls_back_to_merged() {
    let bed = TestBed::new();
    let input = bed.audio_file("clip.wav");
    let (recognizer, _) = FakeRecognizer::new(worded_segments(), "en");
    // Non-increasing indexes are rejected by validation.
    let llm = FakeLlm::with_translations(&[("I think that works fine.", "我觉得挺好的。")])
        .with_split("我觉得挺好的。", "4: a\n2: b");

    let mut engine = SubGenEngine::new(bed.config())
        .unwrap()
        .with_components(bed.components())
        .with_recognizer(Box::new(recognizer))
        .with_llm(Box::new(llm));

    let options = RunOptions {
        sentence_aware: true,
        ..RunOptions::default()
    };
    let project = engine.run(&input, &options).await.unwrap();
    assert_eq!(project.segments.len(), 1);
    assert_eq!(
        project.segments[0].translated.as_deref(),
        Some("我觉得挺好的。")
    );
    assert_eq!(project.segments[0].words.len(), 5);
}

/// Property 5: proofreading twice with a deterministic LLM is
/// byte-identical.
#[tokio::test]
async fn test_idempotent_proofreading() {
    let bed = TestBed::new();
    let input = bed.audio_file("clip.wav");
    let (recognizer, _) = FakeRecognizer::new(e1_segments(), "en");
    let mut engine = SubGenEngine::new(bed.config())
        .unwrap()
        .with_components(bed.components())
        .with_recognizer(Box::new(recognizer))
        .with_llm(Box::new(e1_llm()));

    let options = RunOptions {
        sentence_aware: true,
        proofread: true,
        ..RunOptions::default()
    };
    let project = engine.run(&input, &options).await.unwrap();
    assert!(project.state.is_proofread);
    let first: Vec<_> = project
        .segments
        .iter()
        .map(|s| s.translated.clone())
        .collect();

    let again = engine.proofread(project).await.unwrap();
    let second: Vec<_> = again
        .segments
        .iter()
        .map(|s| s.translated.clone())
        .collect();
    assert_eq!(first, second);
}

/// A proofread pass whose every LLM call fails outright still returns the
/// translated project: translations are untouched and only `is_proofread`
/// stays unset, so the caller can export and retry just that stage.
#[tokio::test]
async fn test_proofread_failure_keeps_translations() {
    /// Translates normally, but every proofread call errors out.
    struct ProofreadDownLlm {
        inner: FakeLlm,
    }

    #[async_trait]
    impl LlmClient for ProofreadDownLlm {
        async fn chat(&self, messages: &[ChatMessage], params: &ChatParams) -> Result<String> {
            let prompt = &messages.last().expect("non-empty conversation").content;
            if prompt.contains("Proofread the following") {
                return Err(SubGenError::Translation("provider down".to_string()));
            }
            self.inner.chat(messages, params).await
        }
        fn name(&self) -> &str {
            "proofread-down"
        }
        fn model(&self) -> &str {
            "fake-model"
        }
        fn requires_auth(&self) -> bool {
            false
        }
    }

    let bed = TestBed::new();
    let input = bed.audio_file("clip.wav");
    let (recognizer, _) = FakeRecognizer::new(e1_segments(), "en");
    let mut engine = SubGenEngine::new(bed.config())
        .unwrap()
        .with_components(bed.components())
        .with_recognizer(Box::new(recognizer))
        .with_llm(Box::new(ProofreadDownLlm { inner: e1_llm() }));

    let options = RunOptions {
        sentence_aware: true,
        proofread: true,
        ..RunOptions::default()
    };
    let project = engine.run(&input, &options).await.unwrap();

    assert!(project.state.is_translated);
    assert!(!project.state.is_proofread);
    assert_eq!(project.segments[0].translated.as_deref(), Some("你好。"));
    assert_eq!(project.segments[1].translated.as_deref(), Some("你好吗？"));

    // The pipeline result is still exportable.
    let out = bed.dir.path().join("clip.srt");
    engine
        .export(&project, &out, ExportFormat::Srt, None)
        .unwrap();
    assert!(std::fs::read_to_string(&out).unwrap().contains("你好。"));
}

/// Property 8: an invalid target language is rejected before any file is
/// read or written.
#[tokio::test]
async fn test_language_gate_before_filesystem() {
    let bed = TestBed::new();
    let input = bed.audio_file("clip.wav");
    let (recognizer, calls) = FakeRecognizer::new(e1_segments(), "en");
    let mut engine = SubGenEngine::new(bed.config())
        .unwrap()
        .with_components(bed.components())
        .with_recognizer(Box::new(recognizer));

    let options = RunOptions {
        target_lang: Some("zh;rm -rf /".to_string()),
        ..RunOptions::default()
    };
    let err = engine.run(&input, &options).await.unwrap_err();
    assert!(matches!(err, SubGenError::BadInput(_)));
    assert_eq!(err.exit_code(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(!subgen::cache::cache_path(&input).exists());
}

/// A failing LLM never loses segments: the source text passes through.
#[tokio::test]
async fn test_translation_failure_passes_through() {
    struct BrokenLlm;

    #[async_trait]
    impl LlmClient for BrokenLlm {
        async fn chat(&self, _: &[ChatMessage], _: &ChatParams) -> Result<String> {
            Err(SubGenError::Translation("provider down".to_string()))
        }
        fn name(&self) -> &str {
            "broken"
        }
        fn model(&self) -> &str {
            "broken"
        }
        fn requires_auth(&self) -> bool {
            false
        }
    }

    let bed = TestBed::new();
    let input = bed.audio_file("clip.wav");
    let (recognizer, _) = FakeRecognizer::new(e1_segments(), "en");
    let mut engine = SubGenEngine::new(bed.config())
        .unwrap()
        .with_components(bed.components())
        .with_recognizer(Box::new(recognizer))
        .with_llm(Box::new(BrokenLlm));

    let options = RunOptions {
        sentence_aware: true,
        ..RunOptions::default()
    };
    let project = engine.run(&input, &options).await.unwrap();
    assert_eq!(project.segments.len(), 2);
    assert_eq!(project.segments[0].translated.as_deref(), Some("Hello."));
    assert_eq!(
        project.segments[1].translated.as_deref(),
        Some("How are you?")
    );
}

/// Progress callbacks report cumulative counts in non-decreasing order
/// within each stage.
#[tokio::test]
async fn test_progress_is_cumulative() {
    let bed = TestBed::new();
    let input = bed.audio_file("clip.wav");
    let (recognizer, _) = FakeRecognizer::new(e1_segments(), "en");

    let events: Arc<Mutex<Vec<(Stage, usize, usize)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let progress = Arc::new(move |stage: Stage, current: usize, total: usize| {
        sink.lock().unwrap().push((stage, current, total));
    });

    let mut engine = SubGenEngine::new(bed.config())
        .unwrap()
        .with_components(bed.components())
        .with_recognizer(Box::new(recognizer))
        .with_llm(Box::new(e1_llm()))
        .with_progress(progress);

    let options = RunOptions {
        sentence_aware: true,
        ..RunOptions::default()
    };
    engine.run(&input, &options).await.unwrap();

    let events = events.lock().unwrap();
    let translating: Vec<_> = events
        .iter()
        .filter(|(stage, _, _)| *stage == Stage::Translating)
        .collect();
    assert!(!translating.is_empty());
    // Cumulative: monotone non-decreasing current, constant total.
    let mut prev = 0;
    for (_, current, total) in &translating {
        assert!(*current >= prev);
        assert_eq!(*total, 2);
        prev = *current;
    }
    assert_eq!(translating.last().unwrap().1, 2);
}

/// Cancellation before the translate stage surfaces the typed error and
/// keeps the already transcribed cache usable.
#[tokio::test]
async fn test_cancellation_is_typed() {
    let bed = TestBed::new();
    let input = bed.audio_file("clip.wav");
    let (recognizer, _) = FakeRecognizer::new(e1_segments(), "en");
    let mut engine = SubGenEngine::new(bed.config())
        .unwrap()
        .with_components(bed.components())
        .with_recognizer(Box::new(recognizer))
        .with_llm(Box::new(e1_llm()));

    engine.cancel_token().cancel();
    let options = RunOptions {
        sentence_aware: true,
        ..RunOptions::default()
    };
    let err = engine.run(&input, &options).await.unwrap_err();
    assert!(matches!(err, SubGenError::Cancelled));
    assert_eq!(err.exit_code(), 6);
}
