//! Transcription cache keyed by content fingerprint.
//!
//! Entries live next to the source video as `<video>.subgen-cache.json`,
//! are written atomically, and are immutable once written: re-running with
//! the same fingerprint serves the cached segments, and only
//! `--force-transcribe` replaces an entry.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{Result, SubGenError};
use crate::subtitle::Segment;

pub const CACHE_VERSION: u32 = 1;
pub const CACHE_SUFFIX: &str = ".subgen-cache.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub version: u32,
    pub fingerprint: String,
    pub whisper_provider: String,
    pub whisper_model: String,
    /// Language the recognizer detected (not the forced language).
    pub source_lang: String,
    pub created_at: String,
    pub segments: Vec<Segment>,
}

/// Stable fingerprint over the audio content and the recognition
/// parameters that shape its output.
pub fn fingerprint(
    audio_hash: &str,
    provider: &str,
    model: &str,
    forced_language: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(audio_hash.as_bytes());
    hasher.update(b"\0");
    hasher.update(provider.as_bytes());
    hasher.update(b"\0");
    hasher.update(model.as_bytes());
    hasher.update(b"\0");
    hasher.update(forced_language.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// SHA-256 of a file's bytes, streamed.
pub fn hash_file(path: &Path) -> Result<String> {
    use std::io::Read;

    let mut file = std::fs::File::open(path).map_err(|e| SubGenError::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = file
            .read(&mut buffer)
            .map_err(|e| SubGenError::io(path, e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn cache_path(video_path: &Path) -> PathBuf {
    let mut name = video_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(CACHE_SUFFIX);
    video_path.with_file_name(name)
}

pub struct CacheStore;

impl CacheStore {
    /// Load the cache entry for a video if present and matching the
    /// fingerprint. A schema version this build does not understand is a
    /// typed error rather than a misparse.
    pub fn load(video_path: &Path, expected_fingerprint: &str) -> Result<Option<CacheEntry>> {
        let path = cache_path(video_path);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(_) => return Ok(None),
        };

        let version_probe: serde_json::Value = serde_json::from_str(&content)
            .map_err(|e| SubGenError::Cache(format!("unreadable cache {}: {}", path.display(), e)))?;
        let found = version_probe
            .get("version")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32;
        if found != CACHE_VERSION {
            return Err(SubGenError::IncompatibleCache {
                found,
                expected: CACHE_VERSION,
            });
        }

        let entry: CacheEntry = serde_json::from_str(&content)
            .map_err(|e| SubGenError::Cache(format!("malformed cache {}: {}", path.display(), e)))?;

        if entry.fingerprint != expected_fingerprint {
            debug!("cache fingerprint mismatch for {}", video_path.display());
            return Ok(None);
        }
        debug!("cache hit with {} segments", entry.segments.len());
        Ok(Some(entry))
    }

    /// Write an entry atomically. Existing entries are kept untouched
    /// unless `overwrite` is set (the `--force-transcribe` path).
    pub fn save(
        video_path: &Path,
        segments: &[Segment],
        provider: &str,
        model: &str,
        detected_lang: &str,
        fingerprint: &str,
        overwrite: bool,
    ) -> Result<()> {
        let path = cache_path(video_path);
        if path.exists() && !overwrite {
            debug!("cache entry already present, not rewriting");
            return Ok(());
        }

        let entry = CacheEntry {
            version: CACHE_VERSION,
            fingerprint: fingerprint.to_string(),
            whisper_provider: provider.to_string(),
            whisper_model: model.to_string(),
            source_lang: detected_lang.to_string(),
            created_at: Utc::now().to_rfc3339(),
            segments: segments.to_vec(),
        };
        let content = serde_json::to_string_pretty(&entry)?;

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| SubGenError::io(dir, e))?;
        use std::io::Write;
        tmp.write_all(content.as_bytes())
            .map_err(|e| SubGenError::io(&path, e))?;
        tmp.persist(&path)
            .map_err(|e| SubGenError::io(&path, e.error))?;
        debug!("saved {} segments to cache", segments.len());
        Ok(())
    }

    pub fn delete(video_path: &Path) -> Result<bool> {
        let path = cache_path(video_path);
        if path.exists() {
            std::fs::remove_file(&path).map_err(|e| SubGenError::io(&path, e))?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Per-fingerprint async lock so at most one build runs per key.
    pub fn build_lock(fingerprint: &str) -> Arc<tokio::sync::Mutex<()>> {
        static LOCKS: OnceLock<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>> =
            OnceLock::new();
        let locks = LOCKS.get_or_init(|| Mutex::new(HashMap::new()));
        let mut map = locks.lock().expect("cache lock map poisoned");
        map.entry(fingerprint.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subtitle::Segment;

    fn sample_segments() -> Vec<Segment> {
        vec![
            Segment::new(0.0, 1.2, "Hello."),
            Segment::new(1.3, 2.9, "How are you?"),
        ]
    }

    #[test]
    fn test_fingerprint_is_stable_and_sensitive() {
        let a = fingerprint("abc", "cpp-binary", "large-v3", "auto");
        let b = fingerprint("abc", "cpp-binary", "large-v3", "auto");
        assert_eq!(a, b);
        assert_ne!(a, fingerprint("abd", "cpp-binary", "large-v3", "auto"));
        assert_ne!(a, fingerprint("abc", "cloud-api", "large-v3", "auto"));
        assert_ne!(a, fingerprint("abc", "cpp-binary", "base", "auto"));
        assert_ne!(a, fingerprint("abc", "cpp-binary", "large-v3", "en"));
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("clip.mp4");
        std::fs::write(&video, b"fake video").unwrap();

        let fp = fingerprint("hash", "cpp-binary", "large-v3", "auto");
        CacheStore::save(&video, &sample_segments(), "cpp-binary", "large-v3", "es", &fp, false)
            .unwrap();

        let entry = CacheStore::load(&video, &fp).unwrap().unwrap();
        assert_eq!(entry.segments.len(), 2);
        assert_eq!(entry.source_lang, "es");
        assert_eq!(entry.whisper_provider, "cpp-binary");
    }

    #[test]
    fn test_fingerprint_mismatch_is_miss() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("clip.mp4");
        std::fs::write(&video, b"fake video").unwrap();

        let fp = fingerprint("hash", "cpp-binary", "large-v3", "auto");
        CacheStore::save(&video, &sample_segments(), "cpp-binary", "large-v3", "en", &fp, false)
            .unwrap();

        let other = fingerprint("other", "cpp-binary", "large-v3", "auto");
        assert!(CacheStore::load(&video, &other).unwrap().is_none());
    }

    #[test]
    fn test_write_once_semantics() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("clip.mp4");
        std::fs::write(&video, b"fake video").unwrap();

        let fp = fingerprint("hash", "cpp-binary", "large-v3", "auto");
        CacheStore::save(&video, &sample_segments(), "cpp-binary", "large-v3", "en", &fp, false)
            .unwrap();
        // A second non-forced save must not replace the entry.
        CacheStore::save(&video, &[], "cpp-binary", "large-v3", "ja", &fp, false).unwrap();
        let entry = CacheStore::load(&video, &fp).unwrap().unwrap();
        assert_eq!(entry.segments.len(), 2);
        assert_eq!(entry.source_lang, "en");

        CacheStore::save(&video, &[], "cpp-binary", "large-v3", "ja", &fp, true).unwrap();
        let entry = CacheStore::load(&video, &fp).unwrap().unwrap();
        assert!(entry.segments.is_empty());
    }

    #[test]
    fn test_unknown_version_is_typed_error() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("clip.mp4");
        std::fs::write(&video, b"fake video").unwrap();
        std::fs::write(
            cache_path(&video),
            r#"{"version": 99, "fingerprint": "x", "segments": []}"#,
        )
        .unwrap();

        let err = CacheStore::load(&video, "x").unwrap_err();
        assert!(matches!(
            err,
            SubGenError::IncompatibleCache { found: 99, .. }
        ));
    }

    #[test]
    fn test_hash_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        std::fs::write(&path, b"hello").unwrap();
        assert_eq!(
            hash_file(&path).unwrap(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }
}
