//! Component manager: locate, download, verify, and install the external
//! binaries and models SubGen depends on (whisper.cpp builds, ggml models,
//! ffmpeg).

pub mod archive;
pub mod download;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::subgen_dir;
use crate::error::{Result, SubGenError};

pub use download::DownloadProgress;

/// How long a fetched registry stays fresh.
const REGISTRY_MAX_AGE_SECS: i64 = 24 * 3600;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ComponentType {
    Engine,
    Model,
    Tool,
}

/// Component definition from the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Component {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub component_type: ComponentType,
    pub version: String,
    pub description: String,
    pub size_bytes: u64,
    /// Platform key (or `*`) → download URL.
    pub urls: HashMap<String, String>,
    /// Platform key (or `*`) → expected SHA-256.
    #[serde(default)]
    pub sha256: HashMap<String, String>,
    /// Install location relative to the user data root.
    pub install_path: String,
    #[serde(default)]
    pub executable: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstalledComponent {
    pub version: String,
    pub path: PathBuf,
    pub installed_at: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct InstalledState {
    components: HashMap<String, InstalledComponent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Registry {
    version: String,
    #[serde(default)]
    cached_at: i64,
    components: Vec<Component>,
}

/// Canonical platform key for the running host.
pub fn detect_platform() -> Result<&'static str> {
    match (std::env::consts::OS, std::env::consts::ARCH) {
        ("windows", "x86_64") => Ok("windows-x64"),
        ("linux", "x86_64") => Ok("linux-x64"),
        ("linux", "aarch64") => Ok("linux-arm64"),
        ("macos", "x86_64") => Ok("macos-x64"),
        ("macos", "aarch64") => Ok("macos-arm64"),
        (os, arch) => Err(SubGenError::UnsupportedPlatform {
            os: os.to_string(),
            arch: arch.to_string(),
        }),
    }
}

fn builtin_registry() -> Registry {
    let release_base = "https://github.com/lgezyxr/subgen/releases/download/components-v1";
    let hf_base = "https://huggingface.co/ggerganov/whisper.cpp/resolve/main";

    let engine = |id: &str, name: &str, desc: &str, size: u64, urls: &[(&str, String)]| Component {
        id: id.to_string(),
        name: name.to_string(),
        component_type: ComponentType::Engine,
        version: "1.7.3".to_string(),
        description: desc.to_string(),
        size_bytes: size,
        urls: urls.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
        sha256: HashMap::new(),
        install_path: "bin/whisper-cpp".to_string(),
        executable: Some("whisper-cpp".to_string()),
    };
    let model = |short: &str, size: u64, desc: &str| Component {
        id: format!("model-whisper-{}", short),
        name: format!("Whisper {}", short),
        component_type: ComponentType::Model,
        version: "1.0".to_string(),
        description: desc.to_string(),
        size_bytes: size,
        urls: [("*".to_string(), format!("{}/ggml-{}.bin", hf_base, short))].into(),
        sha256: HashMap::new(),
        install_path: format!("models/whisper/ggml-{}.bin", short),
        executable: None,
    };

    Registry {
        version: "1".to_string(),
        cached_at: 0,
        components: vec![
            engine(
                "whisper-cpp-cpu",
                "whisper.cpp (CPU)",
                "Local speech recognition (CPU only)",
                5_242_880,
                &[
                    ("linux-x64", format!("{}/whisper-cpp-cpu-linux-x64.tar.gz", release_base)),
                    ("windows-x64", format!("{}/whisper-cpp-cpu-windows-x64.zip", release_base)),
                    ("macos-x64", format!("{}/whisper-cpp-cpu-macos-x64.tar.gz", release_base)),
                    ("macos-arm64", format!("{}/whisper-cpp-cpu-macos-arm64.tar.gz", release_base)),
                ],
            ),
            engine(
                "whisper-cpp-cuda",
                "whisper.cpp (CUDA)",
                "Local speech recognition with NVIDIA GPU acceleration",
                15_728_640,
                &[
                    ("linux-x64", format!("{}/whisper-cpp-cuda-linux-x64.tar.gz", release_base)),
                    ("windows-x64", format!("{}/whisper-cpp-cuda-windows-x64.zip", release_base)),
                ],
            ),
            engine(
                "whisper-cpp-metal",
                "whisper.cpp (Metal)",
                "Local speech recognition with Apple Metal acceleration",
                8_388_608,
                &[
                    ("macos-arm64", format!("{}/whisper-cpp-metal-macos-arm64.tar.gz", release_base)),
                    ("macos-x64", format!("{}/whisper-cpp-metal-macos-x64.tar.gz", release_base)),
                ],
            ),
            model("tiny", 78_643_200, "Smallest model, fast but lower quality"),
            model("base", 148_897_792, "Base model, balanced for quick tasks"),
            model("small", 488_636_416, "Small model, good quality"),
            model("medium", 1_610_612_736, "Medium model, great quality"),
            model("large-v3", 3_326_234_624, "Best quality, requires ≥8GB VRAM"),
            Component {
                id: "ffmpeg".to_string(),
                name: "FFmpeg".to_string(),
                component_type: ComponentType::Tool,
                version: "7.1".to_string(),
                description: "Audio/video processing (required for video input)".to_string(),
                size_bytes: 83_886_080,
                urls: [
                    (
                        "linux-x64".to_string(),
                        "https://github.com/BtbN/FFmpeg-Builds/releases/download/latest/ffmpeg-master-latest-linux64-gpl.tar.xz".to_string(),
                    ),
                    (
                        "windows-x64".to_string(),
                        "https://github.com/BtbN/FFmpeg-Builds/releases/download/latest/ffmpeg-master-latest-win64-gpl.zip".to_string(),
                    ),
                    (
                        "macos-arm64".to_string(),
                        "https://evermeet.cx/ffmpeg/getrelease/ffmpeg/zip".to_string(),
                    ),
                    (
                        "macos-x64".to_string(),
                        "https://evermeet.cx/ffmpeg/getrelease/ffmpeg/zip".to_string(),
                    ),
                ]
                .into(),
                sha256: HashMap::new(),
                install_path: "bin".to_string(),
                executable: Some("ffmpeg".to_string()),
            },
        ],
    }
}

pub struct ComponentManager {
    base_dir: PathBuf,
    platform: &'static str,
    registry: Registry,
}

impl ComponentManager {
    pub fn new() -> Result<Self> {
        Self::with_base_dir(subgen_dir())
    }

    /// Construct against an explicit data root (used heavily by tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(base_dir.join("bin"))
            .map_err(|e| SubGenError::io(base_dir.join("bin"), e))?;
        std::fs::create_dir_all(base_dir.join("models").join("whisper"))
            .map_err(|e| SubGenError::io(base_dir.join("models"), e))?;

        let platform = detect_platform()?;
        let registry = Self::load_registry(&base_dir);
        Ok(Self {
            base_dir,
            platform,
            registry,
        })
    }

    fn load_registry(base_dir: &Path) -> Registry {
        let path = base_dir.join("components.json");
        if let Ok(content) = std::fs::read_to_string(&path) {
            if let Ok(cached) = serde_json::from_str::<Registry>(&content) {
                if Utc::now().timestamp() - cached.cached_at < REGISTRY_MAX_AGE_SECS {
                    debug!("using cached component registry");
                    return cached;
                }
            }
        }

        let mut registry = builtin_registry();
        registry.cached_at = Utc::now().timestamp();
        if let Ok(content) = serde_json::to_string_pretty(&registry) {
            if let Err(e) = std::fs::write(&path, content) {
                warn!("could not cache component registry: {}", e);
            }
        }
        registry
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn platform(&self) -> &'static str {
        self.platform
    }

    fn installed_path(&self) -> PathBuf {
        self.base_dir.join("installed.json")
    }

    fn load_installed(&self) -> InstalledState {
        match std::fs::read_to_string(self.installed_path()) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
            Err(_) => InstalledState::default(),
        }
    }

    /// Atomic write: sibling temp file then rename.
    fn save_installed(&self, state: &InstalledState) -> Result<()> {
        let path = self.installed_path();
        let content = serde_json::to_string_pretty(state)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.base_dir)
            .map_err(|e| SubGenError::io(&self.base_dir, e))?;
        use std::io::Write;
        tmp.write_all(content.as_bytes())
            .map_err(|e| SubGenError::io(&path, e))?;
        tmp.persist(&path)
            .map_err(|e| SubGenError::io(&path, e.error))?;
        Ok(())
    }

    /// Exclusive lock held for the duration of an install/uninstall so
    /// concurrent invocations cannot interleave state writes.
    fn lock_state(&self) -> Result<std::fs::File> {
        let lock_path = self.base_dir.join(".installed.lock");
        let file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| SubGenError::io(&lock_path, e))?;
        file.lock_exclusive()
            .map_err(|e| SubGenError::io(&lock_path, e))?;
        Ok(file)
    }

    /// Components installable on this platform.
    pub fn list_available(&self) -> Vec<&Component> {
        self.registry
            .components
            .iter()
            .filter(|c| c.urls.contains_key(self.platform) || c.urls.contains_key("*"))
            .collect()
    }

    pub fn list_installed(&self) -> Vec<(String, InstalledComponent)> {
        let mut entries: Vec<_> = self.load_installed().components.into_iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn is_installed(&self, component_id: &str) -> bool {
        self.load_installed()
            .components
            .get(component_id)
            .map(|c| c.path.exists())
            .unwrap_or(false)
    }

    pub fn get_path(&self, component_id: &str) -> Option<PathBuf> {
        self.load_installed()
            .components
            .get(component_id)
            .map(|c| c.path.clone())
            .filter(|p| p.exists())
    }

    pub fn find(&self, component_id: &str) -> Option<&Component> {
        self.registry.components.iter().find(|c| c.id == component_id)
    }

    pub fn needs_update(&self, component_id: &str) -> bool {
        let installed = self.load_installed();
        match (installed.components.get(component_id), self.find(component_id)) {
            (Some(local), Some(remote)) => local.version != remote.version,
            _ => false,
        }
    }

    /// Download, verify, extract, and record a component.
    pub async fn install(
        &self,
        component_id: &str,
        on_progress: Option<DownloadProgress>,
    ) -> Result<PathBuf> {
        let component = self
            .find(component_id)
            .ok_or_else(|| SubGenError::BadInput(format!("Unknown component: {}", component_id)))?
            .clone();

        let url = component
            .urls
            .get(self.platform)
            .or_else(|| component.urls.get("*"))
            .ok_or_else(|| SubGenError::BadInput(format!(
                "Component {} is not available for {}",
                component_id, self.platform
            )))?
            .clone();

        let expected_sha = component
            .sha256
            .get(self.platform)
            .or_else(|| component.sha256.get("*"))
            .cloned()
            .unwrap_or_default();
        // An absent or empty checksum means the download can never be
        // verified; that is a hard error, not a skipped check.
        if expected_sha.is_empty() {
            return Err(SubGenError::MissingIntegrity {
                id: component_id.to_string(),
                reason: "registry entry has no SHA-256 for this platform".to_string(),
            });
        }

        let install_path = self.base_dir.join(&component.install_path);
        let is_archive = [".zip", ".tar.gz", ".tgz", ".tar.xz"]
            .iter()
            .any(|ext| url.ends_with(ext));

        info!("installing {} ({})", component_id, component.version);

        let downloaded =
            download::download_verified(&url, &self.base_dir, &expected_sha, on_progress).await?;

        let result_path = if is_archive {
            std::fs::create_dir_all(&install_path)
                .map_err(|e| SubGenError::io(&install_path, e))?;
            archive::extract_archive(downloaded.path(), &url, &install_path)?;
            if let Some(executable) = &component.executable {
                archive::mark_executables(&install_path, executable)?;
            }
            install_path
        } else {
            if let Some(parent) = install_path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| SubGenError::io(parent, e))?;
            }
            downloaded
                .persist(&install_path)
                .map_err(|e| SubGenError::io(&install_path, e.error))?;
            install_path
        };

        let _lock = self.lock_state()?;
        let mut state = self.load_installed();
        state.components.insert(
            component_id.to_string(),
            InstalledComponent {
                version: component.version.clone(),
                path: result_path.clone(),
                installed_at: Utc::now().to_rfc3339(),
                size_bytes: directory_size(&result_path),
            },
        );
        self.save_installed(&state)?;

        info!("installed {}", component_id);
        debug!("install location: {}", result_path.display());
        Ok(result_path)
    }

    /// Remove an installed component. The recorded path must resolve inside
    /// the user data root or the uninstall aborts.
    pub fn uninstall(&self, component_id: &str) -> Result<bool> {
        let _lock = self.lock_state()?;
        let mut state = self.load_installed();
        let Some(record) = state.components.get(component_id).cloned() else {
            return Ok(false);
        };

        let base = self
            .base_dir
            .canonicalize()
            .map_err(|e| SubGenError::io(&self.base_dir, e))?;
        if record.path.exists() {
            let resolved = record
                .path
                .canonicalize()
                .map_err(|e| SubGenError::io(&record.path, e))?;
            if !resolved.starts_with(&base) {
                return Err(SubGenError::BadInput(format!(
                    "refusing to remove {}: outside the SubGen data directory",
                    record.path.display()
                )));
            }
            if resolved.is_dir() {
                std::fs::remove_dir_all(&resolved).map_err(|e| SubGenError::io(&resolved, e))?;
            } else {
                std::fs::remove_file(&resolved).map_err(|e| SubGenError::io(&resolved, e))?;
            }
        }

        state.components.remove(component_id);
        self.save_installed(&state)?;
        info!("uninstalled {}", component_id);
        Ok(true)
    }

    /// Reinstall when the registry carries a newer version.
    pub async fn update(
        &self,
        component_id: &str,
        on_progress: Option<DownloadProgress>,
    ) -> Result<bool> {
        if !self.needs_update(component_id) {
            return Ok(false);
        }
        self.uninstall(component_id)?;
        self.install(component_id, on_progress).await?;
        Ok(true)
    }

    /// Update several components, downloading with bounded concurrency.
    /// Results come back in the input order.
    pub async fn update_many(&self, ids: &[String], concurrency: usize) -> Result<Vec<bool>> {
        use futures_util::StreamExt;

        let outcomes: Vec<Result<bool>> =
            futures_util::stream::iter(ids.iter().map(|id| self.update(id, None)))
                .buffered(concurrency.max(1))
                .collect()
                .await;
        outcomes.into_iter().collect()
    }

    fn exe_suffix(&self) -> &'static str {
        if self.platform.starts_with("windows") {
            ".exe"
        } else {
            ""
        }
    }

    /// Find ffmpeg: managed install first, then PATH.
    pub fn find_ffmpeg(&self) -> Option<PathBuf> {
        let name = format!("ffmpeg{}", self.exe_suffix());
        let direct = self.base_dir.join("bin").join(&name);
        if direct.is_file() {
            return Some(direct);
        }
        for entry in walkdir::WalkDir::new(self.base_dir.join("bin"))
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entry.file_type().is_file() && entry.file_name().to_string_lossy() == name {
                return Some(entry.into_path());
            }
        }
        which_in_path(&name)
    }

    /// Find the whisper.cpp binary under the managed install directory.
    pub fn find_whisper_engine(&self) -> Option<PathBuf> {
        let suffix = self.exe_suffix();
        let engine_dir = self.base_dir.join("bin").join("whisper-cpp");
        let candidates = [
            format!("whisper-cpp{}", suffix),
            format!("whisper-cli{}", suffix),
            format!("main{}", suffix),
        ];
        if engine_dir.exists() {
            for entry in walkdir::WalkDir::new(&engine_dir)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                if entry.file_type().is_file()
                    && candidates
                        .iter()
                        .any(|c| entry.file_name().to_string_lossy() == c.as_str())
                {
                    return Some(entry.into_path());
                }
            }
        }
        let direct = self.base_dir.join("bin").join(&candidates[0]);
        direct.is_file().then_some(direct)
    }

    pub fn find_whisper_model(&self, model_name: &str) -> Option<PathBuf> {
        let path = self
            .base_dir
            .join("models")
            .join("whisper")
            .join(format!("ggml-{}.bin", model_name));
        path.is_file().then_some(path)
    }

    /// Machine-readable health report for `subgen doctor`.
    pub fn doctor_report(&self) -> serde_json::Value {
        json!({
            "platform": self.platform,
            "data_dir": self.base_dir.display().to_string(),
            "ffmpeg": self.find_ffmpeg().map(|p| p.display().to_string()),
            "whisper_engine": self.find_whisper_engine().map(|p| p.display().to_string()),
            "installed": self.list_installed().iter().map(|(id, c)| {
                json!({"id": id, "version": c.version, "path": c.path.display().to_string()})
            }).collect::<Vec<_>>(),
        })
    }
}

fn which_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

fn directory_size(path: &Path) -> u64 {
    if path.is_file() {
        return path.metadata().map(|m| m.len()).unwrap_or(0);
    }
    walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}
