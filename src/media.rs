//! FFmpeg invocation: audio extraction and subtitle embedding.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{Result, SubGenError};

/// One ffmpeg invocation, built up argument by argument.
#[derive(Debug, Clone)]
pub struct MediaCommand {
    binary: PathBuf,
    args: Vec<String>,
    description: String,
}

impl MediaCommand {
    pub fn new(binary: &Path, description: impl Into<String>) -> Self {
        Self {
            binary: binary.to_path_buf(),
            args: vec!["-loglevel".to_string(), "error".to_string()],
            description: description.into(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn input(self, path: &Path) -> Self {
        self.arg("-i").arg(path.to_string_lossy())
    }

    pub fn output(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy())
    }

    pub fn overwrite(self) -> Self {
        self.arg("-y")
    }

    pub async fn execute(&self, timeout_secs: u64, cancel: &CancellationToken) -> Result<()> {
        debug!("running {}: {:?}", self.description, self.args);

        let mut child = Command::new(&self.binary)
            .args(&self.args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SubGenError::Media(format!("failed to spawn ffmpeg: {}", e)))?;

        let stderr = child.stderr.take().expect("stderr piped");
        let drain = tokio::spawn(async move {
            use tokio::io::AsyncReadExt;
            let mut buffer = String::new();
            let mut reader = tokio::io::BufReader::new(stderr);
            let _ = reader.read_to_string(&mut buffer).await;
            buffer
        });

        let status = tokio::select! {
            result = tokio::time::timeout(Duration::from_secs(timeout_secs), child.wait()) => {
                match result {
                    Ok(status) => status
                        .map_err(|e| SubGenError::Media(format!("ffmpeg wait failed: {}", e)))?,
                    Err(_) => {
                        let _ = child.kill().await;
                        return Err(SubGenError::Timeout {
                            operation: self.description.clone(),
                            seconds: timeout_secs,
                        });
                    }
                }
            },
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(SubGenError::Cancelled);
            }
        };

        let stderr_text = drain.await.unwrap_or_default();
        if !status.success() {
            return Err(SubGenError::Media(format!(
                "{} failed ({}): {}",
                self.description,
                status,
                stderr_text.trim()
            )));
        }
        Ok(())
    }
}

pub struct MediaProcessor {
    ffmpeg: PathBuf,
}

impl MediaProcessor {
    pub fn new(ffmpeg: PathBuf) -> Self {
        Self { ffmpeg }
    }

    pub fn ffmpeg_path(&self) -> &Path {
        &self.ffmpeg
    }

    /// Extract mono 16 kHz PCM audio, the input format whisper expects.
    pub async fn extract_audio(
        &self,
        video_path: &Path,
        audio_path: &Path,
        timeout_secs: u64,
        cancel: &CancellationToken,
    ) -> Result<()> {
        info!("extracting audio");
        debug!("audio source: {}", video_path.display());
        MediaCommand::new(&self.ffmpeg, "audio extraction")
            .input(video_path)
            .arg("-vn")
            .arg("-acodec")
            .arg("pcm_s16le")
            .arg("-ar")
            .arg("16000")
            .arg("-ac")
            .arg("1")
            .overwrite()
            .output(audio_path)
            .execute(timeout_secs, cancel)
            .await?;

        if !audio_path.exists() {
            return Err(SubGenError::Media(
                "audio extraction produced no output file".to_string(),
            ));
        }
        Ok(())
    }

    /// Mux a subtitle stream into the container without re-encoding.
    pub async fn embed_soft(
        &self,
        video_path: &Path,
        subtitle_path: &Path,
        output_path: &Path,
        timeout_secs: u64,
        cancel: &CancellationToken,
    ) -> Result<()> {
        info!("muxing subtitles");
        debug!("mux target: {}", output_path.display());
        let codec = match output_path.extension().and_then(|e| e.to_str()) {
            Some("mkv") => "srt",
            _ => "mov_text",
        };
        MediaCommand::new(&self.ffmpeg, "subtitle muxing")
            .input(video_path)
            .input(subtitle_path)
            .arg("-c")
            .arg("copy")
            .arg("-c:s")
            .arg(codec)
            .overwrite()
            .output(output_path)
            .execute(timeout_secs, cancel)
            .await
    }

    /// Burn subtitles into the video stream.
    pub async fn embed_hard(
        &self,
        video_path: &Path,
        subtitle_path: &Path,
        output_path: &Path,
        timeout_secs: u64,
        cancel: &CancellationToken,
    ) -> Result<()> {
        info!("burning subtitles");
        debug!("burn-in target: {}", output_path.display());
        let filter = format!(
            "subtitles={}",
            escape_filter_path(&subtitle_path.to_string_lossy())
        );
        MediaCommand::new(&self.ffmpeg, "subtitle burn-in")
            .input(video_path)
            .arg("-vf")
            .arg(filter)
            .arg("-c:v")
            .arg("libx264")
            .arg("-c:a")
            .arg("copy")
            .overwrite()
            .output(output_path)
            .execute(timeout_secs, cancel)
            .await
    }

    pub async fn check_availability(&self, cancel: &CancellationToken) -> Result<()> {
        MediaCommand::new(&self.ffmpeg, "ffmpeg version check")
            .arg("-version")
            .execute(30, cancel)
            .await
            .map_err(|e| match e {
                SubGenError::Media(_) => SubGenError::MissingComponent {
                    id: "ffmpeg".to_string(),
                },
                other => other,
            })
    }
}

/// Escape a path for use inside an ffmpeg filter argument. Every
/// metacharacter of the filter grammar is escaped: separators, colons,
/// commas, semicolons, equals, at-signs, quotes, brackets, and backslashes
/// themselves.
pub fn escape_filter_path(path: &str) -> String {
    let mut escaped = String::with_capacity(path.len() * 2);
    for c in path.chars() {
        match c {
            '\\' | ':' | ',' | ';' | '=' | '@' | '\'' | '"' | '[' | ']' | '%' => {
                escaped.push('\\');
                escaped.push(c);
            }
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_filter_path() {
        assert_eq!(escape_filter_path("/tmp/plain.srt"), "/tmp/plain.srt");
        assert_eq!(
            escape_filter_path("C:\\subs\\movie.srt"),
            "C\\:\\\\subs\\\\movie.srt"
        );
        assert_eq!(escape_filter_path("a,b;c=d@e.srt"), "a\\,b\\;c\\=d\\@e.srt");
        assert_eq!(escape_filter_path("it's.srt"), "it\\'s.srt");
    }

    #[test]
    fn test_media_command_args() {
        let cmd = MediaCommand::new(Path::new("ffmpeg"), "test")
            .input(Path::new("in.mp4"))
            .arg("-vn")
            .overwrite()
            .output(Path::new("out.wav"));
        assert_eq!(
            cmd.args,
            vec!["-loglevel", "error", "-i", "in.mp4", "-vn", "-y", "out.wav"]
        );
    }
}
