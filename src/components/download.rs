//! Streamed, verified component downloads.
//!
//! Each download writes to its own unique temp file in the data root, so
//! concurrent installs never collide. Interrupted transfers are resumed
//! with HTTP range requests before the SHA-256 check runs.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{HeaderValue, RANGE};
use reqwest::{Client, StatusCode};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{Result, SubGenError};

/// Progress callback: `(downloaded_bytes, total_bytes)`.
pub type DownloadProgress = Box<dyn Fn(u64, u64) + Send + Sync>;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);
const RESUME_ATTEMPTS: usize = 3;

/// Download `url` into a fresh temp file under `dir` and verify it against
/// `expected_sha256`. The caller decides where the verified file ends up.
pub async fn download_verified(
    url: &str,
    dir: &Path,
    expected_sha256: &str,
    on_progress: Option<DownloadProgress>,
) -> Result<tempfile::NamedTempFile> {
    if expected_sha256.is_empty() {
        // Callers check this too; fail closed if one forgets.
        return Err(SubGenError::MissingIntegrity {
            id: url.to_string(),
            reason: "no expected checksum supplied".to_string(),
        });
    }

    let client = Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .build()?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".subgen-download-")
        .tempfile_in(dir)
        .map_err(|e| SubGenError::io(dir, e))?;

    let mut written: u64 = 0;
    let mut total: u64 = 0;
    let mut attempt = 0;

    loop {
        attempt += 1;
        let mut request = client.get(url).timeout(DOWNLOAD_TIMEOUT);
        if written > 0 {
            request = request.header(
                RANGE,
                HeaderValue::from_str(&format!("bytes={}-", written))
                    .expect("range header is ascii"),
            );
            debug!("resuming download at byte {}", written);
        }

        let response = request.send().await?;
        let status = response.status();
        if written > 0 && status != StatusCode::PARTIAL_CONTENT {
            // Server ignored the range; start over from scratch.
            debug!("server did not honor range request, restarting");
            use std::io::{Seek, SeekFrom};
            tmp.as_file()
                .set_len(0)
                .map_err(|e| SubGenError::io(tmp.path(), e))?;
            tmp.seek(SeekFrom::Start(0))
                .map_err(|e| SubGenError::io(tmp.path(), e))?;
            written = 0;
        }
        if !status.is_success() {
            return Err(SubGenError::Media(format!(
                "download of {} failed with HTTP {}",
                url, status
            )));
        }
        if total == 0 {
            total = written + response.content_length().unwrap_or(0);
        }

        let mut stream = response.bytes_stream();
        let mut stream_failed = false;
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => {
                    tmp.write_all(&bytes)
                        .map_err(|e| SubGenError::io(tmp.path(), e))?;
                    written += bytes.len() as u64;
                    if let Some(callback) = &on_progress {
                        callback(written, total);
                    }
                }
                Err(e) => {
                    warn!("download stream interrupted: {}", e);
                    stream_failed = true;
                    break;
                }
            }
        }

        if !stream_failed {
            break;
        }
        if attempt >= RESUME_ATTEMPTS {
            return Err(SubGenError::Media(format!(
                "download of {} failed after {} attempts",
                url, RESUME_ATTEMPTS
            )));
        }
    }

    tmp.flush().map_err(|e| SubGenError::io(tmp.path(), e))?;
    verify_sha256(tmp.path(), expected_sha256, url)?;
    Ok(tmp)
}

fn verify_sha256(path: &Path, expected: &str, url: &str) -> Result<()> {
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
    let actual = format!("{:x}", hasher.finalize());
    if !actual.eq_ignore_ascii_case(expected) {
        return Err(SubGenError::MissingIntegrity {
            id: url.to_string(),
            reason: format!("SHA-256 mismatch: expected {}, got {}", expected, actual),
        });
    }
    debug!("checksum verified for {}", url);
    Ok(())
}
