//! SRT encoding and decoding.
//!
//! Bilingual convention, used by both the writer and the reader so that
//! write-then-read is idempotent: source line first, translated line second.

use std::path::Path;

use tracing::debug;

use crate::error::{Result, SubGenError};

use super::Segment;

/// Render segments as SRT. In bilingual mode each cue carries the source
/// text on the first line and the translation on the second; otherwise the
/// translation alone is emitted (falling back to the source text when a
/// segment was never translated).
pub fn encode_srt(segments: &[Segment], bilingual: bool) -> String {
    let mut out = String::new();
    for (index, segment) in segments.iter().enumerate() {
        let start = format_srt_time(segment.start);
        let end = format_srt_time(segment.end);
        out.push_str(&format!("{}\n{} --> {}\n", index + 1, start, end));
        let translated = segment
            .translated
            .as_deref()
            .unwrap_or(segment.text.as_str())
            .trim();
        if bilingual {
            out.push_str(segment.text.trim());
            out.push('\n');
            out.push_str(translated);
        } else {
            out.push_str(translated);
        }
        out.push_str("\n\n");
    }
    out
}

/// Write an SRT file.
pub fn write_srt(segments: &[Segment], path: &Path, bilingual: bool) -> Result<()> {
    let content = encode_srt(segments, bilingual);
    std::fs::write(path, content).map_err(|e| SubGenError::io(path, e))?;
    debug!("wrote {} cues to {}", segments.len(), path.display());
    Ok(())
}

/// Parse an SRT file back into segments. With `bilingual` the first line of
/// each cue is taken as the source text and the remainder as the
/// translation, mirroring [`encode_srt`].
pub fn read_srt(path: &Path, bilingual: bool) -> Result<Vec<Segment>> {
    let content = std::fs::read_to_string(path).map_err(|e| SubGenError::io(path, e))?;
    parse_srt(&content, bilingual)
}

pub fn parse_srt(content: &str, bilingual: bool) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();

    for block in content.replace("\r\n", "\n").split("\n\n") {
        let lines: Vec<&str> = block.lines().filter(|l| !l.trim().is_empty()).collect();
        if lines.is_empty() {
            continue;
        }
        // Index line is optional in the wild; the timing line is not.
        let timing_idx = lines
            .iter()
            .position(|l| l.contains("-->"))
            .ok_or_else(|| {
                SubGenError::BadInput(format!("SRT cue without timing line: {:?}", lines[0]))
            })?;
        let (start, end) = parse_srt_timing(lines[timing_idx])?;
        let text_lines = &lines[timing_idx + 1..];
        if text_lines.is_empty() {
            continue;
        }

        let mut segment = Segment::new(start, end, "");
        if bilingual && text_lines.len() >= 2 {
            segment.text = text_lines[0].trim().to_string();
            segment.translated = Some(text_lines[1..].join("\n").trim().to_string());
        } else {
            segment.text = text_lines.join("\n").trim().to_string();
        }
        segments.push(segment);
    }

    Ok(segments)
}

fn parse_srt_timing(line: &str) -> Result<(f64, f64)> {
    let mut parts = line.split("-->");
    let start = parts
        .next()
        .map(str::trim)
        .ok_or_else(|| SubGenError::BadInput(format!("bad SRT timing: {}", line)))?;
    let end = parts
        .next()
        .map(str::trim)
        .ok_or_else(|| SubGenError::BadInput(format!("bad SRT timing: {}", line)))?;
    Ok((parse_srt_time(start)?, parse_srt_time(end)?))
}

fn parse_srt_time(ts: &str) -> Result<f64> {
    // HH:MM:SS,mmm
    let normalized = ts.replace(',', ".");
    let fields: Vec<&str> = normalized.split(':').collect();
    if fields.len() != 3 {
        return Err(SubGenError::BadInput(format!("bad SRT timestamp: {}", ts)));
    }
    let hours: u64 = fields[0]
        .parse()
        .map_err(|_| SubGenError::BadInput(format!("bad SRT timestamp: {}", ts)))?;
    let minutes: u64 = fields[1]
        .parse()
        .map_err(|_| SubGenError::BadInput(format!("bad SRT timestamp: {}", ts)))?;
    let seconds: f64 = fields[2]
        .parse()
        .map_err(|_| SubGenError::BadInput(format!("bad SRT timestamp: {}", ts)))?;
    Ok(hours as f64 * 3600.0 + minutes as f64 * 60.0 + seconds)
}

/// Format a second count as an SRT timestamp (`HH:MM:SS,mmm`).
pub fn format_srt_time(seconds: f64) -> String {
    let (hours, minutes, secs, millis) = super::split_seconds(seconds, 1000);
    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subtitle::Segment;

    #[test]
    fn test_format_srt_time() {
        assert_eq!(format_srt_time(7.05), "00:00:07,050");
        // Fractions beyond millisecond precision round to the nearest unit
        // instead of truncating.
        assert_eq!(format_srt_time(1.1999), "00:00:01,200");
        assert_eq!(format_srt_time(59.9996), "00:01:00,000");
        assert_eq!(format_srt_time(7325.042), "02:02:05,042");
    }

    #[test]
    fn test_encode_starts_at_one() {
        let segments = vec![Segment::new(0.0, 1.2, "Hello.").with_translation("你好。")];
        let srt = encode_srt(&segments, false);
        assert!(srt.starts_with("1\n00:00:00,000 --> 00:00:01,200\n你好。\n"));
    }

    #[test]
    fn test_bilingual_source_first() {
        let segments = vec![Segment::new(0.0, 1.0, "Hello.").with_translation("你好。")];
        let srt = encode_srt(&segments, true);
        let lines: Vec<&str> = srt.lines().collect();
        assert_eq!(lines[2], "Hello.");
        assert_eq!(lines[3], "你好。");
    }

    #[test]
    fn test_bilingual_roundtrip() {
        let segments = vec![
            Segment::new(0.0, 1.2, "Hello.").with_translation("你好。"),
            Segment::new(1.3, 2.9, "How are you?").with_translation("你好吗？"),
        ];
        let srt = encode_srt(&segments, true);
        let parsed = parse_srt(&srt, true).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].text, "Hello.");
        assert_eq!(parsed[0].translated.as_deref(), Some("你好。"));
        assert_eq!(parsed[1].start, 1.3);
        assert_eq!(parsed[1].end, 2.9);

        // Idempotence: re-encoding the parsed cues reproduces the file.
        assert_eq!(encode_srt(&parsed, true), srt);
    }

    #[test]
    fn test_mono_roundtrip_preserves_cues() {
        let segments = vec![Segment::new(0.5, 2.0, "一句话")];
        let srt = encode_srt(&segments, false);
        let parsed = parse_srt(&srt, false).unwrap();
        assert_eq!(parsed[0].text, "一句话");
        assert_eq!(encode_srt(&parsed, false), srt);
    }

    #[test]
    fn test_malformed_timing_rejected() {
        assert!(parse_srt("1\n00:00:00,000 -> 00:00:01,000\nhi\n\n", false).is_err());
        assert!(parse_srt("1\nnot a timestamp --> 00:00:01,000\nhi\n\n", false).is_err());
    }
}
