//! WebVTT encoding.

use std::path::Path;

use crate::error::{Result, SubGenError};

use super::Segment;

/// Render segments as WebVTT. Bilingual cues follow the SRT convention:
/// source line first, translated line second.
pub fn encode_vtt(segments: &[Segment], bilingual: bool) -> String {
    let mut out = String::from("WEBVTT\n\n");
    for segment in segments {
        out.push_str(&format!(
            "{} --> {}\n",
            format_vtt_time(segment.start),
            format_vtt_time(segment.end)
        ));
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

pub fn write_vtt(segments: &[Segment], path: &Path, bilingual: bool) -> Result<()> {
    std::fs::write(path, encode_vtt(segments, bilingual)).map_err(|e| SubGenError::io(path, e))
}

/// Format a second count as a WebVTT timestamp (`HH:MM:SS.mmm`).
fn format_vtt_time(seconds: f64) -> String {
    let (hours, minutes, secs, millis) = super::split_seconds(seconds, 1000);
    format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, secs, millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subtitle::Segment;

    #[test]
    fn test_header_and_timestamps() {
        let segments = vec![Segment::new(0.0, 1.2, "Hello.").with_translation("你好。")];
        let vtt = encode_vtt(&segments, false);
        assert!(vtt.starts_with("WEBVTT\n\n"));
        assert!(vtt.contains("00:00:00.000 --> 00:00:01.200"));
        assert!(vtt.contains("你好。"));
    }

    #[test]
    fn test_bilingual_order() {
        let segments = vec![Segment::new(0.0, 1.0, "Hi").with_translation("嗨")];
        let vtt = encode_vtt(&segments, true);
        let body: Vec<&str> = vtt.lines().collect();
        assert_eq!(body[3], "Hi");
        assert_eq!(body[4], "嗨");
    }
}
