//! ASS (Advanced SubStation Alpha) encoding.
//!
//! The `[Script Info]` and `[V4+ Styles]` sections are generated from the
//! project's [`StyleProfile`]; bilingual cues emit a single `Dialogue` with
//! the translated line in the primary style and the source line switched to
//! the secondary style via an inline override.

use std::path::Path;

use crate::error::{Result, SubGenError};
use crate::styles::{hex_to_ass, FontStyle, StyleProfile};

use super::Segment;

const PRIMARY_STYLE: &str = "Primary";
const SECONDARY_STYLE: &str = "Secondary";

/// Render a complete ASS document.
pub fn encode_ass(segments: &[Segment], style: &StyleProfile, bilingual: bool) -> Result<String> {
    let mut out = String::new();

    out.push_str("[Script Info]\n");
    out.push_str("Title: SubGen export\n");
    out.push_str("ScriptType: v4.00+\n");
    out.push_str(&format!("PlayResX: {}\n", style.play_res_x));
    out.push_str(&format!("PlayResY: {}\n", style.play_res_y));
    out.push_str("WrapStyle: 0\n");
    out.push_str("ScaledBorderAndShadow: yes\n\n");

    out.push_str("[V4+ Styles]\n");
    out.push_str(
        "Format: Name, Fontname, Fontsize, PrimaryColour, SecondaryColour, OutlineColour, \
         BackColour, Bold, Italic, Underline, StrikeOut, ScaleX, ScaleY, Spacing, Angle, \
         BorderStyle, Outline, Shadow, Alignment, MarginL, MarginR, MarginV, Encoding\n",
    );
    out.push_str(&style_line(PRIMARY_STYLE, &style.primary, style)?);
    out.push_str(&style_line(SECONDARY_STYLE, &style.secondary, style)?);
    out.push('\n');

    out.push_str("[Events]\n");
    out.push_str("Format: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text\n");

    for segment in segments {
        let translated = segment
            .translated
            .as_deref()
            .unwrap_or(segment.text.as_str())
            .trim();
        let text = if bilingual {
            format!(
                "{}\\N{{\\r{}}}{}",
                escape_ass_text(translated),
                SECONDARY_STYLE,
                escape_ass_text(segment.text.trim())
            )
        } else {
            escape_ass_text(translated)
        };
        out.push_str(&format!(
            "Dialogue: 0,{},{},{},,0,0,0,,{}\n",
            format_ass_time(segment.start),
            format_ass_time(segment.end),
            PRIMARY_STYLE,
            text
        ));
    }

    Ok(out)
}

pub fn write_ass(
    segments: &[Segment],
    path: &Path,
    style: &StyleProfile,
    bilingual: bool,
) -> Result<()> {
    let content = encode_ass(segments, style, bilingual)?;
    std::fs::write(path, content).map_err(|e| SubGenError::io(path, e))
}

fn style_line(name: &str, font: &FontStyle, profile: &StyleProfile) -> Result<String> {
    let primary = hex_to_ass(&font.primary_color)?;
    let outline = hex_to_ass(&font.outline_color)?;
    Ok(format!(
        "Style: {},{},{},{},{},{},&H00000000,{},{},0,0,100,100,0,0,1,{},{},{},{},{},{},1\n",
        name,
        font.font_name,
        font.font_size,
        primary,
        primary,
        outline,
        if font.bold { -1 } else { 0 },
        if font.italic { -1 } else { 0 },
        font.outline_width,
        font.shadow_width,
        profile.alignment,
        profile.margin_horizontal,
        profile.margin_horizontal,
        profile.margin_vertical,
    ))
}

/// ASS `Dialogue` text may not contain raw newlines; braces would open
/// override blocks.
fn escape_ass_text(text: &str) -> String {
    text.replace('\n', "\\N").replace('{', "(").replace('}', ")")
}

/// Format a second count as an ASS timestamp (`H:MM:SS.cc`).
fn format_ass_time(seconds: f64) -> String {
    let (hours, minutes, secs, centis) = super::split_seconds(seconds, 100);
    format!("{}:{:02}:{:02}.{:02}", hours, minutes, secs, centis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subtitle::Segment;

    #[test]
    fn test_format_ass_time() {
        assert_eq!(format_ass_time(65.12), "0:01:05.12");
        // Centisecond resolution, rounded — and no zero-padded hour.
        assert_eq!(format_ass_time(0.006), "0:00:00.01");
        assert_eq!(format_ass_time(3661.578), "1:01:01.58");
    }

    #[test]
    fn test_sections_present() {
        let segments = vec![Segment::new(0.0, 1.0, "Hi").with_translation("嗨")];
        let ass = encode_ass(&segments, &StyleProfile::default(), false).unwrap();
        assert!(ass.contains("[Script Info]"));
        assert!(ass.contains("[V4+ Styles]"));
        assert!(ass.contains("Style: Primary,"));
        assert!(ass.contains("Style: Secondary,"));
        assert!(ass.contains("Dialogue: 0,0:00:00.00,0:00:01.00,Primary,,0,0,0,,嗨"));
    }

    #[test]
    fn test_bilingual_single_dialogue() {
        let segments = vec![Segment::new(0.0, 1.0, "Hi").with_translation("嗨")];
        let ass = encode_ass(&segments, &StyleProfile::default(), true).unwrap();
        let dialogue = ass.lines().find(|l| l.starts_with("Dialogue:")).unwrap();
        assert!(dialogue.contains("嗨\\N{\\rSecondary}Hi"));
        assert_eq!(ass.lines().filter(|l| l.starts_with("Dialogue:")).count(), 1);
    }

    #[test]
    fn test_invalid_style_color_propagates() {
        let mut style = StyleProfile::default();
        style.primary.primary_color = "nope".to_string();
        let segments = vec![Segment::new(0.0, 1.0, "Hi")];
        assert!(encode_ass(&segments, &style, false).is_err());
    }
}
