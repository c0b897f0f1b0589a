//! Subtitle style presets and ASS color handling.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SubGenError};

/// Font styling for one subtitle line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FontStyle {
    pub font_name: String,
    pub font_size: u32,
    /// `#RRGGBB` or `#AARRGGBB`
    pub primary_color: String,
    pub outline_color: String,
    pub outline_width: f32,
    pub shadow_width: f32,
    pub bold: bool,
    pub italic: bool,
}

impl Default for FontStyle {
    fn default() -> Self {
        Self {
            font_name: "Arial".to_string(),
            font_size: 48,
            primary_color: "#FFFFFF".to_string(),
            outline_color: "#000000".to_string(),
            outline_width: 2.0,
            shadow_width: 1.0,
            bold: false,
            italic: false,
        }
    }
}

/// A named style preset with primary (translated) and secondary (source)
/// line styles plus layout fields used when generating ASS headers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StyleProfile {
    pub name: String,
    pub primary: FontStyle,
    pub secondary: FontStyle,
    /// ASS numpad alignment (2 = bottom center).
    pub alignment: u8,
    pub margin_vertical: u32,
    pub margin_horizontal: u32,
    pub line_spacing: f32,
    pub play_res_x: u32,
    pub play_res_y: u32,
}

impl Default for StyleProfile {
    fn default() -> Self {
        Self::preset("default").expect("builtin preset")
    }
}

impl StyleProfile {
    /// Look up a builtin preset by name.
    pub fn preset(name: &str) -> Result<Self> {
        let base = |primary: FontStyle, secondary: FontStyle| StyleProfile {
            name: name.to_string(),
            primary,
            secondary,
            alignment: 2,
            margin_vertical: 20,
            margin_horizontal: 20,
            line_spacing: 1.0,
            play_res_x: 1920,
            play_res_y: 1080,
        };

        match name {
            "default" => Ok(base(FontStyle::default(), FontStyle {
                font_size: 32,
                primary_color: "#CCCCCC".to_string(),
                ..FontStyle::default()
            })),
            "netflix" => Ok(base(
                FontStyle {
                    font_name: "Netflix Sans".to_string(),
                    font_size: 54,
                    primary_color: "#FFFFFF".to_string(),
                    outline_color: "#000000".to_string(),
                    outline_width: 2.5,
                    shadow_width: 0.0,
                    bold: false,
                    italic: false,
                },
                FontStyle {
                    font_name: "Netflix Sans".to_string(),
                    font_size: 36,
                    primary_color: "#B8B8B8".to_string(),
                    outline_color: "#000000".to_string(),
                    outline_width: 2.0,
                    shadow_width: 0.0,
                    bold: false,
                    italic: false,
                },
            )),
            "fansub" => Ok(base(
                FontStyle {
                    font_name: "Source Han Sans".to_string(),
                    font_size: 52,
                    primary_color: "#FFF8DC".to_string(),
                    outline_color: "#1A1A66".to_string(),
                    outline_width: 3.0,
                    shadow_width: 1.5,
                    bold: true,
                    italic: false,
                },
                FontStyle {
                    font_name: "Source Han Sans".to_string(),
                    font_size: 34,
                    primary_color: "#E0E0E0".to_string(),
                    outline_color: "#1A1A66".to_string(),
                    outline_width: 2.0,
                    shadow_width: 1.0,
                    bold: false,
                    italic: true,
                },
            )),
            "minimal" => Ok(base(
                FontStyle {
                    font_size: 40,
                    outline_width: 1.0,
                    shadow_width: 0.0,
                    ..FontStyle::default()
                },
                FontStyle {
                    font_size: 28,
                    outline_width: 1.0,
                    shadow_width: 0.0,
                    primary_color: "#AAAAAA".to_string(),
                    ..FontStyle::default()
                },
            )),
            other => Err(SubGenError::BadInput(format!(
                "Unknown style preset '{}'. Available: default, netflix, fansub, minimal",
                other
            ))),
        }
    }

    pub fn preset_names() -> &'static [&'static str] {
        &["default", "netflix", "fansub", "minimal"]
    }
}

/// Validate a hex color and return (alpha, r, g, b). Alpha defaults to 0x00
/// (opaque in ASS terms) for 6-digit colors.
fn parse_hex_color(hex: &str) -> Result<(u8, u8, u8, u8)> {
    let body = hex
        .strip_prefix('#')
        .ok_or_else(|| SubGenError::BadColor(hex.to_string()))?;

    if !body.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(SubGenError::BadColor(hex.to_string()));
    }

    let component = |s: &str| u8::from_str_radix(s, 16).map_err(|_| SubGenError::BadColor(hex.to_string()));

    match body.len() {
        6 => Ok((
            0x00,
            component(&body[0..2])?,
            component(&body[2..4])?,
            component(&body[4..6])?,
        )),
        8 => Ok((
            component(&body[0..2])?,
            component(&body[2..4])?,
            component(&body[4..6])?,
            component(&body[6..8])?,
        )),
        _ => Err(SubGenError::BadColor(hex.to_string())),
    }
}

/// `#RRGGBB` → `&H00BBGGRR`, `#AARRGGBB` → `&HAABBGGRR`.
pub fn hex_to_ass(hex: &str) -> Result<String> {
    let (a, r, g, b) = parse_hex_color(hex)?;
    Ok(format!("&H{:02X}{:02X}{:02X}{:02X}", a, b, g, r))
}

/// Inverse of [`hex_to_ass`]. Opaque colors decode to `#RRGGBB`.
pub fn ass_to_hex(ass: &str) -> Result<String> {
    let body = ass
        .strip_prefix("&H")
        .ok_or_else(|| SubGenError::BadColor(ass.to_string()))?;
    if body.len() != 8 || !body.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(SubGenError::BadColor(ass.to_string()));
    }
    let component = |s: &str| u8::from_str_radix(s, 16).map_err(|_| SubGenError::BadColor(ass.to_string()));
    let a = component(&body[0..2])?;
    let b = component(&body[2..4])?;
    let g = component(&body[4..6])?;
    let r = component(&body[6..8])?;
    if a == 0 {
        Ok(format!("#{:02X}{:02X}{:02X}", r, g, b))
    } else {
        Ok(format!("#{:02X}{:02X}{:02X}{:02X}", a, r, g, b))
    }
}

/// Validate a hex color without converting it.
pub fn validate_hex_color(hex: &str) -> Result<()> {
    parse_hex_color(hex).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_to_ass_rgb() {
        assert_eq!(hex_to_ass("#FFFFFF").unwrap(), "&H00FFFFFF");
        assert_eq!(hex_to_ass("#FF0000").unwrap(), "&H000000FF");
        assert_eq!(hex_to_ass("#0000FF").unwrap(), "&H00FF0000");
        assert_eq!(hex_to_ass("#123456").unwrap(), "&H00563412");
    }

    #[test]
    fn test_hex_to_ass_argb() {
        assert_eq!(hex_to_ass("#80FF0000").unwrap(), "&H800000FF");
    }

    #[test]
    fn test_roundtrip() {
        for c in ["#FFFFFF", "#000000", "#1A2B3C", "#FF00FF"] {
            assert_eq!(ass_to_hex(&hex_to_ass(c).unwrap()).unwrap(), c);
        }
    }

    #[test]
    fn test_invalid_colors_rejected() {
        for bad in ["FFFFFF", "#FFF", "#GGGGGG", "#12345", "", "#1234567"] {
            assert!(matches!(
                hex_to_ass(bad),
                Err(SubGenError::BadColor(_))
            ));
        }
    }

    #[test]
    fn test_presets() {
        for name in StyleProfile::preset_names() {
            let profile = StyleProfile::preset(name).unwrap();
            assert_eq!(&profile.name, name);
            validate_hex_color(&profile.primary.primary_color).unwrap();
            validate_hex_color(&profile.secondary.primary_color).unwrap();
        }
        assert!(StyleProfile::preset("nope").is_err());
    }
}
