//! Processing options describing one requested image variant

use super::ImageType;
use serde::{Deserialize, Serialize};

const DEFAULT_QUALITY: u8 = 80;
const DEFAULT_TRIM_THRESHOLD: f64 = 10.0;

/// How the source is fitted into the requested box
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizingType {
    #[default]
    Fit,
    Fill,
    /// Deprecated: rewritten into an explicit crop box before processing
    Crop,
    Auto,
}

impl ResizingType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "fit" => Some(ResizingType::Fit),
            "fill" => Some(ResizingType::Fill),
            "crop" => Some(ResizingType::Crop),
            "auto" => Some(ResizingType::Auto),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GravityType {
    /// Unset; the crop gravity inherits the primary gravity
    Unknown,
    #[default]
    Center,
    North,
    South,
    East,
    West,
    NorthEast,
    NorthWest,
    SouthEast,
    SouthWest,
    Smart,
    FocusPoint,
}

impl GravityType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "ce" | "center" => Some(GravityType::Center),
            "no" | "north" => Some(GravityType::North),
            "so" | "south" => Some(GravityType::South),
            "ea" | "east" => Some(GravityType::East),
            "we" | "west" => Some(GravityType::West),
            "noea" | "north_east" => Some(GravityType::NorthEast),
            "nowe" | "north_west" => Some(GravityType::NorthWest),
            "soea" | "south_east" => Some(GravityType::SouthEast),
            "sowe" | "south_west" => Some(GravityType::SouthWest),
            "sm" | "smart" => Some(GravityType::Smart),
            "fp" | "focus_point" => Some(GravityType::FocusPoint),
            _ => None,
        }
    }

    pub fn is_north(self) -> bool {
        matches!(
            self,
            GravityType::North | GravityType::NorthEast | GravityType::NorthWest
        )
    }

    pub fn is_south(self) -> bool {
        matches!(
            self,
            GravityType::South | GravityType::SouthEast | GravityType::SouthWest
        )
    }

    pub fn is_east(self) -> bool {
        matches!(
            self,
            GravityType::East | GravityType::NorthEast | GravityType::SouthEast
        )
    }

    pub fn is_west(self) -> bool {
        matches!(
            self,
            GravityType::West | GravityType::NorthWest | GravityType::SouthWest
        )
    }
}

/// Anchor plus offsets.
///
/// Offsets are pixels for directional gravities and normalized `0..=1` coordinates
/// for [`GravityType::FocusPoint`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Gravity {
    #[serde(rename = "type")]
    pub kind: GravityType,
    pub x: f64,
    pub y: f64,
}

impl Gravity {
    pub fn new(kind: GravityType) -> Self {
        Self { kind, x: 0.0, y: 0.0 }
    }

    pub fn with_offset(kind: GravityType, x: f64, y: f64) -> Self {
        Self { kind, x, y }
    }

    pub fn focus_point(x: f64, y: f64) -> Self {
        Self {
            kind: GravityType::FocusPoint,
            x,
            y,
        }
    }

    pub fn unknown() -> Self {
        Self::new(GravityType::Unknown)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const WHITE: Rgb = Rgb {
        r: 255,
        g: 255,
        b: 255,
    };

    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse `rrggbb` or `#rrggbb`
    pub fn parse_hex(s: &str) -> Option<Self> {
        let hex = s.trim_start_matches('#');
        if hex.len() != 6 {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
        Some(Rgb::new(channel(0)?, channel(2)?, channel(4)?))
    }
}

impl Default for Rgb {
    fn default() -> Self {
        Rgb::WHITE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CropOptions {
    pub width: u32,
    pub height: u32,
    pub gravity: Gravity,
}

impl Default for CropOptions {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            gravity: Gravity::unknown(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrimOptions {
    pub enabled: bool,
    pub threshold: f64,
    /// Detect the background from the top-left pixel instead of `color`
    pub smart: bool,
    pub color: Rgb,
    pub equal_hor: bool,
    pub equal_ver: bool,
}

impl Default for TrimOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: DEFAULT_TRIM_THRESHOLD,
            smart: true,
            color: Rgb::WHITE,
            equal_hor: false,
            equal_ver: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtendOptions {
    pub enabled: bool,
    pub gravity: Gravity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PaddingOptions {
    pub enabled: bool,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatermarkOptions {
    pub enabled: bool,
    pub opacity: f64,
    /// Size relative to the target image; 0 keeps the overlay's natural size
    pub scale: f64,
    pub gravity: Gravity,
    pub replicate: bool,
}

impl Default for WatermarkOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            opacity: 1.0,
            scale: 0.0,
            gravity: Gravity::default(),
            replicate: false,
        }
    }
}

/// Full set of options for one transform request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingOptions {
    pub resizing_type: ResizingType,
    pub width: u32,
    pub height: u32,
    pub dpr: f64,
    pub gravity: Gravity,
    pub enlarge: bool,
    pub extend: ExtendOptions,
    pub crop: CropOptions,
    pub padding: PaddingOptions,
    pub trim: TrimOptions,
    pub format: ImageType,
    pub quality: u8,
    pub max_bytes: usize,
    pub flatten: bool,
    pub background: Rgb,
    pub blur: f32,
    pub sharpen: f32,
    pub strip_metadata: bool,
    pub watermark: WatermarkOptions,
    pub prefer_webp: bool,
    pub enforce_webp: bool,
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            resizing_type: ResizingType::Fit,
            width: 0,
            height: 0,
            dpr: 1.0,
            gravity: Gravity::default(),
            enlarge: false,
            extend: ExtendOptions::default(),
            crop: CropOptions::default(),
            padding: PaddingOptions::default(),
            trim: TrimOptions::default(),
            format: ImageType::Unknown,
            quality: DEFAULT_QUALITY,
            max_bytes: 0,
            flatten: false,
            background: Rgb::WHITE,
            blur: 0.0,
            sharpen: 0.0,
            strip_metadata: true,
            watermark: WatermarkOptions::default(),
            prefer_webp: false,
            enforce_webp: false,
        }
    }
}

impl ProcessingOptions {
    pub fn with_size(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Self::default()
        }
    }

    /// Rewrite the deprecated `crop` resizing type into an explicit crop box.
    ///
    /// Returns true when a rewrite happened so the caller can warn about it.
    pub fn normalize_legacy_crop(&mut self) -> bool {
        if self.resizing_type != ResizingType::Crop {
            return false;
        }
        self.crop.width = self.width;
        self.crop.height = self.height;
        self.resizing_type = ResizingType::Fit;
        self.width = 0;
        self.height = 0;
        true
    }

    /// Crop gravity, falling back to the primary gravity when unset
    pub fn effective_crop_gravity(&self) -> Gravity {
        if self.crop.gravity.kind == GravityType::Unknown {
            self.gravity
        } else {
            self.crop.gravity
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let po = ProcessingOptions::default();
        assert_eq!(po.resizing_type, ResizingType::Fit);
        assert_eq!(po.dpr, 1.0);
        assert_eq!(po.quality, 80);
        assert_eq!(po.gravity.kind, GravityType::Center);
        assert_eq!(po.crop.gravity.kind, GravityType::Unknown);
        assert!(po.strip_metadata);
        assert!(!po.enlarge);
    }

    #[test]
    fn test_normalize_legacy_crop() {
        let mut po = ProcessingOptions::with_size(300, 200);
        po.resizing_type = ResizingType::Crop;

        assert!(po.normalize_legacy_crop());
        assert_eq!(po.resizing_type, ResizingType::Fit);
        assert_eq!((po.crop.width, po.crop.height), (300, 200));
        assert_eq!((po.width, po.height), (0, 0));

        // Second pass is a no-op
        assert!(!po.normalize_legacy_crop());
    }

    #[test]
    fn test_effective_crop_gravity() {
        let mut po = ProcessingOptions::default();
        po.gravity = Gravity::new(GravityType::South);
        assert_eq!(po.effective_crop_gravity().kind, GravityType::South);

        po.crop.gravity = Gravity::new(GravityType::East);
        assert_eq!(po.effective_crop_gravity().kind, GravityType::East);
    }

    #[test]
    fn test_parse_helpers() {
        assert_eq!(GravityType::parse("noea"), Some(GravityType::NorthEast));
        assert_eq!(GravityType::parse("smart"), Some(GravityType::Smart));
        assert_eq!(GravityType::parse("up"), None);
        assert_eq!(ResizingType::parse("FILL"), Some(ResizingType::Fill));
        assert_eq!(Rgb::parse_hex("#ff8000"), Some(Rgb::new(255, 128, 0)));
        assert_eq!(Rgb::parse_hex("fff"), None);
    }

    #[test]
    fn test_deserialize_partial_json() {
        let po: ProcessingOptions = serde_json::from_str(
            r#"{"width": 500, "resizing_type": "fill", "gravity": {"type": "smart"}}"#,
        )
        .unwrap();
        assert_eq!(po.width, 500);
        assert_eq!(po.height, 0);
        assert_eq!(po.resizing_type, ResizingType::Fill);
        assert_eq!(po.gravity.kind, GravityType::Smart);
        assert_eq!(po.quality, 80);
    }
}
