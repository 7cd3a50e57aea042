use serde::{Deserialize, Serialize};
use std::fmt;

/// Encoded image formats known to the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageType {
    #[default]
    Unknown,
    Jpeg,
    Png,
    Webp,
    Gif,
    Ico,
    Svg,
    Heic,
    Bmp,
    Tiff,
    Avif,
}

impl ImageType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "jpeg" | "jpg" => Some(ImageType::Jpeg),
            "png" => Some(ImageType::Png),
            "webp" => Some(ImageType::Webp),
            "gif" => Some(ImageType::Gif),
            "ico" => Some(ImageType::Ico),
            "svg" => Some(ImageType::Svg),
            "heic" => Some(ImageType::Heic),
            "bmp" => Some(ImageType::Bmp),
            "tiff" | "tif" => Some(ImageType::Tiff),
            "avif" => Some(ImageType::Avif),
            _ => None,
        }
    }

    /// Detect the format from magic bytes
    pub fn detect(data: &[u8]) -> Self {
        match data {
            [0xFF, 0xD8, 0xFF, ..] => ImageType::Jpeg,
            [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, ..] => ImageType::Png,
            [b'G', b'I', b'F', b'8', ..] => ImageType::Gif,
            [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => ImageType::Webp,
            [0x00, 0x00, 0x01, 0x00, ..] => ImageType::Ico,
            [b'B', b'M', ..] => ImageType::Bmp,
            [b'I', b'I', 0x2A, 0x00, ..] | [b'M', b'M', 0x00, 0x2A, ..] => ImageType::Tiff,
            [_, _, _, _, b'f', b't', b'y', b'p', b'a', b'v', b'i', b'f', ..] => ImageType::Avif,
            [_, _, _, _, b'f', b't', b'y', b'p', b'h', b'e', b'i', b'c', ..]
            | [_, _, _, _, b'f', b't', b'y', b'p', b'm', b'i', b'f', b'1', ..] => ImageType::Heic,
            _ if Self::looks_like_svg(data) => ImageType::Svg,
            _ => ImageType::Unknown,
        }
    }

    fn looks_like_svg(data: &[u8]) -> bool {
        let head = &data[..data.len().min(1024)];
        let head = String::from_utf8_lossy(head);
        let head = head.trim_start();
        (head.starts_with("<?xml") || head.starts_with("<svg")) && head.contains("<svg")
    }

    pub fn supports_alpha(self) -> bool {
        !matches!(self, ImageType::Jpeg | ImageType::Bmp | ImageType::Unknown)
    }

    pub fn supports_animation(self) -> bool {
        matches!(self, ImageType::Gif | ImageType::Webp)
    }

    pub fn is_vector(self) -> bool {
        self == ImageType::Svg
    }

    pub fn good_for_web(self) -> bool {
        !matches!(self, ImageType::Tiff | ImageType::Bmp)
    }

    /// Formats whose encoders take a quality knob the byte budget can turn
    pub fn can_fit_to_bytes(self) -> bool {
        matches!(
            self,
            ImageType::Jpeg | ImageType::Webp | ImageType::Heic | ImageType::Tiff
        )
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            ImageType::Jpeg => "image/jpeg",
            ImageType::Png => "image/png",
            ImageType::Webp => "image/webp",
            ImageType::Gif => "image/gif",
            ImageType::Ico => "image/x-icon",
            ImageType::Svg => "image/svg+xml",
            ImageType::Heic => "image/heif",
            ImageType::Bmp => "image/bmp",
            ImageType::Tiff => "image/tiff",
            ImageType::Avif => "image/avif",
            ImageType::Unknown => "application/octet-stream",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ImageType::Jpeg => "jpg",
            ImageType::Png => "png",
            ImageType::Webp => "webp",
            ImageType::Gif => "gif",
            ImageType::Ico => "ico",
            ImageType::Svg => "svg",
            ImageType::Heic => "heic",
            ImageType::Bmp => "bmp",
            ImageType::Tiff => "tiff",
            ImageType::Avif => "avif",
            ImageType::Unknown => "bin",
        }
    }
}

impl fmt::Display for ImageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ImageType::Unknown => "unknown",
            other => other.extension(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(ImageType::parse("JPG"), Some(ImageType::Jpeg));
        assert_eq!(ImageType::parse("webp"), Some(ImageType::Webp));
        assert_eq!(ImageType::parse("tif"), Some(ImageType::Tiff));
        assert_eq!(ImageType::parse("psd"), None);
    }

    #[test]
    fn test_detect_magic_bytes() {
        assert_eq!(ImageType::detect(&[0xFF, 0xD8, 0xFF, 0xE0]), ImageType::Jpeg);
        assert_eq!(
            ImageType::detect(b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR"),
            ImageType::Png
        );
        assert_eq!(ImageType::detect(b"GIF89a...."), ImageType::Gif);
        assert_eq!(ImageType::detect(b"RIFF\0\0\0\0WEBPVP8 "), ImageType::Webp);
        assert_eq!(ImageType::detect(&[0, 0, 1, 0, 1, 0]), ImageType::Ico);
        assert_eq!(
            ImageType::detect(b"<?xml version=\"1.0\"?><svg></svg>"),
            ImageType::Svg
        );
        assert_eq!(ImageType::detect(b"not an image"), ImageType::Unknown);
    }

    #[test]
    fn test_capabilities() {
        assert!(!ImageType::Jpeg.supports_alpha());
        assert!(ImageType::Png.supports_alpha());
        assert!(ImageType::Gif.supports_animation());
        assert!(!ImageType::Png.supports_animation());
        assert!(ImageType::Svg.is_vector());
        assert!(!ImageType::Tiff.good_for_web());
        assert!(ImageType::Webp.can_fit_to_bytes());
        assert!(!ImageType::Png.can_fit_to_bytes());
    }
}
