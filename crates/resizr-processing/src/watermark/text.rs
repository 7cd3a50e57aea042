//! Text watermarks rendered to a PNG overlay
//!
//! The text is measured first so the canvas fits the glyph bounding box exactly,
//! then drawn as white with glyph coverage in the alpha channel.

use ab_glyph::{Font, FontVec, PxScale, ScaleFont};
use image::{DynamicImage, GrayImage, ImageFormat, Luma, Rgba, RgbaImage};
use resizr_core::{ImagePayload, ImageType, TransformError, TransformResult};
use std::io::Cursor;

/// Point size used for every text watermark
pub const WATERMARK_FONT_SIZE: f32 = 20.0;

/// Pixel box of a rendered line of text
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextBox {
    pub width: u32,
    pub height: u32,
    /// Distance from the top of the box to the baseline
    pub baseline: u32,
}

/// Source of glyph metrics and coverage
pub trait GlyphProvider {
    fn measure(&self, text: &str) -> TextBox;

    /// Coverage mask of `text` drawn on its baseline, sized to `bounds`
    fn render(&self, text: &str, bounds: &TextBox) -> GrayImage;
}

/// Outline (TrueType/OpenType) font at the watermark point size
pub struct OutlineFont {
    font: FontVec,
    scale: PxScale,
}

impl OutlineFont {
    pub fn from_bytes(data: Vec<u8>) -> TransformResult<Self> {
        let font = FontVec::try_from_vec(data)
            .map_err(|e| TransformError::Config(format!("Invalid watermark font: {}", e)))?;
        let scale = font
            .pt_to_px_scale(WATERMARK_FONT_SIZE)
            .unwrap_or(PxScale::from(WATERMARK_FONT_SIZE));
        Ok(Self { font, scale })
    }
}

impl GlyphProvider for OutlineFont {
    fn measure(&self, text: &str) -> TextBox {
        let scaled = self.font.as_scaled(self.scale);

        let mut width = 0.0f32;
        let mut previous = None;
        for c in text.chars() {
            let id = scaled.glyph_id(c);
            if let Some(prev) = previous {
                width += scaled.kern(prev, id);
            }
            width += scaled.h_advance(id);
            previous = Some(id);
        }

        let height = (scaled.height() + scaled.line_gap()).ceil() as u32;
        let descent = scaled.descent().abs().ceil() as u32;

        TextBox {
            width: width.ceil() as u32,
            height,
            baseline: height.saturating_sub(descent),
        }
    }

    fn render(&self, text: &str, bounds: &TextBox) -> GrayImage {
        let mut mask = GrayImage::new(bounds.width, bounds.height);
        let ascent = self.font.as_scaled(self.scale).ascent();
        // draw_text_mut positions the top of the line, one ascent above the baseline
        let top = bounds.baseline as i32 - ascent.round() as i32;
        imageproc::drawing::draw_text_mut(
            &mut mask,
            Luma([255u8]),
            0,
            top,
            self.scale,
            &self.font,
            text,
        );
        mask
    }
}

/// Render `text` into a PNG payload with a transparent background
pub fn render_text_watermark<P: GlyphProvider>(
    provider: &P,
    text: &str,
) -> TransformResult<ImagePayload> {
    let bounds = provider.measure(text);
    if bounds.width == 0 || bounds.height == 0 {
        return Err(TransformError::Config(format!(
            "Watermark text {:?} renders to an empty image",
            text
        )));
    }

    let mask = provider.render(text, &bounds);
    let overlay = RgbaImage::from_fn(bounds.width, bounds.height, |x, y| {
        let coverage = mask.get_pixel_checked(x, y).map_or(0, |p| p[0]);
        Rgba([255, 255, 255, coverage])
    });

    let mut out = Vec::new();
    DynamicImage::ImageRgba8(overlay)
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .map_err(|e| TransformError::Config(format!("Can't encode text watermark: {}", e)))?;

    tracing::debug!(
        width = bounds.width,
        height = bounds.height,
        bytes = out.len(),
        "Text watermark rendered"
    );

    Ok(ImagePayload::new(out, ImageType::Png))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GenericImageView;

    /// Monospace block glyphs: every character is a filled 6x10 cell
    struct BlockGlyphs;

    impl GlyphProvider for BlockGlyphs {
        fn measure(&self, text: &str) -> TextBox {
            TextBox {
                width: text.chars().count() as u32 * 6,
                height: 12,
                baseline: 10,
            }
        }

        fn render(&self, text: &str, bounds: &TextBox) -> GrayImage {
            let mut mask = GrayImage::new(bounds.width, bounds.height);
            for i in 0..text.chars().count() as u32 {
                for y in 0..bounds.baseline {
                    for x in i * 6..i * 6 + 5 {
                        mask.put_pixel(x, y, Luma([255]));
                    }
                }
            }
            mask
        }
    }

    #[test]
    fn test_canvas_matches_text_box() {
        let payload = render_text_watermark(&BlockGlyphs, "abc").unwrap();
        assert_eq!(payload.image_type, ImageType::Png);

        let img = image::load_from_memory(&payload.data).unwrap();
        assert_eq!(img.dimensions(), (18, 12));
        assert_eq!(img.get_pixel(0, 0), Rgba([255, 255, 255, 255]));
        // Gap between glyphs and the descender area stay transparent
        assert_eq!(img.get_pixel(5, 0)[3], 0);
        assert_eq!(img.get_pixel(0, 11)[3], 0);
    }

    #[test]
    fn test_empty_text_is_rejected() {
        let err = render_text_watermark(&BlockGlyphs, "").unwrap_err();
        assert!(matches!(err, TransformError::Config(_)));
    }

    #[test]
    fn test_invalid_font_bytes() {
        assert!(OutlineFont::from_bytes(b"not a font".to_vec()).is_err());
    }
}
