//! Container sniffing
//!
//! ICO files hold several images of different sizes. The pipeline picks the largest
//! one and processes it as a standalone PNG or BMP.

use bytes::{BufMut, Bytes, BytesMut};
use resizr_core::{ImagePayload, ImageType, TransformError, TransformResult};

const ICO_HEADER_LEN: usize = 6;
const ICO_ENTRY_LEN: usize = 16;
const BMP_FILE_HEADER_LEN: usize = 14;
const BITMAPINFOHEADER_LEN: u32 = 40;
const BI_BITFIELDS: u32 = 3;
const MAX_PALETTE_ENTRIES: u32 = 256;

/// Location and format of an image embedded in a container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SniffedImage {
    pub offset: usize,
    pub size: usize,
    pub image_type: ImageType,
}

pub trait FormatSniffer: Send + Sync {
    fn sniff(&self, data: &[u8]) -> TransformResult<SniffedImage>;

    /// Sniff `data` and cut the embedded image out as its own payload
    fn extract(&self, data: &[u8]) -> TransformResult<ImagePayload> {
        let sniffed = self.sniff(data)?;
        extract_embedded(data, &sniffed)
    }
}

/// Slice the embedded image, completing headerless BMP data into a BMP file
pub fn extract_embedded(data: &[u8], sniffed: &SniffedImage) -> TransformResult<ImagePayload> {
    let end = sniffed
        .offset
        .checked_add(sniffed.size)
        .filter(|end| *end <= data.len())
        .ok_or_else(|| {
            TransformError::Sniff(format!(
                "embedded image at {}+{} is outside the {} byte container",
                sniffed.offset,
                sniffed.size,
                data.len()
            ))
        })?;
    let embedded = &data[sniffed.offset..end];

    if sniffed.image_type == ImageType::Bmp && !embedded.starts_with(b"BM") {
        return Ok(ImagePayload::new(fix_bmp_header(embedded)?, ImageType::Bmp));
    }

    Ok(ImagePayload::new(
        Bytes::copy_from_slice(embedded),
        sniffed.image_type,
    ))
}

fn read_u16(data: &[u8], at: usize) -> Option<u16> {
    data.get(at..at + 2).map(|b| u16::from_le_bytes([b[0], b[1]]))
}

fn read_u32(data: &[u8], at: usize) -> Option<u32> {
    data.get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Prepend a BMP file header to a bare DIB as stored in icons.
///
/// Icon DIBs declare twice the real height (colour rows plus the AND mask), so the
/// height is halved too.
pub fn fix_bmp_header(dib: &[u8]) -> TransformResult<Bytes> {
    let invalid = || TransformError::Sniff("embedded BMP has an incomplete header".into());

    let header_len = read_u32(dib, 0).ok_or_else(invalid)?;
    let height = read_u32(dib, 8).ok_or_else(invalid)? as i32;
    let bpp = read_u16(dib, 14).ok_or_else(invalid)?;
    let compression = read_u32(dib, 16).ok_or_else(invalid)?;
    let colors_used = read_u32(dib, 32).ok_or_else(invalid)?;
    if header_len < BITMAPINFOHEADER_LEN || header_len as usize > dib.len() {
        return Err(invalid());
    }

    let palette_entries = match colors_used {
        0 if bpp <= 8 => 1u32 << bpp,
        n => n,
    };
    if palette_entries > MAX_PALETTE_ENTRIES {
        return Err(TransformError::Sniff(format!(
            "embedded BMP declares {} palette entries",
            palette_entries
        )));
    }
    let masks = if compression == BI_BITFIELDS && header_len == BITMAPINFOHEADER_LEN {
        12
    } else {
        0
    };
    let pixel_data = header_len
        .checked_add(palette_entries * 4)
        .and_then(|n| n.checked_add(masks))
        .filter(|&n| n as usize <= dib.len())
        .ok_or_else(|| TransformError::Sniff("embedded BMP pixel data is out of bounds".into()))?;
    let pixel_offset = BMP_FILE_HEADER_LEN as u32 + pixel_data;

    let mut out = BytesMut::with_capacity(BMP_FILE_HEADER_LEN + dib.len());
    out.put_slice(b"BM");
    out.put_u32_le((BMP_FILE_HEADER_LEN + dib.len()) as u32);
    out.put_u32_le(0);
    out.put_u32_le(pixel_offset);
    out.put_slice(&dib[..8]);
    out.put_i32_le(height / 2);
    out.put_slice(&dib[12..]);

    Ok(out.freeze())
}

/// Picks the largest image of an ICO container, then the deepest colour
#[derive(Debug, Clone, Copy, Default)]
pub struct IcoSniffer;

#[derive(Debug, Clone, Copy)]
struct IcoEntry {
    width: u32,
    height: u32,
    bpp: u16,
    size: usize,
    offset: usize,
}

impl IcoSniffer {
    fn entries(data: &[u8]) -> TransformResult<Vec<IcoEntry>> {
        let invalid = |msg: &str| TransformError::Sniff(format!("invalid ICO: {}", msg));

        let reserved = read_u16(data, 0).ok_or_else(|| invalid("truncated header"))?;
        let kind = read_u16(data, 2).ok_or_else(|| invalid("truncated header"))?;
        let count = read_u16(data, 4).ok_or_else(|| invalid("truncated header"))?;
        if reserved != 0 || !(kind == 1 || kind == 2) {
            return Err(invalid("bad header"));
        }
        if count == 0 {
            return Err(invalid("no images"));
        }

        (0..count as usize)
            .map(|i| {
                let at = ICO_HEADER_LEN + i * ICO_ENTRY_LEN;
                let entry = data
                    .get(at..at + ICO_ENTRY_LEN)
                    .ok_or_else(|| invalid("truncated directory"))?;
                let dimension = |b: u8| if b == 0 { 256 } else { b as u32 };
                Ok(IcoEntry {
                    width: dimension(entry[0]),
                    height: dimension(entry[1]),
                    bpp: u16::from_le_bytes([entry[6], entry[7]]),
                    size: u32::from_le_bytes([entry[8], entry[9], entry[10], entry[11]]) as usize,
                    offset: u32::from_le_bytes([entry[12], entry[13], entry[14], entry[15]])
                        as usize,
                })
            })
            .collect()
    }
}

impl FormatSniffer for IcoSniffer {
    fn sniff(&self, data: &[u8]) -> TransformResult<SniffedImage> {
        let entries = Self::entries(data)?;
        let best = entries
            .iter()
            .max_by_key(|e| (e.width as u64 * e.height as u64, e.bpp))
            .ok_or_else(|| TransformError::Sniff("invalid ICO: no images".into()))?;

        let head = data.get(best.offset..).unwrap_or_default();
        let image_type = match ImageType::detect(head) {
            ImageType::Png => ImageType::Png,
            // Icon entries are either PNG or a headerless DIB
            _ => ImageType::Bmp,
        };

        tracing::debug!(
            entries = entries.len(),
            width = best.width,
            height = best.height,
            bpp = best.bpp,
            image_type = %image_type,
            "ICO image selected"
        );

        Ok(SniffedImage {
            offset: best.offset,
            size: best.size,
            image_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, GenericImageView, ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    fn png(size: u32) -> Vec<u8> {
        let mut out = Vec::new();
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(size, size, Rgba([9, 9, 9, 255])))
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    /// ICO container from (width, height, bpp, payload) entries
    fn ico(images: &[(u8, u8, u16, Vec<u8>)]) -> Vec<u8> {
        let mut out = vec![0, 0, 1, 0];
        out.extend_from_slice(&(images.len() as u16).to_le_bytes());
        let mut offset = ICO_HEADER_LEN + images.len() * ICO_ENTRY_LEN;
        for (w, h, bpp, data) in images {
            out.extend_from_slice(&[*w, *h, 0, 0, 1, 0]);
            out.extend_from_slice(&bpp.to_le_bytes());
            out.extend_from_slice(&(data.len() as u32).to_le_bytes());
            out.extend_from_slice(&(offset as u32).to_le_bytes());
            offset += data.len();
        }
        for (_, _, _, data) in images {
            out.extend_from_slice(data);
        }
        out
    }

    /// 2x2 24-bit DIB: bottom row blue, top row red, plus the AND mask
    fn dib_2x2() -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&40u32.to_le_bytes());
        out.extend_from_slice(&2i32.to_le_bytes());
        out.extend_from_slice(&4i32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&24u16.to_le_bytes());
        out.extend_from_slice(&[0u8; 24]);
        // Rows are bottom-up, BGR, padded to 4 bytes
        out.extend_from_slice(&[255, 0, 0, 255, 0, 0, 0, 0]);
        out.extend_from_slice(&[0, 0, 255, 0, 0, 255, 0, 0]);
        out.extend_from_slice(&[0u8; 8]);
        out
    }

    #[test]
    fn test_largest_entry_wins() {
        let data = ico(&[(16, 16, 32, png(16)), (32, 32, 32, png(32)), (24, 24, 32, png(24))]);
        let payload = IcoSniffer.extract(&data).unwrap();

        assert_eq!(payload.image_type, ImageType::Png);
        let img = image::load_from_memory(&payload.data).unwrap();
        assert_eq!(img.dimensions(), (32, 32));
    }

    #[test]
    fn test_bit_depth_breaks_ties() {
        let data = ico(&[(16, 16, 8, png(16)), (16, 16, 32, png(16))]);
        let sniffed = IcoSniffer.sniff(&data).unwrap();
        let second_offset = ICO_HEADER_LEN + 2 * ICO_ENTRY_LEN + png(16).len();
        assert_eq!(sniffed.offset, second_offset);
    }

    #[test]
    fn test_headerless_bmp_is_fixed() {
        let data = ico(&[(2, 2, 24, dib_2x2())]);
        let payload = IcoSniffer.extract(&data).unwrap();

        assert_eq!(payload.image_type, ImageType::Bmp);
        assert!(payload.data.starts_with(b"BM"));
        let img = image::load_from_memory_with_format(&payload.data, ImageFormat::Bmp).unwrap();
        assert_eq!(img.dimensions(), (2, 2));
        assert_eq!(img.get_pixel(0, 0), Rgba([255, 0, 0, 255]));
        assert_eq!(img.get_pixel(1, 1), Rgba([0, 0, 255, 255]));
    }

    #[test]
    fn test_bogus_palette_is_rejected() {
        let mut dib = dib_2x2();
        dib[32..36].copy_from_slice(&0x4000_0000u32.to_le_bytes());
        let data = ico(&[(2, 2, 24, dib)]);
        assert!(matches!(
            IcoSniffer.extract(&data),
            Err(TransformError::Sniff(_))
        ));

        // 4 bpp implies a 16 entry palette the DIB does not contain
        let mut dib = dib_2x2();
        dib[14..16].copy_from_slice(&4u16.to_le_bytes());
        assert!(matches!(
            fix_bmp_header(&dib),
            Err(TransformError::Sniff(_))
        ));
    }

    #[test]
    fn test_invalid_containers_are_rejected() {
        assert!(matches!(
            IcoSniffer.sniff(b"nope"),
            Err(TransformError::Sniff(_))
        ));
        assert!(matches!(
            IcoSniffer.sniff(&[0, 0, 1, 0, 0, 0]),
            Err(TransformError::Sniff(_))
        ));

        // Directory points past the end of the file
        let mut data = ico(&[(16, 16, 32, png(16))]);
        data.truncate(30);
        assert!(matches!(
            IcoSniffer.extract(&data),
            Err(TransformError::Sniff(_))
        ));
    }
}
