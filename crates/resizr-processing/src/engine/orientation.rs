use super::Angle;
use std::io::Cursor;

/// Read the EXIF orientation tag from encoded image data.
///
/// Returns 1 (normal) when the container has no EXIF block or the tag is invalid.
pub fn read_orientation(data: &[u8]) -> u8 {
    let mut cursor = Cursor::new(data);
    let exif = match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(exif) => exif,
        Err(_) => return 1,
    };

    exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|field| field.value.get_uint(0))
        .filter(|v| (1..=8).contains(v))
        .map(|v| v as u8)
        .unwrap_or(1)
}

/// Rotation and mirroring that undo an EXIF orientation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Orientation {
    pub angle: Angle,
    pub flip: bool,
    /// Orientations 5-8 store the image transposed
    pub swaps_dimensions: bool,
}

impl Orientation {
    pub fn from_exif(orientation: u8) -> Self {
        let angle = match orientation {
            3 | 4 => Angle::D180,
            5 | 6 => Angle::D90,
            7 | 8 => Angle::D270,
            _ => Angle::D0,
        };

        Self {
            angle,
            flip: matches!(orientation, 2 | 4 | 5 | 7),
            swaps_dimensions: (5..=8).contains(&orientation),
        }
    }

    /// Dimensions as displayed once the orientation is applied
    pub fn display_dimensions(&self, width: u32, height: u32) -> (u32, u32) {
        if self.swaps_dimensions {
            (height, width)
        } else {
            (width, height)
        }
    }
}
