use super::ImageType;
use bytes::Bytes;

/// Encoded bytes plus their detected format.
///
/// Used for source images, watermark overlays and the fallback image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub data: Bytes,
    pub image_type: ImageType,
}

impl ImagePayload {
    pub fn new(data: impl Into<Bytes>, image_type: ImageType) -> Self {
        Self {
            data: data.into(),
            image_type,
        }
    }

    /// Build a payload whose type is sniffed from the magic bytes
    pub fn detect(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let image_type = ImageType::detect(&data);
        Self { data, image_type }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
