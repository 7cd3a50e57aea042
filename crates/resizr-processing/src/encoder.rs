//! Byte-budget encoding
//!
//! Re-encodes with a lower quality until the output fits the budget or the quality
//! floor is reached. The step depends on how far the last attempt overshot.

use crate::engine::{ImageEngine, Raster, StageExt};
use bytes::Bytes;
use resizr_core::{ImageType, TransformResult};

/// Quality at which the budget loop gives up and returns what it has
pub const MIN_FIT_QUALITY: u8 = 10;

/// Quality multiplier for an attempt that came out `overshoot` times too large
pub fn quality_multiplier(overshoot: f64) -> f64 {
    if overshoot > 3.0 {
        0.25
    } else if overshoot > 1.5 {
        0.5
    } else {
        0.75
    }
}

/// Run `encode` with decreasing quality until the result fits `max_bytes`
pub fn fit_to_bytes<F>(quality: u8, max_bytes: usize, mut encode: F) -> TransformResult<Bytes>
where
    F: FnMut(u8) -> TransformResult<Bytes>,
{
    let mut quality = quality;

    loop {
        let result = encode(quality)?;
        if max_bytes == 0 || result.len() <= max_bytes || quality <= MIN_FIT_QUALITY {
            return Ok(result);
        }

        let overshoot = result.len() as f64 / max_bytes as f64;
        let next = (quality as f64 * quality_multiplier(overshoot)) as u8;

        tracing::debug!(
            size = result.len(),
            max_bytes = max_bytes,
            quality = quality,
            next_quality = next,
            "Output over byte budget, re-encoding"
        );

        quality = next;
    }
}

/// Encode `raster` as `format`, lowering quality until it fits `max_bytes`
pub fn save_to_fit_bytes<E: ImageEngine>(
    engine: &E,
    raster: &mut E::Raster,
    format: ImageType,
    quality: u8,
    max_bytes: usize,
    strip_metadata: bool,
) -> TransformResult<Bytes> {
    raster.copy_memory().stage("encode")?;

    fit_to_bytes(quality, max_bytes, |q| {
        engine
            .encode(&mut *raster, format, q, strip_metadata)
            .stage("encode")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ImageRaster, PixelEngine};
    use image::{DynamicImage, Rgb, RgbImage};
    use resizr_core::TransformError;

    #[test]
    fn test_quality_multiplier() {
        assert_eq!(quality_multiplier(4.0), 0.25);
        assert_eq!(quality_multiplier(3.0), 0.5);
        assert_eq!(quality_multiplier(2.0), 0.5);
        assert_eq!(quality_multiplier(1.5), 0.75);
        assert_eq!(quality_multiplier(1.1), 0.75);
    }

    #[test]
    fn test_quality_steps_down_until_it_fits() {
        let mut attempts = Vec::new();
        let result = fit_to_bytes(80, 1000, |q| {
            attempts.push(q);
            Ok(Bytes::from(vec![0u8; q as usize * 100]))
        })
        .unwrap();

        // 8000 bytes: x8 overshoot, then 2000 bytes: x2 overshoot
        assert_eq!(attempts, vec![80, 20, 10]);
        assert_eq!(result.len(), 1000);
    }

    #[test]
    fn test_quality_floor_returns_last_attempt() {
        let mut attempts = Vec::new();
        let result = fit_to_bytes(80, 1, |q| {
            attempts.push(q);
            Ok(Bytes::from(vec![0u8; 500]))
        })
        .unwrap();

        assert_eq!(attempts, vec![80, 20, 5]);
        assert_eq!(result.len(), 500);
    }

    #[test]
    fn test_first_fit_is_returned() {
        let mut calls = 0;
        fit_to_bytes(80, 10_000, |_| {
            calls += 1;
            Ok(Bytes::from_static(b"small"))
        })
        .unwrap();
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_encode_error_stops_the_loop() {
        let err = fit_to_bytes(80, 10, |_| Err(TransformError::engine("encode", "broken")))
            .unwrap_err();
        assert!(matches!(err, TransformError::Engine { stage: "encode", .. }));
    }

    #[test]
    fn test_save_to_fit_bytes_shrinks_jpeg() {
        let engine = PixelEngine::new();
        let noise = RgbImage::from_fn(128, 128, |x, y| {
            let v = ((x * 7919 + y * 104729) % 251) as u8;
            Rgb([v, v.wrapping_mul(3), v.wrapping_mul(7)])
        });
        let mut raster = ImageRaster::new(DynamicImage::ImageRgb8(noise));

        let full = engine
            .encode(&mut raster, ImageType::Jpeg, 95, true)
            .unwrap();
        let budget = full.len() / 2;

        let fitted =
            save_to_fit_bytes(&engine, &mut raster, ImageType::Jpeg, 95, budget, true).unwrap();
        assert!(fitted.len() < full.len());
        assert_eq!(ImageType::detect(&fitted), ImageType::Jpeg);
    }
}
