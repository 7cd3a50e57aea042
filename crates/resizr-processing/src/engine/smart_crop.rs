use image::{imageops, DynamicImage, GenericImageView, GrayImage};

/// Saliency map is computed on a copy downscaled by this factor
const SALIENCY_DOWNSCALE: u32 = 4;

pub struct SmartCrop;

impl SmartCrop {
    /// Edge strength blended with local variance, on the downscaled grid
    fn saliency_map(gray: &GrayImage) -> Vec<f32> {
        let (width, height) = gray.dimensions();
        let mut saliency = vec![0.0f32; (width * height) as usize];

        for y in 1..height.saturating_sub(1) {
            for x in 1..width.saturating_sub(1) {
                let px = |dx: i32, dy: i32| {
                    gray.get_pixel((x as i32 + dx) as u32, (y as i32 + dy) as u32)[0] as i32
                };

                let gx = (px(1, 0) - px(-1, 0)).abs();
                let gy = (px(0, 1) - px(0, -1)).abs();
                let edge_strength = ((gx * gx + gy * gy) as f32).sqrt();

                let mut sum = 0i32;
                let mut sum_sq = 0i32;
                for dy in -1..=1 {
                    for dx in -1..=1 {
                        let v = px(dx, dy);
                        sum += v;
                        sum_sq += v * v;
                    }
                }
                let mean = sum as f32 / 9.0;
                let variance = (sum_sq as f32 / 9.0) - mean * mean;

                saliency[(y * width + x) as usize] = edge_strength * 0.6 + variance * 0.4;
            }
        }

        saliency
    }

    /// Summed-area table with a zero row and column in front
    fn integral(values: &[f32], width: u32, height: u32) -> Vec<f64> {
        let stride = (width + 1) as usize;
        let mut table = vec![0.0f64; stride * (height + 1) as usize];
        for y in 0..height as usize {
            let mut row_sum = 0.0f64;
            for x in 0..width as usize {
                row_sum += values[y * width as usize + x] as f64;
                table[(y + 1) * stride + x + 1] = table[y * stride + x + 1] + row_sum;
            }
        }
        table
    }

    /// Top-left corner of the most salient `target_width`x`target_height` window
    pub fn find_best_window(img: &DynamicImage, target_width: u32, target_height: u32) -> (u32, u32) {
        let (orig_width, orig_height) = img.dimensions();
        if target_width >= orig_width && target_height >= orig_height {
            return (0, 0);
        }

        let small_width = (orig_width / SALIENCY_DOWNSCALE).max(1);
        let small_height = (orig_height / SALIENCY_DOWNSCALE).max(1);
        let small_gray = imageops::resize(
            &img.to_luma8(),
            small_width,
            small_height,
            imageops::FilterType::Triangle,
        );

        let saliency = Self::saliency_map(&small_gray);
        let table = Self::integral(&saliency, small_width, small_height);
        let stride = (small_width + 1) as usize;

        let window_w = ((target_width.min(orig_width) / SALIENCY_DOWNSCALE).max(1)).min(small_width);
        let window_h = ((target_height.min(orig_height) / SALIENCY_DOWNSCALE).max(1)).min(small_height);

        let window_sum = |x: usize, y: usize| {
            let (x1, y1) = (x + window_w as usize, y + window_h as usize);
            table[y1 * stride + x1] - table[y * stride + x1] - table[y1 * stride + x]
                + table[y * stride + x]
        };

        // Start from the centered window so flat images crop like center gravity
        let center_x = ((small_width - window_w) / 2) as usize;
        let center_y = ((small_height - window_h) / 2) as usize;
        let mut best = (center_x, center_y);
        let mut best_score = window_sum(center_x, center_y);

        for y in 0..=(small_height - window_h) as usize {
            for x in 0..=(small_width - window_w) as usize {
                let score = window_sum(x, y);
                if score > best_score {
                    best_score = score;
                    best = (x, y);
                }
            }
        }

        let max_left = orig_width.saturating_sub(target_width);
        let max_top = orig_height.saturating_sub(target_height);
        let left = (best.0 as u32 * SALIENCY_DOWNSCALE).min(max_left);
        let top = (best.1 as u32 * SALIENCY_DOWNSCALE).min(max_top);

        tracing::debug!(
            left = left,
            top = top,
            width = target_width,
            height = target_height,
            score = best_score,
            "Smart crop window selected"
        );

        (left, top)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn test_flat_image_uses_center() {
        let img =
            DynamicImage::ImageRgba8(RgbaImage::from_pixel(100, 100, Rgba([255, 255, 255, 255])));
        assert_eq!(SmartCrop::find_best_window(&img, 40, 100), (28, 0));
    }

    #[test]
    fn test_window_moves_to_detail() {
        let mut canvas = RgbaImage::from_pixel(200, 100, Rgba([255, 255, 255, 255]));
        // Checkerboard detail in the right part of the image
        for y in 0..100 {
            for x in 150..200 {
                if (x / 4 + y / 4) % 2 == 0 {
                    canvas.put_pixel(x, y, Rgba([0, 0, 0, 255]));
                }
            }
        }
        let img = DynamicImage::ImageRgba8(canvas);
        let (left, top) = SmartCrop::find_best_window(&img, 60, 100);
        assert!(left >= 120, "left = {}", left);
        assert_eq!(top, 0);
    }

    #[test]
    fn test_window_fits_inside_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(37, 23, Rgba([0, 0, 0, 255])));
        let (left, top) = SmartCrop::find_best_window(&img, 10, 10);
        assert!(left + 10 <= 37);
        assert!(top + 10 <= 23);

        assert_eq!(SmartCrop::find_best_window(&img, 37, 23), (0, 0));
    }
}
