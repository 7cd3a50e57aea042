//! Scale and placement math
//!
//! Pure functions shared by the orchestrator, the animation handler and the
//! watermark compositor. Nothing in here touches pixels.

use resizr_core::{
    AutoResizePolicy, Gravity, GravityType, ImageType, ProcessingConfig, ProcessingOptions,
    ResizingType, TransformError, TransformResult,
};

/// Largest discrete pre-scale factor an engine can apply while decoding
pub const MAX_DISCRETE_SHRINK: u32 = 8;

/// `round(value * scale)`, keeping 0 as "unconstrained"
pub fn scale_dimension(value: u32, scale: f64) -> u32 {
    if value == 0 {
        return 0;
    }
    (value as f64 * scale).round() as u32
}

/// Smaller of two values where 0 means "no constraint"
pub fn min_non_zero(a: u32, b: u32) -> u32 {
    match (a, b) {
        (0, b) => b,
        (a, 0) => a,
        (a, b) => a.min(b),
    }
}

/// Scale factor (`1 / shrink`) that maps the scalable region onto the request.
///
/// `natural_*` are the source's own dimensions and only feed the `auto` policy;
/// `scale_*` are the dimensions being scaled, already constrained by any explicit
/// crop box, so cropping later happens at full target resolution.
pub fn compute_scale(
    natural_width: u32,
    natural_height: u32,
    scale_width: u32,
    scale_height: u32,
    options: &ProcessingOptions,
    policy: &AutoResizePolicy,
    image_type: ImageType,
) -> f64 {
    let src_w = scale_width as f64;
    let src_h = scale_height as f64;
    let dst_w = if options.width == 0 {
        src_w
    } else {
        options.width as f64
    };
    let dst_h = if options.height == 0 {
        src_h
    } else {
        options.height as f64
    };

    let mut shrink = if dst_w == src_w && dst_h == src_h {
        1.0
    } else {
        let width_shrink = src_w / dst_w;
        let height_shrink = src_h / dst_h;

        let resizing_type = match options.resizing_type {
            ResizingType::Auto => policy.resolve(
                options.width,
                options.height,
                natural_width,
                natural_height,
            ),
            other => other,
        };

        if options.width == 0 {
            height_shrink
        } else if options.height == 0 {
            width_shrink
        } else if resizing_type == ResizingType::Fit {
            width_shrink.max(height_shrink)
        } else {
            width_shrink.min(height_shrink)
        }
    };

    if !options.enlarge && shrink < 1.0 && !image_type.is_vector() {
        shrink = 1.0;
    }

    let dpr = if options.dpr > 0.0 { options.dpr } else { 1.0 };
    shrink /= dpr;

    // A shrink larger than the source would leave nothing to draw
    if shrink > src_w {
        shrink = src_w;
    }
    if shrink > src_h {
        shrink = src_h;
    }

    1.0 / shrink
}

/// Top-left corner of an `inner` box placed inside a `container` box.
///
/// With `allow_overflow` the box may hang off any edge as long as one row and one
/// column stay inside; this is only used for watermark placement.
pub fn compute_position(
    container_width: u32,
    container_height: u32,
    inner_width: u32,
    inner_height: u32,
    gravity: &Gravity,
    allow_overflow: bool,
) -> (i32, i32) {
    let width = container_width as i32;
    let height = container_height as i32;
    let inner_w = inner_width as i32;
    let inner_h = inner_height as i32;

    let (mut left, mut top);

    if gravity.kind == GravityType::FocusPoint {
        let point_x = scale_dimension(container_width, gravity.x) as i32;
        let point_y = scale_dimension(container_height, gravity.y) as i32;

        left = point_x - inner_w / 2;
        top = point_y - inner_h / 2;
    } else {
        let off_x = gravity.x as i32;
        let off_y = gravity.y as i32;

        left = (width - inner_w + 1) / 2 + off_x;
        top = (height - inner_h + 1) / 2 + off_y;

        if gravity.kind.is_north() {
            top = off_y;
        }
        if gravity.kind.is_east() {
            left = width - inner_w - off_x;
        }
        if gravity.kind.is_south() {
            top = height - inner_h - off_y;
        }
        if gravity.kind.is_west() {
            left = off_x;
        }
    }

    let (min_x, max_x, min_y, max_y) = if allow_overflow {
        (-inner_w + 1, width - 1, -inner_h + 1, height - 1)
    } else {
        (0, width - inner_w, 0, height - inner_h)
    };

    left = left.min(max_x).max(min_x);
    top = top.min(max_y).max(min_y);

    (left, top)
}

/// Reject sources whose pixel count exceeds the configured resolution
pub fn check_dimensions(width: u32, height: u32, config: &ProcessingConfig) -> TransformResult<()> {
    if width as u64 * height as u64 > config.max_src_pixels() {
        return Err(TransformError::DimensionsTooLarge {
            width,
            height,
            max_megapixels: config.max_src_resolution,
        });
    }
    Ok(())
}

/// Whether the source should be re-decoded at a reduced size
pub fn can_scale_on_load(image_type: ImageType, scale: f64, disabled: bool) -> bool {
    if image_type == ImageType::Svg {
        return true;
    }
    if disabled || scale >= 1.0 {
        return false;
    }
    matches!(image_type, ImageType::Jpeg | ImageType::Webp)
}

/// Largest power of two not above the continuous shrink, capped at 8
pub fn discrete_shrink(scale: f64) -> u32 {
    let shrink = (1.0 / scale) as u32;
    match shrink {
        s if s >= MAX_DISCRETE_SHRINK => MAX_DISCRETE_SHRINK,
        s if s >= 4 => 4,
        s if s >= 2 => 2,
        _ => 1,
    }
}
