//! Randomized image variation pipeline.
//!
//! Applies a fixed sequence of subtle, randomly parameterized transforms so
//! each run of the same source yields a visually near-identical but
//! byte-distinct image. Stage order: horizontal flip, vertical flip,
//! rotation, perspective jitter, elastic distortion, scale-and-refit,
//! Gaussian noise, color jitter, opacity.
//!
//! All randomness flows through an injected [`rand::Rng`]; given the same
//! seed and config, the output is reproducible.

mod color;
mod geometry;

use image::{imageops, DynamicImage};
use rand::Rng;

use crate::config::AugmentConfig;
use crate::{PhotovarError, Result};

/// Draw a signed magnitude from the two-band range
/// `[-max, -min] ∪ [min, max]`: magnitude uniform in `[min, max]`, sign by
/// fair coin. Guarantees a perceptible-but-bounded change whenever
/// `min > 0`, unlike a plain `[-max, max]` draw which clusters near zero.
pub(crate) fn two_band_sample<R: Rng>(min: f32, max: f32, rng: &mut R) -> f32 {
    let magnitude = if (max - min).abs() < f32::EPSILON {
        max
    } else {
        rng.gen_range(min..max)
    };
    if rng.gen_bool(0.5) {
        magnitude
    } else {
        -magnitude
    }
}

/// Apply the full variation pipeline to one image.
///
/// The output always has the input's dimensions. The result is RGB unless
/// `opacity < 1.0`, which forces an RGBA output.
///
/// # Errors
///
/// Returns [`PhotovarError::InvalidConfig`] when `config` fails validation.
pub fn transform<R: Rng>(
    image: &DynamicImage,
    config: &AugmentConfig,
    rng: &mut R,
) -> Result<DynamicImage> {
    config.validate()?;

    let mut rgb = image.to_rgb8();
    if rgb.width() == 0 || rgb.height() == 0 {
        return Err(PhotovarError::internal("cannot transform an empty image"));
    }

    if config.hflip {
        rgb = imageops::flip_horizontal(&rgb);
    }
    if config.vflip {
        rgb = imageops::flip_vertical(&rgb);
    }

    if config.rot_max > 0.0 {
        let angle = two_band_sample(config.rot_min, config.rot_max, rng);
        rgb = geometry::rotate(&rgb, angle);
    }

    if config.persp_max > 0.0 {
        rgb = geometry::perspective_jitter(&rgb, config.persp_min, config.persp_max, rng);
    }

    if config.distortion_strength > 0.0 {
        rgb = geometry::elastic_distort(
            &rgb,
            config.distortion_strength,
            config.distortion_smoothness,
            rng,
        );
    }

    if (config.scale_x - 1.0).abs() > f32::EPSILON || (config.scale_y - 1.0).abs() > f32::EPSILON {
        rgb = geometry::scale_and_refit(&rgb, config.scale_x, config.scale_y, config.fill_mode);
    }

    if config.noise_level > 0.0 {
        rgb = color::add_gaussian_noise(&rgb, config.noise_level, rng);
    }

    if config.color_jitter > 0.0 {
        rgb = color::color_jitter(&rgb, config.color_jitter, rng);
    }

    if config.opacity < 1.0 {
        Ok(DynamicImage::ImageRgba8(color::apply_opacity(
            &rgb,
            config.opacity,
        )))
    } else {
        Ok(DynamicImage::ImageRgb8(rgb))
    }
}
