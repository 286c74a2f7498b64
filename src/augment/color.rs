//! Photometric transform stages: Gaussian noise, color jitter, opacity.

use image::{Rgb, RgbImage, Rgba, RgbaImage};
use rand::Rng;
use rand_distr::{Distribution, Normal};

/// Add zero-mean Gaussian noise with standard deviation `sigma` to every
/// channel independently, clamped back to `[0, 255]`.
pub(crate) fn add_gaussian_noise<R: Rng>(img: &RgbImage, sigma: f32, rng: &mut R) -> RgbImage {
    debug_assert!(sigma > 0.0);
    // Normal::new only fails on non-finite sigma, which validate() rejects.
    let Ok(normal) = Normal::new(0.0f32, sigma) else {
        return img.clone();
    };

    let mut out = img.clone();
    for pixel in out.pixels_mut() {
        for channel in &mut pixel.0 {
            let noisy = f32::from(*channel) + normal.sample(rng);
            *channel = noisy.clamp(0.0, 255.0).round() as u8;
        }
    }
    out
}

/// Scale every channel by a single factor drawn from
/// `[1 - jitter, 1 + jitter]`, clamped to `[0, 255]`.
pub(crate) fn color_jitter<R: Rng>(img: &RgbImage, jitter: f32, rng: &mut R) -> RgbImage {
    debug_assert!(jitter > 0.0);
    let factor = rng.gen_range(1.0 - jitter..1.0 + jitter);

    let mut out = img.clone();
    for pixel in out.pixels_mut() {
        for channel in &mut pixel.0 {
            *channel = (f32::from(*channel) * factor).clamp(0.0, 255.0).round() as u8;
        }
    }
    out
}

/// Convert to RGBA with a uniform alpha of `opacity * 255`.
pub(crate) fn apply_opacity(img: &RgbImage, opacity: f32) -> RgbaImage {
    let alpha = (opacity * 255.0).clamp(0.0, 255.0).round() as u8;
    let mut out = RgbaImage::new(img.width(), img.height());
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let Rgb([r, g, b]) = *img.get_pixel(x, y);
        *pixel = Rgba([r, g, b, alpha]);
    }
    out
}
