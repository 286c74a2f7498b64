//! Geometric transform stages: rotation, perspective jitter, elastic
//! distortion, and scale-and-refit.
//!
//! Every stage samples out-of-bounds coordinates by edge reflection, never
//! zero fill, so no transform introduces a detectable border signature.

use image::{imageops, imageops::FilterType, ImageBuffer, Luma, Rgb, RgbImage};
use rand::Rng;

use crate::config::FillMode;

/// Reflect a continuous coordinate into `[0, len - 1]` (mirror at edges).
pub(crate) fn reflect_coord(p: f32, len: u32) -> f32 {
    debug_assert!(len > 0);
    if len == 1 {
        return 0.0;
    }
    let max = (len - 1) as f32;
    let period = 2.0 * max;
    let mut q = p.rem_euclid(period);
    if q > max {
        q = period - q;
    }
    q
}

/// Fetch a pixel channel with integer coordinates reflected into bounds.
fn channel_at(img: &RgbImage, x: i64, y: i64, c: usize) -> f32 {
    let xr = reflect_coord(x as f32, img.width()).round() as u32;
    let yr = reflect_coord(y as f32, img.height()).round() as u32;
    f32::from(img.get_pixel(xr.min(img.width() - 1), yr.min(img.height() - 1)).0[c])
}

/// Bilinear sample with reflected borders.
pub(crate) fn sample_bilinear(img: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let x = reflect_coord(x, img.width());
    let y = reflect_coord(y, img.height());
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let (x0, y0) = (x0 as i64, y0 as i64);

    let mut out = [0u8; 3];
    for (c, slot) in out.iter_mut().enumerate() {
        let top = channel_at(img, x0, y0, c) * (1.0 - fx) + channel_at(img, x0 + 1, y0, c) * fx;
        let bottom =
            channel_at(img, x0, y0 + 1, c) * (1.0 - fx) + channel_at(img, x0 + 1, y0 + 1, c) * fx;
        let v = top * (1.0 - fy) + bottom * fy;
        *slot = v.clamp(0.0, 255.0).round() as u8;
    }
    Rgb(out)
}

/// Catmull-Rom cubic kernel (a = -0.5).
fn cubic_weight(t: f32) -> f32 {
    let t = t.abs();
    if t < 1.0 {
        1.5 * t * t * t - 2.5 * t * t + 1.0
    } else if t < 2.0 {
        -0.5 * t * t * t + 2.5 * t * t - 4.0 * t + 2.0
    } else {
        0.0
    }
}

/// Bicubic sample with reflected borders. Used by the rotation and
/// perspective stages where resampling quality matters most.
pub(crate) fn sample_bicubic(img: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let x = reflect_coord(x, img.width());
    let y = reflect_coord(y, img.height());
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let (x0, y0) = (x0 as i64, y0 as i64);

    let mut out = [0u8; 3];
    for (c, slot) in out.iter_mut().enumerate() {
        let mut acc = 0.0f32;
        for n in -1i64..=2 {
            let wy = cubic_weight(n as f32 - fy);
            if wy == 0.0 {
                continue;
            }
            let mut row = 0.0f32;
            for m in -1i64..=2 {
                let wx = cubic_weight(m as f32 - fx);
                if wx != 0.0 {
                    row += wx * channel_at(img, x0 + m, y0 + n, c);
                }
            }
            acc += wy * row;
        }
        *slot = acc.clamp(0.0, 255.0).round() as u8;
    }
    Rgb(out)
}

/// Rotate about the image center by `angle_deg`, same canvas size,
/// bicubic resampling, reflected borders.
pub(crate) fn rotate(img: &RgbImage, angle_deg: f32) -> RgbImage {
    let (w, h) = img.dimensions();
    let cx = (w as f32 - 1.0) / 2.0;
    let cy = (h as f32 - 1.0) / 2.0;
    let theta = angle_deg.to_radians();
    // Inverse mapping: rotate destination coordinates by -theta.
    let (sin, cos) = (-theta).sin_cos();

    let mut out = RgbImage::new(w, h);
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let dx = x as f32 - cx;
        let dy = y as f32 - cy;
        let sx = cx + dx * cos - dy * sin;
        let sy = cy + dx * sin + dy * cos;
        *pixel = sample_bicubic(img, sx, sy);
    }
    out
}

/// 3x3 projective transform in row-major order.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Homography {
    m: [f32; 9],
}

impl Homography {
    /// Solve for the homography mapping each `from[i]` to `to[i]`.
    ///
    /// Returns `None` when the correspondences are degenerate (collinear
    /// corners), which cannot happen for the small jitters drawn here but
    /// is handled rather than panicking.
    pub(crate) fn from_points(from: &[(f32, f32); 4], to: &[(f32, f32); 4]) -> Option<Self> {
        // Standard 8x8 linear system for h11..h32 with h33 = 1.
        let mut a = [[0.0f64; 9]; 8];
        for i in 0..4 {
            let (x, y) = (f64::from(from[i].0), f64::from(from[i].1));
            let (u, v) = (f64::from(to[i].0), f64::from(to[i].1));
            a[2 * i] = [x, y, 1.0, 0.0, 0.0, 0.0, -u * x, -u * y, u];
            a[2 * i + 1] = [0.0, 0.0, 0.0, x, y, 1.0, -v * x, -v * y, v];
        }

        // Gaussian elimination with partial pivoting.
        for col in 0..8 {
            let pivot = (col..8).max_by(|&r1, &r2| {
                a[r1][col]
                    .abs()
                    .partial_cmp(&a[r2][col].abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })?;
            if a[pivot][col].abs() < 1e-12 {
                return None;
            }
            a.swap(col, pivot);
            let diag = a[col][col];
            for item in a[col].iter_mut() {
                *item /= diag;
            }
            for row in 0..8 {
                if row != col {
                    let factor = a[row][col];
                    for k in 0..9 {
                        a[row][k] -= factor * a[col][k];
                    }
                }
            }
        }

        let mut m = [0.0f32; 9];
        for i in 0..8 {
            m[i] = a[i][8] as f32;
        }
        m[8] = 1.0;
        Some(Self { m })
    }

    /// Apply to a point.
    pub(crate) fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        let m = &self.m;
        let w = m[6] * x + m[7] * y + m[8];
        let w = if w.abs() < 1e-8 { 1e-8 } else { w };
        (
            (m[0] * x + m[1] * y + m[2]) / w,
            (m[3] * x + m[4] * y + m[5]) / w,
        )
    }
}

/// Displace each corner by an independent offset with magnitude drawn
/// uniformly from `[persp_min, persp_max]` and a random sign, then apply the
/// resulting homography with reflected borders.
pub(crate) fn perspective_jitter<R: Rng>(
    img: &RgbImage,
    persp_min: f32,
    persp_max: f32,
    rng: &mut R,
) -> RgbImage {
    if persp_max <= 0.0 {
        return img.clone();
    }
    let (w, h) = img.dimensions();
    let (wf, hf) = (w as f32 - 1.0, h as f32 - 1.0);
    let corners = [(0.0, 0.0), (wf, 0.0), (0.0, hf), (wf, hf)];

    let draw = |rng: &mut R| -> f32 {
        let magnitude = if (persp_max - persp_min).abs() < f32::EPSILON {
            persp_max
        } else {
            rng.gen_range(persp_min..persp_max)
        };
        if rng.gen_bool(0.5) {
            magnitude
        } else {
            -magnitude
        }
    };

    let mut jittered = corners;
    for corner in &mut jittered {
        corner.0 += draw(rng);
        corner.1 += draw(rng);
    }

    // Map destination back to source so each output pixel samples once.
    let Some(inverse) = Homography::from_points(&jittered, &corners) else {
        return img.clone();
    };

    let mut out = RgbImage::new(w, h);
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let (sx, sy) = inverse.apply(x as f32, y as f32);
        *pixel = sample_bicubic(img, sx, sy);
    }
    out
}

/// Elastic distortion: two independent per-pixel displacement fields,
/// Gaussian-smoothed with `smoothness`, scaled by `strength`, applied with
/// bilinear interpolation and reflected borders.
pub(crate) fn elastic_distort<R: Rng>(
    img: &RgbImage,
    strength: f32,
    smoothness: f32,
    rng: &mut R,
) -> RgbImage {
    let (w, h) = img.dimensions();

    let field = |rng: &mut R| -> ImageBuffer<Luma<f32>, Vec<f32>> {
        let mut raw = ImageBuffer::from_pixel(w, h, Luma([0.0f32]));
        for pixel in raw.pixels_mut() {
            pixel.0[0] = rng.gen_range(-1.0..1.0);
        }
        if smoothness > 0.0 {
            imageops::blur(&raw, smoothness)
        } else {
            raw
        }
    };

    let dx = field(rng);
    let dy = field(rng);

    let mut out = RgbImage::new(w, h);
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let sx = x as f32 + dx.get_pixel(x, y).0[0] * strength;
        let sy = y as f32 + dy.get_pixel(x, y).0[0] * strength;
        *pixel = sample_bilinear(img, sx, sy);
    }
    out
}

/// Resize by `(scale_x, scale_y)` and refit to the original canvas size:
/// smaller results are centered with the margin filled per `fill_mode`,
/// larger results are center-cropped.
pub(crate) fn scale_and_refit(
    img: &RgbImage,
    scale_x: f32,
    scale_y: f32,
    fill_mode: FillMode,
) -> RgbImage {
    let (w, h) = img.dimensions();
    let new_w = ((w as f32 * scale_x).round() as u32).max(1);
    let new_h = ((h as f32 * scale_y).round() as u32).max(1);
    if new_w == w && new_h == h {
        return img.clone();
    }

    let resized = imageops::resize(img, new_w, new_h, FilterType::CatmullRom);

    // Offset of the resized image on the original canvas; negative means
    // the resized image overflows and gets cropped.
    let off_x = (w as i64 - i64::from(new_w)) / 2;
    let off_y = (h as i64 - i64::from(new_h)) / 2;

    let blurred_backdrop = match fill_mode {
        FillMode::Blur => Some(imageops::blur(img, 12.0)),
        _ => None,
    };

    let mut out = RgbImage::new(w, h);
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let rx = i64::from(x) - off_x;
        let ry = i64::from(y) - off_y;
        let inside =
            rx >= 0 && ry >= 0 && rx < i64::from(new_w) && ry < i64::from(new_h);
        if inside {
            *pixel = *resized.get_pixel(rx as u32, ry as u32);
        } else {
            *pixel = match fill_mode {
                FillMode::Reflect => sample_bilinear(&resized, rx as f32, ry as f32),
                FillMode::Blur => {
                    *blurred_backdrop
                        .as_ref()
                        .map_or_else(|| img.get_pixel(x, y), |b| b.get_pixel(x, y))
                }
                FillMode::White => Rgb([255, 255, 255]),
            };
        }
    }
    out
}
