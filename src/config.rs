//! Configuration types for the augmentation pipeline and remote submission

use serde::{Deserialize, Serialize};

/// How the margin is filled when scale-and-refit produces an image smaller
/// than the original canvas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FillMode {
    /// Mirror the image content outward (default; avoids border signatures)
    Reflect,
    /// Fill with a heavily blurred copy of the source
    Blur,
    /// Fill with solid white
    White,
}

impl Default for FillMode {
    fn default() -> Self {
        Self::Reflect
    }
}

impl std::fmt::Display for FillMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reflect => write!(f, "reflect"),
            Self::Blur => write!(f, "blur"),
            Self::White => write!(f, "white"),
        }
    }
}

/// Parameters for one batch augmentation run.
///
/// Built once before a batch starts and passed by reference to every
/// component; nothing reads ambient global state. All randomized stages
/// draw from an explicitly injected RNG, not from here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AugmentConfig {
    /// Mirror horizontally
    pub hflip: bool,

    /// Mirror vertically
    pub vflip: bool,

    /// Output alpha multiplier in `[0, 1]`; values below 1.0 force an
    /// alpha-bearing output format
    pub opacity: f32,

    /// Standard deviation of additive Gaussian pixel noise (>= 0)
    pub noise_level: f32,

    /// Lower bound of the rotation magnitude band, degrees
    pub rot_min: f32,

    /// Upper bound of the rotation magnitude band, degrees
    pub rot_max: f32,

    /// Lower bound of the perspective corner-shift magnitude, pixels
    pub persp_min: f32,

    /// Upper bound of the perspective corner-shift magnitude, pixels
    pub persp_max: f32,

    /// Fractional multiplicative color scale jitter; a factor is drawn from
    /// `[1 - color_jitter, 1 + color_jitter]`
    pub color_jitter: f32,

    /// Elastic-warp displacement magnitude in pixels; the stage is skipped
    /// entirely when <= 0
    pub distortion_strength: f32,

    /// Gaussian blur sigma applied to the elastic displacement fields
    pub distortion_smoothness: f32,

    /// Horizontal resize factor for scale-and-refit
    pub scale_x: f32,

    /// Vertical resize factor for scale-and-refit
    pub scale_y: f32,

    /// Margin fill used when the scaled image is smaller than the canvas
    pub fill_mode: FillMode,

    /// Overwrite existing output files; when false, collisions get an
    /// incrementing numeric suffix instead
    pub overwrite: bool,
}

impl Default for AugmentConfig {
    fn default() -> Self {
        Self {
            hflip: false,
            vflip: false,
            opacity: 1.0,
            noise_level: 2.0,
            rot_min: 0.5,
            rot_max: 1.5,
            persp_min: 1.0,
            persp_max: 5.0,
            color_jitter: 0.02,
            distortion_strength: 5.0,
            distortion_smoothness: 8.0,
            scale_x: 1.0,
            scale_y: 1.0,
            fill_mode: FillMode::default(),
            overwrite: true,
        }
    }
}

impl AugmentConfig {
    /// Validate all configuration parameters.
    ///
    /// # Errors
    /// - `opacity` outside `[0, 1]`
    /// - negative `noise_level`, `color_jitter`, or `distortion_smoothness`
    /// - negative band bounds, or a band whose minimum exceeds its maximum
    /// - non-positive scale factors
    pub fn validate(&self) -> crate::Result<()> {
        use crate::error::PhotovarError;

        if !(0.0..=1.0).contains(&self.opacity) {
            return Err(PhotovarError::config_value_error(
                "opacity",
                self.opacity,
                "0.0-1.0",
            ));
        }
        if self.noise_level < 0.0 {
            return Err(PhotovarError::config_value_error(
                "noise_level",
                self.noise_level,
                ">= 0",
            ));
        }
        if self.rot_min < 0.0 || self.rot_max < 0.0 || self.rot_min > self.rot_max {
            return Err(PhotovarError::invalid_config(format!(
                "rotation band [{}, {}] must satisfy 0 <= rot_min <= rot_max",
                self.rot_min, self.rot_max
            )));
        }
        if self.persp_min < 0.0 || self.persp_max < 0.0 || self.persp_min > self.persp_max {
            return Err(PhotovarError::invalid_config(format!(
                "perspective band [{}, {}] must satisfy 0 <= persp_min <= persp_max",
                self.persp_min, self.persp_max
            )));
        }
        if self.color_jitter < 0.0 {
            return Err(PhotovarError::config_value_error(
                "color_jitter",
                self.color_jitter,
                ">= 0",
            ));
        }
        if self.distortion_smoothness < 0.0 {
            return Err(PhotovarError::config_value_error(
                "distortion_smoothness",
                self.distortion_smoothness,
                ">= 0",
            ));
        }
        if self.scale_x <= 0.0 || self.scale_y <= 0.0 {
            return Err(PhotovarError::invalid_config(format!(
                "scale factors ({}, {}) must be positive",
                self.scale_x, self.scale_y
            )));
        }
        Ok(())
    }

    /// A configuration under which every stage is a verifiable no-op.
    ///
    /// Used by identity-property tests; rotation and perspective bands are
    /// collapsed to zero magnitude so the 50/50 sign draw cannot move pixels.
    #[must_use]
    pub fn identity() -> Self {
        Self {
            hflip: false,
            vflip: false,
            opacity: 1.0,
            noise_level: 0.0,
            rot_min: 0.0,
            rot_max: 0.0,
            persp_min: 0.0,
            persp_max: 0.0,
            color_jitter: 0.0,
            distortion_strength: 0.0,
            distortion_smoothness: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
            fill_mode: FillMode::Reflect,
            overwrite: true,
        }
    }
}

/// Sampler parameter overrides injected into a workflow template at
/// submission time. `None` fields leave the template's value untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplerOverrides {
    /// Sampling seed
    pub seed: Option<u64>,
    /// Step count
    pub steps: Option<u32>,
    /// Sampler name (e.g. `euler`, `dpmpp_2m`)
    pub sampler_name: Option<String>,
    /// Scheduler name (e.g. `normal`, `karras`)
    pub scheduler: Option<String>,
    /// Classifier-free guidance scale
    pub cfg_scale: Option<f64>,
}

impl SamplerOverrides {
    /// True when no field would modify a template
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seed.is_none()
            && self.steps.is_none()
            && self.sampler_name.is_none()
            && self.scheduler.is_none()
            && self.cfg_scale.is_none()
    }
}
