//! Tracker configuration

use crate::error::ComputeError;
use serde::{Deserialize, Serialize};

/// Default visible fraction for a text post to count as seen
pub const DEFAULT_THRESHOLD: f64 = 0.8;

/// Default visible fraction for a post containing an image
pub const DEFAULT_IMAGE_THRESHOLD: f64 = 0.6;

/// Visibility thresholds applied per post
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackerOptions {
    /// Fraction of a post that must be in the viewport (0-1)
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// Lower fraction used for posts containing an image (0-1)
    #[serde(default = "default_image_threshold")]
    pub image_threshold: f64,
}

fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}

fn default_image_threshold() -> f64 {
    DEFAULT_IMAGE_THRESHOLD
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            image_threshold: DEFAULT_IMAGE_THRESHOLD,
        }
    }
}

impl TrackerOptions {
    /// Create options, clamping both thresholds into 0-1.
    ///
    /// Non-finite values fall back to the defaults.
    pub fn new(threshold: f64, image_threshold: f64) -> Self {
        Self {
            threshold: clamp_fraction(threshold, DEFAULT_THRESHOLD),
            image_threshold: clamp_fraction(image_threshold, DEFAULT_IMAGE_THRESHOLD),
        }
    }

    /// Load options from JSON; missing keys take their defaults
    pub fn from_json(json: &str) -> Result<Self, ComputeError> {
        let raw: TrackerOptions = serde_json::from_str(json)?;
        Ok(Self::new(raw.threshold, raw.image_threshold))
    }

    /// Threshold for a post, given whether it contains an image
    pub fn threshold_for(&self, has_image: bool) -> f64 {
        if has_image {
            self.image_threshold
        } else {
            self.threshold
        }
    }
}

fn clamp_fraction(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        fallback
    }
}
