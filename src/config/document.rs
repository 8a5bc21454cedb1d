//! Tunable-parameter document
//!
//! Mirrors `bulb_config.json` one-to-one. Every key the color pipeline reads is
//! required: a document missing one fails to deserialize instead of silently
//! picking a default. Only the `reconnect` policy group is optional.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The whole configuration document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    pub capture: CaptureSettings,
    pub color_boosts: ColorBoosts,
    pub hue_adjustments: HueAdjustments,
    pub weighting: Weighting,
    pub hsv_adjustments: HsvAdjustments,

    /// Link recovery policy, optional
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureSettings {
    /// Fraction trimmed from each edge, in [0, 0.5)
    pub crop_percent: f64,

    /// Pixel stride, 1 = every pixel
    #[serde(deserialize_with = "deserialize_whole_number")]
    pub downsample: u32,

    /// 0 = whole virtual screen, 1..n = individual monitors
    #[serde(deserialize_with = "deserialize_whole_number")]
    pub monitor_index: u32,

    /// Seconds between cycle starts (may be fractional)
    pub update_delay: f64,

    /// Device-side fade duration
    #[serde(deserialize_with = "deserialize_whole_number")]
    pub transition_ms: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorBoosts {
    pub red: f32,
    pub green: f32,
    pub blue: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HueAdjustments {
    pub yellow_boost: f32,
    pub yellow_hue_min: f32,
    pub yellow_hue_max: f32,
    pub cyan_boost: f32,
    pub cyan_hue_min: f32,
    pub cyan_hue_max: f32,
    pub magenta_boost: f32,
    pub magenta_hue_min: f32,
    pub magenta_hue_max: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Weighting {
    pub brightness_power: f32,
    pub saturation_power: f32,
    pub overall_multiplier: f32,
    pub saturation_threshold: f32,
    pub luminance_threshold: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HsvAdjustments {
    pub saturation_multiplier: f64,
    pub saturation_offset: f64,
    pub value_multiplier: f64,
    pub value_offset: f64,
    pub min_value: f64,
}

/// Bounded reconnect policy used after a failed push
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// 0 = retry forever
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    8000
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the given 1-based attempt: doubles each time, capped
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        let shift = attempt.saturating_sub(1).min(32);
        self.initial_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms)
    }

    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts == 0 || attempt <= self.max_attempts
    }
}

/// Accepts integers written either as `4` or `4.0`
///
/// The config editor writes any value containing a '.' as a float, so whole
/// numbers can legitimately show up with a fractional part of zero.
fn deserialize_whole_number<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IntOrFloat {
        Int(i64),
        Float(f64),
    }

    let value = match IntOrFloat::deserialize(deserializer)? {
        IntOrFloat::Int(i) => i,
        IntOrFloat::Float(f) if f.fract() == 0.0 && f.is_finite() => f as i64,
        IntOrFloat::Float(f) => {
            return Err(D::Error::custom(format!("expected a whole number, got {f}")));
        }
    };
    u32::try_from(value)
        .map_err(|_| D::Error::custom(format!("value {value} out of range")))
}

/// A document that parsed but holds unusable values
#[derive(Debug, Clone, PartialEq)]
pub struct InvalidValue {
    pub key: &'static str,
    pub reason: String,
}

impl fmt::Display for InvalidValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.key, self.reason)
    }
}

fn check_non_negative(key: &'static str, value: f64) -> Result<(), InvalidValue> {
    if !value.is_finite() || value < 0.0 {
        return Err(InvalidValue {
            key,
            reason: format!("must be a finite number >= 0, got {value}"),
        });
    }
    Ok(())
}

fn check_finite(key: &'static str, value: f64) -> Result<(), InvalidValue> {
    if !value.is_finite() {
        return Err(InvalidValue {
            key,
            reason: format!("must be finite, got {value}"),
        });
    }
    Ok(())
}

fn check_hue(key: &'static str, value: f32) -> Result<(), InvalidValue> {
    if !(0.0..=360.0).contains(&value) {
        return Err(InvalidValue {
            key,
            reason: format!("must be a hue in degrees [0, 360], got {value}"),
        });
    }
    Ok(())
}

impl SyncConfig {
    /// Reject values the pipeline cannot work with
    pub fn validate(&self) -> Result<(), InvalidValue> {
        let capture = &self.capture;
        if !capture.crop_percent.is_finite() || !(0.0..0.5).contains(&capture.crop_percent) {
            return Err(InvalidValue {
                key: "capture.crop_percent",
                reason: format!("must be in [0, 0.5), got {}", capture.crop_percent),
            });
        }
        if capture.downsample == 0 {
            return Err(InvalidValue {
                key: "capture.downsample",
                reason: "must be at least 1".to_string(),
            });
        }
        if !capture.update_delay.is_finite() || capture.update_delay <= 0.0 {
            return Err(InvalidValue {
                key: "capture.update_delay",
                reason: format!("must be a positive number of seconds, got {}", capture.update_delay),
            });
        }

        let boosts = &self.color_boosts;
        check_non_negative("color_boosts.red", boosts.red.into())?;
        check_non_negative("color_boosts.green", boosts.green.into())?;
        check_non_negative("color_boosts.blue", boosts.blue.into())?;

        let hue = &self.hue_adjustments;
        check_non_negative("hue_adjustments.yellow_boost", hue.yellow_boost.into())?;
        check_non_negative("hue_adjustments.cyan_boost", hue.cyan_boost.into())?;
        check_non_negative("hue_adjustments.magenta_boost", hue.magenta_boost.into())?;
        check_hue("hue_adjustments.yellow_hue_min", hue.yellow_hue_min)?;
        check_hue("hue_adjustments.yellow_hue_max", hue.yellow_hue_max)?;
        check_hue("hue_adjustments.cyan_hue_min", hue.cyan_hue_min)?;
        check_hue("hue_adjustments.cyan_hue_max", hue.cyan_hue_max)?;
        check_hue("hue_adjustments.magenta_hue_min", hue.magenta_hue_min)?;
        check_hue("hue_adjustments.magenta_hue_max", hue.magenta_hue_max)?;

        let w = &self.weighting;
        check_non_negative("weighting.brightness_power", w.brightness_power.into())?;
        check_non_negative("weighting.saturation_power", w.saturation_power.into())?;
        check_non_negative("weighting.overall_multiplier", w.overall_multiplier.into())?;
        check_finite("weighting.saturation_threshold", w.saturation_threshold.into())?;
        check_finite("weighting.luminance_threshold", w.luminance_threshold.into())?;

        let hsv = &self.hsv_adjustments;
        check_non_negative("hsv_adjustments.saturation_multiplier", hsv.saturation_multiplier)?;
        check_non_negative("hsv_adjustments.value_multiplier", hsv.value_multiplier)?;
        check_finite("hsv_adjustments.saturation_offset", hsv.saturation_offset)?;
        check_finite("hsv_adjustments.value_offset", hsv.value_offset)?;
        check_finite("hsv_adjustments.min_value", hsv.min_value)?;

        Ok(())
    }
}
