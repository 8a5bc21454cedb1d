//! Aggregate RGB → device HSV
//!
//! Channels are gamma-encoded before conversion, which pushes mid tones down
//! and makes the light noticeably more saturated than a linear conversion.

use super::{DeviceHsv, Rgb};
use crate::config::HsvAdjustments;
use crate::constants::color::GAMMA;

/// Plain RGB → HSV, every component in [0, 1]
fn rgb_to_hsv(r: f64, g: f64, b: f64) -> (f64, f64, f64) {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let value = max;
    if max == min {
        return (0.0, 0.0, value);
    }

    let range = max - min;
    let saturation = range / max;
    let rc = (max - r) / range;
    let gc = (max - g) / range;
    let bc = (max - b) / range;
    let sector = if r == max {
        bc - gc
    } else if g == max {
        2.0 + rc - bc
    } else {
        4.0 + gc - rc
    };
    ((sector / 6.0).rem_euclid(1.0), saturation, value)
}

/// Convert an aggregate color into hue degrees and saturation/value percent
///
/// Fractional degrees and percents are truncated, not rounded.
pub fn to_device_hsv(rgb: Rgb, adjust: &HsvAdjustments) -> DeviceHsv {
    let encode = |c: u8| (f64::from(c) / 255.0).powf(GAMMA);
    let (h, s, v) = rgb_to_hsv(encode(rgb.r), encode(rgb.g), encode(rgb.b));

    let s = (s * adjust.saturation_multiplier + adjust.saturation_offset).min(1.0);
    let v = (v * adjust.value_multiplier + adjust.value_offset)
        .max(adjust.min_value)
        .min(1.0);

    DeviceHsv {
        // h < 1.0, so this stays below 360
        hue: (h * 360.0) as u16,
        // negative offsets can undershoot, `as` saturates at 0
        saturation: (s * 100.0) as u8,
        value: (v * 100.0) as u8,
    }
}
