//! Weighted aggregate color of a screen region
//!
//! Pipeline per pixel: channel boosts → hue/saturation → hue-band boosts →
//! luminance → weight. The aggregate is the weight-averaged boosted color.
//! Near-black pixels contribute nothing and washed-out pixels contribute
//! little, so the result tracks the dominant vivid color on screen.

use std::fmt;
use tracing::{trace, warn};

use super::Rgb;
use crate::capture::{Frame, Region, ScreenSource};
use crate::config::{ColorBoosts, HueAdjustments, SyncConfig, Weighting};
use crate::constants::color::{LOW_SATURATION_DAMPING, LUMA_BLUE, LUMA_GREEN, LUMA_RED};

/// Conditions under which a cycle falls back to black
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractError {
    /// `capture.monitor_index` names no connected monitor
    MonitorNotFound { index: u32, available: usize },
    /// `capture.crop_percent` outside [0, 0.5)
    InvalidCrop(f64),
    /// The region to capture has no pixels
    ZeroArea,
    /// The capture backend failed
    Capture(String),
    /// The backend returned a frame of the wrong size
    MalformedFrame { expected: (u32, u32), got: (usize, usize) },
}

impl fmt::Display for ExtractError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractError::MonitorNotFound { index, available } => {
                write!(f, "Monitor {} not found ({} available)", index, available)
            }
            ExtractError::InvalidCrop(crop) => write!(f, "crop_percent {} must be in [0, 0.5)", crop),
            ExtractError::ZeroArea => write!(f, "Capture region has zero area"),
            ExtractError::Capture(e) => write!(f, "Screen capture failed: {}", e),
            ExtractError::MalformedFrame { expected, got } => write!(
                f,
                "Captured frame is {}x{}, expected {}x{}",
                got.0, got.1, expected.0, expected.1
            ),
        }
    }
}

impl std::error::Error for ExtractError {}

/// Trim `crop` of each dimension from every edge of `bounds`
///
/// The result is never empty: a crop close to 0.5 still leaves one pixel.
pub fn crop_region(bounds: Region, crop: f64) -> Result<Region, ExtractError> {
    if !crop.is_finite() || !(0.0..0.5).contains(&crop) {
        return Err(ExtractError::InvalidCrop(crop));
    }
    if bounds.is_empty() {
        return Err(ExtractError::ZeroArea);
    }

    let w = f64::from(bounds.width);
    let h = f64::from(bounds.height);
    Ok(Region {
        left: (f64::from(bounds.left) + w * crop) as i32,
        top: (f64::from(bounds.top) + h * crop) as i32,
        width: ((w * (1.0 - 2.0 * crop)) as u32).max(1),
        height: ((h * (1.0 - 2.0 * crop)) as u32).max(1),
    })
}

/// A hue range whose pixels get two channels boosted
#[derive(Debug, Clone, Copy)]
struct HueBand {
    min: f32,
    max: f32,
    boost: f32,
    channels: [usize; 2],
}

impl HueBand {
    /// Bands with a boost of exactly 1.0 are skipped entirely
    fn active(hue: &HueAdjustments) -> Vec<HueBand> {
        [
            HueBand { min: hue.yellow_hue_min, max: hue.yellow_hue_max, boost: hue.yellow_boost, channels: [0, 1] },
            HueBand { min: hue.cyan_hue_min, max: hue.cyan_hue_max, boost: hue.cyan_boost, channels: [1, 2] },
            HueBand { min: hue.magenta_hue_min, max: hue.magenta_hue_max, boost: hue.magenta_boost, channels: [0, 2] },
        ]
        .into_iter()
        .filter(|band| band.boost != 1.0)
        .collect()
    }

    #[inline]
    fn contains(&self, hue: f32) -> bool {
        hue >= self.min && hue <= self.max
    }
}

#[inline]
fn apply_boosts(px: [u8; 3], boosts: &ColorBoosts) -> [f32; 3] {
    [
        (f32::from(px[0]) * boosts.red).clamp(0.0, 255.0),
        (f32::from(px[1]) * boosts.green).clamp(0.0, 255.0),
        (f32::from(px[2]) * boosts.blue).clamp(0.0, 255.0),
    ]
}

/// Hue in degrees [0, 360) and saturation [0, 1]; achromatic pixels get (0, 0)
#[inline]
fn hue_saturation(rgb: [f32; 3]) -> (f32, f32) {
    let [r, g, b] = rgb.map(|c| c / 255.0);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let diff = max - min;

    let saturation = if max > 0.0 { diff / max } else { 0.0 };
    if diff <= 0.0 {
        return (0.0, saturation);
    }

    // Ties resolve towards blue, then green
    let hue = if max == b {
        60.0 * ((r - g) / diff) + 240.0
    } else if max == g {
        60.0 * ((b - r) / diff) + 120.0
    } else {
        60.0 * ((g - b) / diff) + 360.0
    };
    (hue.rem_euclid(360.0), saturation)
}

#[inline]
fn luminance(rgb: [f32; 3]) -> f32 {
    LUMA_RED * rgb[0] + LUMA_GREEN * rgb[1] + LUMA_BLUE * rgb[2]
}

#[inline]
fn pixel_weight(luminance: f32, saturation: f32, weighting: &Weighting) -> f32 {
    if luminance < weighting.luminance_threshold {
        return 0.0;
    }
    let mut weight = (luminance / 255.0).powf(weighting.brightness_power)
        * saturation.powf(weighting.saturation_power)
        * weighting.overall_multiplier;
    if saturation < weighting.saturation_threshold {
        weight *= LOW_SATURATION_DAMPING;
    }
    weight
}

/// Truncate toward zero, but don't let float noise turn 255.0 into 254
#[inline]
fn truncate_channel(value: f64) -> u8 {
    let nearest = value.round();
    if (value - nearest).abs() < 1e-6 {
        nearest as u8
    } else {
        value as u8
    }
}

/// Weighted aggregate color of a frame, every `downsample`-th pixel per axis
///
/// Returns black when no pixel carries any weight.
pub fn average_color(frame: &Frame, config: &SyncConfig) -> Rgb {
    let step = config.capture.downsample.max(1) as usize;
    let bands = HueBand::active(&config.hue_adjustments);

    let mut sums = [0.0f64; 3];
    let mut total_weight = 0.0f64;

    for y in (0..frame.height()).step_by(step) {
        for x in (0..frame.width()).step_by(step) {
            let mut rgb = apply_boosts(frame.pixel(x, y), &config.color_boosts);
            let (hue, saturation) = hue_saturation(rgb);

            if !bands.is_empty() {
                for band in bands.iter().filter(|band| band.contains(hue)) {
                    rgb[band.channels[0]] *= band.boost;
                    rgb[band.channels[1]] *= band.boost;
                }
                rgb = rgb.map(|c| c.clamp(0.0, 255.0));
            }

            let weight = pixel_weight(luminance(rgb), saturation, &config.weighting);
            if weight <= 0.0 {
                continue;
            }
            let weight = f64::from(weight);
            for (sum, channel) in sums.iter_mut().zip(rgb) {
                *sum += f64::from(channel) * weight;
            }
            total_weight += weight;
        }
    }

    if total_weight > 0.0 {
        let [r, g, b] = sums.map(|sum| truncate_channel(sum / total_weight));
        Rgb::new(r, g, b)
    } else {
        Rgb::BLACK
    }
}

/// Capture the configured monitor and aggregate it
pub fn try_extract<S: ScreenSource>(source: &mut S, config: &SyncConfig) -> Result<Rgb, ExtractError> {
    let monitors = source
        .monitors()
        .map_err(|e| ExtractError::Capture(format!("{e:#}")))?;
    let index = config.capture.monitor_index;
    let monitor = monitors
        .iter()
        .find(|m| m.index == index)
        .ok_or(ExtractError::MonitorNotFound { index, available: monitors.len() })?;

    let region = crop_region(monitor.bounds, config.capture.crop_percent)?;
    let frame = source
        .capture_region(region)
        .map_err(|e| ExtractError::Capture(format!("{e:#}")))?;

    if frame.is_empty() {
        return Err(ExtractError::ZeroArea);
    }
    if frame.width() != region.width as usize || frame.height() != region.height as usize {
        return Err(ExtractError::MalformedFrame {
            expected: (region.width, region.height),
            got: (frame.width(), frame.height()),
        });
    }

    let color = average_color(&frame, config);
    trace!(monitor = index, region = ?region, color = %color, "Extracted aggregate color");
    Ok(color)
}

/// Like [`try_extract`], but a failed cycle degrades to black instead of
/// interrupting the caller
pub fn extract<S: ScreenSource>(source: &mut S, config: &SyncConfig) -> Rgb {
    try_extract(source, config).unwrap_or_else(|e| {
        warn!(error = %e, "Color extraction failed, sending black for this cycle");
        Rgb::BLACK
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::testing::FakeScreen;
    use crate::capture::PixelLayout;
    use crate::config::document::tests::{identity_config, SAMPLE_DOCUMENT};

    fn sample_config() -> SyncConfig {
        serde_json::from_str(SAMPLE_DOCUMENT).unwrap()
    }

    /// Deterministic frame with a mix of vivid, dull and dark pixels
    fn mixed_frame(width: usize, height: usize) -> Frame {
        let rows = (0..height)
            .map(|y| {
                (0..width)
                    .map(|x| {
                        let v = (x * 37 + y * 91) % 256;
                        [v as u8, (255 - v) as u8, ((x * y) % 256) as u8]
                    })
                    .collect()
            })
            .collect::<Vec<_>>();
        Frame::from_rgb_rows(&rows).unwrap()
    }

    fn subsample(frame: &Frame, step: usize) -> Frame {
        let rows = (0..frame.height())
            .step_by(step)
            .map(|y| (0..frame.width()).step_by(step).map(|x| frame.pixel(x, y)).collect())
            .collect::<Vec<_>>();
        Frame::from_rgb_rows(&rows).unwrap()
    }

    #[test]
    fn test_black_frame_is_black() {
        let frame = Frame::uniform(32, 18, [0, 0, 0]);
        assert_eq!(average_color(&frame, &identity_config()), Rgb::BLACK);
        assert_eq!(average_color(&frame, &sample_config()), Rgb::BLACK);

        let mut config = sample_config();
        config.weighting.luminance_threshold = 0.0;
        config.weighting.saturation_power = 0.0;
        assert_eq!(average_color(&frame, &config), Rgb::BLACK);
    }

    #[test]
    fn test_uniform_color_round_trips_with_identity_settings() {
        let config = identity_config();
        for color in [[255, 0, 0], [0, 255, 0], [0, 0, 255], [10, 200, 30], [250, 128, 7]] {
            let frame = Frame::uniform(16, 9, color);
            assert_eq!(average_color(&frame, &config), Rgb::from(color), "color {:?}", color);
        }
    }

    #[test]
    fn test_bgrx_frame_keeps_red_red() {
        let data = [0u8, 0, 255, 0].repeat(4 * 4);
        let frame = Frame::new(4, 4, PixelLayout::Bgrx, data).unwrap();
        assert_eq!(average_color(&frame, &identity_config()), Rgb::new(255, 0, 0));
    }

    #[test]
    fn test_downsample_matches_presubsampled_frame() {
        let frame = mixed_frame(40, 30);
        for step in [2u32, 3, 4] {
            let mut strided = sample_config();
            strided.capture.downsample = step;
            let mut full = sample_config();
            full.capture.downsample = 1;

            let from_stride = average_color(&frame, &strided);
            let from_subsampled = average_color(&subsample(&frame, step as usize), &full);
            assert_eq!(from_stride, from_subsampled, "step {}", step);
        }
    }

    #[test]
    fn test_downsample_stays_close_to_full_resolution() {
        // Smooth gradient: sampling noise should be small
        let rows = (0..60)
            .map(|y| (0..80).map(|x| [(x * 3) as u8, 40, (y * 4) as u8]).collect())
            .collect::<Vec<_>>();
        let frame = Frame::from_rgb_rows(&rows).unwrap();
        let mut config = identity_config();
        let full = average_color(&frame, &config);
        config.capture.downsample = 4;
        let strided = average_color(&frame, &config);

        for (a, b) in [(full.r, strided.r), (full.g, strided.g), (full.b, strided.b)] {
            assert!((i16::from(a) - i16::from(b)).abs() <= 12, "{} vs {}", full, strided);
        }
    }

    #[test]
    fn test_crop_zero_is_full_region() {
        let bounds = Region::new(1920, 0, 2560, 1440);
        assert_eq!(crop_region(bounds, 0.0).unwrap(), bounds);
    }

    #[test]
    fn test_crop_trims_each_edge() {
        let bounds = Region::new(100, 50, 1000, 500);
        assert_eq!(crop_region(bounds, 0.1).unwrap(), Region::new(200, 100, 800, 400));
    }

    #[test]
    fn test_crop_near_half_is_tiny_but_not_empty() {
        let bounds = Region::new(0, 0, 1920, 1080);
        let cropped = crop_region(bounds, 0.4999).unwrap();
        assert!(!cropped.is_empty());
        assert!(cropped.width <= 2 && cropped.height <= 2);
    }

    #[test]
    fn test_crop_half_or_more_is_rejected() {
        let bounds = Region::new(0, 0, 1920, 1080);
        assert_eq!(crop_region(bounds, 0.5), Err(ExtractError::InvalidCrop(0.5)));
        assert_eq!(crop_region(bounds, 0.7), Err(ExtractError::InvalidCrop(0.7)));
        assert!(crop_region(bounds, -0.1).is_err());
        assert!(crop_region(bounds, f64::NAN).is_err());
    }

    #[test]
    fn test_crop_of_empty_bounds_is_zero_area() {
        assert_eq!(crop_region(Region::new(0, 0, 0, 1080), 0.1), Err(ExtractError::ZeroArea));
    }

    #[test]
    fn test_unit_band_boost_is_noop() {
        let frame = mixed_frame(24, 24);
        let mut wide_bands = sample_config();
        let hue = &mut wide_bands.hue_adjustments;
        hue.yellow_boost = 1.0;
        hue.cyan_boost = 1.0;
        hue.magenta_boost = 1.0;
        hue.yellow_hue_min = 0.0;
        hue.yellow_hue_max = 360.0;
        hue.cyan_hue_min = 0.0;
        hue.cyan_hue_max = 360.0;
        hue.magenta_hue_min = 0.0;
        hue.magenta_hue_max = 360.0;

        // Same boosts, but bands that can never match
        let mut empty_bands = wide_bands.clone();
        let hue = &mut empty_bands.hue_adjustments;
        hue.yellow_boost = 3.0;
        hue.yellow_hue_min = 360.0;
        hue.yellow_hue_max = 0.0;
        hue.cyan_boost = 3.0;
        hue.cyan_hue_min = 360.0;
        hue.cyan_hue_max = 0.0;
        hue.magenta_boost = 3.0;
        hue.magenta_hue_min = 360.0;
        hue.magenta_hue_max = 0.0;

        assert_eq!(average_color(&frame, &wide_bands), average_color(&frame, &empty_bands));
    }

    #[test]
    fn test_yellow_band_boosts_red_and_green() {
        let mut config = identity_config();
        config.hue_adjustments.yellow_boost = 1.2;
        let frame = Frame::uniform(8, 8, [200, 200, 0]);
        assert_eq!(average_color(&frame, &config), Rgb::new(240, 240, 0));

        // Outside the band nothing changes
        let frame = Frame::uniform(8, 8, [0, 200, 0]);
        assert_eq!(average_color(&frame, &config), Rgb::new(0, 200, 0));
    }

    #[test]
    fn test_hue_exactly_on_band_edge_is_inside() {
        let mut config = identity_config();
        let hue = &mut config.hue_adjustments;
        hue.yellow_boost = 1.2;
        hue.yellow_hue_min = 60.0;
        hue.yellow_hue_max = 60.0;
        let frame = Frame::uniform(8, 8, [200, 200, 0]);
        assert_eq!(average_color(&frame, &config), Rgb::new(240, 240, 0));
    }

    #[test]
    fn test_cyan_band_boosts_green_and_blue() {
        let mut config = identity_config();
        let hue = &mut config.hue_adjustments;
        hue.cyan_boost = 1.2;
        hue.cyan_hue_min = 180.0;
        hue.cyan_hue_max = 180.0;
        let frame = Frame::uniform(8, 8, [0, 200, 200]);
        assert_eq!(average_color(&frame, &config), Rgb::new(0, 240, 240));

        // Red is never part of the cyan band
        let frame = Frame::uniform(8, 8, [200, 0, 0]);
        assert_eq!(average_color(&frame, &config), Rgb::new(200, 0, 0));
    }

    #[test]
    fn test_band_boost_is_clipped() {
        let mut config = identity_config();
        config.hue_adjustments.magenta_boost = 2.0;
        let frame = Frame::uniform(4, 4, [200, 0, 200]);
        assert_eq!(average_color(&frame, &config), Rgb::new(255, 0, 255));
    }

    #[test]
    fn test_channel_boosts_apply_before_analysis() {
        let mut config = identity_config();
        config.color_boosts.blue = 2.0;
        let frame = Frame::uniform(4, 4, [0, 0, 100]);
        assert_eq!(average_color(&frame, &config), Rgb::new(0, 0, 200));
    }

    #[test]
    fn test_low_saturation_pixels_are_damped() {
        let frame = Frame::from_rgb_rows(&[vec![[255, 0, 0], [255, 255, 255]]]).unwrap();
        let mut config = identity_config();
        config.weighting.saturation_power = 0.0;

        // Without damping white pulls hard towards grey
        assert_eq!(average_color(&frame, &config), Rgb::new(255, 196, 196));

        config.weighting.saturation_threshold = 0.5;
        assert_eq!(average_color(&frame, &config), Rgb::new(255, 63, 63));
    }

    #[test]
    fn test_dark_pixels_are_ignored() {
        let frame = Frame::from_rgb_rows(&[vec![[255, 0, 0], [0, 0, 255]]]).unwrap();
        let mut config = identity_config();
        assert_eq!(average_color(&frame, &config), Rgb::new(184, 0, 70));

        // Pure blue has luminance ~29, pure red ~76
        config.weighting.luminance_threshold = 50.0;
        assert_eq!(average_color(&frame, &config), Rgb::new(255, 0, 0));
    }

    #[test]
    fn test_fully_filtered_frame_is_black() {
        let frame = mixed_frame(10, 10);
        let mut config = sample_config();
        config.weighting.luminance_threshold = 300.0;
        assert_eq!(average_color(&frame, &config), Rgb::BLACK);

        let mut config = sample_config();
        config.weighting.overall_multiplier = 0.0;
        assert_eq!(average_color(&frame, &config), Rgb::BLACK);
    }

    #[test]
    fn test_try_extract_crops_configured_monitor() {
        let mut screen = FakeScreen::with_monitor(Region::new(100, 50, 1000, 500), [0, 0, 255]);
        let mut config = identity_config();
        config.capture.crop_percent = 0.1;
        config.capture.downsample = 8;

        assert_eq!(try_extract(&mut screen, &config), Ok(Rgb::new(0, 0, 255)));
        assert_eq!(screen.requests, vec![Region::new(200, 100, 800, 400)]);
    }

    #[test]
    fn test_try_extract_unknown_monitor() {
        let mut screen = FakeScreen::with_monitor(Region::new(0, 0, 64, 64), [255, 0, 0]);
        let mut config = identity_config();
        config.capture.monitor_index = 7;
        assert_eq!(
            try_extract(&mut screen, &config),
            Err(ExtractError::MonitorNotFound { index: 7, available: 2 })
        );
        assert_eq!(extract(&mut screen, &config), Rgb::BLACK);
    }

    #[test]
    fn test_try_extract_zero_area_monitor() {
        let mut screen = FakeScreen::with_monitor(Region::new(0, 0, 0, 0), [255, 0, 0]);
        assert_eq!(try_extract(&mut screen, &identity_config()), Err(ExtractError::ZeroArea));
    }

    #[test]
    fn test_capture_failure_degrades_to_black() {
        let mut screen = FakeScreen::with_monitor(Region::new(0, 0, 64, 64), [255, 0, 0]);
        screen.fail_captures = true;
        assert!(matches!(
            try_extract(&mut screen, &identity_config()),
            Err(ExtractError::Capture(_))
        ));
        assert_eq!(extract(&mut screen, &identity_config()), Rgb::BLACK);
    }
}
