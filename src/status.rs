//! Observational state for the control socket
//!
//! The sync loop writes, everyone else reads snapshots. Nothing here feeds
//! back into the pipeline.

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::capture::Monitor;
use crate::color::{DeviceHsv, Rgb};
use crate::constants::stats::RATE_SMOOTHING;
use crate::device::LinkState;

#[derive(Debug, Default)]
struct StatusInner {
    link: LinkState,
    device: Option<String>,
    last_rgb: Option<Rgb>,
    last_hsv: Option<DeviceHsv>,
    captures: u64,
    cycles_per_second: f64,
    last_cycle_ms: f64,
    last_cycle_at: Option<Instant>,
    monitors: Vec<Monitor>,
}

/// Point-in-time copy of the board, as sent over the control socket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub link: LinkState,
    pub device: Option<String>,
    pub last_rgb: Option<Rgb>,
    pub last_hsv: Option<DeviceHsv>,
    pub captures: u64,
    pub cycles_per_second: f64,
    pub last_cycle_ms: f64,
    pub uptime_secs: f64,
    pub monitors: Vec<Monitor>,
}

pub struct StatusBoard {
    started: Instant,
    inner: Mutex<StatusInner>,
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBoard {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            inner: Mutex::new(StatusInner::default()),
        }
    }

    // A panic while holding the lock leaves plain data behind, still readable
    fn lock(&self) -> MutexGuard<'_, StatusInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_link(&self, link: LinkState) {
        self.lock().link = link;
    }

    pub fn set_device(&self, device: Option<String>) {
        self.lock().device = device;
    }

    pub fn set_monitors(&self, monitors: Vec<Monitor>) {
        self.lock().monitors = monitors;
    }

    /// Record one finished capture → extract → map pass
    pub fn record_cycle(&self, rgb: Rgb, hsv: DeviceHsv, elapsed: Duration) {
        self.record_cycle_at(rgb, hsv, elapsed, Instant::now());
    }

    fn record_cycle_at(&self, rgb: Rgb, hsv: DeviceHsv, elapsed: Duration, now: Instant) {
        let mut inner = self.lock();
        inner.last_rgb = Some(rgb);
        inner.last_hsv = Some(hsv);
        inner.captures += 1;
        inner.last_cycle_ms = elapsed.as_secs_f64() * 1000.0;

        if let Some(previous) = inner.last_cycle_at {
            let interval = now.saturating_duration_since(previous).as_secs_f64();
            if interval > 0.0 {
                let rate = 1.0 / interval;
                inner.cycles_per_second = if inner.cycles_per_second == 0.0 {
                    rate
                } else {
                    RATE_SMOOTHING * rate + (1.0 - RATE_SMOOTHING) * inner.cycles_per_second
                };
            }
        }
        inner.last_cycle_at = Some(now);
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let inner = self.lock();
        StatusSnapshot {
            link: inner.link,
            device: inner.device.clone(),
            last_rgb: inner.last_rgb,
            last_hsv: inner.last_hsv,
            captures: inner.captures,
            cycles_per_second: inner.cycles_per_second,
            last_cycle_ms: inner.last_cycle_ms,
            uptime_secs: self.started.elapsed().as_secs_f64(),
            monitors: inner.monitors.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_board() {
        let snapshot = StatusBoard::new().snapshot();
        assert_eq!(snapshot.link, LinkState::Discovering);
        assert_eq!(snapshot.captures, 0);
        assert_eq!(snapshot.last_rgb, None);
        assert_eq!(snapshot.cycles_per_second, 0.0);
    }

    #[test]
    fn test_cycle_rate_is_smoothed() {
        let board = StatusBoard::new();
        let t0 = Instant::now();
        let hsv = DeviceHsv::default();

        board.record_cycle_at(Rgb::BLACK, hsv, Duration::from_millis(5), t0);
        assert_eq!(board.snapshot().cycles_per_second, 0.0);

        // First interval seeds the average: 100 ms → 10 cycles/s
        board.record_cycle_at(Rgb::BLACK, hsv, Duration::from_millis(5), t0 + Duration::from_millis(100));
        assert!((board.snapshot().cycles_per_second - 10.0).abs() < 1e-9);

        // 50 ms → 20/s sample, blended
        board.record_cycle_at(
            Rgb::new(255, 0, 0),
            DeviceHsv { hue: 0, saturation: 100, value: 100 },
            Duration::from_millis(7),
            t0 + Duration::from_millis(150),
        );
        let snapshot = board.snapshot();
        let expected = RATE_SMOOTHING * 20.0 + (1.0 - RATE_SMOOTHING) * 10.0;
        assert!((snapshot.cycles_per_second - expected).abs() < 1e-9);
        assert_eq!(snapshot.captures, 3);
        assert_eq!(snapshot.last_rgb, Some(Rgb::new(255, 0, 0)));
        assert!((snapshot.last_cycle_ms - 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_snapshot_serializes_for_the_wire() {
        let board = StatusBoard::new();
        board.set_link(LinkState::Syncing);
        board.set_device(Some("'Desk lamp' (KL130) at 10.0.0.5:9999".to_string()));
        let json = serde_json::to_string(&board.snapshot()).unwrap();
        let back: StatusSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back.link, LinkState::Syncing);
        assert!(back.device.unwrap().contains("Desk lamp"));
    }
}
