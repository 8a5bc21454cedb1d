//! Color types and the two pipeline stages built on them
//!
//! - **extract**: screen region → one weighted aggregate [`Rgb`]
//! - **hsv**: aggregate [`Rgb`] → device-native [`DeviceHsv`]

pub mod extract;
pub mod hsv;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use extract::extract;
pub use hsv::to_device_hsv;

/// Aggregate color of one cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb { r: 0, g: 0, b: 0 };

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl From<[u8; 3]> for Rgb {
    fn from([r, g, b]: [u8; 3]) -> Self {
        Self { r, g, b }
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

/// Color in the units the light understands
///
/// Hue in whole degrees [0, 360), saturation and value in percent [0, 100].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceHsv {
    pub hue: u16,
    pub saturation: u8,
    pub value: u8,
}

impl fmt::Display for DeviceHsv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hsv({}, {}%, {}%)", self.hue, self.saturation, self.value)
    }
}
