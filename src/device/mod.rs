//! Network light contract
//!
//! A [`DeviceLink`] finds a light, brings it up and pushes colors to it. The
//! sync loop owns the ready handle and drives the link state machine:
//!
//! ```text
//! Discovering → Connected → Syncing ⇄ Reconnecting
//!                               ↓
//!                            Stopped
//! ```

pub mod kasa;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::color::DeviceHsv;

pub use self::kasa::KasaLink;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// Nobody answered discovery before the timeout
    NoDeviceFound,
    /// A device answered but could not be brought up
    Connect(String),
    /// The link broke while pushing a color
    LinkLost(String),
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::NoDeviceFound => write!(f, "No light answered discovery"),
            DeviceError::Connect(msg) => write!(f, "Failed to bring up light: {}", msg),
            DeviceError::LinkLost(msg) => write!(f, "Lost connection to light: {}", msg),
        }
    }
}

impl std::error::Error for DeviceError {}

/// Where the sync loop stands with respect to the light
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    #[default]
    Discovering,
    Connected,
    Syncing,
    Reconnecting,
    Stopped,
}

/// Light discovery, activation and color push
///
/// `Device` is what discovery hands back (an address plus whatever the
/// device said about itself); `Ready` is an activated light that accepts
/// colors.
#[allow(async_fn_in_trait)]
pub trait DeviceLink {
    type Device: fmt::Display;
    type Ready;

    async fn discover(&mut self) -> Result<Self::Device, DeviceError>;

    /// Fetch device info, require a color light, and power it on
    async fn connect_and_activate(&mut self, device: Self::Device) -> Result<Self::Ready, DeviceError>;

    async fn push_hsv(
        &mut self,
        ready: &mut Self::Ready,
        hsv: DeviceHsv,
        transition_ms: u32,
    ) -> Result<(), DeviceError>;
}
