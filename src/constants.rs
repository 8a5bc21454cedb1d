//! Protocol numbers, tuning constants and file locations, grouped by the
//! component that uses them

/// Configuration file location
pub mod config {
    /// Directory under the XDG config dir
    pub const APP_DIR: &str = "bulb-screen-sync";

    /// Configuration document file name
    pub const FILENAME: &str = "bulb_config.json";

    /// How often the watcher checks the config file for changes
    pub const WATCH_INTERVAL_MS: u64 = 250;
}

/// Color analysis constants
pub mod color {
    /// ITU-R BT.601 luma weights
    pub const LUMA_RED: f32 = 0.299;
    pub const LUMA_GREEN: f32 = 0.587;
    pub const LUMA_BLUE: f32 = 0.114;

    /// Weight multiplier for pixels below the saturation threshold
    pub const LOW_SATURATION_DAMPING: f32 = 0.1;

    /// Gamma exponent applied before HSV conversion
    pub const GAMMA: f64 = 2.2;
}

/// X11 capture constants
pub mod x11 {
    /// Plane mask selecting every bit plane for GetImage
    pub const ALL_PLANES: u32 = !0;

    /// Bits per pixel the capture path understands (ZPixmap, depth 24/32)
    pub const BITS_PER_PIXEL: u8 = 32;
}

/// TP-Link Kasa local protocol constants
pub mod kasa {
    /// UDP discovery and TCP command port
    pub const PORT: u16 = 9999;

    /// Initial key of the autokey XOR cipher
    pub const INITIAL_KEY: u8 = 171;

    /// Broadcast address for discovery
    pub const BROADCAST_ADDR: std::net::Ipv4Addr = std::net::Ipv4Addr::BROADCAST;

    /// How long discovery waits for answers
    pub const DISCOVERY_TIMEOUT_MS: u64 = 5000;

    /// Discovery datagrams are repeated, UDP broadcast is lossy
    pub const DISCOVERY_PACKETS: usize = 3;

    /// Timeout for a single TCP request/response exchange
    pub const COMMAND_TIMEOUT_MS: u64 = 2000;

    /// Upper bound for a response frame
    pub const MAX_RESPONSE_SIZE: usize = 64 * 1024;

    /// Lighting service used by bulbs
    pub const BULB_SERVICE: &str = "smartlife.iot.smartbulb.lightingservice";

    /// Lighting service used by light strips
    pub const LIGHTSTRIP_SERVICE: &str = "smartlife.iot.lightStrip";
}

/// Control socket constants
pub mod ipc {
    /// Socket path relative to the runtime (or cache) directory
    pub const SOCKET_PATH: &str = "bulb-screen-sync/control.sock";

    /// Maximum message size (10 MB) to prevent DoS via memory exhaustion
    pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;
}

/// Cycle statistics
pub mod stats {
    /// Smoothing factor for the measured cycle rate (exponential moving average)
    pub const RATE_SMOOTHING: f64 = 0.2;
}
