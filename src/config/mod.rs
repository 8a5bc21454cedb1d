//! Configuration management for bulb-screen-sync
//!
//! - **document**: the JSON document and its validation rules
//! - **store**: the live, hot-swappable copy shared by every component
//! - **watcher**: background task reloading the store on file edits

pub mod document;
pub mod store;
pub mod watcher;

// Re-export commonly used types
pub use document::{ColorBoosts, HsvAdjustments, HueAdjustments, ReconnectPolicy, SyncConfig, Weighting};
pub use store::{default_config_path, ConfigStore};
pub use watcher::spawn_watcher;
