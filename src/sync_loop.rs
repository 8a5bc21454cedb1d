//! The capture → convert → push control loop
//!
//! One cycle at a time, never overlapping. Every cycle takes a fresh config
//! snapshot, so edits and monitor switches land on the next tick. A failed
//! capture degrades to black instead of skipping the push.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::capture::ScreenSource;
use crate::color::{extract, to_device_hsv};
use crate::config::{ReconnectPolicy, SyncConfig};
use crate::device::{DeviceError, DeviceLink, LinkState};
use crate::shutdown::Shutdown;
use crate::status::StatusBoard;

#[derive(Debug)]
pub enum SyncError {
    /// The startup discovery/activation attempt failed
    Discovery(DeviceError),
    /// The link broke and every reconnect attempt failed
    LinkUnrecoverable { attempts: u32, last: DeviceError },
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::Discovery(e) => write!(f, "Could not bring up a light: {}", e),
            SyncError::LinkUnrecoverable { attempts, last } => {
                write!(f, "Light unreachable after {} reconnect attempts: {}", attempts, last)
            }
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncError::Discovery(e) => Some(e),
            SyncError::LinkUnrecoverable { last, .. } => Some(last),
        }
    }
}

/// Discover and activate, handing back the ready light and its description
async fn bring_up<L: DeviceLink>(link: &mut L) -> Result<(L::Ready, String), DeviceError> {
    let device = link.discover().await?;
    let name = device.to_string();
    let ready = link.connect_and_activate(device).await?;
    Ok((ready, name))
}

pub struct SyncLoop<S, L> {
    screen: S,
    link: L,
    config: watch::Receiver<Arc<SyncConfig>>,
    status: Arc<StatusBoard>,
    shutdown: Shutdown,
}

impl<S: ScreenSource, L: DeviceLink> SyncLoop<S, L> {
    pub fn new(
        screen: S,
        link: L,
        config: watch::Receiver<Arc<SyncConfig>>,
        status: Arc<StatusBoard>,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            screen,
            link,
            config,
            status,
            shutdown,
        }
    }

    /// Run until shutdown (`Ok`) or an unrecoverable device failure
    pub async fn run(&mut self) -> Result<(), SyncError> {
        let result = self.drive().await;
        self.status.set_link(LinkState::Stopped);
        match &result {
            Ok(()) => info!("Sync loop stopped"),
            Err(e) => warn!(error = %e, "Sync loop failed"),
        }
        result
    }

    async fn drive(&mut self) -> Result<(), SyncError> {
        match self.screen.monitors() {
            Ok(monitors) => {
                info!(count = monitors.len().saturating_sub(1), "Monitors available");
                self.status.set_monitors(monitors);
            }
            Err(e) => warn!(error = %format!("{:#}", e), "Failed to list monitors"),
        }

        self.status.set_link(LinkState::Discovering);
        let mut ready = tokio::select! {
            _ = self.shutdown.wait() => return Ok(()),
            result = bring_up(&mut self.link) => {
                let (ready, name) = result.map_err(SyncError::Discovery)?;
                self.status.set_device(Some(name));
                ready
            }
        };
        self.status.set_link(LinkState::Connected);

        self.status.set_link(LinkState::Syncing);
        loop {
            if self.shutdown.is_triggered() {
                break;
            }

            let started = Instant::now();
            let config = self.config.borrow_and_update().clone();
            let rgb = extract(&mut self.screen, &config);
            let hsv = to_device_hsv(rgb, &config.hsv_adjustments);

            if self.shutdown.is_triggered() {
                break;
            }

            let pushed = self
                .link
                .push_hsv(&mut ready, hsv, config.capture.transition_ms)
                .await;
            self.status.record_cycle(rgb, hsv, started.elapsed());
            debug!(rgb = %rgb, hsv = %hsv, "Cycle done");

            if let Err(e) = pushed {
                warn!(error = %e, "Push failed, reconnecting");
                match self.reconnect(&config.reconnect, e).await? {
                    Some(new_ready) => ready = new_ready,
                    None => break,
                }
            }

            // Validation keeps update_delay finite and positive
            let delay = Duration::try_from_secs_f64(config.capture.update_delay).unwrap_or_default();
            tokio::select! {
                _ = self.shutdown.wait() => break,
                _ = tokio::time::sleep_until(started + delay) => {}
            }
        }
        Ok(())
    }

    /// Bounded rediscovery; `Ok(None)` when shutdown interrupted it
    async fn reconnect(
        &mut self,
        policy: &ReconnectPolicy,
        cause: DeviceError,
    ) -> Result<Option<L::Ready>, SyncError> {
        self.status.set_link(LinkState::Reconnecting);
        let mut last = cause;
        let mut attempt = 1;

        while policy.allows(attempt) {
            let backoff = Duration::from_millis(policy.backoff_ms(attempt));
            info!(attempt = attempt, backoff_ms = backoff.as_millis() as u64, "Reconnecting to light");
            tokio::select! {
                _ = self.shutdown.wait() => return Ok(None),
                _ = tokio::time::sleep(backoff) => {}
            }

            let result = tokio::select! {
                _ = self.shutdown.wait() => return Ok(None),
                result = bring_up(&mut self.link) => result,
            };
            match result {
                Ok((ready, name)) => {
                    info!(device = %name, attempt = attempt, "Reconnected");
                    self.status.set_device(Some(name));
                    self.status.set_link(LinkState::Syncing);
                    return Ok(Some(ready));
                }
                Err(e) => {
                    warn!(attempt = attempt, error = %e, "Reconnect attempt failed");
                    last = e;
                    attempt += 1;
                }
            }
        }

        Err(SyncError::LinkUnrecoverable {
            attempts: attempt - 1,
            last,
        })
    }
}
