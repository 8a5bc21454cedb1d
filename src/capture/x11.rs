use anyhow::{Context, Result};
use std::collections::HashMap;
use tracing::{debug, info, warn};
use x11rb::connection::Connection;
use x11rb::protocol::randr::ConnectionExt as RandrExt;
use x11rb::protocol::xproto::*;
use x11rb::rust_connection::RustConnection;

use super::{Frame, Monitor, PixelLayout, Region, ScreenSource};
use crate::constants::x11;

/// Output names by RandR atom
///
/// Atoms never change meaning on a live connection, so each is asked about
/// once and later monitor listings only cost the geometry query.
#[derive(Debug, Default)]
struct AtomNames {
    names: HashMap<Atom, String>,
}

impl AtomNames {
    fn resolve(&mut self, atom: Atom, fetch: impl FnOnce(Atom) -> String) -> &str {
        self.names.entry(atom).or_insert_with(|| fetch(atom))
    }
}

fn fetch_atom_name(conn: &RustConnection, atom: Atom) -> String {
    conn.get_atom_name(atom)
        .ok()
        .and_then(|cookie| cookie.reply().ok())
        .map(|reply| String::from_utf8_lossy(&reply.name).into_owned())
        .unwrap_or_else(|| format!("monitor-{atom}"))
}

/// X11 screen grabber
///
/// Opens one connection at startup and reuses it for every capture.
pub struct X11Capture {
    conn: RustConnection,
    root: Window,
    screen_width: u16,
    screen_height: u16,
    layout: PixelLayout,
    randr: bool,
    atom_names: AtomNames,
}

impl X11Capture {
    pub fn connect() -> Result<Self> {
        let (conn, screen_num) = x11rb::connect(None)
            .context("Failed to connect to X11 server. Is DISPLAY set correctly?")?;
        let setup = conn.setup();
        let screen = &setup.roots[screen_num];
        let root = screen.root;
        let (screen_width, screen_height) = (screen.width_in_pixels, screen.height_in_pixels);

        let depth = screen.root_depth;
        let bits_per_pixel = setup
            .pixmap_formats
            .iter()
            .find(|format| format.depth == depth)
            .map(|format| format.bits_per_pixel)
            .with_context(|| format!("No pixmap format advertised for root depth {}", depth))?;
        if bits_per_pixel != x11::BITS_PER_PIXEL {
            anyhow::bail!(
                "Unsupported root visual: depth={}, bits_per_pixel={} (need {})",
                depth,
                bits_per_pixel,
                x11::BITS_PER_PIXEL
            );
        }

        let layout = if setup.image_byte_order == ImageOrder::LSB_FIRST {
            PixelLayout::Bgrx
        } else {
            PixelLayout::Xrgb
        };

        let randr = match conn.randr_query_version(1, 5) {
            Ok(cookie) => cookie.reply().is_ok(),
            Err(_) => false,
        };
        if !randr {
            warn!("RandR extension unavailable, only the whole screen (monitor 0) can be captured");
        }

        info!(
            screen = screen_num,
            width = screen_width,
            height = screen_height,
            layout = ?layout,
            "Connected to X11 server"
        );

        Ok(Self {
            conn,
            root,
            screen_width,
            screen_height,
            layout,
            randr,
            atom_names: AtomNames::default(),
        })
    }
}

impl ScreenSource for X11Capture {
    fn monitors(&mut self) -> Result<Vec<Monitor>> {
        let mut monitors = vec![Monitor {
            index: 0,
            name: "all".to_string(),
            primary: false,
            bounds: Region::new(0, 0, self.screen_width.into(), self.screen_height.into()),
        }];

        if !self.randr {
            return Ok(monitors);
        }

        let reply = self
            .conn
            .randr_get_monitors(self.root, true)
            .context("Failed to query RandR monitors")?
            .reply()
            .context("Failed to get reply for RandR monitors query")?;

        let conn = &self.conn;
        for (i, info) in reply.monitors.iter().enumerate() {
            let name = self.atom_names.resolve(info.name, |atom| fetch_atom_name(conn, atom));
            monitors.push(Monitor {
                index: (i + 1) as u32,
                name: name.to_string(),
                primary: info.primary,
                bounds: Region::new(info.x.into(), info.y.into(), info.width.into(), info.height.into()),
            });
        }
        Ok(monitors)
    }

    fn capture_region(&mut self, region: Region) -> Result<Frame> {
        let x = i16::try_from(region.left).context("Capture region left edge out of X11 range")?;
        let y = i16::try_from(region.top).context("Capture region top edge out of X11 range")?;
        let width = u16::try_from(region.width).context("Capture region width out of X11 range")?;
        let height = u16::try_from(region.height).context("Capture region height out of X11 range")?;

        let reply = self
            .conn
            .get_image(ImageFormat::Z_PIXMAP, self.root, x, y, width, height, x11::ALL_PLANES)
            .context(format!("Failed to request image for region {:?}", region))?
            .reply()
            .context(format!("Failed to get image reply for region {:?}", region))?;

        debug!(
            width = width,
            height = height,
            depth = reply.depth,
            bytes = reply.data.len(),
            "Captured region"
        );

        Frame::new(width.into(), height.into(), self.layout, reply.data)
            .context("X11 returned a malformed image")
    }
}
