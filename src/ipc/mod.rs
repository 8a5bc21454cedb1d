//! Control socket via Unix domain sockets
//!
//! Lets a UI or script inspect the running daemon and edit its config.
//! Uses length-prefixed JSON; the handler only touches the config store and
//! the status board, never the capture connection or the light.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

mod messages;
pub use messages::{ControlRequest, ControlResponse};

use crate::config::ConfigStore;
use crate::constants::ipc::{MAX_MESSAGE_SIZE, SOCKET_PATH};
use crate::shutdown::Shutdown;
use crate::status::StatusBoard;

/// Get default socket path (XDG_RUNTIME_DIR with fallback to cache)
pub fn default_socket_path() -> Result<PathBuf> {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return Ok(PathBuf::from(runtime_dir).join(SOCKET_PATH));
    }

    let cache = dirs::cache_dir()
        .context("Failed to determine cache directory (no XDG_RUNTIME_DIR or HOME)")?;
    Ok(cache.join(SOCKET_PATH))
}

/// Client connection to the daemon
pub struct ControlClient {
    stream: UnixStream,
}

impl ControlClient {
    pub async fn connect_to(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path)
            .await
            .context(format!("Failed to connect to control socket at {}", path.display()))?;
        Ok(Self { stream })
    }

    /// Send request and wait for response
    pub async fn request(&mut self, req: &ControlRequest) -> Result<ControlResponse> {
        write_message(&mut self.stream, req).await?;
        read_message(&mut self.stream)
            .await?
            .ok_or_else(|| anyhow!("Daemon closed the connection without answering"))
    }
}

/// Listening side, owned by the daemon
pub struct ControlServer {
    listener: UnixListener,
    socket_path: PathBuf,
}

impl ControlServer {
    /// Create server and bind to specific socket path
    pub fn bind_to(socket_path: PathBuf) -> Result<Self> {
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)
                .context(format!("Failed to create socket directory: {}", parent.display()))?;
        }

        // Left behind by a previous run that did not exit cleanly
        if socket_path.exists() {
            std::fs::remove_file(&socket_path)
                .context(format!("Failed to remove stale socket: {}", socket_path.display()))?;
        }

        let listener = UnixListener::bind(&socket_path)
            .context(format!("Failed to bind socket at {}", socket_path.display()))?;

        // Owner only
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o700))
                .context("Failed to set socket permissions")?;
        }

        info!(path = %socket_path.display(), "Control socket listening");
        Ok(Self {
            listener,
            socket_path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept connections until shutdown; the socket file goes away on return
    pub async fn serve(self, store: Arc<ConfigStore>, status: Arc<StatusBoard>, mut shutdown: Shutdown) {
        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        tokio::spawn(serve_connection(stream, Arc::clone(&store), Arc::clone(&status)));
                    }
                    Err(e) => warn!(error = %e, "Failed to accept control connection"),
                },
            }
        }
        debug!(path = %self.socket_path.display(), "Control socket closed");
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

pub fn spawn_control_socket(
    server: ControlServer,
    store: Arc<ConfigStore>,
    status: Arc<StatusBoard>,
    shutdown: Shutdown,
) -> JoinHandle<()> {
    tokio::spawn(server.serve(store, status, shutdown))
}

/// Answer requests on one connection until the peer hangs up
async fn serve_connection(mut stream: UnixStream, store: Arc<ConfigStore>, status: Arc<StatusBoard>) {
    loop {
        let request = match read_message::<_, ControlRequest>(&mut stream).await {
            Ok(Some(request)) => request,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "Dropping control connection");
                break;
            }
        };
        debug!(request = ?request, "Control request");

        let response = handle_request(request, &store, &status);
        if let Err(e) = write_message(&mut stream, &response).await {
            warn!(error = %format!("{:#}", e), "Failed to answer control request");
            break;
        }
    }
}

pub fn handle_request(request: ControlRequest, store: &ConfigStore, status: &StatusBoard) -> ControlResponse {
    match request {
        ControlRequest::Ping => ControlResponse::Pong,
        ControlRequest::GetStatus => ControlResponse::Status(status.snapshot()),
        ControlRequest::GetConfig => ControlResponse::Config((*store.current()).clone()),
        ControlRequest::SaveConfig(document) => match store.save(document) {
            Ok(()) => ControlResponse::Saved,
            Err(e) => ControlResponse::Error(e.to_string()),
        },
        ControlRequest::ReloadConfig => match store.reload() {
            Ok(changed) => ControlResponse::Reloaded { changed },
            Err(e) => ControlResponse::Error(e.to_string()),
        },
    }
}

/// Write length-prefixed message to stream
async fn write_message<W, T>(stream: &mut W, msg: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let json = serde_json::to_vec(msg).context("Failed to serialize message to JSON")?;

    // Length prefix (u32 little-endian)
    let len = u32::try_from(json.len()).context("Message does not fit a u32 length prefix")?;
    stream
        .write_all(&len.to_le_bytes())
        .await
        .context("Failed to write message length")?;

    stream
        .write_all(&json)
        .await
        .context("Failed to write message payload")?;

    stream.flush().await.context("Failed to flush stream")?;

    Ok(())
}

/// Read length-prefixed message from stream; `None` on a clean hang-up
async fn read_message<R, T>(stream: &mut R) -> Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: for<'de> Deserialize<'de>,
{
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e).context("Failed to read message length"),
    }
    let len = u32::from_le_bytes(len_buf) as usize;

    // Sanity check (prevent DoS via huge allocation)
    if len > MAX_MESSAGE_SIZE {
        return Err(anyhow!("Message too large: {} bytes (max: {})", len, MAX_MESSAGE_SIZE));
    }

    let mut json_buf = vec![0u8; len];
    stream
        .read_exact(&mut json_buf)
        .await
        .context("Failed to read message payload")?;

    serde_json::from_slice(&json_buf)
        .map(Some)
        .context("Failed to deserialize message from JSON")
}
