#![forbid(unsafe_code)]

mod capture;
mod color;
mod config;
mod constants;
mod device;
mod ipc;
mod shutdown;
mod status;
mod sync_loop;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, error, info, warn, Level as TraceLevel};
use tracing_subscriber::FmtSubscriber;

use capture::X11Capture;
use config::{default_config_path, spawn_watcher, ConfigStore};
use device::KasaLink;
use ipc::{spawn_control_socket, ControlClient, ControlRequest, ControlResponse, ControlServer};
use status::StatusBoard;
use sync_loop::SyncLoop;

#[derive(Parser)]
#[command(name = "bulb-screen-sync")]
#[command(version, about = "Match a Kasa color light to what is on screen", long_about = None)]
struct Cli {
    /// Tell UI collaborators to start minimized to the tray
    #[arg(long)]
    minimized: bool,

    /// Config document (default: $XDG_CONFIG_HOME/bulb-screen-sync/bulb_config.json)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Control socket path (default: $XDG_RUNTIME_DIR/bulb-screen-sync/control.sock)
    #[arg(long, value_name = "PATH")]
    socket: Option<PathBuf>,

    /// Do not open the control socket
    #[arg(long, conflicts_with = "socket")]
    no_socket: bool,

    /// Print the status of a running instance and exit
    #[arg(long, conflicts_with = "no_socket")]
    status: bool,
}

fn init_logging() -> Result<()> {
    // Parse log level from environment variable
    let log_level = match std::env::var("LOG_LEVEL")
        .unwrap_or_else(|_| "info".to_string())
        .to_lowercase()
        .as_str()
    {
        "trace" => TraceLevel::TRACE,
        "debug" => TraceLevel::DEBUG,
        "warn" => TraceLevel::WARN,
        "error" => TraceLevel::ERROR,
        _ => TraceLevel::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).context("Failed to install tracing subscriber")
}

fn socket_path(cli: &Cli) -> Result<PathBuf> {
    match &cli.socket {
        Some(path) => Ok(path.clone()),
        None => ipc::default_socket_path(),
    }
}

async fn print_status(path: PathBuf) -> Result<()> {
    let mut client = ControlClient::connect_to(&path).await?;
    match client.request(&ControlRequest::GetStatus).await? {
        ControlResponse::Status(snapshot) => {
            let json = serde_json::to_string_pretty(&snapshot).context("Failed to format status")?;
            println!("{}", json);
            Ok(())
        }
        ControlResponse::Error(msg) => bail!("Daemon reported an error: {}", msg),
        other => bail!("Unexpected response from daemon: {:?}", other),
    }
}

async fn run(cli: Cli) -> Result<()> {
    if cli.status {
        return print_status(socket_path(&cli)?).await;
    }

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let store = Arc::new(ConfigStore::load(&config_path).context("Cannot start without a valid config")?);
    if cli.minimized {
        info!("Started minimized, UI collaborators stay in the tray");
    }

    let status = Arc::new(StatusBoard::new());
    let (trigger, shutdown) = shutdown::channel();
    tokio::spawn(async move {
        if let Err(e) = shutdown::listen_for_signals(trigger).await {
            error!(error = %e, "Signal handling unavailable, stop with SIGKILL");
        }
    });

    let _watcher = spawn_watcher(Arc::clone(&store), shutdown.clone());

    let _control = if cli.no_socket {
        info!("Control socket disabled");
        None
    } else {
        match socket_path(&cli).and_then(ControlServer::bind_to) {
            Ok(server) => {
                debug!(path = %server.path().display(), "Serving control requests");
                Some(spawn_control_socket(
                    server,
                    Arc::clone(&store),
                    Arc::clone(&status),
                    shutdown.clone(),
                ))
            }
            Err(e) => {
                // The pipeline works without it
                warn!(error = %format!("{:#}", e), "Control socket unavailable");
                None
            }
        }
    };

    let screen = X11Capture::connect()?;
    let mut sync = SyncLoop::new(screen, KasaLink::new(), store.subscribe(), status, shutdown);
    sync.run().await?;

    info!("Bye!");
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging() {
        eprintln!("{:#}", e);
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to start async runtime");
            return ExitCode::FAILURE;
        }
    };

    // Background tasks are cancelled when the runtime drops, which also
    // removes the control socket file
    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
