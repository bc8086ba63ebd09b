//! vhci-attach
//!
//! Attaches the USB/IP device served on the local loopback endpoint to the
//! kernel's virtual host controller and keeps retrying until it succeeds.

mod config;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use common::setup_logging;
use tokio::signal;
use tracing::{error, info, warn};
use vhci::{AttachOutcome, AttachState, VhciInstrument};

use config::AppConfig;

#[derive(Parser, Debug)]
#[command(name = "vhci-attach")]
#[command(author, version, about = "Attach a USB/IP device to the virtual host controller")]
#[command(long_about = "
Locates the vhci_hcd driver, reserves a free virtual port and attaches the
USB/IP device served on the IPv6 loopback. Attach attempts repeat on a fixed
interval until the device-serving endpoint accepts the connection.

EXAMPLES:
    # Run with default config
    vhci-attach

    # Attach a device served on a non-standard port
    vhci-attach --service-port 4000

    # Run with debug logging
    vhci-attach --log-level debug

CONFIGURATION:
    The configuration is looked up in the following order:
    1. Path specified with --config
    2. ~/.config/vhci-attach/config.toml
    3. /etc/vhci-attach/config.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Host serving the USB/IP device (IPv6)
    #[arg(long, value_name = "HOST")]
    host: Option<String>,

    /// USB/IP service port
    #[arg(long, value_name = "PORT")]
    service_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let path = AppConfig::default_path();
        AppConfig::default()
            .save(&path)
            .context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let mut config = if let Some(ref path) = args.config {
        AppConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        AppConfig::load_or_default()
    };

    if let Some(host) = args.host {
        config.vhci.host = host;
    }
    if let Some(port) = args.service_port {
        config.vhci.service_port = port;
    }
    if let Some(level) = args.log_level {
        config.app.log_level = level;
    }
    config.validate().context("Invalid configuration")?;

    setup_logging(&config.app.log_level).context("Failed to setup logging")?;

    info!("vhci-attach v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Device endpoint: [{}]:{}",
        config.vhci.host, config.vhci.service_port
    );

    let instrument = match VhciInstrument::init(&config.vhci) {
        Ok(instrument) => instrument,
        Err(e) if e.is_fatal() => return Err(anyhow!(e).context("VHCI subsystem unusable")),
        Err(e) => return Err(anyhow!(e).context("VHCI initialization failed")),
    };
    info!(
        "Waiting to attach on VHCI port {} (retry every {:?})",
        instrument.session().port(),
        config.vhci.retry_interval()
    );

    let stop = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
    };
    match supervise(instrument, stop).await? {
        AttachOutcome::Attached(report) => info!(
            "Exiting; device was attached after {} attempt(s) in {:?}",
            report.attempts, report.elapsed
        ),
        AttachOutcome::Cancelled { attempts } => {
            warn!("Stopped before attaching ({} attempt(s))", attempts)
        }
    }

    Ok(())
}

/// Run until `stop` resolves
///
/// Returning early would close the socket the kernel took over, so an
/// attached device keeps the process alive until `stop`.
async fn supervise<F>(instrument: VhciInstrument, stop: F) -> Result<AttachOutcome>
where
    F: Future<Output = ()>,
{
    tokio::pin!(stop);
    let mut state = instrument.subscribe();

    let attached = tokio::select! {
        result = state.wait_for(|s| *s == AttachState::Attached) => result.is_ok(),
        _ = &mut stop => false,
    };

    if attached {
        info!(
            "Device attached on VHCI port {}. Press Ctrl+C to exit",
            instrument.session().port()
        );
        stop.await;
    } else {
        info!("Stopping attach loop");
    }

    instrument.shutdown().await.context("Attach task failed")
}
