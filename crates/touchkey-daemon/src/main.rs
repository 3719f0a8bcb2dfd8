//! touchkey daemon
//!
//! Reads a multitouch screen showing an on-screen keyboard and sends the
//! keys it touches to a host as HID boot-keyboard reports.

mod device;
mod ipc;
mod touch;
mod transport;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use touchkey_config::{Config, TransportConfig};
use touchkey_core::{GridGeometry, KeyLayout, Keyboard, Pacing, Session, TextInjector, Transport};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, reload, EnvFilter};

use crate::ipc::IpcServer;
use crate::touch::MtDecoder;
use crate::transport::{HidgTransport, LogTransport};

const DEFAULT_CONFIG: &str = "~/.config/touchkey/config.kdl";

#[derive(Parser, Debug)]
#[command(name = "touchkeyd")]
#[command(about = "Touchscreen-to-HID keyboard daemon")]
struct Args {
    /// Path to configuration file [default: ~/.config/touchkey/config.kdl]
    #[arg(short, long)]
    config: Option<String>,

    /// Override the configured report transport
    #[arg(long, value_enum)]
    transport: Option<TransportKind>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum TransportKind {
    /// USB HID gadget device
    Hidg,
    /// Log reports only
    Log,
}

#[tokio::main]
async fn main() -> Result<()> {
    // The config may name a log level, so start with the default and
    // swap the filter once it is loaded
    let env_filter = EnvFilter::try_from_default_env().ok();
    let from_env = env_filter.is_some();
    let (filter, filter_handle) =
        reload::Layer::new(env_filter.unwrap_or_else(|| EnvFilter::new("info")));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();

    let args = Args::parse();

    let required = args.config.is_some();
    let config_path: PathBuf = shellexpand::tilde(args.config.as_deref().unwrap_or(DEFAULT_CONFIG))
        .into_owned()
        .into();

    tracing::info!("Loading configuration from {}", config_path.display());
    let mut config = touchkey_config::load_config(&config_path, required)?;

    if !from_env {
        let level = config.global.log_level.as_filter();
        filter_handle
            .modify(|filter| *filter = EnvFilter::new(level))
            .context("Failed to apply configured log level")?;
    }

    match args.transport {
        Some(TransportKind::Log) => config.transport = TransportConfig::Log,
        Some(TransportKind::Hidg) if config.transport == TransportConfig::Log => {
            config.transport = TransportConfig::default();
        }
        _ => {}
    }

    run(config).await
}

async fn run(config: Config) -> Result<()> {
    // Open the touchscreen before anything starts so a misnamed device
    // fails early
    let touch_device = match device::open_touch_device(config.touch.device.as_deref()) {
        Ok(found) => Some(found),
        Err(e) if config.touch.device.is_some() => return Err(e),
        Err(e) => {
            tracing::warn!("{:#}, running with IPC control only", e);
            None
        }
    };

    let writer_shutdown = CancellationToken::new();
    let (transport, writer): (Arc<dyn Transport>, Option<JoinHandle<()>>) = match &config.transport
    {
        TransportConfig::Hidg { device, reconnect } => {
            tracing::info!("Sending reports to {}", device.display());
            let (transport, task) =
                HidgTransport::spawn(device.clone(), *reconnect, writer_shutdown.clone());
            (transport, Some(task))
        }
        TransportConfig::Log => {
            tracing::info!("Logging reports only");
            (LogTransport::new(), None)
        }
    };

    let keyboard = Keyboard::new(transport.clone())
        .with_long_press(config.long_press)
        .into_shared();
    let injector = TextInjector::new(
        keyboard.clone(),
        Pacing {
            key_hold: config.timing.key_hold,
            char_gap: config.timing.char_gap,
        },
    );
    let geometry = GridGeometry::new(
        &KeyLayout::standard(),
        config.touch.width,
        config.touch.height,
        config.touch.margin,
    );

    let (session, handle) = Session::new(
        geometry,
        config.timing.long_press,
        keyboard,
        injector,
        transport.connection(),
    );
    let mut session_task = tokio::spawn(session.run());

    let touch_task = touch_device.map(|(mut device, info)| {
        if let Err(e) = device.grab() {
            tracing::warn!("Could not grab '{}', other readers will see touches: {}", info.name, e);
        }
        let decoder = MtDecoder::for_device(&info, config.touch.width, config.touch.height);
        let handle = handle.clone();
        tokio::spawn(async move {
            if let Err(e) = touch::run_touch_source(device, info, decoder, handle).await {
                tracing::warn!("{:#}", e);
            }
        })
    });

    let ipc_shutdown = CancellationToken::new();
    let server = IpcServer::new()?;
    let ipc_task = tokio::spawn(ipc::serve(server, handle.clone(), ipc_shutdown.clone()));

    tracing::info!("touchkey daemon running");

    let session_ended = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            false
        }
        _ = &mut session_task => {
            tracing::warn!("Touch session ended unexpectedly");
            true
        }
    };

    tracing::info!("Shutting down...");

    ipc_shutdown.cancel();
    if let Some(task) = touch_task {
        task.abort();
    }
    handle.shutdown();
    if !session_ended {
        if let Err(e) = session_task.await {
            tracing::warn!("Touch session panicked: {}", e);
        }
    }
    if let Err(e) = ipc_task.await {
        tracing::warn!("IPC server panicked: {}", e);
    }

    // The session releases everything on exit; let the writer flush that
    writer_shutdown.cancel();
    if let Some(writer) = writer {
        if let Err(e) = writer.await {
            tracing::warn!("HID gadget writer panicked: {}", e);
        }
    }

    Ok(())
}
