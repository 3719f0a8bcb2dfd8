//! touchkey CLI
//!
//! Configuration checks, offline report encoding and remote control of a
//! running touchkeyd.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, WrapErr};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use touchkey_core::control::{self, DaemonStatus, IpcRequest, IpcResponse};
use touchkey_core::{hid, KeyLayout, Keyboard, Pacing, RecordingTransport, Report, TextInjector};

#[derive(Parser, Debug)]
#[command(name = "touchkey")]
#[command(about = "Touchscreen HID keyboard tool")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "~/.config/touchkey/config.kdl")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate the configuration file
    Validate,

    /// List multitouch input devices
    Devices,

    /// Print the on-screen key layout
    Layout,

    /// Print the HID report descriptor for USB gadget setup
    Descriptor {
        /// Write the raw bytes instead of hex
        #[arg(long)]
        raw: bool,
    },

    /// Print the reports typing TEXT would send, without a daemon
    Encode {
        text: String,

        /// Treat TEXT as a key combo such as "Ctrl+Alt+Delete"
        #[arg(short, long)]
        key: bool,
    },

    /// Type text on the host
    Type { text: String },

    /// Tap a key combo on the host, e.g. "Ctrl+Shift+T"
    Key { combo: String },

    /// Release every key and modifier
    ReleaseAll,

    /// Cancel running text injections
    Cancel,

    /// Show current daemon status
    Status,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let config_path: PathBuf = shellexpand::tilde(&cli.config).into_owned().into();

    match cli.command {
        Commands::Validate => cmd_validate(&config_path),
        Commands::Devices => cmd_devices(),
        Commands::Layout => cmd_layout(),
        Commands::Descriptor { raw } => cmd_descriptor(raw),
        Commands::Encode { text, key } => cmd_encode(&text, key).await,
        Commands::Type { text } => cmd_request(IpcRequest::TypeText { text }).await,
        Commands::Key { combo } => cmd_request(IpcRequest::Key { combo }).await,
        Commands::ReleaseAll => cmd_request(IpcRequest::ReleaseAll).await,
        Commands::Cancel => cmd_request(IpcRequest::Cancel).await,
        Commands::Status => cmd_request(IpcRequest::Status).await,
    }
}

fn cmd_validate(config_path: &Path) -> miette::Result<()> {
    println!("Validating configuration: {}", config_path.display());

    let config = touchkey_config::parse_config(config_path)?;

    println!("Configuration is valid!");
    println!("  Log level: {}", config.global.log_level.as_filter());
    match &config.transport {
        touchkey_config::TransportConfig::Hidg { device, reconnect } => println!(
            "  Transport: hidg ({}, reconnect every {} ms)",
            device.display(),
            reconnect.as_millis()
        ),
        touchkey_config::TransportConfig::Log => println!("  Transport: log"),
    }
    println!(
        "  Touch: {} on {}x{} (margin {})",
        config.touch.device.as_deref().unwrap_or("<first multitouch device>"),
        config.touch.width,
        config.touch.height,
        config.touch.margin
    );
    println!(
        "  Timing: long press {} ms, key hold {} ms, char gap {} ms",
        config.timing.long_press.as_millis(),
        config.timing.key_hold.as_millis(),
        config.timing.char_gap.as_millis()
    );
    println!("  Long press: {:?}", config.long_press);
    Ok(())
}

fn cmd_devices() -> miette::Result<()> {
    println!("Available touch devices:\n");

    let mut paths: Vec<PathBuf> = std::fs::read_dir("/dev/input")
        .into_diagnostic()
        .wrap_err("Failed to list /dev/input")?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("event"))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();

    let mut found = 0;
    for path in paths {
        let Ok(device) = evdev::Device::open(&path) else {
            // Skip devices we can't open
            continue;
        };
        let Some(axes) = device.supported_absolute_axes() else {
            continue;
        };
        // Same check the daemon applies when it picks a device
        if !touchkey_core::is_multitouch(|code| axes.contains(evdev::AbsoluteAxisType(code))) {
            continue;
        }

        let id = device.input_id();
        println!("  {}", device.name().unwrap_or("Unknown"));
        println!("    Path: {}", path.display());
        println!("    ID: {:04x}:{:04x}", id.vendor(), id.product());
        if let Ok(abs) = device.get_abs_state() {
            let x = abs[evdev::AbsoluteAxisType::ABS_MT_POSITION_X.0 as usize];
            let y = abs[evdev::AbsoluteAxisType::ABS_MT_POSITION_Y.0 as usize];
            let slots = abs[evdev::AbsoluteAxisType::ABS_MT_SLOT.0 as usize].maximum + 1;
            println!(
                "    Range: x {}..{}, y {}..{}, {} slot(s)",
                x.minimum, x.maximum, y.minimum, y.maximum, slots
            );
        }
        println!();
        found += 1;
    }

    if found == 0 {
        println!("  (none found; try running as root or joining the input group)");
    }
    Ok(())
}

fn cmd_layout() -> miette::Result<()> {
    let layout = KeyLayout::standard();
    for (row, keys) in layout.rows() {
        let labels: Vec<String> = keys
            .iter()
            .map(|key| {
                if key.width == 1.0 {
                    key.label.to_string()
                } else {
                    format!("{}({})", key.label, key.width)
                }
            })
            .collect();
        println!("{}: {}", row, labels.join(" "));
    }
    Ok(())
}

fn cmd_descriptor(raw: bool) -> miette::Result<()> {
    if raw {
        let mut stdout = std::io::stdout().lock();
        stdout
            .write_all(hid::KEYBOARD_REPORT_DESCRIPTOR)
            .into_diagnostic()?;
        stdout.flush().into_diagnostic()?;
        return Ok(());
    }

    let hex: Vec<String> = hid::KEYBOARD_REPORT_DESCRIPTOR
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect();
    println!("{}", hex.join(" "));
    Ok(())
}

async fn cmd_encode(text: &str, key: bool) -> miette::Result<()> {
    for report in encode(text, key).await? {
        println!("{}", report);
    }
    Ok(())
}

/// Run an injection against a recording transport with no pacing.
async fn encode(text: &str, key: bool) -> miette::Result<Vec<Report>> {
    let transport = RecordingTransport::new();
    let keyboard = Keyboard::new(transport.clone()).into_shared();
    let injector = TextInjector::new(
        keyboard,
        Pacing {
            key_hold: Duration::ZERO,
            char_gap: Duration::ZERO,
        },
    );

    if key {
        injector.tap_key(text).await.into_diagnostic()?;
    } else {
        let summary = injector.type_text(text).await.into_diagnostic()?;
        if summary.skipped > 0 {
            eprintln!("Skipped {} character(s) without a key", summary.skipped);
        }
    }

    Ok(transport.reports())
}

async fn cmd_request(request: IpcRequest) -> miette::Result<()> {
    match send_request(&control::socket_path(), &request).await? {
        IpcResponse::Success { message } => {
            if let Some(message) = message {
                println!("{}", message);
            }
            Ok(())
        }
        IpcResponse::Status(status) => {
            print_status(&status);
            Ok(())
        }
        IpcResponse::Error { message } => Err(miette::miette!("{}", message)),
    }
}

async fn send_request(socket_path: &Path, request: &IpcRequest) -> miette::Result<IpcResponse> {
    tracing::debug!("Sending {:?} to {}", request, socket_path.display());

    let mut stream = UnixStream::connect(socket_path)
        .await
        .into_diagnostic()
        .wrap_err_with(|| {
            format!(
                "Cannot reach touchkeyd at {} (is the daemon running?)",
                socket_path.display()
            )
        })?;

    let mut line = serde_json::to_string(request).into_diagnostic()?;
    line.push('\n');
    stream.write_all(line.as_bytes()).await.into_diagnostic()?;
    stream.flush().await.into_diagnostic()?;

    let mut reader = BufReader::new(stream);
    let mut response = String::new();
    reader
        .read_line(&mut response)
        .await
        .into_diagnostic()
        .wrap_err("Failed to read daemon response")?;

    serde_json::from_str(response.trim())
        .into_diagnostic()
        .wrap_err("Daemon sent an invalid response")
}

fn print_status(status: &DaemonStatus) {
    println!("Host: {}", status.connection);
    println!("Report: {}", status.report);

    let modifiers: Vec<String> = status.latched_modifiers.iter().map(|m| m.to_string()).collect();
    if modifiers.is_empty() {
        println!("Latched modifiers: none");
    } else {
        println!("Latched modifiers: {}", modifiers.join(", "));
    }

    let layout = KeyLayout::standard();
    let pressed: Vec<String> = status
        .pressed
        .iter()
        .map(|code| match layout.find(*code) {
            Some(key) => key.label.to_string(),
            None => format!("0x{:02x}", code),
        })
        .collect();
    if pressed.is_empty() {
        println!("Pressed keys: none");
    } else {
        println!("Pressed keys: {}", pressed.join(" "));
    }

    println!("Active touches: {}", status.active_pointers);
    println!(
        "Reports sent: {} ({} failed)",
        status.reports_sent, status.transmit_failures
    );
}
