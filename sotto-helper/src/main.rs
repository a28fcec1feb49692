//! sotto-helper - dictation session helper process
//!
//! Single-purpose: one recognition session per invocation. Captures
//! microphone audio, streams it to the recognizer, and reports transcript,
//! mic level, and status lines on stdout for the HUD host. SIGINT/SIGTERM
//! stop the session; the process exits 0 after a bounded grace delay, or
//! non-zero when setup fails. The host spawns a fresh process to retry.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

use sotto_audio::CaptureTap;
use sotto_protocol::{LineWriter, ProtocolLine};
use sotto_recognition::RemoteBackend;

use sotto_helper::authorization::check_capture_authorization;
use sotto_helper::config::HelperConfig;
use sotto_helper::session::{SessionController, SessionOptions};

#[derive(Parser, Debug)]
#[command(
    name = "sotto-helper",
    version,
    about = "Dictation session helper for the sotto HUD"
)]
struct Cli {
    /// Locale to recognize, e.g. en-US
    #[arg(long)]
    language: Option<String>,

    /// Prefer on-device recognition when the locale supports it
    #[arg(long)]
    on_device: bool,

    /// Recognizer service address override
    #[arg(long)]
    server: Option<String>,

    /// Input device index override
    #[arg(long)]
    device: Option<usize>,

    /// Config file path override
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// List input devices and exit
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() {
    // stdout belongs to the protocol; all diagnostics go to stderr.
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run().await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    if cli.list_devices {
        return list_devices();
    }

    let mut config =
        HelperConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(addr) = cli.server {
        config.recognizer.address = addr;
    }
    if let Some(index) = cli.device {
        config.audio.device_index = Some(index);
    }

    let options = SessionOptions {
        language: cli.language.unwrap_or_else(|| config.language.clone()),
        prefer_on_device: cli.on_device,
    };

    info!(
        "sotto-helper v{} ({}, on_device={})",
        env!("CARGO_PKG_VERSION"),
        options.language,
        options.prefer_on_device
    );

    let mut writer = LineWriter::stdout();
    let authorization = check_capture_authorization();

    let tap = match CaptureTap::open(config.audio.clone()) {
        Ok(tap) => tap,
        Err(e) => {
            let message = format!("Audio capture setup failed: {}", e);
            let _ = writer.write(&ProtocolLine::Error(message.clone()));
            anyhow::bail!(message);
        }
    };

    let backend = Arc::new(RemoteBackend::new(
        config.recognizer.address.clone(),
        config.recognizer.capabilities(),
    ));

    let mut controller = SessionController::new(options, writer, backend, Box::new(tap));

    // Install handlers before start so a signal racing setup is queued, not
    // left to the default action.
    let mut sigint = signal(SignalKind::interrupt()).context("install SIGINT handler")?;
    let mut sigterm = signal(SignalKind::terminate()).context("install SIGTERM handler")?;

    controller.start(authorization).await?;

    // Steady state: pump frames and results until a termination signal, or
    // until both sources end on their own.
    loop {
        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT");
                break;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
                break;
            }
            more = controller.pump() => {
                match more {
                    Ok(true) => {}
                    Ok(false) => {
                        info!("Recognition and capture ended");
                        break;
                    }
                    Err(e) => return Err(e).context("session pump"),
                }
            }
        }
    }

    controller.stop();

    // Grace delay: keep draining so a last in-flight final can land.
    let grace = tokio::time::sleep(config.grace_delay());
    tokio::pin!(grace);
    loop {
        tokio::select! {
            _ = &mut grace => break,
            more = controller.pump() => {
                match more {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => {
                        error!("Pump failed during grace delay: {:#}", e);
                        break;
                    }
                }
            }
        }
    }

    controller.terminate();
    info!("Session complete");

    Ok(())
}

fn list_devices() -> Result<()> {
    let devices = CaptureTap::list_devices()?;

    if devices.is_empty() {
        println!("No input devices found");
        return Ok(());
    }

    for device in devices {
        let default_marker = if device.is_default { " [default]" } else { "" };
        println!("{:3}: {}{}", device.index, device.name, default_marker);
        println!("     {} Hz, {} channels", device.sample_rate, device.channels);
    }

    Ok(())
}
