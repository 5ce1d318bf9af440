//! Essence terminal client entrypoint.
//!
//! # Architecture
//!
//! - Input thread: reads stdin lines and forwards them to the event loop
//! - Tokio runtime: owns the backend WebSocket and HTTP reply streams
//! - Mic stream: cpal callback thread pushing PCM chunks
//! - Event loop: single-threaded session state plus redraws

mod commands;
mod event_loop;
mod persistent_config;
mod terminal;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::unbounded;
use essence::capture::list_input_devices;
use essence::config::{AppConfig, Transport};
use essence::connection::establish;
use essence::http_fallback::build_client;
use essence::playback::{CommandSpeech, Speaker};
use essence::report::{render_report, Report};
use essence::session::ChatSession;
use essence::{init_logging, init_tracing, log_debug, log_file_path};
use std::fs;
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::event_loop::{run_event_loop, EventLoopDeps};
use crate::terminal::ScreenGuard;

const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Parser)]
#[command(name = "essence", about = "Essence client", author, version)]
struct Cli {
    #[command(flatten)]
    app: AppConfig,

    /// Render a saved evaluation report (JSON) and exit
    #[arg(long = "report", value_name = "FILE")]
    report: Option<PathBuf>,

    /// List available audio input devices and exit
    #[arg(long = "list-input-devices", default_value_t = false)]
    list_input_devices: bool,

    /// Save the effective settings to the user config file and exit
    #[arg(long = "save-config", default_value_t = false)]
    save_config: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.list_input_devices {
        print_input_devices();
        return Ok(());
    }
    if let Some(path) = cli.report.as_deref() {
        return print_report(path);
    }

    // CLI always wins over the saved file.
    let mut config = cli.app;
    let explicit = persistent_config::detect_explicit_flags();
    let user_config = persistent_config::load_user_config();
    persistent_config::apply_user_config(&user_config, &mut config, &explicit);
    config.validate()?;

    if cli.save_config {
        let path =
            persistent_config::save_user_config(&persistent_config::user_config_from_runtime(
                &config,
            ))?;
        println!("Saved settings to {}", path.display());
        return Ok(());
    }

    init_logging(&config);
    init_tracing(&config);
    log_debug("=== Essence Client Started ===");
    log_debug(&format!("Log file: {:?}", log_file_path()));
    tracing::info!(
        transport = %config.transport,
        server = %config.server_url,
        "client starting"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("essence-net")
        .enable_all()
        .build()
        .context("start async runtime")?;

    let (connection_tx, connection_rx) = unbounded();
    let (sink, connection_rx, http_client) = match config.transport {
        Transport::Ws => {
            let url = config.websocket_url();
            log_debug(&format!("Connecting to {url}"));
            let handle = establish(
                runtime.handle(),
                url,
                config.reconnect_delay(),
                connection_tx,
            );
            (Some(handle), Some(connection_rx), None)
        }
        Transport::Http => (None, None, Some(build_client()?)),
    };

    let engine = CommandSpeech::new(config.speech_command.as_deref())?;
    let mut session = ChatSession::new(&config, sink, Speaker::new(engine));

    if let Err(err) = terminal::install_sigwinch_handler() {
        log_debug(&format!("resize tracking disabled: {err:#}"));
    }
    let screen = if io::stdout().is_terminal() {
        Some(ScreenGuard::enter().context("enter alternate screen")?)
    } else {
        None
    };

    let deps = EventLoopDeps {
        runtime: runtime.handle().clone(),
        config,
        http_client,
        connection_rx,
    };
    let outcome = run_event_loop(&mut session, deps);

    drop(screen);
    drop(session);
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
    log_debug("=== Essence Client Exiting ===");
    outcome
}

fn print_input_devices() {
    match list_input_devices() {
        Ok(devices) => {
            if devices.is_empty() {
                println!("No audio input devices detected.");
            } else {
                println!("Available audio input devices:");
                for name in devices {
                    println!("  - {name}");
                }
            }
        }
        Err(err) => {
            eprintln!("Failed to list audio input devices: {err:#}");
        }
    }
}

fn print_report(path: &Path) -> Result<()> {
    let content =
        fs::read_to_string(path).with_context(|| format!("read report {}", path.display()))?;
    let report = Report::parse(&content)?;
    print!("{}", render_report(&report));
    Ok(())
}
