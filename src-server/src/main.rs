//! AirDesk server binary.
//!
//! Initializes logging and configuration, builds the streaming server
//! and parks until a console interrupt. The HTTPS signaling layer is an
//! external collaborator; it reaches the core through
//! [`airdesk_server::server::Server::handle_offer`].

use airdesk_common::logging;
use airdesk_server::platform;
use airdesk_server::server::Server;
use std::sync::atomic::Ordering;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Console logging plus a plain-text file under the platform log dir.
fn init_logging(debug: bool) {
    let default_filter = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let log_file = logging::prepare_log_file().ok().and_then(|path| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .ok()
    });

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer());
    match log_file {
        Some(file) => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(file),
            )
            .init(),
        None => registry.init(),
    }
}

fn main() {
    let debug_flag = std::env::args()
        .skip(1)
        .any(|a| a == "--debug" || a == "-d");

    // Must precede any other Windows API call.
    platform::set_dpi_awareness();

    let mut config = airdesk_server::config::load_config();
    config.debug |= debug_flag;
    init_logging(config.debug);

    info!(
        "=== AirDesk Server v{} (pid: {}) ===",
        airdesk_common::AIRDESK_VERSION,
        std::process::id()
    );
    if config.debug {
        info!("Debug logging enabled");
    }

    platform::raise_process_priority();

    let mut server = match Server::new(config) {
        Ok(server) => server,
        Err(e) => {
            error!("Fatal: {}", e);
            eprintln!("Fatal: {}", e);
            std::process::exit(1);
        }
    };

    info!("Display: {}Hz", server.host_fps());
    match server.mic_device() {
        Some(name) => info!("Mic: {}", name),
        None => info!("Mic: not available"),
    }

    // Ctrl+C flips the shared run flag; every worker loop observes it.
    let run = server.run_flag();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received Ctrl+C");
        run.store(false, Ordering::Release);
    }) {
        warn!("Failed to set Ctrl+C handler: {}", e);
    }

    server.run_until_shutdown();
    server.shutdown();
}
