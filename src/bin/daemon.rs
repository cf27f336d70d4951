// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! Tesseract FDE Daemon
//!
//! Long-running service owning the FDE manager of the system

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tesseract_fde::daemon::DaemonServer;
use tesseract_fde::{Collaborators, FdeManager, ManagerConfig, State, StateManager};

#[derive(Parser, Debug)]
#[command(author, version, about = "Full-disk-encryption state daemon")]
struct Args {
    /// Root of the filesystem hierarchy
    #[arg(long, env = "TESSERACT_FDE_ROOT")]
    root: Option<PathBuf>,

    /// State file (defaults to <root>/var/lib/tesseract-fde/state.json)
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Daemon socket (defaults to <root>/run/tesseract-fde.sock)
    #[arg(long)]
    socket: Option<PathBuf>,

    /// The system is a classic installation
    #[arg(long)]
    classic: bool,

    /// Seconds between two ensure passes
    #[arg(long)]
    ensure_interval: Option<u64>,

    /// Seconds a client may stay silent before it is dropped
    #[arg(long)]
    client_timeout: Option<u64>,

    /// Increase log verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let args = Args::parse();

    let level = match args.verbose {
        0 => log::LevelFilter::Info,
        _ => log::LevelFilter::Debug,
    };
    if let Err(e) = simple_logger::SimpleLogger::new().with_level(level).init() {
        eprintln!("cannot set up logging: {}", e);
    }

    if let Err(e) = run(args) {
        log::error!("daemon error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = ManagerConfig::from_env();
    if let Some(root) = args.root {
        config.root_dir = root;
    }
    config.classic |= args.classic;

    let state_file = args.state_file.unwrap_or_else(|| config.default_state_file());
    let socket = args.socket.unwrap_or_else(|| config.socket_path());
    log::info!("starting FDE daemon with state {}", state_file.display());

    let state = State::open(&state_file)?;
    let manager = Arc::new(FdeManager::new(&state, Collaborators::system(), config));
    manager.start_up()?;
    match manager.is_functional() {
        Ok(()) => log::info!("FDE manager is functional"),
        Err(e) => log::warn!("FDE manager is not functional: {}", e),
    }

    let mut server = DaemonServer::new(Arc::clone(&manager), socket);
    if let Some(secs) = args.ensure_interval {
        server = server.with_ensure_interval(Duration::from_secs(secs));
    }
    if let Some(secs) = args.client_timeout {
        server = server.with_client_timeout(Duration::from_secs(secs.max(1)));
    }
    log::debug!("serving IPC on {}", server.socket_path().display());
    install_signal_handler(&server)?;
    server.run()?;
    Ok(())
}

/// Stops the accept loop on Ctrl+C / SIGTERM
#[cfg(feature = "ctrlc")]
fn install_signal_handler(server: &DaemonServer) -> Result<(), Box<dyn std::error::Error>> {
    let flag = server.shutdown_flag();
    ctrlc::set_handler(move || {
        flag.store(true, std::sync::atomic::Ordering::Relaxed);
    })?;
    Ok(())
}

#[cfg(not(feature = "ctrlc"))]
fn install_signal_handler(_server: &DaemonServer) -> Result<(), Box<dyn std::error::Error>> {
    Ok(())
}
