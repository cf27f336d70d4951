// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! Tesseract FDE - command-line client
//!
//! Queries the FDE daemon, or reads a state file offline.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tesseract_fde::config::FDE_STATE_KEY;
use tesseract_fde::daemon::{DaemonClient, DaemonCommand, DaemonResponse};
use tesseract_fde::fde::FdeState;
use tesseract_fde::{KeyTrust, KeyslotRole, ManagerConfig, State};

/// Command-line interface definition
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about,
    long_about = "Inspect the full-disk-encryption state tracked by tesseract-fded."
)]
struct Cli {
    /// Daemon socket (defaults to <root>/run/tesseract-fde.sock)
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    /// Increase log verbosity
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Check that the daemon is alive
    Ping,
    /// Show whether FDE state is functional and the roles it tracks
    Status,
    /// Show the sealing parameters of a keyslot role
    Params {
        /// Keyslot role (run, run+recover, recover)
        #[arg(short, long)]
        role: KeyslotRole,
        /// Container role, falls back to "all"
        #[arg(short, long, default_value = "all")]
        container_role: String,
    },
    /// Print the FDE record of a state file without contacting the daemon
    DumpState {
        /// State file (defaults to the one under the root dir)
        #[arg(long)]
        state_file: Option<PathBuf>,
    },
    /// Ask the daemon to stop
    Shutdown,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        _ => log::LevelFilter::Debug,
    };
    simple_logger::SimpleLogger::new().with_level(level).init()?;

    let config = ManagerConfig::from_env();
    let client = DaemonClient::new(cli.socket.unwrap_or_else(|| config.socket_path()));

    match cli.command {
        Commands::Ping => {
            if !client.is_running() {
                return Err(format!(
                    "daemon is not answering on {}",
                    client.socket_path().display()
                )
                .into());
            }
            println!("daemon is running");
        }
        Commands::Status => print_status(client.send_command(DaemonCommand::Status)?)?,
        Commands::Params {
            role,
            container_role,
        } => match client.get_parameters(role, &container_role)? {
            Some(params) => println!("{}", serde_json::to_string_pretty(&params)?),
            None => println!("no parameters recorded for {}/{}", role, container_role),
        },
        Commands::DumpState { state_file } => {
            let path = state_file.unwrap_or_else(|| config.default_state_file());
            let state = State::open(&path)?;
            let lock = state.lock();
            match lock.get::<FdeState>(FDE_STATE_KEY)? {
                Some(fde) => println!("{}", serde_json::to_string_pretty(&fde)?),
                None => println!("no FDE state in {}", path.display()),
            }
        }
        Commands::Shutdown => {
            client.shutdown()?;
            println!("daemon is shutting down");
        }
    }

    Ok(())
}

fn print_status(response: DaemonResponse) -> Result<(), Box<dyn std::error::Error>> {
    match response {
        DaemonResponse::Status {
            functional,
            reason,
            primary_keys,
            key_trust,
            roles,
        } => {
            if !functional {
                println!("not functional: {}", reason.unwrap_or_default());
                return Ok(());
            }
            println!("functional, {} primary key(s)", primary_keys);
            if key_trust == KeyTrust::SaveKeyMismatch {
                println!("warning: save partition uses a different primary key than data");
            }
            for role in roles {
                println!(
                    "  {:<12} key {} counter {:#x} containers [{}]",
                    role.name,
                    role.primary_key_id,
                    role.pcr_policy_counter,
                    role.container_roles.join(", ")
                );
            }
            Ok(())
        }
        DaemonResponse::Error { message } => Err(message.into()),
        other => Err(format!("unexpected response: {:?}", other).into()),
    }
}
