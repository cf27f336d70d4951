// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! Daemon server implementation
//!
//! Owns the FDE manager for the lifetime of the process, drives its
//! `ensure` hook and answers IPC requests.

use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::protocol::{
    read_message, write_message, DaemonCommand, DaemonResponse, ProtocolError, Request,
    RoleSummary,
};
use crate::config::ENSURE_INTERVAL;
use crate::fde::manager::{FdeManager, StateManager};
use crate::fde::model::KeyTrust;

/// How often the accept loop wakes up to check for shutdown
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long a connected client may take to send its command
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Daemon server state
pub struct DaemonServer {
    manager: Arc<FdeManager>,

    /// Socket path for IPC
    socket_path: PathBuf,

    ensure_interval: Duration,

    client_timeout: Duration,

    /// Shared shutdown flag for graceful termination
    shutdown_flag: Arc<AtomicBool>,
}

impl DaemonServer {
    /// Create a new daemon server for an already started manager
    pub fn new<P: Into<PathBuf>>(manager: Arc<FdeManager>, socket_path: P) -> Self {
        Self {
            manager,
            socket_path: socket_path.into(),
            ensure_interval: ENSURE_INTERVAL,
            client_timeout: CLIENT_TIMEOUT,
            shutdown_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_ensure_interval(mut self, interval: Duration) -> Self {
        self.ensure_interval = interval;
        self
    }

    /// Drops clients that stay silent for longer than `timeout`.
    pub fn with_client_timeout(mut self, timeout: Duration) -> Self {
        self.client_timeout = timeout;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Returns a clone of the shutdown flag for external monitoring
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown_flag)
    }

    /// Serves requests until shutdown is signalled.
    pub fn run(&self) -> Result<(), ProtocolError> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        listener.set_nonblocking(true)?;
        log::info!("daemon listening on {}", self.socket_path.display());

        let mut last_ensure = Instant::now();
        loop {
            if self.shutdown_flag.load(Ordering::Relaxed) {
                log::info!("received shutdown signal, cleaning up");
                break;
            }

            if last_ensure.elapsed() >= self.ensure_interval {
                if let Err(e) = self.manager.ensure() {
                    log::warn!("ensure failed: {}", e);
                }
                last_ensure = Instant::now();
            }

            match listener.accept() {
                Ok((stream, _)) => {
                    let manager = Arc::clone(&self.manager);
                    let shutdown = Arc::clone(&self.shutdown_flag);
                    let timeout = self.client_timeout;
                    std::thread::spawn(move || {
                        if let Err(e) = Self::handle_client(stream, &manager, &shutdown, timeout) {
                            log::warn!("error handling client: {}", e);
                        }
                    });
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(e) => {
                    log::warn!("connection error: {}", e);
                }
            }
        }

        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            log::debug!("cannot remove {}: {}", self.socket_path.display(), e);
        }
        Ok(())
    }

    fn handle_client(
        mut stream: UnixStream,
        manager: &FdeManager,
        shutdown: &AtomicBool,
        timeout: Duration,
    ) -> Result<(), ProtocolError> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        Self::handle_client_impl(&mut stream, manager, shutdown)
    }

    fn handle_client_impl<S: Read + Write>(
        stream: &mut S,
        manager: &FdeManager,
        shutdown: &AtomicBool,
    ) -> Result<(), ProtocolError> {
        let response = match read_message::<_, DaemonCommand>(stream) {
            Ok(command) => match command.validate() {
                Ok(request) => Self::process_request(request, manager, shutdown),
                Err(e) => DaemonResponse::error(e.to_string()),
            },
            Err(ProtocolError::Malformed(e)) => DaemonResponse::error(format!("malformed command: {}", e)),
            Err(e) => return Err(e),
        };
        write_message(stream, &response)
    }

    /// Process a validated request
    pub(crate) fn process_request(
        request: Request,
        manager: &FdeManager,
        shutdown: &AtomicBool,
    ) -> DaemonResponse {
        match request {
            Request::Ping => DaemonResponse::Pong,

            Request::Status => Self::status(manager),

            Request::GetParameters {
                role,
                container_role,
            } => {
                let lock = manager.state().lock();
                match manager.get_parameters(&lock, role, &container_role) {
                    Ok(parameters) => DaemonResponse::Parameters {
                        found: parameters.is_some(),
                        parameters,
                    },
                    Err(e) => DaemonResponse::error(e.to_string()),
                }
            }

            Request::Shutdown => {
                shutdown.store(true, Ordering::Relaxed);
                DaemonResponse::Success
            }
        }
    }

    fn status(manager: &FdeManager) -> DaemonResponse {
        if let Err(e) = manager.is_functional() {
            return DaemonResponse::Status {
                functional: false,
                reason: Some(e.to_string()),
                primary_keys: 0,
                key_trust: KeyTrust::Unchecked,
                roles: Vec::new(),
            };
        }

        let lock = manager.state().lock();
        match manager.fde_state(&lock) {
            Ok(state) => {
                let state = state.unwrap_or_default();
                let roles = state
                    .keyslot_roles
                    .iter()
                    .map(|(name, role)| RoleSummary {
                        name: name.clone(),
                        primary_key_id: role.primary_key_id,
                        pcr_policy_counter: role.tpm2_pcr_policy_revocation_counter,
                        container_roles: role.parameters.keys().cloned().collect(),
                    })
                    .collect();
                DaemonResponse::Status {
                    functional: true,
                    reason: None,
                    primary_keys: state.primary_keys.len(),
                    key_trust: state.save_key_trust,
                    roles,
                }
            }
            Err(e) => DaemonResponse::error(e.to_string()),
        }
    }
}
