// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! Daemon client implementation
//!
//! Provides a client interface for communicating with the daemon server.

use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

use super::protocol::{read_message, write_message, DaemonCommand, DaemonResponse, ProtocolError};
use crate::fde::model::{KeyslotRole, SealingParameters};

/// Client for communicating with the daemon
#[derive(Debug, Clone)]
pub struct DaemonClient {
    socket_path: PathBuf,
}

impl DaemonClient {
    pub fn new<P: Into<PathBuf>>(socket_path: P) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Check if the daemon is running
    pub fn is_running(&self) -> bool {
        matches!(self.send_command(DaemonCommand::Ping), Ok(DaemonResponse::Pong))
    }

    /// Send a command to the daemon
    pub fn send_command(&self, command: DaemonCommand) -> Result<DaemonResponse, ProtocolError> {
        let mut stream = UnixStream::connect(&self.socket_path)?;
        write_message(&mut stream, &command)?;
        read_message(&mut stream)
    }

    /// Returns the sealing parameters of `(role, container_role)`.
    pub fn get_parameters(
        &self,
        role: KeyslotRole,
        container_role: &str,
    ) -> Result<Option<SealingParameters>, ProtocolError> {
        let command = DaemonCommand::GetParameters {
            role: role.to_string(),
            container_role: container_role.to_string(),
        };
        match self.send_command(command)? {
            DaemonResponse::Parameters { parameters, .. } => Ok(parameters),
            DaemonResponse::Error { message } => Err(ProtocolError::Daemon(message)),
            _ => Err(ProtocolError::UnexpectedResponse),
        }
    }

    /// Asks the daemon to stop.
    pub fn shutdown(&self) -> Result<(), ProtocolError> {
        match self.send_command(DaemonCommand::Shutdown)? {
            DaemonResponse::Success => Ok(()),
            DaemonResponse::Error { message } => Err(ProtocolError::Daemon(message)),
            _ => Err(ProtocolError::UnexpectedResponse),
        }
    }
}
