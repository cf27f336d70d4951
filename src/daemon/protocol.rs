// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! IPC protocol for daemon communication
//!
//! Messages are JSON documents framed by a 4-byte big-endian length prefix
//! over a Unix domain socket. Commands are decoded into tagged variants and
//! validated into a [`Request`] before any of them reaches the manager.

use crate::fde::model::{KeyTrust, KeyslotRole, SealingParameters};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use thiserror::Error;

/// Maximum frame size accepted from a peer (16 MB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Errors on the IPC boundary.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("frame of {0} bytes exceeds the 16 MB limit")]
    FrameTooLarge(usize),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("daemon error: {0}")]
    Daemon(String),

    #[error("unexpected response from daemon")]
    UnexpectedResponse,
}

/// Commands that can be sent to the daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum DaemonCommand {
    /// Check that the daemon is alive
    Ping,

    /// Report whether the manager is functional and what it tracks
    Status,

    /// Look up sealing parameters
    GetParameters {
        role: String,
        container_role: String,
    },

    /// Stop the daemon
    Shutdown,
}

/// A command whose arguments have been checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Ping,
    Status,
    GetParameters {
        role: KeyslotRole,
        container_role: String,
    },
    Shutdown,
}

impl DaemonCommand {
    /// Checks the command arguments.
    pub fn validate(self) -> Result<Request, ProtocolError> {
        match self {
            DaemonCommand::Ping => Ok(Request::Ping),
            DaemonCommand::Status => Ok(Request::Status),
            DaemonCommand::GetParameters {
                role,
                container_role,
            } => {
                let role = role
                    .parse::<KeyslotRole>()
                    .map_err(|e| ProtocolError::InvalidRequest(e.to_string()))?;
                if container_role.is_empty() {
                    return Err(ProtocolError::InvalidRequest(
                        "container role cannot be empty".to_string(),
                    ));
                }
                Ok(Request::GetParameters {
                    role,
                    container_role,
                })
            }
            DaemonCommand::Shutdown => Ok(Request::Shutdown),
        }
    }
}

/// Summary of a keyslot role reported by `Status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSummary {
    pub name: String,
    pub primary_key_id: u32,
    pub pcr_policy_counter: u32,
    pub container_roles: Vec<String>,
}

/// Responses from the daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "response", rename_all = "kebab-case")]
pub enum DaemonResponse {
    Pong,

    Status {
        functional: bool,
        /// Why the manager is not functional
        reason: Option<String>,
        primary_keys: usize,
        /// Whether the save partition shares the data partition's key
        key_trust: KeyTrust,
        roles: Vec<RoleSummary>,
    },

    Parameters {
        found: bool,
        parameters: Option<SealingParameters>,
    },

    Success,

    Error {
        message: String,
    },
}

impl DaemonResponse {
    /// Create an error response
    pub fn error<S: Into<String>>(message: S) -> Self {
        DaemonResponse::Error {
            message: message.into(),
        }
    }
}

/// Writes one length-prefixed JSON message.
pub fn write_message<W: Write, T: Serialize>(stream: &mut W, message: &T) -> Result<(), ProtocolError> {
    let bytes = serde_json::to_vec(message)?;
    if bytes.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(bytes.len()));
    }
    stream.write_all(&(bytes.len() as u32).to_be_bytes())?;
    stream.write_all(&bytes)?;
    stream.flush()?;
    Ok(())
}

/// Reads one length-prefixed JSON message.
pub fn read_message<R: Read, T: for<'de> Deserialize<'de>>(stream: &mut R) -> Result<T, ProtocolError> {
    let mut len_bytes = [0u8; 4];
    stream.read_exact(&mut len_bytes)?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(len));
    }

    let mut buffer = vec![0u8; len];
    stream.read_exact(&mut buffer)?;
    Ok(serde_json::from_slice(&buffer)?)
}
