// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! Error types for the FDE state manager.
//!
//! `FdeError` is returned by every manager entry point. Collaborator failures
//! (mount resolution, digests, PCR handles) arrive as
//! [`DeviceError`](crate::fde::device::DeviceError) and are wrapped
//! transparently so their message reaches the caller unchanged.

use crate::fde::device::DeviceError;
use std::fmt;
use thiserror::Error;

/// Main error type for all FDE manager operations.
#[derive(Error, Debug)]
pub enum FdeError {
    /// I/O error while reading or writing persisted state.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure reported by a device collaborator.
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// First-time initialization failed; cached as the non-functional reason.
    #[error("cannot initialize FDE state: {0}")]
    Init(InitError),

    /// The manager runs while building an image and no real device exists.
    #[error("internal error: FDE manager cannot be used in preseeding mode")]
    Preseeding,

    /// The role is not tracked in the persisted FDE state.
    #[error("cannot find keyslot role {0}")]
    UnknownKeyslotRole(String),

    /// The role name does not name any known keyslot role.
    #[error("invalid keyslot role name {0:?}")]
    InvalidRoleName(String),

    /// The persisted FDE state violates an invariant.
    #[error("invalid FDE state: {0}")]
    InvalidState(String),

    /// The FDE state has not been initialized yet.
    #[error("FDE state is not initialized")]
    NotInitialized,

    /// A reseal backend asked to release the state lock a second time.
    #[error("state lock can be released only once per reseal")]
    AlreadyUnlocked,

    /// State was accessed through a lock handle that is currently released.
    #[error("state accessed without holding the state lock")]
    NotLocked,

    /// A persisted record could not be encoded or decoded.
    #[error("cannot (de)serialize state: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The modeenv file exists but cannot be parsed.
    #[error("cannot parse modeenv: {0}")]
    Modeenv(String),

    /// The state file path has no parent directory.
    #[error("state file path has no parent directory")]
    InvalidOutputPath,

    /// The checkpoint could not be renamed over the state file.
    #[error("cannot replace state file: {0}")]
    TempFilePersist(#[from] tempfile::PersistError),

    /// Reseal was requested but no backend is registered.
    #[error("no reseal backend registered")]
    NoResealBackend,

    /// Error reported by a reseal backend.
    #[error("{0}")]
    Backend(String),
}

/// Cached description of an initialization failure.
///
/// `FdeError` cannot be cloned (it may hold an `io::Error`), so the manager
/// keeps the rendered cause and re-surfaces it on every gate check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitError {
    message: String,
}

impl InitError {
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Type alias for Results using FdeError.
pub type Result<T> = std::result::Result<T, FdeError>;
