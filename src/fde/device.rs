// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! Device collaborators of the FDE manager.
//!
//! The manager never touches block devices, the kernel keyring or the TPM
//! directly. It goes through the traits in this module, which are injected at
//! construction. Production implementations live in the `sysfs`, `keyring`
//! and `luks2` modules; tests supply fakes.

use crate::fde::model::HashAlgorithm;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors reported by device collaborators.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The mount point is not backed by a device-mapper crypt device.
    ///
    /// Expected on systems or boot modes without that volume.
    #[error("no dm UUID for mount point {}", .0.display())]
    NoDmUuid(PathBuf),

    /// The mount point does not appear in the mount table.
    #[error("cannot find mount point {}", .0.display())]
    MountNotFound(PathBuf),

    #[error("cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Data read from the system does not have the expected shape.
    #[error("invalid {what}: {detail}")]
    Malformed { what: &'static str, detail: String },

    #[error("cannot access kernel keyring: {0}")]
    Keyring(String),

    #[error("cannot find primary key for {0} in the kernel keyring")]
    PrimaryKeyNotFound(String),

    #[error("cannot find keyslot {name:?} on {}", .device.display())]
    KeyslotNotFound { device: PathBuf, name: String },

    #[error("sealed key file {} uses a legacy format handled by the TPM backend", .0.display())]
    LegacySealedKey(PathBuf),

    #[error("cannot generate salt: {0}")]
    Random(String),

    #[error("{0}")]
    Other(String),
}

impl DeviceError {
    /// Whether this is the expected-absence condition.
    pub fn is_no_dm_uuid(&self) -> bool {
        matches!(self, DeviceError::NoDmUuid(_))
    }

    pub(crate) fn read(path: &Path, source: std::io::Error) -> Self {
        DeviceError::Read {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

/// Maps a mount point to the UUID of the encrypted device behind it.
pub trait MountResolver: Send + Sync {
    fn dm_crypt_uuid(&self, mount_point: &Path) -> DeviceResult<String>;
}

/// Computes and checks salted digests of the primary key unlocking a device.
pub trait PrimaryKeyDigests: Send + Sync {
    /// Returns `(salt, digest)` for the primary key of `device_path`.
    fn compute(&self, device_path: &Path, alg: HashAlgorithm) -> DeviceResult<(Vec<u8>, Vec<u8>)>;

    /// Returns whether the primary key of `device_path` matches the digest.
    /// A mismatch is `Ok(false)`.
    fn verify(
        &self,
        device_path: &Path,
        alg: HashAlgorithm,
        salt: &[u8],
        digest: &[u8],
    ) -> DeviceResult<bool>;
}

/// Reads the PCR policy revocation counter bound to a keyslot.
pub trait PcrHandleReader: Send + Sync {
    fn read_pcr_handle(
        &self,
        device_path: &Path,
        keyslot: &str,
        sealed_key_file: &Path,
    ) -> DeviceResult<u32>;
}
