// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! Primary key digests.
//!
//! The primary key of an unlocked volume is kept by the kernel in the user
//! keyring. It is read only to compute or check a salted HMAC over it, and
//! the buffer holding it is zeroized as soon as the digest is done.
//!
//! Digest = HMAC-<alg>(key = salt, message = primary key).

use crate::config::KEYRING_PREFIX;
use crate::fde::device::{DeviceError, DeviceResult, PrimaryKeyDigests};
use crate::fde::model::HashAlgorithm;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand_core::TryRngCore;
use sha2::{Sha256, Sha384, Sha512};
use std::path::Path;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

/// Length of freshly generated digest salts.
pub const SALT_LEN: usize = 32;

/// Source of the primary key protecting a device.
pub trait PrimaryKeySource: Send + Sync {
    fn primary_key(&self, device_path: &Path) -> DeviceResult<Zeroizing<Vec<u8>>>;
}

/// Reads primary keys from the kernel user keyring.
///
/// Keys are looked up by the description `<prefix>:<device path>:aux`.
#[derive(Debug, Clone)]
pub struct KernelKeyring {
    prefix: String,
}

impl Default for KernelKeyring {
    fn default() -> Self {
        Self {
            prefix: KEYRING_PREFIX.to_string(),
        }
    }
}

impl KernelKeyring {
    pub fn with_prefix<S: Into<String>>(prefix: S) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn description(&self, device_path: &Path) -> String {
        format!("{}:{}:aux", self.prefix, device_path.display())
    }
}

#[cfg(target_os = "linux")]
mod keyctl {
    use crate::fde::device::{DeviceError, DeviceResult};
    use std::ffi::CString;
    use zeroize::Zeroizing;

    const KEY_SPEC_USER_KEYRING: libc::c_long = -4;
    const KEYCTL_READ: libc::c_long = 11;

    /// Finds a `user` key by description in the user keyring.
    pub fn request_user_key(description: &str) -> DeviceResult<libc::c_long> {
        let key_type = CString::new("user").map_err(|e| DeviceError::Keyring(e.to_string()))?;
        let desc =
            CString::new(description).map_err(|e| DeviceError::Keyring(e.to_string()))?;

        // SAFETY: both strings are NUL terminated and outlive the call; a
        // null callout info asks the kernel not to upcall.
        let id = unsafe {
            libc::syscall(
                libc::SYS_request_key,
                key_type.as_ptr(),
                desc.as_ptr(),
                std::ptr::null::<libc::c_char>(),
                KEY_SPEC_USER_KEYRING,
            )
        };
        if id < 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ENOKEY) {
                return Err(DeviceError::PrimaryKeyNotFound(description.to_string()));
            }
            return Err(DeviceError::Keyring(err.to_string()));
        }
        Ok(id)
    }

    /// Reads the payload of key `id`.
    pub fn read_key(id: libc::c_long) -> DeviceResult<Zeroizing<Vec<u8>>> {
        // SAFETY: a null buffer with zero length only queries the size.
        let size = unsafe {
            libc::syscall(
                libc::SYS_keyctl,
                KEYCTL_READ,
                id,
                std::ptr::null_mut::<u8>(),
                0usize,
            )
        };
        if size < 0 {
            return Err(DeviceError::Keyring(
                std::io::Error::last_os_error().to_string(),
            ));
        }

        let mut buf = Zeroizing::new(vec![0u8; size as usize]);
        // SAFETY: buf is valid for writes of buf.len() bytes.
        let read = unsafe {
            libc::syscall(
                libc::SYS_keyctl,
                KEYCTL_READ,
                id,
                buf.as_mut_ptr(),
                buf.len(),
            )
        };
        if read < 0 {
            return Err(DeviceError::Keyring(
                std::io::Error::last_os_error().to_string(),
            ));
        }
        let len = (read as usize).min(buf.len());
        buf.truncate(len);
        Ok(buf)
    }
}

impl PrimaryKeySource for KernelKeyring {
    #[cfg(target_os = "linux")]
    fn primary_key(&self, device_path: &Path) -> DeviceResult<Zeroizing<Vec<u8>>> {
        let id = keyctl::request_user_key(&self.description(device_path))?;
        keyctl::read_key(id)
    }

    #[cfg(not(target_os = "linux"))]
    fn primary_key(&self, _device_path: &Path) -> DeviceResult<Zeroizing<Vec<u8>>> {
        Err(DeviceError::Keyring(
            "kernel keyring is only available on Linux".to_string(),
        ))
    }
}

/// [`PrimaryKeyDigests`] computing salted HMACs over keys from a
/// [`PrimaryKeySource`].
pub struct KeyringDigests<S> {
    source: S,
}

impl<S: PrimaryKeySource> KeyringDigests<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }
}

impl<S: PrimaryKeySource> PrimaryKeyDigests for KeyringDigests<S> {
    fn compute(&self, device_path: &Path, alg: HashAlgorithm) -> DeviceResult<(Vec<u8>, Vec<u8>)> {
        let mut salt = vec![0u8; SALT_LEN];
        OsRng
            .try_fill_bytes(&mut salt)
            .map_err(|e| DeviceError::Random(e.to_string()))?;

        let key = self.source.primary_key(device_path)?;
        let digest = keyed_digest(alg, &salt, &key)?;
        Ok((salt, digest))
    }

    fn verify(
        &self,
        device_path: &Path,
        alg: HashAlgorithm,
        salt: &[u8],
        digest: &[u8],
    ) -> DeviceResult<bool> {
        let key = self.source.primary_key(device_path)?;
        let computed = keyed_digest(alg, salt, &key)?;
        Ok(computed.ct_eq(digest).into())
    }
}

/// HMAC of `key` keyed with `salt`.
pub fn keyed_digest(alg: HashAlgorithm, salt: &[u8], key: &[u8]) -> DeviceResult<Vec<u8>> {
    let invalid = |e: hmac::digest::InvalidLength| DeviceError::Malformed {
        what: "digest salt",
        detail: e.to_string(),
    };
    let digest = match alg {
        HashAlgorithm::Sha256 => {
            let mut mac = Hmac::<Sha256>::new_from_slice(salt).map_err(invalid)?;
            mac.update(key);
            mac.finalize().into_bytes().to_vec()
        }
        HashAlgorithm::Sha384 => {
            let mut mac = Hmac::<Sha384>::new_from_slice(salt).map_err(invalid)?;
            mac.update(key);
            mac.finalize().into_bytes().to_vec()
        }
        HashAlgorithm::Sha512 => {
            let mut mac = Hmac::<Sha512>::new_from_slice(salt).map_err(invalid)?;
            mac.update(key);
            mac.finalize().into_bytes().to_vec()
        }
    };
    Ok(digest)
}
