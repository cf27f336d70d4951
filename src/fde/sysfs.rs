// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! Mount point to dm-crypt UUID resolution through procfs and sysfs.
//!
//! The mount table gives the `major:minor` of the device behind a mount
//! point; `/sys/dev/block/<major:minor>/dm/uuid` then tells whether it is a
//! device-mapper crypt target and which LUKS container it maps.

use crate::fde::device::{DeviceError, DeviceResult, MountResolver};
use std::path::{Path, PathBuf};

const LUKS_UUID_HEX_LEN: usize = 32;

/// [`MountResolver`] reading the live mount table and sysfs.
#[derive(Debug, Clone)]
pub struct SysfsMountResolver {
    mountinfo: PathBuf,
    sys_dev_block: PathBuf,
}

impl Default for SysfsMountResolver {
    fn default() -> Self {
        Self {
            mountinfo: PathBuf::from("/proc/self/mountinfo"),
            sys_dev_block: PathBuf::from("/sys/dev/block"),
        }
    }
}

impl SysfsMountResolver {
    /// Creates a resolver reading from alternative procfs/sysfs locations.
    pub fn with_roots<P: Into<PathBuf>, Q: Into<PathBuf>>(mountinfo: P, sys_dev_block: Q) -> Self {
        Self {
            mountinfo: mountinfo.into(),
            sys_dev_block: sys_dev_block.into(),
        }
    }

    fn device_number(&self, mount_point: &Path) -> DeviceResult<String> {
        let table = std::fs::read_to_string(&self.mountinfo)
            .map_err(|e| DeviceError::read(&self.mountinfo, e))?;

        // Later entries shadow earlier ones mounted at the same place.
        let mut found = None;
        for line in table.lines() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 5 {
                continue;
            }
            if Path::new(&unescape_mount_path(fields[4])) == mount_point {
                found = Some(fields[2].to_string());
            }
        }
        found.ok_or_else(|| DeviceError::MountNotFound(mount_point.to_path_buf()))
    }
}

impl MountResolver for SysfsMountResolver {
    fn dm_crypt_uuid(&self, mount_point: &Path) -> DeviceResult<String> {
        let devno = self.device_number(mount_point)?;
        let dm_uuid_path = self.sys_dev_block.join(&devno).join("dm").join("uuid");

        let dm_uuid = match std::fs::read_to_string(&dm_uuid_path) {
            Ok(content) => content.trim().to_string(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("{} is not a device-mapper device", mount_point.display());
                return Err(DeviceError::NoDmUuid(mount_point.to_path_buf()));
            }
            Err(e) => return Err(DeviceError::read(&dm_uuid_path, e)),
        };

        match luks_uuid_from_dm_uuid(&dm_uuid)? {
            Some(uuid) => Ok(uuid),
            None => Err(DeviceError::NoDmUuid(mount_point.to_path_buf())),
        }
    }
}

/// Extracts the LUKS container UUID from a dm UUID.
///
/// `CRYPT-LUKS2-5a522809c87e4dfa81a88dc5667d1304-ubuntu-data` yields
/// `5a522809-c87e-4dfa-81a8-8dc5667d1304`. Mapper devices that are not crypt
/// targets yield `None`.
pub fn luks_uuid_from_dm_uuid(dm_uuid: &str) -> DeviceResult<Option<String>> {
    let Some(rest) = dm_uuid.strip_prefix("CRYPT-") else {
        return Ok(None);
    };
    let Some(rest) = rest
        .strip_prefix("LUKS2-")
        .or_else(|| rest.strip_prefix("LUKS1-"))
    else {
        return Ok(None);
    };

    let hex = rest.split('-').next().unwrap_or_default();
    if hex.len() != LUKS_UUID_HEX_LEN || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(DeviceError::Malformed {
            what: "dm-crypt UUID",
            detail: dm_uuid.to_string(),
        });
    }

    let hex = hex.to_ascii_lowercase();
    Ok(Some(format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )))
}

/// Decodes the octal escapes (`\040` for space) used in the mount table.
fn unescape_mount_path(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() {
            let octal = std::str::from_utf8(&bytes[i + 1..i + 4]).ok();
            if let Some(value) = octal.and_then(|o| u8::from_str_radix(o, 8).ok()) {
                out.push(value);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
