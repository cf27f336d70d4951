// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! PCR policy counter lookup in LUKS2 token metadata.
//!
//! Sealed keys are stored as `ubuntu-fde` tokens in the LUKS2 JSON metadata
//! area. Each token names the keyslot it belongs to and carries the platform
//! handle of the sealed object, including the NV index of its PCR policy
//! revocation counter.

use crate::fde::device::{DeviceError, DeviceResult, PcrHandleReader};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// LUKS magic bytes
const LUKS_MAGIC: [u8; 6] = *b"LUKS\xba\xbe";

/// Size of the binary header preceding the JSON area
const BINARY_HEADER_SIZE: usize = 4096;

/// Upper bound on the metadata area (LUKS2 allows up to 4 MiB)
const MAX_HEADER_SIZE: u64 = 4 * 1024 * 1024;

const TOKEN_TYPE: &str = "ubuntu-fde";

#[derive(Debug, Deserialize)]
struct Metadata {
    #[serde(default)]
    tokens: BTreeMap<String, Token>,
}

#[derive(Debug, Deserialize)]
struct Token {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    ubuntu_fde_name: Option<String>,
    #[serde(default)]
    ubuntu_fde_data: Option<TokenData>,
}

#[derive(Debug, Deserialize)]
struct TokenData {
    platform_handle: PlatformHandle,
}

#[derive(Debug, Deserialize)]
struct PlatformHandle {
    pcr_policy_counter_handle: u32,
}

/// [`PcrHandleReader`] parsing the LUKS2 header of the device directly.
#[derive(Debug, Clone, Default)]
pub struct Luks2TokenReader;

impl Luks2TokenReader {
    pub fn new() -> Self {
        Self
    }
}

impl PcrHandleReader for Luks2TokenReader {
    fn read_pcr_handle(
        &self,
        device_path: &Path,
        keyslot: &str,
        sealed_key_file: &Path,
    ) -> DeviceResult<u32> {
        let metadata = read_metadata(device_path)?;

        let token = metadata.tokens.values().find(|t| {
            t.kind == TOKEN_TYPE && t.ubuntu_fde_name.as_deref() == Some(keyslot)
        });

        match token {
            Some(token) => {
                let data = token.ubuntu_fde_data.as_ref().ok_or_else(|| DeviceError::Malformed {
                    what: "LUKS2 token",
                    detail: format!("token for keyslot {:?} has no key data", keyslot),
                })?;
                let handle = data.platform_handle.pcr_policy_counter_handle;
                log::debug!(
                    "keyslot {:?} on {} uses PCR policy counter {:#x}",
                    keyslot,
                    device_path.display(),
                    handle
                );
                Ok(handle)
            }
            None if sealed_key_file.exists() => {
                Err(DeviceError::LegacySealedKey(sealed_key_file.to_path_buf()))
            }
            None => Err(DeviceError::KeyslotNotFound {
                device: device_path.to_path_buf(),
                name: keyslot.to_string(),
            }),
        }
    }
}

fn read_metadata(device_path: &Path) -> DeviceResult<Metadata> {
    let mut file = File::open(device_path).map_err(|e| DeviceError::read(device_path, e))?;

    let mut header = [0u8; 16];
    file.read_exact(&mut header)
        .map_err(|e| DeviceError::read(device_path, e))?;

    if header[0..6] != LUKS_MAGIC {
        return Err(malformed(device_path, "not a LUKS device"));
    }
    let version = u16::from_be_bytes([header[6], header[7]]);
    if version != 2 {
        return Err(malformed(
            device_path,
            &format!("unsupported LUKS version {}", version),
        ));
    }

    let mut size_bytes = [0u8; 8];
    size_bytes.copy_from_slice(&header[8..16]);
    let hdr_size = u64::from_be_bytes(size_bytes);
    if hdr_size <= BINARY_HEADER_SIZE as u64 || hdr_size > MAX_HEADER_SIZE {
        return Err(malformed(
            device_path,
            &format!("header size {} out of range", hdr_size),
        ));
    }

    let mut area = vec![0u8; hdr_size as usize];
    area[..16].copy_from_slice(&header);
    file.read_exact(&mut area[16..])
        .map_err(|e| DeviceError::read(device_path, e))?;

    let json = &area[BINARY_HEADER_SIZE..];
    let end = json.iter().position(|&b| b == 0).unwrap_or(json.len());
    serde_json::from_slice(&json[..end]).map_err(|e| DeviceError::Malformed {
        what: "LUKS2 metadata",
        detail: e.to_string(),
    })
}

fn malformed(device_path: &Path, detail: &str) -> DeviceError {
    DeviceError::Malformed {
        what: "LUKS2 header",
        detail: format!("{}: {}", PathBuf::from(device_path).display(), detail),
    }
}
