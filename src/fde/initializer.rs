// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! First-time construction of the FDE state from the live device topology.

use crate::config::{device_path_for_uuid, ManagerConfig, Volume, PRIMARY_KEY_ID};
use crate::error::InitError;
use crate::fde::device::{DeviceError, DeviceResult};
use crate::fde::manager::Collaborators;
use crate::fde::model::{FdeState, KeyDigest, KeyTrust, KeyslotRoleState, PrimaryKeyState};
use crate::fde::modeenv::BootMode;
use std::path::{Path, PathBuf};

/// Builds the FDE state for a system booted in `mode`.
///
/// Expected absence of the encrypted volumes yields an empty state; any
/// other failure is returned with the step that failed as context.
pub(crate) fn initialize(
    config: &ManagerConfig,
    collaborators: &Collaborators,
    mode: BootMode,
) -> Result<FdeState, InitError> {
    let data_mount = config.data_mount_point();
    let save_mount = config.save_dir();

    let data_device = match resolve_device(collaborators, &data_mount) {
        Ok(device) => device,
        Err(e) if e.is_no_dm_uuid() => {
            if mode.tolerates_missing_data() {
                log::info!("no encrypted data partition in {} mode", mode);
                return Ok(FdeState::default());
            }
            return match resolve_device(collaborators, &save_mount) {
                Err(save_err) if save_err.is_no_dm_uuid() => {
                    log::info!("no encrypted partitions found, FDE is not in use");
                    Ok(FdeState::default())
                }
                _ => Err(context("cannot resolve data partition mount", e)),
            };
        }
        Err(e) => return Err(context("cannot resolve data partition mount", e)),
    };

    let save_device = match resolve_device(collaborators, &save_mount) {
        Ok(device) => Some(device),
        Err(e) if e.is_no_dm_uuid() && mode.tolerates_missing_data() => {
            log::info!("no encrypted save partition in {} mode", mode);
            None
        }
        Err(e) => return Err(context("cannot resolve save partition mount", e)),
    };

    let alg = config.hash_algorithm;
    let (salt, digest) = collaborators
        .digests
        .compute(&data_device, alg)
        .map_err(|e| context("cannot compute primary key digest", e))?;

    let save_key_trust = match &save_device {
        Some(save) => {
            let matches = collaborators
                .digests
                .verify(save, alg, &salt, &digest)
                .map_err(|e| context("cannot verify primary key digest", e))?;
            if matches {
                KeyTrust::Verified
            } else {
                log::warn!(
                    "primary key of {} differs from the one of {}",
                    save.display(),
                    data_device.display()
                );
                KeyTrust::SaveKeyMismatch
            }
        }
        None => KeyTrust::Unchecked,
    };

    let mut state = FdeState {
        save_key_trust,
        ..FdeState::default()
    };
    state.primary_keys.insert(
        PRIMARY_KEY_ID,
        PrimaryKeyState {
            digest: KeyDigest {
                algorithm: alg,
                salt,
                digest,
            },
        },
    );

    for (role, source) in config.layout.iter() {
        let device = match source.volume {
            Volume::Data => &data_device,
            Volume::Save => save_device.as_ref().unwrap_or(&data_device),
        };
        let key_file = config.sealed_key_path(source.key_file);
        let counter = collaborators
            .pcr_reader
            .read_pcr_handle(device, &source.keyslot, &key_file)
            .map_err(|e| {
                context(
                    &format!("cannot read PCR handle of keyslot {}", source.keyslot),
                    e,
                )
            })?;
        log::debug!("keyslot role {} uses PCR policy counter {:#x}", role, counter);
        state.keyslot_roles.insert(
            role.as_str().to_string(),
            KeyslotRoleState::new(PRIMARY_KEY_ID, counter),
        );
    }

    Ok(state)
}

fn resolve_device(collaborators: &Collaborators, mount_point: &Path) -> DeviceResult<PathBuf> {
    let uuid = collaborators.mount_resolver.dm_crypt_uuid(mount_point)?;
    Ok(device_path_for_uuid(&uuid))
}

fn context(what: &str, err: DeviceError) -> InitError {
    InitError::new(format!("{}: {}", what, err))
}
