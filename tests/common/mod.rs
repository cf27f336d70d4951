// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! Shared fakes for the integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use tempfile::TempDir;

use tesseract_fde::config::{sealed_key_under, SealedKeyFile};
use tesseract_fde::fde::device::{
    DeviceError, DeviceResult, MountResolver, PcrHandleReader, PrimaryKeyDigests,
};
use tesseract_fde::fde::{HashAlgorithm, ModelForSealing, ModelGrade};
use tesseract_fde::{BootMode, Collaborators, ManagerConfig, Modeenv};

pub const DATA_DEVICE: &str = "/dev/disk/by-uuid/aaa";
pub const SAVE_DEVICE: &str = "/dev/disk/by-uuid/bbb";

/// Mount resolver backed by a closure.
pub struct FnMounts<F>(pub F);

impl<F> MountResolver for FnMounts<F>
where
    F: Fn(&Path) -> DeviceResult<String> + Send + Sync,
{
    fn dm_crypt_uuid(&self, mount_point: &Path) -> DeviceResult<String> {
        (self.0)(mount_point)
    }
}

type ComputeFn = dyn Fn(&Path, HashAlgorithm) -> DeviceResult<(Vec<u8>, Vec<u8>)> + Send + Sync;
type VerifyFn = dyn Fn(&Path, HashAlgorithm, &[u8], &[u8]) -> DeviceResult<bool> + Send + Sync;

/// Digest provider backed by closures.
pub struct FnDigests {
    pub compute: Box<ComputeFn>,
    pub verify: Box<VerifyFn>,
}

impl PrimaryKeyDigests for FnDigests {
    fn compute(&self, device_path: &Path, alg: HashAlgorithm) -> DeviceResult<(Vec<u8>, Vec<u8>)> {
        (self.compute)(device_path, alg)
    }

    fn verify(
        &self,
        device_path: &Path,
        alg: HashAlgorithm,
        salt: &[u8],
        digest: &[u8],
    ) -> DeviceResult<bool> {
        (self.verify)(device_path, alg, salt, digest)
    }
}

/// PCR handle reader backed by a closure.
pub struct FnPcr<F>(pub F);

impl<F> PcrHandleReader for FnPcr<F>
where
    F: Fn(&Path, &str, &Path) -> DeviceResult<u32> + Send + Sync,
{
    fn read_pcr_handle(
        &self,
        device_path: &Path,
        keyslot: &str,
        sealed_key_file: &Path,
    ) -> DeviceResult<u32> {
        (self.0)(device_path, keyslot, sealed_key_file)
    }
}

#[derive(Debug, Default)]
pub struct MockModel {
    pub other_name: Option<&'static str>,
}

impl MockModel {
    pub fn named(name: &'static str) -> Self {
        Self {
            other_name: Some(name),
        }
    }
}

impl ModelForSealing for MockModel {
    fn series(&self) -> &str {
        "mock-series"
    }

    fn brand_id(&self) -> &str {
        "mock-brand"
    }

    fn model(&self) -> &str {
        self.other_name.unwrap_or("mock-model")
    }

    fn classic(&self) -> bool {
        false
    }

    fn grade(&self) -> ModelGrade {
        ModelGrade::Signed
    }

    fn sign_key_id(&self) -> &str {
        "mock-key"
    }
}

/// Scratch root directory with a manager configuration pointing into it.
pub struct Fixture {
    pub dir: TempDir,
    pub config: ManagerConfig,
}

impl Fixture {
    /// A system booted in run mode.
    pub fn new(classic: bool) -> Self {
        Self::with_mode(classic, Some(BootMode::Run))
    }

    /// A system booted in `mode`, or without modeenv when `None`.
    pub fn with_mode(classic: bool, mode: Option<BootMode>) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp directory");
        let mut config = ManagerConfig::new(dir.path());
        config.classic = classic;

        if let Some(mode) = mode {
            let mut modeenv = Modeenv::new(mode);
            if mode != BootMode::Run {
                modeenv.recovery_system = Some("1234".to_string());
            }
            modeenv
                .write_to(&config.modeenv_path())
                .expect("Failed to write modeenv");
        }
        Self { dir, config }
    }

    pub fn state_file(&self) -> PathBuf {
        self.config.default_state_file()
    }

    /// Collaborators for an encrypted system whose data (`aaa`) and save
    /// (`bbb`) partitions share a primary key.
    pub fn collaborators(&self) -> Collaborators {
        self.collaborators_with(Ok("aaa".to_string()), Ok("bbb".to_string()), true)
    }

    /// Collaborators with chosen mount resolution results and digest
    /// verification outcome.
    pub fn collaborators_with(
        &self,
        data: DeviceResult<String>,
        save: DeviceResult<String>,
        keys_match: bool,
    ) -> Collaborators {
        let data_mount = self.config.data_mount_point();
        let save_mount = self.config.save_dir();
        let data = clone_result(&data);
        let save = clone_result(&save);

        let mounts = FnMounts(move |mount_point: &Path| {
            if mount_point == data_mount {
                clone_result(&data)
            } else if mount_point == save_mount {
                clone_result(&save)
            } else {
                Err(DeviceError::MountNotFound(mount_point.to_path_buf()))
            }
        });

        let digests = FnDigests {
            compute: Box::new(|device: &Path, alg: HashAlgorithm| {
                if device != Path::new(DATA_DEVICE) || alg != HashAlgorithm::Sha256 {
                    return Err(DeviceError::Other(format!(
                        "unexpected digest of {} with {}",
                        device.display(),
                        alg
                    )));
                }
                Ok((vec![1, 2, 3, 4], vec![5, 6, 7, 8]))
            }),
            verify: Box::new(move |device: &Path, _alg: HashAlgorithm, salt: &[u8], digest: &[u8]| {
                if device != Path::new(SAVE_DEVICE) {
                    return Err(DeviceError::Other(format!(
                        "unexpected verification on {}",
                        device.display()
                    )));
                }
                Ok(keys_match && salt == [1, 2, 3, 4] && digest == [5, 6, 7, 8])
            }),
        };

        let save_dir = self.config.save_dir();
        let pcr = FnPcr(move |device: &Path, keyslot: &str, key_file: &Path| {
            let data_key = sealed_key_under(&save_dir, SealedKeyFile::Data);
            let fallback_key = sealed_key_under(&save_dir, SealedKeyFile::FallbackData);
            match (device.to_str(), keyslot) {
                (Some(DATA_DEVICE), "default") if key_file == data_key => Ok(41),
                (Some(DATA_DEVICE), "default-fallback") if key_file == fallback_key => Ok(42),
                (Some(SAVE_DEVICE), "default-fallback") if key_file == fallback_key => Ok(42),
                _ => Err(DeviceError::KeyslotNotFound {
                    device: device.to_path_buf(),
                    name: keyslot.to_string(),
                }),
            }
        });

        Collaborators {
            mount_resolver: Box::new(mounts),
            digests: Box::new(digests),
            pcr_reader: Box::new(pcr),
            reseal_backend: None,
        }
    }
}

/// Error for an unencrypted mount point.
pub fn no_dm_uuid() -> DeviceResult<String> {
    Err(DeviceError::NoDmUuid(PathBuf::from("/mock")))
}

/// Unexpected resolution failure.
pub fn mock_error(msg: &str) -> DeviceResult<String> {
    Err(DeviceError::Other(msg.to_string()))
}

fn clone_result(result: &DeviceResult<String>) -> DeviceResult<String> {
    match result {
        Ok(uuid) => Ok(uuid.clone()),
        Err(DeviceError::NoDmUuid(path)) => Err(DeviceError::NoDmUuid(path.clone())),
        Err(e) => Err(DeviceError::Other(e.to_string())),
    }
}
