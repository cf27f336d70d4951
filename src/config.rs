// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! Configuration management for the FDE state manager.
//!
//! This module defines the fixed names used on disk and in the persisted
//! state, and the runtime configuration describing where the system's
//! partitions are mounted.

use crate::fde::model::{HashAlgorithm, KeyslotRole};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Key of the FDE record in the generic state store.
pub const FDE_STATE_KEY: &str = "fde";

/// ID of the single primary key created at initialization.
pub const PRIMARY_KEY_ID: u32 = 0;

/// Container role used when no role-specific parameters were recorded.
pub const ALL_CONTAINERS: &str = "all";

/// Keyslot holding the run-mode sealed key.
pub const DEFAULT_KEYSLOT: &str = "default";

/// Keyslot holding the recovery (fallback) sealed key.
pub const FALLBACK_KEYSLOT: &str = "default-fallback";

/// Sealed key file for the data partition, relative to the FDE key directory.
pub const DATA_SEALED_KEY_NAME: &str = "ubuntu-data.sealed-key";

/// Fallback sealed key file for the data partition.
pub const FALLBACK_DATA_SEALED_KEY_NAME: &str = "ubuntu-data.recovery.sealed-key";

/// Directory holding stable device symlinks by filesystem UUID.
pub const DISK_BY_UUID_DIR: &str = "/dev/disk/by-uuid";

/// Prefix of primary key descriptions in the kernel user keyring.
pub const KEYRING_PREFIX: &str = "ubuntu-fde";

/// Default location of the process state file, relative to the root dir.
pub const DEFAULT_STATE_FILE: &str = "var/lib/tesseract-fde/state.json";

/// Daemon socket, relative to the root dir.
pub const DEFAULT_SOCKET: &str = "run/tesseract-fde.sock";

/// Interval at which the daemon calls `ensure` on the manager.
pub const ENSURE_INTERVAL: Duration = Duration::from_secs(5 * 60);

const SAVE_DIR: &str = "var/lib/snapd/save";
const MODEENV_FILE: &str = "var/lib/snapd/modeenv";
const FDE_KEY_DIR: &str = "device/fde";

/// Partition a keyslot lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Volume {
    /// The data partition (reference volume for the primary key)
    Data,
    /// The save partition
    Save,
}

/// Sealed key file associated with a keyslot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SealedKeyFile {
    Data,
    FallbackData,
}

/// Where the PCR policy counter of a keyslot role is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyslotSource {
    pub volume: Volume,
    pub keyslot: String,
    pub key_file: SealedKeyFile,
}

/// Mapping from keyslot role to the keyslot backing it.
///
/// The default matches the conventional partition layout: run keys in the
/// `default` keyslot of the data partition, the recovery key in the
/// `default-fallback` keyslot of the save partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyslotLayout {
    entries: BTreeMap<KeyslotRole, KeyslotSource>,
}

impl KeyslotLayout {
    /// Creates an empty layout.
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Sets the keyslot backing `role`.
    pub fn with(mut self, role: KeyslotRole, source: KeyslotSource) -> Self {
        self.entries.insert(role, source);
        self
    }

    /// Returns the keyslot backing `role`, if configured.
    pub fn source(&self, role: KeyslotRole) -> Option<&KeyslotSource> {
        self.entries.get(&role)
    }

    /// Iterates over configured roles in a stable order.
    pub fn iter(&self) -> impl Iterator<Item = (KeyslotRole, &KeyslotSource)> {
        self.entries.iter().map(|(role, source)| (*role, source))
    }
}

impl Default for KeyslotLayout {
    fn default() -> Self {
        let run = KeyslotSource {
            volume: Volume::Data,
            keyslot: DEFAULT_KEYSLOT.to_string(),
            key_file: SealedKeyFile::Data,
        };
        Self::empty()
            .with(KeyslotRole::Run, run.clone())
            .with(KeyslotRole::RunRecover, run)
            .with(
                KeyslotRole::Recover,
                KeyslotSource {
                    volume: Volume::Save,
                    keyslot: FALLBACK_KEYSLOT.to_string(),
                    key_file: SealedKeyFile::FallbackData,
                },
            )
    }
}

/// Runtime configuration of the FDE manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Root of the filesystem hierarchy (`/` on a live system)
    pub root_dir: PathBuf,
    /// Whether the system is a classic (non-core) installation
    pub classic: bool,
    /// Whether the process is preseeding an image
    pub preseed: bool,
    /// Role to keyslot mapping used when reading PCR policy counters
    pub layout: KeyslotLayout,
    /// Hash algorithm used for primary key digests
    pub hash_algorithm: HashAlgorithm,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("/"),
            classic: false,
            preseed: false,
            layout: KeyslotLayout::default(),
            hash_algorithm: HashAlgorithm::Sha256,
        }
    }
}

impl ManagerConfig {
    /// Creates a configuration rooted at `root_dir`.
    pub fn new<P: Into<PathBuf>>(root_dir: P) -> Self {
        Self {
            root_dir: root_dir.into(),
            ..Default::default()
        }
    }

    /// Builds a configuration from `TESSERACT_FDE_ROOT`,
    /// `TESSERACT_FDE_CLASSIC` and `TESSERACT_FDE_PRESEED`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(root) = std::env::var("TESSERACT_FDE_ROOT") {
            if !root.is_empty() {
                config.root_dir = PathBuf::from(root);
            }
        }
        config.classic = env_flag("TESSERACT_FDE_CLASSIC");
        config.preseed = env_flag("TESSERACT_FDE_PRESEED");
        config
    }

    /// Mount point of the data partition.
    ///
    /// Classic systems run from the data partition itself; core systems
    /// mount it under `writable`.
    pub fn data_mount_point(&self) -> PathBuf {
        if self.classic {
            self.root_dir.clone()
        } else {
            self.root_dir.join("writable")
        }
    }

    /// Mount point of the save partition.
    pub fn save_dir(&self) -> PathBuf {
        self.root_dir.join(SAVE_DIR)
    }

    pub fn modeenv_path(&self) -> PathBuf {
        self.root_dir.join(MODEENV_FILE)
    }

    pub fn default_state_file(&self) -> PathBuf {
        self.root_dir.join(DEFAULT_STATE_FILE)
    }

    pub fn socket_path(&self) -> PathBuf {
        self.root_dir.join(DEFAULT_SOCKET)
    }

    /// Path of a sealed key file stored on the save partition.
    pub fn sealed_key_path(&self, kind: SealedKeyFile) -> PathBuf {
        sealed_key_under(&self.save_dir(), kind)
    }
}

/// Path of the sealed key file `kind` below `save_dir`.
pub fn sealed_key_under(save_dir: &Path, kind: SealedKeyFile) -> PathBuf {
    let name = match kind {
        SealedKeyFile::Data => DATA_SEALED_KEY_NAME,
        SealedKeyFile::FallbackData => FALLBACK_DATA_SEALED_KEY_NAME,
    };
    save_dir.join(FDE_KEY_DIR).join(name)
}

/// Stable device path for a filesystem UUID.
pub fn device_path_for_uuid(uuid: &str) -> PathBuf {
    Path::new(DISK_BY_UUID_DIR).join(uuid)
}

fn env_flag(name: &str) -> bool {
    matches!(
        std::env::var(name).as_deref(),
        Ok("1") | Ok("true") | Ok("yes")
    )
}
