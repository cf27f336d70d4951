// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! Boot mode environment.
//!
//! The modeenv file records the mode the system was booted into as
//! `key=value` lines. Systems installed before modeenv existed have no such
//! file; they carry no FDE state to track.

use crate::error::{FdeError, Result};
use crate::storage::{read_file, write_file_atomic};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Mode the system was booted into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootMode {
    Run,
    Recover,
    Install,
    FactoryReset,
}

impl BootMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BootMode::Run => "run",
            BootMode::Recover => "recover",
            BootMode::Install => "install",
            BootMode::FactoryReset => "factory-reset",
        }
    }

    /// Whether the data partition may legitimately be absent or unencrypted.
    pub fn tolerates_missing_data(&self) -> bool {
        matches!(self, BootMode::Recover | BootMode::FactoryReset)
    }

    /// Whether FDE state is initialized when booted in this mode.
    ///
    /// Install mode creates the encrypted volumes later on.
    pub fn initializes_fde_state(&self) -> bool {
        !matches!(self, BootMode::Install)
    }
}

impl fmt::Display for BootMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BootMode {
    type Err = FdeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "run" => Ok(BootMode::Run),
            "recover" => Ok(BootMode::Recover),
            "install" => Ok(BootMode::Install),
            "factory-reset" => Ok(BootMode::FactoryReset),
            other => Err(FdeError::Modeenv(format!("unknown boot mode {:?}", other))),
        }
    }
}

/// Parsed modeenv file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modeenv {
    pub mode: BootMode,
    pub recovery_system: Option<String>,
    /// Keys this crate does not interpret, preserved for writing back.
    pub other: BTreeMap<String, String>,
}

impl Modeenv {
    pub fn new(mode: BootMode) -> Self {
        Self {
            mode,
            recovery_system: None,
            other: BTreeMap::new(),
        }
    }

    /// Reads the modeenv at `path`. Returns `None` when the file is absent.
    pub fn read(path: &Path) -> Result<Option<Self>> {
        match read_file(path) {
            Ok(bytes) => {
                let text = String::from_utf8(bytes)
                    .map_err(|_| FdeError::Modeenv("file is not valid UTF-8".to_string()))?;
                text.parse().map(Some)
            }
            Err(FdeError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        write_file_atomic(path, self.to_string().as_bytes())
    }
}

impl FromStr for Modeenv {
    type Err = FdeError;

    fn from_str(text: &str) -> Result<Self> {
        let mut mode = None;
        let mut recovery_system = None;
        let mut other = BTreeMap::new();

        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                FdeError::Modeenv(format!("line {} is not a key=value pair", lineno + 1))
            })?;
            let (key, value) = (key.trim(), value.trim());
            match key {
                "mode" => mode = Some(value.parse::<BootMode>()?),
                "recovery_system" => recovery_system = Some(value.to_string()),
                _ => {
                    other.insert(key.to_string(), value.to_string());
                }
            }
        }

        Ok(Self {
            mode: mode.ok_or_else(|| FdeError::Modeenv("missing mode".to_string()))?,
            recovery_system,
            other,
        })
    }
}

impl fmt::Display for Modeenv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "mode={}", self.mode)?;
        if let Some(system) = &self.recovery_system {
            writeln!(f, "recovery_system={}", system)?;
        }
        for (key, value) in &self.other {
            writeln!(f, "{}={}", key, value)?;
        }
        Ok(())
    }
}
