// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! Reseal orchestration.
//!
//! Resealing recomputes the PCR policy of sealed keys after boot-relevant
//! facts change. The computation is slow, so the backend may give up the
//! state lock for its duration through [`ResealContext::unlock`]. The lock
//! comes back through the returned [`ReacquireToken`], and the mutable
//! borrow it holds on the context keeps the backend from recording results
//! until it has done so.
//!
//! Results recorded with [`ResealContext::update`] are staged and written to
//! the FDE record only once the backend reports success.

use crate::error::{FdeError, Result};
use crate::fde::model::{KeyslotRole, ModelGrade, SealingParameters};
use crate::fde::parameters;
use crate::state::{self, ReacquireToken, StateLock, Unlocker};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// Mechanism protecting the sealed keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SealingMethod {
    LegacyTpm,
    Tpm,
    FdeSetupHook,
}

impl fmt::Display for SealingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SealingMethod::LegacyTpm => "legacy-tpm",
            SealingMethod::Tpm => "tpm",
            SealingMethod::FdeSetupHook => "fde-setup-hook",
        };
        f.write_str(name)
    }
}

/// A boot asset measured during boot, identified by its hashes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BootAsset {
    pub role: String,
    pub name: String,
    #[serde(default)]
    pub hashes: Vec<String>,
}

/// One sequence of boot assets leading to a kernel.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BootChain {
    pub brand_id: String,
    pub model: String,
    #[serde(default)]
    pub classic: bool,
    #[serde(default)]
    pub grade: ModelGrade,
    pub model_sign_key_id: String,
    #[serde(default)]
    pub asset_chain: Vec<BootAsset>,
    pub kernel: String,
    #[serde(default)]
    pub kernel_revision: String,
    #[serde(default)]
    pub kernel_cmdlines: Vec<String>,
}

/// Boot chains a reseal must cover. Interpreted by the backend only.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BootChainParams {
    #[serde(default)]
    pub run_mode_boot_chains: Vec<BootChain>,
    #[serde(default)]
    pub recovery_boot_chains_for_run_key: Vec<BootChain>,
    #[serde(default)]
    pub recovery_boot_chains: Vec<BootChain>,
    /// Bootloader name per boot role
    #[serde(default)]
    pub role_to_bl_name: BTreeMap<String, String>,
}

/// Backend performing the actual key resealing.
pub trait ResealBackend: Send + Sync {
    /// Reseals keys for a new set of boot chains.
    fn reseal_key_for_boot_chains(
        &self,
        ctx: &mut ResealContext<'_, '_>,
        method: SealingMethod,
        root_dir: &Path,
        params: &BootChainParams,
        expect_reseal: bool,
    ) -> Result<()>;

    /// Reseals keys so that they remain valid after a pending update of the
    /// EFI signature database.
    fn reseal_keys_for_signature_db_update(
        &self,
        ctx: &mut ResealContext<'_, '_>,
        method: SealingMethod,
        root_dir: &Path,
        params: &BootChainParams,
        update: &[u8],
    ) -> Result<()>;
}

struct StagedUpdate {
    role: KeyslotRole,
    container_role: String,
    parameters: SealingParameters,
}

/// Capabilities handed to a [`ResealBackend`] for one reseal.
pub struct ResealContext<'u, 's> {
    unlocker: &'u mut dyn Unlocker<'s>,
    unlocked: bool,
    staged: Vec<StagedUpdate>,
}

impl<'u, 's> ResealContext<'u, 's> {
    pub(crate) fn new(unlocker: &'u mut dyn Unlocker<'s>) -> Self {
        Self {
            unlocker,
            unlocked: false,
            staged: Vec::new(),
        }
    }

    /// Releases the state lock for the duration of a slow computation.
    ///
    /// # Errors
    ///
    /// Returns [`FdeError::AlreadyUnlocked`] if called a second time within
    /// the same reseal.
    pub fn unlock(&mut self) -> Result<ReacquireToken<'_, 's>> {
        if self.unlocked {
            return Err(FdeError::AlreadyUnlocked);
        }
        self.unlocked = true;
        Ok(state::release(&mut *self.unlocker))
    }

    /// Records the parameters a key was resealed with.
    pub fn update(
        &mut self,
        role: KeyslotRole,
        container_role: &str,
        parameters: SealingParameters,
    ) -> Result<()> {
        if !self.unlocker.state_lock().is_locked() {
            return Err(FdeError::NotLocked);
        }
        self.staged.push(StagedUpdate {
            role,
            container_role: container_role.to_string(),
            parameters,
        });
        Ok(())
    }

    /// Read access to the locked state, e.g. to look up current parameters.
    pub fn state_lock(&mut self) -> &mut StateLock<'s> {
        self.unlocker.state_lock()
    }

    pub(crate) fn commit(self) -> Result<usize> {
        let lock = self.unlocker.state_lock();
        if !lock.is_locked() {
            self.unlocker.reacquire();
        }
        let updates = self
            .staged
            .into_iter()
            .map(|s| (s.role, s.container_role, s.parameters));
        parameters::update_all(self.unlocker.state_lock(), updates)
    }
}
