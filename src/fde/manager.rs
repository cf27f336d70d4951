// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! The FDE manager.
//!
//! One [`FdeManager`] is constructed per process, bound to the process
//! [`State`]. [`FdeManager::start_up`] builds the FDE record the first time
//! the process runs on an encrypted system; every other entry point checks
//! [`FdeManager::is_functional`] before touching state or devices.
//!
//! Entry points that read or write the record take the state lock as an
//! argument, so callers decide how long it is held.

use crate::config::{ManagerConfig, FDE_STATE_KEY};
use crate::error::{FdeError, InitError, Result};
use crate::fde::device::{MountResolver, PcrHandleReader, PrimaryKeyDigests};
use crate::fde::initializer;
use crate::fde::keyring::{KernelKeyring, KeyringDigests};
use crate::fde::luks2::Luks2TokenReader;
use crate::fde::model::{FdeState, KeyTrust, KeyslotRole, ModelForSealing, SealingParameters};
use crate::fde::modeenv::Modeenv;
use crate::fde::parameters;
use crate::fde::reseal::{BootChainParams, ResealBackend, ResealContext, SealingMethod};
use crate::fde::sysfs::SysfsMountResolver;
use crate::state::{State, StateLock, Unlocker};
use std::path::Path;
use std::sync::OnceLock;

/// Hooks driven by the process main loop.
pub trait StateManager: Send + Sync {
    /// Called once after construction, before the first `ensure`.
    fn start_up(&self) -> Result<()>;

    /// Called periodically by the main loop.
    fn ensure(&self) -> Result<()>;
}

/// External services the manager depends on.
pub struct Collaborators {
    pub mount_resolver: Box<dyn MountResolver>,
    pub digests: Box<dyn PrimaryKeyDigests>,
    pub pcr_reader: Box<dyn PcrHandleReader>,
    pub reseal_backend: Option<Box<dyn ResealBackend>>,
}

impl Collaborators {
    /// Collaborators reading the live system. No reseal backend is
    /// registered; add one with [`Collaborators::with_reseal_backend`].
    pub fn system() -> Self {
        Self {
            mount_resolver: Box::new(SysfsMountResolver::default()),
            digests: Box::new(KeyringDigests::new(KernelKeyring::default())),
            pcr_reader: Box::new(Luks2TokenReader::new()),
            reseal_backend: None,
        }
    }

    pub fn with_reseal_backend(mut self, backend: Box<dyn ResealBackend>) -> Self {
        self.reseal_backend = Some(backend);
        self
    }
}

/// Tracks the primary keys and keyslot roles of the system and coordinates
/// resealing.
pub struct FdeManager {
    state: State,
    collaborators: Collaborators,
    config: ManagerConfig,
    /// Set once `start_up` ran; holds the failure if initialization failed.
    init: OnceLock<Option<InitError>>,
}

impl FdeManager {
    pub fn new(state: &State, collaborators: Collaborators, config: ManagerConfig) -> Self {
        Self {
            state: state.clone(),
            collaborators,
            config,
            init: OnceLock::new(),
        }
    }

    /// Returns the state this manager is bound to.
    pub fn state(&self) -> &State {
        &self.state
    }

    /// Reports why the manager cannot be used, if it cannot.
    ///
    /// # Errors
    ///
    /// [`FdeError::Preseeding`] while building an image, or
    /// [`FdeError::Init`] carrying the cached initialization failure.
    pub fn is_functional(&self) -> Result<()> {
        if self.config.preseed {
            return Err(FdeError::Preseeding);
        }
        match self.init.get().and_then(Option::as_ref) {
            Some(err) => Err(FdeError::Init(err.clone())),
            None => Ok(()),
        }
    }

    /// Whether the save partition was found to share the data partition's
    /// primary key when the record was created.
    ///
    /// Read from the persisted record, so the outcome of the first boot is
    /// still reported after a restart.
    pub fn key_trust(&self, lock: &StateLock<'_>) -> Result<KeyTrust> {
        self.is_functional()?;
        Ok(parameters::load(lock)?
            .map(|state| state.save_key_trust)
            .unwrap_or_default())
    }

    /// Returns the persisted FDE record, or `None` if there is none.
    pub fn fde_state(&self, lock: &StateLock<'_>) -> Result<Option<FdeState>> {
        self.is_functional()?;
        parameters::load(lock)
    }

    /// Inserts or replaces the sealing parameters of `(role, container_role)`.
    pub fn update_parameters(
        &self,
        lock: &mut StateLock<'_>,
        role: KeyslotRole,
        container_role: &str,
        boot_modes: Vec<String>,
        models: &[&dyn ModelForSealing],
        tpm2_pcr_profile: Vec<u8>,
    ) -> Result<()> {
        self.is_functional()?;
        let params = SealingParameters::new(boot_modes, models, tpm2_pcr_profile);
        parameters::update(lock, role, container_role, params)
    }

    /// Returns the sealing parameters of `(role, container_role)`, falling
    /// back to the `"all"` container role. A miss is `Ok(None)`.
    pub fn get_parameters(
        &self,
        lock: &StateLock<'_>,
        role: KeyslotRole,
        container_role: &str,
    ) -> Result<Option<SealingParameters>> {
        self.is_functional()?;
        parameters::get(lock, role, container_role)
    }

    /// Reseals keys for new boot chains through the registered backend.
    ///
    /// The backend may release the state lock once through the context it
    /// receives. Parameters it records are persisted only if it succeeds.
    pub fn reseal<'s>(
        &self,
        unlocker: &mut dyn Unlocker<'s>,
        method: SealingMethod,
        root_dir: &Path,
        params: &BootChainParams,
        expect_reseal: bool,
    ) -> Result<()> {
        self.is_functional()?;
        let backend = self.reseal_backend()?;

        let mut ctx = ResealContext::new(unlocker);
        backend.reseal_key_for_boot_chains(&mut ctx, method, root_dir, params, expect_reseal)?;
        let updated = ctx.commit()?;
        log::info!("resealed keys with {} ({} parameter sets updated)", method, updated);
        Ok(())
    }

    /// Reseals keys ahead of an EFI signature database update.
    pub fn reseal_for_signature_db_update<'s>(
        &self,
        unlocker: &mut dyn Unlocker<'s>,
        method: SealingMethod,
        root_dir: &Path,
        params: &BootChainParams,
        update: &[u8],
    ) -> Result<()> {
        self.is_functional()?;
        let backend = self.reseal_backend()?;

        let mut ctx = ResealContext::new(unlocker);
        backend.reseal_keys_for_signature_db_update(&mut ctx, method, root_dir, params, update)?;
        let updated = ctx.commit()?;
        log::info!(
            "resealed keys for signature database update ({} parameter sets updated)",
            updated
        );
        Ok(())
    }

    fn reseal_backend(&self) -> Result<&dyn ResealBackend> {
        self.collaborators
            .reseal_backend
            .as_deref()
            .ok_or(FdeError::NoResealBackend)
    }

    fn initialize(&self) -> Option<InitError> {
        let mut lock = self.state.lock();
        match self.initialize_locked(&mut lock) {
            Ok(()) => None,
            Err(err) => {
                log::error!("cannot initialize FDE state: {}", err);
                Some(err)
            }
        }
    }

    fn initialize_locked(&self, lock: &mut StateLock<'_>) -> std::result::Result<(), InitError> {
        let existing = lock
            .contains(FDE_STATE_KEY)
            .map_err(|e| InitError::new(e.to_string()))?;
        if existing {
            log::debug!("FDE state already initialized");
            return Ok(());
        }

        let modeenv = Modeenv::read(&self.config.modeenv_path())
            .map_err(|e| InitError::new(e.to_string()))?;
        let Some(modeenv) = modeenv else {
            log::debug!("no modeenv, FDE state is not tracked on this system");
            return Ok(());
        };
        if !modeenv.mode.initializes_fde_state() {
            log::debug!("not initializing FDE state in {} mode", modeenv.mode);
            return Ok(());
        }

        let state = initializer::initialize(&self.config, &self.collaborators, modeenv.mode)?;
        parameters::store(lock, &state).map_err(|e| InitError::new(e.to_string()))?;
        log::info!(
            "initialized FDE state with {} primary key(s) and {} keyslot role(s)",
            state.primary_keys.len(),
            state.keyslot_roles.len()
        );
        Ok(())
    }
}

impl StateManager for FdeManager {
    /// Initializes the FDE record if needed.
    ///
    /// Initialization failures do not fail start-up; they are cached and
    /// reported by [`FdeManager::is_functional`].
    fn start_up(&self) -> Result<()> {
        if self.config.preseed {
            log::info!("preseeding, FDE manager is not functional");
            return Ok(());
        }
        self.init.get_or_init(|| self.initialize());
        Ok(())
    }

    fn ensure(&self) -> Result<()> {
        if self.is_functional().is_err() {
            return Ok(());
        }
        let lock = self.state.lock();
        match parameters::load(&lock) {
            Ok(Some(state)) => {
                if let Err(e) = state.validate() {
                    log::warn!("{}", e);
                }
            }
            Ok(None) => {}
            Err(e) => log::warn!("cannot read FDE state: {}", e),
        }
        Ok(())
    }
}
