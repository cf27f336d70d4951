// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! Tesseract FDE - full-disk-encryption state manager
//!
//! This library tracks which primary keys protect the encrypted volumes of a
//! system, which keyslot roles depend on them, and coordinates resealing of
//! those keys when the boot-integrity policy changes.
//!
//! # Features
//!
//! - **No secrets at rest**: primary keys are tracked by salted digest only
//! - **Boot-mode aware**: run, recover and factory-reset systems initialize
//!   with whatever volumes legitimately exist
//! - **Lock-aware resealing**: backends may release the state lock during
//!   slow policy computation through a token that must be reacquired
//! - **Atomic persistence**: state is checkpointed with write-then-rename
//!
//! # Example
//!
//! ```no_run
//! use tesseract_fde::{Collaborators, FdeManager, KeyslotRole, ManagerConfig, State, StateManager};
//!
//! let state = State::open("/var/lib/tesseract-fde/state.json").unwrap();
//! let manager = FdeManager::new(&state, Collaborators::system(), ManagerConfig::default());
//! manager.start_up().unwrap();
//! manager.is_functional().unwrap();
//!
//! let lock = state.lock();
//! let params = manager.get_parameters(&lock, KeyslotRole::Run, "all").unwrap();
//! println!("{:?}", params);
//! ```

pub mod config;
#[cfg(unix)]
pub mod daemon;
pub mod error;
pub mod fde;
pub mod state;
pub mod storage;

pub use config::{KeyslotLayout, KeyslotSource, ManagerConfig, SealedKeyFile, Volume};
pub use error::{FdeError, InitError, Result};
pub use fde::{
    BootChainParams, BootMode, Collaborators, FdeManager, FdeState, KeyTrust, KeyslotRole,
    ModelForSealing, Modeenv, ResealBackend, ResealContext, SealingMethod, SealingParameters,
    StateManager,
};
pub use state::{ReacquireToken, State, StateLock, Unlocker};
