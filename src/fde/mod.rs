// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! Full-disk-encryption state tracking.
//!
//! - [`model`]: the persisted `"fde"` record
//! - [`device`]: collaborator traits for mounts, key digests and PCR handles,
//!   with production implementations in [`sysfs`], [`keyring`] and [`luks2`]
//! - [`manager`]: the [`FdeManager`] tying them together
//! - [`reseal`]: the reseal backend contract

pub mod device;
mod initializer;
pub mod keyring;
pub mod luks2;
pub mod manager;
pub mod model;
pub mod modeenv;
mod parameters;
pub mod reseal;
pub mod sysfs;

pub use device::{DeviceError, MountResolver, PcrHandleReader, PrimaryKeyDigests};
pub use manager::{Collaborators, FdeManager, StateManager};
pub use model::{
    FdeState, HashAlgorithm, KeyDigest, KeyTrust, KeyslotRole, KeyslotRoleState,
    ModelForSealing, ModelGrade, PrimaryKeyState, SealedModel, SealingParameters,
};
pub use modeenv::{BootMode, Modeenv};
pub use reseal::{BootChain, BootChainParams, ResealBackend, ResealContext, SealingMethod};
