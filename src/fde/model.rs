// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! Persisted FDE state.
//!
//! The `"fde"` record tracks primary keys by a salted digest only and, for
//! each keyslot role, the primary key it depends on, its PCR policy
//! revocation counter and the sealing parameters last used per container
//! role.

use crate::config::ALL_CONTAINERS;
use crate::error::FdeError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Hash algorithm used for primary key digests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    /// Digest size in bytes.
    pub fn digest_size(&self) -> usize {
        match self {
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 => 48,
            HashAlgorithm::Sha512 => 64,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha384 => "sha384",
            HashAlgorithm::Sha512 => "sha512",
        };
        f.write_str(name)
    }
}

/// Boot-mode grouping a sealed key must unlock under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyslotRole {
    Run,
    RunRecover,
    Recover,
}

impl KeyslotRole {
    pub const ALL: [KeyslotRole; 3] = [
        KeyslotRole::Run,
        KeyslotRole::RunRecover,
        KeyslotRole::Recover,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyslotRole::Run => "run",
            KeyslotRole::RunRecover => "run+recover",
            KeyslotRole::Recover => "recover",
        }
    }
}

impl fmt::Display for KeyslotRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyslotRole {
    type Err = FdeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "run" => Ok(KeyslotRole::Run),
            "run+recover" => Ok(KeyslotRole::RunRecover),
            "recover" => Ok(KeyslotRole::Recover),
            other => Err(FdeError::InvalidRoleName(other.to_string())),
        }
    }
}

/// Grade of a model assertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelGrade {
    #[default]
    Unset,
    Secured,
    Signed,
    Dangerous,
}

impl ModelGrade {
    fn is_unset(&self) -> bool {
        *self == ModelGrade::Unset
    }
}

/// Identity of a device model a key is sealed for.
///
/// Supplied by the device-identity subsystem; the manager only reads it.
pub trait ModelForSealing {
    fn series(&self) -> &str;
    fn brand_id(&self) -> &str;
    fn model(&self) -> &str;
    fn classic(&self) -> bool;
    fn grade(&self) -> ModelGrade;
    fn sign_key_id(&self) -> &str;
}

/// Persisted snapshot of a [`ModelForSealing`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedModel {
    pub series: String,
    #[serde(rename = "brand-id")]
    pub brand_id: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub classic: bool,
    #[serde(default, skip_serializing_if = "ModelGrade::is_unset")]
    pub grade: ModelGrade,
    #[serde(rename = "sign-key-id")]
    pub sign_key_id: String,
}

impl SealedModel {
    /// Captures the identity fields of `model`.
    pub fn from_model(model: &dyn ModelForSealing) -> Self {
        Self {
            series: model.series().to_string(),
            brand_id: model.brand_id().to_string(),
            model: model.model().to_string(),
            classic: model.classic(),
            grade: model.grade(),
            sign_key_id: model.sign_key_id().to_string(),
        }
    }
}

impl ModelForSealing for SealedModel {
    fn series(&self) -> &str {
        &self.series
    }

    fn brand_id(&self) -> &str {
        &self.brand_id
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn classic(&self) -> bool {
        self.classic
    }

    fn grade(&self) -> ModelGrade {
        self.grade
    }

    fn sign_key_id(&self) -> &str {
        &self.sign_key_id
    }
}

/// Salted one-way fingerprint of a primary key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyDigest {
    pub algorithm: HashAlgorithm,
    #[serde(with = "base64_bytes")]
    pub salt: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub digest: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryKeyState {
    pub digest: KeyDigest,
}

/// Parameters a key was last sealed with.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SealingParameters {
    #[serde(default)]
    pub boot_modes: Vec<String>,
    #[serde(default)]
    pub models: Vec<SealedModel>,
    #[serde(rename = "tpm2PCRProfile", default, with = "base64_bytes")]
    pub tpm2_pcr_profile: Vec<u8>,
}

impl SealingParameters {
    pub fn new(
        boot_modes: Vec<String>,
        models: &[&dyn ModelForSealing],
        tpm2_pcr_profile: Vec<u8>,
    ) -> Self {
        Self {
            boot_modes,
            models: models.iter().map(|m| SealedModel::from_model(*m)).collect(),
            tpm2_pcr_profile,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyslotRoleState {
    #[serde(rename = "primaryKeyID")]
    pub primary_key_id: u32,
    #[serde(rename = "tpm2PCRPolicyRevocationCounter")]
    pub tpm2_pcr_policy_revocation_counter: u32,
    #[serde(default)]
    pub parameters: BTreeMap<String, SealingParameters>,
}

impl KeyslotRoleState {
    pub fn new(primary_key_id: u32, counter: u32) -> Self {
        Self {
            primary_key_id,
            tpm2_pcr_policy_revocation_counter: counter,
            parameters: BTreeMap::new(),
        }
    }

    /// Parameters for `container_role`, falling back to the `"all"` bucket.
    pub fn parameters_for(&self, container_role: &str) -> Option<&SealingParameters> {
        self.parameters
            .get(container_role)
            .or_else(|| self.parameters.get(ALL_CONTAINERS))
    }
}

/// How far the primary key shared by the data and save partitions was
/// confirmed when the record was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyTrust {
    /// No cross-check took place (no FDE, or the save partition is absent).
    #[default]
    Unchecked,
    /// The save partition is protected by the same primary key as data.
    Verified,
    /// The save partition is protected by a different primary key.
    SaveKeyMismatch,
}

impl KeyTrust {
    fn is_unchecked(&self) -> bool {
        *self == KeyTrust::Unchecked
    }
}

/// Root of the persisted FDE record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FdeState {
    #[serde(default)]
    pub primary_keys: BTreeMap<u32, PrimaryKeyState>,
    #[serde(default)]
    pub keyslot_roles: BTreeMap<String, KeyslotRoleState>,
    /// Outcome of checking the save partition against primary key 0.
    #[serde(default, skip_serializing_if = "KeyTrust::is_unchecked")]
    pub save_key_trust: KeyTrust,
}

impl FdeState {
    pub fn role(&self, role: KeyslotRole) -> Option<&KeyslotRoleState> {
        self.keyslot_roles.get(role.as_str())
    }

    pub fn role_mut(&mut self, role: KeyslotRole) -> Option<&mut KeyslotRoleState> {
        self.keyslot_roles.get_mut(role.as_str())
    }

    /// Checks that every role references a known primary key.
    pub fn validate(&self) -> Result<(), FdeError> {
        for (name, role) in &self.keyslot_roles {
            if !self.primary_keys.contains_key(&role.primary_key_id) {
                return Err(FdeError::InvalidState(format!(
                    "keyslot role {} references unknown primary key {}",
                    name, role.primary_key_id
                )));
            }
        }
        Ok(())
    }
}

/// Serializes byte vectors as standard base64 strings.
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
