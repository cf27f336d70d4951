// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! Per-role sealing parameter storage.

use crate::config::FDE_STATE_KEY;
use crate::error::{FdeError, Result};
use crate::fde::model::{FdeState, KeyslotRole, SealingParameters};
use crate::state::StateLock;

/// Reads the FDE record, if one was stored.
pub(crate) fn load(lock: &StateLock<'_>) -> Result<Option<FdeState>> {
    lock.get(FDE_STATE_KEY)
}

/// Reads the FDE record, failing if it was never initialized.
pub(crate) fn load_initialized(lock: &StateLock<'_>) -> Result<FdeState> {
    load(lock)?.ok_or(FdeError::NotInitialized)
}

/// Replaces the FDE record.
pub(crate) fn store(lock: &mut StateLock<'_>, state: &FdeState) -> Result<()> {
    state.validate()?;
    lock.set(FDE_STATE_KEY, state)
}

/// Inserts or replaces the parameters of `(role, container_role)`.
pub(crate) fn update(
    lock: &mut StateLock<'_>,
    role: KeyslotRole,
    container_role: &str,
    parameters: SealingParameters,
) -> Result<()> {
    update_all(lock, [(role, container_role.to_string(), parameters)]).map(|_| ())
}

/// Applies every update or none of them. Returns how many were applied.
pub(crate) fn update_all<I>(lock: &mut StateLock<'_>, updates: I) -> Result<usize>
where
    I: IntoIterator<Item = (KeyslotRole, String, SealingParameters)>,
{
    let mut state = load_initialized(lock)?;
    let mut count = 0;
    for (role, container_role, parameters) in updates {
        let role_state = state
            .role_mut(role)
            .ok_or_else(|| FdeError::UnknownKeyslotRole(role.to_string()))?;
        log::debug!("updating sealing parameters of {}/{}", role, container_role);
        role_state.parameters.insert(container_role, parameters);
        count += 1;
    }
    store(lock, &state)?;
    Ok(count)
}

/// Looks up the parameters of `(role, container_role)`, falling back to the
/// `"all"` container role. A miss is `Ok(None)`.
pub(crate) fn get(
    lock: &StateLock<'_>,
    role: KeyslotRole,
    container_role: &str,
) -> Result<Option<SealingParameters>> {
    let state = load_initialized(lock)?;
    let role_state = state
        .role(role)
        .ok_or_else(|| FdeError::UnknownKeyslotRole(role.to_string()))?;
    Ok(role_state.parameters_for(container_role).cloned())
}
