// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! Generic process state store.
//!
//! A single lock guards the whole state tree. Callers acquire it with
//! [`State::lock`] and read or write JSON records through the returned
//! [`StateLock`]. Modified state is checkpointed to the backing file when the
//! lock is released.
//!
//! The lock can be temporarily given up through the [`Unlocker`] trait. The
//! [`ReacquireToken`] returned by [`release`] is the only way back to the
//! locked state, and it relocks on drop if it was not consumed explicitly.

use crate::error::{FdeError, Result};
use crate::storage::{read_file, write_file_atomic};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateData {
    #[serde(default)]
    data: BTreeMap<String, serde_json::Value>,
    #[serde(skip)]
    dirty: bool,
}

#[derive(Debug)]
struct Inner {
    data: Mutex<StateData>,
    backing: Option<PathBuf>,
}

/// Handle to the process state. Cheap to clone; clones share the same lock.
#[derive(Debug, Clone)]
pub struct State {
    inner: Arc<Inner>,
}

impl State {
    /// Creates a state that is never written to disk.
    pub fn in_memory() -> Self {
        Self::with_data(StateData::default(), None)
    }

    /// Opens the state backed by `path`, loading it if the file exists.
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        let data = if path.exists() {
            let bytes = read_file(&path)?;
            let data: StateData = serde_json::from_slice(&bytes)?;
            log::debug!("loaded {} state entries from {}", data.data.len(), path.display());
            data
        } else {
            StateData::default()
        };
        Ok(Self::with_data(data, Some(path)))
    }

    fn with_data(data: StateData, backing: Option<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Inner {
                data: Mutex::new(data),
                backing,
            }),
        }
    }

    /// Acquires the state lock, blocking until it is available.
    pub fn lock(&self) -> StateLock<'_> {
        StateLock {
            state: self,
            guard: Some(self.acquire()),
        }
    }

    /// Path of the backing file, if any.
    pub fn backing_path(&self) -> Option<&Path> {
        self.inner.backing.as_deref()
    }

    fn acquire(&self) -> MutexGuard<'_, StateData> {
        // A panic while holding the lock leaves the tree as it was last set;
        // records are replaced wholesale so there is no torn value to recover.
        self.inner
            .data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Proof that the state lock is held.
///
/// Dropping the lock checkpoints modified state to the backing file.
pub struct StateLock<'s> {
    state: &'s State,
    guard: Option<MutexGuard<'s, StateData>>,
}

impl<'s> StateLock<'s> {
    /// Returns the record stored under `key`, or `None` if there is none.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let data = self.data()?;
        match data.data.get(key) {
            Some(value) => Ok(Some(T::deserialize(value)?)),
            None => Ok(None),
        }
    }

    /// Returns whether a record is stored under `key`.
    pub fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.data()?.data.contains_key(key))
    }

    /// Stores `value` under `key`, replacing any previous record.
    pub fn set<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        let data = self.data_mut()?;
        data.data.insert(key.to_string(), value);
        data.dirty = true;
        Ok(())
    }

    /// Returns whether this handle currently holds the lock.
    pub fn is_locked(&self) -> bool {
        self.guard.is_some()
    }

    /// Writes modified state to the backing file.
    pub fn checkpoint(&mut self) -> Result<()> {
        let backing = self.state.backing_path().map(Path::to_path_buf);
        let data = self.data_mut()?;
        if !data.dirty {
            return Ok(());
        }
        if let Some(path) = backing {
            let bytes = serde_json::to_vec(&*data)?;
            write_file_atomic(&path, &bytes)?;
            log::debug!("checkpointed state to {}", path.display());
        }
        data.dirty = false;
        Ok(())
    }

    fn data(&self) -> Result<&StateData> {
        self.guard.as_deref().ok_or(FdeError::NotLocked)
    }

    fn data_mut(&mut self) -> Result<&mut StateData> {
        self.guard.as_deref_mut().ok_or(FdeError::NotLocked)
    }

    fn checkpoint_or_log(&mut self) {
        if self.guard.is_some() {
            if let Err(e) = self.checkpoint() {
                log::error!("cannot checkpoint state: {}", e);
            }
        }
    }
}

impl Drop for StateLock<'_> {
    fn drop(&mut self) {
        self.checkpoint_or_log();
    }
}

/// Capability to temporarily give up the state lock.
///
/// Implemented by [`StateLock`]; wrappers may implement it to observe the
/// release/reacquire pairs. Callers go through [`release`] rather than
/// calling `release` directly, so that every release is paired with a
/// reacquire.
pub trait Unlocker<'s> {
    /// The lock handle being managed.
    fn state_lock(&mut self) -> &mut StateLock<'s>;

    /// Releases the lock. Must only be called when it is held.
    fn release(&mut self);

    /// Takes the lock back after [`Unlocker::release`].
    fn reacquire(&mut self);
}

impl<'s> Unlocker<'s> for StateLock<'s> {
    fn state_lock(&mut self) -> &mut StateLock<'s> {
        self
    }

    fn release(&mut self) {
        self.checkpoint_or_log();
        self.guard = None;
    }

    fn reacquire(&mut self) {
        if self.guard.is_none() {
            self.guard = Some(self.state.acquire());
        }
    }
}

/// Releases the lock held by `unlocker`, returning the token that takes it
/// back.
pub fn release<'a, 's>(unlocker: &'a mut dyn Unlocker<'s>) -> ReacquireToken<'a, 's> {
    unlocker.release();
    ReacquireToken {
        unlocker: Some(unlocker),
    }
}

/// Token for a released state lock.
///
/// Holding the token keeps the unlocker mutably borrowed, so the locked state
/// cannot be reached until [`ReacquireToken::reacquire`] is called.
#[must_use = "the state lock stays released until the token is reacquired"]
pub struct ReacquireToken<'a, 's> {
    unlocker: Option<&'a mut dyn Unlocker<'s>>,
}

impl ReacquireToken<'_, '_> {
    /// Takes the state lock back.
    pub fn reacquire(mut self) {
        if let Some(unlocker) = self.unlocker.take() {
            unlocker.reacquire();
        }
    }
}

impl Drop for ReacquireToken<'_, '_> {
    fn drop(&mut self) {
        if let Some(unlocker) = self.unlocker.take() {
            log::warn!("state lock token dropped without reacquiring, relocking");
            unlocker.reacquire();
        }
    }
}
