// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! File I/O for persisted state.
//!
//! State files are small JSON documents that must never be left half
//! written: a crash during a checkpoint would otherwise lose the FDE record.

use crate::error::{FdeError, Result};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tempfile::Builder;

/// Upper bound for files read through [`read_file`] (16 MB).
const MAX_FILE_SIZE: u64 = 16 * 1024 * 1024;

/// Reads the entire contents of a file into a vector.
///
/// # Errors
///
/// Returns an error if the file cannot be opened, read, or exceeds
/// `MAX_FILE_SIZE`.
pub fn read_file(path: &Path) -> Result<Vec<u8>> {
    let file = File::open(path)?;

    let metadata = file.metadata()?;
    if metadata.len() > MAX_FILE_SIZE {
        return Err(FdeError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!(
                "file {} is {} bytes, larger than the {} bytes allowed",
                path.display(),
                metadata.len(),
                MAX_FILE_SIZE
            ),
        )));
    }

    let mut data = Vec::new();
    file.take(MAX_FILE_SIZE).read_to_end(&mut data)?;
    Ok(data)
}

/// Writes data to a file atomically using a temporary file.
///
/// The target is either completely replaced or left untouched. Missing
/// parent directories are created.
pub fn write_file_atomic(path: &Path, data: &[u8]) -> Result<()> {
    write_atomically(path, |file| {
        file.write_all(data)?;
        file.sync_all()
    })
}

/// Performs an atomic file write operation using a closure.
///
/// Creates a temporary file in the same directory as the target, calls
/// `write_fn` on it, then renames it over the target path.
pub fn write_atomically<F>(path: &Path, write_fn: F) -> Result<()>
where
    F: FnOnce(&mut File) -> std::result::Result<(), std::io::Error>,
{
    let output_dir = path.parent().ok_or(FdeError::InvalidOutputPath)?;
    std::fs::create_dir_all(output_dir)?;

    let mut temp_file = Builder::new()
        .prefix(".tesseract-fde")
        .suffix(".tmp")
        .tempfile_in(output_dir)?;

    write_fn(temp_file.as_file_mut())?;

    temp_file.persist(path)?;
    Ok(())
}
