//! Saving and loading the population state document.
//!
//! The whole configuration file is rewritten on every save with the current
//! population in `structure.creatures`. Writes go to a temporary file first
//! and the previous state is rotated to a backup name, so a crash mid-write
//! never loses the last good state.

use crate::config::ConfigDocument;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Error type for manipulating the state file.
#[derive(thiserror::Error, Debug)]
pub enum StateFileError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A fully serialized population state, captured under the trainer lock and
/// written to disk after the lock is released.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub path: PathBuf,
    pub document: String,
}

impl Snapshot {
    pub fn write(&self) -> Result<(), io::Error> {
        save(&self.path, &self.document)
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Atomically replace the state file: write a temporary file next to the
/// target, rotate any previous state to a ".bak" name, then move the new
/// file into place.
pub fn save(path: &Path, document: &str) -> Result<(), io::Error> {
    let temp = sibling(path, ".tmp");
    let backup = sibling(path, ".bak");

    let file = std::fs::File::create(&temp)?;
    let mut buf = io::BufWriter::new(file);
    buf.write_all(document.as_bytes())?;
    let file = buf.into_inner()?; // flush the buffer
    file.sync_all()?; // push to disk

    if path.exists() {
        std::fs::rename(path, &backup)?;
    }
    std::fs::rename(&temp, path)?;
    log::info!("{} bytes written to {}", document.len(), path.display());
    Ok(())
}

/// Load a configuration document, fresh or previously saved.
pub fn load(path: &Path) -> Result<ConfigDocument, StateFileError> {
    let data = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
}
