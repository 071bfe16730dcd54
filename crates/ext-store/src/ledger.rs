//! Persistent record of soft-deleted extension versions.
//!
//! The ledger is a small TOML document next to the installed extensions.
//! Reads take a shared lock; updates rewrite the file atomically.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use ext_fs::io;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// File name of the ledger inside the extensions directory.
pub const LEDGER_FILENAME: &str = ".uninstalled.toml";

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerDocument {
    #[serde(default)]
    keys: BTreeSet<String>,
}

/// Keys (`<id>-<version>`) of versions hidden from scans but still on disk.
#[derive(Debug)]
pub struct UninstalledLedger {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    update: Mutex<()>,
}

impl UninstalledLedger {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(LEDGER_FILENAME),
            update: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current keys. A missing ledger is empty.
    pub fn keys(&self) -> Result<BTreeSet<String>> {
        Ok(self.load()?.keys)
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.keys()?.contains(key))
    }

    pub fn insert<I>(&self, keys: I) -> Result<()>
    where
        I: IntoIterator<Item = String>,
    {
        self.modify(|document| document.keys.extend(keys))
    }

    /// Drop `key`. Returns whether it was present.
    pub fn remove(&self, key: &str) -> Result<bool> {
        let mut removed = false;
        self.modify(|document| removed = document.keys.remove(key))?;
        Ok(removed)
    }

    fn load(&self) -> Result<LedgerDocument> {
        match io::read_text_locked(&self.path)? {
            Some(content) => toml::from_str(&content).map_err(|e| Error::Parse {
                path: self.path.clone(),
                message: e.to_string(),
            }),
            None => Ok(LedgerDocument::default()),
        }
    }

    fn modify(&self, change: impl FnOnce(&mut LedgerDocument)) -> Result<()> {
        let _guard = self.update.lock().unwrap_or_else(PoisonError::into_inner);
        let mut document = self.load()?;
        change(&mut document);
        let content = toml::to_string_pretty(&document).map_err(|e| Error::Parse {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        io::write_text(&self.path, &content)?;
        Ok(())
    }
}
