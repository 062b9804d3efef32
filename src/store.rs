//! Persisted bot state: allow-list, transport credential, device endpoint and
//! the reference tree, all in one YAML file.
//!
//! Every mutation rewrites the whole file. The rewrite goes to a sibling temp
//! file first and is renamed over the original, so a crash mid-write leaves
//! the previous snapshot intact.

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::serializer::{self, decode, encode, to_text};
use crate::tree::ConfigTree;

/// Whole persisted state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Snapshot {
    /// Caller ids allowed to talk to the bot
    #[serde(default)]
    pub callers: BTreeSet<String>,
    #[serde(default)]
    pub transport_credential: String,
    /// Base URL of the heating controller adapter
    #[serde(default)]
    pub device_endpoint: String,
    #[serde(default)]
    pub reference_tree: Option<ConfigTree>,
}

impl Snapshot {
    pub fn is_allowed(&self, caller: &str) -> bool {
        self.callers.contains(caller)
    }
}

/// Owner of the snapshot file. All read-modify-write cycles hold `lock`, so
/// two callers saving at once are applied one after the other.
pub struct SnapshotStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot, creating a default one on first run.
    pub async fn load(&self) -> Result<Snapshot> {
        let _guard = self.lock.lock().await;
        self.load_locked().await
    }

    pub async fn reference_tree(&self) -> Result<Option<ConfigTree>> {
        Ok(self.load().await?.reference_tree)
    }

    /// Replace the reference tree, keeping every other field.
    pub async fn save_reference_tree(&self, tree: ConfigTree) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut snapshot = self.load_locked().await?;
        let entries = tree.entry_count();
        snapshot.reference_tree = Some(tree);
        self.write_locked(&snapshot).await?;
        info!(path = %self.path.display(), entries, "reference tree saved");
        Ok(())
    }

    /// Read, change and write back the reference tree as one critical section.
    /// Returns `None` without writing when no reference exists yet.
    pub async fn modify_reference_tree<R>(
        &self,
        change: impl FnOnce(&mut ConfigTree) -> R,
    ) -> Result<Option<R>> {
        let _guard = self.lock.lock().await;
        let mut snapshot = self.load_locked().await?;
        let Some(tree) = snapshot.reference_tree.as_mut() else {
            return Ok(None);
        };
        let outcome = change(tree);
        let entries = tree.entry_count();
        self.write_locked(&snapshot).await?;
        info!(path = %self.path.display(), entries, "reference tree saved");
        Ok(Some(outcome))
    }

    /// The reference tree as editable text. An absent reference encodes as an
    /// empty tree.
    pub async fn load_reference_as_text(&self) -> Result<String> {
        let tree = self.reference_tree().await?.unwrap_or_default();
        encode(&tree)
    }

    /// Decode operator text and store it as the new reference. A decode failure
    /// is returned before the file is touched.
    pub async fn save_reference_from_text(&self, text: &str) -> Result<()> {
        let tree = decode(text)?;
        self.save_reference_tree(tree).await
    }

    async fn load_locked(&self) -> Result<Snapshot> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => parse_snapshot(&text),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let snapshot = Snapshot::default();
                self.write_locked(&snapshot).await?;
                info!(path = %self.path.display(), "created default snapshot");
                Ok(snapshot)
            }
            Err(e) => Err(self.unavailable(&e)),
        }
    }

    async fn write_locked(&self, snapshot: &Snapshot) -> Result<()> {
        let text = to_text(snapshot)?;
        let tmp = self.temp_path()?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.unavailable(&e))?;
        }
        tokio::fs::write(&tmp, text)
            .await
            .map_err(|e| self.unavailable(&e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.unavailable(&e))?;

        debug!(path = %self.path.display(), "snapshot written");
        Ok(())
    }

    fn temp_path(&self) -> Result<PathBuf> {
        let name = self
            .path
            .file_name()
            .ok_or_else(|| Error::StoreUnavailable(format!("{} is not a file path", self.path.display())))?;
        let mut tmp: OsString = name.to_os_string();
        tmp.push(".tmp");
        Ok(self.path.with_file_name(tmp))
    }

    fn unavailable(&self, e: &std::io::Error) -> Error {
        Error::StoreUnavailable(format!("{}: {}", self.path.display(), e))
    }
}

fn parse_snapshot(text: &str) -> Result<Snapshot> {
    let snapshot: Snapshot = serde_yaml::from_str(text)?;
    if let Some(tree) = &snapshot.reference_tree {
        serializer::validate(tree)?;
    }
    Ok(snapshot)
}
