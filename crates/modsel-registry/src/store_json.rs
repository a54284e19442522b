use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ModuleId;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read module selection: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse module selection: {0}")]
    Parse(#[from] serde_json::Error),
}

/// User configuration that outlives a selection session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSelection {
    /// Modules the user explicitly activated.
    #[serde(default)]
    pub modules: BTreeSet<ModuleId>,
    /// Module providing the active gameplay; it can never be deactivated.
    #[serde(default)]
    pub gameplay_module: Option<ModuleId>,
    /// Module owning the default world generator.
    #[serde(default)]
    pub default_generator_module: Option<ModuleId>,
    /// Host serving the remote module list.
    #[serde(default)]
    pub master_server: Option<String>,
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct SelectionStore {
    path: PathBuf,
    data: Mutex<ModuleSelection>,
}

impl SelectionStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let data = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            serde_json::from_str(&raw)?
        } else {
            ModuleSelection::default()
        };
        tracing::debug!(path = %path.display(), "opened module selection store");
        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    pub fn default_path() -> Result<PathBuf, StoreError> {
        let mut config_dir = dirs::config_dir().ok_or_else(|| {
            StoreError::Read(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no config directory",
            ))
        })?;
        config_dir.push("Modsel");
        fs::create_dir_all(&config_dir)?;
        config_dir.push("modules.json");
        Ok(config_dir)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn selection(&self) -> ModuleSelection {
        self.data.lock().clone()
    }

    pub fn update(&self, apply: impl FnOnce(&mut ModuleSelection)) -> Result<(), StoreError> {
        let mut data = self.data.lock();
        apply(&mut *data);
        data.saved_at = Some(Utc::now());
        self.persist_locked(&data)
    }

    /// Store the outcome of a selection session: the explicit selection is
    /// replaced, and the default generator is forgotten when its module is no
    /// longer selected.
    pub fn record_session(
        &self,
        modules: BTreeSet<ModuleId>,
        generator_still_selected: bool,
    ) -> Result<(), StoreError> {
        self.update(|selection| {
            selection.modules = modules;
            if !generator_still_selected {
                selection.default_generator_module = None;
            }
        })
    }

    fn persist_locked(&self, data: &ModuleSelection) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, json)?;
        tracing::info!(
            path = %self.path.display(),
            modules = data.modules.len(),
            "saved module selection"
        );
        Ok(())
    }
}
