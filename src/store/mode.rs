use anyhow::Result;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::JsonFile;
use crate::domain::SystemMode;

#[derive(Debug, Serialize, Deserialize)]
struct PersistedMode {
    mode: SystemMode,
}

/// Current system mode. Starts from the persisted value, AUTOMATIC otherwise.
#[derive(Debug)]
pub struct ModeStore {
    mode: RwLock<SystemMode>,
    file: JsonFile,
}

impl ModeStore {
    pub fn open(file: JsonFile) -> Self {
        let mode = file
            .load::<PersistedMode>()
            .map(|p| p.mode)
            .unwrap_or_default();
        Self {
            mode: RwLock::new(mode),
            file,
        }
    }

    pub fn in_memory(mode: SystemMode) -> Self {
        Self {
            mode: RwLock::new(mode),
            file: JsonFile::memory(),
        }
    }

    pub fn get(&self) -> SystemMode {
        *self.mode.read()
    }

    pub fn set(&self, mode: SystemMode) -> Result<()> {
        *self.mode.write() = mode;
        self.file.save(&PersistedMode { mode })?;
        info!(%mode, "system mode changed");
        Ok(())
    }
}
