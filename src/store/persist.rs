use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Optional JSON file backing a store. `None` keeps the store memory-only.
#[derive(Debug, Clone, Default)]
pub struct JsonFile {
    path: Option<PathBuf>,
}

impl JsonFile {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    pub fn memory() -> Self {
        Self { path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Read the persisted value.
    ///
    /// A missing file is `None`; an unreadable or malformed one is logged and
    /// also treated as `None` so the caller falls back to its defaults.
    pub fn load<T: DeserializeOwned>(&self) -> Option<T> {
        let path = self.path.as_ref()?;
        if !path.exists() {
            return None;
        }
        match std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))
            .and_then(|raw| {
                serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
            }) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(error = %format!("{e:#}"), "ignoring persisted state, using defaults");
                None
            }
        }
    }

    /// Write atomically: temp file in the same directory, then rename.
    pub fn save<T: Serialize>(&self, value: &T) -> Result<()> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_string_pretty(value)?;
        std::fs::write(&tmp, body).with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
        Ok(())
    }

    pub fn remove(&self) -> Result<()> {
        if let Some(path) = self.path.as_ref() {
            if path.exists() {
                std::fs::remove_file(path)
                    .with_context(|| format!("removing {}", path.display()))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_round_trip_and_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let file = JsonFile::at(dir.path().join("nested/state.json"));
        assert_eq!(file.load::<BTreeMap<String, u32>>(), None);

        let mut value = BTreeMap::new();
        value.insert("a".to_string(), 1u32);
        file.save(&value).unwrap();
        assert_eq!(file.load::<BTreeMap<String, u32>>(), Some(value));

        std::fs::write(file.path().unwrap(), "{not json").unwrap();
        assert_eq!(file.load::<BTreeMap<String, u32>>(), None);

        file.remove().unwrap();
        assert!(!file.path().unwrap().exists());
    }

    #[test]
    fn test_memory_file_is_noop() {
        let file = JsonFile::memory();
        file.save(&1u32).unwrap();
        assert_eq!(file.load::<u32>(), None);
    }
}
