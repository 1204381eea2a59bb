use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde_json::Value;

use super::JsonFile;
use crate::domain::AutomaticConfig;

/// AUTOMATIC mode settings with deep-merge partial updates.
#[derive(Debug)]
pub struct AutomaticConfigStore {
    defaults: AutomaticConfig,
    config: RwLock<AutomaticConfig>,
    file: JsonFile,
}

impl AutomaticConfigStore {
    pub fn open(defaults: AutomaticConfig, file: JsonFile) -> Self {
        let config = file
            .load::<AutomaticConfig>()
            .filter(|cfg| cfg.validate().is_ok())
            .unwrap_or_else(|| defaults.clone());
        Self {
            defaults,
            config: RwLock::new(config),
            file,
        }
    }

    pub fn in_memory(defaults: AutomaticConfig) -> Self {
        Self::open(defaults, JsonFile::memory())
    }

    pub fn get(&self) -> AutomaticConfig {
        self.config.read().clone()
    }

    /// Apply a partial JSON document.
    ///
    /// Objects merge recursively; any other value present in `patch` replaces
    /// the current one at that path (`null` clears optional fields). The result
    /// must still deserialize and validate, otherwise nothing changes.
    pub fn update(&self, patch: Value) -> Result<AutomaticConfig> {
        let updated = {
            let mut config = self.config.write();
            let mut doc = serde_json::to_value(&*config)?;
            merge_json(&mut doc, patch);
            let candidate: AutomaticConfig =
                serde_json::from_value(doc).context("invalid automatic config update")?;
            candidate
                .validate()
                .context("automatic config update out of range")?;
            *config = candidate.clone();
            candidate
        };
        self.file.save(&updated)?;
        Ok(updated)
    }

    pub fn reset_to_default(&self) -> Result<AutomaticConfig> {
        *self.config.write() = self.defaults.clone();
        self.file.save(&self.defaults)?;
        Ok(self.defaults.clone())
    }
}

/// Recursive JSON merge, `patch` wins on conflicts.
pub fn merge_json(base: &mut Value, patch: Value) {
    match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => {
            for (key, value) in patch {
                match base.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Season;
    use serde_json::json;

    #[test]
    fn test_partial_update_keeps_unrelated_keys() {
        let store = AutomaticConfigStore::in_memory(AutomaticConfig::default());
        let before = store.get();

        store
            .update(json!({"boiler": {"summer": {"target_temp_c": 60.0}}}))
            .unwrap();
        let after = store.get();

        assert_eq!(after.boiler(Season::Summer).target_temp_c, Some(60.0));
        assert_eq!(
            after.boiler(Season::Summer).target_time,
            before.boiler(Season::Summer).target_time
        );
        assert_eq!(
            after.boiler(Season::Summer).min_runtime_min,
            before.boiler(Season::Summer).min_runtime_min
        );
        assert_eq!(after.boiler.winter, before.boiler.winter);
        assert_eq!(after.wallbox, before.wallbox);
    }

    #[test]
    fn test_null_clears_optional_field() {
        let store = AutomaticConfigStore::in_memory(AutomaticConfig::default());
        store
            .update(json!({"wallbox": {"winter": {"target_time": null}}}))
            .unwrap();
        assert_eq!(store.get().wallbox(Season::Winter).target_time, None);
    }

    #[test]
    fn test_invalid_update_is_rejected_atomically() {
        let store = AutomaticConfigStore::in_memory(AutomaticConfig::default());
        let before = store.get();
        assert!(store
            .update(json!({"boiler": {"summer": {"target_temp_c": 500.0}}}))
            .is_err());
        assert!(store
            .update(json!({"boiler": {"summer": {"min_runtime_min": "long"}}}))
            .is_err());
        assert_eq!(store.get(), before);
    }

    #[test]
    fn test_misspelled_keys_are_rejected() {
        let store = AutomaticConfigStore::in_memory(AutomaticConfig::default());
        let before = store.get();
        assert!(store
            .update(json!({"boiler": {"sumer": {"target_temp_c": 60.0}}}))
            .is_err());
        assert!(store
            .update(json!({"wallbox": {"winter": {"energy_kw": 12.0}}}))
            .is_err());
        assert!(store.update(json!({"boilr": {}})).is_err());
        assert_eq!(store.get(), before);
    }

    #[test]
    fn test_reset_and_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("automatic_config.json");
        let store = AutomaticConfigStore::open(AutomaticConfig::default(), JsonFile::at(&path));
        store
            .update(json!({"wallbox": {"summer": {"energy_kwh": 25.0}}}))
            .unwrap();

        let reopened = AutomaticConfigStore::open(AutomaticConfig::default(), JsonFile::at(&path));
        assert_eq!(reopened.get().wallbox(Season::Summer).energy_kwh, 25.0);

        reopened.reset_to_default().unwrap();
        assert_eq!(reopened.get(), AutomaticConfig::default());
    }

    #[test]
    fn test_merge_json_depth() {
        let mut base = json!({"a": {"b": {"c": 1, "d": 2}, "e": 3}});
        merge_json(&mut base, json!({"a": {"b": {"c": 10}}, "f": 4}));
        assert_eq!(base, json!({"a": {"b": {"c": 10, "d": 2}, "e": 3}, "f": 4}));
    }
}
