use anyhow::Result;
use parking_lot::RwLock;

use super::JsonFile;
use crate::domain::ScheduleConfig;

/// Seasonal time windows: factory defaults plus operator overrides.
///
/// Only the overrides are persisted; the effective schedule is recomputed
/// from both on every read.
#[derive(Debug)]
pub struct ScheduleStore {
    defaults: ScheduleConfig,
    overrides: RwLock<ScheduleConfig>,
    file: JsonFile,
}

impl ScheduleStore {
    pub fn open(defaults: ScheduleConfig, file: JsonFile) -> Self {
        let overrides = file.load::<ScheduleConfig>().unwrap_or_default();
        Self {
            defaults,
            overrides: RwLock::new(overrides),
            file,
        }
    }

    pub fn in_memory(defaults: ScheduleConfig) -> Self {
        Self::open(defaults, JsonFile::memory())
    }

    /// Defaults with every override applied on top.
    pub fn effective(&self) -> ScheduleConfig {
        let mut effective = self.defaults.clone();
        effective.overlay(&self.overrides.read());
        effective
    }

    pub fn overrides(&self) -> ScheduleConfig {
        self.overrides.read().clone()
    }

    /// Merge `patch` into the overrides, one (device, season) window at a time.
    pub fn update(&self, patch: &ScheduleConfig) -> Result<()> {
        let snapshot = {
            let mut overrides = self.overrides.write();
            overrides.overlay(patch);
            overrides.clone()
        };
        self.file.save(&snapshot)
    }

    pub fn reset_to_default(&self) -> Result<()> {
        *self.overrides.write() = ScheduleConfig::default();
        self.file.remove()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Device, ScheduleWindow, Season};

    #[test]
    fn test_override_wins_and_reset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schedule.json");
        let store = ScheduleStore::open(ScheduleConfig::factory_default(), JsonFile::at(&path));

        let mut patch = ScheduleConfig::default();
        patch.set(Device::Boiler, Season::Summer, ScheduleWindow::new("09:00", "09:00"));
        store.update(&patch).unwrap();

        let effective = store.effective();
        assert_eq!(
            effective.window(Device::Boiler, Season::Summer),
            Some(&ScheduleWindow::new("09:00", "09:00"))
        );
        assert_eq!(
            effective.window(Device::Wallbox, Season::Winter),
            ScheduleConfig::factory_default().window(Device::Wallbox, Season::Winter)
        );

        let reopened = ScheduleStore::open(ScheduleConfig::factory_default(), JsonFile::at(&path));
        assert_eq!(reopened.overrides(), patch);

        reopened.reset_to_default().unwrap();
        assert!(reopened.overrides().is_empty());
        assert_eq!(reopened.effective(), ScheduleConfig::factory_default());
    }
}
