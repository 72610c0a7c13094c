use std::sync::Arc;

use opencode2go_core::PartFilter;
use opencode2go_local_store::{KeyValueStore, load_or_warn, persist_or_warn, remove_or_warn};
use opencode2go_runtime_config::{AVAILABLE_FONTS, AppSettings, FONT_SIZES, SETTINGS_KEY, normalize_settings};

/// Appearance and part-filter preferences, saved on every change.
pub struct SettingsStore {
    store: Arc<dyn KeyValueStore>,
    settings: AppSettings,
}

impl SettingsStore {
    /// Stored values merged over defaults. Out-of-range values are repaired
    /// and written back.
    pub fn load(store: Arc<dyn KeyValueStore>) -> Self {
        let mut settings: AppSettings =
            load_or_warn(store.as_ref(), SETTINGS_KEY).unwrap_or_default();
        let repaired = normalize_settings(&mut settings);
        let this = Self { store, settings };
        if repaired {
            this.save();
        }
        this
    }

    pub fn get(&self) -> &AppSettings {
        &self.settings
    }

    pub fn part_filter(&self) -> &PartFilter {
        &self.settings.part_filter
    }

    pub fn save(&self) {
        persist_or_warn(self.store.as_ref(), SETTINGS_KEY, &self.settings);
    }

    /// Back to defaults; the stored entry is removed.
    pub fn reset(&mut self) {
        self.settings = AppSettings::default();
        remove_or_warn(self.store.as_ref(), SETTINGS_KEY);
    }

    pub fn set_theme(&mut self, theme: &str) -> bool {
        let theme = theme.trim();
        if theme.is_empty() {
            return false;
        }
        self.settings.appearance.theme = theme.to_string();
        self.save();
        true
    }

    /// Only fonts from [`AVAILABLE_FONTS`] are accepted.
    pub fn set_font(&mut self, font: &str) -> bool {
        let Some(font) = AVAILABLE_FONTS.iter().find(|f| f.eq_ignore_ascii_case(font)) else {
            return false;
        };
        self.settings.appearance.font = (*font).to_string();
        self.save();
        true
    }

    pub fn set_font_size(&mut self, size: u16) -> bool {
        if !FONT_SIZES.contains(&size) {
            return false;
        }
        self.settings.appearance.font_size = size;
        self.save();
        true
    }

    pub fn set_part_filter(&mut self, filter: PartFilter) {
        self.settings.part_filter = filter;
        self.save();
    }
}
