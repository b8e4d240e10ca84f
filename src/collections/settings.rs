//! User settings.

use super::{Document, NestContext};
use crate::error::Result;
use crate::events::Topic;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    #[default]
    System,
    Light,
    Dark,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSettings {
    pub email: bool,
    pub push: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            email: true,
            push: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivacySettings {
    pub public_profile: bool,
    pub show_pets: bool,
    pub allow_follow: bool,
}

impl Default for PrivacySettings {
    fn default() -> Self {
        Self {
            public_profile: true,
            show_pets: true,
            allow_follow: true,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub display_name: String,
    pub theme: Theme,
    pub notifications: NotificationSettings,
    pub privacy: PrivacySettings,
}

/// Settings document. Reads fill gaps from defaults; saves overwrite.
pub struct SettingsStore {
    doc: Document<Settings>,
}

impl SettingsStore {
    pub fn new(ctx: NestContext) -> Self {
        Self {
            doc: Document::new(ctx, Topic::Settings),
        }
    }

    pub fn load(&self) -> Settings {
        self.doc.load()
    }

    pub fn save(&self, settings: &Settings) -> Result<()> {
        self.doc.save(settings)
    }

    pub fn update<F>(&self, change: F) -> Result<Settings>
    where
        F: FnOnce(&mut Settings),
    {
        self.doc.update(change)
    }

    pub fn set_theme(&self, theme: Theme) -> Result<Settings> {
        self.update(|s| s.theme = theme)
    }

    pub fn set_display_name(&self, name: impl Into<String>) -> Result<Settings> {
        let name = name.into();
        self.update(|s| s.display_name = name)
    }

    /// Forget stored settings.
    pub fn reset(&self) -> Result<Settings> {
        self.doc.reset()
    }
}
