use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use sift_core::{ChatModel, DEFAULT_CHAT_MODEL, DEFAULT_LOCAL_MODEL, RequestOptions};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";
pub const SETTINGS_DIRECTORY_NAME: &str = "sift";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const SETTINGS_ENV_PREFIX: &str = "SIFT_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub model: ChatModel,
    #[serde(default)]
    pub pro_mode: bool,
    #[serde(default)]
    pub local_mode: bool,
    #[serde(default = "default_pro_mode_enabled")]
    pub pro_mode_enabled: bool,
    #[serde(default)]
    pub local_mode_enabled: bool,
    #[serde(default)]
    pub stream_idle_timeout_ms: Option<u64>,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: DEFAULT_CHAT_MODEL,
            pro_mode: false,
            local_mode: false,
            pro_mode_enabled: default_pro_mode_enabled(),
            local_mode_enabled: false,
            stream_idle_timeout_ms: None,
        }
    }
}

impl ChatSettings {
    pub fn normalized(mut self) -> Self {
        let base_url = self.base_url.trim().trim_end_matches('/');
        self.base_url = if base_url.is_empty() {
            default_base_url()
        } else {
            base_url.to_string()
        };

        // Modes switched off by configuration cannot stay on.
        if !self.pro_mode_enabled {
            self.pro_mode = false;
        }
        if !self.local_mode_enabled {
            self.local_mode = false;
        }
        if self.local_mode && !self.model.is_local() {
            self.model = DEFAULT_LOCAL_MODEL;
        }

        self.stream_idle_timeout_ms = self.stream_idle_timeout_ms.filter(|ms| *ms > 0);
        self
    }

    pub fn request_options(&self) -> RequestOptions {
        RequestOptions {
            model: self.model,
            pro_search: self.pro_mode && self.pro_mode_enabled,
        }
    }

    pub fn stream_idle_timeout(&self) -> Option<Duration> {
        self.stream_idle_timeout_ms.map(Duration::from_millis)
    }

    /// Flips local mode and swaps to the matching default model.
    ///
    /// When local mode is disabled by configuration this only forces it off.
    pub fn toggle_local_mode(&mut self) {
        if !self.local_mode_enabled {
            self.local_mode = false;
            return;
        }

        self.local_mode = !self.local_mode;
        self.model = if self.local_mode {
            DEFAULT_LOCAL_MODEL
        } else {
            DEFAULT_CHAT_MODEL
        };
    }

    pub fn toggle_pro_mode(&mut self) {
        self.pro_mode = self.pro_mode_enabled && !self.pro_mode;
    }
}

/// Settings resolved once at startup from defaults, the settings file and `SIFT_*` variables.
pub struct SettingsStore {
    settings: ChatSettings,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".sift"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::resolve(&config_path);
        Self {
            settings,
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    fn resolve(path: &Path) -> ChatSettings {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no settings file, using defaults");
        }

        let figment = Figment::from(Serialized::defaults(ChatSettings::default()))
            .merge(Json::file(path))
            .merge(Env::prefixed(SETTINGS_ENV_PREFIX));

        match figment.extract::<ChatSettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %error,
                    "ignoring unreadable settings"
                );
                ChatSettings::default()
            }
        }
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_pro_mode_enabled() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SettingsStore::new(dir.path().join("settings.json"));
        let settings = store.settings();

        assert_eq!(settings.base_url, DEFAULT_BASE_URL);
        assert_eq!(settings.model, ChatModel::Gpt35Turbo);
        assert!(settings.pro_mode_enabled);
        assert!(!settings.local_mode_enabled);
        assert_eq!(settings.stream_idle_timeout(), None);
    }

    #[test]
    fn file_values_are_merged_and_normalized() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"base_url": " https://answers.example/api/ ", "model": "gpt-4o", "pro_mode": true}"#,
        )
        .expect("write");

        let store = SettingsStore::new(path);
        let settings = store.settings();
        assert_eq!(settings.base_url, "https://answers.example/api");
        assert_eq!(settings.model, ChatModel::Gpt4o);
        assert_eq!(
            settings.request_options(),
            RequestOptions {
                model: ChatModel::Gpt4o,
                pro_search: true,
            }
        );
    }

    #[test]
    fn unreadable_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"model": "gpt-9"}"#).expect("write");

        let store = SettingsStore::new(path);
        assert_eq!(store.settings(), &ChatSettings::default());
    }

    #[test]
    fn environment_overrides_file_values() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "settings.json",
                r#"{"model": "gpt-4o", "local_mode_enabled": true}"#,
            )?;
            jail.set_env("SIFT_LOCAL_MODE", "true");
            jail.set_env("SIFT_STREAM_IDLE_TIMEOUT_MS", "250");

            let store = SettingsStore::new(jail.directory().join("settings.json"));
            let settings = store.settings();
            assert!(settings.local_mode);
            assert_eq!(settings.model, ChatModel::LocalLlama3);
            assert_eq!(
                settings.stream_idle_timeout(),
                Some(Duration::from_millis(250))
            );
            Ok(())
        });
    }

    #[test]
    fn local_toggle_swaps_models_only_when_enabled() {
        let mut settings = ChatSettings::default();
        settings.toggle_local_mode();
        assert!(!settings.local_mode);
        assert_eq!(settings.model, ChatModel::Gpt35Turbo);

        settings.local_mode_enabled = true;
        settings.toggle_local_mode();
        assert!(settings.local_mode);
        assert_eq!(settings.model, ChatModel::LocalLlama3);

        settings.toggle_local_mode();
        assert!(!settings.local_mode);
        assert_eq!(settings.model, ChatModel::Gpt35Turbo);
    }

    #[test]
    fn pro_mode_cannot_be_enabled_when_disabled() {
        let mut settings = ChatSettings {
            pro_mode_enabled: false,
            ..ChatSettings::default()
        };
        settings.toggle_pro_mode();
        assert!(!settings.pro_mode);

        settings.pro_mode = true;
        assert!(!settings.request_options().pro_search);
        assert!(!settings.normalized().pro_mode);
    }

    #[test]
    fn zero_idle_timeout_means_none() {
        let settings = ChatSettings {
            stream_idle_timeout_ms: Some(0),
            ..ChatSettings::default()
        }
        .normalized();
        assert_eq!(settings.stream_idle_timeout(), None);
    }
}
