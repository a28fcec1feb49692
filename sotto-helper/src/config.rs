//! Configuration management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use sotto_audio::AudioConfig;
use sotto_recognition::Capabilities;

/// Recognizer service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognizerConfig {
    /// Address of the streaming transcription service
    pub address: String,

    /// Locales the service transcribes (empty = any)
    pub locales: Vec<String>,

    /// Locales the service can transcribe without leaving the machine
    pub on_device_locales: Vec<String>,
}

impl RecognizerConfig {
    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            locales: self.locales.clone(),
            on_device_locales: self.on_device_locales.clone(),
        }
    }
}

/// Helper configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelperConfig {
    /// Path this configuration was loaded from
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Default dictation language (locale identifier)
    pub language: String,

    /// Grace delay after stop, in milliseconds, allowing a last in-flight
    /// result to land before exit
    pub grace_delay_ms: u64,

    /// Recognizer service
    pub recognizer: RecognizerConfig,

    /// Audio capture
    pub audio: AudioConfig,
}

impl Default for HelperConfig {
    fn default() -> Self {
        Self {
            config_path: Self::default_config_path(),
            language: "en-US".to_string(),
            grace_delay_ms: 500,
            recognizer: RecognizerConfig {
                address: "127.0.0.1:43007".to_string(),
                locales: Vec::new(),
                on_device_locales: Vec::new(),
            },
            audio: AudioConfig::default(),
        }
    }
}

impl HelperConfig {
    /// Load configuration from file, or create default
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::default_config_path);

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .context("Failed to read config file")?;

            let mut config: HelperConfig = toml::from_str(&contents)
                .context("Failed to parse config file")?;

            config.config_path = config_path;
            Ok(config)
        } else {
            let mut config = Self::default();
            config.config_path = config_path;
            config.save().context("Failed to save default config")?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        std::fs::write(&self.config_path, contents)
            .context("Failed to write config file")?;

        Ok(())
    }

    pub fn grace_delay(&self) -> Duration {
        Duration::from_millis(self.grace_delay_ms)
    }

    fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sotto")
            .join("helper.toml")
    }
}
