//! User settings persisted at `~/.config/ytdl-tui/config.json`

use crate::error::{Result, SettingsError};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};
use ytmdl_core::{AudioFormat, OutputSpec, QueueConfig};

pub const CONFIG_DIR_NAME: &str = "ytdl-tui";
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Theme names accepted in the settings file
pub const THEMES: &[&str] = &[
    "default",
    "light",
    "nord",
    "gruvbox",
    "catppuccin",
    "dracula",
    "tokyo-night",
    "rose-pine",
];

/// Persisted user preferences
///
/// Keys missing from the file take their defaults; keys this version does not
/// know about are kept and written back unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_theme")]
    pub theme: String,

    /// May start with `~/`
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    #[serde(default = "default_audio_format")]
    pub audio_format: String,

    /// yt-dlp VBR quality, "0" (best) to "9"
    #[serde(
        default = "default_audio_quality",
        deserialize_with = "deserialize_quality"
    )]
    pub audio_quality: String,

    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_theme() -> String {
    "default".to_string()
}

fn default_output_dir() -> String {
    dirs::home_dir()
        .map(|home| home.join("Music").to_string_lossy().into_owned())
        .unwrap_or_else(|| "~/Music".to_string())
}

fn default_audio_format() -> String {
    AudioFormat::default().to_string()
}

fn default_audio_quality() -> String {
    "0".to_string()
}

fn default_concurrency() -> usize {
    3
}

// Older files may store the quality as a number
fn deserialize_quality<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Quality {
        Text(String),
        Number(u64),
    }

    Ok(match Quality::deserialize(deserializer)? {
        Quality::Text(text) => text,
        Quality::Number(n) => n.to_string(),
    })
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            theme: default_theme(),
            output_dir: default_output_dir(),
            audio_format: default_audio_format(),
            audio_quality: default_audio_quality(),
            concurrency: default_concurrency(),
            extra: Map::new(),
        }
    }
}

/// Expand a leading `~` to the home directory
pub fn expand_home(path: &str) -> PathBuf {
    let rest = match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest.trim_start_matches('/'),
        _ => return PathBuf::from(path),
    };
    match dirs::home_dir() {
        Some(home) if rest.is_empty() => home,
        Some(home) => home.join(rest),
        None => PathBuf::from(path),
    }
}

impl Settings {
    /// `~/.config/ytdl-tui/config.json`
    pub fn config_path() -> Result<PathBuf> {
        let home = dirs::home_dir().ok_or(SettingsError::NoHomeDir)?;
        Ok(home
            .join(".config")
            .join(CONFIG_DIR_NAME)
            .join(CONFIG_FILE_NAME))
    }

    /// Load from the default location
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load from the default location, falling back to defaults on any error
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_else(|e| {
            warn!("Error loading settings, using defaults: {}", e);
            Self::default()
        })
    }

    /// Load `path`, merging defaults for missing keys; a missing file yields defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No settings file at {}", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(SettingsError::io(path, e)),
        };

        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let settings = Self::from_json(&content).map_err(|e| SettingsError::parse(path, e))?;
        debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Save to the default location
    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::config_path()?;
        self.save_to(&path)?;
        Ok(path)
    }

    /// Validate and write pretty-printed JSON to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<()> {
        self.validate()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SettingsError::io(parent, e))?;
        }
        let json = self.to_json()?;
        std::fs::write(path, json).map_err(|e| SettingsError::io(path, e))?;
        debug!("Saved settings to {}", path.display());
        Ok(())
    }

    pub fn from_json(json: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(SettingsError::Serialize)
    }

    pub fn validate(&self) -> Result<()> {
        if !THEMES.contains(&self.theme.as_str()) {
            return Err(SettingsError::UnknownTheme(self.theme.clone()));
        }
        self.format()?;
        self.quality()?;
        if self.concurrency == 0 {
            return Err(SettingsError::InvalidConcurrency);
        }
        Ok(())
    }

    pub fn format(&self) -> Result<AudioFormat> {
        AudioFormat::from_str(&self.audio_format)
            .map_err(|_| SettingsError::InvalidFormat(self.audio_format.clone()))
    }

    pub fn quality(&self) -> Result<u8> {
        self.audio_quality
            .trim()
            .parse::<u8>()
            .ok()
            .filter(|quality| *quality <= 9)
            .ok_or_else(|| SettingsError::InvalidQuality(self.audio_quality.clone()))
    }

    pub fn output_root(&self) -> PathBuf {
        expand_home(self.output_dir.trim())
    }

    pub fn output_spec(&self) -> Result<OutputSpec> {
        Ok(OutputSpec::new(self.output_root())
            .with_format(self.format()?)
            .with_quality(self.quality()?))
    }

    /// Engine configuration from environment defaults plus these settings
    pub fn queue_config(&self) -> Result<QueueConfig> {
        self.validate()?;
        Ok(QueueConfig::from_env()
            .with_concurrency(self.concurrency)
            .with_output(self.output_spec()?))
    }
}
