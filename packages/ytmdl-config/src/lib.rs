pub mod error;
pub mod settings;

// Re-export commonly used types
pub use error::{Result, SettingsError};
pub use settings::{expand_home, Settings, CONFIG_DIR_NAME, CONFIG_FILE_NAME, THEMES};
