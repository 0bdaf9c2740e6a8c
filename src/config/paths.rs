//! Where tap-talk keeps its settings.
//!
//! `$TAP_TALK_CONFIG_DIR` wins when set; otherwise the platform config
//! directory from `dirs` is used (`~/.config/tap-talk/` on Linux,
//! `%APPDATA%\tap-talk\` on Windows, `~/Library/Application Support/tap-talk/`
//! on macOS).

use std::path::{Path, PathBuf};

/// Overrides the config directory, e.g. for a portable install.
pub const CONFIG_DIR_ENV: &str = "TAP_TALK_CONFIG_DIR";

const APP_DIR: &str = "tap-talk";
const SETTINGS_FILE: &str = "settings.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    pub config_dir: PathBuf,
    pub settings_file: PathBuf,
}

impl AppPaths {
    pub fn new() -> Self {
        match std::env::var_os(CONFIG_DIR_ENV) {
            Some(dir) if !dir.is_empty() => Self::in_dir(Path::new(&dir)),
            _ => {
                let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
                Self::in_dir(&base.join(APP_DIR))
            }
        }
    }

    /// Paths rooted at an explicit directory.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            config_dir: dir.to_path_buf(),
            settings_file: dir.join(SETTINGS_FILE),
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_dir_places_settings_inside() {
        let paths = AppPaths::in_dir(Path::new("/tmp/tt"));
        assert_eq!(paths.config_dir, PathBuf::from("/tmp/tt"));
        assert_eq!(paths.settings_file, PathBuf::from("/tmp/tt/settings.toml"));
    }

    #[test]
    fn default_settings_file_is_toml() {
        let paths = AppPaths::new();
        assert!(paths.settings_file.starts_with(&paths.config_dir));
        assert!(paths
            .settings_file
            .extension()
            .is_some_and(|e| e == "toml"));
    }
}
