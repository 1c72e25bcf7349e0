use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::models::settings::AppSettings;

const SETTINGS_FILE: &str = "settings.json";

pub fn default_settings_path() -> PathBuf {
    crate::core::paths::app_data_dir().join(SETTINGS_FILE)
}

/// Reads settings from `path`, falling back to defaults when the file does
/// not exist yet. A file that exists but does not parse is an error.
pub fn load_settings(path: &Path) -> anyhow::Result<AppSettings> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(AppSettings::default()),
        Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
    };
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

/// Writes settings as pretty JSON through a temporary sibling.
pub fn save_settings(path: &Path, settings: &AppSettings) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(settings)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).with_context(|| format!("writing {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings(&dir.path().join("settings.json")).unwrap();
        assert_eq!(settings.download.max_concurrent_segments, 20);
    }

    #[test]
    fn save_then_load_keeps_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let mut settings = AppSettings::default();
        settings.capture.enabled = false;
        settings.site.club_url = "https://kata.club.hotmart.com".into();

        save_settings(&path, &settings).unwrap();
        let loaded = load_settings(&path).unwrap();

        assert!(!loaded.capture.enabled);
        assert_eq!(loaded.site.club_url, "https://kata.club.hotmart.com");
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"browser":{"headless":true}}"#).unwrap();
        let loaded = load_settings(&path).unwrap();
        assert!(loaded.browser.headless);
        assert_eq!(loaded.timeouts.poll_interval_ms, 500);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(load_settings(&path).is_err());
    }
}
