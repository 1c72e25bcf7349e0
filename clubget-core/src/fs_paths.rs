use std::path::PathBuf;

pub const DATA_DIR_ENV: &str = "CLUBGET_DATA_DIR";

pub trait AppPaths: Send + Sync {
    fn data_dir(&self) -> PathBuf;
    fn bin_dir(&self) -> Option<PathBuf>;
}

/// Per-user data directory, overridable with `CLUBGET_DATA_DIR`.
pub struct DesktopPaths;

impl AppPaths for DesktopPaths {
    fn data_dir(&self) -> PathBuf {
        resolve_data_dir(std::env::var(DATA_DIR_ENV).ok(), dirs::data_dir())
    }

    fn bin_dir(&self) -> Option<PathBuf> {
        Some(self.data_dir().join("bin"))
    }
}

fn resolve_data_dir(overridden: Option<String>, platform: Option<PathBuf>) -> PathBuf {
    match overridden.filter(|d| !d.trim().is_empty()) {
        Some(dir) => PathBuf::from(dir),
        None => platform
            .map(|d| d.join("clubget"))
            .unwrap_or_else(|| PathBuf::from(".")),
    }
}
