use std::path::PathBuf;

use clubget_core::fs_paths::{AppPaths, DesktopPaths};

pub fn app_data_dir() -> PathBuf {
    DesktopPaths.data_dir()
}

pub fn managed_bin_dir() -> Option<PathBuf> {
    DesktopPaths.bin_dir()
}
