pub mod assembler;
pub mod batch;
pub mod chain;
pub mod strategies;

use std::path::{Path, PathBuf};

use crate::core::direct_downloader::part_path_for;

pub use assembler::StreamAssembler;
pub use batch::Pipeline;
pub use chain::{AcquireTarget, StrategyChain};

/// Segment work directory for `destination`: `X.mp4.parts/`.
pub fn parts_dir_for(destination: &Path) -> PathBuf {
    let mut dir = destination.as_os_str().to_owned();
    dir.push(".parts");
    PathBuf::from(dir)
}

/// Where the transcoder writes before the final rename: `X.part.mp4`.
pub fn assembly_temp_for(destination: &Path) -> PathBuf {
    destination.with_extension("part.mp4")
}

/// Raw in-browser recording: `X.capture.part.webm`.
pub fn capture_temp_for(destination: &Path) -> PathBuf {
    destination.with_extension("capture.part.webm")
}

/// Final name of a recording kept as-is, in its own container: `X.webm`.
pub fn recording_destination_for(destination: &Path) -> PathBuf {
    destination.with_extension("webm")
}

/// The finished output already on disk for `destination`, if any: the file
/// itself or a kept recording beside it. Empty files do not count.
pub async fn existing_output(destination: &Path) -> Option<(PathBuf, u64)> {
    for candidate in [destination.to_path_buf(), recording_destination_for(destination)] {
        if let Ok(meta) = tokio::fs::metadata(&candidate).await {
            if meta.is_file() && meta.len() > 0 {
                return Some((candidate, meta.len()));
            }
        }
    }
    None
}

/// Removes every temporary artifact that can belong to `destination`.
/// The destination itself is never touched.
pub async fn discard_partials(destination: &Path) {
    for file in [
        part_path_for(destination),
        assembly_temp_for(destination),
        capture_temp_for(destination),
    ] {
        match tokio::fs::remove_file(&file).await {
            Ok(()) => tracing::debug!("[cleanup] removed {}", file.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("[cleanup] could not remove {}: {}", file.display(), e),
        }
    }
    let dir = parts_dir_for(destination);
    if tokio::fs::metadata(&dir).await.is_ok() {
        if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
            tracing::warn!("[cleanup] could not remove {}: {}", dir.display(), e);
        }
    }
}
