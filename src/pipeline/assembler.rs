use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::OnceCell;

use super::assembly_temp_for;
use crate::core::ffmpeg::Transcoder;
use crate::models::errors::AssembleError;

/// Turns a downloaded manifest (or a browser recording) into one playable
/// file through the external transcoder.
pub struct StreamAssembler {
    transcoder: Arc<dyn Transcoder>,
    probed: OnceCell<Result<String, String>>,
}

impl StreamAssembler {
    pub fn new(transcoder: Arc<dyn Transcoder>) -> Self {
        Self {
            transcoder,
            probed: OnceCell::new(),
        }
    }

    /// Probes the transcoder once per run and returns its version.
    pub async fn ensure_available(&self) -> Result<String, AssembleError> {
        let probed = self
            .probed
            .get_or_init(|| async {
                match self.transcoder.probe().await {
                    Ok(version) => {
                        tracing::info!("[assemble] transcoder {} ready", version);
                        Ok(version)
                    }
                    Err(e) => {
                        tracing::warn!("[assemble] {}", e);
                        Err(e.to_string())
                    }
                }
            })
            .await;
        probed
            .clone()
            .map_err(AssembleError::TranscoderUnavailable)
    }

    /// Converts `input` into `destination`. Output goes to a temporary sibling
    /// first, so `destination` only ever appears complete.
    pub async fn assemble(&self, input: &Path, destination: &Path) -> Result<PathBuf, AssembleError> {
        self.ensure_available().await?;

        let temp = assembly_temp_for(destination);
        let _ = tokio::fs::remove_file(&temp).await;

        tracing::info!("[assemble] {} -> {}", input.display(), destination.display());
        let status = match self.transcoder.convert(input, &temp).await {
            Ok(status) => status,
            Err(e) => {
                let _ = tokio::fs::remove_file(&temp).await;
                return Err(e);
            }
        };

        if !status.success() {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(AssembleError::Failed {
                manifest: input.to_path_buf(),
                code: status.code,
                stderr: status.stderr_tail,
            });
        }

        let size = tokio::fs::metadata(&temp).await.map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(AssembleError::MalformedOutput(temp));
        }

        tokio::fs::rename(&temp, destination).await?;
        Ok(destination.to_path_buf())
    }
}
