use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::assembler::StreamAssembler;
use super::{discard_partials, existing_output, recording_destination_for};
use super::strategies::{self, Acquired, DownloadStrategy, StrategyContext, StrategyOutcome};
use crate::core::filename;
use crate::models::catalog::CatalogEntry;
use crate::models::download::{AcquireReport, AttemptOutcome, DownloadAttempt, StrategyKind};
use crate::models::errors::{AcquireError, StrategyError};
use crate::models::media::{MediaKind, MediaReference};
use crate::models::settings::AppSettings;
use crate::platforms::hotmart::{MediaResolver, Session};

/// Where acquired media lands.
#[derive(Debug, Clone)]
pub struct AcquireTarget {
    pub output_dir: PathBuf,
    /// Overrides the suggested name; `.mp4` is added when it has no extension.
    pub file_name: Option<String>,
}

impl AcquireTarget {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            file_name: None,
        }
    }

    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    pub fn destination(&self, media_ref: &MediaReference) -> PathBuf {
        self.destination_for(&media_ref.suggested_name, media_ref.part)
    }

    /// Where media suggested as `suggested` lands. An explicit name is used
    /// instead, with `_partN` added for a playlist part.
    pub fn destination_for(&self, suggested: &str, part: Option<usize>) -> PathBuf {
        let name = match &self.file_name {
            Some(name) => {
                let path = Path::new(name);
                let (stem, ext) = match (path.file_stem(), path.extension()) {
                    (Some(stem), Some(ext)) => (
                        filename::media_stem(&stem.to_string_lossy()),
                        ext.to_string_lossy().into_owned(),
                    ),
                    _ => (filename::media_stem(name), "mp4".to_string()),
                };
                match part {
                    Some(n) => format!("{}_part{}.{}", stem, n, ext),
                    None => format!("{}.{}", stem, ext),
                }
            }
            None => suggested.to_string(),
        };
        self.output_dir.join(name)
    }
}

/// Progress of one acquisition, reported as it happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainStep {
    Attempt(StrategyKind),
    Assembling,
}

/// Ordered download strategies. The first success wins; every attempt is
/// recorded so a final failure can explain itself.
pub struct StrategyChain {
    strategies: Vec<Box<dyn DownloadStrategy>>,
    assembler: Arc<StreamAssembler>,
    skip_existing: bool,
}

impl StrategyChain {
    pub fn new(strategies: Vec<Box<dyn DownloadStrategy>>, assembler: Arc<StreamAssembler>) -> Self {
        Self {
            strategies,
            assembler,
            skip_existing: true,
        }
    }

    pub fn standard(
        resolver: Arc<dyn MediaResolver>,
        assembler: Arc<StreamAssembler>,
        settings: &AppSettings,
    ) -> Self {
        Self::new(strategies::standard(resolver, settings), assembler)
            .skip_existing(settings.download.skip_existing)
    }

    pub fn skip_existing(mut self, skip: bool) -> Self {
        self.skip_existing = skip;
        self
    }

    pub fn skips_existing(&self) -> bool {
        self.skip_existing
    }

    pub fn kinds(&self) -> Vec<StrategyKind> {
        self.strategies.iter().map(|s| s.kind()).collect()
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn acquire(
        &self,
        session: &Session,
        entry: Option<&CatalogEntry>,
        media_ref: &MediaReference,
        destination: &Path,
        progress: mpsc::Sender<f64>,
        on_step: &(dyn Fn(ChainStep) + Send + Sync),
        cancel: &CancellationToken,
    ) -> Result<AcquireReport, AcquireError> {
        if self.skip_existing {
            if let Some(report) = skipped_report(destination).await {
                return Ok(report);
            }
        }

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| AcquireError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let mut cx = StrategyContext {
            session,
            entry,
            media_ref: media_ref.clone(),
            destination,
            progress,
            cancel,
        };
        let mut attempts: Vec<DownloadAttempt> = Vec::with_capacity(self.strategies.len());

        for strategy in &self.strategies {
            if cancel.is_cancelled() {
                discard_partials(destination).await;
                return Err(AcquireError::Cancelled);
            }

            let kind = strategy.kind();
            tracing::info!("[chain] {} via {}", destination.display(), kind);
            on_step(ChainStep::Attempt(kind));

            let outcome = strategy.attempt(&mut cx).await;
            let record = |outcome: AttemptOutcome, error: Option<String>| DownloadAttempt {
                strategy: kind,
                media_ref: cx.media_ref.clone(),
                outcome,
                error,
            };

            match outcome {
                StrategyOutcome::Success(acquired) => {
                    attempts.push(record(AttemptOutcome::Success, None));
                    let kind = cx.media_ref.kind;
                    return self.finish(acquired, kind, destination, attempts, on_step).await;
                }
                StrategyOutcome::Retryable(e) => {
                    tracing::warn!("[chain] {} failed: {}", kind, e);
                    attempts.push(record(AttemptOutcome::Retryable, Some(e.to_string())));
                    discard_partials(destination).await;
                }
                StrategyOutcome::Fatal(StrategyError::Cancelled) => {
                    discard_partials(destination).await;
                    return Err(AcquireError::Cancelled);
                }
                StrategyOutcome::Fatal(e) => {
                    tracing::error!("[chain] {} failed fatally: {}", kind, e);
                    discard_partials(destination).await;
                    return Err(AcquireError::Fatal {
                        strategy: kind,
                        source: e,
                    });
                }
            }
        }

        discard_partials(destination).await;
        Err(AcquireError::AllStrategiesExhausted { attempts })
    }

    /// Adaptive media always goes through the assembler. A recording of a
    /// direct file is kept in its own container without transcoding.
    async fn finish(
        &self,
        acquired: Acquired,
        kind: MediaKind,
        destination: &Path,
        attempts: Vec<DownloadAttempt>,
        on_step: &(dyn Fn(ChainStep) + Send + Sync),
    ) -> Result<AcquireReport, AcquireError> {
        let (path, assembled) = match (acquired, kind) {
            (Acquired::File(path), _) => (path, false),
            (Acquired::Recording(recording), MediaKind::DirectFile) => {
                let kept = recording_destination_for(destination);
                let renamed = tokio::fs::rename(&recording, &kept).await;
                discard_partials(destination).await;
                renamed.map_err(|source| AcquireError::Io {
                    path: kept.clone(),
                    source,
                })?;
                (kept, false)
            }
            (Acquired::Manifest { manifest: input, .. }, _)
            | (Acquired::Recording(input), MediaKind::AdaptiveManifest) => {
                on_step(ChainStep::Assembling);
                let result = self.assembler.assemble(&input, destination).await;
                discard_partials(destination).await;
                result.map_err(|source| AcquireError::Assemble {
                    destination: destination.to_path_buf(),
                    source,
                })?;
                (destination.to_path_buf(), true)
            }
        };

        let file_size = tokio::fs::metadata(&path)
            .await
            .map_err(|source| AcquireError::Io {
                path: path.clone(),
                source,
            })?
            .len();
        tracing::info!("[chain] done: {} ({} bytes)", path.display(), file_size);
        Ok(AcquireReport {
            path,
            file_size,
            attempts,
            skipped: false,
            assembled,
        })
    }
}

/// A finished report for output that is already on disk.
pub async fn skipped_report(destination: &Path) -> Option<AcquireReport> {
    let (path, file_size) = existing_output(destination).await?;
    tracing::info!("[chain] {} already exists, skipping", path.display());
    Some(AcquireReport {
        path,
        file_size,
        attempts: Vec::new(),
        skipped: true,
        assembled: false,
    })
}
