use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::assembler::StreamAssembler;
use super::chain::{skipped_report, AcquireTarget, ChainStep, StrategyChain};
use crate::core::events::{EntryProgress, EntryStatus, EventEmitter};
use crate::core::filename;
use crate::core::logging::redact_url;
use crate::models::catalog::{CatalogEntry, Selection, Target};
use crate::models::download::{AcquireReport, BatchReport, EntryReport, StrategyKind};
use crate::models::errors::{
    AcquireError, BrowserError, CatalogError, EntryError, ExtractionError, RunError,
};
use crate::models::media::{MediaKind, MediaReference};
use crate::platforms::hotmart::{self, extractor, LessonMedia, MediaResolver, Session};

/// One unit of work in a batch.
#[derive(Debug)]
enum Job {
    Lesson(CatalogEntry),
    Media { index: usize, url: Url },
    Unresolved { label: String, error: EntryError },
}

impl Job {
    fn label(&self) -> String {
        match self {
            Self::Lesson(entry) => entry.to_string(),
            Self::Media { index, url } => format!("#{} {}", index, redact_url(url.as_str())),
            Self::Unresolved { label, .. } => label.clone(),
        }
    }

    fn index(&self) -> usize {
        match self {
            Self::Lesson(entry) => entry.index,
            Self::Media { index, .. } => *index,
            Self::Unresolved { .. } => 0,
        }
    }
}

/// Failure of one job: either recorded and skipped, or fatal to the run.
enum JobError {
    Entry(EntryError),
    Run(RunError),
}

impl From<EntryError> for JobError {
    fn from(e: EntryError) -> Self {
        Self::Entry(e)
    }
}

impl From<RunError> for JobError {
    fn from(e: RunError) -> Self {
        Self::Run(e)
    }
}

fn session_scoped(e: BrowserError) -> JobError {
    JobError::Run(RunError::Browser(e))
}

/// Splits a job result into what gets recorded and what ends the run.
fn settle<T>(result: Result<T, JobError>) -> Result<Result<T, EntryError>, RunError> {
    match result {
        Ok(v) => Ok(Ok(v)),
        Err(JobError::Entry(e)) => Ok(Err(e)),
        Err(JobError::Run(e)) => Err(e),
    }
}

/// The recorded outcome of one output file. Playlist lessons yield one per part.
struct Finished {
    index: usize,
    label: String,
    result: Result<AcquireReport, EntryError>,
}

impl Finished {
    fn new(index: usize, label: impl Into<String>, result: Result<AcquireReport, EntryError>) -> Self {
        Self {
            index,
            label: label.into(),
            result,
        }
    }
}

/// Drives a selection through extraction and acquisition, one entry at a
/// time, against a single session.
pub struct Pipeline {
    resolver: Arc<dyn MediaResolver>,
    chain: StrategyChain,
    assembler: Arc<StreamAssembler>,
    emitter: Arc<dyn EventEmitter>,
}

impl Pipeline {
    pub fn new(
        resolver: Arc<dyn MediaResolver>,
        chain: StrategyChain,
        assembler: Arc<StreamAssembler>,
        emitter: Arc<dyn EventEmitter>,
    ) -> Self {
        Self {
            resolver,
            chain,
            assembler,
            emitter,
        }
    }

    /// Processes every selected entry. Entry failures are recorded and the
    /// batch continues; authentication or browser loss ends it. Cancellation
    /// is honored between entries and inside the chain.
    pub async fn run(
        &self,
        session: &mut Session,
        selection: &Selection,
        target: &AcquireTarget,
        cancel: &CancellationToken,
    ) -> Result<BatchReport, RunError> {
        session.ensure_authenticated().await?;

        let jobs = self.plan(session, selection).await?;
        if jobs.is_empty() {
            tracing::warn!("[batch] nothing selected");
        }
        let target = if target.file_name.is_some() && jobs.len() > 1 {
            tracing::warn!("[batch] output name ignored for {} entries", jobs.len());
            AcquireTarget::new(target.output_dir.clone())
        } else {
            target.clone()
        };

        for job in &jobs {
            self.emitter
                .emit_entry_state(&EntryProgress::new(job.index(), job.label(), EntryStatus::Pending));
        }

        let mut report = BatchReport::default();
        let total = jobs.len();
        for (n, job) in jobs.into_iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::warn!("[batch] cancelled before {}/{}", n + 1, total);
                report.cancelled = true;
                break;
            }
            tracing::info!("[batch] {}/{}: {}", n + 1, total, job.label());

            let finished = match self.process(session, job, &target, cancel).await {
                Ok(finished) => finished,
                Err(e) => {
                    tracing::error!("[batch] aborting: {}", e);
                    return Err(e);
                }
            };
            for done in finished {
                self.record(&done);
                if matches!(done.result, Err(EntryError::Acquire(AcquireError::Cancelled))) {
                    report.cancelled = true;
                }
                report.entries.push(EntryReport {
                    label: done.label,
                    result: done.result,
                });
            }
            if report.cancelled || cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
        }

        tracing::info!(
            "[batch] finished: {} ok, {} failed{}",
            report.succeeded(),
            report.failed(),
            if report.cancelled { ", cancelled" } else { "" }
        );
        Ok(report)
    }

    /// Expands the selection into jobs, listing the catalog only when needed.
    async fn plan(&self, session: &mut Session, selection: &Selection) -> Result<Vec<Job>, RunError> {
        let needs_catalog = match selection {
            Selection::All => true,
            Selection::Targets(targets) => targets.iter().any(|t| matches!(t, Target::Entry(_))),
        };
        let catalog = if needs_catalog {
            Some(load_catalog(session).await?)
        } else {
            None
        };

        let targets = match selection {
            Selection::All => {
                return Ok(match catalog {
                    Some(Ok(entries)) => entries.into_iter().map(Job::Lesson).collect(),
                    Some(Err(error)) => vec![Job::Unresolved {
                        label: "catalog".into(),
                        error: error.into(),
                    }],
                    None => Vec::new(),
                });
            }
            Selection::Targets(targets) => targets,
        };

        let mut jobs = Vec::with_capacity(targets.len());
        for (position, t) in targets.iter().enumerate() {
            let job = match t {
                Target::Entry(selector) => match &catalog {
                    Some(Ok(entries)) => match hotmart::find_entry(entries, selector) {
                        Ok(entry) => Job::Lesson(entry.clone()),
                        Err(error) => Job::Unresolved {
                            label: format!("selector {}", selector),
                            error: error.into(),
                        },
                    },
                    Some(Err(error)) => Job::Unresolved {
                        label: format!("selector {}", selector),
                        error: EntryError::Catalog(CatalogError::NotFound(format!(
                            "{} (catalog unavailable: {})",
                            selector, error
                        ))),
                    },
                    None => continue,
                },
                Target::LessonUrl(url) => Job::Lesson(CatalogEntry {
                    index: position + 1,
                    title: title_from_url(url),
                    lesson_url: url.clone(),
                }),
                Target::MediaUrl(url) => Job::Media {
                    index: position + 1,
                    url: url.clone(),
                },
            };
            jobs.push(job);
        }
        Ok(jobs)
    }

    async fn process(
        &self,
        session: &mut Session,
        job: Job,
        target: &AcquireTarget,
        cancel: &CancellationToken,
    ) -> Result<Vec<Finished>, RunError> {
        let label = job.label();
        match job {
            Job::Unresolved { error, .. } => Ok(vec![Finished::new(0, label, Err(error))]),
            Job::Media { index, url } => {
                let title = redact_url(url.as_str());
                let result = match extractor::direct_reference(session, url, index).await {
                    Ok(media_ref) => {
                        let destination = target.destination(&media_ref);
                        settle(
                            self.acquire(session, None, &media_ref, &destination, index, &title, cancel)
                                .await,
                        )?
                    }
                    Err(e) => Err(e.into()),
                };
                Ok(vec![Finished::new(index, label, result)])
            }
            Job::Lesson(entry) => self.process_lesson(session, &entry, target, cancel).await,
        }
    }

    /// Resolves and acquires one lesson. Output already on disk is reported
    /// as skipped before the lesson page is visited.
    async fn process_lesson(
        &self,
        session: &mut Session,
        entry: &CatalogEntry,
        target: &AcquireTarget,
        cancel: &CancellationToken,
    ) -> Result<Vec<Finished>, RunError> {
        let label = entry.to_string();
        let skip = self.chain.skips_existing();
        let planned = target.destination_for(&filename::lesson_file_name(entry.index, &entry.title, "mp4"), None);
        if skip {
            if let Some(done) = skipped_report(&planned).await {
                return Ok(vec![Finished::new(entry.index, label, Ok(done))]);
            }
        }

        self.emit(entry.index, &entry.title, EntryStatus::Resolving);
        let media = match settle(self.resolve_lesson(session, entry).await)? {
            Ok(media) => media,
            Err(e) => return Ok(vec![Finished::new(entry.index, label, Err(e))]),
        };

        let count = match media {
            LessonMedia::Single(media_ref) => {
                let destination = target.destination(&media_ref);
                let result = settle(
                    self.acquire(session, Some(entry), &media_ref, &destination, entry.index, &entry.title, cancel)
                        .await,
                )?;
                return Ok(vec![Finished::new(entry.index, label, result)]);
            }
            LessonMedia::Parts(count) => count,
        };

        tracing::info!("[batch] {} has {} parts", entry, count);
        let mut finished = Vec::with_capacity(count);
        for part in 1..=count {
            if cancel.is_cancelled() {
                break;
            }
            let part_label = format!("{} (part {}/{})", label, part, count);
            let title = format!("{} (part {})", entry.title, part);
            let planned = target.destination_for(
                &filename::lesson_part_file_name(entry.index, &entry.title, part, "mp4"),
                Some(part),
            );
            if skip {
                if let Some(done) = skipped_report(&planned).await {
                    finished.push(Finished::new(entry.index, part_label, Ok(done)));
                    continue;
                }
            }

            self.emit(entry.index, &title, EntryStatus::Resolving);
            let result = match settle(self.resolve_part(session, entry, part).await)? {
                Ok(media_ref) => {
                    let destination = target.destination(&media_ref);
                    settle(
                        self.acquire(session, Some(entry), &media_ref, &destination, entry.index, &title, cancel)
                            .await,
                    )?
                }
                Err(e) => Err(e),
            };
            finished.push(Finished::new(entry.index, part_label, result));
        }
        Ok(finished)
    }

    /// Runs the strategy chain for one reference, forwarding its progress as
    /// entry events.
    #[allow(clippy::too_many_arguments)]
    async fn acquire(
        &self,
        session: &Session,
        entry: Option<&CatalogEntry>,
        media_ref: &MediaReference,
        destination: &std::path::Path,
        index: usize,
        title: &str,
        cancel: &CancellationToken,
    ) -> Result<AcquireReport, JobError> {
        if media_ref.kind == MediaKind::AdaptiveManifest {
            if let Err(e) = self.assembler.ensure_available().await {
                return Err(EntryError::Assemble(e).into());
            }
        }

        let (strategy_tx, strategy_rx) = watch::channel(StrategyKind::HelperFetch);
        let (progress_tx, progress_rx) = mpsc::channel::<f64>(64);
        let forwarder = tokio::spawn(forward_progress(
            self.emitter.clone(),
            index,
            title.to_string(),
            strategy_rx,
            progress_rx,
        ));

        let on_step = |step: ChainStep| {
            let status = match step {
                ChainStep::Attempt(kind) => {
                    strategy_tx.send_replace(kind);
                    EntryStatus::Acquiring {
                        strategy: kind.to_string(),
                    }
                }
                ChainStep::Assembling => EntryStatus::Assembling,
            };
            self.emit(index, title, status);
        };
        let result = self
            .chain
            .acquire(session, entry, media_ref, destination, progress_tx, &on_step, cancel)
            .await;
        let _ = forwarder.await;

        match result {
            Ok(report) => Ok(report),
            Err(AcquireError::Fatal {
                source: crate::models::errors::StrategyError::Browser(BrowserError::Closed),
                ..
            }) => Err(session_scoped(BrowserError::Closed)),
            Err(e) => Err(EntryError::Acquire(e).into()),
        }
    }

    /// Re-logs in after an expired-session lookup. At most once per session.
    async fn relogin(&self, session: &mut Session) -> Result<(), JobError> {
        session.mark_expired();
        session.ensure_authenticated().await.map_err(RunError::from)?;
        Ok(())
    }

    async fn resolve_lesson(&self, session: &mut Session, entry: &CatalogEntry) -> Result<LessonMedia, JobError> {
        match self.resolver.resolve_lesson(session, entry).await {
            Err(ExtractionError::SessionExpired { .. }) => {
                self.relogin(session).await?;
                self.resolver
                    .resolve_lesson(session, entry)
                    .await
                    .map_err(classify_extraction)
            }
            other => other.map_err(classify_extraction),
        }
    }

    async fn resolve_part(
        &self,
        session: &mut Session,
        entry: &CatalogEntry,
        part: usize,
    ) -> Result<MediaReference, JobError> {
        match self.resolver.resolve_part(session, entry, part).await {
            Err(ExtractionError::SessionExpired { .. }) => {
                self.relogin(session).await?;
                self.resolver
                    .resolve_part(session, entry, part)
                    .await
                    .map_err(classify_extraction)
            }
            other => other.map_err(classify_extraction),
        }
    }

    fn record(&self, done: &Finished) {
        let progress = match &done.result {
            Ok(report) => EntryProgress::new(
                done.index,
                &done.label,
                EntryStatus::Complete {
                    skipped: report.skipped,
                },
            )
            .with_percent(100.0)
            .with_file(report.path.to_string_lossy()),
            Err(e) => {
                tracing::error!("[batch] {} failed: {}", done.label, e);
                EntryProgress::new(
                    done.index,
                    &done.label,
                    EntryStatus::Error {
                        message: e.to_string(),
                    },
                )
            }
        };
        self.emitter.emit_entry_state(&progress);
    }

    fn emit(&self, index: usize, title: &str, status: EntryStatus) {
        self.emitter
            .emit_entry_state(&EntryProgress::new(index, title, status));
    }
}

fn classify_extraction(e: ExtractionError) -> JobError {
    match e {
        ExtractionError::Browser(BrowserError::Closed) => session_scoped(BrowserError::Closed),
        ExtractionError::SessionExpired { .. } => JobError::Run(RunError::Auth(
            crate::models::errors::AuthError::ReloginExhausted,
        )),
        other => JobError::Entry(other.into()),
    }
}

/// Lists the catalog, re-logging in once on expiry. Listing failures stay
/// entry-scoped unless the browser itself is gone.
pub async fn load_catalog(session: &mut Session) -> Result<Result<Vec<CatalogEntry>, CatalogError>, RunError> {
    let first = hotmart::list_entries(session).await;
    let result = match first {
        Err(CatalogError::SessionExpired) => {
            session.mark_expired();
            session.ensure_authenticated().await?;
            hotmart::list_entries(session).await
        }
        other => other,
    };
    match result {
        Err(CatalogError::Browser(BrowserError::Closed)) => Err(RunError::Browser(BrowserError::Closed)),
        other => Ok(other),
    }
}

/// Turns raw byte progress into throttled entry events.
async fn forward_progress(
    emitter: Arc<dyn EventEmitter>,
    index: usize,
    title: String,
    strategy: watch::Receiver<StrategyKind>,
    mut progress: mpsc::Receiver<f64>,
) {
    let mut last = -1.0;
    while let Some(percent) = progress.recv().await {
        if percent - last < 1.0 && percent < 100.0 {
            continue;
        }
        last = percent;
        let kind = *strategy.borrow();
        emitter.emit_entry_state(
            &EntryProgress::new(
                index,
                &title,
                EntryStatus::Acquiring {
                    strategy: kind.to_string(),
                },
            )
            .with_percent(percent),
        );
    }
}

fn title_from_url(url: &Url) -> String {
    url.path_segments()
        .and_then(|s| s.filter(|p| !p.is_empty()).next_back())
        .map(|s| urlencoding::decode(s).map(|d| d.into_owned()).unwrap_or_else(|_| s.to_string()))
        .unwrap_or_else(|| "lesson".to_string())
}
