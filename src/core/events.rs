pub use clubget_core::core::events::{EntryProgress, EntryStatus, EventEmitter, NoopEmitter};

/// Reports entry transitions through `tracing`, for terminal runs.
#[derive(Default)]
pub struct LogEmitter;

impl LogEmitter {
    pub fn new() -> Self {
        Self
    }
}

impl EventEmitter for LogEmitter {
    fn emit_entry_state(&self, progress: &EntryProgress) {
        let who = format!("#{} {}", progress.index, progress.title);
        match &progress.status {
            EntryStatus::Pending => tracing::debug!("[entry] {} queued", who),
            EntryStatus::Resolving => tracing::info!("[entry] {} resolving media", who),
            EntryStatus::Acquiring { strategy } => {
                let pct = progress.percent;
                if pct == 0.0 {
                    tracing::info!("[entry] {} trying {}", who, strategy);
                } else {
                    tracing::debug!("[entry] {} {} {:.0}%", who, strategy, pct);
                }
            }
            EntryStatus::Assembling => tracing::info!("[entry] {} assembling", who),
            EntryStatus::Complete { skipped: true } => {
                tracing::info!("[entry] {} already present", who)
            }
            EntryStatus::Complete { skipped: false } => tracing::info!(
                "[entry] {} saved to {}",
                who,
                progress.file_path.as_deref().unwrap_or("?")
            ),
            EntryStatus::Error { message } => tracing::error!("[entry] {} failed: {}", who, message),
        }
    }
}
