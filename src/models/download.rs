use std::fmt;
use std::path::PathBuf;

use super::media::MediaReference;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    HelperFetch,
    ReextractFetch,
    SessionFetch,
    TokenFetch,
    BrowserCapture,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HelperFetch => "helper_fetch",
            Self::ReextractFetch => "reextract_fetch",
            Self::SessionFetch => "session_fetch",
            Self::TokenFetch => "token_fetch",
            Self::BrowserCapture => "browser_capture",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Retryable,
    Fatal,
}

/// One strategy invocation, kept for the acquisition report.
#[derive(Debug, Clone)]
pub struct DownloadAttempt {
    pub strategy: StrategyKind,
    pub media_ref: MediaReference,
    pub outcome: AttemptOutcome,
    pub error: Option<String>,
}

impl fmt::Display for DownloadAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            Some(e) => write!(f, "{} ({:?}): {}", self.strategy, self.outcome, e),
            None => write!(f, "{} ({:?})", self.strategy, self.outcome),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AcquireReport {
    pub path: PathBuf,
    pub file_size: u64,
    pub attempts: Vec<DownloadAttempt>,
    /// The destination already existed; nothing was fetched.
    pub skipped: bool,
    pub assembled: bool,
}

impl AcquireReport {
    pub fn winning_strategy(&self) -> Option<StrategyKind> {
        self.attempts
            .iter()
            .find(|a| a.outcome == AttemptOutcome::Success)
            .map(|a| a.strategy)
    }
}

#[derive(Debug)]
pub struct EntryReport {
    pub label: String,
    pub result: Result<AcquireReport, super::errors::EntryError>,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub entries: Vec<EntryReport>,
    pub cancelled: bool,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.entries.iter().filter(|e| e.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.entries.len() - self.succeeded()
    }

    pub fn is_clean(&self) -> bool {
        !self.cancelled && self.failed() == 0
    }
}
