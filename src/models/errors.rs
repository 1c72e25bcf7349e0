use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use super::download::{DownloadAttempt, StrategyKind};

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("failed to launch browser: {0}")]
    Launch(String),
    #[error("devtools protocol error: {0}")]
    Protocol(String),
    #[error("script evaluation failed: {0}")]
    Script(String),
    #[error("element not found: {0}")]
    ElementNotFound(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("browsing context already closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials for {email}")]
    InvalidCredentials { email: String },
    #[error("login needs a verification step that cannot be automated ({0})")]
    ChallengeRequired(String),
    #[error("transient failure during login: {0}")]
    TransientNetworkError(String),
    #[error("session expired again after re-login")]
    ReloginExhausted,
    #[error(transparent)]
    Browser(#[from] BrowserError),
}

impl AuthError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientNetworkError(_))
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("lesson list did not render within {0:?}")]
    CatalogTimeout(Duration),
    #[error("selector {selector} matches several lessons: {}", format_candidates(.candidates))]
    AmbiguousSelector {
        selector: String,
        candidates: Vec<(usize, String)>,
    },
    #[error("no lesson matches {0}")]
    NotFound(String),
    #[error("session expired while listing lessons")]
    SessionExpired,
    #[error(transparent)]
    Browser(#[from] BrowserError),
}

fn format_candidates(candidates: &[(usize, String)]) -> String {
    candidates
        .iter()
        .map(|(i, t)| format!("#{} {}", i, t))
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("no player mounted on {lesson}")]
    NoPlayerFound { lesson: String },
    #[error("no media URL found on {lesson} (tried {})", .probes.join(", "))]
    NoMediaSignal { lesson: String, probes: Vec<String> },
    #[error("cannot tell whether {url} is a file or a manifest")]
    AmbiguousFormat { url: String },
    #[error("session expired while opening {lesson}")]
    SessionExpired { lesson: String },
    #[error(transparent)]
    Browser(#[from] BrowserError),
}

#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("HTTP {status} from {host}")]
    Http { status: u16, host: String },
    #[error("server returned HTML instead of media, the URL may have expired")]
    HtmlInsteadOfMedia,
    #[error("transfer failed: {0}")]
    Transfer(String),
    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },
    #[error("no auth token captured for this media")]
    NoToken,
    #[error("auth token belongs to session {0}, not the live one")]
    ForeignToken(String),
    #[error("in-browser capture disabled by policy")]
    CaptureDisabled,
    #[error("not applicable: {0}")]
    NotApplicable(&'static str),
    #[error("re-extraction failed: {0}")]
    Reextract(#[source] ExtractionError),
    #[error("disk write failed: {0}")]
    Write(#[source] std::io::Error),
    #[error(transparent)]
    Browser(#[from] BrowserError),
    #[error("cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum AssembleError {
    #[error("transcoder unavailable: {0}")]
    TranscoderUnavailable(String),
    #[error("transcoder exited with {code:?} on {manifest}: {stderr}")]
    Failed {
        manifest: PathBuf,
        code: Option<i32>,
        stderr: String,
    },
    #[error("transcoder produced no usable output at {0}")]
    MalformedOutput(PathBuf),
    #[error("io error while assembling: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("all strategies exhausted: {}", format_trail(.attempts))]
    AllStrategiesExhausted { attempts: Vec<DownloadAttempt> },
    #[error("{strategy} failed fatally: {source}")]
    Fatal {
        strategy: StrategyKind,
        #[source]
        source: StrategyError,
    },
    #[error("assembling {destination} failed: {source}")]
    Assemble {
        destination: PathBuf,
        #[source]
        source: AssembleError,
    },
    #[error("cancelled")]
    Cancelled,
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn format_trail(attempts: &[DownloadAttempt]) -> String {
    attempts
        .iter()
        .enumerate()
        .map(|(i, a)| format!("{}. {}", i + 1, a))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors scoped to a single selection. They never abort a batch.
#[derive(Debug, Error)]
pub enum EntryError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    Acquire(#[from] AcquireError),
    #[error(transparent)]
    Assemble(#[from] AssembleError),
}

/// Errors scoped to the session. They abort the run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),
    #[error("browser session lost: {0}")]
    Browser(#[from] BrowserError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ambiguous_lists_candidates() {
        let err = CatalogError::AmbiguousSelector {
            selector: "\"clock\"".into(),
            candidates: vec![(1, "Clock Game".into()), (3, "Clock Game Advanced".into())],
        };
        assert_eq!(
            err.to_string(),
            "selector \"clock\" matches several lessons: #1 Clock Game, #3 Clock Game Advanced"
        );
    }

    #[test]
    fn only_transient_auth_errors_retry() {
        assert!(AuthError::TransientNetworkError("reset".into()).is_retryable());
        assert!(!AuthError::InvalidCredentials {
            email: "a@b.c".into()
        }
        .is_retryable());
        assert!(!AuthError::ChallengeRequired("captcha".into()).is_retryable());
    }
}
