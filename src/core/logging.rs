use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Local};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::models::settings::LoggingSettings;

const QUIET_DEPS: &str = "chromiumoxide=warn,hyper=warn,hyper_util=warn,reqwest=warn,tungstenite=warn";

/// Installs the global subscriber: stdout always, plus a timestamped file
/// under `log_dir` when enabled. `RUST_LOG` overrides the configured level.
/// Returns the log file path, if any.
pub fn init(settings: &LoggingSettings, verbose: bool) -> anyhow::Result<Option<PathBuf>> {
    let level = if verbose { "debug" } else { settings.level.as_str() };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},{}", level, QUIET_DEPS)));

    let stdout_layer = fmt::layer().with_target(false);

    let (file_layer, path) = if settings.log_to_file {
        std::fs::create_dir_all(&settings.log_dir)?;
        let path = log_file_path(&settings.log_dir, Local::now());
        let file = std::fs::File::create(&path)?;
        let layer = fmt::layer()
            .with_ansi(false)
            .with_writer(Mutex::new(file));
        (Some(layer), Some(path))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()?;

    Ok(path)
}

pub fn log_file_path(dir: &Path, now: DateTime<Local>) -> PathBuf {
    dir.join(format!("clubget_{}.log", now.format("%Y%m%d_%H%M%S")))
}

/// Trims long signed URLs for log lines; query strings carry tokens.
pub fn redact_url(url: &str) -> String {
    let base = url.split('?').next().unwrap_or(url);
    let short: String = base.chars().take(96).collect();
    if url.contains('?') {
        format!("{}?…", short)
    } else {
        short
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn log_file_is_timestamped() {
        let now = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(
            log_file_path(Path::new("logs"), now),
            PathBuf::from("logs/clubget_20240309_140507.log")
        );
    }

    #[test]
    fn redact_drops_query() {
        assert_eq!(
            redact_url("https://cdn.example.com/v.m3u8?hdntl=exp=1~hmac=ff"),
            "https://cdn.example.com/v.m3u8?…"
        );
        assert_eq!(redact_url("https://x/a.mp4"), "https://x/a.mp4");
    }
}
