use crate::core::dependencies::{self, DependencyStatus};
use crate::models::settings::AppSettings;

fn report(status: &DependencyStatus) {
    match &status.path {
        Some(path) => println!(
            "{:<8} ok       {} ({})",
            status.name,
            status.version.as_deref().unwrap_or("unknown version"),
            path.display()
        ),
        None => println!("{:<8} missing", status.name),
    }
}

/// Exit code 0 only when both external tools were found.
pub async fn run(settings: &AppSettings) -> anyhow::Result<i32> {
    let (ffmpeg, browser) = tokio::join!(
        dependencies::ffmpeg_status(),
        dependencies::browser_status(settings.browser.executable.as_ref()),
    );
    report(&ffmpeg);
    report(&browser);

    if !ffmpeg.is_available() {
        tracing::warn!("[check] adaptive streams and recordings cannot be assembled without ffmpeg");
    }
    Ok(if ffmpeg.is_available() && browser.is_available() {
        0
    } else {
        1
    })
}
