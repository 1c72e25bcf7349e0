use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};

use crate::models::settings::AppSettings;
use crate::platforms::hotmart::Credentials;

pub mod check;
pub mod download;
pub mod list;
pub mod settings;

#[derive(Parser, Debug)]
#[command(name = "clubget")]
#[command(version, about = "Download lessons from a Hotmart members club", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Account e-mail
    #[arg(long, global = true, env = "CLUBGET_EMAIL")]
    pub email: Option<String>,

    /// Account password
    #[arg(long, global = true, env = "CLUBGET_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Settings file (defaults to the data dir)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Club home URL, overriding the settings file
    #[arg(long, global = true)]
    pub club_url: Option<String>,

    /// Run the browser without a window
    #[arg(long, global = true)]
    pub headless: bool,

    /// Never fall back to recording playback in the browser
    #[arg(long, global = true)]
    pub no_capture: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the club's lessons in catalog order
    List,

    /// Download the selected lessons
    Download(DownloadArgs),

    /// Report whether ffmpeg and a Chrome build are available
    Check,

    /// Inspect or edit the settings file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Args, Debug, Clone)]
pub struct DownloadArgs {
    /// Lesson index, title fragment, "1,3,5", "all", or a lesson/media URL
    pub targets: Vec<String>,

    /// File name for a single download
    #[arg(long)]
    pub output_name: Option<String>,

    /// Output directory, overriding the settings file
    #[arg(long)]
    pub output_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigAction {
    /// Print the effective settings as JSON
    Show,
    /// Print the settings file location
    Path,
    /// Merge a JSON object into the stored settings
    Set { patch: String },
    /// Restore default settings
    Reset,
}

impl GlobalArgs {
    pub fn settings_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(crate::storage::config::default_settings_path)
    }

    /// Applies flag overrides on top of the stored settings.
    pub fn apply(&self, settings: &mut AppSettings) {
        if let Some(url) = &self.club_url {
            settings.site.club_url = url.clone();
        }
        if self.headless {
            settings.browser.headless = true;
        }
        if self.no_capture {
            settings.capture.enabled = false;
        }
    }

    pub fn credentials(&self) -> anyhow::Result<Credentials> {
        match (&self.email, &self.password) {
            (Some(email), Some(password)) if !email.is_empty() && !password.is_empty() => {
                Ok(Credentials::new(email.clone(), password.clone()))
            }
            _ => anyhow::bail!(
                "credentials required: pass --email/--password or set CLUBGET_EMAIL/CLUBGET_PASSWORD"
            ),
        }
    }
}

/// Runs the chosen subcommand and returns the process exit code.
pub async fn dispatch(cli: Cli, settings: AppSettings) -> anyhow::Result<i32> {
    let settings = Arc::new(settings);
    match cli.command {
        Command::List => list::run(settings, cli.global.credentials()?).await,
        Command::Download(args) => download::run(settings, cli.global.credentials()?, args).await,
        Command::Check => check::run(&settings).await,
        Command::Config { action } => settings::run(&cli.global.settings_path(), &settings, action),
    }
}
