use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    pub schema_version: u32,
    #[serde(default)]
    pub site: SiteSettings,
    #[serde(default)]
    pub browser: BrowserSettings,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
    #[serde(default)]
    pub auth: AuthSettings,
    #[serde(default)]
    pub download: DownloadSettings,
    #[serde(default)]
    pub capture: CaptureSettings,
    #[serde(default)]
    pub proxy: ProxySettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteSettings {
    #[serde(default = "default_club_url")]
    pub club_url: String,
    #[serde(default = "default_login_path")]
    pub login_path: String,
    #[serde(default = "default_lesson_path")]
    pub lesson_path: String,
    #[serde(default = "default_embed_origin")]
    pub embed_origin: String,
    #[serde(default = "default_cookie_domain")]
    pub cookie_domain: String,
    /// Cookie whose presence marks an authenticated session.
    #[serde(default = "default_auth_cookie")]
    pub auth_cookie: String,
}

fn default_club_url() -> String {
    "https://101karategames.club.hotmart.com".into()
}

fn default_login_path() -> String {
    "/login".into()
}

fn default_lesson_path() -> String {
    "/lesson".into()
}

fn default_embed_origin() -> String {
    "https://cf-embed.play.hotmart.com".into()
}

fn default_cookie_domain() -> String {
    ".hotmart.com".into()
}

fn default_auth_cookie() -> String {
    "hmVlcIntegration".into()
}

impl Default for SiteSettings {
    fn default() -> Self {
        Self {
            club_url: default_club_url(),
            login_path: default_login_path(),
            lesson_path: default_lesson_path(),
            embed_origin: default_embed_origin(),
            cookie_domain: default_cookie_domain(),
            auth_cookie: default_auth_cookie(),
        }
    }
}

impl SiteSettings {
    pub fn login_url(&self) -> String {
        format!("{}{}", self.club_url.trim_end_matches('/'), self.login_path)
    }

    pub fn lesson_url(&self, page_hash: &str) -> String {
        format!(
            "{}{}/{}",
            self.club_url.trim_end_matches('/'),
            self.lesson_path,
            page_hash
        )
    }

    pub fn embed_referer(&self) -> String {
        format!("{}/", self.embed_origin.trim_end_matches('/'))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserSettings {
    #[serde(default)]
    pub headless: bool,
    #[serde(default)]
    pub executable: Option<PathBuf>,
    #[serde(default)]
    pub user_data_dir: Option<PathBuf>,
    #[serde(default = "default_window_width")]
    pub window_width: u32,
    #[serde(default = "default_window_height")]
    pub window_height: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_window_width() -> u32 {
    1280
}

fn default_window_height() -> u32 {
    800
}

fn default_request_timeout_secs() -> u64 {
    60
}

pub fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36".into()
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: false,
            executable: None,
            user_data_dir: None,
            window_width: default_window_width(),
            window_height: default_window_height(),
            request_timeout_secs: default_request_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutSettings {
    #[serde(default = "default_login_secs")]
    pub login_secs: u64,
    #[serde(default = "default_catalog_secs")]
    pub catalog_secs: u64,
    #[serde(default = "default_player_secs")]
    pub player_secs: u64,
    #[serde(default = "default_network_observe_secs")]
    pub network_observe_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_login_secs() -> u64 {
    30
}

fn default_catalog_secs() -> u64 {
    30
}

fn default_player_secs() -> u64 {
    30
}

fn default_network_observe_secs() -> u64 {
    8
}

fn default_poll_interval_ms() -> u64 {
    500
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            login_secs: default_login_secs(),
            catalog_secs: default_catalog_secs(),
            player_secs: default_player_secs(),
            network_observe_secs: default_network_observe_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    #[serde(default = "default_max_login_attempts")]
    pub max_login_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_max_login_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    1000
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            max_login_attempts: default_max_login_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadSettings {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_true")]
    pub skip_existing: bool,
    #[serde(default = "default_max_concurrent_segments")]
    pub max_concurrent_segments: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_max_height")]
    pub max_height: u32,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("videos")
}

fn default_true() -> bool {
    true
}

fn default_max_concurrent_segments() -> u32 {
    20
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_height() -> u32 {
    1080
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            skip_existing: true,
            max_concurrent_segments: default_max_concurrent_segments(),
            max_retries: default_max_retries(),
            max_height: default_max_height(),
        }
    }
}

/// Policy for the in-browser recording fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_capture_max_secs")]
    pub max_duration_secs: u64,
}

fn default_capture_max_secs() -> u64 {
    3 * 60 * 60
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_duration_secs: default_capture_max_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProxySettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_proxy_type")]
    pub proxy_type: String,
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_proxy_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

fn default_proxy_type() -> String {
    "http".into()
}

fn default_proxy_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_true")]
    pub log_to_file: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_to_file: true,
            log_dir: default_log_dir(),
        }
    }
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            schema_version: 1,
            site: SiteSettings::default(),
            browser: BrowserSettings::default(),
            timeouts: TimeoutSettings::default(),
            auth: AuthSettings::default(),
            download: DownloadSettings::default(),
            capture: CaptureSettings::default(),
            proxy: ProxySettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}
