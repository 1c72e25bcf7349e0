use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::cookie::Jar;
use url::Url;

use crate::browser::{is_truthy, scripts, BrowserCookie, BrowsingContext};
use crate::core::http_client;
use crate::models::errors::{AuthError, BrowserError};
use crate::models::media::SessionId;
use crate::models::settings::{AppSettings, SiteSettings};

const EMAIL_SELECTORS: &[&str] = &[
    "input[type='email']",
    "#username",
    "input[name='username']",
    "input[type='text']",
    "input.form-control",
];

const PASSWORD_SELECTORS: &[&str] = &["input[type='password']", "#password"];

const SUBMIT_SELECTORS: &[&str] = &[
    "button.btn-login[data-test='submit']",
    "[name=submit]",
    "button[type='submit']",
    "button.btn-primary",
    "button.login-button",
];

#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Authenticated,
    Expired,
}

/// Delay after failed login `attempt` (from 1), before jitter: doubles each time.
fn login_backoff_ms(base_ms: u64, attempt: u32) -> u64 {
    let shift = attempt.saturating_sub(1).min(16);
    base_ms.saturating_mul(1 << shift)
}

/// Cookies that keep the consent banner from covering the login form.
fn policy_cookies(site: &SiteSettings) -> Vec<BrowserCookie> {
    [
        ("cookie-policy-accepted", "true"),
        ("cookie-policy-preferences", "true"),
        ("hotmart-cookie-policy", "accepted"),
    ]
    .into_iter()
    .map(|(name, value)| BrowserCookie::new(name, value).on_domain(site.cookie_domain.clone()))
    .collect()
}

/// The authenticated state of one browsing context. Owns the context for the
/// duration of a run; see [`with_session`].
pub struct Session {
    ctx: Arc<dyn BrowsingContext>,
    credentials: Credentials,
    settings: Arc<AppSettings>,
    id: SessionId,
    state: AuthState,
    cookies: Vec<BrowserCookie>,
    client: reqwest::Client,
    plain: reqwest::Client,
    relogins: u32,
}

impl Session {
    pub fn new(
        ctx: Arc<dyn BrowsingContext>,
        credentials: Credentials,
        settings: Arc<AppSettings>,
    ) -> Result<Self, AuthError> {
        let plain = http_client::plain_client(&settings)
            .map_err(|e| AuthError::TransientNetworkError(e.to_string()))?;
        Ok(Self {
            ctx,
            credentials,
            id: SessionId::new(),
            state: AuthState::Unauthenticated,
            cookies: Vec::new(),
            client: plain.clone(),
            plain,
            settings,
            relogins: 0,
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    pub fn context(&self) -> &Arc<dyn BrowsingContext> {
        &self.ctx
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    pub fn cookies(&self) -> &[BrowserCookie] {
        &self.cookies
    }

    /// Client carrying the session's cookie jar.
    pub fn http_client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Client without cookies; callers add their own headers.
    pub fn plain_client(&self) -> &reqwest::Client {
        &self.plain
    }

    /// `name=value; ...` for every cookie the browser holds.
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|c| format!("{}={}", c.name, c.value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    pub fn is_login_page(&self, url: &str) -> bool {
        let site = &self.settings.site;
        url.starts_with(&site.login_url())
            || url.contains("sso.hotmart.com")
            || Url::parse(url)
                .map(|u| u.path().starts_with(&site.login_path))
                .unwrap_or(false)
    }

    pub fn mark_expired(&mut self) {
        if self.state == AuthState::Authenticated {
            tracing::warn!("[session {}] marked expired", self.id);
            self.state = AuthState::Expired;
        }
    }

    /// Logs in, or revalidates cookies when already authenticated.
    /// Transient failures are retried with backoff up to the configured limit.
    pub async fn login(&mut self) -> Result<(), AuthError> {
        if self.state == AuthState::Authenticated {
            if self.has_auth_cookie().await? {
                tracing::debug!("[session {}] cookies still valid", self.id);
                return Ok(());
            }
            self.state = AuthState::Expired;
        }

        let max_attempts = self.settings.auth.max_login_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            tracing::info!(
                "[auth] logging in as {} (attempt {}/{})",
                self.credentials.email,
                attempt,
                max_attempts
            );
            match self.submit_login().await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = login_backoff_ms(self.settings.auth.backoff_ms, attempt)
                        + rand::random::<u64>() % 250;
                    tracing::warn!("[auth] {}, retrying in {}ms", e, delay);
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                Err(e) => {
                    tracing::error!("[auth] login failed: {}", e);
                    return Err(e);
                }
            }
        }
    }

    /// Authenticated or re-logged-in, at most once per session after expiry.
    pub async fn ensure_authenticated(&mut self) -> Result<(), AuthError> {
        match self.state {
            AuthState::Authenticated => Ok(()),
            AuthState::Unauthenticated => self.login().await,
            AuthState::Expired => {
                if self.relogins >= 1 {
                    return Err(AuthError::ReloginExhausted);
                }
                self.relogins += 1;
                self.login().await
            }
        }
    }

    /// Closes consent banners and notification prompts on the current page.
    /// Absence of overlays is not an error.
    pub async fn dismiss_overlays(&self) -> Result<usize, BrowserError> {
        let count = match self.ctx.execute_script(scripts::DISMISS_OVERLAYS).await {
            Ok(v) => v.as_u64().unwrap_or(0) as usize,
            Err(BrowserError::Script(e)) => {
                tracing::debug!("[overlay] script failed: {}", e);
                0
            }
            Err(e) => return Err(e),
        };
        if count > 0 {
            tracing::debug!("[overlay] dismissed {}", count);
        }
        Ok(count)
    }

    async fn has_auth_cookie(&self) -> Result<bool, BrowserError> {
        let name = &self.settings.site.auth_cookie;
        Ok(self
            .ctx
            .read_cookies()
            .await?
            .iter()
            .any(|c| &c.name == name && !c.value.is_empty()))
    }

    async fn submit_login(&mut self) -> Result<(), AuthError> {
        let site = self.settings.site.clone();
        let timeouts = self.settings.timeouts.clone();
        let poll = Duration::from_millis(timeouts.poll_interval_ms);
        let login_timeout = Duration::from_secs(timeouts.login_secs);

        self.ctx.set_cookies(&policy_cookies(&site)).await?;
        self.ctx
            .navigate(&site.login_url())
            .await
            .map_err(|e| AuthError::TransientNetworkError(e.to_string()))?;

        let landed = self.ctx.current_url().await?;
        if !self.is_login_page(&landed) && self.has_auth_cookie().await? {
            tracing::info!("[auth] already signed in");
            return self.finish_login().await;
        }

        if !self
            .ctx
            .wait_for(scripts::LOGIN_FORM_READY, login_timeout, poll)
            .await?
        {
            if self.has_auth_cookie().await? {
                return self.finish_login().await;
            }
            return Err(AuthError::TransientNetworkError(
                "login form did not load".into(),
            ));
        }
        self.dismiss_overlays().await?;

        let email = self.credentials.email.clone();
        if !self.fill_first(EMAIL_SELECTORS, &email).await? {
            return Err(AuthError::TransientNetworkError("email field not found".into()));
        }
        let password = self.credentials.password.clone();
        if !self.fill_first(PASSWORD_SELECTORS, &password).await? {
            return Err(AuthError::TransientNetworkError("password field not found".into()));
        }
        tracing::info!("[auth] credentials filled");

        let mut submitted = false;
        for sel in SUBMIT_SELECTORS {
            if self.ctx.click(sel).await? {
                submitted = true;
                break;
            }
        }
        if !submitted {
            return Err(AuthError::TransientNetworkError("submit button not found".into()));
        }
        tracing::info!("[auth] form submitted, waiting for redirect");

        let start = Instant::now();
        loop {
            let url = self.ctx.current_url().await?;
            if !self.is_login_page(&url) && self.has_auth_cookie().await? {
                tracing::info!("[auth] redirect detected: {}", crate::core::logging::redact_url(&url));
                return self.finish_login().await;
            }
            if url.to_ascii_lowercase().contains("captcha")
                || is_truthy(&self.ctx.execute_script(scripts::CHALLENGE_PRESENT).await.unwrap_or_default())
            {
                return Err(AuthError::ChallengeRequired(
                    "captcha or verification code requested".into(),
                ));
            }
            if let Ok(serde_json::Value::String(msg)) =
                self.ctx.execute_script(scripts::LOGIN_ERROR_TEXT).await
            {
                if !msg.trim().is_empty() {
                    tracing::warn!("[auth] login rejected: {}", msg.trim());
                    return Err(AuthError::InvalidCredentials {
                        email: self.credentials.email.clone(),
                    });
                }
            }
            if start.elapsed() >= login_timeout {
                return Err(AuthError::TransientNetworkError(format!(
                    "no redirect after {:?}",
                    login_timeout
                )));
            }
            tokio::time::sleep(poll).await;
        }
    }

    async fn fill_first(&self, selectors: &[&str], text: &str) -> Result<bool, BrowserError> {
        for sel in selectors {
            if self.ctx.fill(sel, text).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn finish_login(&mut self) -> Result<(), AuthError> {
        let cookies = self.ctx.read_cookies().await?;
        let jar = Jar::default();
        for c in &cookies {
            let domain = c
                .domain
                .as_deref()
                .unwrap_or(&self.settings.site.cookie_domain)
                .trim_start_matches('.')
                .to_string();
            let Ok(url) = Url::parse(&format!("https://{}/", domain)) else {
                continue;
            };
            jar.add_cookie_str(
                &format!("{}={}; Domain={}; Path=/", c.name, c.value, domain),
                &url,
            );
        }
        self.client = http_client::cookie_client(&self.settings, Arc::new(jar))
            .map_err(|e| AuthError::TransientNetworkError(e.to_string()))?;
        self.cookies = cookies;
        self.id = SessionId::new();
        self.state = AuthState::Authenticated;
        tracing::info!(
            "[session {}] authenticated ({} cookies)",
            self.id,
            self.cookies.len()
        );
        Ok(())
    }
}

/// Runs `f` against a logged-in session and closes the browsing context on
/// every exit path, including login failure and panics inside `f`.
pub async fn with_session<T, E, F>(
    ctx: Arc<dyn BrowsingContext>,
    credentials: Credentials,
    settings: Arc<AppSettings>,
    f: F,
) -> Result<T, E>
where
    E: From<AuthError>,
    F: for<'s> FnOnce(&'s mut Session) -> BoxFuture<'s, Result<T, E>>,
{
    let outcome = AssertUnwindSafe(async {
        let mut session = Session::new(ctx.clone(), credentials, settings).map_err(E::from)?;
        session.login().await.map_err(E::from)?;
        f(&mut session).await
    })
    .catch_unwind()
    .await;

    if let Err(e) = ctx.close().await {
        tracing::warn!("[session] failed to close browser: {}", e);
    }

    match outcome {
        Ok(result) => result,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}
