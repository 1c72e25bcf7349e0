//! The five ways of turning a [`MediaReference`] into bytes on disk, from the
//! most faithful to the most degraded.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, COOKIE, ORIGIN, REFERER, USER_AGENT};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{capture_temp_for, discard_partials, parts_dir_for};
use crate::browser::{scripts, BrowserError};
use crate::core::direct_downloader::{download_direct, FetchError};
use crate::core::hls_downloader::{HlsDownloader, HlsOptions};
use crate::core::logging::redact_url;
use crate::models::catalog::CatalogEntry;
use crate::models::download::StrategyKind;
use crate::models::errors::StrategyError;
use crate::models::media::{AuthToken, MediaKind, MediaReference};
use crate::models::settings::AppSettings;
use crate::platforms::hotmart::extractor::{self, MediaResolver};
use crate::platforms::hotmart::Session;

/// What a successful strategy left on disk.
#[derive(Debug)]
pub enum Acquired {
    /// Final file already at the destination.
    File(PathBuf),
    /// Local manifest plus segments, still to be assembled.
    Manifest { manifest: PathBuf, work_dir: PathBuf },
    /// Raw browser recording, still to be transcoded.
    Recording(PathBuf),
}

#[derive(Debug)]
pub enum StrategyOutcome {
    Success(Acquired),
    Retryable(StrategyError),
    Fatal(StrategyError),
}

/// Everything a strategy may use for one acquisition. `media_ref` is the
/// current reference; re-extraction replaces it for the strategies after it.
pub struct StrategyContext<'a> {
    pub session: &'a Session,
    pub entry: Option<&'a CatalogEntry>,
    pub media_ref: MediaReference,
    pub destination: &'a Path,
    pub progress: mpsc::Sender<f64>,
    pub cancel: &'a CancellationToken,
}

#[async_trait]
pub trait DownloadStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    async fn attempt(&self, cx: &mut StrategyContext<'_>) -> StrategyOutcome;
}

fn outcome_for(e: FetchError) -> StrategyOutcome {
    match e {
        FetchError::Cancelled => StrategyOutcome::Fatal(StrategyError::Cancelled),
        FetchError::Write(io) => StrategyOutcome::Fatal(StrategyError::Write(io)),
        FetchError::Http { status, host } => StrategyOutcome::Retryable(StrategyError::Http { status, host }),
        FetchError::HtmlInsteadOfMedia => StrategyOutcome::Retryable(StrategyError::HtmlInsteadOfMedia),
        FetchError::SizeMismatch { expected, actual } => {
            StrategyOutcome::Retryable(StrategyError::SizeMismatch { expected, actual })
        }
        other => StrategyOutcome::Retryable(StrategyError::Transfer(other.to_string())),
    }
}

fn hls_options(settings: &AppSettings) -> HlsOptions {
    HlsOptions {
        max_height: settings.download.max_height,
        max_concurrent: settings.download.max_concurrent_segments,
        max_retries: settings.download.max_retries,
    }
}

fn insert_header(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(v) => {
            headers.insert(name, v);
        }
        Err(_) => tracing::warn!("[strategy] dropping unencodable {} header", name),
    }
}

/// The token this session may use, or the reason it may not.
fn usable_token<'r>(cx: &'r StrategyContext<'_>) -> Result<Option<&'r AuthToken>, StrategyError> {
    cx.media_ref
        .token_for(cx.session.id())
        .map_err(|owner| StrategyError::ForeignToken(owner.to_string()))
}

/// Fetches `url` with `client` into the destination (direct files) or into
/// the segment work directory (manifests).
async fn fetch_media(
    cx: &StrategyContext<'_>,
    client: &reqwest::Client,
    url: &Url,
    headers: HeaderMap,
) -> StrategyOutcome {
    tracing::debug!("[strategy] fetching {}", redact_url(url.as_str()));
    match cx.media_ref.kind {
        MediaKind::DirectFile => {
            match download_direct(
                client,
                url.as_str(),
                cx.destination,
                headers,
                cx.progress.clone(),
                cx.cancel,
            )
            .await
            {
                Ok(_) => StrategyOutcome::Success(Acquired::File(cx.destination.to_path_buf())),
                Err(e) => outcome_for(e),
            }
        }
        MediaKind::AdaptiveManifest => {
            let work_dir = parts_dir_for(cx.destination);
            let result = HlsDownloader::with_client(client.clone())
                .fetch(
                    url.as_str(),
                    &work_dir,
                    &headers,
                    &hls_options(cx.session.settings()),
                    Some(cx.progress.clone()),
                    cx.cancel,
                )
                .await;
            match result {
                Ok(fetched) => StrategyOutcome::Success(Acquired::Manifest {
                    manifest: fetched.manifest,
                    work_dir: fetched.work_dir,
                }),
                Err(e) => {
                    discard_partials(cx.destination).await;
                    outcome_for(e)
                }
            }
        }
    }
}

/// Emulates the headers a media helper would send: the player's origin and
/// referer, the browser's user agent, the session cookies, and the token.
pub struct HelperFetch;

impl HelperFetch {
    async fn run(cx: &StrategyContext<'_>) -> StrategyOutcome {
        let token = match usable_token(cx) {
            Ok(t) => t,
            Err(e) => return StrategyOutcome::Retryable(e),
        };
        let settings = cx.session.settings();

        let mut headers = HeaderMap::new();
        insert_header(&mut headers, USER_AGENT, &settings.browser.user_agent);
        insert_header(&mut headers, ORIGIN, &settings.site.embed_origin);
        insert_header(&mut headers, REFERER, &settings.site.embed_referer());
        if let Some(cookies) = cx.session.cookie_header() {
            insert_header(&mut headers, COOKIE, &cookies);
        }

        let url = match token {
            Some(t) => {
                if let Some(auth) = t.authorization_header() {
                    insert_header(&mut headers, AUTHORIZATION, &auth);
                }
                t.apply_to_url(&cx.media_ref.source_url)
            }
            None => cx.media_ref.source_url.clone(),
        };

        fetch_media(cx, cx.session.plain_client(), &url, headers).await
    }
}

#[async_trait]
impl DownloadStrategy for HelperFetch {
    fn kind(&self) -> StrategyKind {
        StrategyKind::HelperFetch
    }

    async fn attempt(&self, cx: &mut StrategyContext<'_>) -> StrategyOutcome {
        Self::run(cx).await
    }
}

/// Re-resolves the lesson for a fresh reference, then fetches like
/// [`HelperFetch`]. Later strategies see the fresh reference.
pub struct ReextractFetch {
    resolver: Arc<dyn MediaResolver>,
}

impl ReextractFetch {
    pub fn new(resolver: Arc<dyn MediaResolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl DownloadStrategy for ReextractFetch {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ReextractFetch
    }

    async fn attempt(&self, cx: &mut StrategyContext<'_>) -> StrategyOutcome {
        let Some(entry) = cx.entry else {
            return StrategyOutcome::Retryable(StrategyError::NotApplicable(
                "no lesson page to re-extract from",
            ));
        };
        let fresh = match cx.media_ref.part {
            Some(part) => self.resolver.resolve_part(cx.session, entry, part).await,
            None => self.resolver.resolve(cx.session, entry).await,
        };
        match fresh {
            Ok(fresh) => {
                tracing::info!("[strategy] re-extracted {}", fresh.short_url());
                cx.media_ref = fresh;
                HelperFetch::run(cx).await
            }
            Err(e) => StrategyOutcome::Retryable(StrategyError::Reextract(e)),
        }
    }
}

/// Uses the live session's cookie jar and nothing else.
pub struct SessionFetch;

#[async_trait]
impl DownloadStrategy for SessionFetch {
    fn kind(&self) -> StrategyKind {
        StrategyKind::SessionFetch
    }

    async fn attempt(&self, cx: &mut StrategyContext<'_>) -> StrategyOutcome {
        let mut headers = HeaderMap::new();
        insert_header(&mut headers, USER_AGENT, &cx.session.settings().browser.user_agent);
        let url = cx.media_ref.source_url.clone();
        fetch_media(cx, cx.session.http_client(), &url, headers).await
    }
}

/// Relies on the captured token alone: no cookies, no referer.
pub struct TokenFetch;

#[async_trait]
impl DownloadStrategy for TokenFetch {
    fn kind(&self) -> StrategyKind {
        StrategyKind::TokenFetch
    }

    async fn attempt(&self, cx: &mut StrategyContext<'_>) -> StrategyOutcome {
        let token = match usable_token(cx) {
            Ok(Some(t)) => t.clone(),
            Ok(None) => return StrategyOutcome::Retryable(StrategyError::NoToken),
            Err(e) => return StrategyOutcome::Retryable(e),
        };
        let mut headers = HeaderMap::new();
        if let Some(auth) = token.authorization_header() {
            insert_header(&mut headers, AUTHORIZATION, &auth);
        }
        let url = token.apply_to_url(&cx.media_ref.source_url);
        fetch_media(cx, cx.session.plain_client(), &url, headers).await
    }
}

/// Plays the lesson in the browser and records what it renders. Real-time
/// and lossy, so it only runs when enabled, for at most `max_duration`.
pub struct BrowserCapture {
    enabled: bool,
    max_duration: Duration,
}

impl BrowserCapture {
    pub fn new(enabled: bool, max_duration: Duration) -> Self {
        Self {
            enabled,
            max_duration,
        }
    }

    pub fn from_settings(settings: &AppSettings) -> Self {
        Self::new(
            settings.capture.enabled,
            Duration::from_secs(settings.capture.max_duration_secs),
        )
    }

    async fn open_player(cx: &StrategyContext<'_>) -> Result<(), BrowserError> {
        let ctx = cx.session.context();
        let page = cx
            .entry
            .map(|e| e.lesson_url.as_str())
            .unwrap_or_else(|| cx.media_ref.source_url.as_str());
        ctx.navigate(page).await?;
        cx.session.dismiss_overlays().await?;
        if let serde_json::Value::String(src) = ctx.execute_script(scripts::EMBED_SRC).await? {
            ctx.navigate(&src).await?;
        }
        if !extractor::player_present(cx.session).await? {
            return Err(BrowserError::ElementNotFound("video player".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl DownloadStrategy for BrowserCapture {
    fn kind(&self) -> StrategyKind {
        StrategyKind::BrowserCapture
    }

    async fn attempt(&self, cx: &mut StrategyContext<'_>) -> StrategyOutcome {
        if !self.enabled {
            return StrategyOutcome::Retryable(StrategyError::CaptureDisabled);
        }
        if cx.cancel.is_cancelled() {
            return StrategyOutcome::Fatal(StrategyError::Cancelled);
        }
        if let Err(e) = Self::open_player(cx).await {
            return StrategyOutcome::Retryable(e.into());
        }

        tracing::info!(
            "[capture] recording up to {}s of playback",
            self.max_duration.as_secs()
        );
        let recording = tokio::select! {
            r = cx.session.context().capture_media_stream(self.max_duration) => r,
            _ = cx.cancel.cancelled() => return StrategyOutcome::Fatal(StrategyError::Cancelled),
        };
        let bytes = match recording {
            Ok(b) if !b.is_empty() => b,
            Ok(_) => {
                return StrategyOutcome::Retryable(StrategyError::Transfer(
                    "recording produced no data".into(),
                ))
            }
            Err(e) => return StrategyOutcome::Retryable(e.into()),
        };

        let path = capture_temp_for(cx.destination);
        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return StrategyOutcome::Fatal(StrategyError::Write(e));
            }
        }
        if let Err(e) = tokio::fs::write(&path, &bytes).await {
            let _ = tokio::fs::remove_file(&path).await;
            return StrategyOutcome::Fatal(StrategyError::Write(e));
        }
        let _ = cx.progress.send(100.0).await;
        tracing::info!("[capture] recorded {} bytes", bytes.len());
        StrategyOutcome::Success(Acquired::Recording(path))
    }
}

/// Strategies in priority order.
pub fn standard(resolver: Arc<dyn MediaResolver>, settings: &AppSettings) -> Vec<Box<dyn DownloadStrategy>> {
    vec![
        Box::new(HelperFetch),
        Box::new(ReextractFetch::new(resolver)),
        Box::new(SessionFetch),
        Box::new(TokenFetch),
        Box::new(BrowserCapture::from_settings(settings)),
    ]
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use std::sync::Mutex;

    use super::*;
    use crate::browser::scripted::{ScriptedBrowser, ScriptedPage};
    use crate::models::errors::ExtractionError;
    use crate::models::media::{SessionId, TokenPlacement};
    use crate::testing::{fast_settings, signed_in_session, HttpStub, Reply, CLUB};

    fn lesson() -> CatalogEntry {
        CatalogEntry {
            index: 1,
            title: "Clock Game".into(),
            lesson_url: Url::parse(&format!("{}/lesson/h1", CLUB)).unwrap(),
        }
    }

    fn reference(owner: SessionId, token: Option<AuthToken>) -> MediaReference {
        MediaReference {
            source_url: Url::parse("https://cdn.example.com/v/clock.mp4").unwrap(),
            kind: MediaKind::DirectFile,
            auth_token: token,
            suggested_name: "001_Clock Game.mp4".into(),
            part: None,
            session_id: owner,
        }
    }

    async fn attempt_once(
        strategy: &dyn DownloadStrategy,
        session: &Session,
        media_ref: MediaReference,
        destination: &Path,
    ) -> StrategyOutcome {
        let (tx, _rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let entry = lesson();
        let mut cx = StrategyContext {
            session,
            entry: Some(&entry),
            media_ref,
            destination,
            progress: tx,
            cancel: &cancel,
        };
        strategy.attempt(&mut cx).await
    }

    #[test]
    fn fetch_errors_map_to_outcomes() {
        assert!(matches!(
            outcome_for(FetchError::Http { status: 403, host: "cdn".into() }),
            StrategyOutcome::Retryable(StrategyError::Http { status: 403, .. })
        ));
        assert!(matches!(
            outcome_for(FetchError::Cancelled),
            StrategyOutcome::Fatal(StrategyError::Cancelled)
        ));
        assert!(matches!(
            outcome_for(FetchError::Write(std::io::Error::other("disk full"))),
            StrategyOutcome::Fatal(StrategyError::Write(_))
        ));
        assert!(matches!(
            outcome_for(FetchError::Playlist("no segments".into())),
            StrategyOutcome::Retryable(StrategyError::Transfer(_))
        ));
    }

    #[test]
    fn standard_order_is_fixed() {
        struct Never;
        #[async_trait]
        impl MediaResolver for Never {
            async fn resolve(
                &self,
                _session: &Session,
                entry: &CatalogEntry,
            ) -> Result<MediaReference, crate::models::errors::ExtractionError> {
                Err(crate::models::errors::ExtractionError::NoPlayerFound {
                    lesson: entry.lesson_url.to_string(),
                })
            }
        }
        let kinds: Vec<StrategyKind> = standard(Arc::new(Never), &AppSettings::default())
            .iter()
            .map(|s| s.kind())
            .collect();
        assert_eq!(
            kinds,
            vec![
                StrategyKind::HelperFetch,
                StrategyKind::ReextractFetch,
                StrategyKind::SessionFetch,
                StrategyKind::TokenFetch,
                StrategyKind::BrowserCapture,
            ]
        );
    }

    #[tokio::test]
    async fn token_fetch_needs_a_token() {
        let session = signed_in_session(ScriptedBrowser::new(), fast_settings()).await;
        let dir = tempfile::tempdir().unwrap();
        let outcome = attempt_once(
            &TokenFetch,
            &session,
            reference(session.id(), None),
            &dir.path().join("a.mp4"),
        )
        .await;
        assert!(matches!(outcome, StrategyOutcome::Retryable(StrategyError::NoToken)));
    }

    #[tokio::test]
    async fn token_from_another_session_is_refused() {
        let session = signed_in_session(ScriptedBrowser::new(), fast_settings()).await;
        let dir = tempfile::tempdir().unwrap();
        let token = AuthToken {
            value: "abc".into(),
            placement: TokenPlacement::Query { name: "token".into() },
        };
        let outcome = attempt_once(
            &TokenFetch,
            &session,
            reference(SessionId::new(), Some(token)),
            &dir.path().join("a.mp4"),
        )
        .await;
        assert!(matches!(
            outcome,
            StrategyOutcome::Retryable(StrategyError::ForeignToken(_))
        ));
    }

    #[tokio::test]
    async fn disabled_capture_defers_to_nothing() {
        let session = signed_in_session(ScriptedBrowser::new(), fast_settings()).await;
        let dir = tempfile::tempdir().unwrap();
        let outcome = attempt_once(
            &BrowserCapture::new(false, Duration::from_secs(5)),
            &session,
            reference(session.id(), None),
            &dir.path().join("a.mp4"),
        )
        .await;
        assert!(matches!(
            outcome,
            StrategyOutcome::Retryable(StrategyError::CaptureDisabled)
        ));
    }

    #[tokio::test]
    async fn capture_writes_a_recording_for_assembly() {
        let browser = ScriptedBrowser::new()
            .page(
                format!("{}/lesson/h1", CLUB),
                ScriptedPage::new("<video></video>").on_script(scripts::PLAYER_READY, json!(true)),
            )
            .with_capture(b"webm-bytes".to_vec());
        let session = signed_in_session(browser, fast_settings()).await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("001_Clock Game.mp4");

        let outcome = attempt_once(
            &BrowserCapture::new(true, Duration::from_secs(5)),
            &session,
            reference(session.id(), None),
            &dest,
        )
        .await;

        let StrategyOutcome::Success(Acquired::Recording(path)) = outcome else {
            panic!("expected a recording");
        };
        assert_eq!(path, capture_temp_for(&dest));
        assert_eq!(std::fs::read(&path).unwrap(), b"webm-bytes");
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn capture_without_player_is_retryable() {
        let browser = ScriptedBrowser::new()
            .page(format!("{}/lesson/h1", CLUB), ScriptedPage::new("<p>empty</p>"))
            .with_capture(b"webm-bytes".to_vec());
        let session = signed_in_session(browser, fast_settings()).await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("001_Clock Game.mp4");

        let outcome = attempt_once(
            &BrowserCapture::new(true, Duration::from_secs(5)),
            &session,
            reference(session.id(), None),
            &dest,
        )
        .await;
        assert!(matches!(outcome, StrategyOutcome::Retryable(_)));
        assert!(!capture_temp_for(&dest).exists());
    }

    fn served(stub: &HttpStub, owner: SessionId, token: Option<AuthToken>) -> MediaReference {
        MediaReference {
            source_url: Url::parse(&stub.url("/v/clock.mp4")).unwrap(),
            ..reference(owner, token)
        }
    }

    async fn clock_stub() -> HttpStub {
        HttpStub::serve(vec![
            ("/v/clock.mp4", Reply::ok("video/mp4", b"clock-bytes".to_vec())),
            ("/v/fresh.mp4", Reply::ok("video/mp4", b"fresh-bytes".to_vec())),
        ])
        .await
    }

    #[tokio::test]
    async fn helper_fetch_sends_player_headers_and_query_token() {
        let stub = clock_stub().await;
        let session = signed_in_session(ScriptedBrowser::new(), fast_settings()).await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("001_Clock Game.mp4");

        let outcome = attempt_once(
            &HelperFetch,
            &session,
            served(&stub, session.id(), Some(AuthToken::query("token", "abc"))),
            &dest,
        )
        .await;

        assert!(matches!(outcome, StrategyOutcome::Success(Acquired::File(_))));
        assert_eq!(std::fs::read(&dest).unwrap(), b"clock-bytes");
        let get = stub.gets().pop().unwrap();
        assert_eq!(get.target, "/v/clock.mp4?token=abc");
        assert_eq!(get.header("origin"), Some("https://cf-embed.play.hotmart.com"));
        assert_eq!(get.header("referer"), Some("https://cf-embed.play.hotmart.com/"));
        assert_eq!(
            get.header("user-agent"),
            Some(session.settings().browser.user_agent.as_str())
        );
        assert!(get.header("cookie").unwrap().contains("hmVlcIntegration=tok"));
        assert_eq!(get.header("authorization"), None);
    }

    #[tokio::test]
    async fn helper_fetch_sends_bearer_token_as_header() {
        let stub = clock_stub().await;
        let session = signed_in_session(ScriptedBrowser::new(), fast_settings()).await;
        let dir = tempfile::tempdir().unwrap();

        attempt_once(
            &HelperFetch,
            &session,
            served(&stub, session.id(), Some(AuthToken::bearer("jwt-1"))),
            &dir.path().join("a.mp4"),
        )
        .await;

        let get = stub.gets().pop().unwrap();
        assert_eq!(get.target, "/v/clock.mp4");
        assert_eq!(get.header("authorization"), Some("Bearer jwt-1"));
    }

    #[tokio::test]
    async fn session_fetch_sends_neither_token_nor_referer() {
        let stub = clock_stub().await;
        let session = signed_in_session(ScriptedBrowser::new(), fast_settings()).await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a.mp4");

        let outcome = attempt_once(
            &SessionFetch,
            &session,
            served(&stub, session.id(), Some(AuthToken::bearer("jwt-1"))),
            &dest,
        )
        .await;

        assert!(matches!(outcome, StrategyOutcome::Success(_)));
        let get = stub.gets().pop().unwrap();
        assert_eq!(get.target, "/v/clock.mp4");
        assert_eq!(get.header("authorization"), None);
        assert_eq!(get.header("referer"), None);
        assert_eq!(get.header("origin"), None);
        assert!(get.header("user-agent").is_some());
    }

    #[tokio::test]
    async fn token_fetch_sends_token_without_cookies() {
        let stub = clock_stub().await;
        let session = signed_in_session(ScriptedBrowser::new(), fast_settings()).await;
        let dir = tempfile::tempdir().unwrap();

        let outcome = attempt_once(
            &TokenFetch,
            &session,
            served(&stub, session.id(), Some(AuthToken::bearer("jwt-1"))),
            &dir.path().join("a.mp4"),
        )
        .await;
        assert!(matches!(outcome, StrategyOutcome::Success(_)));
        let get = stub.gets().pop().unwrap();
        assert_eq!(get.header("authorization"), Some("Bearer jwt-1"));
        assert_eq!(get.header("cookie"), None);
        assert_eq!(get.header("referer"), None);

        attempt_once(
            &TokenFetch,
            &session,
            served(&stub, session.id(), Some(AuthToken::query("hdnts", "st=1~hmac=ff"))),
            &dir.path().join("b.mp4"),
        )
        .await;
        let get = stub.gets().pop().unwrap();
        assert_eq!(get.target, "/v/clock.mp4?hdnts=st=1~hmac=ff");
        assert_eq!(get.header("authorization"), None);
        assert_eq!(get.header("cookie"), None);
    }

    /// Hands out a fixed fresh reference and remembers which lookup was used.
    struct Refresher {
        fresh: Option<Url>,
        lookups: Mutex<Vec<Option<usize>>>,
    }

    impl Refresher {
        fn new(fresh: Option<Url>) -> Self {
            Self {
                fresh,
                lookups: Mutex::new(Vec::new()),
            }
        }

        fn answer(&self, session: &Session, entry: &CatalogEntry) -> Result<MediaReference, ExtractionError> {
            match &self.fresh {
                Some(url) => Ok(MediaReference {
                    source_url: url.clone(),
                    ..reference(session.id(), None)
                }),
                None => Err(ExtractionError::NoPlayerFound {
                    lesson: entry.lesson_url.to_string(),
                }),
            }
        }
    }

    #[async_trait]
    impl MediaResolver for Refresher {
        async fn resolve(&self, session: &Session, entry: &CatalogEntry) -> Result<MediaReference, ExtractionError> {
            self.lookups.lock().unwrap().push(None);
            self.answer(session, entry)
        }

        async fn resolve_part(
            &self,
            session: &Session,
            entry: &CatalogEntry,
            part: usize,
        ) -> Result<MediaReference, ExtractionError> {
            self.lookups.lock().unwrap().push(Some(part));
            self.answer(session, entry).map(|m| MediaReference { part: Some(part), ..m })
        }
    }

    #[tokio::test]
    async fn reextract_replaces_the_reference_for_later_strategies() {
        let stub = clock_stub().await;
        let session = signed_in_session(ScriptedBrowser::new(), fast_settings()).await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("001_Clock Game.mp4");
        let fresh = Url::parse(&stub.url("/v/fresh.mp4")).unwrap();
        let resolver = Arc::new(Refresher::new(Some(fresh.clone())));
        let strategy = ReextractFetch::new(resolver.clone());

        let (tx, _rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let entry = lesson();
        let mut cx = StrategyContext {
            session: &session,
            entry: Some(&entry),
            media_ref: reference(session.id(), None),
            destination: &dest,
            progress: tx,
            cancel: &cancel,
        };
        let outcome = strategy.attempt(&mut cx).await;

        assert!(matches!(outcome, StrategyOutcome::Success(Acquired::File(_))));
        assert_eq!(cx.media_ref.source_url, fresh);
        assert_eq!(*resolver.lookups.lock().unwrap(), vec![None]);
        assert_eq!(std::fs::read(&dest).unwrap(), b"fresh-bytes");
        assert_eq!(stub.gets().pop().unwrap().target, "/v/fresh.mp4");
    }

    #[tokio::test]
    async fn reextract_asks_for_the_same_part() {
        let stub = clock_stub().await;
        let session = signed_in_session(ScriptedBrowser::new(), fast_settings()).await;
        let dir = tempfile::tempdir().unwrap();
        let resolver = Arc::new(Refresher::new(Some(Url::parse(&stub.url("/v/fresh.mp4")).unwrap())));
        let stale = MediaReference {
            part: Some(2),
            ..reference(session.id(), None)
        };

        let outcome = attempt_once(
            &ReextractFetch::new(resolver.clone()),
            &session,
            stale,
            &dir.path().join("001_Clock Game_part2.mp4"),
        )
        .await;

        assert!(matches!(outcome, StrategyOutcome::Success(_)));
        assert_eq!(*resolver.lookups.lock().unwrap(), vec![Some(2)]);
    }

    #[tokio::test]
    async fn failed_reextraction_is_retryable() {
        let session = signed_in_session(ScriptedBrowser::new(), fast_settings()).await;
        let dir = tempfile::tempdir().unwrap();
        let outcome = attempt_once(
            &ReextractFetch::new(Arc::new(Refresher::new(None))),
            &session,
            reference(session.id(), None),
            &dir.path().join("a.mp4"),
        )
        .await;
        assert!(matches!(
            outcome,
            StrategyOutcome::Retryable(StrategyError::Reextract(ExtractionError::NoPlayerFound { .. }))
        ));
    }

    #[tokio::test]
    async fn reextract_needs_a_lesson_page() {
        let session = signed_in_session(ScriptedBrowser::new(), fast_settings()).await;
        let dir = tempfile::tempdir().unwrap();
        let resolver = Arc::new(Refresher::new(None));
        let dest = dir.path().join("a.mp4");
        let (tx, _rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let mut cx = StrategyContext {
            session: &session,
            entry: None,
            media_ref: reference(session.id(), None),
            destination: &dest,
            progress: tx,
            cancel: &cancel,
        };

        let outcome = ReextractFetch::new(resolver.clone()).attempt(&mut cx).await;

        assert!(matches!(
            outcome,
            StrategyOutcome::Retryable(StrategyError::NotApplicable(_))
        ));
        assert!(resolver.lookups.lock().unwrap().is_empty());
    }
}
