use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{ACCEPT, ORIGIN, REFERER};
use serde::Deserialize;
use url::Url;

use super::auth::Session;
use super::parser;
use crate::browser::{is_truthy, scripts, string_list, BrowserError};
use crate::core::filename;
use crate::core::logging::redact_url;
use crate::models::catalog::CatalogEntry;
use crate::models::errors::ExtractionError;
use crate::models::media::{AuthToken, MediaKind, MediaReference};

const CLASSIFY_TIMEOUT: Duration = Duration::from_secs(15);

/// A media URL found by one probe, with a credential that travels beside it
/// rather than inside it.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub url: Url,
    pub token_hint: Option<AuthToken>,
}

impl Candidate {
    fn parse(raw: &str, token_hint: Option<AuthToken>) -> Option<Self> {
        let url = Url::parse(raw).ok()?;
        matches!(url.scheme(), "http" | "https").then_some(Self { url, token_hint })
    }
}

/// One way of spotting the media URL on a lesson page that already shows its player.
#[async_trait]
pub trait Probe: Send + Sync {
    fn name(&self) -> &'static str;

    async fn probe(&self, session: &Session) -> Result<Option<Candidate>, BrowserError>;
}

/// What a lesson page holds.
#[derive(Debug)]
pub enum LessonMedia {
    Single(MediaReference),
    /// A playlist of this many videos, each resolved on its own.
    Parts(usize),
}

#[async_trait]
pub trait MediaResolver: Send + Sync {
    async fn resolve(
        &self,
        session: &Session,
        entry: &CatalogEntry,
    ) -> Result<MediaReference, ExtractionError>;

    /// Resolves the lesson, or reports how many parts it has when its page
    /// holds a playlist.
    async fn resolve_lesson(
        &self,
        session: &Session,
        entry: &CatalogEntry,
    ) -> Result<LessonMedia, ExtractionError> {
        self.resolve(session, entry).await.map(LessonMedia::Single)
    }

    /// One video of a playlist lesson, counted from 1.
    async fn resolve_part(
        &self,
        session: &Session,
        entry: &CatalogEntry,
        _part: usize,
    ) -> Result<MediaReference, ExtractionError> {
        self.resolve(session, entry).await
    }
}

/// Player configuration serialized into the page's scripts.
pub struct InlineConfigProbe;

#[async_trait]
impl Probe for InlineConfigProbe {
    fn name(&self) -> &'static str {
        "inline_config"
    }

    async fn probe(&self, session: &Session) -> Result<Option<Candidate>, BrowserError> {
        let html = session.context().page_html().await?;
        Ok(parser::inline_candidates(&html)
            .iter()
            .find_map(|raw| Candidate::parse(raw, None)))
    }
}

/// A play endpoint that answers `{"url": ...}` for an embed's video id.
#[derive(Debug, Clone)]
pub struct ApiEndpoint {
    pub name: &'static str,
    /// Everything before `/{video_id}/play`.
    pub base: String,
    /// Sends the embed's JWT as `?jwt=`; skipped when the embed has none.
    pub with_jwt: bool,
}

impl ApiEndpoint {
    pub fn new(name: &'static str, base: impl Into<String>, with_jwt: bool) -> Self {
        Self {
            name,
            base: base.into(),
            with_jwt,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PlayResponse {
    url: Option<String>,
}

/// Asks the video platform's play APIs directly, using the embed's video id
/// and JWT. No navigation; the session's cookies ride along.
pub struct ApiProbe {
    endpoints: Vec<ApiEndpoint>,
}

impl Default for ApiProbe {
    fn default() -> Self {
        Self::new(vec![
            ApiEndpoint::new("embed_jwt", "https://cf-embed.play.hotmart.com/video", true),
            ApiEndpoint::new("player", "https://api-player.hotmart.com/v1/content/video", false),
            ApiEndpoint::new(
                "club",
                "https://api-club.hotmart.com/hot-club-api/rest/v3/content/video",
                false,
            ),
            ApiEndpoint::new("embed", "https://cf-embed.play.hotmart.com/video", false),
        ])
    }
}

impl ApiProbe {
    pub fn new(endpoints: Vec<ApiEndpoint>) -> Self {
        Self { endpoints }
    }

    async fn ask(
        session: &Session,
        endpoint: &ApiEndpoint,
        info: &parser::EmbedInfo,
    ) -> Option<String> {
        let mut url = format!("{}/{}/play", endpoint.base.trim_end_matches('/'), info.video_id);
        if endpoint.with_jwt {
            url = format!("{}?jwt={}", url, urlencoding::encode(info.jwt.as_deref()?));
        }
        let site = &session.settings().site;
        let response = session
            .http_client()
            .get(&url)
            .header(ACCEPT, "application/json")
            .header(ORIGIN, site.embed_origin.as_str())
            .header(REFERER, site.embed_referer())
            .timeout(CLASSIFY_TIMEOUT)
            .send()
            .await;
        let response = match response {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                tracing::debug!("[extract] {} api answered {}", endpoint.name, r.status());
                return None;
            }
            Err(e) => {
                tracing::debug!("[extract] {} api failed: {}", endpoint.name, e.without_url());
                return None;
            }
        };
        match response.json::<PlayResponse>().await {
            Ok(body) => body.url,
            Err(e) => {
                tracing::debug!("[extract] {} api body unreadable: {}", endpoint.name, e.without_url());
                None
            }
        }
    }
}

#[async_trait]
impl Probe for ApiProbe {
    fn name(&self) -> &'static str {
        "api"
    }

    async fn probe(&self, session: &Session) -> Result<Option<Candidate>, BrowserError> {
        let info = match session.context().execute_script(scripts::EMBED_SRC).await? {
            serde_json::Value::String(src) => parser::embed_info(&src),
            _ => None,
        };
        let Some(info) = info else {
            return Ok(None);
        };
        let bearer = info.jwt.clone().map(AuthToken::bearer);
        for endpoint in &self.endpoints {
            if let Some(candidate) = Self::ask(session, endpoint, &info)
                .await
                .and_then(|raw| Candidate::parse(&raw, bearer.clone()))
            {
                tracing::debug!("[extract] {} api answered with a media url", endpoint.name);
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }
}

/// Requests the player makes once it starts. Follows the embed iframe when
/// the player lives on another origin, then watches the network for a while.
pub struct NetworkProbe;

#[async_trait]
impl Probe for NetworkProbe {
    fn name(&self) -> &'static str {
        "network"
    }

    async fn probe(&self, session: &Session) -> Result<Option<Candidate>, BrowserError> {
        let ctx = session.context();
        let timeouts = &session.settings().timeouts;
        let observe = Duration::from_secs(timeouts.network_observe_secs);
        let poll = Duration::from_millis(timeouts.poll_interval_ms);

        let embed = match ctx.execute_script(scripts::EMBED_SRC).await? {
            serde_json::Value::String(src) => {
                let info = parser::embed_info(&src);
                tracing::debug!("[extract] following embed {}", redact_url(&src));
                ctx.navigate(&src).await?;
                info
            }
            _ => None,
        };
        let bearer = embed
            .as_ref()
            .and_then(|e| e.jwt.clone())
            .map(AuthToken::bearer);

        ctx.execute_script(scripts::NETWORK_HOOK).await?;
        let started = ctx.execute_script(scripts::SYNTHETIC_PLAY).await?;
        tracing::debug!("[extract] synthetic play started {}", started);

        let deadline = Instant::now() + observe;
        let seen = loop {
            let urls = string_list(&ctx.execute_script(scripts::NETWORK_COLLECT).await?);
            if parser::has_playlist(&urls) || Instant::now() >= deadline {
                break urls;
            }
            tokio::time::sleep(poll).await;
        };

        if let Some(best) = parser::rank_network_candidates(&seen) {
            return Ok(Candidate::parse(&best, bearer));
        }

        // A CDN token without a playlist request still lets us build the variant URL.
        let token = parser::find_cdn_token(&seen.join("\n"));
        match (embed, token) {
            (Some(info), Some(token)) => Ok(Candidate::parse(
                &parser::construct_manifest_url(&info.video_id, &token),
                bearer,
            )),
            _ => Ok(None),
        }
    }
}

/// `src` attributes on the rendered media element.
pub struct DomAttributeProbe;

#[async_trait]
impl Probe for DomAttributeProbe {
    fn name(&self) -> &'static str {
        "dom_attribute"
    }

    async fn probe(&self, session: &Session) -> Result<Option<Candidate>, BrowserError> {
        let value = session
            .context()
            .execute_script(scripts::DOM_MEDIA_SOURCES)
            .await?;
        Ok(string_list(&value)
            .iter()
            .find_map(|raw| Candidate::parse(raw, None)))
    }
}

/// Resolves lesson pages by running its probes in order; the first usable URL wins.
pub struct PageExtractor {
    probes: Vec<Box<dyn Probe>>,
}

impl Default for PageExtractor {
    fn default() -> Self {
        Self::new(vec![
            Box::new(InlineConfigProbe),
            Box::new(ApiProbe::default()),
            Box::new(NetworkProbe),
            Box::new(DomAttributeProbe),
        ])
    }
}

impl PageExtractor {
    pub fn new(probes: Vec<Box<dyn Probe>>) -> Self {
        Self { probes }
    }

    async fn run_probes(&self, session: &Session, lesson: &str) -> Result<Candidate, ExtractionError> {
        let mut tried = Vec::with_capacity(self.probes.len());
        for probe in &self.probes {
            match probe.probe(session).await {
                Ok(Some(candidate)) => {
                    tracing::info!(
                        "[extract] {} found {}",
                        probe.name(),
                        redact_url(candidate.url.as_str())
                    );
                    return Ok(candidate);
                }
                Ok(None) => tracing::debug!("[extract] {} found nothing", probe.name()),
                Err(BrowserError::Closed) => return Err(BrowserError::Closed.into()),
                Err(e) => tracing::warn!("[extract] {} failed: {}", probe.name(), e),
            }
            tried.push(probe.name().to_string());
        }
        Err(ExtractionError::NoMediaSignal {
            lesson: lesson.to_string(),
            probes: tried,
        })
    }

    /// Opens the lesson page, failing when it bounced to the login form.
    async fn open(&self, session: &Session, lesson: &str) -> Result<(), ExtractionError> {
        let ctx = session.context();
        ctx.navigate(lesson).await?;
        if session.is_login_page(&ctx.current_url().await?) {
            return Err(ExtractionError::SessionExpired {
                lesson: lesson.to_string(),
            });
        }
        session.dismiss_overlays().await?;
        Ok(())
    }

    async fn await_player(&self, session: &Session, lesson: &str) -> Result<(), ExtractionError> {
        let timeouts = &session.settings().timeouts;
        let mounted = session
            .context()
            .wait_for(
                scripts::PLAYER_READY,
                Duration::from_secs(timeouts.player_secs),
                Duration::from_millis(timeouts.poll_interval_ms),
            )
            .await?;
        if !mounted {
            return Err(ExtractionError::NoPlayerFound {
                lesson: lesson.to_string(),
            });
        }
        Ok(())
    }

    async fn part_count(&self, session: &Session) -> Result<usize, ExtractionError> {
        let value = session
            .context()
            .execute_script(scripts::PLAYLIST_PARTS)
            .await?;
        Ok(value.as_u64().unwrap_or(0) as usize)
    }
}

#[async_trait]
impl MediaResolver for PageExtractor {
    async fn resolve(
        &self,
        session: &Session,
        entry: &CatalogEntry,
    ) -> Result<MediaReference, ExtractionError> {
        let lesson = entry.lesson_url.to_string();
        tracing::info!("[extract] resolving {}", entry);
        self.open(session, &lesson).await?;
        self.await_player(session, &lesson).await?;

        let candidate = self.run_probes(session, &lesson).await?;
        let name = filename::lesson_file_name(entry.index, &entry.title, "mp4");
        reference_for(session, candidate, name).await
    }

    async fn resolve_lesson(
        &self,
        session: &Session,
        entry: &CatalogEntry,
    ) -> Result<LessonMedia, ExtractionError> {
        let lesson = entry.lesson_url.to_string();
        tracing::info!("[extract] resolving {}", entry);
        self.open(session, &lesson).await?;
        self.await_player(session, &lesson).await?;

        let parts = self.part_count(session).await?;
        if parts > 1 {
            tracing::info!("[extract] {} is a playlist of {} videos", entry, parts);
            return Ok(LessonMedia::Parts(parts));
        }
        let candidate = self.run_probes(session, &lesson).await?;
        let name = filename::lesson_file_name(entry.index, &entry.title, "mp4");
        reference_for(session, candidate, name)
            .await
            .map(LessonMedia::Single)
    }

    async fn resolve_part(
        &self,
        session: &Session,
        entry: &CatalogEntry,
        part: usize,
    ) -> Result<MediaReference, ExtractionError> {
        let lesson = entry.lesson_url.to_string();
        tracing::info!("[extract] resolving {} part {}", entry, part);
        self.open(session, &lesson).await?;

        let label = format!("{} (part {})", lesson, part);
        if !session.context().click(&scripts::playlist_part(part)).await? {
            return Err(ExtractionError::NoPlayerFound { lesson: label });
        }
        self.await_player(session, &label).await?;

        let candidate = self.run_probes(session, &label).await?;
        let name = filename::lesson_part_file_name(entry.index, &entry.title, part, "mp4");
        let mut media_ref = reference_for(session, candidate, name).await?;
        media_ref.part = Some(part);
        Ok(media_ref)
    }
}

/// A media URL given directly by the user. No page is visited.
pub async fn direct_reference(
    session: &Session,
    url: Url,
    position: usize,
) -> Result<MediaReference, ExtractionError> {
    let stem = url
        .path_segments()
        .and_then(|mut s| s.next_back())
        .and_then(|last| last.rsplit_once('.').map(|(stem, _)| stem.to_string()))
        .unwrap_or_else(|| "media".to_string());
    let name = filename::lesson_file_name(position, &stem, "mp4");
    reference_for(session, Candidate { url, token_hint: None }, name).await
}

async fn reference_for(
    session: &Session,
    candidate: Candidate,
    suggested_name: String,
) -> Result<MediaReference, ExtractionError> {
    let kind = classify(session, &candidate.url).await?;
    let auth_token = parser::extract_token(&candidate.url).or(candidate.token_hint);
    Ok(MediaReference {
        source_url: candidate.url,
        kind,
        auth_token,
        suggested_name,
        part: None,
        session_id: session.id(),
    })
}

/// Extension first; a HEAD request's content type when the path says nothing.
async fn classify(session: &Session, url: &Url) -> Result<MediaKind, ExtractionError> {
    if let Some(kind) = MediaKind::from_url(url) {
        return Ok(kind);
    }
    let ambiguous = || ExtractionError::AmbiguousFormat {
        url: redact_url(url.as_str()),
    };
    let response = session
        .http_client()
        .head(url.clone())
        .timeout(CLASSIFY_TIMEOUT)
        .send()
        .await
        .map_err(|e| {
            tracing::debug!("[extract] HEAD failed: {}", e);
            ambiguous()
        })?;
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(MediaKind::from_content_type)
        .ok_or_else(ambiguous)
}

/// Whether the current page shows a player; used by capture before recording.
pub async fn player_present(session: &Session) -> Result<bool, BrowserError> {
    Ok(is_truthy(
        &session.context().execute_script(scripts::PLAYER_READY).await?,
    ))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::browser::scripted::{ClickEffect, ScriptedBrowser, ScriptedPage};
    use crate::browser::BrowserCookie;
    use crate::models::media::TokenPlacement;
    use crate::models::settings::AppSettings;
    use crate::platforms::hotmart::auth::Credentials;
    use crate::testing::{HttpStub, Reply};

    const CLUB: &str = "https://101karategames.club.hotmart.com";
    const HDNTL: &str = "hdntl=exp=1717000000~acl=/*~data=hdntl~hmac=0a1b2c3d";

    fn entry(hash: &str, title: &str) -> CatalogEntry {
        CatalogEntry {
            index: 4,
            title: title.to_string(),
            lesson_url: Url::parse(&format!("{}/lesson/{}", CLUB, hash)).unwrap(),
        }
    }

    async fn session(browser: ScriptedBrowser) -> Session {
        let mut s = AppSettings::default();
        s.timeouts.login_secs = 0;
        s.timeouts.player_secs = 0;
        s.timeouts.network_observe_secs = 0;
        s.timeouts.poll_interval_ms = 1;
        let browser = browser
            .with_cookie(BrowserCookie::new("hmVlcIntegration", "tok").on_domain(".hotmart.com"));
        let mut session =
            Session::new(Arc::new(browser), Credentials::new("me@x.com", "pw"), Arc::new(s)).unwrap();
        session.login().await.unwrap();
        session
    }

    #[tokio::test]
    async fn inline_config_yields_adaptive_with_token() {
        let page = ScriptedPage::new(
            r#"<html><body><div class="video-player"></div><script>var p = {"src":"https://x/video.m3u8?token=abc"};</script></body></html>"#,
        )
        .on_script(scripts::PLAYER_READY, json!(true));
        let session = session(ScriptedBrowser::new().page(format!("{}/lesson/aaa", CLUB), page)).await;

        let media = PageExtractor::default()
            .resolve(&session, &entry("aaa", "Kihon: Basics"))
            .await
            .unwrap();

        assert_eq!(media.kind, MediaKind::AdaptiveManifest);
        let token = media.auth_token.as_ref().unwrap();
        assert_eq!(token.value, "abc");
        assert_eq!(token.placement, TokenPlacement::Query { name: "token".into() });
        assert_eq!(media.session_id, session.id());
        assert_eq!(media.suggested_name, "004_Kihon꞉ Basics.mp4");
    }

    #[tokio::test]
    async fn network_probe_follows_embed() {
        let embed = "https://cf-embed.play.hotmart.com/embed/V1?jwtToken=eyJ.a.b";
        let lesson = ScriptedPage::new("<html></html>")
            .on_script(scripts::PLAYER_READY, json!(true))
            .on_script(scripts::EMBED_SRC, json!(embed));
        let player = ScriptedPage::new("<html></html>").on_script(
            scripts::NETWORK_COLLECT,
            json!([
                "https://cf-embed.play.hotmart.com/api/config",
                format!("https://vod-akm.play.hotmart.com/video/V1/hls/V1-audio=1-video=2-3.ts?{}", HDNTL),
            ]),
        );
        let browser = ScriptedBrowser::new()
            .page(format!("{}/lesson/bbb", CLUB), lesson)
            .page(embed, player);
        let session = session(browser).await;
        let extractor = PageExtractor::new(vec![Box::new(NetworkProbe), Box::new(DomAttributeProbe)]);

        let media = extractor
            .resolve(&session, &entry("bbb", "Sweep"))
            .await
            .unwrap();

        assert_eq!(
            media.source_url.as_str(),
            format!("https://vod-akm.play.hotmart.com/video/V1/hls/V1-audio=1-video=2.m3u8?{}", HDNTL)
        );
        assert_eq!(media.kind, MediaKind::AdaptiveManifest);
        assert!(matches!(
            media.auth_token.as_ref().unwrap().placement,
            TokenPlacement::Query { ref name } if name == "hdntl"
        ));
    }

    #[tokio::test]
    async fn dom_probe_is_last_resort() {
        let page = ScriptedPage::new("<html></html>")
            .on_script(scripts::PLAYER_READY, json!(true))
            .on_script(scripts::DOM_MEDIA_SOURCES, json!(["https://cdn.x/lesson.mp4"]));
        let session = session(ScriptedBrowser::new().page(format!("{}/lesson/ccc", CLUB), page)).await;

        let media = PageExtractor::default()
            .resolve(&session, &entry("ccc", "Kata"))
            .await
            .unwrap();
        assert_eq!(media.kind, MediaKind::DirectFile);
        assert!(media.auth_token.is_none());
    }

    #[tokio::test]
    async fn all_probes_tried_before_giving_up() {
        let page = ScriptedPage::new("<html></html>").on_script(scripts::PLAYER_READY, json!(true));
        let session = session(ScriptedBrowser::new().page(format!("{}/lesson/ddd", CLUB), page)).await;

        match PageExtractor::default().resolve(&session, &entry("ddd", "Empty")).await {
            Err(ExtractionError::NoMediaSignal { probes, .. }) => {
                assert_eq!(probes, vec!["inline_config", "api", "network", "dom_attribute"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_player_is_reported() {
        let session = session(
            ScriptedBrowser::new().page(format!("{}/lesson/eee", CLUB), ScriptedPage::new("<html></html>")),
        )
        .await;
        assert!(matches!(
            PageExtractor::default().resolve(&session, &entry("eee", "x")).await,
            Err(ExtractionError::NoPlayerFound { .. })
        ));
    }

    #[tokio::test]
    async fn login_redirect_is_session_expiry() {
        let page = ScriptedPage::new("").redirect(format!("{}/login", CLUB));
        let session = session(ScriptedBrowser::new().page(format!("{}/lesson/fff", CLUB), page)).await;
        assert!(matches!(
            PageExtractor::default().resolve(&session, &entry("fff", "x")).await,
            Err(ExtractionError::SessionExpired { .. })
        ));
    }

    fn lesson_with_embed(embed: &str) -> ScriptedPage {
        ScriptedPage::new("<html></html>")
            .on_script(scripts::PLAYER_READY, json!(true))
            .on_script(scripts::EMBED_SRC, json!(embed))
    }

    #[tokio::test]
    async fn play_api_falls_through_to_next_endpoint() {
        let stub = HttpStub::serve(vec![(
            "/player/V1/play",
            Reply::ok(
                "application/json",
                r#"{"url":"https://vod-akm.play.hotmart.com/video/V1/hls/master.m3u8?hdnts=st=1~hmac=ab"}"#,
            ),
        )])
        .await;
        let embed = "https://cf-embed.play.hotmart.com/embed/V1?jwtToken=eyJ.a.b";
        let session = session(
            ScriptedBrowser::new().page(format!("{}/lesson/ggg", CLUB), lesson_with_embed(embed)),
        )
        .await;
        let api = ApiProbe::new(vec![
            ApiEndpoint::new("jwt", stub.url("/jwt"), true),
            ApiEndpoint::new("player", stub.url("/player"), false),
        ]);
        session.context().navigate(&format!("{}/lesson/ggg", CLUB)).await.unwrap();

        let candidate = api.probe(&session).await.unwrap().unwrap();

        assert_eq!(
            candidate.url.as_str(),
            "https://vod-akm.play.hotmart.com/video/V1/hls/master.m3u8?hdnts=st=1~hmac=ab"
        );
        assert_eq!(
            candidate.token_hint.as_ref().map(|t| t.placement.clone()),
            Some(TokenPlacement::Bearer)
        );
        let seen = stub.requests();
        let targets: Vec<&str> = seen.iter().map(|r| r.target.as_str()).collect();
        assert_eq!(targets, vec!["/jwt/V1/play?jwt=eyJ.a.b", "/player/V1/play"]);
        assert_eq!(seen[1].header("accept"), Some("application/json"));
        assert_eq!(seen[1].header("origin"), Some("https://cf-embed.play.hotmart.com"));
        assert_eq!(seen[1].header("referer"), Some("https://cf-embed.play.hotmart.com/"));
    }

    #[tokio::test]
    async fn play_api_needs_an_embed() {
        let stub = HttpStub::serve(vec![("/", Reply::ok("application/json", r#"{"url":"https://x/v.mp4"}"#))]).await;
        let page = ScriptedPage::new("<html></html>").on_script(scripts::PLAYER_READY, json!(true));
        let session = session(ScriptedBrowser::new().page(format!("{}/lesson/hhh", CLUB), page)).await;
        session.context().navigate(&format!("{}/lesson/hhh", CLUB)).await.unwrap();

        let api = ApiProbe::new(vec![ApiEndpoint::new("player", stub.url("/player"), false)]);
        assert!(api.probe(&session).await.unwrap().is_none());
        assert!(stub.requests().is_empty());
    }

    #[tokio::test]
    async fn play_api_skips_jwt_endpoint_without_jwt() {
        let stub = HttpStub::serve(vec![("/embed/V2/play", Reply::ok("application/json", r#"{"url":null}"#))]).await;
        let embed = "https://cf-embed.play.hotmart.com/embed/V2";
        let session = session(
            ScriptedBrowser::new().page(format!("{}/lesson/iii", CLUB), lesson_with_embed(embed)),
        )
        .await;
        session.context().navigate(&format!("{}/lesson/iii", CLUB)).await.unwrap();
        let api = ApiProbe::new(vec![
            ApiEndpoint::new("jwt", stub.url("/jwt"), true),
            ApiEndpoint::new("embed", stub.url("/embed"), false),
        ]);

        assert!(api.probe(&session).await.unwrap().is_none());
        let targets: Vec<String> = stub.requests().into_iter().map(|r| r.target).collect();
        assert_eq!(targets, vec!["/embed/V2/play"]);
    }

    fn playlist_browser() -> ScriptedBrowser {
        let lesson = format!("{}/lesson/jjj", CLUB);
        let part_page = |n: usize| {
            ScriptedPage::new(format!(
                r#"<html><script>var p = {{"src":"https://cdn.x/kata-{}.mp4"}};</script></html>"#,
                n
            ))
            .on_script(scripts::PLAYER_READY, json!(true))
        };
        let click = |n: usize| ClickEffect {
            navigate_to: Some(format!("{}#part{}", lesson, n)),
            ..Default::default()
        };
        ScriptedBrowser::new()
            .page(
                lesson.clone(),
                ScriptedPage::new("<ul><li class='playlist-media'></li><li class='playlist-media'></li></ul>")
                    .on_script(scripts::PLAYER_READY, json!(true))
                    .on_script(scripts::PLAYLIST_PARTS, json!(2))
                    .on_click(scripts::playlist_part(1), click(1))
                    .on_click(scripts::playlist_part(2), click(2)),
            )
            .page(format!("{}#part1", lesson), part_page(1))
            .page(format!("{}#part2", lesson), part_page(2))
    }

    #[tokio::test]
    async fn playlist_lessons_report_their_parts() {
        let session = session(playlist_browser()).await;
        let media = PageExtractor::default()
            .resolve_lesson(&session, &entry("jjj", "Kata"))
            .await
            .unwrap();
        assert!(matches!(media, LessonMedia::Parts(2)));
    }

    #[tokio::test]
    async fn each_part_resolves_to_its_own_video() {
        let session = session(playlist_browser()).await;
        let extractor = PageExtractor::default();

        let second = extractor
            .resolve_part(&session, &entry("jjj", "Kata"), 2)
            .await
            .unwrap();
        assert_eq!(second.source_url.as_str(), "https://cdn.x/kata-2.mp4");
        assert_eq!(second.part, Some(2));
        assert_eq!(second.suggested_name, "004_Kata_part2.mp4");

        assert!(matches!(
            extractor.resolve_part(&session, &entry("jjj", "Kata"), 3).await,
            Err(ExtractionError::NoPlayerFound { .. })
        ));
    }

    #[tokio::test]
    async fn ordinary_lesson_is_single() {
        let page = ScriptedPage::new(r#"<script>var p = {"src":"https://cdn.x/kihon.mp4"};</script>"#)
            .on_script(scripts::PLAYER_READY, json!(true))
            .on_script(scripts::PLAYLIST_PARTS, json!(0));
        let session = session(ScriptedBrowser::new().page(format!("{}/lesson/kkk", CLUB), page)).await;

        match PageExtractor::default().resolve_lesson(&session, &entry("kkk", "Kihon")).await {
            Ok(LessonMedia::Single(media)) => {
                assert_eq!(media.suggested_name, "004_Kihon.mp4");
                assert_eq!(media.part, None);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
