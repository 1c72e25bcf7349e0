use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

use crate::models::media::{AuthToken, MediaKind};

pub const CDN_BASE: &str = "https://vod-akm.play.hotmart.com/video";
const DEFAULT_RENDITION: &str = "audio=2756-video=2292536";

/// Query parameters that carry an expiring credential, most specific first.
const TOKEN_PARAMS: &[&str] = &["hdntl", "hdnts", "token", "jwtToken", "jwt"];

static HDNTL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"hdntl=exp=[0-9]+~acl=/\*~data=hdntl~hmac=[a-f0-9]+").unwrap()
});

static EMBED_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/embed/([A-Za-z0-9_-]+)").unwrap());

static JWT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[?&](?:jwtToken|jwt)=([^&#]+)").unwrap());

static INLINE_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""(?:src|url|file|source|hlsUrl|videoUrl)"\s*:\s*"(https?:(?:\\/|[^"\\])+)""#).unwrap()
});

static SCRIPT_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("script").unwrap());

static NEXT_DATA_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("script#__NEXT_DATA__").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedInfo {
    pub video_id: String,
    pub jwt: Option<String>,
}

/// Finds the expiring token a media URL carries in its query string. The raw
/// value is kept as-is so it can be re-attached verbatim.
pub fn extract_token(url: &Url) -> Option<AuthToken> {
    let query = url.query()?;
    let pairs: Vec<(&str, &str)> = query
        .split('&')
        .filter_map(|kv| kv.split_once('='))
        .collect();
    TOKEN_PARAMS.iter().find_map(|name| {
        pairs
            .iter()
            .find(|(k, v)| k == name && !v.is_empty())
            .map(|(k, v)| AuthToken::query(*k, *v))
    })
}

pub fn unescape_json_url(raw: &str) -> String {
    raw.replace("\\/", "/")
        .replace("\\u0026", "&")
        .replace("\\u003d", "=")
        .replace("&amp;", "&")
}

/// Media URLs declared in the page's inline player configuration, in
/// document order: `__NEXT_DATA__` media assets first, then JSON-style
/// `src`/`url`/`file` keys inside any script.
pub fn inline_candidates(html: &str) -> Vec<String> {
    let doc = Html::parse_document(html);
    let mut out = Vec::new();

    if let Some(el) = doc.select(&NEXT_DATA_SEL).next() {
        let json_text = el.text().collect::<String>();
        if let Ok(data) = serde_json::from_str::<serde_json::Value>(&json_text) {
            if let Some(assets) = data
                .pointer("/props/pageProps/applicationData/mediaAssets")
                .and_then(|a| a.as_array())
            {
                out.extend(
                    assets
                        .iter()
                        .filter_map(|a| a.get("url").and_then(|u| u.as_str()))
                        .map(|s| s.to_string()),
                );
            }
        }
    }

    for script in doc.select(&SCRIPT_SEL) {
        let text = script.text().collect::<String>();
        for cap in INLINE_URL_RE.captures_iter(&text) {
            let url = unescape_json_url(&cap[1]);
            let is_media = Url::parse(&url)
                .ok()
                .and_then(|u| MediaKind::from_url(&u))
                .is_some();
            if is_media && !out.contains(&url) {
                out.push(url);
            }
        }
    }

    out
}

pub fn embed_info(src: &str) -> Option<EmbedInfo> {
    let video_id = EMBED_ID_RE.captures(src)?.get(1)?.as_str().to_string();
    let jwt = JWT_RE
        .captures(src)
        .and_then(|c| c.get(1))
        .map(|m| {
            urlencoding::decode(m.as_str())
                .map(|s| s.into_owned())
                .unwrap_or_else(|_| m.as_str().to_string())
        });
    Some(EmbedInfo { video_id, jwt })
}

/// `hdntl=...` (or `hdnts=...`) pair found anywhere in `text`.
pub fn find_cdn_token(text: &str) -> Option<String> {
    if let Some(m) = HDNTL_RE.find(text) {
        return Some(m.as_str().to_string());
    }
    for name in ["hdntl=", "hdnts="] {
        if let Some(pos) = text.find(name) {
            let rest = &text[pos..];
            let end = rest
                .find(|c: char| c == '&' || c == '"' || c == '\'' || c.is_whitespace())
                .unwrap_or(rest.len());
            if end > name.len() {
                return Some(rest[..end].to_string());
            }
        }
    }
    None
}

pub fn construct_manifest_url(video_id: &str, cdn_token: &str) -> String {
    let token = if cdn_token.starts_with("hdntl=") || cdn_token.starts_with("hdnts=") {
        cdn_token.to_string()
    } else {
        format!("hdntl={}", cdn_token)
    };
    format!(
        "{}/{}/hls/{}-{}.m3u8?{}",
        CDN_BASE, video_id, video_id, DEFAULT_RENDITION, token
    )
}

/// `.../name-12.ts?hdntl=...` becomes `.../name.m3u8?hdntl=...`. Needs a CDN token.
pub fn segment_to_playlist(url: &str) -> Option<String> {
    let path = url.split('?').next()?;
    if !path.ends_with(".ts") {
        return None;
    }
    let token = find_cdn_token(url)?;
    let dash = path.rfind('-')?;
    if dash <= path.rfind('/')? {
        return None;
    }
    Some(format!("{}.m3u8?{}", &path[..dash], token))
}

fn candidate_rank(url: &str) -> Option<(u8, String)> {
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return None;
    }
    let path = url.split('?').next().unwrap_or(url).to_ascii_lowercase();
    if path.ends_with(".m3u8") {
        if path.contains("audio=") || path.contains("video=") {
            return Some((0, url.to_string()));
        }
        if path.contains("master") {
            return Some((1, url.to_string()));
        }
        return Some((2, url.to_string()));
    }
    if path.ends_with(".ts") {
        return segment_to_playlist(url).map(|u| (3, u));
    }
    let parsed = Url::parse(url).ok()?;
    matches!(MediaKind::from_url(&parsed), Some(MediaKind::DirectFile)).then(|| (4, url.to_string()))
}

/// Picks the most useful media URL among observed network requests: a
/// variant playlist, then a master playlist, any playlist, a segment mapped
/// back to its playlist, and finally a direct file.
pub fn rank_network_candidates(urls: &[String]) -> Option<String> {
    urls.iter()
        .filter_map(|u| candidate_rank(u))
        .enumerate()
        .min_by_key(|(order, (rank, _))| (*rank, *order))
        .map(|(_, (_, url))| url)
}

/// Whether `urls` already contain a playlist, so observation can stop early.
pub fn has_playlist(urls: &[String]) -> bool {
    urls.iter()
        .filter_map(|u| candidate_rank(u))
        .any(|(rank, _)| rank <= 1)
}
