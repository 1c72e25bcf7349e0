use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

const MANIFEST_EXTENSIONS: &[&str] = &["m3u8", "mpd"];
const DIRECT_EXTENSIONS: &[&str] = &["mp4", "m4v", "webm", "mov", "mkv", "mp3", "m4a"];

/// Identity of one live login. Tokens carry the id of the session that captured them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.0.simple().to_string();
        write!(f, "{}", &s[..8])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaKind {
    DirectFile,
    AdaptiveManifest,
}

impl MediaKind {
    /// Classifies by the last path segment's extension. `None` when inconclusive.
    pub fn from_url(url: &Url) -> Option<Self> {
        let last = url.path_segments()?.next_back()?.to_ascii_lowercase();
        let ext = last.rsplit_once('.')?.1.to_string();
        Self::from_extension(&ext)
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.to_ascii_lowercase();
        if MANIFEST_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::AdaptiveManifest)
        } else if DIRECT_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::DirectFile)
        } else {
            None
        }
    }

    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let ct = content_type.to_ascii_lowercase();
        if ct.contains("mpegurl") || ct.contains("dash+xml") {
            Some(Self::AdaptiveManifest)
        } else if ct.starts_with("video/") || ct.starts_with("audio/") {
            Some(Self::DirectFile)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenPlacement {
    Query { name: String },
    Bearer,
}

/// An expiring credential embedded in (or captured alongside) a media URL.
/// Deliberately not `Serialize`.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken {
    pub value: String,
    pub placement: TokenPlacement,
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("placement", &self.placement)
            .field("value", &"<redacted>")
            .finish()
    }
}

impl AuthToken {
    pub fn query(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            placement: TokenPlacement::Query { name: name.into() },
        }
    }

    pub fn bearer(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            placement: TokenPlacement::Bearer,
        }
    }

    /// Returns `url` carrying the token as a query parameter when that is its
    /// placement and the URL does not already have it. The value is appended raw,
    /// since CDN tokens such as `hdntl` must not be form-encoded.
    pub fn apply_to_url(&self, url: &Url) -> Url {
        let TokenPlacement::Query { name } = &self.placement else {
            return url.clone();
        };
        let present = url
            .query()
            .map(|q| q.split('&').any(|kv| kv.split('=').next() == Some(name.as_str())))
            .unwrap_or(false);
        if present {
            return url.clone();
        }
        let mut out = url.clone();
        let pair = format!("{}={}", name, self.value);
        match url.query() {
            Some(q) if !q.is_empty() => out.set_query(Some(&format!("{}&{}", q, pair))),
            _ => out.set_query(Some(&pair)),
        }
        out
    }

    pub fn authorization_header(&self) -> Option<String> {
        match self.placement {
            TokenPlacement::Bearer => Some(format!("Bearer {}", self.value)),
            TokenPlacement::Query { .. } => None,
        }
    }
}

/// Where and how to fetch one lesson's media. Produced once per resolution and
/// never mutated; a stale reference is replaced by re-resolving.
#[derive(Debug, Clone)]
pub struct MediaReference {
    pub source_url: Url,
    pub kind: MediaKind,
    pub auth_token: Option<AuthToken>,
    pub suggested_name: String,
    /// Position within a playlist lesson, from 1. `None` for single-video lessons.
    pub part: Option<usize>,
    pub session_id: SessionId,
}

impl MediaReference {
    /// The token, but only for the session that captured it.
    pub fn token_for(&self, session: SessionId) -> Result<Option<&AuthToken>, SessionId> {
        if self.auth_token.is_some() && self.session_id != session {
            return Err(self.session_id);
        }
        Ok(self.auth_token.as_ref())
    }

    pub fn host(&self) -> String {
        self.source_url.host_str().unwrap_or_default().to_string()
    }

    pub fn short_url(&self) -> String {
        let s = self.source_url.as_str();
        let end = s.find('?').unwrap_or(s.len()).min(80);
        s[..end].to_string()
    }
}
