//! Page scripts evaluated through [`super::BrowsingContext::execute_script`].

use std::time::Duration;

pub const OUTER_HTML: &str = "document.documentElement.outerHTML";

pub const LOGIN_FORM_READY: &str = r#"!!document.querySelector("input[type='password']")"#;

pub const CATALOG_READY: &str = "document.querySelectorAll('li[data-page-hash]').length > 0";

pub const PLAYER_READY: &str = r#"!!document.querySelector(
    "iframe[src*='play.hotmart.com'], iframe[src*='player'], video, .video-player, [class*='player-container']"
)"#;

pub const CHALLENGE_PRESENT: &str = r#"(() => {
    if (location.href.toLowerCase().includes('captcha')) return true;
    return !!document.querySelector(
        "iframe[src*='captcha'], .g-recaptcha, #captcha, input[autocomplete='one-time-code'], input[name='code']"
    );
})()"#;

pub const LOGIN_ERROR_TEXT: &str = r#"(() => {
    const el = document.querySelector(
        ".alert-danger, .login-error, .error-message, [data-test='login-error'], .form-error"
    );
    return el && el.offsetParent !== null ? (el.innerText || '').trim() : null;
})()"#;

/// Dismisses known overlays and returns how many were handled.
pub const DISMISS_OVERLAYS: &str = r#"(() => {
    let handled = 0;
    const policy = document.querySelector('#hotmart-cookie-policy');
    if (policy) {
        const root = policy.shadowRoot;
        const accept = root && root.querySelector('button.cookie-policy-accept-all');
        if (accept) accept.click();
        policy.style.display = 'none';
        handled++;
    }
    const selectors = [
        '.notification-authorize .btn-notification-hide',
        '.cookie-alert-container-header .cookie-policy-accept-all',
        '#onetrust-accept-btn-handler',
        "button[id*='accept'][id*='cookie']",
        '.cookie-banner button',
        "[class*='modal'] button[aria-label='Close']",
        "[class*='modal'] .btn-close",
    ];
    for (const sel of selectors) {
        document.querySelectorAll(sel).forEach((el) => {
            if (el.offsetParent !== null) {
                el.click();
                handled++;
            }
        });
    }
    return handled;
})()"#;

/// Wraps `fetch` and `XMLHttpRequest.open` so media requests made by the
/// player are recorded in `window.__clubgetRequests`.
pub const NETWORK_HOOK: &str = r#"(() => {
    if (window.__clubgetRequests) return true;
    window.__clubgetRequests = [];
    const record = (u) => {
        try { window.__clubgetRequests.push(String(u && u.url ? u.url : u)); } catch (e) {}
    };
    const origFetch = window.fetch;
    if (origFetch) {
        window.fetch = function (input, init) {
            record(input);
            return origFetch.apply(this, arguments);
        };
    }
    const origOpen = XMLHttpRequest.prototype.open;
    XMLHttpRequest.prototype.open = function (method, url) {
        record(url);
        return origOpen.apply(this, arguments);
    };
    return true;
})()"#;

pub const SYNTHETIC_PLAY: &str = r#"(() => {
    let started = 0;
    document
        .querySelectorAll(".play-button, button[aria-label='Play'], .vjs-big-play-button, [class*='play-btn']")
        .forEach((b) => { b.click(); started++; });
    document.querySelectorAll('video').forEach((v) => {
        v.muted = true;
        const p = v.play();
        if (p && p.catch) p.catch(() => {});
        started++;
    });
    return started;
})()"#;

/// Hooked request URLs plus resource-timing entries, deduplicated.
pub const NETWORK_COLLECT: &str = r#"(() => {
    const seen = new Set(window.__clubgetRequests || []);
    (performance.getEntriesByType('resource') || []).forEach((e) => seen.add(e.name));
    return Array.from(seen);
})()"#;

pub const EMBED_SRC: &str = r#"(() => {
    const f = document.querySelector("iframe[src*='cf-embed.play.hotmart.com'], iframe[src*='play.hotmart.com']");
    return f ? f.src : null;
})()"#;

/// Number of videos in the lesson's playlist; 0 when it has none.
pub const PLAYLIST_PARTS: &str = "document.querySelectorAll('.playlist-media').length";

/// Selector for the `part`-th playlist entry, counted from 1.
pub fn playlist_part(part: usize) -> String {
    format!(".playlist-media:nth-of-type({})", part)
}

pub const DOM_MEDIA_SOURCES: &str = r#"(() => {
    const out = [];
    document.querySelectorAll('video, audio').forEach((v) => {
        if (v.currentSrc) out.push(v.currentSrc);
        if (v.src) out.push(v.src);
        v.querySelectorAll('source[src]').forEach((s) => out.push(s.src));
        const ds = v.getAttribute('data-src');
        if (ds) out.push(new URL(ds, location.href).href);
    });
    return out.filter((u) => /^https?:/.test(u));
})()"#;

pub fn fill(selector: &str, text: &str) -> String {
    format!(
        r#"((sel, text) => {{
    const el = document.querySelector(sel);
    if (!el) return false;
    el.focus();
    el.value = text;
    el.dispatchEvent(new Event('input', {{ bubbles: true }}));
    el.dispatchEvent(new Event('change', {{ bubbles: true }}));
    return true;
}})({}, {})"#,
        js_string(selector),
        js_string(text)
    )
}

pub fn click(selector: &str) -> String {
    format!(
        r#"((sel) => {{
    const el = document.querySelector(sel);
    if (!el) return false;
    el.click();
    return true;
}})({})"#,
        js_string(selector)
    )
}

/// Plays the first `<video>` from the start and records it with
/// `MediaRecorder`, resolving to base64 WebM once playback ends or the cap hits.
pub fn capture_media(max_duration: Duration) -> String {
    format!(
        r#"(async (maxMs) => {{
    const video = document.querySelector('video');
    if (!video) throw new Error('no video element to capture');
    video.muted = true;
    video.currentTime = 0;
    await video.play();
    const stream = video.captureStream ? video.captureStream() : video.mozCaptureStream();
    const recorder = new MediaRecorder(stream, {{ mimeType: 'video/webm' }});
    const chunks = [];
    recorder.ondataavailable = (e) => {{ if (e.data && e.data.size) chunks.push(e.data); }};
    const stopped = new Promise((res) => {{ recorder.onstop = res; }});
    recorder.start(1000);
    const planned = isFinite(video.duration) ? video.duration * 1000 + 1500 : maxMs;
    await new Promise((res) => {{
        const t = setTimeout(res, Math.min(planned, maxMs));
        video.addEventListener('ended', () => {{ clearTimeout(t); res(); }}, {{ once: true }});
    }});
    recorder.stop();
    await stopped;
    const bytes = new Uint8Array(await new Blob(chunks, {{ type: 'video/webm' }}).arrayBuffer());
    let bin = '';
    for (let i = 0; i < bytes.length; i += 0x8000) {{
        bin += String.fromCharCode.apply(null, bytes.subarray(i, i + 0x8000));
    }}
    return btoa(bin);
}})({})"#,
        max_duration.as_millis()
    )
}

fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".into())
}
