//! Shared fixtures for unit tests.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::browser::scripted::ScriptedBrowser;
use crate::browser::BrowserCookie;
use crate::models::settings::AppSettings;
use crate::platforms::hotmart::{Credentials, Session};

pub const CLUB: &str = "https://101karategames.club.hotmart.com";

/// Defaults with every wait shortened to a single check.
pub fn fast_settings() -> AppSettings {
    let mut s = AppSettings::default();
    s.timeouts.login_secs = 0;
    s.timeouts.catalog_secs = 0;
    s.timeouts.player_secs = 0;
    s.timeouts.network_observe_secs = 0;
    s.timeouts.poll_interval_ms = 1;
    s.auth.backoff_ms = 1;
    s
}

pub fn auth_cookie() -> BrowserCookie {
    BrowserCookie::new("hmVlcIntegration", "tok").on_domain(".hotmart.com")
}

/// A session already holding the club's auth cookie, logged in.
pub async fn signed_in_session(browser: ScriptedBrowser, settings: AppSettings) -> Session {
    let browser = Arc::new(browser.with_cookie(auth_cookie()));
    let mut session = Session::new(browser, Credentials::new("me@x.com", "pw"), Arc::new(settings))
        .expect("session");
    session.login().await.expect("login");
    session
}

/// One request as the stub server saw it. Header names are lowercased.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub method: String,
    pub target: String,
    pub headers: HashMap<String, String>,
}

impl SeenRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|v| v.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl Reply {
    pub fn ok(content_type: &'static str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            content_type,
            body: body.into(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            content_type: "text/plain",
            body: Vec::new(),
        }
    }
}

/// Minimal HTTP/1.1 server on a loopback port. Routes match on path prefix,
/// the first match wins and anything else is a 404. Every request is recorded.
pub struct HttpStub {
    addr: SocketAddr,
    seen: Arc<Mutex<Vec<SeenRequest>>>,
    task: tokio::task::JoinHandle<()>,
}

impl HttpStub {
    pub async fn serve(routes: Vec<(&'static str, Reply)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind stub");
        let addr = listener.local_addr().expect("stub address");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let routes = Arc::new(routes);

        let recorder = seen.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let routes = routes.clone();
                let recorder = recorder.clone();
                tokio::spawn(async move {
                    let _ = answer(stream, &routes, &recorder).await;
                });
            }
        });
        Self { addr, seen, task }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn requests(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }

    /// The GET requests only; downloads also send a HEAD first.
    pub fn gets(&self) -> Vec<SeenRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == "GET")
            .collect()
    }
}

impl Drop for HttpStub {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn answer(
    mut stream: TcpStream,
    routes: &[(&'static str, Reply)],
    seen: &Mutex<Vec<SeenRequest>>,
) -> std::io::Result<()> {
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let head = String::from_utf8_lossy(&buf).into_owned();
    let mut lines = head.split("\r\n");
    let mut first = lines.next().unwrap_or("").split_whitespace();
    let method = first.next().unwrap_or("").to_string();
    let target = first.next().unwrap_or("/").to_string();
    let headers = lines
        .take_while(|l| !l.is_empty())
        .filter_map(|l| l.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();

    let reply = routes
        .iter()
        .find(|(prefix, _)| target.starts_with(prefix))
        .map(|(_, r)| r.clone())
        .unwrap_or_else(|| Reply::status(404));
    seen.lock().unwrap().push(SeenRequest {
        method: method.clone(),
        target,
        headers,
    });

    let mut response = format!(
        "HTTP/1.1 {} Stub\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        reply.status,
        reply.content_type,
        reply.body.len()
    )
    .into_bytes();
    if method != "HEAD" {
        response.extend_from_slice(&reply.body);
    }
    stream.write_all(&response).await?;
    stream.flush().await
}
