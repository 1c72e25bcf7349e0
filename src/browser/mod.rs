pub mod chrome;
pub mod scripted;
pub mod scripts;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use crate::models::errors::BrowserError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserCookie {
    pub name: String,
    pub value: String,
    pub domain: Option<String>,
    pub path: Option<String>,
}

impl BrowserCookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: None,
            path: None,
        }
    }

    pub fn on_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self.path = Some("/".into());
        self
    }
}

/// Capabilities the pipeline needs from a live, authenticated browser page.
/// Callers serialize access: one navigation or script at a time.
#[async_trait]
pub trait BrowsingContext: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), BrowserError>;

    async fn current_url(&self) -> Result<String, BrowserError>;

    /// Evaluates `script` in the page, awaiting promises, and returns its JSON value.
    async fn execute_script(&self, script: &str) -> Result<Value, BrowserError>;

    async fn read_cookies(&self) -> Result<Vec<BrowserCookie>, BrowserError>;

    async fn set_cookies(&self, cookies: &[BrowserCookie]) -> Result<(), BrowserError>;

    /// Plays the page's media element and records what it renders, for at most `max_duration`.
    async fn capture_media_stream(&self, max_duration: Duration) -> Result<Vec<u8>, BrowserError>;

    async fn close(&self) -> Result<(), BrowserError>;

    /// Rendered DOM of the current page.
    async fn page_html(&self) -> Result<String, BrowserError> {
        match self.execute_script(scripts::OUTER_HTML).await? {
            Value::String(html) => Ok(html),
            other => Err(BrowserError::Script(format!("expected page HTML, got {}", other))),
        }
    }

    async fn fill(&self, selector: &str, text: &str) -> Result<bool, BrowserError> {
        let value = self.execute_script(&scripts::fill(selector, text)).await?;
        Ok(is_truthy(&value))
    }

    async fn click(&self, selector: &str) -> Result<bool, BrowserError> {
        let value = self.execute_script(&scripts::click(selector)).await?;
        Ok(is_truthy(&value))
    }

    /// Polls `predicate` every `poll` until it is truthy or `timeout` elapses.
    /// Script errors while the page is still loading count as "not yet".
    async fn wait_for(
        &self,
        predicate: &str,
        timeout: Duration,
        poll: Duration,
    ) -> Result<bool, BrowserError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.execute_script(predicate).await {
                Ok(v) if is_truthy(&v) => return Ok(true),
                Ok(_) | Err(BrowserError::Script(_)) => {}
                Err(e) => return Err(e),
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(poll.min(deadline - now)).await;
        }
    }
}

pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(_) => true,
    }
}

/// Strings found in a JSON array result, ignoring anything else.
pub fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect(),
        Value::String(s) if !s.is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}
