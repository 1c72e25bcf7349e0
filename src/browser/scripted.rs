//! In-memory [`BrowsingContext`] replaying scripted pages. Used to drive the
//! pipeline deterministically without a browser.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{scripts, BrowserCookie, BrowserError, BrowsingContext};

#[derive(Debug, Clone, Default)]
pub struct ClickEffect {
    pub navigate_to: Option<String>,
    pub grant_cookies: Vec<BrowserCookie>,
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedPage {
    pub html: String,
    /// `(needle, value)`: a script containing `needle` evaluates to `value`.
    pub scripts: Vec<(String, Value)>,
    pub clicks: Vec<(String, ClickEffect)>,
    /// Navigating here lands on another URL instead, e.g. a login redirect.
    pub redirect_to: Option<String>,
}

impl ScriptedPage {
    pub fn new(html: impl Into<String>) -> Self {
        Self {
            html: html.into(),
            ..Default::default()
        }
    }

    pub fn on_script(mut self, needle: impl Into<String>, value: Value) -> Self {
        self.scripts.push((needle.into(), value));
        self
    }

    pub fn on_click(mut self, selector: impl Into<String>, effect: ClickEffect) -> Self {
        self.clicks.push((selector.into(), effect));
        self
    }

    pub fn redirect(mut self, url: impl Into<String>) -> Self {
        self.redirect_to = Some(url.into());
        self
    }
}

#[derive(Default)]
pub struct ScriptedBrowser {
    pages: HashMap<String, ScriptedPage>,
    current: Mutex<String>,
    cookies: Mutex<Vec<BrowserCookie>>,
    capture: Option<Vec<u8>>,
    navigations: Mutex<Vec<String>>,
    filled: Mutex<Vec<(String, String)>>,
    closed: AtomicBool,
}

impl ScriptedBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: impl Into<String>, page: ScriptedPage) -> Self {
        self.pages.insert(url.into(), page);
        self
    }

    pub fn with_cookie(self, cookie: BrowserCookie) -> Self {
        self.lock_cookies().push(cookie);
        self
    }

    pub fn with_capture(mut self, bytes: Vec<u8>) -> Self {
        self.capture = Some(bytes);
        self
    }

    pub fn navigations(&self) -> Vec<String> {
        self.navigations.lock().map(|n| n.clone()).unwrap_or_default()
    }

    pub fn filled(&self) -> Vec<(String, String)> {
        self.filled.lock().map(|f| f.clone()).unwrap_or_default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn lock_cookies(&self) -> std::sync::MutexGuard<'_, Vec<BrowserCookie>> {
        self.cookies.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn current(&self) -> String {
        self.current
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    fn set_current(&self, url: String) {
        if let Ok(mut c) = self.current.lock() {
            *c = url;
        }
    }

    fn current_page(&self) -> Option<&ScriptedPage> {
        self.pages.get(&self.current())
    }

    fn ensure_open(&self) -> Result<(), BrowserError> {
        if self.is_closed() {
            Err(BrowserError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BrowsingContext for ScriptedBrowser {
    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        self.ensure_open()?;
        if let Ok(mut n) = self.navigations.lock() {
            n.push(url.to_string());
        }
        let landed = self
            .pages
            .get(url)
            .and_then(|p| p.redirect_to.clone())
            .unwrap_or_else(|| url.to_string());
        self.set_current(landed);
        Ok(())
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        self.ensure_open()?;
        Ok(self.current())
    }

    async fn execute_script(&self, script: &str) -> Result<Value, BrowserError> {
        self.ensure_open()?;
        let Some(page) = self.current_page() else {
            return Ok(Value::Null);
        };
        if let Some((_, value)) = page.scripts.iter().find(|(needle, _)| script.contains(needle.as_str())) {
            return Ok(value.clone());
        }
        if script == scripts::OUTER_HTML {
            return Ok(Value::String(page.html.clone()));
        }
        Ok(Value::Null)
    }

    async fn read_cookies(&self) -> Result<Vec<BrowserCookie>, BrowserError> {
        self.ensure_open()?;
        Ok(self.lock_cookies().clone())
    }

    async fn set_cookies(&self, cookies: &[BrowserCookie]) -> Result<(), BrowserError> {
        self.ensure_open()?;
        let mut jar = self.lock_cookies();
        for c in cookies {
            jar.retain(|existing| existing.name != c.name);
            jar.push(c.clone());
        }
        Ok(())
    }

    async fn fill(&self, selector: &str, text: &str) -> Result<bool, BrowserError> {
        self.ensure_open()?;
        if let Ok(mut f) = self.filled.lock() {
            f.push((selector.to_string(), text.to_string()));
        }
        Ok(true)
    }

    async fn click(&self, selector: &str) -> Result<bool, BrowserError> {
        self.ensure_open()?;
        let effect = self
            .current_page()
            .and_then(|p| p.clicks.iter().find(|(s, _)| s == selector))
            .map(|(_, e)| e.clone());
        let Some(effect) = effect else {
            return Ok(false);
        };
        if !effect.grant_cookies.is_empty() {
            self.set_cookies(&effect.grant_cookies).await?;
        }
        if let Some(url) = effect.navigate_to {
            self.set_current(url);
        }
        Ok(true)
    }

    async fn capture_media_stream(&self, _max_duration: Duration) -> Result<Vec<u8>, BrowserError> {
        self.ensure_open()?;
        self.capture
            .clone()
            .ok_or_else(|| BrowserError::Script("no video element to capture".into()))
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn scripts_match_by_needle_and_html_falls_through() {
        let browser = ScriptedBrowser::new().page(
            "https://club/home",
            ScriptedPage::new("<html><body>hi</body></html>").on_script(scripts::CATALOG_READY, json!(true)),
        );
        browser.navigate("https://club/home").await.unwrap();
        assert_eq!(browser.execute_script(scripts::CATALOG_READY).await.unwrap(), json!(true));
        assert!(browser.page_html().await.unwrap().contains("hi"));
        assert_eq!(browser.execute_script("1 + 1").await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn wait_for_times_out_on_falsy_predicate() {
        let browser = ScriptedBrowser::new().page("https://club/home", ScriptedPage::new(""));
        browser.navigate("https://club/home").await.unwrap();
        let ready = browser
            .wait_for(scripts::CATALOG_READY, Duration::from_millis(30), Duration::from_millis(5))
            .await
            .unwrap();
        assert!(!ready);
    }

    #[tokio::test]
    async fn redirect_and_close() {
        let browser = ScriptedBrowser::new()
            .page("https://club/lesson/a", ScriptedPage::new("").redirect("https://club/login"));
        browser.navigate("https://club/lesson/a").await.unwrap();
        assert_eq!(browser.current_url().await.unwrap(), "https://club/login");
        browser.close().await.unwrap();
        assert!(matches!(browser.navigate("https://club").await, Err(BrowserError::Closed)));
    }
}
