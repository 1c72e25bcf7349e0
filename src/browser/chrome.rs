use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::Page;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::Mutex;

use super::{scripts, BrowserCookie, BrowserError, BrowsingContext};
use crate::core::http_client::proxy_server_arg;
use crate::models::settings::AppSettings;

/// A single Chrome tab driven over the DevTools protocol.
pub struct ChromeContext {
    browser: Mutex<Option<Browser>>,
    page: Page,
    handler: tokio::task::JoinHandle<()>,
    op_lock: Mutex<()>,
    closed: AtomicBool,
}

fn cdp<E: std::fmt::Display>(e: E) -> BrowserError {
    BrowserError::Protocol(e.to_string())
}

impl ChromeContext {
    pub async fn launch(settings: &AppSettings) -> Result<Self, BrowserError> {
        let browser_cfg = &settings.browser;
        // Recording evaluates one long-lived promise, so the CDP timeout must outlast it.
        let request_timeout = Duration::from_secs(
            browser_cfg
                .request_timeout_secs
                .max(settings.capture.max_duration_secs + 60),
        );

        let mut builder = BrowserConfig::builder()
            .window_size(browser_cfg.window_width, browser_cfg.window_height)
            .request_timeout(request_timeout)
            .arg("--autoplay-policy=no-user-gesture-required")
            .arg(format!("--user-agent={}", browser_cfg.user_agent));
        if !browser_cfg.headless {
            builder = builder.with_head();
        }
        if let Some(exe) = &browser_cfg.executable {
            builder = builder.chrome_executable(exe);
        }
        if let Some(dir) = &browser_cfg.user_data_dir {
            builder = builder.user_data_dir(dir);
        }
        if let Some(proxy) = proxy_server_arg(&settings.proxy) {
            builder = builder.arg(format!("--proxy-server={}", proxy));
        }
        let config = builder.build().map_err(BrowserError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;
        let handler = tokio::spawn(async move {
            while handler.next().await.is_some() {}
        });
        tracing::info!("[browser] launched (headless: {})", browser_cfg.headless);

        let page = browser.new_page("about:blank").await.map_err(cdp)?;

        Ok(Self {
            browser: Mutex::new(Some(browser)),
            page,
            handler,
            op_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<(), BrowserError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrowserError::Closed);
        }
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> Result<Value, BrowserError> {
        let params = EvaluateParams::builder()
            .expression(script)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(BrowserError::Script)?;
        let result = self
            .page
            .evaluate_expression(params)
            .await
            .map_err(|e| BrowserError::Script(e.to_string()))?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }
}

#[async_trait]
impl BrowsingContext for ChromeContext {
    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        self.ensure_open()?;
        let _guard = self.op_lock.lock().await;
        tracing::debug!("[browser] goto {}", crate::core::logging::redact_url(url));
        self.page.goto(url).await.map_err(cdp)?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        self.ensure_open()?;
        Ok(self.page.url().await.map_err(cdp)?.unwrap_or_default())
    }

    async fn execute_script(&self, script: &str) -> Result<Value, BrowserError> {
        self.ensure_open()?;
        let _guard = self.op_lock.lock().await;
        self.evaluate(script).await
    }

    async fn read_cookies(&self) -> Result<Vec<BrowserCookie>, BrowserError> {
        self.ensure_open()?;
        let cookies = self.page.get_cookies().await.map_err(cdp)?;
        Ok(cookies
            .into_iter()
            .map(|c| BrowserCookie {
                name: c.name,
                value: c.value,
                domain: Some(c.domain),
                path: Some(c.path),
            })
            .collect())
    }

    async fn set_cookies(&self, cookies: &[BrowserCookie]) -> Result<(), BrowserError> {
        self.ensure_open()?;
        let mut params = Vec::with_capacity(cookies.len());
        for c in cookies {
            let mut builder = CookieParam::builder().name(c.name.clone()).value(c.value.clone());
            if let Some(domain) = &c.domain {
                builder = builder.domain(domain.clone());
            }
            if let Some(path) = &c.path {
                builder = builder.path(path.clone());
            }
            params.push(builder.build().map_err(BrowserError::Protocol)?);
        }
        self.page.set_cookies(params).await.map_err(cdp)?;
        Ok(())
    }

    async fn fill(&self, selector: &str, text: &str) -> Result<bool, BrowserError> {
        self.ensure_open()?;
        let _guard = self.op_lock.lock().await;
        let Ok(element) = self.page.find_element(selector).await else {
            return Ok(false);
        };
        element
            .click()
            .await
            .map_err(cdp)?
            .type_str(text)
            .await
            .map_err(cdp)?;
        Ok(true)
    }

    async fn click(&self, selector: &str) -> Result<bool, BrowserError> {
        self.ensure_open()?;
        let _guard = self.op_lock.lock().await;
        let Ok(element) = self.page.find_element(selector).await else {
            return Ok(false);
        };
        element.click().await.map_err(cdp)?;
        Ok(true)
    }

    async fn capture_media_stream(&self, max_duration: Duration) -> Result<Vec<u8>, BrowserError> {
        self.ensure_open()?;
        let _guard = self.op_lock.lock().await;
        let script = scripts::capture_media(max_duration);
        let budget = max_duration + Duration::from_secs(30);
        let value = tokio::time::timeout(budget, self.evaluate(&script))
            .await
            .map_err(|_| BrowserError::Timeout(budget))??;
        let encoded = value
            .as_str()
            .ok_or_else(|| BrowserError::Script("capture returned no data".into()))?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| BrowserError::Script(format!("capture payload: {}", e)))
    }

    async fn close(&self) -> Result<(), BrowserError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut guard = self.browser.lock().await;
        if let Some(mut browser) = guard.take() {
            if let Err(e) = browser.close().await {
                tracing::warn!("[browser] close failed: {}", e);
            }
            let _ = browser.wait().await;
        }
        self.handler.abort();
        tracing::info!("[browser] closed");
        Ok(())
    }
}
