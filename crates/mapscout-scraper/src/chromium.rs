//! Chromium-backed [`BrowserSession`] using chromiumoxide.
//!
//! Every DOM operation is a small script evaluated in the active tab. The
//! script re-resolves its `(selector, index)` target on each call, so there
//! are no remote object handles to go stale between calls.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchMouseEventParams, DispatchMouseEventType, MouseButton,
};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::error::CdpError;
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use crate::error::{ScrapeError, SessionError};
use crate::session::{BrowserSession, ContextId, Element, Scope, Selector};

/// Binary names searched for on `PATH` when no explicit path is configured.
const CHROME_BINARIES: &[&str] = &[
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
];

/// Shared helpers prepended to every DOM script.
const PRELUDE: &str = r"
const frameRoot = (index) => {
  if (index === null) return document;
  try {
    const frame = document.getElementsByTagName('iframe')[index];
    return frame ? frame.contentDocument : null;
  } catch (e) {
    return null;
  }
};
const pick = (base, css, text) => Array.from(base.querySelectorAll(css))
  .filter((e) => text === null || (e.textContent || '').includes(text));
";

/// Browser launch settings.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Explicit binary; auto-detected when `None`.
    pub chrome_path: Option<PathBuf>,
    pub headless: bool,
    /// Interface language passed as `--lang`.
    pub language: String,
    /// Upper bound on a single navigation.
    pub navigation_timeout: Duration,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            chrome_path: None,
            headless: false,
            language: "ja".to_string(),
            navigation_timeout: Duration::from_secs(30),
        }
    }
}

/// Find the Chrome/Chromium binary: the configured path if it exists, then
/// the first well-known binary name on `PATH`.
#[must_use]
pub fn find_chrome(configured: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = configured {
        if path.exists() {
            return Some(path.to_path_buf());
        }
        tracing::warn!(path = %path.display(), "configured Chrome binary does not exist");
    }
    CHROME_BINARIES
        .iter()
        .find_map(|name| which::which(name).ok())
}

fn launch_args(options: &LaunchOptions) -> Vec<String> {
    let mut args = vec![
        format!("--lang={}", options.language),
        "--start-maximized".to_string(),
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-gpu".to_string(),
    ];
    if options.headless {
        args.push("--headless=new".to_string());
    }
    args
}

/// A running browser process and its CDP event loop.
pub struct ChromiumBrowser {
    browser: Arc<Browser>,
    handler: JoinHandle<()>,
    navigation_timeout: Duration,
}

impl ChromiumBrowser {
    /// Launches Chrome with the scraper's flags.
    ///
    /// # Errors
    ///
    /// Returns [`ScrapeError::Launch`] if no binary is found or the process
    /// fails to start.
    pub async fn launch(options: &LaunchOptions) -> Result<Self, ScrapeError> {
        let chrome = find_chrome(options.chrome_path.as_deref()).ok_or_else(|| {
            ScrapeError::Launch(
                "Chrome not found; set MAPSCOUT_CHROME_PATH or install google-chrome".to_string(),
            )
        })?;

        let mut builder = BrowserConfig::builder().chrome_executable(&chrome);
        if !options.headless {
            builder = builder.with_head();
        }
        for arg in launch_args(options) {
            builder = builder.arg(arg);
        }
        let config = builder
            .build()
            .map_err(|e| ScrapeError::Launch(format!("invalid browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| ScrapeError::Launch(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    tracing::debug!(error = %err, "CDP handler event error");
                }
            }
        });

        tracing::info!(chrome = %chrome.display(), headless = options.headless, "browser launched");
        Ok(Self {
            browser: Arc::new(browser),
            handler,
            navigation_timeout: options.navigation_timeout,
        })
    }

    /// Opens a new session with its own base tab.
    ///
    /// # Errors
    ///
    /// Returns [`ScrapeError::Session`] if the tab cannot be created.
    pub async fn session(&self) -> Result<ChromiumSession, ScrapeError> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(map_cdp)?;
        let base = ContextId("tab-1".to_string());
        Ok(ChromiumSession {
            browser: Arc::clone(&self.browser),
            contexts: vec![(base.clone(), page)],
            active: base,
            frame: None,
            next_id: 2,
            navigation_timeout: self.navigation_timeout,
        })
    }

    /// Closes the browser. Sessions must be dropped first.
    ///
    /// # Errors
    ///
    /// Returns [`ScrapeError::Launch`] if sessions still hold the browser.
    pub async fn shutdown(self) -> Result<(), ScrapeError> {
        let Self {
            browser, handler, ..
        } = self;
        let mut browser = Arc::try_unwrap(browser).map_err(|_| {
            ScrapeError::Launch("browser still in use by a session".to_string())
        })?;
        if let Err(err) = browser.close().await {
            tracing::warn!(error = %err, "browser close failed");
        }
        if let Err(err) = browser.wait().await {
            tracing::debug!(error = %err, "waiting for browser exit failed");
        }
        handler.abort();
        Ok(())
    }
}

fn map_cdp(err: CdpError) -> SessionError {
    match err {
        CdpError::Ws(_) | CdpError::ChannelSendError(_) | CdpError::NoResponse => {
            SessionError::Fatal(err.to_string())
        }
        CdpError::Timeout => SessionError::Timeout {
            what: "CDP response".to_string(),
            waited_ms: 0,
        },
        other => SessionError::Script(other.to_string()),
    }
}

/// Points the document at `url` and returns as soon as the request is
/// issued, without waiting for the load.
fn assign_location_script(url: &str) -> String {
    format!("window.location.assign({});", Value::from(url))
}

/// One logical browsing session: a base tab plus any listing tabs it opens.
pub struct ChromiumSession {
    browser: Arc<Browser>,
    contexts: Vec<(ContextId, Page)>,
    active: ContextId,
    /// Index of the entered iframe, if any.
    frame: Option<usize>,
    next_id: u64,
    navigation_timeout: Duration,
}

impl ChromiumSession {
    fn page(&self) -> Result<&Page, SessionError> {
        self.contexts
            .iter()
            .find(|(id, _)| *id == self.active)
            .map(|(_, page)| page)
            .ok_or_else(|| SessionError::StaleReference(format!("context {} is closed", self.active)))
    }

    async fn eval(&self, script: String) -> Result<Value, SessionError> {
        let page = self.page()?;
        let result = page
            .evaluate_expression(EvaluateParams::new(script))
            .await
            .map_err(map_cdp)?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    /// Wraps `body` so it runs with `matches` bound to the elements of
    /// `selector` under `scope`, in the focused document.
    fn dom_script(&self, scope: Scope, selector: Selector, body: &str) -> String {
        let frame = json!(self.frame);
        let within = match scope {
            Scope::Document => Value::Null,
            Scope::Within(el) => json!({
                "css": el.selector.css_part(),
                "text": el.selector.text_part(),
                "index": el.index,
            }),
        };
        let css = json!(selector.css_part());
        let text = json!(selector.text_part());
        format!(
            "(() => {{\n{PRELUDE}\nconst root = frameRoot({frame});\n\
             if (!root) throw new Error('frame is not accessible');\n\
             const within = {within};\n\
             const base = within === null ? root : pick(root, within.css, within.text)[within.index];\n\
             const matches = base ? pick(base, {css}, {text}) : [];\n\
             {body}\n}})()"
        )
    }

    fn element_script(&self, element: Element, body: &str) -> String {
        let body = format!("const e = matches[{}];\n{body}", element.index);
        self.dom_script(Scope::Document, element.selector, &body)
    }

    /// Runs an element action; a `null` result means the element is missing.
    async fn element_action(&self, element: Element, body: &str) -> Result<Value, SessionError> {
        let value = self.eval(self.element_script(element, body)).await?;
        if value.is_null() {
            return Err(SessionError::NotFound {
                selector: element.selector.to_string(),
            });
        }
        Ok(value)
    }

    async fn dispatch_click(&self, x: f64, y: f64) -> Result<(), SessionError> {
        let page = self.page()?;
        let events = [
            (DispatchMouseEventType::MouseMoved, false),
            (DispatchMouseEventType::MousePressed, true),
            (DispatchMouseEventType::MouseReleased, true),
        ];
        for (kind, pressed) in events {
            let mut builder = DispatchMouseEventParams::builder().r#type(kind).x(x).y(y);
            if pressed {
                builder = builder.button(MouseButton::Left).click_count(1);
            }
            let params = builder.build().map_err(SessionError::Script)?;
            page.execute(params).await.map_err(map_cdp)?;
        }
        Ok(())
    }

    /// Drops tabs the browser no longer knows about (closed by script).
    async fn prune_closed(&mut self) -> Result<(), SessionError> {
        let live = self.browser.pages().await.map_err(map_cdp)?;
        self.contexts
            .retain(|(_, page)| live.iter().any(|p| p.target_id() == page.target_id()));
        Ok(())
    }
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn active_context(&mut self) -> Result<ContextId, SessionError> {
        Ok(self.active.clone())
    }

    async fn contexts(&mut self) -> Result<Vec<ContextId>, SessionError> {
        if let Err(err) = self.prune_closed().await {
            if err.is_fatal() {
                return Err(err);
            }
            tracing::debug!(error = %err, "could not refresh the tab list");
        }
        Ok(self.contexts.iter().map(|(id, _)| id.clone()).collect())
    }

    async fn open_context(&mut self, url: &str) -> Result<ContextId, SessionError> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(map_cdp)?;
        let id = ContextId(format!("tab-{}", self.next_id));
        self.next_id += 1;
        self.contexts.push((id.clone(), page.clone()));

        if let Err(err) = page
            .evaluate_expression(EvaluateParams::new(assign_location_script(url)))
            .await
        {
            let err = map_cdp(err);
            if err.is_fatal() {
                return Err(err);
            }
            tracing::debug!(context = %id, error = %err, "listing tab navigation reported an error");
        }
        Ok(id)
    }

    async fn switch_context(&mut self, id: &ContextId) -> Result<(), SessionError> {
        let page = self
            .contexts
            .iter()
            .find(|(known, _)| known == id)
            .map(|(_, page)| page.clone())
            .ok_or_else(|| SessionError::StaleReference(format!("unknown context {id}")))?;
        if let Err(err) = page.bring_to_front().await {
            let err = map_cdp(err);
            if err.is_fatal() {
                return Err(err);
            }
            tracing::debug!(context = %id, error = %err, "bring_to_front failed");
        }
        self.active = id.clone();
        self.frame = None;
        Ok(())
    }

    async fn close_context(&mut self, id: &ContextId) -> Result<(), SessionError> {
        let position = self
            .contexts
            .iter()
            .position(|(known, _)| known == id)
            .ok_or_else(|| SessionError::StaleReference(format!("unknown context {id}")))?;
        let page = self.contexts[position].1.clone();
        page.close().await.map_err(map_cdp)?;
        self.contexts.remove(position);
        if *id == self.active {
            self.frame = None;
        }
        Ok(())
    }

    async fn navigate(&mut self, url: &str) -> Result<(), SessionError> {
        let page = self.page()?.clone();
        self.frame = None;
        match tokio::time::timeout(self.navigation_timeout, page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => Err(map_cdp(err)),
            Err(_) => Err(SessionError::Timeout {
                what: format!("navigation to {url}"),
                waited_ms: u64::try_from(self.navigation_timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    async fn start_navigation(&mut self, url: &str) -> Result<(), SessionError> {
        self.frame = None;
        self.eval(assign_location_script(url)).await.map(|_| ())
    }

    async fn go_back(&mut self) -> Result<(), SessionError> {
        self.frame = None;
        self.eval("history.back()".to_string()).await.map(|_| ())
    }

    async fn current_url(&mut self) -> Result<String, SessionError> {
        let url = self.page()?.url().await.map_err(map_cdp)?;
        Ok(url.unwrap_or_default())
    }

    async fn title(&mut self) -> Result<String, SessionError> {
        let title = self.page()?.get_title().await.map_err(map_cdp)?;
        Ok(title.unwrap_or_default())
    }

    async fn frame_count(&mut self) -> Result<usize, SessionError> {
        let value = self
            .eval("document.getElementsByTagName('iframe').length".to_string())
            .await?;
        Ok(value
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(0))
    }

    async fn enter_frame(&mut self, index: usize) -> Result<(), SessionError> {
        let script = format!(
            "(() => {{\n{PRELUDE}\nreturn frameRoot({index}) !== null;\n}})()"
        );
        match self.eval(script).await? {
            Value::Bool(true) => {
                self.frame = Some(index);
                Ok(())
            }
            _ => Err(SessionError::NotFound {
                selector: format!("iframe[{index}]"),
            }),
        }
    }

    async fn exit_frames(&mut self) -> Result<(), SessionError> {
        self.frame = None;
        Ok(())
    }

    async fn count(&mut self, scope: Scope, selector: Selector) -> Result<usize, SessionError> {
        let value = self
            .eval(self.dom_script(scope, selector, "return matches.length;"))
            .await?;
        Ok(value
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(0))
    }

    async fn texts(
        &mut self,
        scope: Scope,
        selector: Selector,
    ) -> Result<Vec<String>, SessionError> {
        let body = "return matches.map((e) => (e.innerText || e.textContent || '').trim());";
        let value = self.eval(self.dom_script(scope, selector, body)).await?;
        Ok(string_list(&value))
    }

    async fn attributes(
        &mut self,
        scope: Scope,
        selector: Selector,
        name: &str,
    ) -> Result<Vec<String>, SessionError> {
        let body = format!(
            "const name = {};\n\
             return matches\n\
               .map((e) => (name === 'href' && typeof e.href === 'string') ? e.href : e.getAttribute(name))\n\
               .filter((v) => v !== null);",
            json!(name)
        );
        let value = self.eval(self.dom_script(scope, selector, &body)).await?;
        Ok(string_list(&value))
    }

    async fn is_visible(&mut self, element: Element) -> Result<bool, SessionError> {
        let body = "if (!e) return false;\n\
                    const r = e.getBoundingClientRect();\n\
                    const view = e.ownerDocument.defaultView || window;\n\
                    const s = view.getComputedStyle(e);\n\
                    return r.width > 0 && r.height > 0 && s.visibility !== 'hidden' && s.display !== 'none';";
        let value = self.eval(self.element_script(element, body)).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn is_enabled(&mut self, element: Element) -> Result<bool, SessionError> {
        let body = "if (!e) return null;\n\
                    return !e.disabled && e.getAttribute('aria-disabled') !== 'true';";
        let value = self.element_action(element, body).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn click(&mut self, element: Element) -> Result<(), SessionError> {
        if self.frame.is_some() {
            let body = "if (!e) return null;\ne.click();\nreturn true;";
            return self.element_action(element, body).await.map(|_| ());
        }
        let body = "if (!e) return null;\n\
                    e.scrollIntoView({block: 'center'});\n\
                    const r = e.getBoundingClientRect();\n\
                    return {x: r.left + r.width / 2, y: r.top + r.height / 2};";
        let point = self.element_action(element, body).await?;
        let (Some(x), Some(y)) = (point["x"].as_f64(), point["y"].as_f64()) else {
            return Err(SessionError::Script(format!(
                "no click point for {}",
                element.selector
            )));
        };
        self.dispatch_click(x, y).await
    }

    async fn scroll_into_view(&mut self, element: Element) -> Result<(), SessionError> {
        let body = "if (!e) return null;\ne.scrollIntoView({block: 'center'});\nreturn true;";
        self.element_action(element, body).await.map(|_| ())
    }

    async fn scroll_to_end(&mut self, element: Element) -> Result<(), SessionError> {
        let body = "if (!e) return null;\ne.scrollTop = e.scrollHeight;\nreturn true;";
        self.element_action(element, body).await.map(|_| ())
    }

    async fn evaluate(&mut self, script: &str) -> Result<Value, SessionError> {
        self.eval(script.to_string()).await
    }
}

fn string_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}
