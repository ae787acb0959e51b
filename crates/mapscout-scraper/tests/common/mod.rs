//! In-memory [`BrowserSession`] used by the integration tests.
//!
//! Pages are trees of [`Node`]s keyed by URL. Queries match by selector
//! value, so a test builds the tree with the same `Selector` constants the
//! pipeline uses. Every tab keeps its own history stack.

#![allow(dead_code)]

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use mapscout_scraper::{BrowserSession, ContextId, Element, Scope, Selector, SessionError};

#[derive(Debug, Clone)]
pub enum Click {
    /// Loads a URL in the active tab, as a card click does.
    Navigate(String),
    /// Removes every node matching the selector from the current page.
    Remove(Selector),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub text: String,
    pub attrs: Vec<(&'static str, String)>,
    pub visible: bool,
    pub enabled: bool,
    pub children: Vec<(Selector, Node)>,
    pub on_click: Option<Click>,
}

impl Default for Node {
    fn default() -> Self {
        Self {
            text: String::new(),
            attrs: Vec::new(),
            visible: true,
            enabled: true,
            children: Vec::new(),
            on_click: None,
        }
    }
}

impl Node {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn attr(mut self, name: &'static str, value: &str) -> Self {
        self.attrs.push((name, value.to_string()));
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn child(mut self, selector: Selector, node: Node) -> Self {
        self.children.push((selector, node));
        self
    }

    pub fn on_click(mut self, click: Click) -> Self {
        self.on_click = Some(click);
        self
    }

    fn attribute(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_str())
    }

    fn collect<'a>(&'a self, selector: Selector, out: &mut Vec<&'a Node>) {
        for (matched, child) in &self.children {
            if *matched == selector {
                out.push(child);
            }
            child.collect(selector, out);
        }
    }

    fn remove(&mut self, selector: Selector) {
        self.children.retain(|(matched, _)| *matched != selector);
        for (_, child) in &mut self.children {
            child.remove(selector);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Page {
    pub title: String,
    pub root: Node,
    pub frames: Vec<Node>,
    /// Answer of the blank-document check.
    pub blank: bool,
    /// Renders `n` more matches of the selector per feed scroll.
    pub lazy: Option<(Selector, usize)>,
}

impl Page {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            ..Self::default()
        }
    }

    pub fn with(mut self, selector: Selector, node: Node) -> Self {
        self.root.children.push((selector, node));
        self
    }

    pub fn with_frame(mut self, frame: Node) -> Self {
        self.frames.push(frame);
        self
    }

    pub fn lazy(mut self, selector: Selector, per_scroll: usize) -> Self {
        self.lazy = Some((selector, per_scroll));
        self
    }
}

pub struct FakeSession {
    pages: HashMap<String, Page>,
    contexts: Vec<(ContextId, Vec<String>)>,
    active: ContextId,
    frame: Option<usize>,
    next_id: u32,
    scrolls: usize,
    /// Whether `open_context` can create tabs.
    pub isolation: bool,
    /// Switching to any tab but the base one fails.
    pub fail_switch_to_new: bool,
    /// `close_context` fails; only `window.close()` closes a tab.
    pub fail_close: bool,
    /// Visibility checks report a lost session.
    pub fatal_on_visible: bool,
    /// Time `open_context` takes to return.
    pub open_delay: Duration,
    /// `current_url` calls that still report the old page after `go_back`.
    pub back_lag: u32,
    pending_back: Option<u32>,
    pub clicks: Vec<Selector>,
    pub opened: Vec<String>,
    pub navigations: Vec<String>,
}

pub const BASE: &str = "tab-0";

impl FakeSession {
    pub fn new() -> Self {
        let base = ContextId(BASE.to_string());
        Self {
            pages: HashMap::new(),
            contexts: vec![(base.clone(), vec!["about:blank".to_string()])],
            active: base,
            frame: None,
            next_id: 1,
            scrolls: 0,
            isolation: true,
            fail_switch_to_new: false,
            fail_close: false,
            fatal_on_visible: false,
            open_delay: Duration::ZERO,
            back_lag: 0,
            pending_back: None,
            clicks: Vec::new(),
            opened: Vec::new(),
            navigations: Vec::new(),
        }
    }

    pub fn page(mut self, url: &str, page: Page) -> Self {
        self.pages.insert(url.to_string(), page);
        self
    }

    pub fn context_ids(&self) -> Vec<ContextId> {
        self.contexts.iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn active_id(&self) -> ContextId {
        self.active.clone()
    }

    pub fn location(&self) -> Option<String> {
        self.history().ok().and_then(|h| h.last().cloned())
    }

    fn history(&self) -> Result<&Vec<String>, SessionError> {
        self.contexts
            .iter()
            .find(|(id, _)| *id == self.active)
            .map(|(_, history)| history)
            .ok_or_else(|| SessionError::StaleReference(format!("context {} closed", self.active)))
    }

    fn history_mut(&mut self) -> Result<&mut Vec<String>, SessionError> {
        let active = self.active.clone();
        self.contexts
            .iter_mut()
            .find(|(id, _)| *id == active)
            .map(|(_, history)| history)
            .ok_or_else(|| SessionError::StaleReference(format!("context {active} closed")))
    }

    fn pop_history(&mut self) -> Result<(), SessionError> {
        let history = self.history_mut()?;
        if history.len() > 1 {
            history.pop();
        }
        Ok(())
    }

    fn current_page(&self) -> Result<Option<&Page>, SessionError> {
        let url = self.history()?.last().cloned().unwrap_or_default();
        Ok(self.pages.get(&url))
    }

    fn document(&self) -> Result<Option<&Node>, SessionError> {
        let Some(page) = self.current_page()? else {
            return Ok(None);
        };
        Ok(match self.frame {
            None => Some(&page.root),
            Some(index) => page.frames.get(index),
        })
    }

    fn matches(&self, scope: Scope, selector: Selector) -> Result<Vec<&Node>, SessionError> {
        let Some(document) = self.document()? else {
            return Ok(Vec::new());
        };
        let mut base = Vec::new();
        match scope {
            Scope::Document => base.push(document),
            Scope::Within(element) => {
                if let Some(node) = self.resolve(element)? {
                    base.push(node);
                }
            }
        }
        let mut found = Vec::new();
        for node in base {
            node.collect(selector, &mut found);
        }
        if let Some(Some((lazy, per_scroll))) = self.current_page()?.map(|p| p.lazy) {
            if lazy == selector && self.frame.is_none() {
                found.truncate(per_scroll * self.scrolls);
            }
        }
        Ok(found)
    }

    fn resolve(&self, element: Element) -> Result<Option<&Node>, SessionError> {
        Ok(self
            .matches(Scope::Document, element.selector)?
            .get(element.index)
            .copied())
    }

    fn require(&self, element: Element) -> Result<&Node, SessionError> {
        self.resolve(element)?.ok_or_else(|| SessionError::NotFound {
            selector: element.selector.to_string(),
        })
    }
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn active_context(&mut self) -> Result<ContextId, SessionError> {
        Ok(self.active.clone())
    }

    async fn contexts(&mut self) -> Result<Vec<ContextId>, SessionError> {
        Ok(self.context_ids())
    }

    async fn open_context(&mut self, url: &str) -> Result<ContextId, SessionError> {
        if !self.isolation {
            return Err(SessionError::Unsupported("new tabs".to_string()));
        }
        tokio::time::sleep(self.open_delay).await;
        let id = ContextId(format!("tab-{}", self.next_id));
        self.next_id += 1;
        self.contexts.push((id.clone(), vec![url.to_string()]));
        self.opened.push(url.to_string());
        Ok(id)
    }

    async fn switch_context(&mut self, id: &ContextId) -> Result<(), SessionError> {
        if !self.contexts.iter().any(|(known, _)| known == id) {
            return Err(SessionError::StaleReference(format!("unknown context {id}")));
        }
        if self.fail_switch_to_new && id.0 != BASE {
            return Err(SessionError::Script("target detached".to_string()));
        }
        self.active = id.clone();
        self.frame = None;
        Ok(())
    }

    async fn close_context(&mut self, id: &ContextId) -> Result<(), SessionError> {
        if self.fail_close {
            return Err(SessionError::Script("Target.closeTarget failed".to_string()));
        }
        let before = self.contexts.len();
        self.contexts.retain(|(known, _)| known != id);
        if self.contexts.len() == before {
            return Err(SessionError::StaleReference(format!("unknown context {id}")));
        }
        Ok(())
    }

    async fn navigate(&mut self, url: &str) -> Result<(), SessionError> {
        self.frame = None;
        self.scrolls = 0;
        self.navigations.push(url.to_string());
        self.history_mut()?.push(url.to_string());
        Ok(())
    }

    async fn go_back(&mut self) -> Result<(), SessionError> {
        self.frame = None;
        if self.back_lag > 0 {
            self.pending_back = Some(self.back_lag);
            return Ok(());
        }
        self.pop_history()
    }

    async fn current_url(&mut self) -> Result<String, SessionError> {
        if let Some(left) = self.pending_back {
            if left == 0 {
                self.pending_back = None;
                self.pop_history()?;
            } else {
                self.pending_back = Some(left - 1);
            }
        }
        Ok(self.history()?.last().cloned().unwrap_or_default())
    }

    async fn title(&mut self) -> Result<String, SessionError> {
        Ok(self
            .current_page()?
            .map(|p| p.title.clone())
            .unwrap_or_default())
    }

    async fn frame_count(&mut self) -> Result<usize, SessionError> {
        Ok(self.current_page()?.map_or(0, |p| p.frames.len()))
    }

    async fn enter_frame(&mut self, index: usize) -> Result<(), SessionError> {
        if index >= self.current_page()?.map_or(0, |p| p.frames.len()) {
            return Err(SessionError::NotFound {
                selector: format!("iframe[{index}]"),
            });
        }
        self.frame = Some(index);
        Ok(())
    }

    async fn exit_frames(&mut self) -> Result<(), SessionError> {
        self.frame = None;
        Ok(())
    }

    async fn count(&mut self, scope: Scope, selector: Selector) -> Result<usize, SessionError> {
        Ok(self.matches(scope, selector)?.len())
    }

    async fn texts(&mut self, scope: Scope, selector: Selector) -> Result<Vec<String>, SessionError> {
        Ok(self
            .matches(scope, selector)?
            .into_iter()
            .map(|n| n.text.clone())
            .collect())
    }

    async fn attributes(
        &mut self,
        scope: Scope,
        selector: Selector,
        name: &str,
    ) -> Result<Vec<String>, SessionError> {
        Ok(self
            .matches(scope, selector)?
            .into_iter()
            .filter_map(|n| n.attribute(name).map(str::to_string))
            .collect())
    }

    async fn is_visible(&mut self, element: Element) -> Result<bool, SessionError> {
        if self.fatal_on_visible {
            return Err(SessionError::Fatal("websocket closed".to_string()));
        }
        Ok(self.resolve(element)?.is_some_and(|n| n.visible))
    }

    async fn is_enabled(&mut self, element: Element) -> Result<bool, SessionError> {
        Ok(self.require(element)?.enabled)
    }

    async fn click(&mut self, element: Element) -> Result<(), SessionError> {
        let action = self.require(element)?.on_click.clone();
        self.clicks.push(element.selector);
        match action {
            Some(Click::Navigate(url)) => self.history_mut()?.push(url),
            Some(Click::Remove(selector)) => {
                let url = self.history()?.last().cloned().unwrap_or_default();
                if let Some(page) = self.pages.get_mut(&url) {
                    page.root.remove(selector);
                    for frame in &mut page.frames {
                        frame.remove(selector);
                    }
                }
            }
            None => {}
        }
        Ok(())
    }

    async fn scroll_into_view(&mut self, element: Element) -> Result<(), SessionError> {
        self.require(element).map(|_| ())
    }

    async fn scroll_to_end(&mut self, element: Element) -> Result<(), SessionError> {
        self.require(element)?;
        self.scrolls += 1;
        Ok(())
    }

    async fn evaluate(&mut self, script: &str) -> Result<serde_json::Value, SessionError> {
        if script.contains("window.close") {
            let active = self.active.clone();
            self.contexts.retain(|(id, _)| *id != active);
            return Ok(serde_json::Value::Null);
        }
        if script.contains("hasHeading") {
            let blank = self.current_page()?.is_none_or(|p| p.blank);
            return Ok(serde_json::Value::Bool(blank));
        }
        Ok(serde_json::Value::Null)
    }
}
