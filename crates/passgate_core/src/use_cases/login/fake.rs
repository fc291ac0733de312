//! Scripted browser and collaborators for exercising the strategies without an engine.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::config::BrowserSettings;
use crate::entities::{GoogleLoginMethod, SiteId};
use crate::error::Error;
use crate::ports::{
    BrowserEngine, BrowserSession, ElementInfo, MethodPrompt, OauthPrecheck, SystemBrowser,
};

#[derive(Debug, Clone)]
pub struct FakeElement {
    id: String,
    tag: String,
    input_type: Option<String>,
    text: String,
    selectors: Vec<String>,
    visible: bool,
    click_target: Option<String>,
    popup_target: Option<String>,
    enter_target: Option<String>,
    rejects_enter: bool,
    blocks_clicks: bool,
}

impl FakeElement {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            tag: "div".to_string(),
            input_type: None,
            text: String::new(),
            selectors: Vec::new(),
            visible: true,
            click_target: None,
            popup_target: None,
            enter_target: None,
            rejects_enter: false,
            blocks_clicks: false,
        }
    }

    pub fn input(id: &str, input_type: &str) -> Self {
        let mut element = Self::new(id).matching(&format!("input[type='{}']", input_type));
        element.tag = "input".to_string();
        element.input_type = Some(input_type.to_string());
        element
    }

    pub fn button(id: &str, text: &str) -> Self {
        let mut element = Self::new(id).matching("button").with_text(text);
        element.tag = "button".to_string();
        element
    }

    pub fn matching(mut self, selector: &str) -> Self {
        self.selectors.push(selector.to_string());
        self
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn navigates_to(mut self, url: &str) -> Self {
        self.click_target = Some(url.to_string());
        self
    }

    /// Clicking opens `url` in a new page instead of navigating.
    pub fn opens_popup(mut self, url: &str) -> Self {
        self.popup_target = Some(url.to_string());
        self
    }

    /// Real clicks are intercepted, as by an overlay; script clicks still land.
    pub fn behind_overlay(mut self) -> Self {
        self.blocks_clicks = true;
        self
    }

    pub fn on_enter(mut self, url: &str) -> Self {
        self.enter_target = Some(url.to_string());
        self
    }

    pub fn rejects_enter(mut self) -> Self {
        self.rejects_enter = true;
        self
    }

    /// Any part of a comma separated selector group names this element.
    fn matches(&self, selector_group: &str) -> bool {
        selector_group
            .split(',')
            .map(str::trim)
            .any(|part| self.selectors.iter().any(|s| s == part))
    }

    fn info(&self, in_frame: bool) -> ElementInfo {
        ElementInfo {
            handle: self.id.clone(),
            in_frame,
            tag: self.tag.clone(),
            input_type: self.input_type.clone(),
            text: self.text.clone(),
            aria_label: None,
            title: None,
            class: None,
            visible: self.visible,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FakePage {
    url: String,
    title: String,
    content: Option<String>,
    elements: Vec<FakeElement>,
    frame_elements: Vec<FakeElement>,
}

impl FakePage {
    pub fn new(url: &str, title: &str) -> Self {
        Self {
            url: url.to_string(),
            title: title.to_string(),
            content: None,
            elements: Vec::new(),
            frame_elements: Vec::new(),
        }
    }

    pub fn with_element(mut self, element: FakeElement) -> Self {
        self.elements.push(element);
        self
    }

    pub fn with_frame_element(mut self, element: FakeElement) -> Self {
        self.frame_elements.push(element);
        self
    }

    pub fn with_content(mut self, content: &str) -> Self {
        self.content = Some(content.to_string());
        self
    }

    fn element(&self, handle: &str) -> Option<&FakeElement> {
        self.elements
            .iter()
            .chain(self.frame_elements.iter())
            .find(|e| e.id == handle)
    }
}

#[derive(Debug, Default)]
struct BrowserState {
    pages: HashMap<String, FakePage>,
    current_url: Option<String>,
    pending_popup: Option<String>,
    fail_launch: bool,
    launches: usize,
    closed: usize,
    navigations: Vec<String>,
    fills: Vec<(String, String)>,
    clicks: Vec<String>,
    script_clicks: Vec<String>,
    popups: Vec<String>,
    enters: Vec<String>,
}

impl BrowserState {
    fn page(&self) -> Option<&FakePage> {
        self.current_url
            .as_deref()
            .and_then(|url| self.pages.get(url))
    }

    fn activate(&mut self, target: FakeElement) {
        if let Some(url) = target.click_target {
            self.current_url = Some(url);
        }
        if let Some(url) = target.popup_target {
            self.pending_popup = Some(url);
        }
    }

    fn element(&self, handle: &str) -> Result<FakeElement, Error> {
        self.page()
            .and_then(|page| page.element(handle))
            .cloned()
            .ok_or_else(|| Error::Browser(format!("stale element {}", handle)))
    }
}

/// Engine and every session it launches share one scripted state.
#[derive(Clone, Default)]
pub struct FakeBrowser {
    state: Arc<Mutex<BrowserState>>,
}

impl FakeBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, page: FakePage) -> Self {
        self.state
            .lock()
            .unwrap()
            .pages
            .insert(page.url.clone(), page);
        self
    }

    pub fn failing_launch(self) -> Self {
        self.state.lock().unwrap().fail_launch = true;
        self
    }

    /// Move the live page somewhere else, as a user clicking around would.
    pub fn jump_to(&self, url: &str) {
        self.state.lock().unwrap().current_url = Some(url.to_string());
    }

    pub fn launches(&self) -> usize {
        self.state.lock().unwrap().launches
    }

    pub fn closed(&self) -> usize {
        self.state.lock().unwrap().closed
    }

    pub fn navigations(&self) -> Vec<String> {
        self.state.lock().unwrap().navigations.clone()
    }

    pub fn fills(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().fills.clone()
    }

    pub fn clicks(&self) -> Vec<String> {
        self.state.lock().unwrap().clicks.clone()
    }

    pub fn script_clicks(&self) -> Vec<String> {
        self.state.lock().unwrap().script_clicks.clone()
    }

    /// Popup pages the session switched to.
    pub fn popups(&self) -> Vec<String> {
        self.state.lock().unwrap().popups.clone()
    }

    pub fn enters(&self) -> Vec<String> {
        self.state.lock().unwrap().enters.clone()
    }
}

#[async_trait]
impl BrowserEngine for FakeBrowser {
    async fn launch(&self, _settings: &BrowserSettings) -> Result<Box<dyn BrowserSession>, Error> {
        let mut state = self.state.lock().unwrap();
        if state.fail_launch {
            return Err(Error::Browser("executable not found".to_string()));
        }
        state.launches += 1;
        Ok(Box::new(FakeSession {
            state: self.state.clone(),
        }))
    }
}

struct FakeSession {
    state: Arc<Mutex<BrowserState>>,
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn navigate(&mut self, url: &str) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        state.navigations.push(url.to_string());
        state.current_url = Some(url.to_string());
        Ok(())
    }

    async fn wait_for_load(&mut self) -> Result<(), Error> {
        Ok(())
    }

    async fn find_all(&mut self, selector: &str) -> Result<Vec<ElementInfo>, Error> {
        let state = self.state.lock().unwrap();
        Ok(state
            .page()
            .map(|page| {
                page.elements
                    .iter()
                    .filter(|e| e.matches(selector))
                    .map(|e| e.info(false))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn find_in_frames(&mut self, selector: &str) -> Result<Vec<ElementInfo>, Error> {
        let state = self.state.lock().unwrap();
        Ok(state
            .page()
            .map(|page| {
                page.frame_elements
                    .iter()
                    .filter(|e| e.matches(selector))
                    .map(|e| e.info(true))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn fill(&mut self, element: &ElementInfo, value: &str) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        state.element(&element.handle)?;
        state
            .fills
            .push((element.handle.clone(), value.to_string()));
        Ok(())
    }

    async fn click(&mut self, element: &ElementInfo) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let target = state.element(&element.handle)?;
        if target.blocks_clicks {
            return Err(Error::Browser(
                "element is covered by another element".to_string(),
            ));
        }
        state.clicks.push(element.handle.clone());
        state.activate(target);
        Ok(())
    }

    async fn script_click(&mut self, element: &ElementInfo) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let target = state.element(&element.handle)?;
        state.script_clicks.push(element.handle.clone());
        state.activate(target);
        Ok(())
    }

    async fn adopt_new_page(&mut self, _timeout: Duration) -> Result<bool, Error> {
        let mut state = self.state.lock().unwrap();
        match state.pending_popup.take() {
            Some(url) => {
                state.popups.push(url.clone());
                state.current_url = Some(url);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn press_enter(&mut self, element: &ElementInfo) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let target = state.element(&element.handle)?;
        if target.rejects_enter {
            return Err(Error::Browser("element does not accept keys".to_string()));
        }
        state.enters.push(element.handle.clone());
        if let Some(url) = target.enter_target {
            state.current_url = Some(url);
        }
        Ok(())
    }

    async fn current_url(&mut self) -> Result<String, Error> {
        let state = self.state.lock().unwrap();
        Ok(state
            .current_url
            .clone()
            .unwrap_or_else(|| "about:blank".to_string()))
    }

    async fn content(&mut self) -> Result<String, Error> {
        let state = self.state.lock().unwrap();
        Ok(match state.page() {
            Some(page) => page.content.clone().unwrap_or_else(|| {
                format!("<html><head><title>{}</title></head><body></body></html>", page.title)
            }),
            None => String::new(),
        })
    }

    async fn title(&mut self) -> Result<String, Error> {
        let state = self.state.lock().unwrap();
        Ok(state.page().map(|p| p.title.clone()).unwrap_or_default())
    }

    async fn close(&mut self) -> Result<(), Error> {
        self.state.lock().unwrap().closed += 1;
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeSystemBrowser {
    opened: Mutex<Vec<String>>,
}

impl FakeSystemBrowser {
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

impl SystemBrowser for FakeSystemBrowser {
    fn open(&self, url: &str) -> Result<(), Error> {
        self.opened.lock().unwrap().push(url.to_string());
        Ok(())
    }
}

pub struct FakePrecheck(pub Result<bool, &'static str>);

#[async_trait]
impl OauthPrecheck for FakePrecheck {
    async fn uses_google_oauth(&self, _url: &str) -> Result<bool, Error> {
        self.0.map_err(|e| Error::Network(e.to_string()))
    }
}

pub struct FakePrompt(pub Option<GoogleLoginMethod>);

#[async_trait]
impl MethodPrompt for FakePrompt {
    async fn choose_google_method(&self, _site: &SiteId) -> Result<Option<GoogleLoginMethod>, Error> {
        Ok(self.0)
    }
}
