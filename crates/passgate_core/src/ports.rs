use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{BrowserSettings, Settings};
use crate::entities::{
    CredentialInput, CredentialRecord, GoogleLoginMethod, LoginStatus, LoginStrategy, SiteId,
};
use crate::error::Error;

/// Receives every progress and terminal status of a login attempt.
pub type StatusCallback = Arc<dyn Fn(&LoginStatus) + Send + Sync>;

const SELECTOR_POLL_INTERVAL: Duration = Duration::from_millis(250);

// ============================================================================
// Credential Storage Ports
// ============================================================================

/// Encrypted record store unlocked by a master password.
///
/// Every record operation fails with [`Error::StoreLocked`] until `initialize` succeeded.
pub trait CredentialVault: Send {
    /// Derive and activate the key. Does not read or write records.
    fn initialize(&mut self, master_password: &str) -> Result<(), Error>;

    fn is_unlocked(&self) -> bool;

    /// Replace the in-memory mapping with the decrypted store file.
    fn load(&mut self) -> Result<(), Error>;

    fn save(&self) -> Result<(), Error>;

    fn add_or_update(&mut self, input: CredentialInput) -> Result<CredentialRecord, Error>;

    fn remove(&mut self, site: &SiteId) -> Result<(), Error>;

    fn get(&self, site: &SiteId) -> Result<Option<CredentialRecord>, Error>;

    fn get_all(&self) -> Result<BTreeMap<SiteId, CredentialRecord>, Error>;

    fn get_bonus_sites(&self) -> Result<BTreeMap<SiteId, CredentialRecord>, Error>;

    fn update_last_login(&mut self, site: &SiteId, success: bool) -> Result<(), Error>;

    fn change_password(
        &mut self,
        site: &SiteId,
        new_password: &str,
        new_strategy: Option<LoginStrategy>,
    ) -> Result<(), Error>;

    /// Re-encrypt everything under a key derived from `new_password`.
    /// On failure the old key stays active.
    fn rotate_master_password(&mut self, new_password: &str) -> Result<(), Error>;

    /// Drop the key and every decrypted record.
    fn clear_memory(&mut self);
}

#[async_trait]
pub trait ConfigRepository: Send + Sync {
    async fn load_settings(&self) -> Result<Settings, Error>;
    async fn save_settings(&self, settings: &Settings) -> Result<(), Error>;
    async fn exists(&self) -> bool;
}

// ============================================================================
// Browser Automation Ports
// ============================================================================

/// Element found on the current page, addressed by an engine-assigned handle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElementInfo {
    pub handle: String,
    /// Lives inside a (same-origin) iframe rather than the top document
    pub in_frame: bool,
    pub tag: String,
    pub input_type: Option<String>,
    pub text: String,
    pub aria_label: Option<String>,
    pub title: Option<String>,
    pub class: Option<String>,
    pub visible: bool,
}

impl ElementInfo {
    /// Lowercased text, aria-label and title joined for pattern matching.
    pub fn searchable_text(&self) -> String {
        let mut parts = vec![self.text.as_str()];
        parts.extend(self.aria_label.as_deref());
        parts.extend(self.title.as_deref());
        parts.join(" ").to_lowercase()
    }
}

#[async_trait]
pub trait BrowserEngine: Send + Sync {
    async fn launch(&self, settings: &BrowserSettings) -> Result<Box<dyn BrowserSession>, Error>;
}

/// One live browser page driven by the dispatcher.
#[async_trait]
pub trait BrowserSession: Send {
    async fn navigate(&mut self, url: &str) -> Result<(), Error>;

    /// Wait for the current navigation to settle.
    async fn wait_for_load(&mut self) -> Result<(), Error>;

    /// Elements of the top document matching a CSS selector group, in document order.
    async fn find_all(&mut self, selector: &str) -> Result<Vec<ElementInfo>, Error>;

    /// Elements matching `selector` inside same-origin iframes.
    async fn find_in_frames(&mut self, _selector: &str) -> Result<Vec<ElementInfo>, Error> {
        Ok(Vec::new())
    }

    async fn wait_for_selector(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<ElementInfo, Error> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(found) = self
                .find_all(selector)
                .await?
                .into_iter()
                .find(|e| e.visible)
            {
                return Ok(found);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::Timeout(format!("waiting for {}", selector)));
            }
            tokio::time::sleep(SELECTOR_POLL_INTERVAL).await;
        }
    }

    /// Replace the element's value with `value`.
    async fn fill(&mut self, element: &ElementInfo, value: &str) -> Result<(), Error>;

    async fn click(&mut self, element: &ElementInfo) -> Result<(), Error>;

    /// Fire the element's `click()` from page script, for elements an overlay keeps from
    /// receiving real pointer events.
    async fn script_click(&mut self, element: &ElementInfo) -> Result<(), Error>;

    /// Switch to a page the last action opened (a sign-in popup).
    ///
    /// Gives up with `Ok(false)` once `timeout` passes or the current page navigates instead.
    async fn adopt_new_page(&mut self, _timeout: Duration) -> Result<bool, Error> {
        Ok(false)
    }

    async fn press_enter(&mut self, element: &ElementInfo) -> Result<(), Error>;

    async fn current_url(&mut self) -> Result<String, Error>;

    async fn content(&mut self) -> Result<String, Error>;

    async fn title(&mut self) -> Result<String, Error>;

    async fn close(&mut self) -> Result<(), Error>;
}

/// Opens URLs in the user's default browser. Fire and forget.
pub trait SystemBrowser: Send + Sync {
    fn open(&self, url: &str) -> Result<(), Error>;
}

/// Cheap HTTP look at a login page before any browser is started.
#[async_trait]
pub trait OauthPrecheck: Send + Sync {
    async fn uses_google_oauth(&self, url: &str) -> Result<bool, Error>;
}

/// Asks the user how a Google-gated site should be logged into.
#[async_trait]
pub trait MethodPrompt: Send + Sync {
    /// `Ok(None)` means the user cancelled.
    async fn choose_google_method(&self, site: &SiteId) -> Result<Option<GoogleLoginMethod>, Error>;
}
