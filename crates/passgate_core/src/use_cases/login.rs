use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::config::{BrowserSettings, LoginSettings, Settings};
use crate::entities::{
    CredentialRecord, GoogleLoginMethod, LoginStage, LoginStatus, LoginStrategy,
};
use crate::error::{at_stage, Error};
use crate::ports::{
    BrowserEngine, BrowserSession, ElementInfo, MethodPrompt, OauthPrecheck, StatusCallback,
    SystemBrowser,
};
use crate::use_cases::user_action::{UserActionGate, UserActionWaiter};

mod detect;
mod form;
mod google;
mod handoff;

#[cfg(test)]
pub(crate) mod fake;

const USER_ACTION_POLL: Duration = Duration::from_secs(1);

/// Per-call overrides of how a site is logged into.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoginRequest {
    pub google_login_method: Option<GoogleLoginMethod>,
    /// Ask the user for a method even when the record says otherwise.
    pub force_prompt: bool,
}

/// External collaborators the dispatcher drives.
#[derive(Clone)]
pub struct LoginPorts {
    pub engine: Arc<dyn BrowserEngine>,
    pub system_browser: Arc<dyn SystemBrowser>,
    pub precheck: Option<Arc<dyn OauthPrecheck>>,
    pub prompt: Option<Arc<dyn MethodPrompt>>,
}

/// Forwards stage updates of one attempt to the caller's callback and the log.
pub struct StatusReporter {
    site: String,
    callback: Option<StatusCallback>,
}

impl StatusReporter {
    pub fn new(site: &str, callback: Option<StatusCallback>) -> Self {
        Self {
            site: site.to_string(),
            callback,
        }
    }

    pub fn site(&self) -> &str {
        &self.site
    }

    pub fn progress(&self, stage: LoginStage, message: impl Into<String>) {
        self.emit(&LoginStatus::progress(&self.site, stage, message));
    }

    pub fn emit(&self, status: &LoginStatus) {
        debug!(site = %status.site, stage = %status.stage, success = ?status.success, "{}", status.message);
        if let Some(callback) = &self.callback {
            callback(status);
        }
    }
}

/// What a strategy gets to work with during one attempt.
pub(crate) struct AttemptContext<'a> {
    pub record: &'a CredentialRecord,
    pub reporter: &'a StatusReporter,
    pub gate: &'a UserActionGate,
    pub browser: &'a BrowserSettings,
    pub login: &'a LoginSettings,
}

enum AutomatedFlow {
    Form,
    GoogleOauth,
}

/// Picks a login strategy for a record and runs it.
///
/// Owns at most one automation session, launched on the first automated attempt and
/// shared by every later attempt. Attempts are serialized through it.
pub struct LoginDispatcher {
    ports: LoginPorts,
    gate: Arc<UserActionGate>,
    browser: BrowserSettings,
    login: LoginSettings,
    session: Mutex<Option<Box<dyn BrowserSession>>>,
}

impl LoginDispatcher {
    pub fn new(ports: LoginPorts, gate: Arc<UserActionGate>, settings: &Settings) -> Self {
        Self {
            ports,
            gate,
            browser: settings.browser.clone(),
            login: settings.login.clone(),
            session: Mutex::new(None),
        }
    }

    pub fn user_actions(&self) -> &Arc<UserActionGate> {
        &self.gate
    }

    pub async fn has_session(&self) -> bool {
        self.session.lock().await.is_some()
    }

    /// Resolve which strategy applies to `record`.
    ///
    /// Order: forced prompt, the record's Google flag, the HTTP precheck, then the form.
    #[instrument(skip(self, record, reporter), fields(site = %record.site))]
    pub async fn select_strategy(
        &self,
        record: &CredentialRecord,
        request: &LoginRequest,
        reporter: &StatusReporter,
    ) -> Result<LoginStrategy, Error> {
        if request.force_prompt {
            return self
                .prompt_for_method(record)
                .await
                .map(GoogleLoginMethod::strategy);
        }

        if record.google_login {
            return Ok(self.google_method(record, request).strategy());
        }

        if self.login.precheck_google_oauth {
            if let Some(precheck) = &self.ports.precheck {
                reporter.progress(LoginStage::Precheck, "Checking the login page for Google sign-in");
                let url = record
                    .site
                    .login_url()
                    .map_err(at_stage(LoginStage::Precheck))?;
                match precheck.uses_google_oauth(url.as_str()).await {
                    Ok(true) => {
                        info!("login page uses Google sign-in");
                        return Ok(self.google_method(record, request).strategy());
                    }
                    Ok(false) => {}
                    Err(e) => warn!(error = %e, "Google sign-in precheck failed, assuming form login"),
                }
            }
        }

        Ok(LoginStrategy::Form)
    }

    /// Run one end-to-end login attempt for `record`.
    ///
    /// Success is only ever returned from a strategy that reached its checking stage;
    /// every failing step comes back as [`Error::Login`] tagged with its stage.
    #[instrument(skip(self, record, reporter), fields(site = %record.site))]
    pub async fn execute(
        &self,
        record: &CredentialRecord,
        request: &LoginRequest,
        reporter: &StatusReporter,
    ) -> Result<LoginStatus, Error> {
        let strategy = self.select_strategy(record, request, reporter).await?;
        info!(%strategy, "starting login attempt");

        let ctx = AttemptContext {
            record,
            reporter,
            gate: &self.gate,
            browser: &self.browser,
            login: &self.login,
        };

        match strategy {
            LoginStrategy::Form => self.run_automated(AutomatedFlow::Form, &ctx).await,
            LoginStrategy::GoogleOauth => self.run_automated(AutomatedFlow::GoogleOauth, &ctx).await,
            LoginStrategy::SystemBrowserHandoff => {
                handoff::attempt(self.ports.system_browser.as_ref(), &ctx).await
            }
        }
    }

    /// Close the automation session if one is open.
    pub async fn release_session(&self) -> Result<(), Error> {
        let session = self.session.lock().await.take();
        if let Some(mut session) = session {
            debug!("closing browser session");
            session.close().await?;
        }
        Ok(())
    }

    async fn run_automated(
        &self,
        flow: AutomatedFlow,
        ctx: &AttemptContext<'_>,
    ) -> Result<LoginStatus, Error> {
        let mut guard = self.session.lock().await;
        if guard.is_none() {
            ctx.reporter.progress(LoginStage::Starting, "Launching browser");
            let session = self
                .ports
                .engine
                .launch(&self.browser)
                .await
                .map_err(at_stage(LoginStage::Starting))?;
            *guard = Some(session);
        }
        let session = guard
            .as_mut()
            .ok_or_else(|| Error::login(LoginStage::Starting, "browser session unavailable"))?;

        let outcome = match flow {
            AutomatedFlow::Form => form::attempt(session.as_mut(), ctx).await,
            AutomatedFlow::GoogleOauth => google::attempt(session.as_mut(), ctx).await,
        };

        if matches!(&outcome, Ok(status) if status.is_success()) {
            let delay = self.login.post_login_delay();
            if !delay.is_zero() {
                debug!(delay_secs = delay.as_secs(), "keeping browser open after login");
                tokio::time::sleep(delay).await;
            }
            if let Some(mut session) = guard.take() {
                if let Err(e) = session.close().await {
                    warn!(error = %e, "failed to close browser after login");
                }
            }
        }

        outcome
    }

    fn google_method(&self, record: &CredentialRecord, request: &LoginRequest) -> GoogleLoginMethod {
        let pinned = match record.login_strategy {
            Some(LoginStrategy::GoogleOauth) => Some(GoogleLoginMethod::Automation),
            Some(LoginStrategy::SystemBrowserHandoff) => Some(GoogleLoginMethod::SystemBrowser),
            Some(LoginStrategy::Form) | None => None,
        };
        request
            .google_login_method
            .or(pinned)
            .unwrap_or(self.login.google_login_method)
    }

    async fn prompt_for_method(&self, record: &CredentialRecord) -> Result<GoogleLoginMethod, Error> {
        let prompt = self.ports.prompt.as_ref().ok_or_else(|| {
            Error::login(
                LoginStage::PromptMissing,
                "No prompt is available to choose a login method",
            )
        })?;

        match prompt
            .choose_google_method(&record.site)
            .await
            .map_err(at_stage(LoginStage::PromptMissing))?
        {
            Some(method) => Ok(method),
            None => Err(Error::login(
                LoginStage::UserCancelled,
                "Login cancelled by user",
            )),
        }
    }
}

// ============================================================================
// Helpers shared by the strategies
// ============================================================================

/// First visible element matching `selector`.
pub(crate) async fn first_visible(
    session: &mut dyn BrowserSession,
    selector: &str,
) -> Result<Option<ElementInfo>, Error> {
    Ok(session
        .find_all(selector)
        .await?
        .into_iter()
        .find(|e| e.visible))
}

/// Wait for the page to settle; a slow page is not an error on its own.
pub(crate) async fn settle(session: &mut dyn BrowserSession) {
    if let Err(e) = session.wait_for_load().await {
        debug!(error = %e, "page did not finish loading");
    }
}

/// Pause until the user finishes a manual step.
///
/// Completes on an explicit confirmation, a URL change away from where the pause began,
/// or a page title announcing success. `false` on timeout.
pub(crate) async fn await_user_action(
    session: &mut dyn BrowserSession,
    mut waiter: UserActionWaiter,
    timeout: Duration,
) -> bool {
    let start_url = session.current_url().await.ok();
    let deadline = Instant::now() + timeout;

    loop {
        let now = Instant::now();
        if now >= deadline {
            warn!(timeout_secs = timeout.as_secs(), "timed out waiting for user action");
            return false;
        }
        let tick = USER_ACTION_POLL.min(deadline - now);

        tokio::select! {
            confirmed = waiter.confirmed() => {
                if confirmed {
                    return true;
                }
                tokio::time::sleep(tick).await;
            }
            _ = tokio::time::sleep(tick) => {}
        }

        if let Ok(url) = session.current_url().await {
            if start_url.as_deref().is_some_and(|start| start != url) {
                debug!(%url, "page moved on during user action");
                return true;
            }
        }
        if let Ok(title) = session.title().await {
            let title = title.to_lowercase();
            if title.contains("success") || title.contains("welcome") {
                return true;
            }
        }
    }
}
