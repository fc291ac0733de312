use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;
use zeroize::Zeroize;

use crate::error::Error;

/// Current time as Unix epoch seconds.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Normalized key of a credential record: trimmed, never ends with `/`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteId(String);

impl SiteId {
    pub fn new(raw: &str) -> Result<Self, Error> {
        let normalized = raw.trim().trim_end_matches('/');
        if normalized.is_empty() {
            return Err(Error::Validation(
                "site identifier cannot be empty".to_string(),
            ));
        }
        Ok(Self(normalized.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// URL to open for this site; bare domains are assumed to be https.
    pub fn login_url(&self) -> Result<Url, Error> {
        let raw = if self.0.contains("://") {
            self.0.clone()
        } else {
            format!("https://{}", self.0)
        };
        Url::parse(&raw).map_err(|e| Error::Validation(format!("invalid site url {}: {}", self.0, e)))
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which login procedure runs for a site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginStrategy {
    Form,
    GoogleOauth,
    SystemBrowserHandoff,
}

impl fmt::Display for LoginStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoginStrategy::Form => write!(f, "form"),
            LoginStrategy::GoogleOauth => write!(f, "google_oauth"),
            LoginStrategy::SystemBrowserHandoff => write!(f, "system_browser_handoff"),
        }
    }
}

impl FromStr for LoginStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "form" => Ok(LoginStrategy::Form),
            "google_oauth" | "google" => Ok(LoginStrategy::GoogleOauth),
            "system_browser_handoff" | "system_browser" => Ok(LoginStrategy::SystemBrowserHandoff),
            other => Err(Error::Validation(format!("unknown login strategy: {}", other))),
        }
    }
}

/// How a Google-gated site is logged into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoogleLoginMethod {
    /// Drive the Google sign-in pages with the automation engine.
    #[serde(alias = "playwright")]
    Automation,
    /// Hand the site to the user's default browser.
    #[default]
    SystemBrowser,
}

impl GoogleLoginMethod {
    pub fn strategy(self) -> LoginStrategy {
        match self {
            GoogleLoginMethod::Automation => LoginStrategy::GoogleOauth,
            GoogleLoginMethod::SystemBrowser => LoginStrategy::SystemBrowserHandoff,
        }
    }
}

impl FromStr for GoogleLoginMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "automation" | "playwright" | "continue_automation" => Ok(GoogleLoginMethod::Automation),
            "system_browser" | "manual_browser" => Ok(GoogleLoginMethod::SystemBrowser),
            other => Err(Error::Validation(format!(
                "unknown google login method: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastLogin {
    /// Unix epoch seconds
    pub timestamp: i64,
    pub success: bool,
}

/// One stored site login. The password only ever exists in memory in plaintext.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub site: SiteId,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub has_bonus: bool,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub login_strategy: Option<LoginStrategy>,
    #[serde(default)]
    pub google_login: bool,
    #[serde(default)]
    pub last_login: Option<LastLogin>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("site", &self.site)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("has_bonus", &self.has_bonus)
            .field("login_strategy", &self.login_strategy)
            .field("google_login", &self.google_login)
            .field("last_login", &self.last_login)
            .finish()
    }
}

impl Drop for CredentialRecord {
    fn drop(&mut self) {
        self.password.zeroize();
    }
}

/// Fields accepted by an upsert.
#[derive(Clone)]
pub struct CredentialInput {
    pub site: String,
    pub username: String,
    pub password: String,
    pub has_bonus: bool,
    pub notes: String,
    pub login_strategy: Option<LoginStrategy>,
    pub google_login: bool,
}

impl CredentialInput {
    pub fn new(site: &str, username: &str, password: &str) -> Self {
        Self {
            site: site.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            has_bonus: false,
            notes: String::new(),
            login_strategy: None,
            google_login: false,
        }
    }

    pub fn with_bonus(mut self, has_bonus: bool) -> Self {
        self.has_bonus = has_bonus;
        self
    }

    pub fn with_notes(mut self, notes: &str) -> Self {
        self.notes = notes.to_string();
        self
    }

    pub fn with_strategy(mut self, strategy: LoginStrategy) -> Self {
        self.login_strategy = Some(strategy);
        self
    }

    pub fn with_google_login(mut self, google_login: bool) -> Self {
        self.google_login = google_login;
        self
    }
}

impl fmt::Debug for CredentialInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialInput")
            .field("site", &self.site)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl Drop for CredentialInput {
    fn drop(&mut self) {
        self.password.zeroize();
    }
}

// ============================================================================
// Login Progress
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginStage {
    Starting,
    Precheck,
    Navigating,
    FormDetected,
    OauthDetected,
    Submitting,
    AwaitingVerification,
    Checking,
    Success,
    Error,
    UserCancelled,
    PromptMissing,
}

impl LoginStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoginStage::Starting => "starting",
            LoginStage::Precheck => "precheck",
            LoginStage::Navigating => "navigating",
            LoginStage::FormDetected => "form_detected",
            LoginStage::OauthDetected => "oauth_detected",
            LoginStage::Submitting => "submitting",
            LoginStage::AwaitingVerification => "awaiting_verification",
            LoginStage::Checking => "checking",
            LoginStage::Success => "success",
            LoginStage::Error => "error",
            LoginStage::UserCancelled => "user_cancelled",
            LoginStage::PromptMissing => "prompt_missing",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LoginStage::Success
                | LoginStage::Error
                | LoginStage::UserCancelled
                | LoginStage::PromptMissing
        )
    }
}

impl fmt::Display for LoginStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Progress or final outcome of one login attempt, as handed to status callbacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginStatus {
    pub site: String,
    pub stage: LoginStage,
    /// `None` while the attempt is still running.
    pub success: Option<bool>,
    pub message: String,
}

impl LoginStatus {
    pub fn progress(site: &str, stage: LoginStage, message: impl Into<String>) -> Self {
        Self {
            site: site.to_string(),
            stage,
            success: None,
            message: message.into(),
        }
    }

    pub fn succeeded(site: &str, message: impl Into<String>) -> Self {
        Self {
            site: site.to_string(),
            stage: LoginStage::Success,
            success: Some(true),
            message: message.into(),
        }
    }

    pub fn failed(site: &str, stage: LoginStage, message: impl Into<String>) -> Self {
        Self {
            site: site.to_string(),
            stage,
            success: Some(false),
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success == Some(true)
    }

    pub fn is_final(&self) -> bool {
        self.success.is_some()
    }
}

/// Unique id of a submitted login attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Read-only view of a tracked login task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginTaskSnapshot {
    pub id: TaskId,
    pub site: SiteId,
    pub stage: LoginStage,
    pub success: Option<bool>,
    pub message: String,
}
