use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crypto::DEFAULT_KDF_ITERATIONS;
use crate::entities::GoogleLoginMethod;
use crate::error::Error;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BrowserKind {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub browser: BrowserSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub login: LoginSettings,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct BrowserSettings {
    pub engine: BrowserKind,
    pub headless: bool,
    /// Upper bound for a single navigation or element wait
    pub element_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct StorageSettings {
    /// Directory holding `credentials.enc` and `salt.bin`; platform data dir when unset
    pub data_dir: Option<PathBuf>,
    pub kdf_iterations: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct LoginSettings {
    pub google_login_method: GoogleLoginMethod,
    pub precheck_google_oauth: bool,
    pub post_login_delay_secs: u64,
    pub user_action_timeout_secs: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Settings {
    /// Reject values the rest of the system cannot work with.
    pub fn validate(&self) -> Result<(), Error> {
        if self.browser.element_timeout_secs == 0 {
            return Err(Error::Config(
                "browser.element_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.storage.kdf_iterations == 0 {
            return Err(Error::Config(
                "storage.kdf_iterations must be greater than zero".to_string(),
            ));
        }
        if self.login.user_action_timeout_secs == 0 {
            return Err(Error::Config(
                "login.user_action_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if !LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(Error::Config(format!(
                "log_level must be one of {}, got {}",
                LOG_LEVELS.join(", "),
                self.log_level
            )));
        }
        Ok(())
    }
}

impl BrowserSettings {
    pub fn element_timeout(&self) -> Duration {
        Duration::from_secs(self.element_timeout_secs)
    }
}

impl LoginSettings {
    pub fn post_login_delay(&self) -> Duration {
        Duration::from_secs(self.post_login_delay_secs)
    }

    pub fn user_action_timeout(&self) -> Duration {
        Duration::from_secs(self.user_action_timeout_secs)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            browser: BrowserSettings::default(),
            storage: StorageSettings::default(),
            login: LoginSettings::default(),
            log_level: default_log_level(),
        }
    }
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            engine: BrowserKind::default(),
            headless: false,
            element_timeout_secs: 30,
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: None,
            kdf_iterations: DEFAULT_KDF_ITERATIONS,
        }
    }
}

impl Default for LoginSettings {
    fn default() -> Self {
        Self {
            google_login_method: GoogleLoginMethod::default(),
            precheck_google_oauth: true,
            post_login_delay_secs: 5,
            user_action_timeout_secs: 300,
        }
    }
}
