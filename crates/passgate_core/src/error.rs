use thiserror::Error;

use crate::entities::LoginStage;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid credential: {0}")]
    Validation(String),

    #[error("no credentials stored for {0}")]
    NotFound(String),

    #[error("credential store is locked; initialize it with the master password first")]
    StoreLocked,

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("credential store integrity check failed: {0}")]
    Integrity(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    // =========================================================================
    // Login Errors
    // =========================================================================

    #[error("browser error: {0}")]
    Browser(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("timed out {0}")]
    Timeout(String),

    #[error("login failed at {stage}: {message}")]
    Login { stage: LoginStage, message: String },

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn login(stage: LoginStage, message: impl Into<String>) -> Self {
        Error::Login {
            stage,
            message: message.into(),
        }
    }

    /// Stage a failed attempt should be reported at.
    pub fn stage(&self) -> LoginStage {
        match self {
            Error::Login { stage, .. } => *stage,
            _ => LoginStage::Error,
        }
    }

    /// Message suitable for a status callback; login errors drop the stage prefix.
    pub fn user_message(&self) -> String {
        match self {
            Error::Login { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Tag any error with the stage it happened in, keeping an existing tag.
pub fn at_stage(stage: LoginStage) -> impl FnOnce(Error) -> Error {
    move |err| match err {
        Error::Login { .. } => err,
        other => Error::login(stage, other.to_string()),
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_from_string() {
        let err: Error = String::from("test error").into();
        if let Error::Other(msg) = err {
            assert_eq!(msg, "test error");
        } else {
            panic!("Expected Error::Other");
        }
    }

    #[test]
    fn test_error_from_str() {
        let err: Error = "test error".into();
        assert!(matches!(err, Error::Other(ref msg) if msg == "test error"));
    }

    #[test]
    fn test_error_display_variants() {
        assert_eq!(
            Error::NotFound("example.com".to_string()).to_string(),
            "no credentials stored for example.com"
        );
        assert_eq!(
            Error::Authentication("master password cannot be empty".to_string()).to_string(),
            "authentication failed: master password cannot be empty"
        );
        assert_eq!(
            Error::login(LoginStage::OauthDetected, "Not on Google sign-in page: https://a.test/")
                .to_string(),
            "login failed at oauth_detected: Not on Google sign-in page: https://a.test/"
        );
        assert_eq!(
            Error::Timeout("waiting for input[type='password']".to_string()).to_string(),
            "timed out waiting for input[type='password']"
        );
    }

    #[test]
    fn test_at_stage_tags_untagged_errors() {
        let err = at_stage(LoginStage::Submitting)(Error::Browser("detached".to_string()));
        assert_eq!(err.stage(), LoginStage::Submitting);
        assert_eq!(err.user_message(), "browser error: detached");
    }

    #[test]
    fn test_at_stage_keeps_existing_tag() {
        let original = Error::login(LoginStage::FormDetected, "no password field found");
        let err = at_stage(LoginStage::Checking)(original);
        assert_eq!(err.stage(), LoginStage::FormDetected);
        assert_eq!(err.user_message(), "no password field found");
    }

    #[test]
    fn test_untagged_error_reports_error_stage() {
        assert_eq!(Error::StoreLocked.stage(), LoginStage::Error);
    }
}
