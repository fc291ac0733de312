//! Shared HTTP client configuration.

use std::time::Duration;

use passgate_core::Error;
use reqwest::Client;

/// Login page fetches give up after this long
pub const PRECHECK_TIMEOUT: Duration = Duration::from_secs(10);

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Desktop browser user agent; some sites serve a stripped page to unknown clients.
pub const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Build the client used to peek at login pages.
///
/// Keeps cookies between redirects so consent and session bounces resolve.
pub fn build_precheck_client() -> Result<Client, Error> {
    Client::builder()
        .cookie_store(true)
        .user_agent(DESKTOP_USER_AGENT)
        .timeout(PRECHECK_TIMEOUT)
        .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
        .build()
        .map_err(|e| Error::Network(format!("failed to create HTTP client: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_precheck_client() {
        assert!(build_precheck_client().is_ok());
    }

    #[test]
    fn test_timeout_constants() {
        assert_eq!(PRECHECK_TIMEOUT, Duration::from_secs(10));
        assert_eq!(DEFAULT_CONNECT_TIMEOUT, Duration::from_secs(10));
    }
}
