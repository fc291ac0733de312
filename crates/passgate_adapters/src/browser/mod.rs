//! Automation engines behind the `BrowserEngine` port.

use std::sync::Arc;

use async_trait::async_trait;
use passgate_core::config::{BrowserKind, BrowserSettings};
use passgate_core::ports::{BrowserEngine, BrowserSession};
use passgate_core::Error;

#[cfg(feature = "chromium")]
mod chromium;

#[cfg(feature = "chromium")]
pub use chromium::ChromiumEngine;

/// Only Chromium can be driven; other configured engines fail at launch.
pub fn ensure_supported(kind: BrowserKind) -> Result<(), Error> {
    match kind {
        BrowserKind::Chromium => Ok(()),
        BrowserKind::Firefox | BrowserKind::Webkit => Err(Error::Browser(format!(
            "{:?} automation is not supported, set browser.engine = \"chromium\"",
            kind
        ))),
    }
}

/// Engine used when the binary was built without browser automation.
///
/// Form and Google logins fail at launch; the system browser handoff still works.
pub struct UnavailableEngine;

#[async_trait]
impl BrowserEngine for UnavailableEngine {
    async fn launch(&self, settings: &BrowserSettings) -> Result<Box<dyn BrowserSession>, Error> {
        ensure_supported(settings.engine)?;
        Err(Error::Browser(
            "browser automation is not available in this build (enable the chromium feature)"
                .to_string(),
        ))
    }
}

/// The best engine this build offers.
pub fn default_engine() -> Arc<dyn BrowserEngine> {
    #[cfg(feature = "chromium")]
    {
        Arc::new(ChromiumEngine)
    }
    #[cfg(not(feature = "chromium"))]
    {
        Arc::new(UnavailableEngine)
    }
}
