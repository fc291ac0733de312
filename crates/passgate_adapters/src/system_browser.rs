use passgate_core::ports::SystemBrowser;
use passgate_core::Error;
use tracing::info;
use url::Url;

/// Hands URLs to the desktop's default browser.
pub struct OpenerSystemBrowser;

/// Only web pages are handed to the desktop; `file:` and custom schemes could launch programs.
pub fn web_url(raw: &str) -> Result<Url, Error> {
    let url = Url::parse(raw).map_err(|e| Error::Validation(format!("invalid url {}: {}", raw, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(Error::Validation(format!(
            "refusing to open {} url in the system browser",
            other
        ))),
    }
}

impl SystemBrowser for OpenerSystemBrowser {
    fn open(&self, url: &str) -> Result<(), Error> {
        let url = web_url(url)?;
        info!(%url, "opening system browser");
        opener::open_browser(url.as_str())
            .map_err(|e| Error::Browser(format!("failed to open system browser: {}", e)))
    }
}
