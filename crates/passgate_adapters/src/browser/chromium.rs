use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::target::TargetId;
use chromiumoxide::Page;
use futures_util::StreamExt;
use passgate_core::config::BrowserSettings;
use passgate_core::ports::{BrowserEngine, BrowserSession, ElementInfo};
use passgate_core::Error;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::ensure_supported;

/// Attribute used to address elements returned by `find_all` in later calls.
const REF_ATTR: &str = "data-passgate-ref";

/// How often `adopt_new_page` re-lists the browser's pages.
const PAGE_POLL_INTERVAL: Duration = Duration::from_millis(250);

const DESCRIBE_JS: &str = r#"
const __passgateDescribe = (el, inFrame) => {
  const top = window.top;
  if (!el.getAttribute('data-passgate-ref')) {
    top.__passgateSeq = (top.__passgateSeq || 0) + 1;
    el.setAttribute('data-passgate-ref', String(top.__passgateSeq));
  }
  const rect = el.getBoundingClientRect();
  const style = el.ownerDocument.defaultView.getComputedStyle(el);
  return {
    handle: el.getAttribute('data-passgate-ref'),
    in_frame: inFrame,
    tag: el.tagName.toLowerCase(),
    input_type: el.getAttribute('type'),
    text: ((el.innerText || el.value || '') + '').trim().slice(0, 200),
    aria_label: el.getAttribute('aria-label'),
    title: el.getAttribute('title'),
    class: el.getAttribute('class'),
    visible: rect.width > 0 && rect.height > 0 && style.visibility !== 'hidden' && style.display !== 'none',
  };
};
const __passgateFrameDocs = () => Array.from(document.querySelectorAll('iframe, frame'))
  .map(f => { try { return f.contentDocument; } catch (e) { return null; } })
  .filter(d => d);
"#;

#[derive(Debug, Deserialize)]
struct ElementRecord {
    handle: String,
    in_frame: bool,
    tag: String,
    input_type: Option<String>,
    text: String,
    aria_label: Option<String>,
    title: Option<String>,
    class: Option<String>,
    visible: bool,
}

impl From<ElementRecord> for ElementInfo {
    fn from(r: ElementRecord) -> Self {
        ElementInfo {
            handle: r.handle,
            in_frame: r.in_frame,
            tag: r.tag,
            input_type: r.input_type,
            text: r.text,
            aria_label: r.aria_label,
            title: r.title,
            class: r.class,
            visible: r.visible,
        }
    }
}

fn browser_err(e: impl std::fmt::Display) -> Error {
    Error::Browser(e.to_string())
}

fn js_string(value: &str) -> Result<String, Error> {
    serde_json::to_string(value).map_err(browser_err)
}

fn ref_selector(element: &ElementInfo) -> String {
    format!("[{}='{}']", REF_ATTR, element.handle)
}

/// Launches a local Chromium over the DevTools protocol.
pub struct ChromiumEngine;

#[async_trait]
impl BrowserEngine for ChromiumEngine {
    #[instrument(skip_all, fields(headless = settings.headless))]
    async fn launch(&self, settings: &BrowserSettings) -> Result<Box<dyn BrowserSession>, Error> {
        ensure_supported(settings.engine)?;

        let mut builder = BrowserConfig::builder().viewport(None);
        if !settings.headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(Error::Browser)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| Error::Browser(format!("failed to launch chromium: {}", e)))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "devtools handler event failed");
                }
            }
        });

        let page = browser.new_page("about:blank").await.map_err(browser_err)?;
        debug!("chromium session ready");
        let known_targets = HashSet::from([page.target_id().clone()]);

        Ok(Box::new(ChromiumSession {
            browser,
            page,
            known_targets,
            handler,
            timeout: settings.element_timeout(),
        }))
    }
}

struct ChromiumSession {
    browser: Browser,
    page: Page,
    /// Pages already seen, so a popup shows up as the one target not in here.
    known_targets: HashSet<TargetId>,
    handler: JoinHandle<()>,
    timeout: Duration,
}

impl ChromiumSession {
    async fn eval<T: serde::de::DeserializeOwned>(&self, script: String) -> Result<T, Error> {
        self.page
            .evaluate(script)
            .await
            .map_err(browser_err)?
            .into_value()
            .map_err(browser_err)
    }

    /// Run `body` against the element behind `element`, searching frames when needed.
    async fn with_element_js(&self, element: &ElementInfo, body: &str) -> Result<(), Error> {
        let selector = js_string(&ref_selector(element))?;
        let script = format!(
            "(() => {{ {describe}
              const docs = [document].concat(__passgateFrameDocs());
              for (const doc of docs) {{
                const el = doc.querySelector({selector});
                if (el) {{ {body} return true; }}
              }}
              return false;
            }})()",
            describe = DESCRIBE_JS,
            selector = selector,
            body = body
        );
        let found: bool = self.eval(script).await?;
        if found {
            Ok(())
        } else {
            Err(Error::Browser(format!("stale element {}", element.handle)))
        }
    }
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn navigate(&mut self, url: &str) -> Result<(), Error> {
        match tokio::time::timeout(self.timeout, self.page.goto(url)).await {
            Ok(result) => result.map(|_| ()).map_err(browser_err),
            Err(_) => Err(Error::Timeout(format!("loading {}", url))),
        }
    }

    async fn wait_for_load(&mut self) -> Result<(), Error> {
        match tokio::time::timeout(self.timeout, self.page.wait_for_navigation()).await {
            Ok(result) => result.map(|_| ()).map_err(browser_err),
            Err(_) => Err(Error::Timeout("waiting for page load".to_string())),
        }
    }

    async fn find_all(&mut self, selector: &str) -> Result<Vec<ElementInfo>, Error> {
        let script = format!(
            "(() => {{ {describe}
              return Array.from(document.querySelectorAll({selector}))
                .map(el => __passgateDescribe(el, false));
            }})()",
            describe = DESCRIBE_JS,
            selector = js_string(selector)?
        );
        let records: Vec<ElementRecord> = self.eval(script).await?;
        Ok(records.into_iter().map(ElementInfo::from).collect())
    }

    async fn find_in_frames(&mut self, selector: &str) -> Result<Vec<ElementInfo>, Error> {
        let script = format!(
            "(() => {{ {describe}
              return __passgateFrameDocs()
                .flatMap(doc => Array.from(doc.querySelectorAll({selector})))
                .map(el => __passgateDescribe(el, true));
            }})()",
            describe = DESCRIBE_JS,
            selector = js_string(selector)?
        );
        let records: Vec<ElementRecord> = self.eval(script).await?;
        Ok(records.into_iter().map(ElementInfo::from).collect())
    }

    async fn fill(&mut self, element: &ElementInfo, value: &str) -> Result<(), Error> {
        if element.in_frame {
            let body = format!(
                "el.focus(); el.value = {};
                 el.dispatchEvent(new Event('input', {{ bubbles: true }}));
                 el.dispatchEvent(new Event('change', {{ bubbles: true }}));",
                js_string(value)?
            );
            return self.with_element_js(element, &body).await;
        }

        self.with_element_js(element, "el.value = '';").await?;
        let target = self
            .page
            .find_element(ref_selector(element))
            .await
            .map_err(browser_err)?;
        target.click().await.map_err(browser_err)?;
        target.type_str(value).await.map_err(browser_err)?;
        Ok(())
    }

    async fn click(&mut self, element: &ElementInfo) -> Result<(), Error> {
        if element.in_frame {
            return self.with_element_js(element, "el.click();").await;
        }
        let target = self
            .page
            .find_element(ref_selector(element))
            .await
            .map_err(browser_err)?;
        target.click().await.map_err(browser_err)?;
        Ok(())
    }

    async fn script_click(&mut self, element: &ElementInfo) -> Result<(), Error> {
        self.with_element_js(element, "el.scrollIntoView({block: 'center'}); el.click();")
            .await
    }

    #[instrument(skip(self))]
    async fn adopt_new_page(&mut self, timeout: Duration) -> Result<bool, Error> {
        let start_url = self.page.url().await.map_err(browser_err)?;
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let pages = self.browser.pages().await.map_err(browser_err)?;
            let fresh = pages
                .into_iter()
                .find(|p| !self.known_targets.contains(p.target_id()));
            if let Some(popup) = fresh {
                self.known_targets.insert(popup.target_id().clone());
                if let Err(e) = popup.bring_to_front().await {
                    debug!(error = %e, "could not focus popup");
                }
                let _ = tokio::time::timeout(self.timeout, popup.wait_for_navigation()).await;
                self.page = popup;
                info!("adopted new page");
                return Ok(true);
            }

            if self.page.url().await.map_err(browser_err)? != start_url {
                debug!("page navigated instead of opening a popup");
                return Ok(false);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(PAGE_POLL_INTERVAL).await;
        }
    }

    async fn press_enter(&mut self, element: &ElementInfo) -> Result<(), Error> {
        if element.in_frame {
            return self
                .with_element_js(
                    element,
                    "if (el.form) { el.form.requestSubmit ? el.form.requestSubmit() : el.form.submit(); }",
                )
                .await;
        }
        let target = self
            .page
            .find_element(ref_selector(element))
            .await
            .map_err(browser_err)?;
        target.press_key("Enter").await.map_err(browser_err)?;
        Ok(())
    }

    async fn current_url(&mut self) -> Result<String, Error> {
        let url = self.page.url().await.map_err(browser_err)?;
        Ok(url.unwrap_or_else(|| "about:blank".to_string()))
    }

    async fn content(&mut self) -> Result<String, Error> {
        self.page.content().await.map_err(browser_err)
    }

    async fn title(&mut self) -> Result<String, Error> {
        let title = self.page.get_title().await.map_err(browser_err)?;
        Ok(title.unwrap_or_default())
    }

    async fn close(&mut self) -> Result<(), Error> {
        if let Err(e) = self.browser.close().await {
            warn!(error = %e, "chromium did not close cleanly");
        }
        let _ = self.browser.wait().await;
        self.handler.abort();
        Ok(())
    }
}
