use async_trait::async_trait;
use passgate_core::ports::OauthPrecheck;
use passgate_core::Error;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument};

use crate::network::build_precheck_client;

const GOOGLE_OAUTH_ENDPOINT: &str = "accounts.google.com/o/oauth2";

const GOOGLE_TEXT_PATTERNS: [&str; 7] = [
    "sign in with google",
    "sign in using google",
    "continue with google",
    "login with google",
    "log in with google",
    "google sign in",
    "google login",
];

const GOOGLE_CLASS_NAMES: [&str; 6] = [
    "google-sign-in",
    "google-login",
    "btn-google",
    "google-auth",
    "google_oauth",
    "google",
];

/// Text longer than this belongs to a page section, not a sign-in button.
const MAX_LABEL_LEN: usize = 80;

/// Fetches a login page over plain HTTP and looks for a Google sign-in option.
pub struct HttpOauthPrecheck {
    client: Client,
}

impl HttpOauthPrecheck {
    pub fn new() -> Result<Self, Error> {
        Ok(Self {
            client: build_precheck_client()?,
        })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl OauthPrecheck for HttpOauthPrecheck {
    #[instrument(skip(self))]
    async fn uses_google_oauth(&self, url: &str) -> Result<bool, Error> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::Network(format!(
                "failed to fetch login page: {}",
                response.status()
            )));
        }

        let html = response
            .text()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        let found = scan_for_google_oauth(&html)?;
        debug!(found, bytes = html.len(), "scanned login page");
        Ok(found)
    }
}

fn selector(css: &str) -> Result<Selector, Error> {
    Selector::parse(css).map_err(|e| Error::Other(format!("invalid selector {}: {:?}", css, e)))
}

fn attr_lower(element: &ElementRef<'_>, name: &str) -> String {
    element
        .value()
        .attr(name)
        .unwrap_or_default()
        .to_lowercase()
}

fn has_google_text(text: &str) -> bool {
    GOOGLE_TEXT_PATTERNS.iter().any(|p| text.contains(p))
}

/// Does this HTML offer "Sign in with Google"?
///
/// Checks, in order: links and forms pointing at Google's OAuth endpoint, sign-in wording in
/// buttons and labels, Google-flavoured class names, and `data-provider`/`data-auth` hints.
pub fn scan_for_google_oauth(html: &str) -> Result<bool, Error> {
    let document = Html::parse_document(html);

    let links = selector("a[href], form[action]")?;
    let points_at_google = document.select(&links).any(|el| {
        let target = format!("{} {}", attr_lower(&el, "href"), attr_lower(&el, "action"));
        target.contains(GOOGLE_OAUTH_ENDPOINT)
    });
    if points_at_google {
        return Ok(true);
    }

    let labelled = selector("button, a, [role='button'], div, span")?;
    let says_google = document.select(&labelled).any(|el| {
        let text = el.text().collect::<String>().trim().to_lowercase();
        let short = text.len() <= MAX_LABEL_LEN;
        (short && has_google_text(&text))
            || has_google_text(&attr_lower(&el, "aria-label"))
            || has_google_text(&attr_lower(&el, "title"))
    });
    if says_google {
        return Ok(true);
    }

    let classed = selector("[class]")?;
    let google_class = document.select(&classed).any(|el| {
        el.value()
            .classes()
            .any(|class| GOOGLE_CLASS_NAMES.contains(&class.to_lowercase().as_str()))
    });
    if google_class {
        return Ok(true);
    }

    let hinted = selector("[data-provider], [data-auth]")?;
    Ok(document.select(&hinted).any(|el| {
        attr_lower(&el, "data-provider").contains("google")
            || attr_lower(&el, "data-auth").contains("google")
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[rstest]
    #[case::oauth_link(r#"<a href="https://accounts.google.com/o/oauth2/v2/auth?client_id=1">Go</a>"#)]
    #[case::oauth_form(r#"<form action="https://accounts.google.com/o/oauth2/auth"></form>"#)]
    #[case::button_text("<button>Continue with Google</button>")]
    #[case::nested_text("<a href='/auth'><span>Sign in</span> with Google</a>")]
    #[case::aria_label(r#"<div role="button" aria-label="Sign in with Google"></div>"#)]
    #[case::title_attr(r#"<span title="Google Sign In"></span>"#)]
    #[case::class_name(r#"<div class="social btn-google"></div>"#)]
    #[case::bare_google_class(r#"<button class="Google"></button>"#)]
    #[case::data_provider(r#"<button data-provider="google-oauth2">SSO</button>"#)]
    #[case::data_auth(r#"<a data-auth="Google">SSO</a>"#)]
    fn test_detects_google_sign_in(#[case] body: &str) {
        let html = format!("<html><body>{}</body></html>", body);
        assert!(scan_for_google_oauth(&html).unwrap());
    }

    #[rstest]
    #[case::plain_form(
        r#"<form action="/login"><input type="text"><input type="password"><button>Log in</button></form>"#
    )]
    #[case::other_provider("<button>Sign in with Apple</button>")]
    #[case::google_mentioned_in_prose(
        "<p>We use Google Analytics. Continue with google searches at your own risk, this paragraph is long enough.</p>"
    )]
    #[case::google_substring_class(r#"<div class="googleish-banner"></div>"#)]
    fn test_ignores_pages_without_google_sign_in(#[case] body: &str) {
        let html = format!("<html><body>{}</body></html>", body);
        assert!(!scan_for_google_oauth(&html).unwrap());
    }

    /// Serve one canned HTTP response on a local port.
    async fn serve_once(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await;
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });
        format!("http://{}/login", addr)
    }

    fn local_precheck() -> HttpOauthPrecheck {
        // Keep loopback requests away from any proxy configured in the environment.
        let client = Client::builder().no_proxy().build().unwrap();
        HttpOauthPrecheck::with_client(client)
    }

    #[tokio::test]
    async fn test_fetches_and_scans_page() {
        let url = serve_once("200 OK", "<html><button>Sign in with Google</button></html>").await;
        let precheck = local_precheck();

        assert!(precheck.uses_google_oauth(&url).await.unwrap());
    }

    #[tokio::test]
    async fn test_http_error_is_network_error() {
        let url = serve_once("503 Service Unavailable", "down").await;
        let precheck = local_precheck();

        let err = precheck.uses_google_oauth(&url).await.unwrap_err();

        assert!(matches!(err, Error::Network(_)), "{:?}", err);
    }
}
