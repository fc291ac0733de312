//! Page heuristics shared by the login strategies.

use url::Url;

use crate::ports::ElementInfo;

/// Untyped inputs default to text, so `input:not([type])` covers bare `<input name="login">`.
pub const USERNAME_SELECTOR: &str = "input[type='text'], input[type='email'], input:not([type]), \
     input[autocomplete='username'], input[name*='user' i]:not([type='password']):not([type='hidden'])";
pub const PASSWORD_SELECTOR: &str = "input[type='password']";
pub const SUBMIT_SELECTOR: &str = "button[type='submit'], input[type='submit']";

pub const CAPTCHA_SELECTOR: &str = "iframe[src*='recaptcha'], iframe[src*='hcaptcha'], \
     .g-recaptcha, .h-captcha, [data-sitekey]";
pub const TWO_FACTOR_SELECTOR: &str = "input[autocomplete='one-time-code'], input[name*='otp'], \
     input[name*='totp'], input[name*='2fa']";

pub const GOOGLE_ATTRIBUTE_SELECTOR: &str = "[aria-label*='google' i], \
     [data-provider*='google' i], [data-auth*='google' i], .google-sign-in, .google-login, \
     .btn-google, .google-auth, .google_oauth, a[href*='accounts.google.com']";
pub const CLICKABLE_SELECTOR: &str = "button, a, [role='button']";
pub const CONTAINER_SELECTOR: &str = "div, span";

pub const GOOGLE_EMAIL_SELECTOR: &str = "input[type='email']";
pub const GOOGLE_PASSWORD_SELECTOR: &str = "input[type='password']";
pub const GOOGLE_IDENTIFIER_NEXT: &str = "#identifierNext button, #identifierNext";
pub const GOOGLE_PASSWORD_NEXT: &str = "#passwordNext button, #passwordNext";
pub const GOOGLE_ERROR_SELECTOR: &str = "div[aria-live='assertive']";

const GOOGLE_ACCOUNTS_HOST: &str = "accounts.google.com";

/// Containers with more text than this are page sections, not buttons.
const MAX_TRIGGER_TEXT_LEN: usize = 80;

const GOOGLE_TEXT_PATTERNS: [&str; 7] = [
    "sign in with google",
    "sign in using google",
    "continue with google",
    "login with google",
    "log in with google",
    "google sign in",
    "google login",
];

const TWO_FACTOR_TEXT: [&str; 5] = [
    "two-factor",
    "2-step verification",
    "verification code",
    "authenticator app",
    "enter the code",
];

const LOGIN_URL_MARKERS: [&str; 4] = ["login", "signin", "sign-in", "log-in"];

const FAILURE_MARKERS: [&str; 6] = [
    "incorrect password",
    "invalid username",
    "invalid email",
    "invalid credentials",
    "login failed",
    "authentication failed",
];

const GOOGLE_SERVICE_HOSTS: [&str; 5] = [
    "myaccount.google.com",
    "mail.google.com",
    "drive.google.com",
    "www.google.com",
    "www.youtube.com",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Success(String),
    Failure(String),
}

pub fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_lowercase()))
}

/// Element reads like a "Sign in with Google" button.
pub fn is_google_trigger_text(element: &ElementInfo) -> bool {
    let text = element.searchable_text();
    GOOGLE_TEXT_PATTERNS.iter().any(|p| text.contains(p))
}

/// Broad fallback: any short, visible element that mentions Google.
pub fn mentions_google(element: &ElementInfo) -> bool {
    let class = element.class.as_deref().unwrap_or_default().to_lowercase();
    element.text.len() <= MAX_TRIGGER_TEXT_LEN
        && (element.searchable_text().contains("google") || class.contains("google"))
}

pub fn is_short_label(element: &ElementInfo) -> bool {
    element.text.trim().len() <= MAX_TRIGGER_TEXT_LEN
}

pub fn mentions_two_factor(content: &str) -> bool {
    let lower = content.to_lowercase();
    TWO_FACTOR_TEXT.iter().any(|m| lower.contains(m))
}

pub fn is_google_accounts(url: &str) -> bool {
    host_of(url).is_some_and(|h| h == GOOGLE_ACCOUNTS_HOST)
}

/// Google is asking for a second factor.
pub fn is_google_challenge(url: &str) -> bool {
    is_google_accounts(url) && url.contains("/challenge/")
}

/// Decide whether a submitted credential form logged the user in.
///
/// A different host counts as a redirect into the site. On the same host a login-looking
/// URL or a known failure phrase in the page means the credentials were rejected.
pub fn assess_form_result(origin: &Url, current: &str, content: &str) -> Verdict {
    let origin_host = origin
        .host_str()
        .map(|h| h.trim_start_matches("www.").to_lowercase());
    let current_host = host_of(current);

    if current_host.is_some() && current_host != origin_host {
        return Verdict::Success(format!("Redirected to {}", current));
    }

    let location = Url::parse(current)
        .map(|u| format!("{}?{}", u.path(), u.query().unwrap_or_default()))
        .unwrap_or_else(|_| current.to_string())
        .to_lowercase();
    if LOGIN_URL_MARKERS.iter().any(|m| location.contains(m)) {
        return Verdict::Failure(format!("Still on the login page: {}", current));
    }

    let content_lower = content.to_lowercase();
    if let Some(marker) = FAILURE_MARKERS.iter().find(|m| content_lower.contains(*m)) {
        return Verdict::Failure(format!("Page reports \"{}\"", marker));
    }

    Verdict::Success("Login successful".to_string())
}

/// Same as [`assess_form_result`], except that staying on Google's sign-in host is a failure
/// and landing on a Google service counts as signed in.
pub fn assess_google_result(origin: &Url, current: &str, content: &str) -> Verdict {
    if is_google_accounts(current) {
        return Verdict::Failure(format!("Still on Google sign-in page: {}", current));
    }
    if let Some(host) = Url::parse(current).ok().and_then(|u| u.host_str().map(str::to_lowercase)) {
        if GOOGLE_SERVICE_HOSTS.contains(&host.as_str()) {
            return Verdict::Success(format!("Signed in to Google ({})", host));
        }
    }
    assess_form_result(origin, current, content)
}
