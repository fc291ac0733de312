use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use super::detect::{
    assess_google_result, is_google_accounts, is_google_challenge, is_google_trigger_text,
    is_short_label, mentions_google, Verdict, CLICKABLE_SELECTOR, CONTAINER_SELECTOR,
    GOOGLE_ATTRIBUTE_SELECTOR, GOOGLE_EMAIL_SELECTOR, GOOGLE_ERROR_SELECTOR,
    GOOGLE_IDENTIFIER_NEXT, GOOGLE_PASSWORD_NEXT, GOOGLE_PASSWORD_SELECTOR,
};
use super::{await_user_action, first_visible, settle, AttemptContext};
use crate::entities::{LoginStage, LoginStatus};
use crate::error::{at_stage, Error};
use crate::ports::{BrowserSession, ElementInfo};

const DETECTION_ATTEMPTS: usize = 2;
/// How long a click gets to open Google's sign-in popup.
const POPUP_WAIT: Duration = Duration::from_secs(7);

/// Log in through the site's "Sign in with Google" button and Google's own pages.
#[instrument(skip_all, fields(site = %ctx.record.site))]
pub(crate) async fn attempt(
    session: &mut dyn BrowserSession,
    ctx: &AttemptContext<'_>,
) -> Result<LoginStatus, Error> {
    let origin = ctx
        .record
        .site
        .login_url()
        .map_err(at_stage(LoginStage::Navigating))?;

    ctx.reporter
        .progress(LoginStage::Navigating, format!("Opening {}", origin));
    session
        .navigate(origin.as_str())
        .await
        .map_err(at_stage(LoginStage::Navigating))?;
    settle(session).await;

    ctx.reporter.progress(
        LoginStage::OauthDetected,
        "Looking for the Google sign-in button",
    );
    let trigger = find_trigger(session, origin.as_str()).await?;
    click_trigger(session, &trigger).await?;
    match session.adopt_new_page(POPUP_WAIT).await {
        Ok(true) => info!("switched to the Google sign-in popup"),
        Ok(false) => {}
        Err(e) => warn!(error = %e, "could not check for a sign-in popup"),
    }
    settle(session).await;

    // Never type Google credentials anywhere but Google.
    let landed = session
        .current_url()
        .await
        .map_err(at_stage(LoginStage::OauthDetected))?;
    if !is_google_accounts(&landed) {
        return Err(Error::login(
            LoginStage::OauthDetected,
            format!("Not on Google sign-in page: {}", landed),
        ));
    }

    let timeout = ctx.browser.element_timeout();
    ctx.reporter
        .progress(LoginStage::Submitting, "Entering Google account email");
    let email = session
        .wait_for_selector(GOOGLE_EMAIL_SELECTOR, timeout)
        .await
        .map_err(at_stage(LoginStage::Submitting))?;
    session
        .fill(&email, &ctx.record.username)
        .await
        .map_err(at_stage(LoginStage::Submitting))?;
    advance(session, &email, GOOGLE_IDENTIFIER_NEXT)
        .await
        .map_err(at_stage(LoginStage::Submitting))?;

    ctx.reporter
        .progress(LoginStage::Submitting, "Entering Google account password");
    let password = match session.wait_for_selector(GOOGLE_PASSWORD_SELECTOR, timeout).await {
        Ok(field) => field,
        Err(e) => {
            if let Some(message) = google_error(session).await {
                return Err(Error::login(
                    LoginStage::Submitting,
                    format!("Google sign-in error: {}", message),
                ));
            }
            return Err(at_stage(LoginStage::Submitting)(e));
        }
    };
    session
        .fill(&password, &ctx.record.password)
        .await
        .map_err(at_stage(LoginStage::Submitting))?;
    advance(session, &password, GOOGLE_PASSWORD_NEXT)
        .await
        .map_err(at_stage(LoginStage::Submitting))?;
    settle(session).await;

    let mut current = session
        .current_url()
        .await
        .map_err(at_stage(LoginStage::Checking))?;
    if is_google_challenge(&current) {
        let waiter = ctx.gate.subscribe();
        ctx.reporter.progress(
            LoginStage::AwaitingVerification,
            "Google 2-step verification required. Complete it in the browser to continue.",
        );
        if !await_user_action(session, waiter, ctx.login.user_action_timeout()).await {
            return Err(Error::login(
                LoginStage::AwaitingVerification,
                "Timed out waiting for Google 2-step verification",
            ));
        }
        settle(session).await;
        current = session
            .current_url()
            .await
            .map_err(at_stage(LoginStage::Checking))?;
    }

    ctx.reporter
        .progress(LoginStage::Checking, "Checking login result");
    if is_google_accounts(&current) {
        if let Some(message) = google_error(session).await {
            return Err(Error::login(
                LoginStage::Checking,
                format!("Google sign-in error: {}", message),
            ));
        }
    }
    let content = session
        .content()
        .await
        .map_err(at_stage(LoginStage::Checking))?;

    match assess_google_result(&origin, &current, &content) {
        Verdict::Success(message) => {
            let status = LoginStatus::succeeded(ctx.reporter.site(), message);
            ctx.reporter.emit(&status);
            Ok(status)
        }
        Verdict::Failure(message) => Err(Error::login(LoginStage::Checking, message)),
    }
}

/// Search for the sign-in trigger, reloading the page once if the first pass finds nothing.
async fn find_trigger(session: &mut dyn BrowserSession, origin: &str) -> Result<ElementInfo, Error> {
    for attempt in 1..=DETECTION_ATTEMPTS {
        if let Some(trigger) = locate_trigger(session)
            .await
            .map_err(at_stage(LoginStage::OauthDetected))?
        {
            info!(attempt, handle = %trigger.handle, in_frame = trigger.in_frame, "found Google sign-in trigger");
            return Ok(trigger);
        }
        if attempt < DETECTION_ATTEMPTS {
            debug!(attempt, "Google sign-in trigger not found, reloading");
            session
                .navigate(origin)
                .await
                .map_err(at_stage(LoginStage::OauthDetected))?;
            settle(session).await;
        }
    }

    Err(Error::login(
        LoginStage::OauthDetected,
        "Google sign-in button not found on the page",
    ))
}

async fn locate_trigger(session: &mut dyn BrowserSession) -> Result<Option<ElementInfo>, Error> {
    if let Some(found) = first_visible(session, GOOGLE_ATTRIBUTE_SELECTOR).await? {
        return Ok(Some(found));
    }

    let clickables: Vec<ElementInfo> = session
        .find_all(CLICKABLE_SELECTOR)
        .await?
        .into_iter()
        .filter(|e| e.visible)
        .collect();
    if let Some(found) = clickables.iter().find(|e| is_google_trigger_text(e)) {
        return Ok(Some(found.clone()));
    }

    let containers = session.find_all(CONTAINER_SELECTOR).await?;
    if let Some(found) = containers
        .into_iter()
        .find(|e| e.visible && is_short_label(e) && is_google_trigger_text(e))
    {
        return Ok(Some(found));
    }

    if let Some(found) = clickables.into_iter().find(mentions_google) {
        return Ok(Some(found));
    }

    let framed = session
        .find_in_frames(&format!("{}, {}", CLICKABLE_SELECTOR, CONTAINER_SELECTOR))
        .await?;
    Ok(framed
        .into_iter()
        .find(|e| e.visible && (is_google_trigger_text(e) || mentions_google(e))))
}

/// Click the trigger, falling back to a script click when the real one is intercepted.
async fn click_trigger(session: &mut dyn BrowserSession, trigger: &ElementInfo) -> Result<(), Error> {
    let Err(e) = session.click(trigger).await else {
        return Ok(());
    };
    warn!(error = %e, "click on Google sign-in button failed, retrying from script");
    session.script_click(trigger).await.map_err(|e| {
        Error::login(
            LoginStage::OauthDetected,
            format!("Error clicking Google sign-in button: {}", e),
        )
    })
}

/// Press Google's "Next" button; Enter in the field when there is none.
async fn advance(
    session: &mut dyn BrowserSession,
    field: &ElementInfo,
    next_selector: &str,
) -> Result<(), Error> {
    if let Some(next) = first_visible(session, next_selector).await? {
        return session.click(&next).await;
    }
    let by_label = session
        .find_all("button")
        .await?
        .into_iter()
        .find(|e| e.visible && e.text.trim().eq_ignore_ascii_case("next"));
    match by_label {
        Some(next) => session.click(&next).await,
        None => session.press_enter(field).await,
    }
}

/// Text of Google's inline error banner, if it is showing one.
async fn google_error(session: &mut dyn BrowserSession) -> Option<String> {
    session
        .find_all(GOOGLE_ERROR_SELECTOR)
        .await
        .ok()?
        .into_iter()
        .map(|e| e.text.trim().to_string())
        .find(|text| !text.is_empty())
}
