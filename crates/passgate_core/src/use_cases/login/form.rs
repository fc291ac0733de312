use tracing::{debug, instrument};

use super::detect::{
    assess_form_result, mentions_two_factor, Verdict, CAPTCHA_SELECTOR, PASSWORD_SELECTOR,
    SUBMIT_SELECTOR, TWO_FACTOR_SELECTOR, USERNAME_SELECTOR,
};
use super::{await_user_action, first_visible, settle, AttemptContext};
use crate::entities::{LoginStage, LoginStatus};
use crate::error::{at_stage, Error};
use crate::ports::{BrowserSession, ElementInfo};

/// Log in through the site's own username/password form.
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

    let username_field = first_visible(session, USERNAME_SELECTOR)
        .await
        .map_err(at_stage(LoginStage::FormDetected))?
        .ok_or_else(|| {
            Error::login(
                LoginStage::FormDetected,
                "No username field found on the login page",
            )
        })?;
    let password_field = first_visible(session, PASSWORD_SELECTOR)
        .await
        .map_err(at_stage(LoginStage::FormDetected))?
        .ok_or_else(|| {
            Error::login(
                LoginStage::FormDetected,
                "No password field found on the login page",
            )
        })?;
    ctx.reporter
        .progress(LoginStage::FormDetected, "Login form found");

    ctx.reporter
        .progress(LoginStage::Submitting, "Filling in credentials");
    session
        .fill(&username_field, &ctx.record.username)
        .await
        .map_err(at_stage(LoginStage::Submitting))?;
    session
        .fill(&password_field, &ctx.record.password)
        .await
        .map_err(at_stage(LoginStage::Submitting))?;
    submit(session, &password_field)
        .await
        .map_err(at_stage(LoginStage::Submitting))?;
    settle(session).await;

    if let Some(challenge) = verification_challenge(session).await {
        let waiter = ctx.gate.subscribe();
        ctx.reporter.progress(
            LoginStage::AwaitingVerification,
            format!("{} detected. Complete it in the browser to continue.", challenge),
        );
        if !await_user_action(session, waiter, ctx.login.user_action_timeout()).await {
            return Err(Error::login(
                LoginStage::AwaitingVerification,
                format!("Timed out waiting for {} to be completed", challenge),
            ));
        }
        settle(session).await;
    }

    ctx.reporter
        .progress(LoginStage::Checking, "Checking login result");
    let current = session
        .current_url()
        .await
        .map_err(at_stage(LoginStage::Checking))?;
    let content = session
        .content()
        .await
        .map_err(at_stage(LoginStage::Checking))?;

    match assess_form_result(&origin, &current, &content) {
        Verdict::Success(message) => {
            let status = LoginStatus::succeeded(ctx.reporter.site(), message);
            ctx.reporter.emit(&status);
            Ok(status)
        }
        Verdict::Failure(message) => Err(Error::login(LoginStage::Checking, message)),
    }
}

/// Enter in the password field, or the form's submit button when that is refused.
async fn submit(session: &mut dyn BrowserSession, password_field: &ElementInfo) -> Result<(), Error> {
    match session.press_enter(password_field).await {
        Ok(()) => Ok(()),
        Err(e) => {
            debug!(error = %e, "enter in password field failed, clicking submit button");
            let button = first_visible(session, SUBMIT_SELECTOR)
                .await?
                .ok_or_else(|| Error::Browser("no submit button on the login form".to_string()))?;
            session.click(&button).await
        }
    }
}

/// Name of the human check the page is showing, if any.
async fn verification_challenge(session: &mut dyn BrowserSession) -> Option<&'static str> {
    if matches!(first_visible(session, CAPTCHA_SELECTOR).await, Ok(Some(_))) {
        return Some("CAPTCHA");
    }
    if matches!(first_visible(session, TWO_FACTOR_SELECTOR).await, Ok(Some(_))) {
        return Some("Two-factor verification");
    }
    match session.content().await {
        Ok(content) if mentions_two_factor(&content) => Some("Two-factor verification"),
        _ => None,
    }
}
