use tracing::{info, instrument};

use super::AttemptContext;
use crate::entities::{LoginStage, LoginStatus};
use crate::error::{at_stage, Error};
use crate::ports::SystemBrowser;

/// Open the login page in the user's own browser and wait for them to say they are done.
///
/// No automation engine is involved, so nothing here can verify the result; the user's
/// confirmation is the success signal.
#[instrument(skip_all, fields(site = %ctx.record.site))]
pub(crate) async fn attempt(
    system_browser: &dyn SystemBrowser,
    ctx: &AttemptContext<'_>,
) -> Result<LoginStatus, Error> {
    let url = ctx
        .record
        .site
        .login_url()
        .map_err(at_stage(LoginStage::Navigating))?;

    ctx.reporter.progress(
        LoginStage::Navigating,
        format!("Opening {} in the system browser", url),
    );
    system_browser
        .open(url.as_str())
        .map_err(at_stage(LoginStage::Navigating))?;

    let waiter = ctx.gate.subscribe();
    ctx.reporter.progress(
        LoginStage::AwaitingVerification,
        "Log in using the system browser, then click Continue when done",
    );

    if !waiter.wait(ctx.login.user_action_timeout()).await {
        return Err(Error::login(
            LoginStage::AwaitingVerification,
            "Timed out waiting for manual login confirmation",
        ));
    }

    info!("manual login confirmed");
    let status = LoginStatus::succeeded(ctx.reporter.site(), "Manual login confirmed");
    ctx.reporter.emit(&status);
    Ok(status)
}
