use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::Error;

/// Signal the user raises after finishing a manual step (CAPTCHA, 2FA, system browser).
///
/// Only confirmations that arrive after a wait started count for that wait.
pub struct UserActionGate {
    confirmations: watch::Sender<u64>,
}

/// Subscription taken when a pause begins.
pub struct UserActionWaiter {
    rx: watch::Receiver<u64>,
}

impl UserActionGate {
    pub fn new() -> Self {
        let (confirmations, _) = watch::channel(0);
        Self { confirmations }
    }

    pub fn confirm(&self) {
        self.confirmations.send_modify(|count| *count += 1);
        debug!("user action confirmed");
    }

    pub fn subscribe(&self) -> UserActionWaiter {
        let mut rx = self.confirmations.subscribe();
        rx.borrow_and_update();
        UserActionWaiter { rx }
    }

    /// Wait until confirmed or `timeout` elapses. Never errors on timeout.
    pub async fn wait(&self, timeout: Duration) -> bool {
        self.subscribe().wait(timeout).await
    }

    /// Blocking variant of [`wait`](Self::wait). Must not be called from inside a runtime.
    pub fn wait_blocking(&self, timeout: Duration) -> Result<bool, Error> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| Error::Other(format!("failed to start wait runtime: {}", e)))?;
        Ok(runtime.block_on(self.wait(timeout)))
    }
}

impl Default for UserActionGate {
    fn default() -> Self {
        Self::new()
    }
}

impl UserActionWaiter {
    /// Resolves once a confirmation arrives; `false` if the gate is gone.
    pub async fn confirmed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    pub async fn wait(mut self, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, self.confirmed()).await {
            Ok(confirmed) => confirmed,
            Err(_) => {
                warn!(timeout_secs = timeout.as_secs(), "timed out waiting for user action");
                false
            }
        }
    }
}
