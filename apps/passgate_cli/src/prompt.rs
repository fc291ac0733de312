use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dialoguer::Select;
use indicatif::ProgressBar;
use passgate_core::entities::{GoogleLoginMethod, SiteId};
use passgate_core::ports::MethodPrompt;
use passgate_core::use_cases::UserActionGate;
use passgate_core::Error;

const METHODS: [(GoogleLoginMethod, &str); 2] = [
    (
        GoogleLoginMethod::SystemBrowser,
        "Open it in my browser (I will sign in myself)",
    ),
    (
        GoogleLoginMethod::Automation,
        "Automate the Google sign-in with the saved credentials",
    ),
];

/// Terminal menu for choosing how a Google-gated site is logged into.
pub struct DialoguerMethodPrompt {
    progress: ProgressBar,
}

impl DialoguerMethodPrompt {
    pub fn new(progress: ProgressBar) -> Self {
        Self { progress }
    }
}

#[async_trait]
impl MethodPrompt for DialoguerMethodPrompt {
    async fn choose_google_method(&self, site: &SiteId) -> Result<Option<GoogleLoginMethod>, Error> {
        let progress = self.progress.clone();
        let prompt = format!("{} uses Google sign-in. How do you want to log in?", site);

        let choice = tokio::task::spawn_blocking(move || {
            progress.suspend(|| {
                Select::new()
                    .with_prompt(prompt)
                    .items(&METHODS.map(|(_, label)| label))
                    .default(0)
                    .interact_opt()
            })
        })
        .await
        .map_err(|e| Error::Other(format!("prompt task failed: {}", e)))?
        .map_err(|e| Error::Other(format!("prompt failed: {}", e)))?;

        Ok(choice.map(|index| METHODS[index].0))
    }
}

/// Turns "press Enter" on stdin into a user-action confirmation.
///
/// Armed once per run; a second verification request reuses the same reader.
pub struct EnterToContinue {
    gate: Arc<UserActionGate>,
    armed: AtomicBool,
}

impl EnterToContinue {
    pub fn new(gate: Arc<UserActionGate>) -> Self {
        Self {
            gate,
            armed: AtomicBool::new(false),
        }
    }

    pub fn arm(&self) {
        if self.armed.swap(true, Ordering::SeqCst) {
            return;
        }
        let gate = self.gate.clone();
        std::thread::spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                if line.is_err() {
                    break;
                }
                gate.confirm();
            }
        });
    }
}

