use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, error, info, instrument, warn};
use zeroize::Zeroizing;

use crate::config::Settings;
use crate::entities::{
    CredentialInput, CredentialRecord, LoginStage, LoginStatus, LoginStrategy, LoginTaskSnapshot,
    SiteId, TaskId,
};
use crate::error::Error;
use crate::ports::{CredentialVault, StatusCallback};
use crate::use_cases::login::{LoginDispatcher, LoginPorts, LoginRequest, StatusReporter};
use crate::use_cases::user_action::UserActionGate;

/// Entry point for front ends: the credential store and the login dispatcher behind one
/// object, plus bookkeeping for logins submitted in the background.
pub struct AppCore<V: CredentialVault + 'static> {
    shared: Arc<Shared<V>>,
    worker: Mutex<Option<LoginWorker>>,
    initialized: AtomicBool,
}

struct Shared<V> {
    vault: Mutex<V>,
    dispatcher: LoginDispatcher,
    tasks: Arc<TaskTable>,
}

struct LoginJob {
    id: TaskId,
    record: CredentialRecord,
    request: LoginRequest,
    callback: Option<StatusCallback>,
}

/// Thread that owns the runtime (and with it the browser session) used by background logins.
struct LoginWorker {
    jobs: mpsc::Sender<LoginJob>,
    handle: JoinHandle<()>,
}

impl<V: CredentialVault + 'static> AppCore<V> {
    pub fn new(vault: V, ports: LoginPorts, settings: &Settings) -> Self {
        let gate = Arc::new(UserActionGate::new());
        Self {
            shared: Arc::new(Shared {
                vault: Mutex::new(vault),
                dispatcher: LoginDispatcher::new(ports, gate, settings),
                tasks: Arc::new(TaskTable::default()),
            }),
            worker: Mutex::new(None),
            initialized: AtomicBool::new(false),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Unlock the store and load its records. `false` on any failure, with the cause logged.
    ///
    /// The browser is not started here; the first automated login launches it.
    pub fn initialize(&self, master_password: &str) -> bool {
        if self.is_initialized() {
            debug!("already initialized");
            return true;
        }
        self.finish_initialize(self.shared.open_vault(master_password))
    }

    /// Same as [`initialize`](Self::initialize), with key derivation moved to the blocking pool.
    pub async fn initialize_async(&self, master_password: &str) -> bool {
        if self.is_initialized() {
            debug!("already initialized");
            return true;
        }
        let shared = self.shared.clone();
        let password = Zeroizing::new(master_password.to_string());
        let outcome = tokio::task::spawn_blocking(move || shared.open_vault(&password))
            .await
            .map_err(|e| Error::Other(format!("initialization task failed: {}", e)))
            .and_then(|result| result);
        self.finish_initialize(outcome)
    }

    fn finish_initialize(&self, outcome: Result<(), Error>) -> bool {
        match outcome {
            Ok(()) => {
                self.initialized.store(true, Ordering::SeqCst);
                info!("credential store unlocked");
                true
            }
            Err(e) => {
                error!(error = %e, "failed to initialize");
                false
            }
        }
    }

    // ========================================================================
    // Credential management
    // ========================================================================

    pub fn add_or_update(&self, input: CredentialInput) -> Result<CredentialRecord, Error> {
        self.shared.vault()?.add_or_update(input)
    }

    pub fn remove(&self, site: &str) -> Result<(), Error> {
        let site = SiteId::new(site)?;
        self.shared.vault()?.remove(&site)
    }

    pub fn get(&self, site: &str) -> Result<Option<CredentialRecord>, Error> {
        let site = SiteId::new(site)?;
        self.shared.vault()?.get(&site)
    }

    pub fn get_all(&self) -> Result<BTreeMap<SiteId, CredentialRecord>, Error> {
        self.shared.vault()?.get_all()
    }

    pub fn get_bonus_sites(&self) -> Result<BTreeMap<SiteId, CredentialRecord>, Error> {
        self.shared.vault()?.get_bonus_sites()
    }

    pub fn change_password(
        &self,
        site: &str,
        new_password: &str,
        new_strategy: Option<LoginStrategy>,
    ) -> Result<(), Error> {
        let site = SiteId::new(site)?;
        self.shared
            .vault()?
            .change_password(&site, new_password, new_strategy)
    }

    pub fn rotate_master_password(&self, new_password: &str) -> Result<(), Error> {
        self.shared.vault()?.rotate_master_password(new_password)
    }

    // ========================================================================
    // Logins
    // ========================================================================

    /// Queue a login on the background worker and return its task id right away.
    ///
    /// An unknown site fails here, before any task exists or any browser starts; the
    /// callback still hears about it.
    #[instrument(skip(self, callback))]
    pub fn login_to_website(
        &self,
        site: &str,
        callback: Option<StatusCallback>,
        request: LoginRequest,
    ) -> Result<TaskId, Error> {
        let record = self.shared.lookup(site, callback.as_ref())?;

        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if worker.is_none() {
            *worker = Some(LoginWorker::spawn(self.shared.clone())?);
        }

        let id = TaskId::new();
        self.shared.tasks.insert(id, &record.site);
        let job = LoginJob {
            id,
            record,
            request,
            callback,
        };
        let sent = worker
            .as_ref()
            .map(|w| w.jobs.send(job).is_ok())
            .unwrap_or(false);
        if !sent {
            let status = LoginStatus::failed(site, LoginStage::Error, "Login worker is not running");
            self.shared.tasks.finish(id, &status);
            return Err(Error::Other("login worker is not running".to_string()));
        }

        info!(task = %id, "login queued");
        Ok(id)
    }

    /// Run a login on the caller's runtime and return its final status.
    ///
    /// `Err` only when the record cannot be looked up; a failed attempt is an `Ok` status
    /// with `success == Some(false)`.
    #[instrument(skip(self, callback))]
    pub async fn login_to_website_async(
        &self,
        site: &str,
        callback: Option<StatusCallback>,
        request: LoginRequest,
    ) -> Result<LoginStatus, Error> {
        let record = self.shared.lookup(site, callback.as_ref())?;
        let reporter = StatusReporter::new(record.site.as_str(), callback);
        Ok(self.shared.attempt(&record, &request, &reporter).await)
    }

    pub fn get_login_status(&self, id: TaskId) -> Option<LoginTaskSnapshot> {
        self.shared.tasks.get(id)
    }

    /// Block until the task finishes or `timeout` elapses; returns the latest snapshot.
    pub fn wait_for_task(&self, id: TaskId, timeout: Duration) -> Option<LoginTaskSnapshot> {
        self.shared.tasks.wait_finished(id, timeout)
    }

    // ========================================================================
    // User actions
    // ========================================================================

    /// Tell a paused login that the user finished the manual step.
    pub fn confirm_user_action(&self) {
        self.shared.dispatcher.user_actions().confirm();
    }

    pub fn user_actions(&self) -> Arc<UserActionGate> {
        self.shared.dispatcher.user_actions().clone()
    }

    /// Blocks the calling thread. `false` on timeout.
    pub fn wait_for_user_action(&self, timeout: Duration) -> bool {
        match self.shared.dispatcher.user_actions().wait_blocking(timeout) {
            Ok(confirmed) => confirmed,
            Err(e) => {
                warn!(error = %e, "could not wait for user action");
                false
            }
        }
    }

    pub async fn wait_for_user_action_async(&self, timeout: Duration) -> bool {
        self.shared.dispatcher.user_actions().wait(timeout).await
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Stop the login worker, close the browser and wipe decrypted data.
    ///
    /// Must not be called from inside a tokio runtime; use [`close_async`](Self::close_async)
    /// there.
    pub fn close(&self) {
        self.stop_worker();
        match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => {
                if let Err(e) = runtime.block_on(self.shared.dispatcher.release_session()) {
                    warn!(error = %e, "failed to close browser session");
                }
            }
            Err(e) => warn!(error = %e, "failed to start shutdown runtime"),
        }
        self.wipe();
    }

    pub async fn close_async(&self) {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if let Err(e) = tokio::task::spawn_blocking(move || worker.stop()).await {
                warn!(error = %e, "failed to stop login worker");
            }
        }
        if let Err(e) = self.shared.dispatcher.release_session().await {
            warn!(error = %e, "failed to close browser session");
        }
        self.wipe();
    }

    fn stop_worker(&self) {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            worker.stop();
        }
    }

    fn wipe(&self) {
        match self.shared.vault() {
            Ok(mut vault) => vault.clear_memory(),
            Err(e) => warn!(error = %e, "could not clear credential store"),
        }
        self.initialized.store(false, Ordering::SeqCst);
        info!("closed");
    }
}

impl<V: CredentialVault> Shared<V> {
    fn vault(&self) -> Result<MutexGuard<'_, V>, Error> {
        self.vault
            .lock()
            .map_err(|_| Error::Other("credential store lock poisoned".to_string()))
    }

    fn open_vault(&self, master_password: &str) -> Result<(), Error> {
        let mut vault = self.vault()?;
        let opened = vault.initialize(master_password).and_then(|()| vault.load());
        if opened.is_err() {
            vault.clear_memory();
        }
        opened
    }

    /// Fetch the record for `site`, telling the callback when there is none.
    fn lookup(&self, site: &str, callback: Option<&StatusCallback>) -> Result<CredentialRecord, Error> {
        let found = SiteId::new(site).and_then(|id| {
            self.vault()?
                .get(&id)?
                .ok_or_else(|| Error::NotFound(id.to_string()))
        });
        if let Err(e) = &found {
            warn!(site, error = %e, "cannot start login");
            if let Some(callback) = callback {
                callback(&LoginStatus::failed(site, LoginStage::Error, e.user_message()));
            }
        }
        found
    }

    /// Run one attempt to completion; errors become a failed status.
    async fn attempt(
        &self,
        record: &CredentialRecord,
        request: &LoginRequest,
        reporter: &StatusReporter,
    ) -> LoginStatus {
        let status = match self.dispatcher.execute(record, request, reporter).await {
            Ok(status) => status,
            Err(e) => {
                warn!(site = %record.site, stage = %e.stage(), error = %e, "login attempt failed");
                let stage = if e.stage().is_terminal() {
                    e.stage()
                } else {
                    LoginStage::Error
                };
                let status = LoginStatus::failed(reporter.site(), stage, e.user_message());
                reporter.emit(&status);
                status
            }
        };

        let recorded = self
            .vault()
            .and_then(|mut vault| vault.update_last_login(&record.site, status.is_success()));
        if let Err(e) = recorded {
            warn!(site = %record.site, error = %e, "failed to record login result");
        }
        status
    }

    async fn run_job(&self, job: LoginJob) {
        let LoginJob {
            id,
            record,
            request,
            callback,
        } = job;

        let tasks = self.tasks.clone();
        let tracking: StatusCallback = Arc::new(move |status: &LoginStatus| {
            tasks.update(id, status);
            if let Some(callback) = &callback {
                callback(status);
            }
        });
        let reporter = StatusReporter::new(record.site.as_str(), Some(tracking));

        let status = self.attempt(&record, &request, &reporter).await;
        self.tasks.finish(id, &status);
        debug!(task = %id, success = status.is_success(), "login task finished");
    }
}

impl LoginWorker {
    fn spawn<V: CredentialVault + 'static>(shared: Arc<Shared<V>>) -> Result<Self, Error> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let (jobs, queue) = mpsc::channel::<LoginJob>();

        let handle = std::thread::Builder::new()
            .name("passgate-login".to_string())
            .spawn(move || {
                for job in queue {
                    runtime.block_on(shared.run_job(job));
                }
                // The session belongs to this runtime; close it before the runtime goes away.
                if let Err(e) = runtime.block_on(shared.dispatcher.release_session()) {
                    warn!(error = %e, "failed to close browser session");
                }
                debug!("login worker stopped");
            })?;

        debug!("login worker started");
        Ok(Self { jobs, handle })
    }

    /// Finish queued jobs, then exit.
    fn stop(self) {
        drop(self.jobs);
        if self.handle.join().is_err() {
            error!("login worker panicked");
        }
    }
}

// ============================================================================
// Task bookkeeping
// ============================================================================

#[derive(Default)]
struct TaskTable {
    tasks: Mutex<HashMap<TaskId, LoginTaskSnapshot>>,
    finished: Condvar,
}

impl TaskTable {
    fn lock(&self) -> MutexGuard<'_, HashMap<TaskId, LoginTaskSnapshot>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, id: TaskId, site: &SiteId) {
        self.lock().insert(
            id,
            LoginTaskSnapshot {
                id,
                site: site.clone(),
                stage: LoginStage::Starting,
                success: None,
                message: "Queued".to_string(),
            },
        );
    }

    /// Progress only; the outcome is set by [`finish`](Self::finish) once the result is stored.
    fn update(&self, id: TaskId, status: &LoginStatus) {
        if let Some(task) = self.lock().get_mut(&id) {
            task.stage = status.stage;
            task.message = status.message.clone();
        }
    }

    fn finish(&self, id: TaskId, status: &LoginStatus) {
        if let Some(task) = self.lock().get_mut(&id) {
            task.stage = status.stage;
            task.success = status.success;
            task.message = status.message.clone();
        }
        self.finished.notify_all();
    }

    fn get(&self, id: TaskId) -> Option<LoginTaskSnapshot> {
        self.lock().get(&id).cloned()
    }

    fn wait_finished(&self, id: TaskId, timeout: Duration) -> Option<LoginTaskSnapshot> {
        let (tasks, _) = self
            .finished
            .wait_timeout_while(self.lock(), timeout, |tasks| {
                tasks.get(&id).is_some_and(|task| task.success.is_none())
            })
            .unwrap_or_else(PoisonError::into_inner);
        tasks.get(&id).cloned()
    }
}
