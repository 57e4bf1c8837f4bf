//! Session-scoped dashboard: owns the run state, the chart buffer and the
//! two timer loops, and hands completed runs to the result store.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::clock::{SharedClock, TaskHandle, TokioClock};
use crate::config::{Config, SamplerConfig};
use crate::netinfo::{self, ConnectionCapability, NetworkView, SharedMetadata};
use crate::notify::{Notification, SharedNotifier};
use crate::sampler::{spawn_sampler, Sample, SharedBuffer};
use crate::sequencer::metrics::{MetricSource, RandomMetrics};
use crate::sequencer::{run_sequence, PhasePlan, RunEvent, RunOutcome, RunState};
use crate::session::{self, AuthError, SharedSession, User};
use crate::storage::{NewTestResult, SharedResultStore, StoreError, TestResult};

/// Builds the metric source for each new run.
pub type MetricsFactory = Arc<dyn Fn() -> Box<dyn MetricSource> + Send + Sync>;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("Please sign in to view your test results.")]
    SignInRequired,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Collaborators injected into a [`Dashboard`].
pub struct DashboardDeps {
    pub config: Config,
    pub session: SharedSession,
    pub store: SharedResultStore,
    pub notifier: SharedNotifier,
    /// `None` skips the lookup and shows placeholders.
    pub metadata: Option<SharedMetadata>,
    /// Queried once by the caller; `None` shows "Unknown".
    pub capability: Option<ConnectionCapability>,
    pub clock: SharedClock,
    pub metrics: MetricsFactory,
}

impl DashboardDeps {
    /// Random metrics and a tokio-driven clock.
    pub fn new(
        config: Config,
        session: SharedSession,
        store: SharedResultStore,
        notifier: SharedNotifier,
    ) -> Self {
        Self {
            config,
            session,
            store,
            notifier,
            metadata: None,
            capability: None,
            clock: Arc::new(TokioClock::new()),
            metrics: Arc::new(|| Box::new(RandomMetrics::new()) as Box<dyn MetricSource>),
        }
    }
}

struct ActiveRun {
    sequencer: TaskHandle<()>,
    sampler: TaskHandle<usize>,
}

impl ActiveRun {
    fn cancel(&self) {
        self.sequencer.cancel();
        self.sampler.cancel();
    }
}

/// Runs started and runs whose task (hand-off included) has ended.
#[derive(Debug, Clone, Copy, Default)]
struct RunCounts {
    started: u64,
    finished: u64,
}

impl RunCounts {
    fn is_idle(&self) -> bool {
        self.finished == self.started
    }
}

struct Inner {
    plan: PhasePlan,
    sampler_cfg: SamplerConfig,
    server_location: String,
    state: watch::Sender<RunState>,
    events: broadcast::Sender<RunEvent>,
    runs: watch::Sender<RunCounts>,
    buffer: SharedBuffer,
    network: RwLock<NetworkView>,
    capability: Option<ConnectionCapability>,
    active: Mutex<Option<ActiveRun>>,
    session: SharedSession,
    store: SharedResultStore,
    notifier: SharedNotifier,
    metadata: Option<SharedMetadata>,
    clock: SharedClock,
    metrics: MetricsFactory,
}

/// Cheap to clone; all clones drive the same session.
#[derive(Clone)]
pub struct Dashboard {
    inner: Arc<Inner>,
}

impl Dashboard {
    pub fn new(deps: DashboardDeps) -> Self {
        let (state, _) = watch::channel(RunState::default());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (runs, _) = watch::channel(RunCounts::default());
        let network = NetworkView::from_parts(None, deps.capability.as_ref());

        Self {
            inner: Arc::new(Inner {
                plan: PhasePlan::from_config(&deps.config.sequencer),
                buffer: SharedBuffer::new(deps.config.sampler.capacity),
                sampler_cfg: deps.config.sampler.clone(),
                server_location: deps.config.results.server_location.clone(),
                state,
                events,
                runs,
                network: RwLock::new(network),
                capability: deps.capability,
                active: Mutex::new(None),
                session: deps.session,
                store: deps.store,
                notifier: deps.notifier,
                metadata: deps.metadata,
                clock: deps.clock,
                metrics: deps.metrics,
            }),
        }
    }

    /// Begin a run. Returns false, doing nothing, when one is already active.
    ///
    /// A run counts as active until its sequencer has observed a stop
    /// request, so a start issued right after [`Dashboard::stop_run`] may
    /// still be refused. Await [`Dashboard::wait_idle`] first to be sure.
    pub fn start_run(&self) -> bool {
        let mut active = self.inner.active.lock().unwrap_or_else(|p| p.into_inner());
        if self.inner.state.borrow().is_running {
            debug!("run already active, ignoring start");
            return false;
        }
        if let Some(previous) = active.take() {
            previous.cancel();
        }

        self.inner.state.send_replace(RunState::starting());
        self.inner.runs.send_modify(|r| r.started += 1);
        info!(total_ms = self.inner.plan.total_duration().as_millis() as u64, "run started");

        let sampler = spawn_sampler(
            self.inner.state.subscribe(),
            self.inner.buffer.clone(),
            self.inner.sampler_cfg.interval(),
            self.inner.clock.clone(),
        );

        let inner = self.inner.clone();
        let sequencer = TaskHandle::spawn("sequencer", move |cancel| async move {
            let mut metrics = (inner.metrics)();
            let outcome = run_sequence(&inner.plan, &inner.state, metrics.as_mut(), &inner.events, &cancel).await;
            if let RunOutcome::Completed { state, elapsed } = outcome {
                inner.hand_off(&state, elapsed).await;
            }
            // every task ends exactly once, so an older run's late hand-off
            // cannot mark a newer run idle
            inner.runs.send_modify(|r| r.finished += 1);
        });

        *active = Some(ActiveRun { sequencer, sampler });
        true
    }

    /// Ask the active run to stop at its next step. Returns false when idle.
    ///
    /// The run keeps the phase it was in; `is_running` drops once the
    /// sequencer observes the request.
    pub fn stop_run(&self) -> bool {
        let active = self.inner.active.lock().unwrap_or_else(|p| p.into_inner());
        if !self.inner.state.borrow().is_running {
            return false;
        }
        match active.as_ref() {
            Some(run) => {
                run.cancel();
                info!("stop requested");
                true
            }
            None => false,
        }
    }

    /// Wait until no run is active and the last result hand-off has finished.
    pub async fn wait_idle(&self) {
        let mut runs = self.inner.runs.subscribe();
        // the sender lives in `inner`, so this cannot close early
        let _ = runs.wait_for(RunCounts::is_idle).await;
    }

    pub fn state(&self) -> RunState {
        self.inner.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<RunState> {
        self.inner.state.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.inner.events.subscribe()
    }

    /// Chart buffer contents, oldest first.
    pub fn samples(&self) -> Vec<Sample> {
        self.inner.buffer.snapshot()
    }

    pub fn sample_capacity(&self) -> usize {
        self.inner.buffer.lock().capacity()
    }

    pub fn network(&self) -> NetworkView {
        self.inner.network.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn capability(&self) -> Option<&ConnectionCapability> {
        self.inner.capability.as_ref()
    }

    /// Re-run the metadata lookup. Failures leave placeholders in place.
    pub async fn refresh_network(&self) -> NetworkView {
        let view = match &self.inner.metadata {
            Some(provider) => netinfo::resolve_view(provider.as_ref(), self.inner.capability.as_ref()).await,
            None => NetworkView::from_parts(None, self.inner.capability.as_ref()),
        };
        *self.inner.network.write().unwrap_or_else(|p| p.into_inner()) = view.clone();
        view
    }

    /// Lookup in the background, so startup never waits on the network.
    pub fn spawn_network_refresh(&self) -> tokio::task::JoinHandle<NetworkView> {
        let this = self.clone();
        tokio::spawn(async move { this.refresh_network().await })
    }

    pub fn current_user(&self) -> Option<User> {
        self.inner.session.current_user()
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let outcome = self.inner.session.sign_in(email, password).await;
        self.inner.notifier.notify(session::sign_in_notification(&outcome));
        outcome
    }

    pub async fn sign_up(&self, email: &str, password: &str, display_name: &str) -> Result<User, AuthError> {
        let outcome = self.inner.session.sign_up(email, password, display_name).await;
        self.inner.notifier.notify(session::sign_up_notification(&outcome));
        outcome
    }

    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let outcome = self.inner.session.sign_out().await;
        self.inner.notifier.notify(session::sign_out_notification(&outcome));
        outcome
    }

    /// Saved results of the signed-in user, newest first.
    pub async fn load_history(&self) -> Result<Vec<TestResult>, HistoryError> {
        let user = self.current_user().ok_or(HistoryError::SignInRequired)?;
        match self.inner.store.fetch_test_results(&user).await {
            Ok(results) => Ok(results),
            Err(e) => {
                warn!(error = %e, "failed to load test results");
                self.inner
                    .notifier
                    .notify(Notification::failure("Load Failed", e.to_string()));
                Err(e.into())
            }
        }
    }
}

impl Inner {
    /// Save a completed run for the signed-in user, if any. Failures only
    /// produce a notification.
    async fn hand_off(&self, state: &RunState, elapsed: Duration) {
        let Some(user) = self.session.current_user() else {
            debug!("no signed-in user, result not saved");
            return;
        };

        let network = self.network.read().unwrap_or_else(|p| p.into_inner()).clone();
        let result = NewTestResult {
            download_speed: state.download_speed,
            upload_speed: state.upload_speed,
            ping: state.ping,
            jitter: state.jitter,
            server_location: self.server_location.clone(),
            isp: network.known_isp(),
            ip_address: network.known_ip(),
            connection_type: network.connection.clone(),
            test_duration: Some(elapsed.as_secs_f64()),
        };

        match self.store.save_test_result(&user, result).await {
            Ok(saved) => {
                info!(id = %saved.id, user = %user.id, "result saved");
                self.notifier.notify(Notification::success(
                    "Test Saved",
                    "Your speed test result has been saved successfully.",
                ));
            }
            Err(e) => {
                warn!(error = %e, user = %user.id, "failed to save result");
                self.notifier
                    .notify(Notification::failure("Save Failed", e.to_string()));
            }
        }
    }
}
