//! # Directors
//!
//! A director takes a [`Graph`], drives every actor through its lifecycle and
//! decides when the run is over. Two directors are provided:
//!
//! * [`ProcessDirector`] runs each actor on its own task. Actors block in
//!   receiver waits and global deadlock is detected through the activity
//!   monitor.
//! * [`SequentialDirector`] round-robins ready actors on the calling task and
//!   exposes single iterations through [`SequentialRun::run_iteration`].
//!
//! Both are controlled through a cloneable [`DirectorHandle`] (stop, pause,
//! resume, runtime parameter updates, event subscription) and both end a run
//! with a [`RunReport`].

mod driver;
pub mod process;
pub mod schedule;
pub mod sequential;

pub use process::ProcessDirector;
pub use schedule::schedule;
pub use sequential::{IterationOutcome, SequentialDirector, SequentialRun};

use crate::config::{DirectorMode, RuntimeConfig};
use crate::errors::DirectorError;
use crate::events::{RunEvent, RunEventKind};
use crate::graph::Graph;
use crate::id::RunId;
use crate::parameter::ParameterValue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Future returned by [`Director::run`].
pub type RunFuture<'g> = Pin<Box<dyn Future<Output = Result<RunReport, DirectorError>> + Send + 'g>>;

pub trait Director: Send {
    /// A handle for controlling and observing runs of this director.
    fn handle(&self) -> DirectorHandle;

    /// Runs `graph` to completion.
    ///
    /// Deadlock and a cooperative stop end the run normally. A fatal actor
    /// error fails it with a [`DirectorError`] that names the actor and
    /// carries the report of what had completed by then.
    fn run<'g>(&'g mut self, graph: &'g mut Graph) -> RunFuture<'g>;
}

/// Builds the director selected by `config.director.mode`.
pub fn from_config(config: &RuntimeConfig) -> Box<dyn Director> {
    match config.director.mode {
        DirectorMode::Process => Box::new(ProcessDirector::new(config)),
        DirectorMode::Sequential => Box::new(SequentialDirector::new(config)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunState {
    NotStarted,
    Running,
    Paused,
    Finished,
    Error,
}

impl RunState {
    pub fn is_active(self) -> bool {
        matches!(self, RunState::Running | RunState::Paused)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::NotStarted => "not-started",
            RunState::Running => "running",
            RunState::Paused => "paused",
            RunState::Finished => "finished",
            RunState::Error => "error",
        };
        write!(f, "{}", name)
    }
}

/// Why a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cause", rename_all = "kebab-case")]
pub enum Termination {
    /// Every actor completed or ran out of input.
    Exhausted,
    /// Every live actor was blocked; receivers were closed to end the run.
    Deadlock,
    /// [`DirectorHandle::stop`] was called.
    Stopped,
    /// A fatal error in the named actor aborted the run.
    Failed { actor: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum ActorOutcome {
    /// `postfire` returned false, finish was requested or the iteration cap was hit.
    Completed,
    /// Its inputs, or everything downstream of it, ran out.
    Exhausted,
    /// A non-fatal initialization error kept it out of the run.
    Skipped { reason: String },
    /// A non-fatal processing error removed it from the schedule.
    Excluded { reason: String },
    Failed { reason: String },
    Stopped,
    NotStarted,
}

impl ActorOutcome {
    /// True for outcomes that count as normal completion.
    pub fn is_success(&self) -> bool {
        matches!(self, ActorOutcome::Completed | ActorOutcome::Exhausted)
    }
}

impl fmt::Display for ActorOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActorOutcome::Completed => write!(f, "completed"),
            ActorOutcome::Exhausted => write!(f, "exhausted"),
            ActorOutcome::Skipped { reason } => write!(f, "skipped ({})", reason),
            ActorOutcome::Excluded { reason } => write!(f, "excluded ({})", reason),
            ActorOutcome::Failed { reason } => write!(f, "failed ({})", reason),
            ActorOutcome::Stopped => write!(f, "stopped"),
            ActorOutcome::NotStarted => write!(f, "not started"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorReport {
    pub name: String,
    pub iterations: u64,
    pub processing_errors: u64,
    #[serde(flatten)]
    pub outcome: ActorOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub graph: String,
    pub state: RunState,
    pub termination: Termination,
    /// One entry per actor, in schedule order.
    pub actors: Vec<ActorReport>,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl RunReport {
    pub fn actor(&self, name: &str) -> Option<&ActorReport> {
        self.actors.iter().find(|a| a.name == name)
    }

    pub fn is_success(&self) -> bool {
        self.state == RunState::Finished
    }

    /// True when the run failed after some actors had already finished normally.
    pub fn is_partially_complete(&self) -> bool {
        self.state == RunState::Error && self.actors.iter().any(|a| a.outcome.is_success())
    }
}

/// A runtime parameter edit queued for an actor task.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ParameterUpdate {
    pub name: String,
    pub value: ParameterValue,
}

struct HandleInner {
    state: watch::Sender<RunState>,
    paused: watch::Sender<bool>,
    cancel: Mutex<CancellationToken>,
    stop_requested: Mutex<bool>,
    run_id: Mutex<Option<RunId>>,
    events: broadcast::Sender<RunEvent>,
    parameters: Mutex<HashMap<String, mpsc::UnboundedSender<ParameterUpdate>>>,
}

/// # DirectorHandle
///
/// Cloneable control surface of a director. `stop` is cooperative: it cancels
/// the run's token, which every actor observes at its next prefire boundary
/// and inside any receiver wait.
#[derive(Clone)]
pub struct DirectorHandle {
    inner: Arc<HandleInner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DirectorHandle {
    pub(crate) fn new(event_buffer: usize) -> Self {
        let (state, _) = watch::channel(RunState::NotStarted);
        let (paused, _) = watch::channel(false);
        let (events, _) = broadcast::channel(event_buffer.max(1));
        Self {
            inner: Arc::new(HandleInner {
                state,
                paused,
                cancel: Mutex::new(CancellationToken::new()),
                stop_requested: Mutex::new(false),
                run_id: Mutex::new(None),
                events,
                parameters: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Requests a cooperative stop of the current run. Issued while no run is
    /// active, the stop stays pending and ends the next run at its first
    /// prefire boundary.
    pub fn stop(&self) {
        info!("Stop requested");
        *lock(&self.inner.stop_requested) = true;
        lock(&self.inner.cancel).cancel();
    }

    /// Holds every actor at its next prefire boundary.
    pub fn pause(&self) {
        self.inner.paused.send_replace(true);
        if self.state() == RunState::Running {
            self.set_state(RunState::Paused);
        }
    }

    pub fn resume(&self) {
        self.inner.paused.send_replace(false);
        if self.state() == RunState::Paused {
            self.set_state(RunState::Running);
        }
    }

    pub fn state(&self) -> RunState {
        *self.inner.state.borrow()
    }

    /// A receiver that observes every run state change.
    pub fn watch_state(&self) -> watch::Receiver<RunState> {
        self.inner.state.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.inner.events.subscribe()
    }

    /// Id of the current or most recent run.
    pub fn run_id(&self) -> Option<RunId> {
        *lock(&self.inner.run_id)
    }

    /// Queues a parameter change for a running actor. It is applied at the
    /// actor's next prefire boundary.
    pub fn set_parameter(
        &self,
        actor: &str,
        name: &str,
        value: impl Into<ParameterValue>,
    ) -> Result<(), DirectorError> {
        let parameters = lock(&self.inner.parameters);
        let sender = parameters
            .get(actor)
            .ok_or_else(|| DirectorError::UnknownActor(actor.to_string()))?;
        sender
            .send(ParameterUpdate {
                name: name.to_string(),
                value: value.into(),
            })
            .map_err(|_| DirectorError::UnknownActor(actor.to_string()))
    }

    /// Starts a new run: fresh token, fresh id, cleared pause flag. A stop
    /// requested before the run cancels the new token right away.
    pub(crate) fn begin_run(&self, run_id: RunId) -> Result<CancellationToken, DirectorError> {
        if self.state().is_active() {
            return Err(DirectorError::AlreadyRunning);
        }
        let token = CancellationToken::new();
        if *lock(&self.inner.stop_requested) {
            info!("Stop was requested before run {} started", run_id);
            token.cancel();
        }
        *lock(&self.inner.cancel) = token.clone();
        *lock(&self.inner.run_id) = Some(run_id);
        self.inner.paused.send_replace(false);
        Ok(token)
    }

    /// Ends the current run. The termination cause must be settled before
    /// this, as it clears the stop request.
    pub(crate) fn end_run(&self, state: RunState) {
        lock(&self.inner.parameters).clear();
        *lock(&self.inner.stop_requested) = false;
        self.set_state(state);
    }

    pub(crate) fn stop_requested(&self) -> bool {
        *lock(&self.inner.stop_requested)
    }

    pub(crate) fn paused(&self) -> watch::Receiver<bool> {
        self.inner.paused.subscribe()
    }

    pub(crate) fn register_actor(&self, actor: &str) -> mpsc::UnboundedReceiver<ParameterUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.inner.parameters).insert(actor.to_string(), tx);
        rx
    }

    pub(crate) fn set_state(&self, state: RunState) {
        let previous = self.inner.state.send_replace(state);
        if previous != state {
            debug!("Run state {} -> {}", previous, state);
            self.emit(RunEventKind::RunStateChanged { state });
        }
    }

    pub(crate) fn emit(&self, kind: RunEventKind) {
        if let Some(run_id) = self.run_id() {
            // no subscribers is fine
            let _ = self.inner.events.send(RunEvent::new(run_id, kind));
        }
    }
}

impl fmt::Debug for DirectorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectorHandle")
            .field("state", &self.state())
            .field("run_id", &self.run_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(actors: Vec<ActorReport>, state: RunState) -> RunReport {
        RunReport {
            run_id: RunId::generate(),
            graph: "g".into(),
            state,
            termination: Termination::Failed { actor: "b".into() },
            actors,
            started_at: Utc::now(),
            elapsed_ms: 1,
        }
    }

    fn actor(name: &str, outcome: ActorOutcome) -> ActorReport {
        ActorReport {
            name: name.into(),
            iterations: 0,
            processing_errors: 0,
            outcome,
        }
    }

    #[test]
    fn test_partially_complete_requires_failure_and_a_finished_actor() {
        let partial = report(
            vec![
                actor("a", ActorOutcome::Completed),
                actor("b", ActorOutcome::Failed { reason: "x".into() }),
            ],
            RunState::Error,
        );
        assert!(partial.is_partially_complete());

        let nothing = report(
            vec![actor("b", ActorOutcome::Failed { reason: "x".into() })],
            RunState::Error,
        );
        assert!(!nothing.is_partially_complete());
    }

    #[test]
    fn test_report_json_shape() {
        let r = report(vec![actor("a", ActorOutcome::Skipped { reason: "no file".into() })], RunState::Error);
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["termination"]["cause"], "failed");
        assert_eq!(json["termination"]["actor"], "b");
        assert_eq!(json["actors"][0]["status"], "skipped");
        assert_eq!(json["state"], "error");
    }

    #[tokio::test]
    async fn test_handle_state_and_events() {
        let handle = DirectorHandle::new(8);
        let mut events = handle.subscribe();
        assert_eq!(handle.state(), RunState::NotStarted);

        let token = handle.begin_run(RunId::generate()).unwrap();
        handle.set_state(RunState::Running);
        assert!(matches!(handle.begin_run(RunId::generate()), Err(DirectorError::AlreadyRunning)));

        handle.pause();
        assert_eq!(handle.state(), RunState::Paused);
        assert!(*handle.paused().borrow());
        handle.resume();
        assert_eq!(handle.state(), RunState::Running);

        handle.stop();
        assert!(token.is_cancelled());
        assert!(handle.stop_requested());

        let first = events.recv().await.unwrap();
        assert_eq!(first.kind, RunEventKind::RunStateChanged { state: RunState::Running });
    }

    #[test]
    fn test_stop_before_run_is_kept_for_the_next_run() {
        let handle = DirectorHandle::new(8);
        handle.stop();

        let token = handle.begin_run(RunId::generate()).unwrap();
        assert!(token.is_cancelled());
        assert!(handle.stop_requested());
        handle.end_run(RunState::Finished);

        assert!(!handle.stop_requested());
        let next = handle.begin_run(RunId::generate()).unwrap();
        assert!(!next.is_cancelled());
    }

    #[test]
    fn test_set_parameter_unknown_actor() {
        let handle = DirectorHandle::new(8);
        let mut rx = handle.register_actor("counter");
        handle.set_parameter("counter", "start", 3i64).unwrap();
        assert_eq!(rx.try_recv().unwrap().value, ParameterValue::Int(3));
        assert!(matches!(
            handle.set_parameter("nobody", "start", 1i64),
            Err(DirectorError::UnknownActor(_))
        ));
    }
}
