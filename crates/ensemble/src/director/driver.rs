//! Per-actor execution shared by both directors: initialization, trigger
//! handling, one firing at a time, error classification and wrapup.

use super::schedule::topological_order;
use super::{ActorOutcome, ActorReport, DirectorHandle, ParameterUpdate};
use crate::activity::ActivityMonitor;
use crate::actor::{apply_parameter_changes, Actor, ActorContext, LifecycleState};
use crate::config::{ErrorPolicy, RuntimeConfig};
use crate::errors::{ActorError, GraphError, Severity};
use crate::events::RunEventKind;
use crate::graph::Graph;
use crate::port::Port;
use crate::receiver::ReceiverPolicy;
use futures::future::{select_all, FutureExt};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy)]
pub(crate) struct RunSettings {
    pub receiver_policy: ReceiverPolicy,
    pub max_iterations: Option<u64>,
    pub on_processing_error: ErrorPolicy,
    pub fire_timeout: Duration,
}

impl RunSettings {
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self {
            receiver_policy: config.receiver,
            max_iterations: config.director.max_iterations,
            on_processing_error: config.director.on_processing_error,
            fire_timeout: Duration::from_millis(config.director.fire_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TriggerStatus {
    /// No connected push inputs; the actor fires whenever it is scheduled.
    Free,
    /// Some push input holds a token.
    Ready,
    /// Push inputs are open but empty.
    Waiting,
    /// Every push input is finished and drained.
    Exhausted,
}

#[derive(Debug)]
pub(crate) enum Step {
    Fired,
    /// A non-fatal error abandoned the iteration; the actor stays scheduled.
    Aborted,
    /// `prefire` declined.
    Skipped,
    Finished(ActorOutcome),
    /// `fire` exceeded its time budget.
    Stalled,
    Failed(ActorError),
}

pub(crate) struct ActorDriver {
    actor: Box<dyn Actor>,
    ctx: ActorContext,
    handle: DirectorHandle,
    settings: RunSettings,
    updates: mpsc::UnboundedReceiver<ParameterUpdate>,
    paused: watch::Receiver<bool>,
    monitor: Option<Arc<ActivityMonitor>>,
    iterations: u64,
    processing_errors: u64,
    outcome: Option<ActorOutcome>,
    initialized: bool,
    wrapped_up: bool,
}

impl ActorDriver {
    pub fn new(
        actor: Box<dyn Actor>,
        cancel: CancellationToken,
        handle: &DirectorHandle,
        settings: RunSettings,
    ) -> Self {
        let ctx = ActorContext::new(actor.core(), cancel);
        let updates = handle.register_actor(actor.name());
        Self {
            actor,
            ctx,
            handle: handle.clone(),
            settings,
            updates,
            paused: handle.paused(),
            monitor: None,
            iterations: 0,
            processing_errors: 0,
            outcome: None,
            initialized: false,
            wrapped_up: false,
        }
    }

    pub fn name(&self) -> &str {
        self.actor.name()
    }

    pub fn span(&self) -> tracing::Span {
        self.ctx.span().clone()
    }

    pub fn ports(&self) -> Vec<Port> {
        self.actor.core().ports().iter().cloned().collect()
    }

    pub fn is_done(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Records the outcome; the first one recorded wins.
    pub fn finish(&mut self, outcome: ActorOutcome) {
        if self.outcome.is_none() {
            debug!("{} finished: {}", self.name(), outcome);
            self.outcome = Some(outcome);
        }
    }

    /// Prepares the actor for a run and calls its `initialize`.
    ///
    /// Pending parameter changes are delivered first, while the port set can
    /// still be resized. The ports are then frozen and bound to the run's
    /// token, and inbound receivers are emptied.
    pub async fn initialize(&mut self) -> Result<(), ActorError> {
        let core = self.actor.core();
        if !core.state().can_transition_to(LifecycleState::Initialized) {
            return Err(ActorError::Lifecycle {
                actor: core.name().to_string(),
                from: core.state(),
                to: LifecycleState::Initialized,
            });
        }
        core.clear_finish_request();
        apply_parameter_changes(self.actor.as_mut())?;

        let core = self.actor.core();
        core.ports().freeze(self.ctx.cancellation().clone());
        for port in core.ports().inputs() {
            port.reset_receivers(self.settings.receiver_policy);
        }

        self.initialized = true;
        let result = match AssertUnwindSafe(self.actor.initialize(&self.ctx))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => Err(self.panicked("initialize", panic)),
        };
        if let Err(e) = result {
            let _ = self.actor.core_mut().transition(LifecycleState::Error);
            return Err(e);
        }

        self.actor.core_mut().transition(LifecycleState::Initialized)?;
        self.handle.emit(RunEventKind::ActorInitialized {
            actor: self.name().to_string(),
        });
        Ok(())
    }

    pub fn attach(&mut self, monitor: Arc<ActivityMonitor>) {
        self.ctx.activity().attach(Arc::clone(&monitor));
        self.monitor = Some(monitor);
    }

    pub fn trigger_status(&self) -> TriggerStatus {
        let triggers = self.actor.core().trigger_ports();
        if triggers.is_empty() {
            TriggerStatus::Free
        } else if triggers.iter().any(Port::has_any_token) {
            TriggerStatus::Ready
        } else if triggers.iter().all(Port::is_exhausted) {
            TriggerStatus::Exhausted
        } else {
            TriggerStatus::Waiting
        }
    }

    /// Waits until some trigger input holds a token (`true`) or all of them
    /// are exhausted (`false`). Takes the ports rather than `&self` so the
    /// wait does not borrow the actor.
    async fn wait_for_trigger(triggers: &[Port]) -> Result<bool, ActorError> {
        let mut pending: Vec<_> = triggers.iter().map(|p| p.wait_for_token().boxed()).collect();
        while !pending.is_empty() {
            let (result, _, rest) = select_all(pending).await;
            match result? {
                true => return Ok(true),
                false => pending = rest,
            }
        }
        Ok(false)
    }

    /// Parks while the run is paused. Returns false if the run was cancelled.
    async fn wait_while_paused(&mut self) -> bool {
        if !*self.paused.borrow() {
            return true;
        }
        debug!("{} paused", self.name());
        tokio::select! {
            result = self.paused.wait_for(|paused| !*paused) => result.is_ok(),
            _ = self.ctx.cancellation().cancelled() => false,
        }
    }

    /// Applies queued runtime parameter updates.
    fn apply_updates(&mut self) {
        while let Ok(update) = self.updates.try_recv() {
            self.apply_update(update);
        }
    }

    /// A rejected update is rolled back and counted as a processing error.
    fn apply_update(&mut self, update: ParameterUpdate) {
        let parameters = self.actor.core_mut().parameters_mut();
        if let Err(e) = parameters.set(&update.name, update.value) {
            self.note_update_error(&ActorError::from(e));
            return;
        }
        for change in self.actor.core_mut().parameters_mut().take_changes() {
            if let Err(e) = self.actor.update(&change) {
                let parameters = self.actor.core_mut().parameters_mut();
                let _ = parameters.set(&change.name, change.previous.clone());
                parameters.take_changes();
                self.note_update_error(&e);
            }
        }
    }

    fn note_progress(&self) {
        if let Some(monitor) = &self.monitor {
            monitor.note_progress();
        }
    }

    /// Parks an actor whose `prefire` declined until another actor makes
    /// progress, a parameter update arrives or the run is cancelled. Returns
    /// false once the director has given up on parked actors.
    async fn park_until_progress(&mut self, seen: u64) -> bool {
        let Some(monitor) = self.monitor.clone() else {
            tokio::task::yield_now().await;
            return true;
        };
        let cancel = self.ctx.cancellation().clone();
        let update = tokio::select! {
            progressed = monitor.wait_for_progress(seen) => return progressed,
            update = self.updates.recv() => update,
            _ = cancel.cancelled() => return true,
        };
        match update {
            Some(update) => {
                self.apply_update(update);
                true
            }
            None => tokio::select! {
                progressed = monitor.wait_for_progress(seen) => progressed,
                _ = cancel.cancelled() => true,
            },
        }
    }

    fn note_update_error(&mut self, error: &ActorError) {
        warn!(actor = %self.name(), error = %error, "Parameter update rejected");
        self.processing_errors += 1;
        self.handle.emit(RunEventKind::ProcessingError {
            actor: self.name().to_string(),
            severity: Severity::NonFatal,
            message: error.to_string(),
        });
    }

    fn panicked(&self, phase: &str, panic: Box<dyn Any + Send>) -> ActorError {
        let detail = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        ActorError::processing(self.name(), Severity::Fatal, format!("{} panicked: {}", phase, detail))
    }

    /// Runs one prefire/fire/postfire cycle. `fire_timeout` bounds the time
    /// `fire` may stay blocked in a receiver wait; a `fire` that is busy
    /// rather than blocked is given as long as it needs.
    pub async fn iterate(&mut self, fire_timeout: Option<Duration>) -> Step {
        if self.ctx.is_cancelled() {
            return Step::Finished(ActorOutcome::Stopped);
        }
        self.apply_updates();
        if self.actor.core().is_finish_requested() {
            return Step::Finished(ActorOutcome::Completed);
        }
        if let Err(e) = self.actor.core_mut().transition(LifecycleState::Prefired) {
            return self.handle_error(e);
        }

        let prefire = std::panic::catch_unwind(AssertUnwindSafe(|| self.actor.prefire(&self.ctx)));
        match prefire {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) => return Step::Skipped,
            Ok(Err(e)) => return self.handle_error(e),
            Err(panic) => return self.handle_error(self.panicked("prefire", panic)),
        }

        let activity = Arc::clone(self.ctx.activity());
        let fire = AssertUnwindSafe(self.actor.fire(&self.ctx)).catch_unwind();
        let fired = match fire_timeout {
            Some(limit) => {
                tokio::pin!(fire);
                loop {
                    match tokio::time::timeout(limit, fire.as_mut()).await {
                        Ok(fired) => break Some(fired),
                        Err(_) if activity.is_blocked() => break None,
                        Err(_) => continue,
                    }
                }
            }
            None => Some(fire.await),
        };
        let Some(fired) = fired else {
            warn!("{}: fire blocked for more than {:?}", self.name(), fire_timeout.unwrap_or_default());
            return Step::Stalled;
        };
        match fired {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return self.handle_error(e),
            Err(panic) => return self.handle_error(self.panicked("fire", panic)),
        }
        if let Err(e) = self.actor.core_mut().transition(LifecycleState::Fired) {
            return self.handle_error(e);
        }
        self.iterations += 1;
        self.handle.emit(RunEventKind::ActorFired {
            actor: self.name().to_string(),
            iteration: self.iterations,
        });

        let postfire = std::panic::catch_unwind(AssertUnwindSafe(|| self.actor.postfire(&self.ctx)));
        let keep_going = match postfire {
            Ok(Ok(keep_going)) => keep_going,
            Ok(Err(e)) => return self.handle_error(e),
            Err(panic) => return self.handle_error(self.panicked("postfire", panic)),
        };
        if let Err(e) = self.actor.core_mut().transition(LifecycleState::Postfired) {
            return self.handle_error(e);
        }

        if !keep_going || self.actor.core().is_finish_requested() {
            return Step::Finished(ActorOutcome::Completed);
        }
        if let Some(max) = self.settings.max_iterations {
            if self.iterations >= max {
                debug!("{} reached {} iterations", self.name(), max);
                return Step::Finished(ActorOutcome::Completed);
            }
        }
        Step::Fired
    }

    /// Classifies an error raised at the firing boundary.
    pub fn handle_error(&mut self, error: ActorError) -> Step {
        if error.is_exhaustion() {
            debug!("{}: {}", self.name(), error);
            return match error {
                ActorError::Cancelled => Step::Finished(ActorOutcome::Stopped),
                _ if self.ctx.is_cancelled() => Step::Finished(ActorOutcome::Stopped),
                _ => Step::Finished(ActorOutcome::Exhausted),
            };
        }

        self.handle.emit(RunEventKind::ProcessingError {
            actor: self.name().to_string(),
            severity: error.severity(),
            message: error.to_string(),
        });

        match error.severity() {
            Severity::NonFatal => {
                self.processing_errors += 1;
                warn!(actor = %self.name(), error = %error, "Processing error");
                match self.settings.on_processing_error {
                    ErrorPolicy::Continue => Step::Aborted,
                    ErrorPolicy::Exclude => Step::Finished(ActorOutcome::Excluded {
                        reason: error.to_string(),
                    }),
                }
            }
            Severity::Fatal => {
                error!(actor = %self.name(), error = %error, "Fatal error");
                let _ = self.actor.core_mut().transition(LifecycleState::Error);
                self.finish(ActorOutcome::Failed {
                    reason: error.to_string(),
                });
                Step::Failed(error)
            }
        }
    }

    /// Process-mode loop: waits for triggers and fires until the actor is
    /// done. Returns the fatal error, if that is how it ended.
    pub async fn run_to_completion(&mut self) -> Option<ActorError> {
        loop {
            if self.ctx.is_cancelled() || !self.wait_while_paused().await {
                self.finish(ActorOutcome::Stopped);
                return None;
            }

            match self.trigger_status() {
                TriggerStatus::Free | TriggerStatus::Ready => {}
                TriggerStatus::Exhausted => {
                    self.finish(ActorOutcome::Exhausted);
                    return None;
                }
                TriggerStatus::Waiting => {
                    let triggers = self.actor.core().trigger_ports();
                    match Self::wait_for_trigger(&triggers).await {
                        Ok(true) => continue,
                        Ok(false) => {
                            self.finish(ActorOutcome::Exhausted);
                            return None;
                        }
                        Err(e) => match self.handle_error(e) {
                            Step::Finished(outcome) => {
                                self.finish(outcome);
                                return None;
                            }
                            Step::Failed(e) => return Some(e),
                            _ => continue,
                        },
                    }
                }
            }

            let seen = self.monitor.as_ref().map_or(0, |m| m.epoch());
            match self.iterate(None).await {
                Step::Fired | Step::Aborted => {
                    self.note_progress();
                    tokio::task::yield_now().await;
                }
                Step::Stalled => tokio::task::yield_now().await,
                Step::Skipped => {
                    if !self.park_until_progress(seen).await {
                        debug!("{} never became ready again", self.name());
                        self.finish(ActorOutcome::Exhausted);
                        return None;
                    }
                }
                Step::Finished(outcome) => {
                    self.finish(outcome);
                    return None;
                }
                Step::Failed(e) => return Some(e),
            }
        }
    }

    /// Ends the actor's part in the run. Signals end-of-stream downstream,
    /// closes its own inputs, leaves the activity monitor and calls `wrapup`.
    /// Errors from `wrapup` are logged, never propagated. Runs at most once
    /// per run and only if `initialize` was invoked.
    pub async fn wrapup(&mut self) {
        if !self.initialized || self.wrapped_up {
            return;
        }
        self.wrapped_up = true;

        self.close_ports();
        let activity = self.ctx.activity();
        activity.release();
        activity.detach();
        if let Some(monitor) = self.monitor.take() {
            monitor.retire();
        }

        match AssertUnwindSafe(self.actor.wrapup(&self.ctx))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(actor = %self.name(), error = %e, "Wrapup failed"),
            Err(panic) => {
                let e = self.panicked("wrapup", panic);
                error!(actor = %self.name(), error = %e, "Wrapup failed");
            }
        }

        self.settle();
        let outcome = self.outcome.get_or_insert(ActorOutcome::Stopped).to_string();
        info!("{} wrapped up: {}", self.name(), outcome);
        self.handle.emit(RunEventKind::ActorFinished {
            actor: self.name().to_string(),
            outcome,
        });
    }

    /// Releases the actor without awaiting its `wrapup`, for runs that are
    /// dropped midway.
    pub fn abandon(&mut self) {
        if !self.initialized || self.wrapped_up {
            return;
        }
        self.wrapped_up = true;
        self.close_ports();
        self.ctx.activity().detach();
        if let Some(monitor) = self.monitor.take() {
            monitor.retire();
        }
        let _ = self.actor.core_mut().transition(LifecycleState::Error);
        self.settle();
        self.finish(ActorOutcome::Stopped);
    }

    fn close_ports(&self) {
        let ports = self.actor.core().ports();
        for port in ports.outputs() {
            port.set_finished();
        }
        for port in ports.inputs() {
            port.close();
        }
    }

    fn settle(&mut self) {
        let core = self.actor.core_mut();
        let _ = core.transition(LifecycleState::WrappedUp);
        let _ = core.transition(LifecycleState::Terminated);
        core.ports().unfreeze();
    }

    pub fn report(&self) -> ActorReport {
        ActorReport {
            name: self.name().to_string(),
            iterations: self.iterations,
            processing_errors: self.processing_errors,
            outcome: self.outcome.clone().unwrap_or(ActorOutcome::NotStarted),
        }
    }

    pub fn into_actor(self) -> Box<dyn Actor> {
        self.actor
    }
}

/// Takes the actors out of `graph` and wraps each in a driver, in schedule
/// order.
pub(crate) fn prepare_drivers(
    graph: &mut Graph,
    cancel: &CancellationToken,
    handle: &DirectorHandle,
    settings: RunSettings,
) -> Result<Vec<ActorDriver>, GraphError> {
    let order = topological_order(graph.len(), &graph.edges());
    let mut actors: Vec<Option<Box<dyn Actor>>> =
        graph.take_actors()?.into_iter().map(Some).collect();
    Ok(order
        .into_iter()
        .filter_map(|i| actors[i].take())
        .map(|actor| ActorDriver::new(actor, cancel.clone(), handle, settings))
        .collect())
}

/// Result of initializing every driver in order.
pub(crate) enum Startup {
    Ready,
    /// A fatal initialization error in the driver at this index.
    Aborted(usize, ActorError),
}

/// Initializes drivers in schedule order. Non-fatal failures skip the actor
/// (it is wrapped up right away); the first fatal failure wraps up every
/// actor initialized so far and stops.
pub(crate) async fn initialize_all(drivers: &mut [ActorDriver]) -> Startup {
    for index in 0..drivers.len() {
        let driver = &mut drivers[index];
        match driver.initialize().await {
            Ok(()) => {}
            Err(e) if e.is_fatal() => {
                error!(actor = %driver.name(), error = %e, "Initialization failed");
                driver.finish(ActorOutcome::Failed {
                    reason: e.to_string(),
                });
                for other in drivers.iter_mut() {
                    other.wrapup().await;
                }
                return Startup::Aborted(index, e);
            }
            Err(e) => {
                warn!(actor = %driver.name(), error = %e, "Initialization failed, skipping actor");
                let reason = e.to_string();
                driver.finish(ActorOutcome::Skipped {
                    reason: reason.clone(),
                });
                driver.handle.emit(RunEventKind::ActorSkipped {
                    actor: driver.name().to_string(),
                    reason,
                });
                driver.wrapup().await;
            }
        }
    }
    Startup::Ready
}
