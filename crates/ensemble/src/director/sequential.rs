use super::driver::{initialize_all, prepare_drivers, ActorDriver, RunSettings, Startup, Step, TriggerStatus};
use super::{ActorOutcome, Director, DirectorHandle, RunFuture, RunReport, RunState, Termination};
use crate::config::RuntimeConfig;
use crate::errors::{ActorError, DirectorError};
use crate::events::RunEventKind;
use crate::graph::Graph;
use crate::id::RunId;
use crate::receiver::ReceiverPolicy;
use chrono::{DateTime, Utc};
use std::time::Instant;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Result of one [`SequentialRun::run_iteration`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationOutcome {
    /// The run goes on; `fired` actors completed a firing in this iteration.
    Progress { fired: usize },
    /// Every actor is done; call [`SequentialRun::finish`] for the report.
    Finished,
}

/// # SequentialDirector
///
/// Fires actors one at a time on the calling task, round-robin in schedule
/// order. An actor is fired when its trigger inputs hold a token (or it has
/// none). An iteration in which nothing fires, or a `fire` that stays blocked
/// past the configured timeout, means no actor can make progress: that is a
/// deadlock, and it is resolved by closing every receiver. Bounded receivers
/// must reject rather than block when full: a graph with a blocking one is
/// refused at [`SequentialDirector::start`].
///
/// [`SequentialDirector::start`] exposes the run one iteration at a time;
/// [`Director::run`] drives it to the end.
pub struct SequentialDirector {
    handle: DirectorHandle,
    settings: RunSettings,
}

impl SequentialDirector {
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            handle: DirectorHandle::new(config.director.event_buffer),
            settings: RunSettings::from_config(config),
        }
    }

    /// Initializes every actor of `graph` and returns the run, ready for its
    /// first iteration. The graph stays borrowed until the run is finished or
    /// dropped.
    pub async fn start<'g>(&self, graph: &'g mut Graph) -> Result<SequentialRun<'g>, DirectorError> {
        let run_id = RunId::generate();
        let cancel = self.handle.begin_run(run_id)?;
        let drivers = match prepare_drivers(graph, &cancel, &self.handle, self.settings) {
            Ok(drivers) => drivers,
            Err(e) => {
                self.handle.end_run(RunState::Error);
                return Err(e.into());
            }
        };
        if let Some(port) = blocking_port(&drivers, self.settings.receiver_policy) {
            graph.restore(drivers.into_iter().map(ActorDriver::into_actor).collect());
            self.handle.end_run(RunState::Error);
            return Err(DirectorError::Unsupported(format!(
                "{} is a bounded receiver that blocks its producers, which would suspend the only task",
                port
            )));
        }
        info!("Starting run {} of graph {} with {} actors", run_id, graph.name(), drivers.len());

        let mut run = SequentialRun {
            graph,
            handle: self.handle.clone(),
            settings: self.settings,
            cancel,
            drivers,
            run_id,
            started_at: Utc::now(),
            clock: Instant::now(),
            iteration: 0,
            deadlocked: false,
            abandoned: false,
            ended: false,
            failure: None,
            fatal: None,
            restored: false,
        };

        if let Startup::Aborted(index, source) = initialize_all(&mut run.drivers).await {
            let actor = run.drivers[index].name().to_string();
            run.failure = Some(actor.clone());
            run.ended = true;
            let report = run.close(RunState::Error);
            return Err(DirectorError::Initialization {
                actor,
                source,
                report: Box::new(report),
            });
        }

        self.handle.set_state(RunState::Running);
        Ok(run)
    }
}

impl Director for SequentialDirector {
    fn handle(&self) -> DirectorHandle {
        self.handle.clone()
    }

    fn run<'g>(&'g mut self, graph: &'g mut Graph) -> RunFuture<'g> {
        let span = info_span!("run", graph = %graph.name());
        Box::pin(
            async move {
                let mut run = self.start(graph).await?;
                while let IterationOutcome::Progress { .. } = run.run_iteration().await {}
                run.finish().await
            }
            .instrument(span),
        )
    }
}

/// A run of a [`SequentialDirector`] in progress.
///
/// Dropping an unfinished run releases every actor without awaiting its
/// `wrapup` and puts the actors back into the graph.
pub struct SequentialRun<'g> {
    graph: &'g mut Graph,
    handle: DirectorHandle,
    settings: RunSettings,
    cancel: CancellationToken,
    drivers: Vec<ActorDriver>,
    run_id: RunId,
    started_at: DateTime<Utc>,
    clock: Instant,
    iteration: u64,
    deadlocked: bool,
    /// Finished before every actor was done.
    abandoned: bool,
    ended: bool,
    failure: Option<String>,
    fatal: Option<ActorError>,
    restored: bool,
}

impl<'g> SequentialRun<'g> {
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Iterations run so far.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn is_finished(&self) -> bool {
        self.ended
    }

    /// How the run ended, once it has.
    pub fn termination(&self) -> Option<Termination> {
        if !self.ended && !self.abandoned {
            return None;
        }
        Some(match &self.failure {
            Some(actor) => Termination::Failed {
                actor: actor.clone(),
            },
            None if self.abandoned || self.handle.stop_requested() => Termination::Stopped,
            None if self.deadlocked => Termination::Deadlock,
            None => Termination::Exhausted,
        })
    }

    /// Gives every unfinished actor one chance to fire, in schedule order.
    pub async fn run_iteration(&mut self) -> IterationOutcome {
        if self.ended {
            return IterationOutcome::Finished;
        }
        if !wait_while_paused(self.handle.paused(), self.cancel.clone()).await {
            self.ended = true;
            return IterationOutcome::Finished;
        }
        self.iteration += 1;
        debug!("Iteration {}", self.iteration);

        let fire_timeout = self.settings.fire_timeout;
        let mut fired = 0;
        let mut progressed = false;
        let mut stalled = false;
        let mut fatal: Option<(usize, ActorError)> = None;

        for index in 0..self.drivers.len() {
            if self.cancel.is_cancelled() {
                break;
            }
            let driver = &mut self.drivers[index];
            if driver.is_done() {
                continue;
            }
            match driver.trigger_status() {
                TriggerStatus::Waiting => continue,
                TriggerStatus::Exhausted => {
                    driver.finish(ActorOutcome::Exhausted);
                    driver.wrapup().await;
                    progressed = true;
                    continue;
                }
                TriggerStatus::Free | TriggerStatus::Ready => {}
            }

            let before = driver.iterations();
            let step = driver.iterate(Some(fire_timeout)).await;
            if driver.iterations() > before {
                fired += 1;
                progressed = true;
            }
            match step {
                Step::Fired | Step::Skipped => {}
                Step::Aborted => progressed = true,
                Step::Stalled => {
                    stalled = true;
                    break;
                }
                Step::Finished(outcome) => {
                    driver.finish(outcome);
                    driver.wrapup().await;
                    progressed = true;
                }
                Step::Failed(e) => {
                    fatal = Some((index, e));
                    break;
                }
            }
        }

        if let Some((index, e)) = fatal {
            let actor = self.drivers[index].name().to_string();
            error!(actor = %actor, error = %e, "Run failed");
            self.failure = Some(actor);
            self.fatal = Some(e);
            self.cancel.cancel();
            self.ended = true;
            return IterationOutcome::Finished;
        }
        if self.cancel.is_cancelled() {
            self.ended = true;
            return IterationOutcome::Finished;
        }
        if self.drivers.iter().all(ActorDriver::is_done) {
            self.ended = true;
            return IterationOutcome::Finished;
        }

        if stalled || !progressed {
            if self.deadlocked {
                // Closing the receivers did not unstick anyone either.
                for driver in self.drivers.iter_mut().filter(|d| !d.is_done()) {
                    driver.finish(ActorOutcome::Exhausted);
                }
                self.ended = true;
                return IterationOutcome::Finished;
            }
            self.resolve_deadlock();
        }
        IterationOutcome::Progress { fired }
    }

    /// Wraps up every actor, puts them back into the graph and reports.
    /// Finishing a run that has not ended stops it.
    pub async fn finish(mut self) -> Result<RunReport, DirectorError> {
        if !self.ended {
            debug!("Finishing run {} early", self.run_id);
            self.abandoned = true;
            self.cancel.cancel();
            self.ended = true;
        }
        for driver in self.drivers.iter_mut() {
            driver.wrapup().await;
        }

        let state = if self.failure.is_some() {
            RunState::Error
        } else {
            RunState::Finished
        };
        let report = self.close(state);
        info!(
            "Run {} finished in {} ms: {:?}",
            report.run_id, report.elapsed_ms, report.termination
        );
        match (self.failure.take(), self.fatal.take()) {
            (Some(actor), Some(source)) => Err(DirectorError::ActorFailed {
                actor,
                source,
                report: Box::new(report),
            }),
            _ => Ok(report),
        }
    }

    fn resolve_deadlock(&mut self) {
        self.deadlocked = true;
        let blocked = self.drivers.iter().filter(|d| !d.is_done()).count();
        warn!("Deadlock: no progress among {} live actors, closing receivers", blocked);
        self.handle.emit(RunEventKind::DeadlockDetected { blocked });
        for driver in &self.drivers {
            for port in driver.ports().iter().filter(|p| p.is_input()) {
                port.close();
            }
        }
    }

    /// Builds the report and returns the actors to the graph.
    fn close(&mut self, state: RunState) -> RunReport {
        let termination = self.termination().unwrap_or(Termination::Stopped);
        let report = RunReport {
            run_id: self.run_id,
            graph: self.graph.name().to_string(),
            state,
            termination,
            actors: self.drivers.iter().map(ActorDriver::report).collect(),
            started_at: self.started_at,
            elapsed_ms: self.clock.elapsed().as_millis() as u64,
        };
        self.restore();
        self.handle.end_run(state);
        report
    }

    fn restore(&mut self) {
        if self.restored {
            return;
        }
        self.restored = true;
        let drivers = std::mem::take(&mut self.drivers);
        self.graph
            .restore(drivers.into_iter().map(ActorDriver::into_actor).collect());
    }
}

/// First input port, as `actor.port`, whose receivers would suspend a
/// producer when full. Such a put can only be drained by another actor,
/// and under this director no other actor runs while one is suspended.
fn blocking_port(drivers: &[ActorDriver], default_policy: ReceiverPolicy) -> Option<String> {
    drivers.iter().find_map(|driver| {
        driver
            .ports()
            .into_iter()
            .filter(|port| port.is_input())
            .find(|port| {
                port.receiver_policy()
                    .unwrap_or(default_policy)
                    .suspends_producers()
            })
            .map(|port| format!("{}.{}", driver.name(), port.name()))
    })
}

/// Parks while the run is paused. Returns false if the run was cancelled.
async fn wait_while_paused(mut paused: watch::Receiver<bool>, cancel: CancellationToken) -> bool {
    if !*paused.borrow() {
        return !cancel.is_cancelled();
    }
    debug!("Run paused");
    tokio::select! {
        result = paused.wait_for(|paused| !*paused) => result.is_ok() && !cancel.is_cancelled(),
        _ = cancel.cancelled() => false,
    }
}

impl Drop for SequentialRun<'_> {
    fn drop(&mut self) {
        if self.restored {
            return;
        }
        warn!("Run {} dropped before it finished", self.run_id);
        self.cancel.cancel();
        for driver in self.drivers.iter_mut() {
            driver.abandon();
        }
        self.restore();
        self.handle.end_run(RunState::Finished);
    }
}
