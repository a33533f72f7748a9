use super::driver::{initialize_all, prepare_drivers, ActorDriver, RunSettings, Startup};
use super::{ActorOutcome, ActorReport, Director, DirectorHandle, RunFuture, RunReport, RunState, Termination};
use crate::activity::ActivityMonitor;
use crate::config::RuntimeConfig;
use crate::errors::{ActorError, DirectorError, Severity};
use crate::events::RunEventKind;
use crate::graph::Graph;
use crate::id::RunId;
use crate::port::Port;
use chrono::Utc;
use std::collections::HashMap;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// # ProcessDirector
///
/// Runs every actor of a graph on its own tokio task, the process-network
/// model: actors block in receiver reads and writes, and the run ends when
/// every actor has finished. If every live actor is blocked at once, the
/// director closes all receivers so the blocked readers observe end-of-stream
/// and the run terminates with [`Termination::Deadlock`]. An actor whose
/// `prefire` declines parks until another actor makes progress, so it counts
/// as blocked too; if nothing but such actors is left after the receivers
/// are closed, they finish as exhausted.
pub struct ProcessDirector {
    handle: DirectorHandle,
    settings: RunSettings,
}

impl ProcessDirector {
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            handle: DirectorHandle::new(config.director.event_buffer),
            settings: RunSettings::from_config(config),
        }
    }

    async fn run_graph(&mut self, graph: &mut Graph) -> Result<RunReport, DirectorError> {
        let run_id = RunId::generate();
        let cancel = self.handle.begin_run(run_id)?;
        let mut drivers = match prepare_drivers(graph, &cancel, &self.handle, self.settings) {
            Ok(drivers) => drivers,
            Err(e) => {
                self.handle.end_run(RunState::Error);
                return Err(e.into());
            }
        };

        let started_at = Utc::now();
        let clock = Instant::now();
        info!("Starting run {} of graph {} with {} actors", run_id, graph.name(), drivers.len());

        let rank: HashMap<String, usize> = drivers
            .iter()
            .enumerate()
            .map(|(i, d)| (d.name().to_string(), i))
            .collect();
        let graph_name = graph.name().to_string();
        let report = |mut actors: Vec<ActorReport>, state, termination| {
            actors.sort_by_key(|a| rank.get(&a.name).copied().unwrap_or(usize::MAX));
            RunReport {
                run_id,
                graph: graph_name.clone(),
                state,
                termination,
                actors,
                started_at,
                elapsed_ms: clock.elapsed().as_millis() as u64,
            }
        };

        if let Startup::Aborted(index, source) = initialize_all(&mut drivers).await {
            let actor = drivers[index].name().to_string();
            let failed = report(
                drivers.iter().map(ActorDriver::report).collect(),
                RunState::Error,
                Termination::Failed {
                    actor: actor.clone(),
                },
            );
            graph.restore(drivers.into_iter().map(ActorDriver::into_actor).collect());
            self.handle.end_run(RunState::Error);
            return Err(DirectorError::Initialization {
                actor,
                source,
                report: Box::new(failed),
            });
        }

        self.handle.set_state(RunState::Running);

        let (mut finished, live): (Vec<_>, Vec<_>) = drivers.into_iter().partition(ActorDriver::is_done);
        let monitor = ActivityMonitor::new();
        monitor.set_active(live.len());

        let mut inputs: Vec<Port> = Vec::new();
        let mut tasks = JoinSet::new();
        let mut task_actors: HashMap<tokio::task::Id, (String, Vec<Port>)> = HashMap::new();
        for mut driver in live {
            driver.attach(monitor.clone());
            let ports = driver.ports();
            inputs.extend(ports.iter().filter(|p| p.is_input()).cloned());
            let name = driver.name().to_string();
            let span = driver.span();
            let task = tasks.spawn(
                async move {
                    let fatal = driver.run_to_completion().await;
                    driver.wrapup().await;
                    (driver, fatal)
                }
                .instrument(span),
            );
            task_actors.insert(task.id(), (name, ports));
        }

        let mut failure: Option<(String, ActorError)> = None;
        let mut lost: Vec<ActorReport> = Vec::new();
        let mut deadlocked = false;

        loop {
            tokio::select! {
                joined = tasks.join_next_with_id() => match joined {
                    None => break,
                    Some(Ok((_, (driver, fatal)))) => {
                        if let Some(e) = fatal {
                            if failure.is_none() {
                                failure = Some((driver.name().to_string(), e));
                            }
                            cancel.cancel();
                        }
                        finished.push(driver);
                    }
                    Some(Err(join_error)) => {
                        // The actor is gone with its task; release whoever it was talking to.
                        let (name, ports) = task_actors
                            .remove(&join_error.id())
                            .unwrap_or_else(|| ("<unknown>".to_string(), Vec::new()));
                        error!(actor = %name, "Actor task died: {}", join_error);
                        for port in &ports {
                            if port.is_output() {
                                port.set_finished();
                            }
                            if port.is_input() {
                                port.close();
                            }
                        }
                        monitor.retire();

                        let reason = format!("task died: {}", join_error);
                        lost.push(ActorReport {
                            name: name.clone(),
                            iterations: 0,
                            processing_errors: 0,
                            outcome: ActorOutcome::Failed { reason: reason.clone() },
                        });
                        if failure.is_none() {
                            failure = Some((
                                name.clone(),
                                ActorError::processing(name, Severity::Fatal, reason),
                            ));
                        }
                        cancel.cancel();
                    }
                },
                _ = monitor.deadlocked(), if !monitor.is_quiesced() => {
                    if deadlocked {
                        // Closing the receivers left only actors whose prefire keeps declining.
                        debug!("Still deadlocked after closing receivers, finishing parked actors");
                        monitor.quiesce();
                    } else {
                        deadlocked = true;
                        let blocked = monitor.counts().blocked;
                        warn!("Deadlock: all {} live actors are blocked, closing receivers", blocked);
                        self.handle.emit(RunEventKind::DeadlockDetected { blocked });
                        for port in &inputs {
                            port.close();
                        }
                    }
                }
            }
        }

        let (state, termination) = match &failure {
            Some((actor, _)) => (
                RunState::Error,
                Termination::Failed {
                    actor: actor.clone(),
                },
            ),
            None if self.handle.stop_requested() => (RunState::Finished, Termination::Stopped),
            None if deadlocked => (RunState::Finished, Termination::Deadlock),
            None => (RunState::Finished, Termination::Exhausted),
        };
        let actors = finished.iter().map(ActorDriver::report).chain(lost).collect();
        let report = report(actors, state, termination);
        graph.restore(finished.into_iter().map(ActorDriver::into_actor).collect());
        self.handle.end_run(state);

        info!(
            "Run {} finished in {} ms: {:?}",
            run_id, report.elapsed_ms, report.termination
        );
        match failure {
            Some((actor, source)) => Err(DirectorError::ActorFailed {
                actor,
                source,
                report: Box::new(report),
            }),
            None => Ok(report),
        }
    }
}

impl Director for ProcessDirector {
    fn handle(&self) -> DirectorHandle {
        self.handle.clone()
    }

    fn run<'g>(&'g mut self, graph: &'g mut Graph) -> RunFuture<'g> {
        let span = info_span!("run", graph = %graph.name());
        Box::pin(self.run_graph(graph).instrument(span))
    }
}
