//! # Actors
//!
//! An actor is an independently scheduled unit of computation with its own
//! ports and parameters. Directors drive it through the lifecycle
//! `initialize -> (prefire -> fire -> postfire)* -> wrapup`.
//!
//! Concrete actors embed an [`ActorCore`] holding the state every actor shares
//! (identity, ports, parameters, lifecycle position) and implement [`Actor`]
//! for their own behavior. Optional behavior is layered on through small
//! capability traits such as [`DynamicPorts`].

pub mod context;
pub mod lifecycle;

pub use context::ActorContext;
pub use lifecycle::LifecycleState;

use crate::activity::Activity;
use crate::errors::{ActorError, PortError};
use crate::parameter::{ParameterChange, Parameters};
use crate::port::{Port, PortKind, PortMode, PortSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Future returned by the asynchronous lifecycle methods.
pub type ActorFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ActorError>> + Send + 'a>>;

fn ready<'a>() -> ActorFuture<'a> {
    Box::pin(async { Ok(()) })
}

/// State common to every actor.
#[derive(Debug)]
pub struct ActorCore {
    name: String,
    container: Option<String>,
    parameters: Parameters,
    ports: PortSet,
    state: LifecycleState,
    finish: Arc<AtomicBool>,
}

impl ActorCore {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            parameters: Parameters::new(name.clone()),
            ports: PortSet::with_activity(name.clone(), Activity::detached()),
            name,
            container: None,
            state: LifecycleState::Created,
            finish: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the graph this actor belongs to, once added to one.
    pub fn container(&self) -> Option<&str> {
        self.container.as_deref()
    }

    pub(crate) fn set_container(&mut self, container: impl Into<String>) {
        self.container = Some(container.into());
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    pub fn parameters_mut(&mut self) -> &mut Parameters {
        &mut self.parameters
    }

    pub fn ports(&self) -> &PortSet {
        &self.ports
    }

    pub fn ports_mut(&mut self) -> &mut PortSet {
        &mut self.ports
    }

    /// Looks up a port by name.
    pub fn port(&self, name: &str) -> Result<Port, PortError> {
        self.ports.port(name)
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Moves to `to`, failing with [`ActorError::Lifecycle`] on an illegal edge.
    pub fn transition(&mut self, to: LifecycleState) -> Result<(), ActorError> {
        if !self.state.can_transition_to(to) {
            return Err(ActorError::Lifecycle {
                actor: self.name.clone(),
                from: self.state,
                to,
            });
        }
        if self.state != to {
            debug!("{}: {} -> {}", self.name, self.state, to);
        }
        self.state = to;
        Ok(())
    }

    pub fn request_finish(&self) {
        self.finish.store(true, Ordering::SeqCst);
    }

    pub fn is_finish_requested(&self) -> bool {
        self.finish.load(Ordering::SeqCst)
    }

    pub(crate) fn clear_finish_request(&self) {
        self.finish.store(false, Ordering::SeqCst);
    }

    pub(crate) fn finish_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.finish)
    }

    pub(crate) fn activity(&self) -> &Arc<Activity> {
        self.ports.activity()
    }

    /// Connected push inputs: the ports whose tokens trigger a firing.
    pub fn trigger_ports(&self) -> Vec<Port> {
        self.ports
            .inputs()
            .filter(|p| p.mode() == PortMode::Push && p.width() > 0)
            .cloned()
            .collect()
    }
}

/// # Actor
///
/// The lifecycle contract between an actor and its director.
///
/// * `initialize` resets internal state and acquires resources. An
///   [`ActorError::Initialization`] with fatal severity aborts the run; a
///   non-fatal one makes the director skip this actor.
/// * `update` receives parameter changes, always before the next `prefire`.
/// * `prefire` decides whether to fire this iteration and must not have side
///   effects visible to other actors.
/// * `fire` consumes inputs and sends outputs. It is the only method that may
///   wait on receivers.
/// * `postfire` commits the iteration and returns whether to keep firing.
/// * `wrapup` releases resources and runs once for every actor whose
///   `initialize` was invoked, whatever happened afterwards.
pub trait Actor: Send + 'static {
    fn core(&self) -> &ActorCore;

    fn core_mut(&mut self) -> &mut ActorCore;

    fn name(&self) -> &str {
        self.core().name()
    }

    fn initialize<'a>(&'a mut self, _ctx: &'a ActorContext) -> ActorFuture<'a> {
        ready()
    }

    fn update(&mut self, _change: &ParameterChange) -> Result<(), ActorError> {
        Ok(())
    }

    fn prefire(&self, _ctx: &ActorContext) -> Result<bool, ActorError> {
        Ok(true)
    }

    fn fire<'a>(&'a mut self, ctx: &'a ActorContext) -> ActorFuture<'a>;

    fn postfire(&mut self, _ctx: &ActorContext) -> Result<bool, ActorError> {
        Ok(true)
    }

    fn wrapup<'a>(&'a mut self, _ctx: &'a ActorContext) -> ActorFuture<'a> {
        ready()
    }
}

/// Delivers every pending parameter change to the actor's `update`, oldest
/// first. Returns how many were applied.
pub fn apply_parameter_changes(actor: &mut dyn Actor) -> Result<usize, ActorError> {
    let changes = actor.core_mut().parameters_mut().take_changes();
    for change in &changes {
        debug!("{}: parameter {} = {}", actor.name(), change.name, change.value);
        actor.update(change)?;
    }
    Ok(changes.len())
}

/// Capability of actors whose port family is sized by an integer parameter.
pub trait DynamicPorts: Actor {
    /// Parameter holding the number of ports.
    const COUNT_PARAMETER: &'static str;
    /// Name prefix of the family; ports are `<prefix>0 .. <prefix>N-1`.
    const PREFIX: &'static str;
    const KIND: PortKind;
    const MODE: PortMode;

    /// Resizes the family to the current parameter value.
    fn sync_ports(&mut self) -> Result<Vec<Port>, ActorError> {
        let count = self
            .core()
            .parameters()
            .get_int(Self::COUNT_PARAMETER)
            .unwrap_or(0)
            .max(0) as usize;
        let ports = self
            .core_mut()
            .ports_mut()
            .resize(Self::PREFIX, Self::KIND, Self::MODE, count)?;
        Ok(ports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo {
        core: ActorCore,
        updates: Vec<String>,
    }

    impl Actor for Echo {
        fn core(&self) -> &ActorCore {
            &self.core
        }

        fn core_mut(&mut self) -> &mut ActorCore {
            &mut self.core
        }

        fn update(&mut self, change: &ParameterChange) -> Result<(), ActorError> {
            self.updates.push(format!("{}={}", change.name, change.value));
            Ok(())
        }

        fn fire<'a>(&'a mut self, ctx: &'a ActorContext) -> ActorFuture<'a> {
            Box::pin(async move {
                let out = self.core.port("out")?;
                out.send(ctx.text("echo")).await?;
                Ok(())
            })
        }
    }

    #[test]
    fn test_transition_rejects_illegal_edges() {
        let mut core = ActorCore::new("a");
        assert!(matches!(
            core.transition(LifecycleState::Fired),
            Err(ActorError::Lifecycle { from: LifecycleState::Created, .. })
        ));
        core.transition(LifecycleState::Initialized).unwrap();
        core.transition(LifecycleState::Prefired).unwrap();
        assert_eq!(core.state(), LifecycleState::Prefired);
    }

    #[test]
    fn test_parameter_changes_reach_update_in_order() {
        let mut echo = Echo {
            core: ActorCore::new("echo"),
            updates: Vec::new(),
        };
        echo.core.parameters_mut().declare("a", 0i64).unwrap();
        echo.core.parameters_mut().declare("b", "x").unwrap();
        echo.core.parameters_mut().set("a", 1i64).unwrap();
        echo.core.parameters_mut().set("b", "y").unwrap();

        assert_eq!(apply_parameter_changes(&mut echo).unwrap(), 2);
        assert_eq!(echo.updates, vec!["a=1", "b=y"]);
        assert_eq!(apply_parameter_changes(&mut echo).unwrap(), 0);
    }

    #[test]
    fn test_trigger_ports_are_connected_push_inputs() {
        let mut core = ActorCore::new("c");
        let push = core.ports_mut().add_input("push", PortMode::Push).unwrap();
        core.ports_mut().add_input("pull", PortMode::Pull).unwrap();
        core.ports_mut().add_input("idle", PortMode::Push).unwrap();

        let mut up = PortSet::new("up");
        let out = up.add_output("out").unwrap();
        out.connect(&push).unwrap();

        let triggers = core.trigger_ports();
        assert_eq!(triggers.len(), 1);
        assert!(triggers[0].ptr_eq(&push));
    }
}
