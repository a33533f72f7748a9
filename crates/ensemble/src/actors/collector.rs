use super::drain;
use crate::actor::{Actor, ActorContext, ActorCore, ActorFuture};
use crate::errors::ActorError;
use crate::message::Message;
use crate::port::{Port, PortMode};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Messages recorded by a [`Collector`], shared with whoever built the graph.
#[derive(Debug, Clone, Default)]
pub struct Collected(Arc<Mutex<Vec<Message>>>);

impl Collected {
    fn lock(&self) -> MutexGuard<'_, Vec<Message>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn messages(&self) -> Vec<Message> {
        self.lock().clone()
    }

    /// Bodies of the recorded messages as text; non-UTF-8 bodies are skipped.
    pub fn texts(&self) -> Vec<String> {
        self.lock()
            .iter()
            .filter_map(|m| m.body_text().ok().map(str::to_string))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

/// # Collector
///
/// Sink that records every message arriving on `input`.
pub struct Collector {
    core: ActorCore,
    input: Port,
    collected: Collected,
}

impl Collector {
    pub const INPUT: &'static str = "input";

    pub fn new(name: impl Into<String>) -> Result<Self, ActorError> {
        let mut core = ActorCore::new(name);
        let input = core.ports_mut().add_input(Self::INPUT, PortMode::Push)?;
        Ok(Self {
            core,
            input,
            collected: Collected::default(),
        })
    }

    pub fn collected(&self) -> Collected {
        self.collected.clone()
    }
}

impl Actor for Collector {
    fn core(&self) -> &ActorCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ActorCore {
        &mut self.core
    }

    fn fire<'a>(&'a mut self, _ctx: &'a ActorContext) -> ActorFuture<'a> {
        Box::pin(async move {
            let messages = drain(&self.input)?;
            self.collected.lock().extend(messages);
            Ok(())
        })
    }
}
