use super::drain;
use crate::actor::{Actor, ActorContext, ActorCore, ActorFuture};
use crate::errors::ActorError;
use crate::port::{Port, PortMode};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// # Counter
///
/// Emits the decimal string of a running count on `output`, then commits the
/// increment in `postfire`.
///
/// Any token on the pull input `reset` puts the count back to the `start`
/// parameter before the firing emits. With `trigger` connected, the counter
/// consumes one trigger token per firing; otherwise it is free-running.
pub struct Counter {
    core: ActorCore,
    trigger: Port,
    reset: Port,
    output: Port,
    count: Arc<AtomicI64>,
}

impl Counter {
    pub const START: &'static str = "start";
    pub const TRIGGER: &'static str = "trigger";
    pub const RESET: &'static str = "reset";
    pub const OUTPUT: &'static str = "output";

    pub fn new(name: impl Into<String>, start: i64) -> Result<Self, ActorError> {
        let mut core = ActorCore::new(name);
        core.parameters_mut().declare(Self::START, start)?;
        let trigger = core.ports_mut().add_input(Self::TRIGGER, PortMode::Push)?;
        let reset = core.ports_mut().add_input(Self::RESET, PortMode::Pull)?;
        let output = core.ports_mut().add_output(Self::OUTPUT)?;
        Ok(Self {
            core,
            trigger,
            reset,
            output,
            count: Arc::new(AtomicI64::new(start)),
        })
    }

    /// Shared view of the current count, readable while the graph runs.
    pub fn count_handle(&self) -> Arc<AtomicI64> {
        Arc::clone(&self.count)
    }

    fn start(&self) -> i64 {
        self.core.parameters().get_int(Self::START).unwrap_or(0)
    }
}

impl Actor for Counter {
    fn core(&self) -> &ActorCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ActorCore {
        &mut self.core
    }

    fn initialize<'a>(&'a mut self, _ctx: &'a ActorContext) -> ActorFuture<'a> {
        self.count.store(self.start(), Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }

    fn fire<'a>(&'a mut self, ctx: &'a ActorContext) -> ActorFuture<'a> {
        Box::pin(async move {
            if !drain(&self.reset)?.is_empty() {
                self.count.store(self.start(), Ordering::SeqCst);
            }
            if self.trigger.width() > 0 {
                self.trigger.get_any().await?;
            }
            let count = self.count.load(Ordering::SeqCst);
            self.output.send(ctx.text(count.to_string())).await?;
            Ok(())
        })
    }

    fn postfire(&mut self, _ctx: &ActorContext) -> Result<bool, ActorError> {
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use crate::port::PortSet;

    #[tokio::test]
    async fn test_reset_before_first_fire_emits_start() {
        let mut counter = Counter::new("counter", 5).unwrap();
        let mut env = PortSet::new("env");
        let reset = env.add_output("reset").unwrap();
        let sink = env.add_input("sink", PortMode::Pull).unwrap();
        reset.connect(&counter.reset).unwrap();
        counter.output.connect(&sink).unwrap();

        let ctx = ActorContext::detached(&counter.core);
        counter.initialize(&ctx).await.unwrap();
        counter.count.store(40, Ordering::SeqCst);
        reset.send(Message::text("reset")).await.unwrap();

        let mut seen = Vec::new();
        for _ in 0..3 {
            counter.fire(&ctx).await.unwrap();
            assert!(counter.postfire(&ctx).unwrap());
            seen.push(sink.try_get(0).unwrap().unwrap().body_text().unwrap().to_string());
        }
        assert_eq!(seen, vec!["5", "6", "7"]);
        assert_eq!(counter.count_handle().load(Ordering::SeqCst), 8);
    }
}
