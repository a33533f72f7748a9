use crate::actor::{Actor, ActorContext, ActorCore, ActorFuture};
use crate::errors::ActorError;
use crate::port::Port;

/// # Trigger
///
/// One-shot source: sends a single text message on `output` and finishes.
pub struct Trigger {
    core: ActorCore,
    output: Port,
    fired: bool,
}

impl Trigger {
    pub const OUTPUT: &'static str = "output";
    /// Text body of the emitted message.
    pub const VALUE: &'static str = "value";

    pub fn new(name: impl Into<String>) -> Result<Self, ActorError> {
        let mut core = ActorCore::new(name);
        core.parameters_mut().declare(Self::VALUE, "trigger")?;
        let output = core.ports_mut().add_output(Self::OUTPUT)?;
        Ok(Self {
            core,
            output,
            fired: false,
        })
    }
}

impl Actor for Trigger {
    fn core(&self) -> &ActorCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ActorCore {
        &mut self.core
    }

    fn initialize<'a>(&'a mut self, _ctx: &'a ActorContext) -> ActorFuture<'a> {
        self.fired = false;
        Box::pin(async { Ok(()) })
    }

    fn prefire(&self, _ctx: &ActorContext) -> Result<bool, ActorError> {
        Ok(!self.fired)
    }

    fn fire<'a>(&'a mut self, ctx: &'a ActorContext) -> ActorFuture<'a> {
        Box::pin(async move {
            let value = self.core.parameters().get_text(Self::VALUE).unwrap_or_default();
            self.output.send(ctx.text(value)).await?;
            Ok(())
        })
    }

    fn postfire(&mut self, _ctx: &ActorContext) -> Result<bool, ActorError> {
        self.fired = true;
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{PortMode, PortSet};

    #[tokio::test]
    async fn test_trigger_fires_once() {
        let mut trigger = Trigger::new("t").unwrap();
        trigger.core.parameters_mut().set(Trigger::VALUE, "go").unwrap();
        let mut sink = PortSet::new("sink");
        let input = sink.add_input("in", PortMode::Push).unwrap();
        trigger.output.connect(&input).unwrap();

        let ctx = ActorContext::detached(&trigger.core);
        trigger.initialize(&ctx).await.unwrap();
        assert!(trigger.prefire(&ctx).unwrap());
        trigger.fire(&ctx).await.unwrap();
        assert!(!trigger.postfire(&ctx).unwrap());
        assert!(!trigger.prefire(&ctx).unwrap());

        let message = input.try_get(0).unwrap().unwrap();
        assert_eq!(message.body_text().unwrap(), "go");
        assert_eq!(message.source(), Some("t"));
    }
}
