use crate::actor::{Actor, ActorContext, ActorCore, ActorFuture};
use crate::errors::ActorError;
use crate::port::Port;

/// # Sequence
///
/// Finite source: sends its values on `output`, one per firing, and finishes
/// after the last one.
pub struct Sequence {
    core: ActorCore,
    output: Port,
    values: Vec<String>,
    next: usize,
}

impl Sequence {
    pub const OUTPUT: &'static str = "output";

    pub fn new<I, S>(name: impl Into<String>, values: I) -> Result<Self, ActorError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut core = ActorCore::new(name);
        let output = core.ports_mut().add_output(Self::OUTPUT)?;
        Ok(Self {
            core,
            output,
            values: values.into_iter().map(Into::into).collect(),
            next: 0,
        })
    }

    pub fn remaining(&self) -> usize {
        self.values.len() - self.next
    }
}

impl Actor for Sequence {
    fn core(&self) -> &ActorCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ActorCore {
        &mut self.core
    }

    fn initialize<'a>(&'a mut self, _ctx: &'a ActorContext) -> ActorFuture<'a> {
        self.next = 0;
        Box::pin(async { Ok(()) })
    }

    fn fire<'a>(&'a mut self, ctx: &'a ActorContext) -> ActorFuture<'a> {
        Box::pin(async move {
            if let Some(value) = self.values.get(self.next) {
                self.output.send(ctx.text(value.clone())).await?;
            }
            Ok(())
        })
    }

    fn postfire(&mut self, _ctx: &ActorContext) -> Result<bool, ActorError> {
        self.next = (self.next + 1).min(self.values.len());
        Ok(self.next < self.values.len())
    }
}
