use super::drain;
use crate::actor::{Actor, ActorContext, ActorCore, ActorFuture};
use crate::errors::ActorError;
use crate::port::{Port, PortMode};

/// # Console
///
/// Sink that prints every message arriving on `input` to stdout, one line
/// each, after the `prefix` parameter.
pub struct Console {
    core: ActorCore,
    input: Port,
}

impl Console {
    pub const INPUT: &'static str = "input";
    pub const PREFIX: &'static str = "prefix";

    pub fn new(name: impl Into<String>) -> Result<Self, ActorError> {
        let mut core = ActorCore::new(name);
        core.parameters_mut().declare(Self::PREFIX, "")?;
        let input = core.ports_mut().add_input(Self::INPUT, PortMode::Push)?;
        Ok(Self { core, input })
    }
}

impl Actor for Console {
    fn core(&self) -> &ActorCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ActorCore {
        &mut self.core
    }

    fn fire<'a>(&'a mut self, _ctx: &'a ActorContext) -> ActorFuture<'a> {
        Box::pin(async move {
            let prefix = self.core.parameters().get_text(Self::PREFIX).unwrap_or_default();
            for message in drain(&self.input)? {
                match message.body_text() {
                    Ok(text) => println!("{}{}", prefix, text),
                    Err(_) => println!(
                        "{}<{} bytes of {}>",
                        prefix,
                        message.body().len(),
                        message.mime_type()
                    ),
                }
            }
            Ok(())
        })
    }
}
