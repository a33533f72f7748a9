use super::drain;
use crate::actor::{Actor, ActorContext, ActorCore, ActorFuture, DynamicPorts};
use crate::errors::{ActorError, Severity};
use crate::parameter::ParameterChange;
use crate::port::{Port, PortKind, PortMode};
use tracing::debug;

/// # Merge
///
/// Forwards every token from its inputs `input0 .. inputN-1` to `output`.
/// The number of inputs follows the `inputs` parameter; changing it between
/// runs adds or removes ports, keeping the connections of the ports that
/// remain.
pub struct Merge {
    core: ActorCore,
    inputs: Vec<Port>,
    output: Port,
}

impl Merge {
    pub const OUTPUT: &'static str = "output";

    pub fn new(name: impl Into<String>, inputs: usize) -> Result<Self, ActorError> {
        let mut core = ActorCore::new(name);
        core.parameters_mut()
            .declare(Self::COUNT_PARAMETER, inputs as i64)?;
        let output = core.ports_mut().add_output(Self::OUTPUT)?;
        let mut merge = Self {
            core,
            inputs: Vec::new(),
            output,
        };
        merge.inputs = merge.sync_ports()?;
        Ok(merge)
    }

    pub fn inputs(&self) -> &[Port] {
        &self.inputs
    }
}

impl DynamicPorts for Merge {
    const COUNT_PARAMETER: &'static str = "inputs";
    const PREFIX: &'static str = "input";
    const KIND: PortKind = PortKind::Input;
    const MODE: PortMode = PortMode::Push;
}

impl Actor for Merge {
    fn core(&self) -> &ActorCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ActorCore {
        &mut self.core
    }

    fn update(&mut self, change: &ParameterChange) -> Result<(), ActorError> {
        if change.name != Self::COUNT_PARAMETER {
            return Ok(());
        }
        if self.core.ports().is_frozen() {
            return Err(ActorError::processing(
                self.core.name(),
                Severity::NonFatal,
                "the number of inputs can only change between runs",
            ));
        }
        self.inputs = self.sync_ports()?;
        debug!("{} now has {} inputs", self.core.name(), self.inputs.len());
        Ok(())
    }

    fn fire<'a>(&'a mut self, _ctx: &'a ActorContext) -> ActorFuture<'a> {
        Box::pin(async move {
            for input in &self.inputs {
                for message in drain(input)? {
                    self.output.send(message).await?;
                }
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inputs_follow_parameter() {
        let mut merge = Merge::new("merge", 2).unwrap();
        assert_eq!(merge.inputs().len(), 2);

        merge.core_mut().parameters_mut().set("inputs", 4i64).unwrap();
        crate::actor::apply_parameter_changes(&mut merge).unwrap();
        let names: Vec<String> = merge.inputs().iter().map(Port::name).collect();
        assert_eq!(names, vec!["input0", "input1", "input2", "input3"]);

        merge.core_mut().parameters_mut().set("inputs", 1i64).unwrap();
        crate::actor::apply_parameter_changes(&mut merge).unwrap();
        assert_eq!(merge.inputs().len(), 1);
        assert!(merge.core().ports().get("input1").is_none());
        assert!(merge.core().ports().get("output").is_some());
    }
}
