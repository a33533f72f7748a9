//! Test actors and helpers shared by the integration tests.
#![allow(dead_code)]

use ensemble::actor::{Actor, ActorContext, ActorCore, ActorFuture};
use ensemble::config::{DirectorMode, ErrorPolicy, RuntimeConfig};
use ensemble::errors::{ActorError, Severity};
use ensemble::port::{Port, PortMode};
use ensemble::receiver::ReceiverPolicy;
use std::future::Future;
use std::time::Duration;

/// Upper bound for any single test run, so a deadlock fails instead of hanging.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn guard<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(TEST_TIMEOUT, future)
        .await
        .expect("test timed out")
}

pub fn config(mode: DirectorMode) -> RuntimeConfig {
    let mut config = RuntimeConfig::default();
    config.director.mode = mode;
    config.director.fire_timeout_ms = 200;
    config
}

pub fn config_with_policy(mode: DirectorMode, policy: ErrorPolicy) -> RuntimeConfig {
    let mut config = config(mode);
    config.director.on_processing_error = policy;
    config
}

pub fn bounded_config(mode: DirectorMode, capacity: usize) -> RuntimeConfig {
    let mut config = config(mode);
    config.receiver = ReceiverPolicy::bounded(capacity);
    config
}

/// Fails `initialize` with the given severity.
pub struct FailingInit {
    core: ActorCore,
    severity: Severity,
}

impl FailingInit {
    pub fn new(name: &str, severity: Severity) -> Self {
        Self {
            core: ActorCore::new(name),
            severity,
        }
    }
}

impl Actor for FailingInit {
    fn core(&self) -> &ActorCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ActorCore {
        &mut self.core
    }

    fn initialize<'a>(&'a mut self, _ctx: &'a ActorContext) -> ActorFuture<'a> {
        Box::pin(async move {
            Err(ActorError::initialization(
                self.core.name(),
                self.severity,
                "resource unavailable",
            )
            .with_source(std::io::Error::new(std::io::ErrorKind::NotFound, "missing.dat")))
        })
    }

    fn fire<'a>(&'a mut self, _ctx: &'a ActorContext) -> ActorFuture<'a> {
        Box::pin(async { Ok(()) })
    }
}

/// Forwards one token per firing from push input `input` to `output`, and
/// fails with `severity` on any token whose body equals `poison`.
pub struct Flaky {
    core: ActorCore,
    input: Port,
    output: Port,
    poison: String,
    severity: Severity,
}

impl Flaky {
    pub fn new(name: &str, poison: &str, severity: Severity) -> Self {
        let mut core = ActorCore::new(name);
        let input = core.ports_mut().add_input("input", PortMode::Push).unwrap();
        let output = core.ports_mut().add_output("output").unwrap();
        Self {
            core,
            input,
            output,
            poison: poison.to_string(),
            severity,
        }
    }
}

impl Actor for Flaky {
    fn core(&self) -> &ActorCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ActorCore {
        &mut self.core
    }

    fn fire<'a>(&'a mut self, _ctx: &'a ActorContext) -> ActorFuture<'a> {
        Box::pin(async move {
            let message = self.input.get_any().await?;
            if message.body_text()? == self.poison {
                return Err(ActorError::processing(
                    self.core.name(),
                    self.severity,
                    format!("cannot handle '{}'", self.poison),
                )
                .with_message(message));
            }
            self.output.send(message).await?;
            Ok(())
        })
    }
}

/// Reads its pull input with a blocking `get` inside `fire` and forwards the
/// token. Two of these wired into a ring wait on each other forever.
pub struct PullRelay {
    core: ActorCore,
    input: Port,
    output: Port,
}

impl PullRelay {
    pub fn new(name: &str) -> Self {
        let mut core = ActorCore::new(name);
        let input = core.ports_mut().add_input("input", PortMode::Pull).unwrap();
        let output = core.ports_mut().add_output("output").unwrap();
        Self {
            core,
            input,
            output,
        }
    }
}

impl Actor for PullRelay {
    fn core(&self) -> &ActorCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ActorCore {
        &mut self.core
    }

    fn fire<'a>(&'a mut self, _ctx: &'a ActorContext) -> ActorFuture<'a> {
        Box::pin(async move {
            let message = self.input.get(0).await?;
            self.output.send(message).await?;
            Ok(())
        })
    }
}

/// Panics when fired.
pub struct Panicker {
    core: ActorCore,
}

impl Panicker {
    pub fn new(name: &str) -> Self {
        Self {
            core: ActorCore::new(name),
        }
    }
}

impl Actor for Panicker {
    fn core(&self) -> &ActorCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ActorCore {
        &mut self.core
    }

    fn fire<'a>(&'a mut self, _ctx: &'a ActorContext) -> ActorFuture<'a> {
        Box::pin(async move {
            if self.core.ports().is_empty() {
                panic!("boom");
            }
            Ok(())
        })
    }
}

/// Never ready to fire; its output stays silent for the whole run.
pub struct Idle {
    core: ActorCore,
}

impl Idle {
    pub fn new(name: &str) -> Self {
        let mut core = ActorCore::new(name);
        core.ports_mut().add_output("output").unwrap();
        Self { core }
    }
}

impl Actor for Idle {
    fn core(&self) -> &ActorCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ActorCore {
        &mut self.core
    }

    fn prefire(&self, _ctx: &ActorContext) -> Result<bool, ActorError> {
        Ok(false)
    }

    fn fire<'a>(&'a mut self, _ctx: &'a ActorContext) -> ActorFuture<'a> {
        Box::pin(async { Ok(()) })
    }
}

/// Sends every value in a single firing, then completes.
pub struct Burst {
    core: ActorCore,
    output: Port,
    values: Vec<String>,
}

impl Burst {
    pub fn new(name: &str, values: &[&str]) -> Self {
        let mut core = ActorCore::new(name);
        let output = core.ports_mut().add_output("output").unwrap();
        Self {
            core,
            output,
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }
}

impl Actor for Burst {
    fn core(&self) -> &ActorCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ActorCore {
        &mut self.core
    }

    fn fire<'a>(&'a mut self, ctx: &'a ActorContext) -> ActorFuture<'a> {
        Box::pin(async move {
            for value in &self.values {
                self.output.send(ctx.text(value.clone())).await?;
            }
            Ok(())
        })
    }

    fn postfire(&mut self, _ctx: &ActorContext) -> Result<bool, ActorError> {
        Ok(false)
    }
}

/// Takes `delay` to compute each value, without touching any receiver.
/// Emits its firing count and completes after `firings`.
pub struct Slow {
    core: ActorCore,
    output: Port,
    delay: Duration,
    firings: u64,
    fired: u64,
}

impl Slow {
    pub fn new(name: &str, delay: Duration, firings: u64) -> Self {
        let mut core = ActorCore::new(name);
        let output = core.ports_mut().add_output("output").unwrap();
        Self {
            core,
            output,
            delay,
            firings,
            fired: 0,
        }
    }
}

impl Actor for Slow {
    fn core(&self) -> &ActorCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ActorCore {
        &mut self.core
    }

    fn initialize<'a>(&'a mut self, _ctx: &'a ActorContext) -> ActorFuture<'a> {
        self.fired = 0;
        Box::pin(async { Ok(()) })
    }

    fn fire<'a>(&'a mut self, ctx: &'a ActorContext) -> ActorFuture<'a> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            self.output.send(ctx.text(self.fired.to_string())).await?;
            Ok(())
        })
    }

    fn postfire(&mut self, _ctx: &ActorContext) -> Result<bool, ActorError> {
        self.fired += 1;
        Ok(self.fired < self.firings)
    }
}

/// Pull-input relay that declines to fire until a token is buffered or
/// its input has run out.
pub struct Gated {
    core: ActorCore,
    input: Port,
    output: Port,
}

impl Gated {
    pub fn new(name: &str) -> Self {
        let mut core = ActorCore::new(name);
        let input = core.ports_mut().add_input("input", PortMode::Pull).unwrap();
        let output = core.ports_mut().add_output("output").unwrap();
        Self { core, input, output }
    }
}

impl Actor for Gated {
    fn core(&self) -> &ActorCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ActorCore {
        &mut self.core
    }

    fn prefire(&self, _ctx: &ActorContext) -> Result<bool, ActorError> {
        Ok(self.input.has_any_token() || self.input.is_exhausted())
    }

    fn fire<'a>(&'a mut self, _ctx: &'a ActorContext) -> ActorFuture<'a> {
        Box::pin(async move {
            if let Some(message) = self.input.try_get_any()? {
                self.output.send(message).await?;
            }
            Ok(())
        })
    }
}
