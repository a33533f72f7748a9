//! # Errors
//!
//! Error types for every layer of the runtime, from a single receiver up to a
//! whole director run. Actor-level failures carry a [`Severity`] that decides
//! whether the director isolates the failing actor or aborts the run.

use crate::actor::LifecycleState;
use crate::director::RunReport;
use crate::message::Message;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// How far an actor failure is allowed to propagate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Severity {
    /// Stops the whole run.
    Fatal,
    /// Isolated to the actor that raised it.
    NonFatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Fatal => write!(f, "fatal"),
            Severity::NonFatal => write!(f, "non-fatal"),
        }
    }
}

/// A message could not be built or read in the requested format.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid message format: {0}")]
pub struct FormatError(pub String);

/// An interceptor stage rejected or failed to transform a message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("interceptor stage '{stage}' failed: {reason}")]
pub struct MessageTransformError {
    pub stage: String,
    pub reason: String,
}

impl MessageTransformError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            stage: String::new(),
            reason: reason.into(),
        }
    }

    /// Tags the error with the stage that produced it, unless a stage is already set.
    pub fn at_stage(mut self, stage: &str) -> Self {
        if self.stage.is_empty() {
            self.stage = stage.to_string();
        }
        self
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverError {
    /// The receiver was marked finished and accepts no more puts.
    #[error("receiver is closed")]
    Closed,

    /// The receiver is finished and every buffered message has been consumed.
    #[error("no more tokens")]
    NoMoreTokens,

    /// A bounded receiver with the reject policy is at capacity.
    #[error("receiver is full (capacity {0})")]
    Full(usize),

    /// The run was cancelled while waiting.
    #[error("wait cancelled")]
    Cancelled,
}

#[derive(Error, Debug)]
pub enum PortError {
    #[error("cannot connect {from} to {to}: {reason}")]
    Connection {
        from: String,
        to: String,
        reason: String,
    },

    #[error("illegal state for port {port}: {reason}")]
    IllegalState { port: String, reason: String },

    #[error("port {port} has no channel {channel} (width {width})")]
    NoSuchChannel {
        port: String,
        channel: usize,
        width: usize,
    },

    #[error("actor {actor} has no port named {port}")]
    NoSuchPort { actor: String, port: String },

    #[error("no more tokens on {port}")]
    NoMoreTokens { port: String },

    #[error("every receiver downstream of {port} is closed")]
    Closed { port: String },

    #[error("receiver downstream of {port} is full (capacity {capacity})")]
    Full { port: String, capacity: usize },

    #[error("wait on {port} was cancelled")]
    Cancelled { port: String },

    #[error("transform on {port} failed: {source}")]
    Transform {
        port: String,
        #[source]
        source: MessageTransformError,
    },
}

impl PortError {
    pub(crate) fn from_receiver(port: &str, error: ReceiverError) -> Self {
        let port = port.to_string();
        match error {
            ReceiverError::Closed => PortError::Closed { port },
            ReceiverError::NoMoreTokens => PortError::NoMoreTokens { port },
            ReceiverError::Full(capacity) => PortError::Full { port, capacity },
            ReceiverError::Cancelled => PortError::Cancelled { port },
        }
    }

    pub(crate) fn illegal_state(port: &str, reason: impl Into<String>) -> Self {
        PortError::IllegalState {
            port: port.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParameterError {
    #[error("actor {actor} has no parameter named {name}")]
    Unknown { actor: String, name: String },

    #[error("parameter {name} expects a {expected} value, got {found}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("parameter {name} is already declared")]
    Duplicate { name: String },
}

/// # ActorError
///
/// Failures raised by an actor's lifecycle methods or by the port operations
/// they call. `NoMoreTokens` and `Cancelled` are expected signals rather than
/// faults; the director treats them as the actor running out of work.
#[derive(Error, Debug)]
pub enum ActorError {
    #[error("initialization of {actor} failed ({severity}): {message}")]
    Initialization {
        actor: String,
        severity: Severity,
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    #[error("processing in {actor} failed ({severity}): {message}")]
    Processing {
        actor: String,
        severity: Severity,
        message: String,
        offending: Option<Message>,
        #[source]
        source: Option<anyhow::Error>,
    },

    #[error("no more tokens on {port}")]
    NoMoreTokens { port: String },

    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Port(PortError),

    #[error(transparent)]
    Parameter(#[from] ParameterError),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("illegal lifecycle transition for {actor}: {from} -> {to}")]
    Lifecycle {
        actor: String,
        from: LifecycleState,
        to: LifecycleState,
    },
}

impl From<PortError> for ActorError {
    fn from(error: PortError) -> Self {
        match error {
            PortError::NoMoreTokens { port } => ActorError::NoMoreTokens { port },
            PortError::Cancelled { .. } => ActorError::Cancelled,
            other => ActorError::Port(other),
        }
    }
}

impl ActorError {
    pub fn initialization(
        actor: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        ActorError::Initialization {
            actor: actor.into(),
            severity,
            message: message.into(),
            source: None,
        }
    }

    pub fn processing(
        actor: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        ActorError::Processing {
            actor: actor.into(),
            severity,
            message: message.into(),
            offending: None,
            source: None,
        }
    }

    /// Attaches a root cause to an initialization or processing error.
    pub fn with_source(mut self, cause: impl Into<anyhow::Error>) -> Self {
        match &mut self {
            ActorError::Initialization { source, .. } | ActorError::Processing { source, .. } => {
                *source = Some(cause.into());
            }
            _ => {}
        }
        self
    }

    /// Attaches the message that was being processed when the error occurred.
    pub fn with_message(mut self, message: Message) -> Self {
        if let ActorError::Processing { offending, .. } = &mut self {
            *offending = Some(message);
        }
        self
    }

    pub fn severity(&self) -> Severity {
        match self {
            ActorError::Initialization { severity, .. } | ActorError::Processing { severity, .. } => {
                *severity
            }
            ActorError::Lifecycle { .. } => Severity::Fatal,
            ActorError::Port(PortError::Connection { .. })
            | ActorError::Port(PortError::IllegalState { .. }) => Severity::Fatal,
            _ => Severity::NonFatal,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    /// True for the signals that mean "no more work" rather than a fault:
    /// upstream exhaustion, downstream gone, or cancellation.
    pub fn is_exhaustion(&self) -> bool {
        matches!(
            self,
            ActorError::NoMoreTokens { .. }
                | ActorError::Cancelled
                | ActorError::Port(PortError::Closed { .. })
        )
    }

    pub fn offending_message(&self) -> Option<&Message> {
        match self {
            ActorError::Processing { offending, .. } => offending.as_ref(),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("graph already contains an actor named {0}")]
    DuplicateActor(String),

    #[error("graph has no actor named {0}")]
    UnknownActor(String),

    #[error("invalid port path '{0}', expected <actor>.<port>")]
    InvalidPath(String),

    #[error("actor {0} is not available (a previous run lost it)")]
    ActorUnavailable(String),

    #[error(transparent)]
    Port(#[from] PortError),

    #[error(transparent)]
    Actor(#[from] ActorError),
}

impl From<ParameterError> for GraphError {
    fn from(error: ParameterError) -> Self {
        GraphError::Actor(ActorError::Parameter(error))
    }
}

/// # DirectorError
///
/// Reasons a director run did not complete normally. Deadlock and cooperative
/// stop are not errors; they end the run with a [`RunReport`].
#[derive(Error, Debug)]
pub enum DirectorError {
    #[error("actor {actor} failed to initialize: {source}")]
    Initialization {
        actor: String,
        #[source]
        source: ActorError,
        report: Box<RunReport>,
    },

    #[error("actor {actor} failed: {source}")]
    ActorFailed {
        actor: String,
        #[source]
        source: ActorError,
        report: Box<RunReport>,
    },

    #[error("director is already running")]
    AlreadyRunning,

    #[error("director has no actor named {0}")]
    UnknownActor(String),

    #[error("graph cannot run under this director: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl DirectorError {
    /// The actor that caused the run to fail, if any.
    pub fn failed_actor(&self) -> Option<&str> {
        match self {
            DirectorError::Initialization { actor, .. } | DirectorError::ActorFailed { actor, .. } => {
                Some(actor)
            }
            _ => None,
        }
    }

    pub fn report(&self) -> Option<&RunReport> {
        match self {
            DirectorError::Initialization { report, .. } | DirectorError::ActorFailed { report, .. } => {
                Some(report)
            }
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_error_maps_to_actor_signals() {
        let exhausted: ActorError = PortError::NoMoreTokens {
            port: "counter.trigger".into(),
        }
        .into();
        assert!(exhausted.is_exhaustion());
        assert_eq!(exhausted.severity(), Severity::NonFatal);

        let cancelled: ActorError = PortError::Cancelled { port: "p".into() }.into();
        assert!(matches!(cancelled, ActorError::Cancelled));

        let topology: ActorError = PortError::illegal_state("a.in", "frozen").into();
        assert!(topology.is_fatal());
    }

    #[test]
    fn test_processing_error_carries_message_and_cause() {
        let error = ActorError::processing("reader", Severity::NonFatal, "bad record")
            .with_message(Message::text("garbage"))
            .with_source(anyhow::anyhow!("parse failure"));

        assert_eq!(error.offending_message().map(|m| m.body_text().ok()), Some(Some("garbage")));
        let chain: Vec<String> = std::iter::successors(
            Some(&error as &(dyn std::error::Error + 'static)),
            |e| e.source(),
        )
        .map(|e| e.to_string())
        .collect();
        assert_eq!(chain.len(), 2);
        assert!(chain[1].contains("parse failure"));
    }

    #[test]
    fn test_transform_error_keeps_first_stage() {
        let error = MessageTransformError::new("bad")
            .at_stage("first")
            .at_stage("second");
        assert_eq!(error.stage, "first");
    }
}
