//! # Ensemble
//!
//! Ensemble is an actor-oriented dataflow runtime. A program is a [`Graph`] of
//! actors wired output-to-input through ports; a director drives every actor
//! through its lifecycle and decides when the run is over.
//!
//! ## Core Features
//!
//! * **Messages**: immutable payloads with a MIME type and headers, cheap to
//!   fan out
//! * **Ports and Receivers**: FIFO per connection, blocking reads, optional
//!   bounded queues, explicit end-of-stream
//! * **Actor Lifecycle**: `initialize -> (prefire -> fire -> postfire)* -> wrapup`
//!   with checked state transitions
//! * **Directors**: a task-per-actor process director with global deadlock
//!   detection, and a single-task sequential director that can be stepped one
//!   iteration at a time
//! * **Error Severity**: fatal errors abort the run, non-fatal ones are
//!   contained to the actor that raised them
//!
//! ## Architecture
//!
//! * [`Message`]: the unit of data flowing between actors
//! * [`Port`] / [`Receiver`]: connection endpoints and the queues behind them
//! * [`Actor`] / [`ActorCore`]: the lifecycle contract and shared actor state
//! * [`Graph`]: the composite that owns actors and their connections
//! * [`Director`]: runs a graph and returns a [`RunReport`]
//! * [`DirectorHandle`]: stop, pause, resume, runtime parameter updates and
//!   run events
//!
//! Nothing in the library is process-global: every run gets its own
//! cancellation token and every actor its own [`ActorContext`].

pub mod activity;
pub mod actor;
pub mod actors;
pub mod config;
pub mod director;
pub mod errors;
pub mod events;
pub mod graph;
pub mod id;
pub mod interceptor;
pub mod logging;
pub mod message;
pub mod parameter;
pub mod port;
pub mod receiver;

pub use actor::{Actor, ActorContext, ActorCore, ActorFuture, DynamicPorts, LifecycleState};
pub use config::RuntimeConfig;
pub use director::{
    ActorOutcome, ActorReport, Director, DirectorHandle, ProcessDirector, RunReport, RunState,
    SequentialDirector, Termination,
};
pub use errors::{ActorError, DirectorError, GraphError, PortError, Severity};
pub use events::{RunEvent, RunEventKind};
pub use graph::Graph;
pub use id::RunId;
pub use interceptor::InterceptorChain;
pub use message::Message;
pub use parameter::{ParameterChange, ParameterValue};
pub use port::{Port, PortKind, PortMode};
pub use receiver::{Receiver, ReceiverPolicy};
