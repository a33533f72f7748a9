//! # Reference Actors
//!
//! A small library of actors built on the [`Actor`](crate::actor::Actor)
//! contract. They serve as building blocks for demo graphs and tests, and as
//! worked examples of the lifecycle: one-shot sources, parameterized state,
//! pull inputs, dynamic ports and sinks.

pub mod collector;
pub mod console;
pub mod counter;
pub mod merge;
pub mod sequence;
pub mod trigger;

pub use collector::{Collected, Collector};
pub use console::Console;
pub use counter::Counter;
pub use merge::Merge;
pub use sequence::Sequence;
pub use trigger::Trigger;

use crate::errors::{ActorError, PortError};
use crate::message::Message;
use crate::port::Port;

/// Takes every token currently buffered on `port`, across all channels.
/// An exhausted or unconnected port yields nothing.
pub(crate) fn drain(port: &Port) -> Result<Vec<Message>, ActorError> {
    let mut messages = Vec::new();
    loop {
        match port.try_get_any() {
            Ok(Some(message)) => messages.push(message),
            Ok(None) | Err(PortError::NoMoreTokens { .. }) => return Ok(messages),
            Err(e) => return Err(e.into()),
        }
    }
}
