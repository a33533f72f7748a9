use crate::activity::Activity;
use crate::actor::ActorCore;
use crate::errors::FormatError;
use crate::message::{Message, HEADER_CREATED_AT, HEADER_SEQUENCE, HEADER_SOURCE, MIME_TEXT};
use bytes::Bytes;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info_span, Span};

/// # ActorContext
///
/// Everything an actor may need from its surroundings while it runs: its
/// identity, the run's cancellation token, a cooperative finish switch and a
/// message factory that stamps source and sequence headers. A fresh context is
/// built for every run; nothing here is process-global.
#[derive(Debug)]
pub struct ActorContext {
    actor: String,
    cancel: CancellationToken,
    finish: Arc<AtomicBool>,
    activity: Arc<Activity>,
    sequence: AtomicU64,
    span: Span,
}

impl ActorContext {
    pub fn new(core: &ActorCore, cancel: CancellationToken) -> Self {
        Self {
            actor: core.name().to_string(),
            cancel,
            finish: core.finish_flag(),
            activity: Arc::clone(core.activity()),
            sequence: AtomicU64::new(0),
            span: info_span!("actor", name = %core.name()),
        }
    }

    /// A context with its own token, for driving an actor by hand.
    pub fn detached(core: &ActorCore) -> Self {
        Self::new(core, CancellationToken::new())
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Asks the director to stop scheduling this actor after the current
    /// iteration.
    pub fn request_finish(&self) {
        self.finish.store(true, Ordering::SeqCst);
    }

    pub fn is_finish_requested(&self) -> bool {
        self.finish.load(Ordering::SeqCst)
    }

    pub(crate) fn activity(&self) -> &Arc<Activity> {
        &self.activity
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Creates a message stamped with this actor as source, the next
    /// sequence number and the creation time.
    pub fn message(
        &self,
        body: impl Into<Bytes>,
        mime_type: impl Into<String>,
    ) -> Result<Message, FormatError> {
        Ok(self.stamp(Message::create(body, mime_type)?))
    }

    pub fn text(&self, body: impl Into<String>) -> Message {
        self.stamp(Message::text(body))
    }

    fn stamp(&self, message: Message) -> Message {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        message
            .with_header(HEADER_SOURCE, self.actor.clone())
            .with_header(HEADER_SEQUENCE, sequence.to_string())
            .with_header(HEADER_CREATED_AT, Utc::now().to_rfc3339())
    }
}
