//! # Receivers
//!
//! A [`Receiver`] is the FIFO queue behind one channel of one input port. The
//! producer side `put`s, the consuming actor `get`s. Once the receiver is
//! marked finished no further puts succeed, while gets keep draining whatever
//! is still buffered before reporting `NoMoreTokens`.
//!
//! Every wait (empty queue on `get`, full bounded queue on `put`) is
//! cancellable through the run's [`CancellationToken`] and reported to the
//! waiter's [`Activity`] so the director can detect global deadlock.

use crate::activity::Activity;
use crate::errors::ReceiverError;
use crate::message::Message;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// What a bounded receiver does with a put when it is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Overflow {
    /// Suspend the producer until a slot frees up.
    #[default]
    Block,
    /// Fail the put with [`ReceiverError::Full`].
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReceiverPolicy {
    /// Maximum number of buffered messages; `None` is unbounded.
    #[serde(default)]
    pub capacity: Option<usize>,
    #[serde(default)]
    pub overflow: Overflow,
}

impl ReceiverPolicy {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn bounded(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            overflow: Overflow::Block,
        }
    }

    pub fn rejecting(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            overflow: Overflow::Reject,
        }
    }

    /// True when a full queue suspends the producer.
    pub fn suspends_producers(&self) -> bool {
        self.capacity.is_some() && self.overflow == Overflow::Block
    }

    fn has_room(&self, len: usize) -> bool {
        match self.capacity {
            Some(capacity) => len < capacity.max(1),
            None => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReceiverState {
    /// Open and accepting puts.
    Accepting,
    /// Finished, with buffered messages left to drain.
    Draining,
    /// Finished and empty.
    Closed,
}

#[derive(Debug, Default)]
struct Inner {
    queue: VecDeque<Message>,
    finished: bool,
    policy: ReceiverPolicy,
    consumer_waiting: bool,
    producers_waiting: VecDeque<Arc<Activity>>,
}

#[derive(Debug)]
pub struct Receiver {
    consumer: Arc<Activity>,
    inner: Mutex<Inner>,
    not_empty: Notify,
    not_full: Notify,
}

impl Receiver {
    /// Creates a receiver whose consumer reports blocking through `consumer`.
    pub fn new(policy: ReceiverPolicy, consumer: Arc<Activity>) -> Self {
        Self {
            consumer,
            inner: Mutex::new(Inner {
                policy,
                ..Inner::default()
            }),
            not_empty: Notify::new(),
            not_full: Notify::new(),
        }
    }

    /// A receiver not tied to any actor.
    pub fn standalone(policy: ReceiverPolicy) -> Self {
        Self::new(policy, Activity::detached())
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueues `message`.
    ///
    /// Fails with [`ReceiverError::Closed`] once the receiver is finished. On a
    /// full bounded receiver this either waits for a free slot or fails with
    /// [`ReceiverError::Full`], depending on the overflow policy.
    pub async fn put(
        &self,
        message: Message,
        producer: &Arc<Activity>,
        cancel: &CancellationToken,
    ) -> Result<(), ReceiverError> {
        loop {
            let not_full = self.not_full.notified();
            tokio::pin!(not_full);
            not_full.as_mut().enable();

            let _wait = {
                let mut inner = self.lock();
                if inner.finished {
                    return Err(ReceiverError::Closed);
                }
                if inner.policy.has_room(inner.queue.len()) {
                    inner.queue.push_back(message);
                    self.wake_consumer(&mut inner);
                    drop(inner);
                    producer.note_progress();
                    return Ok(());
                }
                if inner.policy.overflow == Overflow::Reject {
                    return Err(ReceiverError::Full(inner.policy.capacity.unwrap_or_default()));
                }
                inner.producers_waiting.push_back(Arc::clone(producer));
                producer.enter_wait();
                ProducerWait {
                    receiver: self,
                    producer,
                }
            };

            tokio::select! {
                _ = &mut not_full => {}
                _ = cancel.cancelled() => return Err(ReceiverError::Cancelled),
            }
        }
    }

    /// Takes the oldest message, waiting while the queue is empty and the
    /// receiver is still open.
    pub async fn get(&self, cancel: &CancellationToken) -> Result<Message, ReceiverError> {
        loop {
            let not_empty = self.not_empty.notified();
            tokio::pin!(not_empty);
            not_empty.as_mut().enable();

            let _wait = {
                let mut inner = self.lock();
                if let Some(message) = inner.queue.pop_front() {
                    self.wake_producer(&mut inner);
                    return Ok(message);
                }
                if inner.finished {
                    return Err(ReceiverError::NoMoreTokens);
                }
                self.park_consumer(&mut inner)
            };

            tokio::select! {
                _ = &mut not_empty => {}
                _ = cancel.cancelled() => return Err(ReceiverError::Cancelled),
            }
        }
    }

    /// Waits until a message is buffered (`true`) or the receiver is closed
    /// (`false`) without consuming anything.
    pub async fn wait_for_token(&self, cancel: &CancellationToken) -> Result<bool, ReceiverError> {
        loop {
            let not_empty = self.not_empty.notified();
            tokio::pin!(not_empty);
            not_empty.as_mut().enable();

            let _wait = {
                let mut inner = self.lock();
                if !inner.queue.is_empty() {
                    return Ok(true);
                }
                if inner.finished {
                    return Ok(false);
                }
                self.park_consumer(&mut inner)
            };

            tokio::select! {
                _ = &mut not_empty => {}
                _ = cancel.cancelled() => return Err(ReceiverError::Cancelled),
            }
        }
    }

    /// Non-blocking get: `Ok(None)` when the queue is empty but still open.
    pub fn try_get(&self) -> Result<Option<Message>, ReceiverError> {
        let mut inner = self.lock();
        match inner.queue.pop_front() {
            Some(message) => {
                self.wake_producer(&mut inner);
                Ok(Some(message))
            }
            None if inner.finished => Err(ReceiverError::NoMoreTokens),
            None => Ok(None),
        }
    }

    /// Marks the receiver finished. Buffered messages stay available; blocked
    /// consumers see `NoMoreTokens` once they are drained and blocked producers
    /// see `Closed`. Calling this again has no further effect.
    pub fn set_finished(&self) {
        {
            let mut inner = self.lock();
            if inner.finished {
                return;
            }
            inner.finished = true;
            if inner.consumer_waiting {
                inner.consumer_waiting = false;
                self.consumer.release();
            }
            for producer in inner.producers_waiting.drain(..) {
                producer.release();
            }
        }
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }

    /// Empties the queue and reopens the receiver under `policy`.
    pub(crate) fn reset(&self, policy: ReceiverPolicy) {
        let mut inner = self.lock();
        inner.queue.clear();
        inner.finished = false;
        inner.policy = policy;
        inner.consumer_waiting = false;
        inner.producers_waiting.clear();
    }

    pub fn has_token(&self) -> bool {
        !self.lock().queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    pub fn is_finished(&self) -> bool {
        self.lock().finished
    }

    pub fn policy(&self) -> ReceiverPolicy {
        self.lock().policy
    }

    pub fn state(&self) -> ReceiverState {
        let inner = self.lock();
        match (inner.finished, inner.queue.is_empty()) {
            (false, _) => ReceiverState::Accepting,
            (true, false) => ReceiverState::Draining,
            (true, true) => ReceiverState::Closed,
        }
    }

    fn park_consumer(&self, inner: &mut Inner) -> ConsumerWait<'_> {
        inner.consumer_waiting = true;
        self.consumer.enter_wait();
        ConsumerWait(self)
    }

    fn wake_consumer(&self, inner: &mut Inner) {
        if inner.consumer_waiting {
            inner.consumer_waiting = false;
            self.consumer.release();
            self.not_empty.notify_one();
        }
    }

    fn wake_producer(&self, inner: &mut Inner) {
        if let Some(producer) = inner.producers_waiting.pop_front() {
            producer.release();
            self.not_full.notify_one();
        }
    }
}

/// Clears the consumer's registration when a wait ends on any path,
/// including the future being dropped by a multi-channel select.
struct ConsumerWait<'a>(&'a Receiver);

impl Drop for ConsumerWait<'_> {
    fn drop(&mut self) {
        let mut inner = self.0.lock();
        inner.consumer_waiting = false;
        self.0.consumer.release();
    }
}

struct ProducerWait<'a> {
    receiver: &'a Receiver,
    producer: &'a Arc<Activity>,
}

impl Drop for ProducerWait<'_> {
    fn drop(&mut self) {
        let mut inner = self.receiver.lock();
        if let Some(pos) = inner
            .producers_waiting
            .iter()
            .position(|p| Arc::ptr_eq(p, self.producer))
        {
            inner.producers_waiting.remove(pos);
        }
        self.producer.release();
    }
}
