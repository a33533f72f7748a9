//! # Ports
//!
//! Ports are the named connection points of an actor. An input port owns one
//! [`Receiver`] per connected channel; an output port fans out to the
//! receivers of every input port it is connected to.
//!
//! Ports are created, renamed and removed only through the owning actor's
//! [`PortSet`], and the whole set is frozen while a director runs the actor.
//! While frozen, topology changes fail and port operations observe the run's
//! cancellation token.

use crate::activity::Activity;
use crate::errors::{PortError, ReceiverError};
use crate::interceptor::InterceptorChain;
use crate::message::Message;
use crate::receiver::{Receiver, ReceiverPolicy};
use futures::future::{select_all, FutureExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PortKind {
    Input,
    Output,
    InputOutput,
}

impl PortKind {
    pub fn is_input(self) -> bool {
        matches!(self, PortKind::Input | PortKind::InputOutput)
    }

    pub fn is_output(self) -> bool {
        matches!(self, PortKind::Output | PortKind::InputOutput)
    }
}

/// How an input port is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortMode {
    /// Upstream pushes; a token on this port triggers a firing of its owner.
    #[default]
    Push,
    /// The owner polls this port from inside `fire`.
    Pull,
}

/// State shared by an actor's ports and its [`PortSet`].
#[derive(Debug)]
struct PortShared {
    owner: String,
    activity: Arc<Activity>,
    frozen: AtomicBool,
    cancel: RwLock<CancellationToken>,
}

impl PortShared {
    fn cancellation(&self) -> CancellationToken {
        self.cancel
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[derive(Debug, Clone)]
struct Link {
    receiver: Arc<Receiver>,
    peer: Weak<PortInner>,
}

#[derive(Debug)]
struct PortState {
    name: String,
    mode: PortMode,
    /// Inbound channels, one receiver each.
    channels: Vec<Link>,
    /// Downstream receivers this port delivers to.
    remotes: Vec<Link>,
    inbound: InterceptorChain,
    outbound: InterceptorChain,
    policy: Option<ReceiverPolicy>,
}

#[derive(Debug)]
struct PortInner {
    shared: Arc<PortShared>,
    kind: PortKind,
    cursor: AtomicUsize,
    state: RwLock<PortState>,
}

/// A handle to one port. Clones refer to the same port.
#[derive(Clone)]
pub struct Port(Arc<PortInner>);

impl Port {
    fn new(shared: Arc<PortShared>, name: String, kind: PortKind, mode: PortMode) -> Self {
        Port(Arc::new(PortInner {
            shared,
            kind,
            cursor: AtomicUsize::new(0),
            state: RwLock::new(PortState {
                name,
                mode,
                channels: Vec::new(),
                remotes: Vec::new(),
                inbound: InterceptorChain::new(),
                outbound: InterceptorChain::new(),
                policy: None,
            }),
        }))
    }

    fn read(&self) -> RwLockReadGuard<'_, PortState> {
        self.0.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, PortState> {
        self.0.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> String {
        self.read().name.clone()
    }

    /// `<owner>.<port>`, used in errors and logs.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.0.shared.owner, self.read().name)
    }

    pub fn owner(&self) -> &str {
        &self.0.shared.owner
    }

    pub fn kind(&self) -> PortKind {
        self.0.kind
    }

    pub fn is_input(&self) -> bool {
        self.0.kind.is_input()
    }

    pub fn is_output(&self) -> bool {
        self.0.kind.is_output()
    }

    pub fn mode(&self) -> PortMode {
        self.read().mode
    }

    pub fn is_frozen(&self) -> bool {
        self.0.shared.frozen.load(Ordering::SeqCst)
    }

    /// Number of connected channels: inbound channels for an input port,
    /// downstream receivers for an output port, whichever is larger for a
    /// port that is both.
    pub fn width(&self) -> usize {
        let state = self.read();
        state.channels.len().max(state.remotes.len())
    }

    pub fn ptr_eq(&self, other: &Port) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// The ports on the other end of this port's outbound connections.
    pub fn downstream(&self) -> Vec<Port> {
        self.read()
            .remotes
            .iter()
            .filter_map(|link| link.peer.upgrade().map(Port))
            .collect()
    }

    /// The ports feeding this port's inbound channels.
    pub fn upstream(&self) -> Vec<Port> {
        self.read()
            .channels
            .iter()
            .filter_map(|link| link.peer.upgrade().map(Port))
            .collect()
    }

    fn ensure_unfrozen(&self, what: &str) -> Result<(), PortError> {
        if self.is_frozen() {
            return Err(PortError::illegal_state(
                &self.full_name(),
                format!("cannot {} while the owning actor is running", what),
            ));
        }
        Ok(())
    }

    fn ensure_input(&self) -> Result<(), PortError> {
        if !self.is_input() {
            return Err(PortError::illegal_state(&self.full_name(), "not an input port"));
        }
        Ok(())
    }

    fn ensure_output(&self) -> Result<(), PortError> {
        if !self.is_output() {
            return Err(PortError::illegal_state(&self.full_name(), "not an output port"));
        }
        Ok(())
    }

    /// Connects this output port to the input port `to`, adding one channel
    /// to `to` and one delivery target to `self`.
    pub fn connect(&self, to: &Port) -> Result<(), PortError> {
        let reject = |reason: &str| PortError::Connection {
            from: self.full_name(),
            to: to.full_name(),
            reason: reason.to_string(),
        };

        if !self.is_output() {
            return Err(reject("source is not an output port"));
        }
        if !to.is_input() {
            return Err(reject("target is not an input port"));
        }
        if self.ptr_eq(to) {
            return Err(reject("a port cannot be connected to itself"));
        }
        if self.is_frozen() || to.is_frozen() {
            return Err(reject("topology is frozen once an actor has started"));
        }
        let already = self
            .read()
            .remotes
            .iter()
            .any(|link| link.peer.as_ptr() == Arc::as_ptr(&to.0));
        if already {
            return Err(reject("ports are already connected"));
        }

        let policy = to.read().policy.unwrap_or_default();
        let receiver = Arc::new(Receiver::new(policy, Arc::clone(&to.0.shared.activity)));

        to.write().channels.push(Link {
            receiver: Arc::clone(&receiver),
            peer: Arc::downgrade(&self.0),
        });
        self.write().remotes.push(Link {
            receiver,
            peer: Arc::downgrade(&to.0),
        });

        debug!("Connected {} -> {}", self.full_name(), to.full_name());
        Ok(())
    }

    /// Drops every connection of this port, on both ends.
    pub fn disconnect_all(&self) {
        let (channels, remotes) = {
            let mut state = self.write();
            (
                std::mem::take(&mut state.channels),
                std::mem::take(&mut state.remotes),
            )
        };

        for link in channels {
            if let Some(peer) = link.peer.upgrade() {
                let mut peer_state = peer.state.write().unwrap_or_else(PoisonError::into_inner);
                peer_state
                    .remotes
                    .retain(|l| !Arc::ptr_eq(&l.receiver, &link.receiver));
            }
        }
        for link in remotes {
            if let Some(peer) = link.peer.upgrade() {
                let mut peer_state = peer.state.write().unwrap_or_else(PoisonError::into_inner);
                peer_state
                    .channels
                    .retain(|l| !Arc::ptr_eq(&l.receiver, &link.receiver));
            }
        }
    }

    /// Broadcasts `message` to every connected downstream receiver.
    ///
    /// The outbound interceptor chain runs once before delivery. Receivers
    /// that are already closed are skipped; if every receiver is closed the
    /// send fails with [`PortError::Closed`]. Sending on an unconnected port
    /// does nothing.
    pub async fn send(&self, message: Message) -> Result<(), PortError> {
        self.ensure_output()?;
        let (outbound, targets) = {
            let state = self.read();
            let targets: Vec<Arc<Receiver>> =
                state.remotes.iter().map(|l| Arc::clone(&l.receiver)).collect();
            (state.outbound.clone(), targets)
        };
        if targets.is_empty() {
            return Ok(());
        }

        let message = outbound.apply(message).map_err(|source| PortError::Transform {
            port: self.full_name(),
            source,
        })?;

        let cancel = self.0.shared.cancellation();
        let mut closed = 0;
        for receiver in &targets {
            match receiver
                .put(message.clone(), &self.0.shared.activity, &cancel)
                .await
            {
                Ok(()) => {}
                Err(ReceiverError::Closed) => closed += 1,
                Err(e) => return Err(PortError::from_receiver(&self.full_name(), e)),
            }
        }

        if closed == targets.len() {
            return Err(PortError::Closed {
                port: self.full_name(),
            });
        }
        Ok(())
    }

    /// Delivers `message` to the downstream receiver at `channel` only.
    pub async fn send_to(&self, channel: usize, message: Message) -> Result<(), PortError> {
        self.ensure_output()?;
        let (outbound, target) = {
            let state = self.read();
            let target = state
                .remotes
                .get(channel)
                .map(|l| Arc::clone(&l.receiver))
                .ok_or_else(|| PortError::NoSuchChannel {
                    port: format!("{}.{}", self.0.shared.owner, state.name),
                    channel,
                    width: state.remotes.len(),
                })?;
            (state.outbound.clone(), target)
        };

        let message = outbound.apply(message).map_err(|source| PortError::Transform {
            port: self.full_name(),
            source,
        })?;
        let cancel = self.0.shared.cancellation();
        target
            .put(message, &self.0.shared.activity, &cancel)
            .await
            .map_err(|e| PortError::from_receiver(&self.full_name(), e))
    }

    fn channel(&self, channel: usize) -> Result<Arc<Receiver>, PortError> {
        let state = self.read();
        state
            .channels
            .get(channel)
            .map(|l| Arc::clone(&l.receiver))
            .ok_or_else(|| PortError::NoSuchChannel {
                port: format!("{}.{}", self.0.shared.owner, state.name),
                channel,
                width: state.channels.len(),
            })
    }

    fn receive(&self, message: Message) -> Result<Message, PortError> {
        let inbound = self.read().inbound.clone();
        inbound.apply(message).map_err(|source| PortError::Transform {
            port: self.full_name(),
            source,
        })
    }

    /// Blocking read from the receiver at `channel`.
    pub async fn get(&self, channel: usize) -> Result<Message, PortError> {
        self.ensure_input()?;
        let receiver = self.channel(channel)?;
        let cancel = self.0.shared.cancellation();
        let message = receiver
            .get(&cancel)
            .await
            .map_err(|e| PortError::from_receiver(&self.full_name(), e))?;
        self.receive(message)
    }

    /// Non-blocking read from `channel`: `Ok(None)` when nothing is buffered yet.
    pub fn try_get(&self, channel: usize) -> Result<Option<Message>, PortError> {
        self.ensure_input()?;
        let receiver = self.channel(channel)?;
        match receiver.try_get() {
            Ok(Some(message)) => self.receive(message).map(Some),
            Ok(None) => Ok(None),
            Err(e) => Err(PortError::from_receiver(&self.full_name(), e)),
        }
    }

    /// Non-blocking read from whichever channel has a token, starting from a
    /// rotating position so no channel is starved. Fails with
    /// [`PortError::NoMoreTokens`] once every channel is exhausted; an
    /// unconnected input counts as exhausted.
    pub fn try_get_any(&self) -> Result<Option<Message>, PortError> {
        self.ensure_input()?;
        let receivers = self.receivers();
        if receivers.is_empty() {
            return Err(PortError::NoMoreTokens {
                port: self.full_name(),
            });
        }

        let start = self.0.cursor.fetch_add(1, Ordering::Relaxed);
        let mut open = false;
        for offset in 0..receivers.len() {
            let receiver = &receivers[(start + offset) % receivers.len()];
            match receiver.try_get() {
                Ok(Some(message)) => return self.receive(message).map(Some),
                Ok(None) => open = true,
                Err(ReceiverError::NoMoreTokens) => {}
                Err(e) => return Err(PortError::from_receiver(&self.full_name(), e)),
            }
        }

        if open {
            Ok(None)
        } else {
            Err(PortError::NoMoreTokens {
                port: self.full_name(),
            })
        }
    }

    /// Blocking read from the first channel that yields a token.
    pub async fn get_any(&self) -> Result<Message, PortError> {
        if let Some(message) = self.try_get_any()? {
            return Ok(message);
        }

        let receivers: Vec<Arc<Receiver>> = self
            .receivers()
            .into_iter()
            .filter(|r| !r.is_finished() || r.has_token())
            .collect();
        let cancel = self.0.shared.cancellation();
        let mut pending: Vec<_> = receivers.iter().map(|r| r.get(&cancel).boxed()).collect();

        while !pending.is_empty() {
            let (result, _, rest) = select_all(pending).await;
            match result {
                Ok(message) => return self.receive(message),
                Err(ReceiverError::NoMoreTokens) => pending = rest,
                Err(e) => return Err(PortError::from_receiver(&self.full_name(), e)),
            }
        }
        Err(PortError::NoMoreTokens {
            port: self.full_name(),
        })
    }

    /// Waits until some channel holds a token (`true`) or every channel is
    /// exhausted (`false`). Nothing is consumed.
    pub async fn wait_for_token(&self) -> Result<bool, PortError> {
        self.ensure_input()?;
        let receivers = self.receivers();
        if receivers.iter().any(|r| r.has_token()) {
            return Ok(true);
        }

        let cancel = self.0.shared.cancellation();
        let mut pending: Vec<_> = receivers
            .iter()
            .filter(|r| !r.is_finished())
            .map(|r| r.wait_for_token(&cancel).boxed())
            .collect();

        while !pending.is_empty() {
            let (result, _, rest) = select_all(pending).await;
            match result {
                Ok(true) => return Ok(true),
                Ok(false) => pending = rest,
                Err(e) => return Err(PortError::from_receiver(&self.full_name(), e)),
            }
        }
        Ok(false)
    }

    pub fn has_token(&self, channel: usize) -> bool {
        self.channel(channel).map(|r| r.has_token()).unwrap_or(false)
    }

    pub fn has_any_token(&self) -> bool {
        self.read().channels.iter().any(|l| l.receiver.has_token())
    }

    /// True when every inbound channel is finished and drained.
    pub fn is_exhausted(&self) -> bool {
        self.read()
            .channels
            .iter()
            .all(|l| l.receiver.is_finished() && l.receiver.is_empty())
    }

    /// Signals end-of-stream to every downstream receiver.
    pub fn set_finished(&self) {
        for link in &self.read().remotes {
            link.receiver.set_finished();
        }
    }

    /// Marks this port's own inbound receivers finished, unblocking its owner.
    pub fn close(&self) {
        for link in &self.read().channels {
            link.receiver.set_finished();
        }
    }

    pub(crate) fn receivers(&self) -> Vec<Arc<Receiver>> {
        self.read()
            .channels
            .iter()
            .map(|l| Arc::clone(&l.receiver))
            .collect()
    }

    /// Empties and reopens every inbound receiver, using this port's own
    /// policy when one is set.
    pub(crate) fn reset_receivers(&self, default_policy: ReceiverPolicy) {
        let state = self.read();
        let policy = state.policy.unwrap_or(default_policy);
        for link in &state.channels {
            link.receiver.reset(policy);
        }
    }

    pub fn set_mode(&self, mode: PortMode) -> Result<(), PortError> {
        self.ensure_unfrozen("change the mode")?;
        self.write().mode = mode;
        Ok(())
    }

    pub fn set_inbound(&self, chain: InterceptorChain) -> Result<(), PortError> {
        self.ensure_unfrozen("replace the inbound chain")?;
        self.ensure_input()?;
        self.write().inbound = chain;
        Ok(())
    }

    pub fn set_outbound(&self, chain: InterceptorChain) -> Result<(), PortError> {
        self.ensure_unfrozen("replace the outbound chain")?;
        self.ensure_output()?;
        self.write().outbound = chain;
        Ok(())
    }

    /// Overrides the director's receiver policy for this input port.
    pub fn set_receiver_policy(&self, policy: ReceiverPolicy) -> Result<(), PortError> {
        self.ensure_unfrozen("change the receiver policy")?;
        self.ensure_input()?;
        self.write().policy = Some(policy);
        Ok(())
    }

    pub fn receiver_policy(&self) -> Option<ReceiverPolicy> {
        self.read().policy
    }
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.read();
        f.debug_struct("Port")
            .field("owner", &self.0.shared.owner)
            .field("name", &state.name)
            .field("kind", &self.0.kind)
            .field("mode", &state.mode)
            .field("channels", &state.channels.len())
            .field("remotes", &state.remotes.len())
            .finish()
    }
}

/// The ports of one actor, in creation order.
#[derive(Debug)]
pub struct PortSet {
    shared: Arc<PortShared>,
    ports: Vec<Port>,
}

impl PortSet {
    /// An empty port set for `owner` with its own activity flag.
    pub fn new(owner: impl Into<String>) -> Self {
        Self::with_activity(owner, Activity::detached())
    }

    pub(crate) fn with_activity(owner: impl Into<String>, activity: Arc<Activity>) -> Self {
        Self {
            shared: Arc::new(PortShared {
                owner: owner.into(),
                activity,
                frozen: AtomicBool::new(false),
                cancel: RwLock::new(CancellationToken::new()),
            }),
            ports: Vec::new(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.shared.owner
    }

    pub(crate) fn activity(&self) -> &Arc<Activity> {
        &self.shared.activity
    }

    pub fn is_frozen(&self) -> bool {
        self.shared.frozen.load(Ordering::SeqCst)
    }

    /// Freezes the topology and binds every port to the run's token.
    pub(crate) fn freeze(&self, cancel: CancellationToken) {
        *self
            .shared
            .cancel
            .write()
            .unwrap_or_else(PoisonError::into_inner) = cancel;
        self.shared.frozen.store(true, Ordering::SeqCst);
    }

    pub(crate) fn unfreeze(&self) {
        self.shared.frozen.store(false, Ordering::SeqCst);
    }

    fn ensure_unfrozen(&self, name: &str, what: &str) -> Result<(), PortError> {
        if self.is_frozen() {
            return Err(PortError::illegal_state(
                &format!("{}.{}", self.shared.owner, name),
                format!("cannot {} while the owning actor is running", what),
            ));
        }
        Ok(())
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.ports.iter().position(|p| p.read().name == name)
    }

    /// Adds a port. Names are unique within the set.
    pub fn add(
        &mut self,
        name: impl Into<String>,
        kind: PortKind,
        mode: PortMode,
    ) -> Result<Port, PortError> {
        let name = name.into();
        self.ensure_unfrozen(&name, "add a port")?;
        if self.position(&name).is_some() {
            return Err(PortError::illegal_state(
                &format!("{}.{}", self.shared.owner, name),
                "a port with this name already exists",
            ));
        }
        let port = Port::new(Arc::clone(&self.shared), name, kind, mode);
        self.ports.push(port.clone());
        Ok(port)
    }

    pub fn add_input(&mut self, name: impl Into<String>, mode: PortMode) -> Result<Port, PortError> {
        self.add(name, PortKind::Input, mode)
    }

    pub fn add_output(&mut self, name: impl Into<String>) -> Result<Port, PortError> {
        self.add(name, PortKind::Output, PortMode::Push)
    }

    pub fn get(&self, name: &str) -> Option<Port> {
        self.position(name).map(|i| self.ports[i].clone())
    }

    /// Like [`PortSet::get`], failing with [`PortError::NoSuchPort`].
    pub fn port(&self, name: &str) -> Result<Port, PortError> {
        self.get(name).ok_or_else(|| PortError::NoSuchPort {
            actor: self.shared.owner.clone(),
            port: name.to_string(),
        })
    }

    pub fn rename(&mut self, from: &str, to: impl Into<String>) -> Result<(), PortError> {
        let to = to.into();
        self.ensure_unfrozen(from, "rename a port")?;
        let port = self.port(from)?;
        if from != to && self.position(&to).is_some() {
            return Err(PortError::illegal_state(
                &format!("{}.{}", self.shared.owner, to),
                "a port with this name already exists",
            ));
        }
        port.write().name = to;
        Ok(())
    }

    /// Removes a port and disconnects it from its peers.
    pub fn remove(&mut self, name: &str) -> Result<Port, PortError> {
        self.ensure_unfrozen(name, "remove a port")?;
        let index = self.position(name).ok_or_else(|| PortError::NoSuchPort {
            actor: self.shared.owner.clone(),
            port: name.to_string(),
        })?;
        let port = self.ports.remove(index);
        port.disconnect_all();
        Ok(port)
    }

    /// Sizes the family of ports named `<prefix><index>` to exactly `count`.
    ///
    /// Growing keeps every port already present under a target name and
    /// creates only the missing ones. Shrinking removes the highest indices
    /// first. Returns the family in index order.
    pub fn resize(
        &mut self,
        prefix: &str,
        kind: PortKind,
        mode: PortMode,
        count: usize,
    ) -> Result<Vec<Port>, PortError> {
        self.ensure_unfrozen(prefix, "resize ports")?;

        let mut stale: Vec<(usize, String)> = self
            .ports
            .iter()
            .filter_map(|p| {
                let name = p.read().name.clone();
                let index = name.strip_prefix(prefix)?.parse::<usize>().ok()?;
                (index >= count).then_some((index, name))
            })
            .collect();
        stale.sort_by(|a, b| b.0.cmp(&a.0));
        for (_, name) in stale {
            self.remove(&name)?;
        }

        (0..count)
            .map(|index| {
                let name = format!("{}{}", prefix, index);
                match self.get(&name) {
                    Some(port) => Ok(port),
                    None => self.add(name, kind, mode),
                }
            })
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Port> {
        self.ports.iter()
    }

    pub fn inputs(&self) -> impl Iterator<Item = &Port> {
        self.ports.iter().filter(|p| p.is_input())
    }

    pub fn outputs(&self) -> impl Iterator<Item = &Port> {
        self.ports.iter().filter(|p| p.is_output())
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }
}
