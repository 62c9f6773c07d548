// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use crate::{BusError, Message, Participant, ParticipantStatus, BROADCAST};

pub type ListenerFuture = BoxFuture<'static, ()>;
/// Callback invoked for every dispatched message whose type matches the
/// subscription pattern.
pub type Listener = Arc<dyn Fn(Message) -> ListenerFuture + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Registered {
    handler: Weak<dyn Participant>,
    capabilities: Vec<String>,
    status: ParticipantStatus,
}

struct Subscription {
    id: SubscriptionId,
    pattern: String,
    listener: Listener,
}

#[derive(Default)]
struct BusState {
    participants: HashMap<String, Registered>,
    /// capability -> participant ids advertising it.  Kept consistent with
    /// `participants` under the same lock.
    capability_index: HashMap<String, Vec<String>>,
    subscriptions: Vec<Subscription>,
    /// Outgoing message id -> pending reply slot.  At most one per id.
    reply_waiters: HashMap<String, oneshot::Sender<Message>>,
}

/// Heap entry ordered by (priority desc, enqueue sequence asc).
struct QueuedMessage {
    message: Message,
    seq: u64,
}

impl PartialEq for QueuedMessage {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}
impl Eq for QueuedMessage {}

impl PartialOrd for QueuedMessage {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedMessage {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: higher priority wins, then lower seq.
        self.message
            .priority
            .cmp(&other.message.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// The in-process message bus.  See the crate docs for the routing model.
pub struct Bus {
    state: Mutex<BusState>,
    queue: Mutex<BinaryHeap<QueuedMessage>>,
    notify: Notify,
    seq: AtomicU64,
    next_subscription: AtomicU64,
    /// Messages accepted by `send` but not yet fully dispatched.
    in_flight: AtomicUsize,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Bus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(BusState::default()),
            queue: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            seq: AtomicU64::new(0),
            next_subscription: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            dispatcher: Mutex::new(None),
        })
    }

    fn state(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().expect("bus state lock poisoned")
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Start the single dispatcher task.  Idempotent.
    pub fn start(self: &Arc<Self>) {
        let mut slot = self.dispatcher.lock().expect("dispatcher lock poisoned");
        if slot.is_some() {
            return;
        }
        let bus = Arc::clone(self);
        *slot = Some(tokio::spawn(async move {
            debug!("bus dispatcher started");
            bus.dispatch_loop().await;
        }));
    }

    /// Stop the dispatcher task.  Queued messages stay queued and are
    /// processed if the bus is started again.
    pub fn stop(&self) {
        if let Some(handle) = self
            .dispatcher
            .lock()
            .expect("dispatcher lock poisoned")
            .take()
        {
            handle.abort();
            debug!("bus dispatcher stopped");
        }
    }

    /// Resolve once every message accepted so far has been dispatched.
    pub async fn wait_idle(&self) {
        while self.in_flight.load(AtomicOrdering::SeqCst) > 0 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    // ── Registry ──────────────────────────────────────────────────────────────

    /// Register a participant under its id with the given capabilities.
    ///
    /// The bus stores only a weak reference; the caller keeps the `Arc`
    /// alive.  Duplicate ids are rejected without touching the index.
    pub fn register(
        &self,
        capabilities: Vec<String>,
        participant: Arc<dyn Participant>,
    ) -> Result<(), BusError> {
        let id = participant.id().to_string();
        let mut state = self.state();
        if state.participants.contains_key(&id) {
            warn!(participant = %id, "duplicate registration rejected");
            return Err(BusError::Duplicate(id));
        }
        for capability in &capabilities {
            let ids = state
                .capability_index
                .entry(capability.clone())
                .or_default();
            if !ids.contains(&id) {
                ids.push(id.clone());
            }
        }
        state.participants.insert(
            id.clone(),
            Registered {
                handler: Arc::downgrade(&participant),
                capabilities,
                status: ParticipantStatus::Idle,
            },
        );
        debug!(participant = %id, "participant registered");
        Ok(())
    }

    /// Remove a participant.  Marks it disabled first so an in-flight
    /// delivery observed mid-removal is dropped rather than handled.
    pub fn unregister(&self, id: &str) -> Result<(), BusError> {
        let mut state = self.state();
        if let Some(entry) = state.participants.get_mut(id) {
            entry.status = ParticipantStatus::Disabled;
        } else {
            warn!(participant = %id, "unregister: participant not found");
            return Err(BusError::NotFound(id.to_string()));
        }
        Self::remove_locked(&mut state, id);
        debug!(participant = %id, "participant unregistered");
        Ok(())
    }

    /// Update a participant's registry-visible status.
    pub fn set_status(&self, id: &str, status: ParticipantStatus) -> Result<(), BusError> {
        let mut state = self.state();
        match state.participants.get_mut(id) {
            Some(entry) => {
                entry.status = status;
                Ok(())
            }
            None => Err(BusError::NotFound(id.to_string())),
        }
    }

    /// All live participant ids.  Dead weak references observed during the
    /// sweep are unregistered.
    pub fn participants(&self) -> Vec<String> {
        let mut state = self.state();
        let dead: Vec<String> = state
            .participants
            .iter()
            .filter(|(_, entry)| entry.handler.upgrade().is_none())
            .map(|(id, _)| id.clone())
            .collect();
        for id in &dead {
            warn!(participant = %id, "dropping dead participant reference");
            Self::remove_locked(&mut state, id);
        }
        state.participants.keys().cloned().collect()
    }

    /// Participant ids advertising `capability`.
    pub fn find_by_capability(&self, capability: &str) -> Vec<String> {
        self.state()
            .capability_index
            .get(capability)
            .cloned()
            .unwrap_or_default()
    }

    /// Participant ids matching several capabilities: intersection when
    /// `match_all`, union otherwise.
    pub fn find_by_capabilities(&self, capabilities: &[String], match_all: bool) -> Vec<String> {
        if capabilities.is_empty() {
            return Vec::new();
        }
        let state = self.state();
        let ids_for = |capability: &String| -> Vec<String> {
            state
                .capability_index
                .get(capability)
                .cloned()
                .unwrap_or_default()
        };
        let mut result = ids_for(&capabilities[0]);
        for capability in &capabilities[1..] {
            let next = ids_for(capability);
            if match_all {
                result.retain(|id| next.contains(id));
            } else {
                for id in next {
                    if !result.contains(&id) {
                        result.push(id);
                    }
                }
            }
        }
        result
    }

    /// Remove a participant and its capability-index entries.  Caller holds
    /// the state lock.
    fn remove_locked(state: &mut BusState, id: &str) {
        if let Some(entry) = state.participants.remove(id) {
            for capability in &entry.capabilities {
                if let Some(ids) = state.capability_index.get_mut(capability) {
                    ids.retain(|p| p != id);
                    if ids.is_empty() {
                        state.capability_index.remove(capability);
                    }
                }
            }
        }
    }

    // ── Listeners ─────────────────────────────────────────────────────────────

    /// Subscribe a listener for message types matching `pattern`: an exact
    /// type, `"*"`, or `"prefix.*"`.
    pub fn subscribe(&self, pattern: impl Into<String>, listener: Listener) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, AtomicOrdering::SeqCst));
        let pattern = pattern.into();
        debug!(%pattern, "listener subscribed");
        self.state().subscriptions.push(Subscription {
            id,
            pattern,
            listener,
        });
        id
    }

    /// Remove a subscription.  Returns `false` when the id is unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = self.state();
        let before = state.subscriptions.len();
        state.subscriptions.retain(|s| s.id != id);
        state.subscriptions.len() != before
    }

    // ── Sending ───────────────────────────────────────────────────────────────

    /// Enqueue a message for dispatch.  Expired messages are rejected here
    /// and never enter the queue.
    pub async fn send(&self, message: Message) -> Result<String, BusError> {
        if message.is_expired() {
            warn!(message_id = %message.message_id, "dropping expired message at send");
            return Err(BusError::Expired(message.message_id));
        }
        let id = message.message_id.clone();
        let seq = self.seq.fetch_add(1, AtomicOrdering::SeqCst);
        trace!(message_id = %id, message_type = %message.message_type, seq, "message enqueued");
        self.in_flight.fetch_add(1, AtomicOrdering::SeqCst);
        self.queue
            .lock()
            .expect("bus queue lock poisoned")
            .push(QueuedMessage { message, seq });
        self.notify.notify_one();
        Ok(id)
    }

    /// Send a request and wait up to `timeout` for its reply.  The reply
    /// waiter is installed before the send and removed on every exit path.
    pub async fn request_reply(
        &self,
        sender: &str,
        receiver: &str,
        message_type: &str,
        content: Value,
        timeout: Duration,
    ) -> Result<Message, BusError> {
        let message = Message::new(sender, receiver, message_type, content);
        self.send_and_wait(message, timeout).await
    }

    /// Like [`request_reply`] but for a caller-built message (custom
    /// priority, expiry, headers).
    ///
    /// [`request_reply`]: Bus::request_reply
    pub async fn send_and_wait(
        &self,
        message: Message,
        timeout: Duration,
    ) -> Result<Message, BusError> {
        let id = message.message_id.clone();
        let rx = self.install_waiter(&id);
        if let Err(e) = self.send(message).await {
            self.remove_waiter(&id);
            return Err(e);
        }
        self.await_waiter(id, rx, timeout).await
    }

    /// Lower-level variant: wait for a reply to an already-sent message.
    pub async fn wait_for_reply(
        &self,
        message_id: &str,
        timeout: Duration,
    ) -> Result<Message, BusError> {
        let rx = self.install_waiter(message_id);
        self.await_waiter(message_id.to_string(), rx, timeout).await
    }

    fn install_waiter(&self, message_id: &str) -> oneshot::Receiver<Message> {
        let (tx, rx) = oneshot::channel();
        // At most one waiter per id: a replaced waiter's receiver errors out
        // and surfaces as a timeout to its caller.
        self.state()
            .reply_waiters
            .insert(message_id.to_string(), tx);
        rx
    }

    fn remove_waiter(&self, message_id: &str) {
        self.state().reply_waiters.remove(message_id);
    }

    async fn await_waiter(
        &self,
        message_id: String,
        rx: oneshot::Receiver<Message>,
        timeout: Duration,
    ) -> Result<Message, BusError> {
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => {
                self.remove_waiter(&message_id);
                Err(BusError::ReplyTimeout(message_id))
            }
            Err(_) => {
                warn!(message_id = %message_id, "reply wait timed out");
                self.remove_waiter(&message_id);
                Err(BusError::ReplyTimeout(message_id))
            }
        }
    }

    // ── Dispatch ──────────────────────────────────────────────────────────────

    async fn dispatch_loop(self: Arc<Self>) {
        loop {
            let queued = loop {
                let popped = self.queue.lock().expect("bus queue lock poisoned").pop();
                match popped {
                    Some(q) => break q,
                    None => self.notify.notified().await,
                }
            };
            self.dispatch(queued.message).await;
            self.in_flight.fetch_sub(1, AtomicOrdering::SeqCst);
        }
    }

    async fn dispatch(&self, mut message: Message) {
        if message.is_expired() {
            warn!(message_id = %message.message_id, "skipping expired message at dequeue");
            return;
        }

        let is_reply = message.reply_to.is_some();

        // Complete the reply waiter, if one is pending for this id.  The
        // message still flows to listeners below.
        if let Some(reply_to) = &message.reply_to {
            let waiter = self.state().reply_waiters.remove(reply_to);
            if let Some(tx) = waiter {
                trace!(message_id = %message.message_id, reply_to = %reply_to, "reply matched waiter");
                let _ = tx.send(message.clone());
            }
        }

        // Unknown receiver: drop before both listener and direct delivery.
        // Replies and broadcasts are exempt.
        if message.receiver != BROADCAST && !is_reply {
            let known = self.state().participants.contains_key(&message.receiver);
            if !known {
                warn!(
                    message_id = %message.message_id,
                    receiver = %message.receiver,
                    "dropping message for unknown receiver"
                );
                return;
            }
        }

        self.call_listeners(&message).await;

        if message.receiver == BROADCAST {
            self.deliver_broadcast(&message).await;
        } else if !is_reply {
            self.deliver_direct(&message).await;
        }

        message.processed = true;
        trace!(message_id = %message.message_id, "message processed");
    }

    async fn call_listeners(&self, message: &Message) {
        let listeners: Vec<Listener> = {
            let state = self.state();
            state
                .subscriptions
                .iter()
                .filter(|s| pattern_matches(&s.pattern, &message.message_type))
                .map(|s| Arc::clone(&s.listener))
                .collect()
        };
        for listener in listeners {
            let fut = (listener)(message.clone());
            if AssertUnwindSafe(fut).catch_unwind().await.is_err() {
                error!(
                    message_id = %message.message_id,
                    message_type = %message.message_type,
                    "listener panicked; continuing dispatch"
                );
            }
        }
    }

    async fn deliver_broadcast(&self, message: &Message) {
        let (targets, dead) = {
            let state = self.state();
            let mut targets: Vec<(String, Arc<dyn Participant>)> = Vec::new();
            let mut dead: Vec<String> = Vec::new();
            for (id, entry) in &state.participants {
                // A sender never receives its own broadcast.
                if *id == message.sender || !entry.status.accepts_messages() {
                    continue;
                }
                match entry.handler.upgrade() {
                    Some(handler) => targets.push((id.clone(), handler)),
                    None => dead.push(id.clone()),
                }
            }
            (targets, dead)
        };
        for id in dead {
            warn!(participant = %id, "dropping dead participant reference");
            let mut state = self.state();
            Self::remove_locked(&mut state, &id);
        }
        for (id, handler) in targets {
            self.invoke_handler(&id, handler, message).await;
        }
    }

    async fn deliver_direct(&self, message: &Message) {
        let target = {
            let state = self.state();
            state.participants.get(&message.receiver).and_then(|entry| {
                if entry.status.accepts_messages() {
                    Some(entry.handler.clone())
                } else {
                    None
                }
            })
        };
        let Some(weak) = target else {
            debug!(
                message_id = %message.message_id,
                receiver = %message.receiver,
                "receiver not accepting messages; dropped"
            );
            return;
        };
        match weak.upgrade() {
            Some(handler) => {
                let id = message.receiver.clone();
                self.invoke_handler(&id, handler, message).await;
            }
            None => {
                warn!(participant = %message.receiver, "dropping dead participant reference");
                let mut state = self.state();
                Self::remove_locked(&mut state, &message.receiver);
            }
        }
    }

    async fn invoke_handler(&self, id: &str, handler: Arc<dyn Participant>, message: &Message) {
        let fut = handler.handle_message(message.clone());
        if AssertUnwindSafe(fut).catch_unwind().await.is_err() {
            error!(
                participant = %id,
                message_id = %message.message_id,
                message_type = %message.message_type,
                "participant handler panicked; continuing dispatch"
            );
        }
    }
}

/// Match a subscription pattern against a message type: exact, `"*"`, or
/// `"prefix.*"` (the prefix includes the trailing dot).
fn pattern_matches(pattern: &str, message_type: &str) -> bool {
    if pattern == "*" || pattern == message_type {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        if prefix.ends_with('.') {
            return message_type.starts_with(prefix);
        }
    }
    false
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
