//! The message queue: admission, dispatch, correlation and retry.
//!
//! All mutable state lives in one [`QueueState`] behind a single mutex. A
//! dedicated tokio task (the dispatcher) is the only place that moves
//! messages onto the wire; every other operation mutates state under the
//! same lock and wakes it through a [`Notify`].

mod backfill;
mod correlator;
mod dispatcher;
mod retry;
mod state;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;

use ocpp_core::AppResult;
use ocpp_core::config::{Classification, QueueConfig};
use ocpp_core::types::{MessageId, TransactionId};

use self::backfill::set_transaction_id;
use self::state::QueueState;
use crate::clock::QueueClock;
use crate::envelope::{Call, Envelope};
use crate::message::{ControlMessage, EnhancedMessage, PendingReply};
use crate::store::{MemoryMessageStore, StoredTransactionMessage, TransactionMessageStore};
use crate::transport::{IdGenerator, Transport, UuidIdGenerator};

pub use self::state::QueueLengths;

/// State and collaborators shared between the handle and the dispatcher.
pub(crate) struct Shared {
    state: Mutex<QueueState>,
    notify: Notify,
    transport: Arc<dyn Transport>,
    ids: Arc<dyn IdGenerator>,
    store: Arc<dyn TransactionMessageStore>,
    clock: QueueClock,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wake(&self) {
        self.notify.notify_one();
    }

    fn persist_insert(&self, message: &ControlMessage) {
        if let Err(e) = self.store.insert(&StoredTransactionMessage::from(message)) {
            tracing::warn!("Failed to persist transaction message {}: {}", message.unique_id(), e);
        }
    }

    fn persist_update(&self, message: &ControlMessage) {
        if let Err(e) = self.store.update(&StoredTransactionMessage::from(message)) {
            tracing::warn!(
                "Failed to update persisted transaction message {}: {}",
                message.initial_unique_id,
                e
            );
        }
    }

    fn persist_remove(&self, initial_unique_id: &MessageId) {
        if let Err(e) = self.store.remove(initial_unique_id) {
            tracing::warn!(
                "Failed to remove persisted transaction message {}: {}",
                initial_unique_id,
                e
            );
        }
    }

    /// Admit a message, or resolve it offline when it cannot be queued.
    fn enqueue(&self, message: ControlMessage) {
        let mut state = self.lock();

        if !state.running {
            tracing::debug!("Message queue is stopped, discarding {}", message.action());
            message.resolve(EnhancedMessage::offline());
            return;
        }

        if message.is_transaction() {
            self.persist_insert(&message);
            state.transaction.push_back(message);
        } else if state.config.always_admits(message.action()) {
            tracing::debug!("{} jumps the normal message queue", message.action());
            state.normal.push_front(message);
        } else if state.admits_normal(message.action()) {
            state.normal.push_back(message);
        } else {
            tracing::debug!(
                "Queue is paused, resolving {} ({}) as offline",
                message.action(),
                message.unique_id()
            );
            message.resolve(EnhancedMessage::offline());
            return;
        }

        for dropped in state.enforce_size_threshold() {
            dropped.resolve(EnhancedMessage::offline());
        }
        self.wake();
    }
}

/// Configures and starts a [`MessageQueue`].
pub struct MessageQueueBuilder {
    config: QueueConfig,
    transport: Arc<dyn Transport>,
    ids: Arc<dyn IdGenerator>,
    store: Arc<dyn TransactionMessageStore>,
}

impl MessageQueueBuilder {
    pub fn new(transport: Arc<dyn Transport>, config: QueueConfig) -> Self {
        Self {
            config,
            transport,
            ids: Arc::new(UuidIdGenerator),
            store: Arc::new(MemoryMessageStore::new()),
        }
    }

    /// Replace the uuid v4 id generator.
    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Replace the in-memory transaction store.
    pub fn with_store(mut self, store: Arc<dyn TransactionMessageStore>) -> Self {
        self.store = store;
        self
    }

    /// Spawn the dispatcher. Must be called inside a tokio runtime.
    ///
    /// The queue starts paused; call [`MessageQueue::resume`] once the
    /// transport is connected.
    pub fn start(self) -> MessageQueue {
        tracing::info!(
            "Starting message queue (max_attempts={}, retry_interval={}s, reply_timeout={}s)",
            self.config.max_attempts,
            self.config.retry_interval_seconds,
            self.config.reply_timeout_seconds
        );

        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState::new(self.config)),
            notify: Notify::new(),
            transport: self.transport,
            ids: self.ids,
            store: self.store,
            clock: QueueClock::new(),
        });
        let worker = tokio::spawn(dispatcher::run(Arc::clone(&shared)));

        MessageQueue {
            shared,
            worker: Mutex::new(Some(worker)),
        }
    }
}

/// Handle to a running message queue. Safe to share between tasks.
pub struct MessageQueue {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MessageQueue {
    pub fn builder(transport: Arc<dyn Transport>, config: QueueConfig) -> MessageQueueBuilder {
        MessageQueueBuilder::new(transport, config)
    }

    /// Mint a fresh unique id for an outbound call.
    pub fn next_message_id(&self) -> MessageId {
        self.shared.ids.next_id()
    }

    /// Queue a call without waiting for its outcome.
    pub fn submit(&self, call: Call, classification: Classification) {
        let message = ControlMessage::new(call, classification, self.shared.clock.now(), None);
        self.shared.enqueue(message);
    }

    /// Queue a call and get a future resolving exactly once with its reply,
    /// its CallError, or an offline outcome.
    pub fn submit_async(&self, call: Call, classification: Classification) -> PendingReply {
        let (tx, rx) = oneshot::channel();
        let message = ControlMessage::new(call, classification, self.shared.clock.now(), Some(tx));
        self.shared.enqueue(message);
        PendingReply::new(rx)
    }

    /// Decode an inbound text frame and correlate it with the in-flight call.
    pub fn on_receive(&self, raw: &str) -> EnhancedMessage {
        self.shared.receive(raw)
    }

    /// Write the reply to an inbound call directly to the transport and
    /// release the hold on outbound calls.
    pub fn send_reply(&self, envelope: &Envelope) -> bool {
        let mut state = self.shared.lock();
        let sent = self.shared.transport.send(envelope);
        if !sent {
            tracing::warn!("Could not send reply {} to the central system", envelope.unique_id());
        }
        if state.next_message_to_send.as_ref() == Some(envelope.unique_id()) {
            state.next_message_to_send = None;
            self.shared.wake();
        }
        sent
    }

    /// Release the hold on outbound calls without sending a reply.
    pub fn reset_next_message_to_send(&self) {
        let mut state = self.shared.lock();
        if state.next_message_to_send.take().is_some() {
            self.shared.wake();
        }
    }

    /// Stop issuing new sends. An in-flight message keeps its reply timer.
    pub fn pause(&self) {
        tracing::debug!("Pausing message queue");
        let mut state = self.shared.lock();
        state.paused = true;
        state.resume_at = None;
    }

    pub fn resume(&self) {
        self.resume_after(Duration::ZERO);
    }

    /// Resume sending. On a reconnect with a non-zero delay, normal messages
    /// are admitted right away but dispatch starts only after `delay`.
    pub fn resume_after(&self, delay: Duration) {
        let mut state = self.shared.lock();
        let reconnect = state.resume_count > 0;
        state.resume_count += 1;

        if reconnect && !delay.is_zero() {
            let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
            let at = self
                .shared
                .clock
                .now()
                .checked_add_signed(delay)
                .unwrap_or(chrono::DateTime::<chrono::Utc>::MAX_UTC);
            tracing::debug!("Delaying message queue resume until {}", at);
            state.resume_at = Some(at);
        } else {
            tracing::debug!("Resuming message queue");
            state.paused = false;
            state.resume_at = None;
        }
        self.shared.wake();
    }

    pub fn is_paused(&self) -> bool {
        self.shared.lock().paused
    }

    /// Stop the dispatcher and wait for it to exit. Queued messages are
    /// left unresolved.
    pub async fn stop(&self) {
        {
            let mut state = self.shared.lock();
            state.running = false;
        }
        self.shared.wake();

        let worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::error!("Message queue worker terminated abnormally: {}", e);
            }
        }
    }

    /// Write `transaction_id` into the queued message with `pending_unique_id`
    /// when it is dispatched.
    pub fn register_backfill(&self, pending_unique_id: MessageId, transaction_id: TransactionId) {
        let mut state = self.shared.lock();
        state.backfill.register(pending_unique_id, transaction_id);
        tracing::debug!("{} transaction id backfill(s) pending", state.backfill.pending());
    }

    /// Link a queued MeterValues message to the StartTransaction it belongs to.
    pub fn register_meter_value_backfill(&self, start_unique_id: MessageId, meter_values_id: MessageId) {
        self.shared
            .lock()
            .backfill
            .register_meter_values(start_unique_id, meter_values_id);
    }

    /// Let dispatch continue after a deferred reply was handled.
    pub fn notify_deferred_complete(&self) {
        let mut state = self.shared.lock();
        state.awaiting_deferred = false;
        self.shared.wake();
    }

    /// Fill in the transaction id of every queued message registered for
    /// `start_unique_id`, then let dispatch continue.
    pub fn notify_start_transaction_handled(
        &self,
        start_unique_id: &MessageId,
        transaction_id: TransactionId,
    ) {
        let mut state = self.shared.lock();
        let pending = state.backfill.take_meter_values(start_unique_id);

        let mut updated = 0;
        for message in state.transaction.iter_mut() {
            let registered = pending.contains(&message.initial_unique_id)
                || pending.contains(message.unique_id());
            if registered && set_transaction_id(&mut message.call.payload, transaction_id) {
                self.shared.persist_update(message);
                updated += 1;
            }
        }
        tracing::debug!(
            "Set transaction id {} on {} queued message(s) of {}",
            transaction_id,
            updated,
            start_unique_id
        );

        state.awaiting_deferred = false;
        self.shared.wake();
    }

    /// Re-enqueue persisted transaction messages ahead of any transaction
    /// messages submitted since startup. Records whose action is in
    /// `skip_actions` are deleted instead; records already queued are left
    /// alone. Returns the number restored.
    pub fn restore_transaction_messages(&self, skip_actions: &[&str]) -> AppResult<usize> {
        let records = self.shared.store.load_all()?;
        let mut state = self.shared.lock();

        let mut batch = Vec::new();
        for record in records {
            if skip_actions.contains(&record.call.action.as_str()) {
                tracing::info!(
                    "Dropping persisted {} message {}",
                    record.call.action,
                    record.initial_unique_id
                );
                self.shared.persist_remove(&record.initial_unique_id);
                continue;
            }

            let queued = state
                .transaction
                .iter()
                .chain(state.in_flight.as_ref().map(|f| &f.message))
                .any(|m| m.initial_unique_id == record.initial_unique_id);
            if queued {
                tracing::debug!("Persisted message {} is already queued", record.initial_unique_id);
                continue;
            }

            let mut message = ControlMessage::new(
                record.call,
                Classification::Transaction,
                record.scheduled_at,
                None,
            );
            message.initial_unique_id = record.initial_unique_id;
            message.attempts = record.attempts;
            batch.push(message);
        }

        let restored = batch.len();
        for message in batch.into_iter().rev() {
            state.transaction.push_front(message);
        }

        tracing::info!("Restored {} transaction message(s) from the store", restored);
        self.shared.wake();
        Ok(restored)
    }

    pub fn is_transaction_queue_empty(&self) -> bool {
        self.shared.lock().transaction.is_empty()
    }

    /// Whether any queued or in-flight transaction call matches `predicate`.
    pub fn contains_transaction_message<P>(&self, predicate: P) -> bool
    where
        P: Fn(&Call) -> bool,
    {
        let state = self.shared.lock();
        let in_flight = state
            .in_flight
            .as_ref()
            .filter(|f| f.message.is_transaction())
            .is_some_and(|f| predicate(&f.message.call));
        in_flight || state.transaction.iter().any(|m| predicate(&m.call))
    }

    pub fn queue_lengths(&self) -> QueueLengths {
        self.shared.lock().lengths()
    }

    pub fn update_max_attempts(&self, max_attempts: u32) {
        self.shared.lock().config.max_attempts = max_attempts;
    }

    pub fn update_retry_interval(&self, retry_interval_seconds: u32) {
        self.shared.lock().config.retry_interval_seconds = retry_interval_seconds;
    }

    /// Applies to messages sent after the change.
    pub fn update_reply_timeout(&self, reply_timeout_seconds: u32) {
        self.shared.lock().config.reply_timeout_seconds = reply_timeout_seconds;
    }
}

impl Drop for MessageQueue {
    fn drop(&mut self) {
        self.shared.lock().running = false;
        self.shared.wake();
    }
}
