//! Shared test helpers for queue integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};

use ocpp_core::config::{Classification, QueueConfig};
use ocpp_core::types::MessageId;
use ocpp_queue::{
    Call, CallError, CallResult, Envelope, IdGenerator, MessageQueue, TransactionMessageStore,
    Transport,
};

/// Transport that records every envelope it accepts.
#[derive(Debug)]
pub struct RecordingTransport {
    sent: Mutex<Vec<Envelope>>,
    online: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            online: AtomicBool::new(true),
        })
    }

    /// Make subsequent sends fail (or succeed again).
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Envelope> {
        self.sent.lock().unwrap().clone()
    }

    /// Outbound calls in send order.
    pub fn calls(&self) -> Vec<Call> {
        self.sent()
            .into_iter()
            .filter_map(|e| match e {
                Envelope::Call(call) => Some(call),
                _ => None,
            })
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls().len()
    }

    pub fn last_call(&self) -> Call {
        self.calls().pop().expect("no call was sent")
    }

    pub fn actions(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.action).collect()
    }
}

impl Transport for RecordingTransport {
    fn send(&self, envelope: &Envelope) -> bool {
        if !self.online.load(Ordering::SeqCst) {
            return false;
        }
        self.sent.lock().unwrap().push(envelope.clone());
        true
    }
}

/// Deterministic ids: `id-1`, `id-2`, ...
#[derive(Debug, Default)]
pub struct SequentialIds {
    next: AtomicU64,
}

impl IdGenerator for SequentialIds {
    fn next_id(&self) -> MessageId {
        let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        MessageId::new(format!("id-{n}"))
    }
}

/// Test queue context
pub struct TestQueue {
    pub queue: MessageQueue,
    pub transport: Arc<RecordingTransport>,
}

impl TestQueue {
    /// Start a resumed queue with sequential ids.
    pub fn new(config: QueueConfig) -> Self {
        let queue = Self::paused(config);
        queue.queue.resume();
        queue
    }

    /// Start a queue without resuming it.
    pub fn paused(config: QueueConfig) -> Self {
        let transport = RecordingTransport::new();
        let queue = MessageQueue::builder(transport.clone(), config)
            .with_id_generator(Arc::new(SequentialIds::default()))
            .start();
        Self { queue, transport }
    }

    /// Start a paused queue backed by `store`.
    pub fn with_store(config: QueueConfig, store: Arc<dyn TransactionMessageStore>) -> Self {
        let transport = RecordingTransport::new();
        let queue = MessageQueue::builder(transport.clone(), config)
            .with_id_generator(Arc::new(SequentialIds::default()))
            .with_store(store)
            .start();
        Self { queue, transport }
    }

    pub fn call(&self, action: &str, payload: Value) -> Call {
        Call::new(self.queue.next_message_id(), action, payload)
    }

    /// Feed a CALLRESULT for `call` into the queue.
    pub fn reply_to(&self, call: &Call, payload: Value) -> ocpp_queue::EnhancedMessage {
        let raw = Envelope::from(CallResult::new(call.unique_id.clone(), payload)).to_json();
        self.queue.on_receive(&raw)
    }

    /// Feed a CALLERROR for `call` into the queue.
    pub fn error_for(&self, call: &Call, code: &str) -> ocpp_queue::EnhancedMessage {
        let raw = Envelope::from(CallError::new(call.unique_id.clone(), code, "test error")).to_json();
        self.queue.on_receive(&raw)
    }
}

/// Config with immediate retries and no persistence.
pub fn config() -> QueueConfig {
    QueueConfig {
        retry_interval_seconds: 0,
        ..QueueConfig::default()
    }
}

pub fn transaction() -> Classification {
    Classification::Transaction
}

pub fn normal() -> Classification {
    Classification::Normal
}

pub fn empty() -> Value {
    json!({})
}

/// Let the dispatcher run without advancing past any pending timer.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

/// Advance paused time by `secs` seconds, firing timers on the way.
pub async fn advance(secs: u64) {
    tokio::time::sleep(Duration::from_secs(secs)).await;
}
