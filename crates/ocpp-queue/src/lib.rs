//! # ocpp-queue
//!
//! Outbound message queue for an OCPP charge point. Serialises calls to the
//! central system so that at most one is awaiting a reply, correlates
//! inbound CALLRESULT/CALLERROR frames with it, and retries transaction
//! messages with linear backoff until they are delivered or exhausted.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use ocpp_core::config::{Classification, QueueConfig};
//! # use ocpp_queue::{Call, Envelope, MessageQueue};
//! # async fn run() -> ocpp_core::AppResult<()> {
//! let transport = Arc::new(|envelope: &Envelope| {
//!     println!("{}", envelope.to_json());
//!     true
//! });
//! let queue = MessageQueue::builder(transport, QueueConfig::default()).start();
//! queue.resume();
//!
//! let call = Call::new(queue.next_message_id(), "Heartbeat", serde_json::json!({}));
//! let reply = queue.submit_async(call, Classification::Normal).await?;
//! assert!(reply.offline || reply.message_kind == "HeartbeatResponse");
//! queue.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod envelope;
pub mod message;
pub mod queue;
pub mod store;
pub mod transport;

pub use envelope::{Call, CallError, CallResult, Envelope, EnvelopeError, MessageTypeId};
pub use message::{ControlMessage, EnhancedMessage, PendingReply};
pub use queue::{MessageQueue, MessageQueueBuilder, QueueLengths};
pub use store::{
    JsonFileMessageStore, MemoryMessageStore, StoredTransactionMessage, TransactionMessageStore,
    open_store,
};
pub use transport::{IdGenerator, Transport, UuidIdGenerator};
