//! Queue-side message representations.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::oneshot;

use ocpp_core::config::Classification;
use ocpp_core::error::AppError;
use ocpp_core::types::MessageId;
use ocpp_core::AppResult;

use crate::envelope::{Call, CallError, Envelope, EnvelopeError, MessageTypeId};

/// Suffix appended to an action name to form the kind of its reply.
pub const RESPONSE_SUFFIX: &str = "Response";

/// A decoded inbound frame, or the outcome delivered to a `submit_async` caller.
#[derive(Debug, Clone, Default)]
pub struct EnhancedMessage {
    /// The frame as received.
    pub raw: Value,
    /// Unique id at index 1.
    pub unique_id: MessageId,
    /// Message type id at index 0.
    pub type_id: MessageTypeId,
    /// Domain kind: the action for a Call, `"<Action>Response"` for a
    /// correlated CallResult, `"<Action>Error"` for a correlated CallError.
    pub message_kind: String,
    /// The decoded envelope.
    pub envelope: Option<Envelope>,
    /// The outbound call this frame answers (CallResult/CallError only).
    pub correlated_call: Option<Call>,
    /// The central system could not be reached or did not answer in time.
    pub offline: bool,
    /// Times the correlated call was handed to the transport (outcomes only).
    pub attempts: u32,
}

impl EnhancedMessage {
    /// Outcome for a message that was dropped without a reply.
    pub fn offline() -> Self {
        Self {
            offline: true,
            ..Self::default()
        }
    }

    /// Decode a raw text frame.
    pub fn decode(raw: &str) -> Result<Self, EnvelopeError> {
        let value: Value = serde_json::from_str(raw)?;
        let envelope = Envelope::from_value(value.clone())?;
        let message_kind = match &envelope {
            Envelope::Call(call) => call.action.clone(),
            _ => String::new(),
        };
        Ok(Self {
            raw: value,
            unique_id: envelope.unique_id().clone(),
            type_id: envelope.message_type_id(),
            message_kind,
            envelope: Some(envelope),
            correlated_call: None,
            offline: false,
            attempts: 0,
        })
    }

    /// Payload of a Call or CallResult.
    pub fn payload(&self) -> Option<&Value> {
        match self.envelope.as_ref()? {
            Envelope::Call(call) => Some(&call.payload),
            Envelope::CallResult(result) => Some(&result.payload),
            Envelope::CallError(_) => None,
        }
    }

    /// The CallError, if this frame is one.
    pub fn call_error(&self) -> Option<&CallError> {
        match self.envelope.as_ref()? {
            Envelope::CallError(error) => Some(error),
            _ => None,
        }
    }
}

/// One outbound Call plus its delivery metadata.
///
/// Owned by exactly one of: the normal queue, the transaction queue, or the
/// in-flight slot.
#[derive(Debug)]
pub struct ControlMessage {
    /// The call as it will be written; its unique id changes on retry.
    pub call: Call,
    /// Normal or transaction delivery.
    pub classification: Classification,
    /// Number of times the call has been handed to the transport.
    pub attempts: u32,
    /// Earliest time the call may be sent.
    pub scheduled_at: DateTime<Utc>,
    /// Unique id the call was submitted with; stable across retries.
    pub initial_unique_id: MessageId,
    reply: Option<oneshot::Sender<EnhancedMessage>>,
}

impl ControlMessage {
    pub(crate) fn new(
        call: Call,
        classification: Classification,
        scheduled_at: DateTime<Utc>,
        reply: Option<oneshot::Sender<EnhancedMessage>>,
    ) -> Self {
        let initial_unique_id = call.unique_id.clone();
        Self {
            call,
            classification,
            attempts: 0,
            scheduled_at,
            initial_unique_id,
            reply,
        }
    }

    /// Current unique id.
    pub fn unique_id(&self) -> &MessageId {
        &self.call.unique_id
    }

    /// OCPP action of the call.
    pub fn action(&self) -> &str {
        &self.call.action
    }

    /// Whether this is a transaction message.
    pub fn is_transaction(&self) -> bool {
        self.classification == Classification::Transaction
    }

    /// Deliver the outcome to the caller. Consumes the message, so a
    /// message resolves at most once.
    pub(crate) fn resolve(mut self, mut outcome: EnhancedMessage) {
        outcome.attempts = self.attempts;
        if let Some(reply) = self.reply.take() {
            if reply.send(outcome).is_err() {
                tracing::debug!(
                    "Caller dropped the reply future for message {}",
                    self.call.unique_id
                );
            }
        }
    }
}

/// Future returned by `submit_async`, resolving once per message.
#[derive(Debug)]
pub struct PendingReply {
    rx: oneshot::Receiver<EnhancedMessage>,
}

impl PendingReply {
    pub(crate) fn new(rx: oneshot::Receiver<EnhancedMessage>) -> Self {
        Self { rx }
    }

    /// Take the outcome if it has already been delivered.
    pub fn try_take(&mut self) -> Option<EnhancedMessage> {
        self.rx.try_recv().ok()
    }
}

impl Future for PendingReply {
    type Output = AppResult<EnhancedMessage>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.rx).poll(cx).map(|outcome| {
            outcome.map_err(|_| {
                AppError::service_unavailable("Message queue stopped before the message was resolved")
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_call_sets_kind() {
        let msg = EnhancedMessage::decode(r#"[2,"1","Reset",{"type":"Hard"}]"#).unwrap();
        assert_eq!(msg.type_id, MessageTypeId::Call);
        assert_eq!(msg.message_kind, "Reset");
        assert_eq!(msg.payload(), Some(&json!({"type": "Hard"})));
        assert!(!msg.offline);
    }

    #[test]
    fn test_decode_error_exposes_call_error() {
        let msg = EnhancedMessage::decode(r#"[4,"1","GenericError","nope",{}]"#).unwrap();
        assert_eq!(msg.call_error().map(|e| e.error_code.as_str()), Some("GenericError"));
        assert!(msg.payload().is_none());
    }

    #[tokio::test]
    async fn test_resolve_delivers_once() {
        let (tx, rx) = oneshot::channel();
        let message = ControlMessage::new(
            Call::new("a", "Heartbeat", json!({})),
            Classification::Normal,
            Utc::now(),
            Some(tx),
        );
        message.resolve(EnhancedMessage::offline());
        let outcome = PendingReply::new(rx).await.unwrap();
        assert!(outcome.offline);
    }

    #[tokio::test]
    async fn test_dropped_message_fails_future() {
        let (tx, rx) = oneshot::channel::<EnhancedMessage>();
        drop(tx);
        let err = PendingReply::new(rx).await.unwrap_err();
        assert_eq!(err.kind, ocpp_core::error::ErrorKind::ServiceUnavailable);
    }
}
