//! Matching inbound CALLRESULT/CALLERROR frames against the in-flight call.

use super::Shared;
use super::state::QueueState;
use crate::envelope::MessageTypeId;
use crate::message::{EnhancedMessage, RESPONSE_SUFFIX};

impl Shared {
    pub(crate) fn receive(&self, raw: &str) -> EnhancedMessage {
        let mut enhanced = match EnhancedMessage::decode(raw) {
            Ok(enhanced) => enhanced,
            Err(e) => {
                // The in-flight message keeps its timer and will time out
                tracing::error!("Failed to decode inbound message: {}", e);
                return EnhancedMessage::default();
            }
        };

        match enhanced.type_id {
            MessageTypeId::Call => {
                let mut state = self.lock();
                // Our next frame must be the reply to this call
                state.next_message_to_send = Some(enhanced.unique_id.clone());
                return enhanced;
            }
            MessageTypeId::CallResult | MessageTypeId::CallError => {}
            MessageTypeId::Unknown => return enhanced,
        }

        let mut state = self.lock();
        state.next_message_to_send = None;

        let Some(in_flight) = state.in_flight.as_ref() else {
            tracing::error!(
                "Received a CALLRESULT or CALLERROR without a message in flight, this should not happen"
            );
            return enhanced;
        };
        if in_flight.message.unique_id() != &enhanced.unique_id {
            tracing::error!(
                "Received a CALLRESULT or CALLERROR with mismatching uid: {} != {}",
                in_flight.message.unique_id(),
                enhanced.unique_id
            );
            return enhanced;
        }

        let action = in_flight.message.action().to_string();
        enhanced.correlated_call = Some(in_flight.message.call.clone());

        if enhanced.type_id == MessageTypeId::CallError {
            tracing::error!(
                "Received a CALLERROR for message with UID: {}",
                enhanced.unique_id
            );
            enhanced.message_kind = format!("{action}Error");
            self.handle_timeout_or_error(&mut state, Some(enhanced.clone()));
        } else {
            enhanced.message_kind = format!("{action}{RESPONSE_SUFFIX}");
            self.handle_call_result(&mut state, &enhanced);
        }

        enhanced
    }

    fn handle_call_result(&self, state: &mut QueueState, enhanced: &EnhancedMessage) {
        let Some(in_flight) = state.in_flight.take() else {
            return;
        };
        let message = in_flight.message;

        if message.is_transaction() {
            // Only forget the message once the central system has it
            self.persist_remove(&message.initial_unique_id);
        }

        tracing::debug!(
            "Received {} for {} after {} attempt(s)",
            enhanced.message_kind,
            message.unique_id(),
            message.attempts
        );
        message.resolve(enhanced.clone());

        if state.config.defers_notify(&enhanced.message_kind) {
            tracing::debug!(
                "Holding dispatch until the {} handler signals completion",
                enhanced.message_kind
            );
            state.awaiting_deferred = true;
        } else {
            self.wake();
        }
    }
}
