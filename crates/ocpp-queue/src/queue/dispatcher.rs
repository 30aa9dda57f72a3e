//! The single worker task that moves messages from the queues to the wire.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::time;

use super::Shared;
use super::state::{InFlight, QueueState, Wake};
use crate::envelope::Envelope;
use crate::message::EnhancedMessage;

/// Run until `stop()` is requested.
pub(crate) async fn run(shared: Arc<Shared>) {
    tracing::info!("Message queue worker started");

    loop {
        let sleep_until = {
            let mut state = shared.lock();
            let now = shared.clock.now();
            state.apply_due_resume(now);

            match state.next_wake(now) {
                Wake::Shutdown => break,
                Wake::ReplyTimeout => {
                    shared.handle_timeout_or_error(&mut state, None);
                    continue;
                }
                Wake::Dispatch => {
                    shared.dispatch_next(&mut state, now);
                    continue;
                }
                Wake::Sleep(until) => {
                    tracing::debug!(
                        "Waiting for a message from the message queue ({} normal, {} transaction)",
                        state.normal.len(),
                        state.transaction.len()
                    );
                    until
                }
            }
        };

        match sleep_until {
            Some(at) => {
                let deadline = shared.clock.instant_at(at);
                tokio::select! {
                    _ = shared.notify.notified() => {}
                    _ = time::sleep_until(deadline) => {}
                }
            }
            None => shared.notify.notified().await,
        }
    }

    tracing::info!("Message queue stopped processing messages");
}

impl Shared {
    /// Send the next eligible message and arm its reply timer.
    fn dispatch_next(&self, state: &mut QueueState, now: DateTime<Utc>) {
        debug_assert!(state.in_flight.is_none(), "at most one message may be in flight");

        let Some(source) = state.select(now) else {
            tracing::debug!("No message in queue ready to be sent yet");
            return;
        };
        let Some(mut message) = state.take(source) else {
            return;
        };

        if state.backfill.apply(&mut message) && message.is_transaction() {
            self.persist_update(&message);
        }

        tracing::debug!(
            "Attempting to send message to central system. UID: {} attempt#: {}",
            message.unique_id(),
            message.attempts + 1
        );

        let envelope = Envelope::Call(message.call.clone());
        if self.transport.send(&envelope) {
            message.attempts += 1;
            let timeout = Duration::seconds(i64::from(state.config.reply_timeout_seconds));
            tracing::debug!("Successfully sent message. UID: {}", message.unique_id());
            state.in_flight = Some(InFlight {
                message,
                source,
                deadline: now + timeout,
            });
            return;
        }

        state.paused = true;
        state.resume_at = None;
        tracing::error!("Could not send message, this is most likely because the charge point is offline.");

        if message.is_transaction() {
            tracing::info!(
                "The message in flight is transaction related and will be sent again once the connection can be established again."
            );
            state.transaction.push_front(message);
        } else if state.config.queue_all_messages {
            tracing::info!(
                "The message in flight will be sent again once the connection can be established again since queue_all_messages is set."
            );
            state.normal.push_front(message);
        } else {
            tracing::info!("The message in flight is not transaction related and will be dropped");
            message.resolve(EnhancedMessage::offline());
        }
    }
}
