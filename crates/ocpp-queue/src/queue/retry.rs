//! Retry and backoff for the in-flight message after a timeout or CALLERROR.

use chrono::{DateTime, Duration, Utc};

use super::Shared;
use super::state::QueueState;
use crate::message::EnhancedMessage;

/// Next send time of a transaction message that failed `attempts` times.
///
/// A zero interval retries immediately; otherwise the delay grows linearly
/// with the attempt count, measured from the previous scheduled time.
pub(crate) fn next_scheduled_at(
    previous: DateTime<Utc>,
    now: DateTime<Utc>,
    retry_interval_seconds: u32,
    attempts: u32,
) -> DateTime<Utc> {
    if retry_interval_seconds == 0 {
        return now;
    }
    let delay = i64::from(retry_interval_seconds)
        .checked_mul(i64::from(attempts))
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX);
    previous
        .checked_add_signed(delay)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl Shared {
    /// React to a reply timeout (`error == None`) or a CALLERROR for the
    /// in-flight message.
    pub(crate) fn handle_timeout_or_error(
        &self,
        state: &mut QueueState,
        error: Option<EnhancedMessage>,
    ) {
        let Some(in_flight) = state.in_flight.take() else {
            return;
        };
        let mut message = in_flight.message;

        match &error {
            None => tracing::warn!(
                "Message timeout for: {} ({}) from the {:?} queue",
                message.action(),
                message.unique_id(),
                in_flight.source
            ),
            Some(_) => tracing::warn!(
                "CALLERROR for: {} ({})",
                message.action(),
                message.unique_id()
            ),
        }

        if !message.is_transaction() {
            tracing::warn!("Message is not transaction related, dropping it");
            message.resolve(error.unwrap_or_else(EnhancedMessage::offline));
        } else if message.attempts < state.config.max_attempts {
            tracing::warn!("Message is transaction related and will therefore be sent again");
            message.call.unique_id = self.ids.next_id();
            message.scheduled_at = next_scheduled_at(
                message.scheduled_at,
                self.clock.now(),
                state.config.retry_interval_seconds,
                message.attempts,
            );
            tracing::warn!(
                "Attempt: {}/{} will be sent at {} with new id {}",
                message.attempts + 1,
                state.config.max_attempts,
                message.scheduled_at,
                message.unique_id()
            );
            self.persist_update(&message);
            state.transaction.push_front(message);
        } else {
            tracing::error!(
                "Could not deliver message within the configured amount of attempts, dropping message"
            );
            self.persist_remove(&message.initial_unique_id);
            message.resolve(error.unwrap_or_else(EnhancedMessage::offline));
        }

        self.wake();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_interval_retries_now() {
        let previous = Utc::now() - Duration::seconds(100);
        let now = Utc::now();
        assert_eq!(next_scheduled_at(previous, now, 0, 2), now);
    }

    #[test]
    fn test_huge_interval_saturates() {
        let previous = Utc::now();
        assert_eq!(
            next_scheduled_at(previous, previous, u32::MAX, u32::MAX),
            DateTime::<Utc>::MAX_UTC
        );
        assert_eq!(
            next_scheduled_at(previous, previous, u32::MAX, 1),
            previous + Duration::seconds(i64::from(u32::MAX))
        );
    }

    #[test]
    fn test_backoff_grows_with_attempts() {
        let previous = Utc::now();
        let now = previous + Duration::seconds(30);
        assert_eq!(
            next_scheduled_at(previous, now, 10, 1),
            previous + Duration::seconds(10)
        );
        assert_eq!(
            next_scheduled_at(previous, now, 10, 3),
            previous + Duration::seconds(30)
        );
    }
}
