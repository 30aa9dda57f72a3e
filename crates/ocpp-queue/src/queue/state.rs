//! Shared queue state and the scheduling rules evaluated under the lock.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use ocpp_core::config::QueueConfig;
use ocpp_core::types::MessageId;

use super::backfill::Backfill;
use crate::message::ControlMessage;

/// The queue a message was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QueueType {
    Normal,
    Transaction,
}

/// The single message awaiting a reply.
#[derive(Debug)]
pub(crate) struct InFlight {
    pub message: ControlMessage,
    pub source: QueueType,
    /// Reply timeout expiry
    pub deadline: DateTime<Utc>,
}

/// What the dispatcher should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wake {
    /// `stop()` was requested.
    Shutdown,
    /// The in-flight message did not get a reply in time.
    ReplyTimeout,
    /// A message is eligible for sending now.
    Dispatch,
    /// Nothing to do until notified, or until the given time.
    Sleep(Option<DateTime<Utc>>),
}

/// Combined lengths of the queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueLengths {
    /// Messages in the normal queue.
    pub normal: usize,
    /// Messages in the transaction queue.
    pub transaction: usize,
    /// Whether a message is awaiting its reply.
    pub in_flight: bool,
}

#[derive(Debug)]
pub(crate) struct QueueState {
    pub config: QueueConfig,
    /// FIFO of non-transaction messages
    pub normal: VecDeque<ControlMessage>,
    /// Transaction messages; retries are pushed to the front
    pub transaction: VecDeque<ControlMessage>,
    pub in_flight: Option<InFlight>,
    pub paused: bool,
    /// Set while a delayed resume is pending
    pub resume_at: Option<DateTime<Utc>>,
    pub resume_count: u64,
    pub running: bool,
    /// A deferred-notify reply was resolved and its handler has not finished
    pub awaiting_deferred: bool,
    /// Inbound call that must be answered before our next outbound call
    pub next_message_to_send: Option<MessageId>,
    pub backfill: Backfill,
}

impl QueueState {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            normal: VecDeque::new(),
            transaction: VecDeque::new(),
            in_flight: None,
            paused: true,
            resume_at: None,
            resume_count: 0,
            running: true,
            awaiting_deferred: false,
            next_message_to_send: None,
            backfill: Backfill::default(),
        }
    }

    /// Whether a normal message for `action` may be enqueued right now.
    pub fn admits_normal(&self, action: &str) -> bool {
        !self.paused
            || self.resume_at.is_some()
            || self.config.queue_all_messages
            || self.config.always_admits(action)
    }

    /// Lift the pause once a delayed resume is due.
    pub fn apply_due_resume(&mut self, now: DateTime<Utc>) {
        if let Some(at) = self.resume_at {
            if at <= now {
                tracing::debug!("Delayed resume is due, unpausing message queue");
                self.paused = false;
                self.resume_at = None;
            }
        }
    }

    pub fn next_wake(&self, now: DateTime<Utc>) -> Wake {
        if !self.running {
            return Wake::Shutdown;
        }
        if let Some(in_flight) = &self.in_flight {
            // The reply timer runs regardless of pause state
            if in_flight.deadline <= now {
                return Wake::ReplyTimeout;
            }
            return Wake::Sleep(Some(in_flight.deadline));
        }
        if self.paused {
            return Wake::Sleep(self.resume_at);
        }
        if self.awaiting_deferred || self.next_message_to_send.is_some() {
            return Wake::Sleep(None);
        }
        match self.select(now) {
            Some(_) => Wake::Dispatch,
            None => Wake::Sleep(self.earliest_scheduled()),
        }
    }

    /// Pick the queue whose head should be sent next.
    ///
    /// Only heads scheduled at or before `now` are eligible. When both are,
    /// the transaction head wins unless it is scheduled strictly later than
    /// the normal head.
    pub fn select(&self, now: DateTime<Utc>) -> Option<QueueType> {
        let normal = self.normal.front().filter(|m| m.scheduled_at <= now);
        let transaction = self.transaction.front().filter(|m| m.scheduled_at <= now);

        match (normal, transaction) {
            (Some(n), Some(t)) => {
                if t.scheduled_at <= n.scheduled_at {
                    Some(QueueType::Transaction)
                } else {
                    tracing::debug!("Prioritizing newer normal message over older transaction message");
                    Some(QueueType::Normal)
                }
            }
            (Some(_), None) => Some(QueueType::Normal),
            (None, Some(_)) => Some(QueueType::Transaction),
            (None, None) => None,
        }
    }

    pub fn take(&mut self, queue: QueueType) -> Option<ControlMessage> {
        match queue {
            QueueType::Normal => self.normal.pop_front(),
            QueueType::Transaction => self.transaction.pop_front(),
        }
    }

    fn earliest_scheduled(&self) -> Option<DateTime<Utc>> {
        let normal = self.normal.front().map(|m| m.scheduled_at);
        let transaction = self.transaction.front().map(|m| m.scheduled_at);
        match (normal, transaction) {
            (Some(n), Some(t)) => Some(n.min(t)),
            (n, t) => n.or(t),
        }
    }

    /// Drop the oldest normal messages while the queues exceed the
    /// configured threshold. Transaction messages are never dropped.
    pub fn enforce_size_threshold(&mut self) -> Vec<ControlMessage> {
        let Some(threshold) = self.config.queues_total_size_threshold else {
            return Vec::new();
        };

        let mut dropped = Vec::new();
        if self.total_len() <= threshold {
            return dropped;
        }

        tracing::warn!(
            "Queue sizes exceed threshold ({}) with {} transaction and {} normal messages in queue",
            threshold,
            self.transaction.len(),
            self.normal.len()
        );

        let batch = (threshold / 10).max(1);
        while self.total_len() > threshold {
            // Oldest first, always-admitted messages stay
            let mut removed = 0;
            let mut kept = VecDeque::with_capacity(self.normal.len());
            for message in self.normal.drain(..) {
                if removed < batch && !self.config.always_admits(message.action()) {
                    dropped.push(message);
                    removed += 1;
                } else {
                    kept.push_back(message);
                }
            }
            self.normal = kept;

            if removed == 0 {
                break;
            }
            tracing::warn!("Dropped {} messages from normal message queue", removed);
        }

        if self.total_len() > threshold {
            tracing::warn!("Transaction and always-admitted messages alone exceed the queue threshold, keeping them");
        }

        dropped
    }

    pub fn total_len(&self) -> usize {
        self.normal.len() + self.transaction.len()
    }

    pub fn lengths(&self) -> QueueLengths {
        QueueLengths {
            normal: self.normal.len(),
            transaction: self.transaction.len(),
            in_flight: self.in_flight.is_some(),
        }
    }
}
