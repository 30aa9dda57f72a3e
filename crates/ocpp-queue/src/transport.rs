//! Collaborators the queue talks to: the transport and the id generator.

use std::fmt;

use uuid::Uuid;

use ocpp_core::types::MessageId;

use crate::envelope::Envelope;

/// Synchronous write access to the connection with the central system.
///
/// The queue calls [`Transport::send`] while holding its internal lock, so
/// implementations must not call back into the queue from inside `send`;
/// hand the frame to a writer task instead.
pub trait Transport: Send + Sync {
    /// Attempt to write `envelope`. `false` means the connection is down or
    /// the write failed.
    fn send(&self, envelope: &Envelope) -> bool;
}

impl<F> Transport for F
where
    F: Fn(&Envelope) -> bool + Send + Sync,
{
    fn send(&self, envelope: &Envelope) -> bool {
        self(envelope)
    }
}

/// Source of process-unique message ids.
pub trait IdGenerator: Send + Sync + fmt::Debug {
    /// Mint a new id.
    fn next_id(&self) -> MessageId;
}

/// Random (UUID v4) id generator.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidIdGenerator;

impl IdGenerator for UuidIdGenerator {
    fn next_id(&self) -> MessageId {
        MessageId::new(Uuid::new_v4().to_string())
    }
}
