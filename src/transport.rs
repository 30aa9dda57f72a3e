//! WebSocket-backed transport handed to the message queue.

use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc;

use ocpp_queue::{Envelope, Transport};

/// Outbound frames buffered per connection before sends start failing.
pub const OUTBOUND_BUFFER: usize = 64;

/// Writes envelopes into the outbound channel of the current connection.
///
/// Sends fail while no connection is attached, which makes the queue pause.
#[derive(Debug, Default)]
pub struct WebSocketTransport {
    sender: Mutex<Option<mpsc::Sender<String>>>,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route sends to a freshly connected socket.
    pub fn attach(&self, sender: mpsc::Sender<String>) {
        *self.sender.lock().unwrap_or_else(PoisonError::into_inner) = Some(sender);
    }

    pub fn detach(&self) {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

impl Transport for WebSocketTransport {
    fn send(&self, envelope: &Envelope) -> bool {
        let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = guard.as_ref() else {
            tracing::debug!("No connection to the central system, cannot send {}", envelope.unique_id());
            return false;
        };

        match sender.try_send(envelope.to_json()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Outbound buffer full, dropping frame {}", envelope.unique_id());
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("Connection writer closed, dropping frame {}", envelope.unique_id());
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocpp_queue::Call;
    use serde_json::json;

    #[test]
    fn test_send_fails_while_detached() {
        let transport = WebSocketTransport::new();
        let call = Envelope::from(Call::new("1", "Heartbeat", json!({})));
        assert!(!transport.send(&call));
    }

    #[test]
    fn test_send_writes_json_frame() {
        let transport = WebSocketTransport::new();
        let (tx, mut rx) = mpsc::channel(1);
        transport.attach(tx);

        let call = Envelope::from(Call::new("1", "Heartbeat", json!({})));
        assert!(transport.send(&call));
        assert_eq!(rx.try_recv().unwrap(), r#"[2,"1","Heartbeat",{}]"#);

        // Buffer of one is now full
        assert!(transport.send(&call));
        assert!(!transport.send(&call));

        transport.detach();
        assert!(!transport.send(&call));
    }
}
