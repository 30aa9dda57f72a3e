//! Connection loop to the central system.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use ocpp_core::config::{AppConfig, CentralSystemConfig, Classification, QueueConfig};
use ocpp_core::error::AppError;
use ocpp_core::AppResult;
use ocpp_queue::{Call, CallError, Envelope, MessageQueue, MessageTypeId};

use crate::transport::{OUTBOUND_BUFFER, WebSocketTransport};

const SUBPROTOCOL: &str = "ocpp1.6";

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Keeps the charge point connected until shutdown is signalled.
pub struct ChargePoint {
    config: CentralSystemConfig,
    queue_config: QueueConfig,
    queue: Arc<MessageQueue>,
    transport: Arc<WebSocketTransport>,
}

impl ChargePoint {
    pub fn new(
        config: &AppConfig,
        queue: Arc<MessageQueue>,
        transport: Arc<WebSocketTransport>,
    ) -> Self {
        Self {
            config: config.central_system.clone(),
            queue_config: config.queue.clone(),
            queue,
            transport,
        }
    }

    /// Connect, serve the session, and reconnect after it ends.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let reconnect = Duration::from_secs(self.config.reconnect_interval_seconds);

        loop {
            match self.connect().await {
                Ok(socket) => {
                    tracing::info!("Connected to central system at {}", self.config.endpoint());
                    if self.serve(socket, &mut shutdown).await {
                        break;
                    }
                }
                Err(e) => tracing::warn!("Connecting to central system failed: {}", e),
            }

            tracing::info!("Reconnecting in {}s", reconnect.as_secs());
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = time::sleep(reconnect) => {}
            }
        }

        tracing::info!("Connection loop stopped");
    }

    async fn connect(&self) -> AppResult<Socket> {
        let mut request = self
            .config
            .endpoint()
            .into_client_request()
            .map_err(|e| AppError::configuration(format!("Invalid central system url: {e}")))?;
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", HeaderValue::from_static(SUBPROTOCOL));

        let (socket, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| AppError::transport(format!("WebSocket handshake failed: {e}")))?;
        Ok(socket)
    }

    /// Serve one connection. Returns `true` when shutdown was requested.
    async fn serve(&self, socket: Socket, shutdown: &mut watch::Receiver<bool>) -> bool {
        let (mut sink, mut stream) = socket.split();
        let (tx, mut rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);

        let writer = tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                if let Err(e) = sink.send(Message::text(text)).await {
                    tracing::warn!("Failed to write frame: {}", e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        self.transport.attach(tx);
        self.queue
            .resume_after(Duration::from_secs(self.config.reconnect_resume_delay_seconds));
        self.boot();

        let period = Duration::from_secs(self.config.heartbeat_interval_seconds.max(1));
        let mut heartbeat = time::interval_at(time::Instant::now() + period, period);

        let stopping = loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.handle_frame(text.as_str()),
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!("Central system closed the connection");
                        break false;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!("WebSocket error: {}", e);
                        break false;
                    }
                },
                _ = heartbeat.tick() => {
                    let call = Call::new(self.queue.next_message_id(), "Heartbeat", json!({}));
                    let classification = self.classify(&call);
                    self.queue.submit(call, classification);
                }
                _ = shutdown.changed() => break true,
            }
        };

        self.queue.pause();
        self.transport.detach();
        writer.abort();
        stopping
    }

    fn boot(&self) {
        let call = Call::new(
            self.queue.next_message_id(),
            "BootNotification",
            json!({
                "chargePointVendor": "EVSE Platform",
                "chargePointModel": env!("CARGO_PKG_NAME"),
                "firmwareVersion": env!("CARGO_PKG_VERSION"),
            }),
        );
        let classification = self.classify(&call);
        let reply = self.queue.submit_async(call, classification);

        tokio::spawn(async move {
            match reply.await {
                Ok(reply) if reply.offline => {
                    tracing::warn!("BootNotification was not answered by the central system")
                }
                Ok(reply) => tracing::info!(
                    "BootNotification answered: {}",
                    reply.payload().map(|p| p.to_string()).unwrap_or_default()
                ),
                Err(e) => tracing::warn!("BootNotification abandoned: {}", e),
            }
        });
    }

    fn classify(&self, call: &Call) -> Classification {
        self.queue_config.classify(&call.action)
    }

    fn handle_frame(&self, text: &str) {
        let message = self.queue.on_receive(text);

        match message.type_id {
            MessageTypeId::Call => {
                tracing::info!("Central system requested {}", message.message_kind);
                let reply = CallError::new(
                    message.unique_id.clone(),
                    "NotImplemented",
                    format!("{} is not supported", message.message_kind),
                );
                self.queue.send_reply(&Envelope::from(reply));
            }
            _ if self.queue_config.defers_notify(&message.message_kind) => {
                // Nothing to record, let dispatch continue
                self.queue.notify_deferred_complete();
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocpp_core::config::LoggingConfig;

    fn app_config(transaction_actions: &[&str]) -> AppConfig {
        AppConfig {
            central_system: CentralSystemConfig {
                url: "ws://localhost:9000/ocpp".to_string(),
                charge_point_id: "CP-TEST".to_string(),
                heartbeat_interval_seconds: 300,
                reconnect_interval_seconds: 10,
                reconnect_resume_delay_seconds: 0,
            },
            queue: QueueConfig {
                transaction_actions: transaction_actions.iter().map(|a| a.to_string()).collect(),
                ..QueueConfig::default()
            },
            logging: LoggingConfig::default(),
        }
    }

    fn charge_point(config: &AppConfig) -> (ChargePoint, Arc<WebSocketTransport>) {
        let transport = Arc::new(WebSocketTransport::new());
        let queue = Arc::new(MessageQueue::builder(transport.clone(), config.queue.clone()).start());
        (ChargePoint::new(config, queue, transport.clone()), transport)
    }

    #[tokio::test]
    async fn test_submissions_follow_configured_classification() {
        let config = app_config(&["BootNotification"]);
        let (charge_point, _) = charge_point(&config);

        charge_point.boot();

        let lengths = charge_point.queue.queue_lengths();
        assert_eq!(lengths.transaction, 1);
        assert_eq!(lengths.normal, 0);
    }

    #[tokio::test]
    async fn test_default_classification_is_normal() {
        let config = app_config(&["StartTransaction"]);
        let (charge_point, _) = charge_point(&config);

        let call = Call::new("1", "Heartbeat", json!({}));
        assert_eq!(charge_point.classify(&call), Classification::Normal);
        let call = Call::new("2", "StartTransaction", json!({}));
        assert_eq!(charge_point.classify(&call), Classification::Transaction);
    }

    #[tokio::test]
    async fn test_inbound_call_is_answered_not_implemented() {
        let config = app_config(&[]);
        let (charge_point, transport) = charge_point(&config);
        let (tx, mut rx) = mpsc::channel(OUTBOUND_BUFFER);
        transport.attach(tx);

        charge_point.handle_frame(r#"[2,"cs-9","UnlockConnector",{"connectorId":1}]"#);

        let frame = Envelope::parse(&rx.try_recv().unwrap()).unwrap();
        match frame {
            Envelope::CallError(error) => {
                assert_eq!(error.unique_id, "cs-9");
                assert_eq!(error.error_code, "NotImplemented");
            }
            other => panic!("expected a CallError, got {other:?}"),
        }
    }
}
