//! NATS-backed [`Connector`].
//!
//! Named events map onto subjects under a configurable prefix:
//!
//! - inbound events arrive on `{prefix}.events.{event}`, for example
//!   `netsync.events.network:update`; the connector subscribes to
//!   `{prefix}.events.>` and takes the event name from the subject suffix.
//! - outbound requests are published on `{prefix}.requests.{event}`.
//!
//! `async-nats` reconnects on its own, which would hide outages from the
//! connection manager. The connector ends the session on the first
//! disconnect event instead, so retry and fallback stay in one place.

use async_nats::Event;
use futures::StreamExt as _;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::TransportConfig;
use crate::transport::{Connector, InboundFrame, OutboundFrame, TransportError, TransportSession};

/// Opens sessions against a NATS server.
#[derive(Debug, Clone)]
pub struct NatsConnector {
    subject_prefix: String,
}

impl NatsConnector {
    /// Create a connector using `subject_prefix` as the subject namespace.
    pub fn new(subject_prefix: impl Into<String>) -> Self {
        Self {
            subject_prefix: subject_prefix.into(),
        }
    }

    /// Create a connector from transport configuration.
    pub fn from_config(config: &TransportConfig) -> Self {
        Self::new(config.subject_prefix.clone())
    }

    /// Wildcard subject carrying every inbound event.
    pub fn events_subject(&self) -> String {
        format!("{}.events.>", self.subject_prefix)
    }

    /// Subject a request with the given event name is published on.
    pub fn request_subject(&self, event: &str) -> String {
        format!("{}.requests.{event}", self.subject_prefix)
    }

    /// Event name carried by an inbound subject, if it is under the prefix.
    pub fn event_name<'a>(&self, subject: &'a str) -> Option<&'a str> {
        subject
            .strip_prefix(self.subject_prefix.as_str())
            .and_then(|rest| rest.strip_prefix(".events."))
            .filter(|name| !name.is_empty())
    }
}

impl Connector for NatsConnector {
    fn connect(
        &self,
        address: &str,
    ) -> impl Future<Output = Result<TransportSession, TransportError>> + Send {
        let connector = self.clone();
        let address = address.to_owned();
        async move {
            info!(url = %address, "connecting to NATS server");
            let (lost_tx, mut lost_rx) = mpsc::unbounded_channel::<()>();
            let client = async_nats::ConnectOptions::new()
                .event_callback(move |event| {
                    let lost_tx = lost_tx.clone();
                    async move {
                        match event {
                            Event::Disconnected => {
                                let _ = lost_tx.send(());
                            }
                            other => debug!(event = ?other, "NATS client event"),
                        }
                    }
                })
                .connect(address.as_str())
                .await
                .map_err(|e| TransportError::Connect {
                    address: address.clone(),
                    message: e.to_string(),
                })?;

            let subject = connector.events_subject();
            let mut subscriber =
                client
                    .subscribe(subject.clone())
                    .await
                    .map_err(|e| TransportError::Subscribe {
                        subject: subject.clone(),
                        message: e.to_string(),
                    })?;
            info!(subject = %subject, "NATS session established");

            let (session, mut remote) = TransportSession::pair();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        message = subscriber.next() => {
                            let Some(message) = message else {
                                debug!("NATS subscription ended");
                                break;
                            };
                            let Some(event) = connector.event_name(message.subject.as_str()) else {
                                warn!(subject = %message.subject, "ignoring message outside the events namespace");
                                continue;
                            };
                            let frame = InboundFrame {
                                event: event.to_owned(),
                                payload: message.payload.to_vec(),
                            };
                            if remote.inbound.send(frame).is_err() {
                                break;
                            }
                        }
                        request = remote.outbound.recv() => {
                            let Some(OutboundFrame { event, payload }) = request else {
                                debug!("NATS session released by client");
                                break;
                            };
                            let subject = connector.request_subject(&event);
                            if let Err(e) = client.publish(subject.clone(), payload.into()).await {
                                warn!(subject = %subject, error = %e, "failed to publish request");
                            }
                        }
                        _ = lost_rx.recv() => {
                            warn!("NATS connection lost");
                            break;
                        }
                    }
                }
                // Dropping `remote` closes the session for the manager.
            });
            Ok(session)
        }
    }
}
