//! Transport seam between the session and the wire.
//!
//! The session only sees channels of raw frame text: one sender for outbound
//! frames and one receiver of [`TransportEvent`]s. The production
//! implementation pumps those channels over a single long-lived WebSocket;
//! tests substitute channel-backed doubles.

use crate::error::{CoreError, CoreResult};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug)]
pub enum TransportEvent {
    /// One raw delimited frame.
    Frame(String),
    /// The connection is gone, with the close reason when one was given.
    Closed(Option<String>),
}

pub struct TransportChannels {
    pub outbound: UnboundedSender<String>,
    pub inbound: UnboundedReceiver<TransportEvent>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the connection and hand back its frame channels.
    async fn open(&self) -> CoreResult<TransportChannels>;
}

/// WebSocket transport over `tokio-tungstenite`.
pub struct WsTransport {
    endpoint: String,
}

impl WsTransport {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self) -> CoreResult<TransportChannels> {
        let (stream, _) = connect_async(&self.endpoint)
            .await
            .map_err(CoreError::from)?;
        tracing::info!(endpoint = %self.endpoint, "websocket connected");

        let (mut sink, mut source) = stream.split();
        let (outbound_tx, mut outbound_rx) = unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = unbounded_channel::<TransportEvent>();

        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(frame.into())).await {
                    tracing::warn!(error = %e, "websocket send failed");
                    break;
                }
            }
        });

        tokio::spawn(async move {
            loop {
                match source.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if inbound_tx
                            .send(TransportEvent::Frame(text.to_string()))
                            .is_err()
                        {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(close))) => {
                        let reason = close.map(|c| c.reason.to_string());
                        let _ = inbound_tx.send(TransportEvent::Closed(reason));
                        break;
                    }
                    // Binary, ping and pong are not part of the bus protocol.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        let _ = inbound_tx.send(TransportEvent::Closed(Some(e.to_string())));
                        break;
                    }
                    None => {
                        let _ = inbound_tx.send(TransportEvent::Closed(None));
                        break;
                    }
                }
            }
        });

        Ok(TransportChannels {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}
