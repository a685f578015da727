//! # Live Channel WebSocket Client
//!
//! The production `LiveChannel` implementation: a WebSocket connection to the
//! live voice model gateway. The connection is split into a read loop that
//! turns wire frames into `ChannelEvent`s and a write loop that drains the
//! bounded outbound chunk queue.
//!
//! The outbound queue bound comes from `audio.outbound_queue_frames`; the
//! capture pipeline `try_send`s onto it, so a stalled connection drops frames
//! instead of building up latency.

use crate::audio::codec::EncodedChunk;
use crate::config::ChannelConfig as ChannelSettings;
use crate::error::SessionError;
use crate::session::channel::{
    ChannelEvent, ClientMessage, LiveChannel, LiveChannelConfig, ServerMessage,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Compose the connection URL, appending the API key when one is configured.
pub fn channel_url(settings: &ChannelSettings) -> String {
    if settings.api_key.is_empty() {
        settings.url.clone()
    } else {
        let separator = if settings.url.contains('?') { '&' } else { '?' };
        format!("{}{}key={}", settings.url, separator, settings.api_key)
    }
}

/// A connected live channel.
pub struct LiveClient {
    chunk_tx: mpsc::Sender<EncodedChunk>,
    events: Option<mpsc::UnboundedReceiver<ChannelEvent>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl LiveClient {
    /// Open the channel and send the configuration bundle.
    ///
    /// Fails with a connection error if the WebSocket handshake or the setup
    /// message fails; after that, transport failures surface as
    /// `ChannelEvent::TransportError` on the event stream.
    pub async fn connect(
        url: &str,
        config: &LiveChannelConfig,
        outbound_queue: usize,
    ) -> Result<Self, SessionError> {
        let (ws, _response) = connect_async(url)
            .await
            .map_err(|e| SessionError::Connection(format!("channel open failed: {}", e)))?;

        info!(voice = %config.voice, "Live channel connected");

        let (mut write, mut read) = ws.split();

        // The setup bundle must be the first message on the wire
        let setup = serde_json::to_string(&ClientMessage::setup(config))
            .map_err(|e| SessionError::Connection(format!("setup serialization failed: {}", e)))?;
        write
            .send(Message::Text(setup))
            .await
            .map_err(|e| SessionError::Connection(format!("setup send failed: {}", e)))?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (chunk_tx, mut chunk_rx) = mpsc::channel::<EncodedChunk>(outbound_queue.max(1));
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        // Read loop: wire frames -> channel events, in arrival order
        let read_events = events_tx.clone();
        tokio::spawn(async move {
            loop {
                match read.next().await {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ServerMessage>(&text) {
                            Ok(message) => {
                                if read_events.send(ChannelEvent::Message(message)).is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!("Unrecognized channel message ({}): {}", e, text);
                            }
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        warn!("Unexpected binary frame on live channel ({} bytes)", data.len());
                    }
                    Some(Ok(Message::Close(reason))) => {
                        debug!("Live channel closed by remote: {:?}", reason);
                        let _ = read_events.send(ChannelEvent::Closed);
                        break;
                    }
                    Some(Ok(_)) => {
                        // Ping/pong frames are handled by the transport
                    }
                    Some(Err(e)) => {
                        let _ = read_events.send(ChannelEvent::TransportError(e.to_string()));
                        break;
                    }
                    None => {
                        let _ = read_events.send(ChannelEvent::Closed);
                        break;
                    }
                }
            }
        });

        // Write loop: drain the outbound queue until closed or shut down
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe_chunk = chunk_rx.recv() => match maybe_chunk {
                        Some(chunk) => {
                            if let Ok(json) = serde_json::to_string(&ClientMessage::audio(chunk)) {
                                if let Err(e) = write.send(Message::Text(json)).await {
                                    let _ = events_tx
                                        .send(ChannelEvent::TransportError(e.to_string()));
                                    break;
                                }
                            }
                        }
                        None => {
                            // All senders gone; close politely
                            let _ = write.close().await;
                            break;
                        }
                    },
                    _ = &mut shutdown_rx => {
                        // Tolerates the remote already being gone
                        let _ = write.close().await;
                        debug!("Live channel writer shut down");
                        break;
                    }
                }
            }
        });

        Ok(Self {
            chunk_tx,
            events: Some(events_rx),
            shutdown: Some(shutdown_tx),
        })
    }
}

impl LiveChannel for LiveClient {
    fn sender(&self) -> mpsc::Sender<EncodedChunk> {
        self.chunk_tx.clone()
    }

    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<ChannelEvent>> {
        self.events.take()
    }

    fn close(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

impl Drop for LiveClient {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_url_without_key() {
        let settings = ChannelSettings {
            url: "ws://127.0.0.1:9090/v1/live".to_string(),
            api_key: String::new(),
        };
        assert_eq!(channel_url(&settings), "ws://127.0.0.1:9090/v1/live");
    }

    #[test]
    fn test_channel_url_appends_key() {
        let settings = ChannelSettings {
            url: "wss://gateway.example/v1/live".to_string(),
            api_key: "secret".to_string(),
        };
        assert_eq!(
            channel_url(&settings),
            "wss://gateway.example/v1/live?key=secret"
        );

        let settings = ChannelSettings {
            url: "wss://gateway.example/v1/live?region=eu".to_string(),
            api_key: "secret".to_string(),
        };
        assert_eq!(
            channel_url(&settings),
            "wss://gateway.example/v1/live?region=eu&key=secret"
        );
    }
}
