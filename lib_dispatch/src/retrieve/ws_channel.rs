//! WebSocket implementation of [`ChannelConnector`] on `tokio-tungstenite`.
//!
//! The socket is split; a writer task drains the outbound queue and a reader
//! task forwards text frames. Whichever side notices the end first reports a
//! `Closed` event; the connection manager ignores any later duplicate.

use futures_util::future::{BoxFuture, FutureExt};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as WsMessage};

use crate::core::transport::{ChannelConnector, ChannelEvent, DuplexChannel};
use crate::error::{DispatchError, DispatchResult};

#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl ChannelConnector for WsConnector {
    fn open<'a>(&'a self, ws_url: &'a str) -> BoxFuture<'a, DispatchResult<DuplexChannel>> {
        async move {
            let (ws_stream, _) = connect_async(ws_url)
                .await
                .map_err(|e| DispatchError::Transport(e.to_string()))?;
            let (mut write, mut read) = ws_stream.split();

            let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
            let (in_tx, in_rx) = mpsc::unbounded_channel::<ChannelEvent>();

            let writer_events = in_tx.clone();
            tokio::spawn(async move {
                while let Some(frame) = out_rx.recv().await {
                    if let Err(e) = write.send(WsMessage::Text(frame.into())).await {
                        let _ = writer_events.send(ChannelEvent::Closed(format!("write failed: {}", e)));
                        return;
                    }
                }
                // Outbound side dropped: the manager is done with this socket.
                let _ = write.close().await;
            });

            tokio::spawn(async move {
                let reason = loop {
                    match read.next().await {
                        Some(Ok(WsMessage::Text(text))) => {
                            if in_tx.send(ChannelEvent::Text(text.as_str().to_string())).is_err() {
                                return;
                            }
                        }
                        Some(Ok(WsMessage::Close(frame))) => {
                            break match frame {
                                Some(f) => format!("closed by peer ({} {})", u16::from(f.code), &*f.reason),
                                None => "closed by peer".to_string(),
                            };
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => break e.to_string(),
                        None => break "stream ended".to_string(),
                    }
                };
                let _ = in_tx.send(ChannelEvent::Closed(reason));
            });

            Ok(DuplexChannel {
                outbound: out_tx,
                inbound: in_rx,
            })
        }
        .boxed()
    }
}
