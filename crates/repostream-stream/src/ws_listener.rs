//! `FirehoseWsListener`: `EventSource` over the relay's
//! `com.atproto.sync.subscribeRepos` websocket.
//!
//! # Usage
//! ```no_run
//! use repostream_stream::ws_listener::FirehoseWsListener;
//!
//! let listener = FirehoseWsListener::new("wss://bsky.network", "repostream/0.1")
//!     .expect("valid relay url");
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use futures::{channel::mpsc, SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::USER_AGENT, HeaderValue};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::StreamError;
use crate::frame::{decode_frame, StreamMessage};
use crate::listener::{EventSource, MessageStream};

const SUBSCRIBE_PATH: &str = "xrpc/com.atproto.sync.subscribeRepos";

/// Websocket listener for one relay.
///
/// Reconnection is driven by the `StreamEngine`, which calls `subscribe()`
/// again with the last received sequence number.
pub struct FirehoseWsListener {
    relay: Url,
    user_agent: String,
    channel_capacity: usize,
}

impl FirehoseWsListener {
    /// Validates the relay URL up front so a bad endpoint fails at startup.
    pub fn new(relay_host: &str, user_agent: impl Into<String>) -> Result<Self, StreamError> {
        let relay = Url::parse(relay_host).map_err(|e| StreamError::InvalidEndpoint {
            url: relay_host.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(relay.scheme(), "ws" | "wss") {
            return Err(StreamError::InvalidEndpoint {
                url: relay_host.to_string(),
                reason: format!("unsupported scheme `{}` (expected ws or wss)", relay.scheme()),
            });
        }
        if relay.host_str().is_none() {
            return Err(StreamError::InvalidEndpoint {
                url: relay_host.to_string(),
                reason: "missing host".into(),
            });
        }
        Ok(Self {
            relay,
            user_agent: user_agent.into(),
            channel_capacity: 512,
        })
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Full subscription URL for the given cursor.
    ///
    /// A zero cursor is the same as none: the relay starts at its live head.
    pub fn subscribe_url(&self, cursor: Option<i64>) -> Url {
        let mut url = self.relay.clone();
        let base = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{base}/{SUBSCRIBE_PATH}"));
        url.set_query(None);
        if let Some(cursor) = cursor.filter(|c| *c > 0) {
            url.query_pairs_mut().append_pair("cursor", &cursor.to_string());
        }
        url
    }
}

#[async_trait]
impl EventSource for FirehoseWsListener {
    fn endpoint(&self) -> &str {
        self.relay.as_str()
    }

    async fn subscribe(&self, cursor: Option<i64>) -> Result<MessageStream, StreamError> {
        let url = self.subscribe_url(cursor);
        let connect_err = |reason: String| StreamError::ConnectionFailed {
            url: url.to_string(),
            reason,
        };

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| connect_err(e.to_string()))?;
        let agent = HeaderValue::from_str(&self.user_agent).map_err(|e| connect_err(e.to_string()))?;
        request.headers_mut().insert(USER_AGENT, agent);

        info!(url = %url, "connecting to relay");
        let (ws, _response) = connect_async(request)
            .await
            .map_err(|e| connect_err(e.to_string()))?;
        info!(url = %url, "relay connected");

        let (tx, rx) = mpsc::channel::<Result<StreamMessage, StreamError>>(self.channel_capacity);
        tokio::spawn(read_loop(ws, tx));

        Ok(Box::pin(rx))
    }
}

// ─── Internal websocket loop ──────────────────────────────────────────────────

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn read_loop(
    ws: WsStream,
    mut tx: mpsc::Sender<Result<StreamMessage, StreamError>>,
) {
    let (mut write, mut read) = ws.split();

    while let Some(msg_result) = read.next().await {
        match msg_result {
            Err(e) => {
                warn!(error = %e, "websocket error");
                let _ = tx.send(Err(StreamError::Transport(e.to_string()))).await;
                break;
            }
            Ok(Message::Binary(data)) => {
                let data = Bytes::from(data);
                match decode_frame(&data) {
                    Ok(msg) => {
                        if tx.send(Ok(msg)).await.is_err() {
                            // Engine dropped the stream.
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, len = data.len(), "skipping undecodable frame"),
                }
            }
            Ok(Message::Close(frame)) => {
                info!(?frame, "websocket closed by relay");
                let _ = tx.send(Err(StreamError::Closed)).await;
                break;
            }
            Ok(Message::Ping(data)) => {
                let _ = write.send(Message::Pong(data)).await;
            }
            Ok(Message::Text(text)) => {
                debug!(len = text.len(), "ignoring text message");
            }
            Ok(_) => {}
        }
    }

    let _ = write.close().await;
    info!("relay read loop ended");
}
