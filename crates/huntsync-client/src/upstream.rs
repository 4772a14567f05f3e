//! The authoritative event stream transport.
//!
//! The agent only sees [`Upstream`]: a connect call that yields a pair of
//! channels. [`WsUpstream`] backs it with a WebSocket; tests back it with an
//! in-memory fake.
//!
//! ```text
//!   agent ── UpstreamRequest ──▶ ┌───────────┐ ── text frame ──▶ server
//!                                │ pump task │
//!   agent ◀── UpstreamFrame ──── └───────────┘ ◀── text/close ── server
//! ```

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use huntsync_types::{ChangeId, LiveMessage};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace, warn};
use url::Url;

use crate::connection::Failure;
use crate::ports::Activity;

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("invalid stream URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("connect failed: {0}")]
    Connect(String),
}

/// Something received on an open link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamFrame {
    Message(LiveMessage),
    /// The link is finished. No frames follow.
    Closed(Failure),
}

/// Something the agent sends upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum UpstreamRequest {
    Activity { activity: Activity },
}

/// An open connection. Dropping `requests` asks the transport to close it.
#[derive(Debug)]
pub struct UpstreamLink {
    pub frames: mpsc::UnboundedReceiver<UpstreamFrame>,
    pub requests: mpsc::UnboundedSender<UpstreamRequest>,
}

#[async_trait]
pub trait Upstream: Send + Sync + 'static {
    /// Open the stream, asking it to resume after `after` if given.
    ///
    /// Returning `Ok` means the handshake completed.
    async fn connect(&self, after: Option<ChangeId>) -> Result<UpstreamLink, UpstreamError>;
}

// ============================================================================
// WebSocket implementation
// ============================================================================

/// Upstream over a WebSocket carrying `{event, data}` JSON text frames.
#[derive(Debug, Clone)]
pub struct WsUpstream {
    endpoint: Url,
}

impl WsUpstream {
    pub fn new(endpoint: &str) -> Result<Self, UpstreamError> {
        Ok(Self { endpoint: Url::parse(endpoint)? })
    }

    /// The URL a connection resuming after `after` would use.
    pub fn url_for(&self, after: Option<ChangeId>) -> Url {
        let mut url = self.endpoint.clone();
        if let Some(after) = after {
            url.query_pairs_mut().append_pair("after", &after.to_string());
        }
        url
    }
}

#[async_trait]
impl Upstream for WsUpstream {
    async fn connect(&self, after: Option<ChangeId>) -> Result<UpstreamLink, UpstreamError> {
        let url = self.url_for(after);
        debug!(%url, "connecting upstream");
        let (ws, _response) = connect_async(url.as_str()).await?;

        let (frames_tx, frames) = mpsc::unbounded_channel();
        let (requests, requests_rx) = mpsc::unbounded_channel();
        tokio::spawn(pump(ws, requests_rx, frames_tx));
        Ok(UpstreamLink { frames, requests })
    }
}

async fn pump(
    ws: WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    mut requests: mpsc::UnboundedReceiver<UpstreamRequest>,
    frames: mpsc::UnboundedSender<UpstreamFrame>,
) {
    let (mut sink, mut stream) = ws.split();

    let failure = loop {
        tokio::select! {
            req = requests.recv() => {
                let Some(req) = req else {
                    debug!("upstream link dropped by owner, closing");
                    let _ = sink.close().await;
                    return;
                };
                match serde_json::to_string(&req) {
                    Ok(text) => {
                        if let Err(e) = sink.send(Message::Text(text)).await {
                            break Failure::Error(e.to_string());
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to encode upstream request"),
                }
            }
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => match LiveMessage::decode(&text) {
                        Ok(live) => {
                            trace!(event = live.event_name(), "upstream frame");
                            if frames.send(UpstreamFrame::Message(live)).is_err() {
                                let _ = sink.close().await;
                                return;
                            }
                        }
                        Err(e) => warn!(error = %e, "dropping undecodable upstream frame"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        break match frame {
                            Some(f) => Failure::Closed { code: u16::from(f.code), reason: f.reason.into_owned() },
                            None => Failure::Closed { code: 1005, reason: String::new() },
                        };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Failure::Error(e.to_string()),
                    None => break Failure::Error("stream ended".into()),
                }
            }
        }
    };

    let _ = frames.send(UpstreamFrame::Closed(failure));
}

#[cfg(test)]
mod tests {
    use super::*;
    use huntsync_types::PuzzleId;

    #[test]
    fn test_url_for_appends_resume_point() {
        let up = WsUpstream::new("wss://hunt.example.com/rx").unwrap();
        assert_eq!(up.url_for(None).as_str(), "wss://hunt.example.com/rx");
        assert_eq!(up.url_for(Some(ChangeId(42))).as_str(), "wss://hunt.example.com/rx?after=42");
    }

    #[test]
    fn test_invalid_endpoint() {
        assert!(matches!(WsUpstream::new("not a url"), Err(UpstreamError::InvalidUrl(_))));
    }

    #[test]
    fn test_activity_request_wire_shape() {
        let req = UpstreamRequest::Activity { activity: Activity::from([(PuzzleId(7), true)]) };
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            serde_json::json!({ "event": "activity", "activity": { "7": true } })
        );
    }
}
