//! Indexer event stream.
//!
//! TzKT pushes blocks and operations over a SignalR hub speaking the JSON
//! protocol: records are JSON objects terminated by `0x1e`. Each pushed
//! message carries a `type` (0 state, 1 data, 2 reorg), the `state` level
//! and, for data messages, the items.

use std::collections::VecDeque;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use tzmempool_core::{ConfirmedOperation, MessageType, OperationKind};

use crate::decode::Fields;
use crate::error::{Result, SyncError};
use crate::indexer::{decode_block, decode_confirmed, BlockRef};

/// SignalR record separator.
const RECORD_SEPARATOR: char = '\u{1e}';

/// SignalR invocation record.
const INVOCATION: u64 = 1;
/// SignalR keep-alive record.
const PING: u64 = 6;
/// SignalR close record.
const CLOSE: u64 = 7;

/// Interval between client pings; the hub drops clients silent for 30s.
const KEEP_ALIVE: Duration = Duration::from_secs(15);

/// One pushed message with its decoded items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMessage<T> {
    pub message_type: MessageType,
    /// Level the message refers to
    pub state: u64,
    pub data: Vec<T>,
}

/// A message from one of the subscribed channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    Blocks(StreamMessage<BlockRef>),
    Operations(StreamMessage<ConfirmedOperation>),
}

impl ChainEvent {
    /// Type of the underlying message.
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Blocks(m) => m.message_type,
            Self::Operations(m) => m.message_type,
        }
    }

    /// Level the message refers to.
    pub fn state(&self) -> u64 {
        match self {
            Self::Blocks(m) => m.state,
            Self::Operations(m) => m.state,
        }
    }
}

fn decode_message_type(message: &Fields<'_>) -> Result<MessageType> {
    match message.u64("type")? {
        0 => Ok(MessageType::State),
        1 => Ok(MessageType::Data),
        2 => Ok(MessageType::Reorg),
        other => Err(SyncError::Malformed(format!("unknown message type {other}"))),
    }
}

fn decode_stream_message<T>(
    value: &Value,
    what: &'static str,
    decode: impl Fn(&Value) -> Result<T>,
) -> Result<StreamMessage<T>> {
    let message = Fields::of(value, "stream message")?;
    let message_type = decode_message_type(&message)?;
    let state = message.u64("state")?;

    let mut data = Vec::new();
    if message_type == MessageType::Data {
        for item in message.array("data")? {
            match decode(item) {
                Ok(item) => data.push(item),
                Err(e) => warn!("Skipping malformed {} at level {}: {}", what, state, e),
            }
        }
    }

    Ok(StreamMessage {
        message_type,
        state,
        data,
    })
}

/// Decode the argument of a hub invocation targeting `channel`.
///
/// Returns `None` for channels the tracker does not subscribe to.
pub fn decode_event(channel: &str, value: &Value) -> Result<Option<ChainEvent>> {
    match channel {
        "blocks" => Ok(Some(ChainEvent::Blocks(decode_stream_message(
            value,
            "block",
            decode_block,
        )?))),
        "operations" => Ok(Some(ChainEvent::Operations(decode_stream_message(
            value,
            "operation",
            |item| decode_confirmed(item, None),
        )?))),
        _ => Ok(None),
    }
}

/// Decode every record of a text frame.
///
/// A malformed record yields an error for that record only.
pub fn decode_frame(text: &str) -> Vec<Result<ChainEvent>> {
    let mut events = Vec::new();
    for record in text.split(RECORD_SEPARATOR).filter(|r| !r.trim().is_empty()) {
        let value: Value = match serde_json::from_str(record) {
            Ok(value) => value,
            Err(e) => {
                events.push(Err(SyncError::Malformed(format!("hub record: {e}"))));
                continue;
            }
        };

        let decoded = Fields::of(&value, "hub record").and_then(|fields| {
            match fields.get("type").and_then(Value::as_u64) {
                Some(INVOCATION) => {
                    let target = fields.str("target")?;
                    let Some(argument) = fields.array("arguments")?.first() else {
                        return Ok(None);
                    };
                    decode_event(target, argument)
                }
                Some(CLOSE) => Err(SyncError::Transport {
                    url: "event stream".to_string(),
                    reason: format!(
                        "closed by server: {}",
                        fields.opt_str("error").ok().flatten().unwrap_or("no reason")
                    ),
                }),
                Some(PING) => Ok(None),
                // Handshake acks and invocation completions.
                _ => Ok(None),
            }
        });

        match decoded {
            Ok(Some(event)) => events.push(Ok(event)),
            Ok(None) => {}
            Err(e) => events.push(Err(e)),
        }
    }
    events
}

fn record(value: &Value) -> String {
    let mut text = value.to_string();
    text.push(RECORD_SEPARATOR);
    text
}

fn ping() -> String {
    record(&json!({ "type": PING }))
}

/// Turn an `http(s)` URL into its `ws(s)` counterpart.
pub fn websocket_url(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        url.to_string()
    }
}

/// Live subscription to the indexer hub.
pub struct EventStream {
    url: String,
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    pending: VecDeque<ChainEvent>,
    idle_timeout: Duration,
    last_received: Instant,
    last_sent: Instant,
}

impl EventStream {
    /// Connect, perform the handshake and subscribe to blocks and to
    /// operations of the given kinds.
    pub async fn connect(url: &str, kinds: &[OperationKind], idle_timeout: Duration) -> Result<Self> {
        let url = websocket_url(url);
        let transport = |reason: String| SyncError::Transport {
            url: url.clone(),
            reason,
        };

        let (mut socket, _) = tokio::time::timeout(idle_timeout, tokio_tungstenite::connect_async(url.as_str()))
            .await
            .map_err(|_| SyncError::Timeout {
                url: url.clone(),
                attempts: 1,
            })?
            .map_err(|e| transport(e.to_string()))?;

        let types: Vec<&str> = kinds.iter().map(|k| k.indexer_type()).collect();
        let setup = [
            record(&json!({"protocol": "json", "version": 1})),
            record(&json!({"type": INVOCATION, "target": "SubscribeToBlocks", "arguments": []})),
            record(&json!({
                "type": INVOCATION,
                "target": "SubscribeToOperations",
                "arguments": [{"types": types.join(",")}]
            })),
        ];
        for frame in setup {
            socket
                .send(Message::Text(frame))
                .await
                .map_err(|e| transport(e.to_string()))?;
        }

        info!("Subscribed to {} ({} operation types)", url, types.len());
        let now = Instant::now();
        Ok(Self {
            url,
            socket,
            pending: VecDeque::new(),
            idle_timeout,
            last_received: now,
            last_sent: now,
        })
    }

    /// Endpoint.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Next event; `None` once the server closed the stream.
    ///
    /// Malformed records are logged and skipped. Pings the hub while
    /// waiting and fails with `Timeout` when nothing arrives for the idle
    /// timeout.
    pub async fn next_event(&mut self) -> Result<Option<ChainEvent>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }

            if self.last_sent.elapsed() >= KEEP_ALIVE {
                self.socket
                    .send(Message::Text(ping()))
                    .await
                    .map_err(|e| SyncError::Transport {
                        url: self.url.clone(),
                        reason: e.to_string(),
                    })?;
                self.last_sent = Instant::now();
            }

            let idle_left = self.idle_timeout.saturating_sub(self.last_received.elapsed());
            if idle_left.is_zero() {
                return Err(SyncError::Timeout {
                    url: self.url.clone(),
                    attempts: 1,
                });
            }
            let wait = idle_left.min(KEEP_ALIVE.saturating_sub(self.last_sent.elapsed()));
            let Ok(frame) = tokio::time::timeout(wait, self.socket.next()).await else {
                continue;
            };
            self.last_received = Instant::now();

            let text = match frame {
                None | Some(Ok(Message::Close(_))) => return Ok(None),
                Some(Err(e)) => {
                    return Err(SyncError::Transport {
                        url: self.url.clone(),
                        reason: e.to_string(),
                    })
                }
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Binary(bytes))) => String::from_utf8_lossy(&bytes).into_owned(),
                Some(Ok(_)) => continue,
            };

            for event in decode_frame(&text) {
                match event {
                    Ok(event) => self.pending.push_back(event),
                    Err(e @ SyncError::Transport { .. }) => return Err(e),
                    Err(e) => warn!("Skipping hub record from {}: {}", self.url, e),
                }
            }
            if self.pending.is_empty() {
                debug!("Keep-alive from {}", self.url);
            }
        }
    }

    /// Close the socket.
    pub async fn close(mut self) {
        if let Err(e) = self.socket.close(None).await {
            debug!("Closing {}: {}", self.url, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_websocket_url() {
        assert_eq!(websocket_url("https://api.tzkt.io/v1/ws"), "wss://api.tzkt.io/v1/ws");
        assert_eq!(websocket_url("http://localhost:5000/v1/ws"), "ws://localhost:5000/v1/ws");
    }

    #[test]
    fn test_frame_with_several_records() {
        let blocks = json!({"type": 1, "target": "blocks", "arguments": [
            {"type": 1, "state": 12, "data": [{"hash": "BL12", "level": 12}, {"level": 13}]}
        ]});
        let reorg = json!({"type": 1, "target": "operations", "arguments": [{"type": 2, "state": 11}]});
        let text = format!("{}{}{}", record(&json!({})), record(&blocks), record(&reorg)) + &ping();

        let events: Vec<_> = decode_frame(&text).into_iter().map(|e| e.unwrap()).collect();
        assert_eq!(events.len(), 2);

        match &events[0] {
            ChainEvent::Blocks(m) => {
                assert_eq!(m.message_type, MessageType::Data);
                assert_eq!(m.data, vec![BlockRef { hash: "BL12".into(), level: 12 }]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(events[1].message_type(), MessageType::Reorg);
        assert_eq!(events[1].state(), 11);
    }

    #[test]
    fn test_state_message_without_data() {
        let value = json!({"type": 0, "state": 77});
        let event = decode_event("operations", &value).unwrap().unwrap();
        assert_eq!(event.message_type(), MessageType::State);
        assert!(decode_event("accounts", &value).unwrap().is_none());
    }

    #[test]
    fn test_bad_message_fields() {
        assert!(matches!(
            decode_event("blocks", &json!({"type": 1})),
            Err(SyncError::MissingField { field: "state", .. })
        ));
        assert!(matches!(
            decode_event("blocks", &json!({"type": 9, "state": 1})),
            Err(SyncError::Malformed(_))
        ));
        let results = decode_frame("not json\u{1e}");
        assert!(matches!(results.as_slice(), [Err(SyncError::Malformed(_))]));
    }

    #[test]
    fn test_close_record() {
        let results = decode_frame(&record(&json!({"type": 7, "error": "bye"})));
        assert!(matches!(results.as_slice(), [Err(SyncError::Transport { .. })]));
    }
}
