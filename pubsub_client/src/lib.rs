//! Async client SDK for PubSubSQL.
//!
//! One [`Client`] owns one TCP connection. [`execute`](Client::execute)
//! sends a command and returns once the matching synchronous response
//! arrives, buffering any pubsub events that arrive in between;
//! [`wait_for_pubsub`](Client::wait_for_pubsub) drains those events. The
//! [`next_record`](Client::next_record) cursor walks a result set and
//! transparently fetches continuation batches.
//!
//! # Example
//!
//! ```ignore
//! use pubsub_client::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = Client::connect("127.0.0.1:7777").await?;
//!     client.execute("insert into stocks (ticker, bid) values (IBM, 12)").await?;
//!     println!("inserted row {}", client.id());
//!     Ok(())
//! }
//! ```

use std::collections::VecDeque;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokio::net::TcpStream;

use pubsub_wire::{Frame, FrameCodec, WireError, PUBSUB_REQUEST_ID};

/// Default maximum frame payload accepted from the server.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Client error type.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The server answered with `status: "err"`.
    #[error("{0}")]
    Server(String),

    /// The response stream violated the request id protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// No connection is open.
    #[error("not connected")]
    NotConnected,

    /// Wire framing error.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// Response decoding error.
    #[error("invalid response: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// One decoded JSON response document.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ResponseData {
    pub status: String,
    pub msg: String,
    pub action: String,
    pub id: String,
    pub pubsubid: String,
    pub rows: usize,
    pub fromrow: usize,
    pub torow: usize,
    pub subscriptions: usize,
    pub data: Vec<serde_json::Map<String, serde_json::Value>>,
}

/// Async PubSubSQL client over one TCP connection.
pub struct Client {
    stream: Option<TcpStream>,
    codec: FrameCodec,
    request_id: u32,
    response: ResponseData,
    /// Cursor into the current batch; -1 before the first record.
    record: isize,
    /// Pubsub frames received while waiting for a synchronous response.
    pubsub_backlog: VecDeque<Vec<u8>>,
}

impl Client {
    /// Connects to a server at `host:port`.
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            stream: Some(stream),
            codec: FrameCodec::new(DEFAULT_MAX_MESSAGE_SIZE),
            request_id: 0,
            response: ResponseData::default(),
            record: -1,
            pubsub_backlog: VecDeque::new(),
        })
    }

    /// Writes a best-effort `close` and drops the connection.
    pub async fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            self.request_id += 1;
            let frame = Frame::new(self.request_id, b"close".to_vec());
            let _ = self.codec.write_frame(&mut stream, &frame).await;
        }
        self.reset();
    }

    /// Executes one command, returning once its response arrives.
    ///
    /// Pubsub events arriving first are buffered for
    /// [`wait_for_pubsub`](Self::wait_for_pubsub). An error response
    /// surfaces as [`ClientError::Server`].
    ///
    /// Issuing a command before reading a batched result to completion
    /// makes the server abandon that result; the already-sent batches are
    /// drained here and the violation is reported once, as
    /// [`ClientError::Protocol`], leaving the connection in sync.
    pub async fn execute(&mut self, command: &str) -> Result<()> {
        self.reset();
        self.request_id += 1;

        let frame = Frame::new(self.request_id, command.as_bytes().to_vec());
        let stream = self.stream.as_mut().ok_or(ClientError::NotConnected)?;
        self.codec.write_frame(stream, &frame).await?;

        let mut abandoned = false;
        loop {
            let frame = self.read().await?;
            if frame.request_id == self.request_id {
                if abandoned {
                    // This frame is the server's matching err; the stale
                    // batches before it have all been consumed.
                    return Err(ClientError::Protocol(
                        "previous result was not fully read".to_string(),
                    ));
                }
                return self.unmarshal(&frame.payload);
            } else if frame.request_id == PUBSUB_REQUEST_ID {
                self.pubsub_backlog.push_back(frame.payload);
            } else if frame.request_id < self.request_id {
                // A batch of the result this command abandoned; discard it
                // and keep reading toward our own response.
                abandoned = true;
            } else {
                return Err(ClientError::Protocol("invalid request id".to_string()));
            }
        }
    }

    /// Raw decoded response for the last operation.
    pub fn response(&self) -> &ResponseData {
        &self.response
    }

    /// Action string of the last response.
    pub fn action(&self) -> &str {
        &self.response.action
    }

    /// Row id of the last response, as reported by the server.
    pub fn id(&self) -> &str {
        &self.response.id
    }

    /// Pubsub id of the last response.
    pub fn pubsubid(&self) -> &str {
        &self.response.pubsubid
    }

    /// Number of rows in the whole result set.
    pub fn record_count(&self) -> usize {
        self.response.rows
    }

    /// Advances the cursor to the next record, fetching continuation
    /// batches as needed. Must be called once before the first record.
    pub async fn next_record(&mut self) -> Result<bool> {
        loop {
            // Pubsub events carry data without batch markers; walk the one
            // frame directly.
            if self.response.fromrow == 0 || self.response.torow == 0 {
                if self.response.data.is_empty() {
                    return Ok(false);
                }
                self.record += 1;
                return Ok((self.record as usize) < self.response.data.len());
            }
            self.record += 1;
            if self.record as usize <= self.response.torow - self.response.fromrow {
                return Ok(true);
            }
            if self.response.rows == self.response.torow {
                return Ok(false);
            }

            // Fetch the next batch of the same result.
            loop {
                let frame = self.read().await?;
                if frame.request_id == self.request_id {
                    self.unmarshal(&frame.payload)?;
                    break;
                } else if frame.request_id == PUBSUB_REQUEST_ID {
                    self.pubsub_backlog.push_back(frame.payload);
                } else {
                    return Err(ClientError::Protocol("invalid request id".to_string()));
                }
            }
        }
    }

    /// Current record's value for `column`, or `""` if absent.
    pub fn value(&self, column: &str) -> &str {
        self.current_record()
            .and_then(|record| record.get(column))
            .and_then(|value| value.as_str())
            .unwrap_or("")
    }

    /// Current record's value by column ordinal, or `""` if out of range.
    pub fn value_by_ordinal(&self, ordinal: usize) -> &str {
        self.current_record()
            .and_then(|record| record.values().nth(ordinal))
            .and_then(|value| value.as_str())
            .unwrap_or("")
    }

    /// Column names of the current result, in server order.
    pub fn columns(&self) -> Vec<&str> {
        self.response
            .data
            .first()
            .map(|record| record.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Waits for one pubsub event, buffered or fresh.
    ///
    /// Returns false on timeout. On success the event becomes the current
    /// response, cursor included.
    pub async fn wait_for_pubsub(&mut self, timeout: Duration) -> Result<bool> {
        if let Some(payload) = self.pubsub_backlog.pop_front() {
            self.unmarshal(&payload)?;
            return Ok(true);
        }

        match tokio::time::timeout(timeout, self.read()).await {
            Ok(Ok(frame)) => {
                if frame.request_id != PUBSUB_REQUEST_ID {
                    // A stray synchronous frame here means the caller broke
                    // the execute/read discipline.
                    return Err(ClientError::Protocol(
                        "unexpected response frame".to_string(),
                    ));
                }
                self.unmarshal(&frame.payload)?;
                Ok(true)
            },
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(false),
        }
    }

    fn current_record(&self) -> Option<&serde_json::Map<String, serde_json::Value>> {
        if self.record < 0 {
            return None;
        }
        self.response.data.get(self.record as usize)
    }

    async fn read(&mut self) -> Result<Frame> {
        let codec = self.codec.clone();
        let stream = self.stream.as_mut().ok_or(ClientError::NotConnected)?;
        match codec.read_frame(stream).await? {
            Some(frame) => Ok(frame),
            None => Err(ClientError::Protocol("connection closed".to_string())),
        }
    }

    fn unmarshal(&mut self, payload: &[u8]) -> Result<()> {
        self.response = serde_json::from_slice(payload)?;
        self.record = -1;
        if self.response.status != "ok" {
            let msg = std::mem::take(&mut self.response.msg);
            return Err(ClientError::Server(msg));
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.response = ResponseData::default();
        self.record = -1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client_with_response(value: serde_json::Value) -> Client {
        let mut client = Client {
            stream: None,
            codec: FrameCodec::new(DEFAULT_MAX_MESSAGE_SIZE),
            request_id: 1,
            response: ResponseData::default(),
            record: -1,
            pubsub_backlog: VecDeque::new(),
        };
        client
            .unmarshal(&serde_json::to_vec(&value).unwrap())
            .unwrap();
        client
    }

    #[test]
    fn test_unmarshal_insert_response() {
        let client = client_with_response(json!({
            "status": "ok", "action": "insert", "id": "0"
        }));
        assert_eq!(client.action(), "insert");
        assert_eq!(client.id(), "0");
        assert_eq!(client.record_count(), 0);
    }

    #[test]
    fn test_unmarshal_error_response() {
        let mut client = client_with_response(json!({"status": "ok"}));
        let err = client
            .unmarshal(br#"{"status":"err","msg":"column ticker is not unique"}"#)
            .unwrap_err();
        assert_eq!(err.to_string(), "column ticker is not unique");
    }

    #[test]
    fn test_value_accessors() {
        let mut client = client_with_response(json!({
            "status": "ok", "action": "select",
            "rows": 1, "fromrow": 1, "torow": 1,
            "data": [{"ticker": "IBM", "bid": "12"}],
        }));
        client.record = 0;
        assert_eq!(client.value("ticker"), "IBM");
        assert_eq!(client.value("missing"), "");
        assert_eq!(client.value_by_ordinal(1), "12");
        assert_eq!(client.value_by_ordinal(9), "");
        assert_eq!(client.columns(), vec!["ticker", "bid"]);
    }

    #[test]
    fn test_value_before_first_record() {
        let client = client_with_response(json!({
            "status": "ok", "action": "select",
            "rows": 1, "fromrow": 1, "torow": 1,
            "data": [{"ticker": "IBM"}],
        }));
        // Cursor not positioned yet.
        assert_eq!(client.value("ticker"), "");
    }

    #[tokio::test]
    async fn test_next_record_within_single_batch() {
        let mut client = client_with_response(json!({
            "status": "ok", "action": "select",
            "rows": 2, "fromrow": 1, "torow": 2,
            "data": [{"t": "a"}, {"t": "b"}],
        }));
        assert!(client.next_record().await.unwrap());
        assert_eq!(client.value("t"), "a");
        assert!(client.next_record().await.unwrap());
        assert_eq!(client.value("t"), "b");
        assert!(!client.next_record().await.unwrap());
    }

    #[tokio::test]
    async fn test_next_record_empty_result() {
        let mut client = client_with_response(json!({
            "status": "ok", "action": "select",
            "rows": 0, "fromrow": 0, "torow": 0, "data": [],
        }));
        assert!(!client.next_record().await.unwrap());
    }

    #[tokio::test]
    async fn test_next_record_walks_pubsub_event_data() {
        // Events have rows/data but no fromrow/torow.
        let mut client = client_with_response(json!({
            "status": "ok", "action": "add", "pubsubid": "1",
            "rows": 1, "data": [{"ticker": "IBM"}],
        }));
        assert!(client.next_record().await.unwrap());
        assert_eq!(client.value("ticker"), "IBM");
        assert!(!client.next_record().await.unwrap());
    }

    #[tokio::test]
    async fn test_next_record_update_event_without_rows_key() {
        let mut client = client_with_response(json!({
            "status": "ok", "action": "update", "pubsubid": "1",
            "data": [{"ticker": "IBM", "bid": "13"}],
        }));
        assert!(client.next_record().await.unwrap());
        assert_eq!(client.value("bid"), "13");
    }
}
