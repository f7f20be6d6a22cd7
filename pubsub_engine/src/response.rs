//! JSON response model.
//!
//! One [`Response`] per frame. `to_json` renders the exact wire document;
//! absent keys are simply not emitted. Row data is an array of
//! `{column: value}` objects in column order.

use std::sync::Arc;

use serde_json::{json, Map, Value};

/// A server response or pubsub event, one per wire frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Response {
    /// Plain success (KEY, TAG).
    Ok,
    /// Any parse, semantic, or protocol error.
    Error { msg: String },
    /// Synchronous INSERT result.
    Inserted { id: usize },
    /// One batch of a SELECT result. `fromrow`/`torow` are 1-based row
    /// numbers within the whole result; the final batch has `torow == rows`.
    Select {
        rows: usize,
        fromrow: usize,
        torow: usize,
        columns: Arc<Vec<String>>,
        data: Vec<Vec<String>>,
    },
    /// Synchronous UPDATE result.
    Updated { rows: usize },
    /// Synchronous DELETE result.
    Deleted { rows: usize },
    /// Synchronous SUBSCRIBE result.
    Subscribed { pubsubid: u64 },
    /// Synchronous UNSUBSCRIBE result.
    Unsubscribed { subscriptions: usize },
    /// Initial-load or newly-matching row pushed to one subscription.
    EventAdd {
        pubsubid: u64,
        columns: Arc<Vec<String>>,
        row: Vec<String>,
    },
    /// Live INSERT pushed to one subscription.
    EventInsert {
        pubsubid: u64,
        columns: Arc<Vec<String>>,
        row: Vec<String>,
    },
    /// Row still matching after an UPDATE.
    EventUpdate {
        pubsubid: u64,
        columns: Arc<Vec<String>>,
        row: Vec<String>,
    },
    /// Row deleted or no longer matching.
    EventRemove { pubsubid: u64, id: usize },
}

/// Builds a `{column: value}` object in column order.
fn row_object(columns: &[String], values: &[String]) -> Value {
    let mut object = Map::with_capacity(columns.len());
    for (i, column) in columns.iter().enumerate() {
        let value = values.get(i).cloned().unwrap_or_default();
        object.insert(column.clone(), Value::String(value));
    }
    Value::Object(object)
}

impl Response {
    /// Shorthand for an error response.
    pub fn error(msg: impl Into<String>) -> Self {
        Response::Error { msg: msg.into() }
    }

    /// Returns true for error responses.
    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error { .. })
    }

    /// Renders the wire JSON document.
    pub fn to_json(&self) -> Value {
        match self {
            Response::Ok => json!({"status": "ok"}),
            Response::Error { msg } => json!({"status": "err", "msg": msg}),
            Response::Inserted { id } => {
                json!({"status": "ok", "action": "insert", "id": id.to_string()})
            },
            Response::Select {
                rows,
                fromrow,
                torow,
                columns,
                data,
            } => json!({
                "status": "ok",
                "action": "select",
                "rows": rows,
                "fromrow": fromrow,
                "torow": torow,
                "data": data
                    .iter()
                    .map(|values| row_object(columns, values))
                    .collect::<Vec<_>>(),
            }),
            Response::Updated { rows } => {
                json!({"status": "ok", "action": "update", "rows": rows})
            },
            Response::Deleted { rows } => {
                json!({"status": "ok", "action": "delete", "rows": rows})
            },
            Response::Subscribed { pubsubid } => json!({
                "status": "ok",
                "action": "subscribe",
                "pubsubid": pubsubid.to_string(),
            }),
            Response::Unsubscribed { subscriptions } => json!({
                "status": "ok",
                "action": "unsubscribe",
                "subscriptions": subscriptions,
            }),
            Response::EventAdd {
                pubsubid,
                columns,
                row,
            } => json!({
                "status": "ok",
                "action": "add",
                "pubsubid": pubsubid.to_string(),
                "rows": 1,
                "data": [row_object(columns, row)],
            }),
            Response::EventInsert {
                pubsubid,
                columns,
                row,
            } => json!({
                "status": "ok",
                "action": "insert",
                "pubsubid": pubsubid.to_string(),
                "rows": 1,
                "data": [row_object(columns, row)],
            }),
            Response::EventUpdate {
                pubsubid,
                columns,
                row,
            } => json!({
                "status": "ok",
                "action": "update",
                "pubsubid": pubsubid.to_string(),
                "data": [row_object(columns, row)],
            }),
            Response::EventRemove { pubsubid, id } => json!({
                "status": "ok",
                "action": "remove",
                "pubsubid": pubsubid.to_string(),
                "id": id.to_string(),
            }),
        }
    }
}
