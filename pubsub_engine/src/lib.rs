//! In-memory table engine for PubSubSQL.
//!
//! Tables store rows of string values under implicit columns, maintain KEY
//! (unique) and TAG (multi) indexes, and hold the subscriptions that turn
//! row mutations into pubsub events. Each [`Table`] is owned by exactly one
//! actor task; the engine itself is lock-free single-writer code.
//!
//! Event delivery goes through [`EventSender`] handles onto bounded
//! per-connection queues: a synchronous response awaits queue space, a
//! pubsub event never blocks and instead drops the subscription when its
//! queue is full.

pub mod column;
pub mod error;
pub mod record;
pub mod response;
pub mod subscription;
pub mod table;

pub use column::{Column, Columns, IndexKind};
pub use error::{EngineError, Result};
pub use record::Record;
pub use response::Response;
pub use subscription::{
    next_pubsubid, EventPush, EventSender, OutboundMessage, ResponseSender, Subscription,
};
pub use table::{SelectResult, Table};

#[cfg(test)]
mod tests {
    use super::*;
    use pubsub_parser::ColumnValue;

    #[test]
    fn test_public_api() {
        let mut table = Table::new("stocks");
        let id = table
            .insert(&[ColumnValue::new("ticker", "IBM")])
            .unwrap();
        assert_eq!(id, 0);
        assert_eq!(table.select(&None).rows.len(), 1);
    }
}
