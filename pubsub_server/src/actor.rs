// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-table actor tasks.
//!
//! Each table runs as an independent single-writer task consuming a bounded
//! channel of requests. The actor is authoritative for all mutable state of
//! its table; responses and pubsub events are produced inside the actor and
//! handed to the senders, so causal order per table is free.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::shutdown::StopCoordinator;
use pubsub_engine::{EngineError, Response, ResponseSender, SelectResult, Table};
use pubsub_parser::{Request, UnsubscribeTarget};

/// A message consumed by a table actor.
pub(crate) enum TableMessage {
    /// A client request with its response sender.
    Request {
        request: Request,
        sender: ResponseSender,
    },
    /// Internal unsubscribe-by-pubsubid fan-out; the removed count goes back
    /// to the aggregation task instead of straight to the client.
    UnsubscribeId {
        pubsubid: u64,
        reply: mpsc::Sender<usize>,
    },
}

/// Producer handle to one table actor.
#[derive(Clone)]
pub(crate) struct TableHandle {
    tx: mpsc::Sender<TableMessage>,
}

impl TableHandle {
    /// Forwards a message, blocking cooperatively until the table accepts
    /// it or the stop signal fires.
    pub(crate) async fn forward(&self, message: TableMessage, stop: &StopCoordinator) {
        let mut stop_rx = stop.subscribe();
        tokio::select! {
            result = self.tx.send(message) => {
                if result.is_err() {
                    warn!("table channel closed while forwarding request");
                }
            }
            _ = stop_rx.changed() => {}
        }
    }
}

/// Spawns the actor for one table and returns its handle.
pub(crate) fn spawn_table(
    name: &str,
    buffer_size: usize,
    select_batch_size: usize,
    stop: Arc<StopCoordinator>,
) -> TableHandle {
    let (tx, rx) = mpsc::channel(buffer_size);
    let name = name.to_string();
    tokio::spawn(run_table(name, rx, select_batch_size, stop));
    TableHandle { tx }
}

async fn run_table(
    name: String,
    mut rx: mpsc::Receiver<TableMessage>,
    select_batch_size: usize,
    stop: Arc<StopCoordinator>,
) {
    stop.worker_started();
    let mut table = Table::new(&name);
    let mut stop_rx = stop.subscribe();

    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            message = rx.recv() => match message {
                Some(message) => handle_message(&mut table, message, select_batch_size).await,
                None => break,
            }
        }
    }

    debug!(table = %name, "table actor stopped");
    stop.worker_finished();
}

async fn handle_message(table: &mut Table, message: TableMessage, select_batch_size: usize) {
    match message {
        TableMessage::Request { request, sender } => {
            handle_request(table, request, sender, select_batch_size).await;
        },
        TableMessage::UnsubscribeId { pubsubid, reply } => {
            let removed = table.unsubscribe_id(pubsubid);
            let _ = reply.send(removed).await;
        },
    }
}

async fn handle_request(
    table: &mut Table,
    request: Request,
    sender: ResponseSender,
    select_batch_size: usize,
) {
    match request {
        Request::Insert { column_values, .. } => {
            let response = match table.insert(&column_values) {
                Ok(id) => Response::Inserted { id },
                Err(e) => Response::error(e.to_string()),
            };
            sender.send(response).await;
        },
        Request::Select { filter, .. } => {
            let result = table.select(&filter);
            send_select_batches(result, &sender, select_batch_size).await;
        },
        Request::Update {
            column_values,
            filter,
            ..
        } => {
            let response = match table.update(&column_values, &filter) {
                Ok(rows) => Response::Updated { rows },
                Err(e) => Response::error(e.to_string()),
            };
            sender.send(response).await;
        },
        Request::Delete { filter, .. } => {
            let rows = table.delete(&filter);
            sender.send(Response::Deleted { rows }).await;
        },
        Request::Subscribe { filter, .. } => {
            let pubsubid = table.subscribe(filter, sender.event_sender());
            if sender.send(Response::Subscribed { pubsubid }).await {
                // Initial load runs to completion before the next request,
                // so the subscriber sees (initial add)* (live event)*.
                table.publish_initial(pubsubid);
            } else {
                table.unsubscribe_id(pubsubid);
            }
        },
        Request::Unsubscribe { target } => {
            // Dead connections must not count toward the removed total.
            table.prune_closed();
            let removed = match target {
                UnsubscribeTarget::Table { filter, .. } => table.unsubscribe_filter(&filter),
                // By-id requests normally arrive as UnsubscribeId fan-out;
                // answer directly if one is routed here anyway.
                UnsubscribeTarget::PubSubId(pubsubid) => table.unsubscribe_id(pubsubid),
            };
            let response = if removed == 0 {
                Response::error(EngineError::SubscriptionNotFound.to_string())
            } else {
                Response::Unsubscribed {
                    subscriptions: removed,
                }
            };
            sender.send(response).await;
        },
        Request::Key { column, .. } => {
            let response = match table.key(&column) {
                Ok(()) => Response::Ok,
                Err(e) => Response::error(e.to_string()),
            };
            sender.send(response).await;
        },
        Request::Tag { column, .. } => {
            let response = match table.tag(&column) {
                Ok(()) => Response::Ok,
                Err(e) => Response::error(e.to_string()),
            };
            sender.send(response).await;
        },
    }
}

/// Emits a SELECT result as one or more frames of at most
/// `select_batch_size` rows each; `fromrow`/`torow` are 1-based and the
/// final frame has `torow == rows`.
async fn send_select_batches(
    result: SelectResult,
    sender: &ResponseSender,
    select_batch_size: usize,
) {
    let rows_total = result.rows.len();
    if rows_total == 0 {
        sender
            .send(Response::Select {
                rows: 0,
                fromrow: 0,
                torow: 0,
                columns: result.columns,
                data: Vec::new(),
            })
            .await;
        return;
    }

    let mut fromrow = 1;
    for chunk in result.rows.chunks(select_batch_size) {
        let torow = fromrow + chunk.len() - 1;
        let sent = sender
            .send(Response::Select {
                rows: rows_total,
                fromrow,
                torow,
                columns: Arc::clone(&result.columns),
                data: chunk.to_vec(),
            })
            .await;
        if !sent {
            return;
        }
        fromrow = torow + 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pubsub_engine::OutboundMessage;
    use pubsub_parser::parse;
    use std::time::Duration;

    fn request(source: &str) -> Request {
        parse(source).unwrap()
    }

    async fn recv(rx: &mut mpsc::Receiver<OutboundMessage>) -> Response {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for response")
            .expect("channel closed")
            .response
    }

    struct Fixture {
        handle: TableHandle,
        stop: Arc<StopCoordinator>,
        out_tx: mpsc::Sender<OutboundMessage>,
        out_rx: mpsc::Receiver<OutboundMessage>,
    }

    fn fixture(select_batch_size: usize) -> Fixture {
        let stop = Arc::new(StopCoordinator::new(Duration::from_secs(1)));
        let handle = spawn_table("stocks", 64, select_batch_size, Arc::clone(&stop));
        let (out_tx, out_rx) = mpsc::channel(64);
        Fixture {
            handle,
            stop,
            out_tx,
            out_rx,
        }
    }

    impl Fixture {
        async fn execute(&self, request_id: u32, source: &str) {
            let sender = ResponseSender::new(request_id, self.out_tx.clone());
            self.handle
                .forward(
                    TableMessage::Request {
                        request: request(source),
                        sender,
                    },
                    &self.stop,
                )
                .await;
        }
    }

    #[tokio::test]
    async fn test_insert_then_select() {
        let mut f = fixture(1000);
        f.execute(1, "insert into stocks (ticker, bid) values (IBM, 12)")
            .await;
        assert_eq!(recv(&mut f.out_rx).await, Response::Inserted { id: 0 });

        f.execute(2, "select * from stocks").await;
        match recv(&mut f.out_rx).await {
            Response::Select { rows, data, .. } => {
                assert_eq!(rows, 1);
                assert_eq!(data[0], vec!["IBM".to_string(), "12".to_string()]);
            },
            other => panic!("expected select response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_select_batching() {
        let mut f = fixture(2);
        for i in 0..5 {
            f.execute(1, &format!("insert into stocks (n) values ({})", i))
                .await;
            recv(&mut f.out_rx).await;
        }

        f.execute(2, "select * from stocks").await;
        let mut seen = Vec::new();
        loop {
            match recv(&mut f.out_rx).await {
                Response::Select {
                    rows,
                    fromrow,
                    torow,
                    data,
                    ..
                } => {
                    assert_eq!(rows, 5);
                    assert_eq!(data.len(), torow - fromrow + 1);
                    seen.push((fromrow, torow));
                    if torow == rows {
                        break;
                    }
                },
                other => panic!("expected select batch, got {:?}", other),
            }
        }
        assert_eq!(seen, vec![(1, 2), (3, 4), (5, 5)]);
    }

    #[tokio::test]
    async fn test_select_empty_result() {
        let mut f = fixture(1000);
        f.execute(1, "select * from stocks").await;
        match recv(&mut f.out_rx).await {
            Response::Select {
                rows,
                fromrow,
                torow,
                ..
            } => {
                assert_eq!((rows, fromrow, torow), (0, 0, 0));
            },
            other => panic!("expected select response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_key_violation_reported() {
        let mut f = fixture(1000);
        f.execute(1, "insert into stocks (ticker) values (IBM)").await;
        recv(&mut f.out_rx).await;
        f.execute(2, "key stocks ticker").await;
        assert_eq!(recv(&mut f.out_rx).await, Response::Ok);

        f.execute(3, "insert into stocks (ticker) values (IBM)").await;
        assert_eq!(
            recv(&mut f.out_rx).await,
            Response::error("column ticker is not unique")
        );
    }

    #[tokio::test]
    async fn test_subscribe_response_precedes_initial_load() {
        let mut f = fixture(1000);
        f.execute(1, "insert into stocks (ticker) values (IBM)").await;
        recv(&mut f.out_rx).await;

        f.execute(2, "subscribe * from stocks where ticker = IBM")
            .await;
        assert!(matches!(
            recv(&mut f.out_rx).await,
            Response::Subscribed { .. }
        ));
        assert!(matches!(recv(&mut f.out_rx).await, Response::EventAdd { .. }));
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_is_error() {
        let mut f = fixture(1000);
        f.execute(1, "unsubscribe from stocks").await;
        assert_eq!(
            recv(&mut f.out_rx).await,
            Response::error("subscription not found")
        );
    }

    #[tokio::test]
    async fn test_unsubscribe_id_fanout_reply() {
        let mut f = fixture(1000);
        f.execute(1, "subscribe * from stocks").await;
        let pubsubid = match recv(&mut f.out_rx).await {
            Response::Subscribed { pubsubid } => pubsubid,
            other => panic!("expected subscribe response, got {:?}", other),
        };

        let (reply_tx, mut reply_rx) = mpsc::channel(1);
        f.handle
            .forward(
                TableMessage::UnsubscribeId {
                    pubsubid,
                    reply: reply_tx,
                },
                &f.stop,
            )
            .await;
        assert_eq!(reply_rx.recv().await, Some(1));
    }

    #[tokio::test]
    async fn test_actor_exits_on_stop() {
        let f = fixture(1000);
        // Let the actor start before firing the signal.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(f.stop.worker_count(), 1);
        f.stop.trigger_stop();
        assert!(f.stop.wait_for_drain().await);
    }
}
