// SPDX-License-Identifier: MIT OR Apache-2.0
//! Request routing.
//!
//! A single task owns the table map and forwards each request to its table
//! actor, creating the actor on first reference. Because only this task
//! touches the map, no locking is involved.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::actor::{spawn_table, TableHandle, TableMessage};
use crate::config::ServerConfig;
use crate::shutdown::StopCoordinator;
use pubsub_engine::{EngineError, Response, ResponseSender};
use pubsub_parser::{Request, UnsubscribeTarget};

/// A parsed request paired with the sender for its responses.
pub(crate) struct RequestItem {
    pub request: Request,
    pub sender: ResponseSender,
}

/// Producer handle to the dispatcher task.
#[derive(Clone, Debug)]
pub(crate) struct DispatcherHandle {
    tx: mpsc::Sender<RequestItem>,
}

impl DispatcherHandle {
    /// Hands a request to the dispatcher, blocking cooperatively until it
    /// is accepted or the stop signal fires.
    pub(crate) async fn accept(&self, item: RequestItem, stop: &StopCoordinator) {
        let mut stop_rx = stop.subscribe();
        tokio::select! {
            result = self.tx.send(item) => {
                if result.is_err() {
                    warn!("dispatcher channel closed while accepting request");
                }
            }
            _ = stop_rx.changed() => {}
        }
    }
}

/// Spawns the dispatcher task.
pub(crate) fn spawn_dispatcher(
    config: Arc<ServerConfig>,
    stop: Arc<StopCoordinator>,
) -> DispatcherHandle {
    let (tx, rx) = mpsc::channel(config.channel_buffer_size);
    tokio::spawn(run_dispatcher(rx, config, stop));
    DispatcherHandle { tx }
}

async fn run_dispatcher(
    mut rx: mpsc::Receiver<RequestItem>,
    config: Arc<ServerConfig>,
    stop: Arc<StopCoordinator>,
) {
    stop.worker_started();
    let mut tables: HashMap<String, TableHandle> = HashMap::new();
    let mut stop_rx = stop.subscribe();

    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            item = rx.recv() => match item {
                Some(item) => dispatch(&mut tables, item, &config, &stop).await,
                None => break,
            }
        }
    }

    // Dropping the handles closes the table channels; the actors drain and
    // exit on their own stop subscriptions.
    stop.worker_finished();
}

async fn dispatch(
    tables: &mut HashMap<String, TableHandle>,
    item: RequestItem,
    config: &Arc<ServerConfig>,
    stop: &Arc<StopCoordinator>,
) {
    match item.request.table().map(str::to_string) {
        Some(name) => {
            let handle = tables.entry(name.clone()).or_insert_with(|| {
                info!(table = %name, "creating table");
                spawn_table(
                    &name,
                    config.channel_buffer_size,
                    config.select_batch_size,
                    Arc::clone(stop),
                )
            });
            handle
                .forward(
                    TableMessage::Request {
                        request: item.request,
                        sender: item.sender,
                    },
                    stop,
                )
                .await;
        },
        None => unsubscribe_by_id(tables, item, stop).await,
    }
}

/// Pubsubids are allocated inside table actors, so the dispatcher cannot
/// know which table holds one. It fans the removal out to every table and
/// a small aggregation task sums the counts before answering.
async fn unsubscribe_by_id(
    tables: &HashMap<String, TableHandle>,
    item: RequestItem,
    stop: &Arc<StopCoordinator>,
) {
    let Request::Unsubscribe {
        target: UnsubscribeTarget::PubSubId(pubsubid),
    } = item.request
    else {
        warn!("request without a table reached unsubscribe fan-out");
        item.sender
            .send(Response::error(EngineError::SubscriptionNotFound.to_string()))
            .await;
        return;
    };

    if tables.is_empty() {
        item.sender
            .send(Response::error(EngineError::SubscriptionNotFound.to_string()))
            .await;
        return;
    }

    let (reply_tx, mut reply_rx) = mpsc::channel(tables.len());
    for handle in tables.values() {
        handle
            .forward(
                TableMessage::UnsubscribeId {
                    pubsubid,
                    reply: reply_tx.clone(),
                },
                stop,
            )
            .await;
    }
    drop(reply_tx);

    let sender = item.sender;
    tokio::spawn(async move {
        let mut total = 0;
        while let Some(removed) = reply_rx.recv().await {
            total += removed;
        }
        let response = if total == 0 {
            Response::error(EngineError::SubscriptionNotFound.to_string())
        } else {
            Response::Unsubscribed {
                subscriptions: total,
            }
        };
        sender.send(response).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use pubsub_engine::{OutboundMessage, Response};
    use pubsub_parser::parse;
    use std::time::Duration;

    struct Fixture {
        dispatcher: DispatcherHandle,
        stop: Arc<StopCoordinator>,
        out_tx: mpsc::Sender<OutboundMessage>,
        out_rx: mpsc::Receiver<OutboundMessage>,
    }

    fn fixture() -> Fixture {
        let config = Arc::new(
            ServerConfig::new().with_channel_buffer_size(64),
        );
        let stop = Arc::new(StopCoordinator::new(Duration::from_secs(1)));
        let dispatcher = spawn_dispatcher(config, Arc::clone(&stop));
        let (out_tx, out_rx) = mpsc::channel(64);
        Fixture {
            dispatcher,
            stop,
            out_tx,
            out_rx,
        }
    }

    impl Fixture {
        async fn execute(&self, request_id: u32, source: &str) {
            self.dispatcher
                .accept(
                    RequestItem {
                        request: parse(source).unwrap(),
                        sender: ResponseSender::new(request_id, self.out_tx.clone()),
                    },
                    &self.stop,
                )
                .await;
        }

        async fn recv(&mut self) -> Response {
            tokio::time::timeout(Duration::from_secs(1), self.out_rx.recv())
                .await
                .expect("timed out waiting for response")
                .expect("channel closed")
                .response
        }
    }

    #[tokio::test]
    async fn test_auto_creates_tables() {
        let mut f = fixture();
        f.execute(1, "insert into alpha (x) values (1)").await;
        assert_eq!(f.recv().await, Response::Inserted { id: 0 });
        f.execute(2, "insert into beta (x) values (1)").await;
        assert_eq!(f.recv().await, Response::Inserted { id: 0 });
    }

    #[tokio::test]
    async fn test_tables_are_independent() {
        let mut f = fixture();
        f.execute(1, "insert into alpha (x) values (1)").await;
        f.recv().await;
        f.execute(2, "select * from beta").await;
        match f.recv().await {
            Response::Select { rows, .. } => assert_eq!(rows, 0),
            other => panic!("expected select response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unsubscribe_by_id_across_tables() {
        let mut f = fixture();
        f.execute(1, "subscribe * from alpha").await;
        let pubsubid = match f.recv().await {
            Response::Subscribed { pubsubid } => pubsubid,
            other => panic!("expected subscribe response, got {:?}", other),
        };
        // A second table so the fan-out crosses more than one actor.
        f.execute(2, "insert into beta (x) values (1)").await;
        f.recv().await;

        f.execute(3, &format!("unsubscribe from {}", pubsubid)).await;
        assert_eq!(f.recv().await, Response::Unsubscribed { subscriptions: 1 });

        f.execute(4, &format!("unsubscribe from {}", pubsubid)).await;
        assert_eq!(f.recv().await, Response::error(EngineError::SubscriptionNotFound.to_string()));
    }

    #[tokio::test]
    async fn test_unsubscribe_by_id_without_tables() {
        let mut f = fixture();
        f.execute(1, "unsubscribe from 9999").await;
        assert_eq!(f.recv().await, Response::error(EngineError::SubscriptionNotFound.to_string()));
    }
}
