// SPDX-License-Identifier: MIT OR Apache-2.0
//! PubSubSQL server.
//!
//! An in-memory table store queried through a small SQL-like language over
//! a length-prefixed TCP framing. Clients may SUBSCRIBE to a table
//! predicate and receive asynchronous pubsub events for every matching
//! insert, update, and delete.
//!
//! Task layout: one accept loop, one dispatcher owning the table map, one
//! single-writer actor per table, and a reader/writer pair per connection.
//! All channels are bounded and every task selects against the stop signal.

pub mod config;
pub mod error;
pub mod shutdown;
pub mod signals;

mod actor;
mod connection;
mod dispatcher;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};

use crate::connection::handle_connection;
use crate::dispatcher::{spawn_dispatcher, DispatcherHandle};

pub use crate::config::ServerConfig;
pub use crate::error::{Result, ServerError};
pub use crate::shutdown::StopCoordinator;

/// A bound PubSubSQL server.
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    config: Arc<ServerConfig>,
    stop: Arc<StopCoordinator>,
    dispatcher: DispatcherHandle,
}

impl Server {
    /// Binds the listener and starts the dispatcher.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind(config.bind_addr).await?;
        let config = Arc::new(config);
        let stop = Arc::new(StopCoordinator::new(config.drain_timeout));
        let dispatcher = spawn_dispatcher(Arc::clone(&config), Arc::clone(&stop));
        Ok(Self {
            listener,
            config,
            stop,
            dispatcher,
        })
    }

    /// The actual bound address (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle used to trigger and observe shutdown.
    pub fn stop_coordinator(&self) -> Arc<StopCoordinator> {
        Arc::clone(&self.stop)
    }

    /// Accepts connections until the stop signal fires, then waits for all
    /// workers to drain.
    pub async fn run(self) {
        let Server {
            listener,
            config,
            stop,
            dispatcher,
        } = self;

        stop.worker_started();
        let mut stop_rx = stop.subscribe();

        loop {
            tokio::select! {
                _ = stop_rx.changed() => break,
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            info!(%addr, "client connected");
                            tokio::spawn(handle_connection(
                                stream,
                                addr,
                                dispatcher.clone(),
                                Arc::clone(&config),
                                Arc::clone(&stop),
                            ));
                        },
                        Err(e) => {
                            error!("accept error: {}", e);
                        },
                    }
                }
            }
        }

        stop.worker_finished();
        stop.wait_for_drain().await;
    }

    /// Runs until SIGINT or SIGTERM.
    pub async fn serve(self) {
        let stop = self.stop_coordinator();
        tokio::spawn(async move {
            signals::shutdown_requested().await;
            stop.trigger_stop();
        });
        self.run().await;
    }
}
