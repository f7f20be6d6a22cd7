// SPDX-License-Identifier: MIT OR Apache-2.0
//! PubSubSQL server binary entry point.

use pubsub_server::{Server, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pubsub_server=info".parse()?)
                .add_directive("pubsub_engine=info".parse()?),
        )
        .init();

    let config = ServerConfig::from_env()?;

    tracing::info!("starting PubSubSQL server on {}", config.bind_addr);

    let server = Server::bind(config).await?;
    server.serve().await;

    Ok(())
}
