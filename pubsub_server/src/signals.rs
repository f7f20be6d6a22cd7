//! Shutdown signal sources.

use tracing::{error, info};

/// Resolves once the operating system asks the process to shut down.
///
/// On unix both SIGINT and SIGTERM are watched; other platforms fall back
/// to ctrl-c. A source that cannot be registered is logged and treated as
/// one that never fires, so a broken signal hookup cannot stop the server
/// from serving.
pub async fn shutdown_requested() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        async fn caught(kind: SignalKind, name: &str) {
            match signal(kind) {
                Ok(mut stream) => {
                    stream.recv().await;
                    info!("{} received", name);
                },
                Err(e) => {
                    error!("cannot watch {}: {}", name, e);
                    std::future::pending::<()>().await;
                },
            }
        }

        tokio::select! {
            _ = caught(SignalKind::interrupt(), "SIGINT") => {}
            _ = caught(SignalKind::terminate(), "SIGTERM") => {}
        }
    }

    #[cfg(not(unix))]
    {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("ctrl-c received"),
            Err(e) => {
                error!("cannot watch ctrl-c: {}", e);
                std::future::pending::<()>().await;
            },
        }
    }
}
