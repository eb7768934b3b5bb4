//! # Graceful Shutdown
//!
//! Turns SIGINT/SIGTERM into a [`CancellationToken`] that the HTTP server
//! and background tasks watch. On cancellation the server stops accepting
//! connections and lets in-flight requests finish.

use std::{future::Future, time::Duration};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Cloneable shutdown handle.
#[derive(Clone, Debug, Default)]
pub struct GracefulShutdown {
    token: CancellationToken,
}

impl GracefulShutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn initiate_shutdown(&self) {
        if !self.token.is_cancelled() {
            info!("🛑 Graceful shutdown initiated");
        }
        self.token.cancel();
    }

    /// Resolves once shutdown has been initiated. Suitable for
    /// `axum::serve(..).with_graceful_shutdown(..)`.
    pub fn signalled(&self) -> impl Future<Output = ()> + Send + 'static {
        self.token.clone().cancelled_owned()
    }

    /// Spawn the task that waits for an OS signal and initiates shutdown.
    pub fn listen_for_signals(&self) {
        let shutdown = self.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            shutdown.initiate_shutdown();
        });
    }

    /// Run `task` every `period` until shutdown.
    pub fn spawn_periodic<F>(&self, period: Duration, mut task: F) -> tokio::task::JoinHandle<()>
    where
        F: FnMut() + Send + 'static,
    {
        let token = self.token.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("periodic task stopped");
                        break;
                    }
                    _ = ticker.tick() => task(),
                }
            }
        })
    }
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("❌ Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("📡 Received SIGINT (Ctrl+C)");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("📡 Received SIGTERM");
            }
            Err(e) => {
                error!("❌ Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    #[tokio::test]
    async fn test_shutdown_initiation() {
        let shutdown = GracefulShutdown::new();
        assert!(!shutdown.is_shutdown_initiated());

        let signalled = shutdown.signalled();
        shutdown.clone().initiate_shutdown();
        assert!(shutdown.is_shutdown_initiated());
        tokio::time::timeout(Duration::from_secs(1), signalled)
            .await
            .expect("signal future resolves");
    }

    #[tokio::test]
    async fn test_periodic_task_stops_on_shutdown() {
        let shutdown = GracefulShutdown::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();

        let handle = shutdown.spawn_periodic(Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(55)).await;
        shutdown.initiate_shutdown();
        handle.await.unwrap();

        let seen = runs.load(Ordering::SeqCst);
        assert!(seen >= 1);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(runs.load(Ordering::SeqCst), seen);
    }
}
