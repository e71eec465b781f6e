//! Bridge supervisor.
//!
//! Owns the lifecycle of the pipeline tasks. Components that die with an
//! error are rebuilt and restarted after a backoff; the reader and the
//! publisher restart independently, so a flapping serial link does not cost
//! broker progress and vice versa. Shutdown cancels the shared token, drains
//! the delivery queue, and bounds the wait for stragglers.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use serelay_common::{Backoff, RetryConfig};

use crate::error::{BridgeError, Result};
use crate::queue::DeliveryQueue;
use crate::stats::BridgeStats;

const STATS_INTERVAL: Duration = Duration::from_secs(60);

/// Lifecycle state of a managed component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    Starting,
    Running,
    Restarting,
    Stopped,
}

impl ComponentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentState::Starting => "starting",
            ComponentState::Running => "running",
            ComponentState::Restarting => "restarting",
            ComponentState::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for ComponentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

struct Component {
    name: &'static str,
    state: watch::Receiver<ComponentState>,
    handle: JoinHandle<()>,
}

/// Supervisor for the bridge pipeline.
pub struct Supervisor {
    token: CancellationToken,
    queue: Arc<DeliveryQueue>,
    stats: Arc<BridgeStats>,
    restart: RetryConfig,
    shutdown_timeout: Duration,
    components: Vec<Component>,
}

impl Supervisor {
    pub fn new(
        queue: Arc<DeliveryQueue>,
        stats: Arc<BridgeStats>,
        restart: RetryConfig,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            token: CancellationToken::new(),
            queue,
            stats,
            restart,
            shutdown_timeout,
            components: Vec::new(),
        }
    }

    /// The shared cancellation token; components must watch it at every
    /// suspension point (blocking reads, queue waits, backoff sleeps).
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Spawn a component under restart supervision.
    ///
    /// The factory builds a fresh instance of the component future for each
    /// (re)start. A component that returns `Ok` is done (normal shutdown
    /// path); one that returns `Err` is restarted after a backoff delay.
    pub fn supervise<F, Fut>(&mut self, name: &'static str, mut factory: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let token = self.token.clone();
        let mut backoff = Backoff::from_config(&self.restart);
        let (state_tx, state_rx) = watch::channel(ComponentState::Starting);

        let handle = tokio::spawn(async move {
            loop {
                let _ = state_tx.send(ComponentState::Starting);
                let component = factory();
                let _ = state_tx.send(ComponentState::Running);

                match component.await {
                    Ok(()) => break,
                    Err(e) => {
                        if token.is_cancelled() {
                            break;
                        }
                        let _ = state_tx.send(ComponentState::Restarting);
                        let delay = backoff.next_delay();
                        tracing::error!(
                            component = name,
                            error = %e,
                            delay_ms = delay.as_millis() as u64,
                            "component failed, scheduling restart"
                        );
                        tokio::select! {
                            _ = token.cancelled() => break,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
            let _ = state_tx.send(ComponentState::Stopped);
            tracing::debug!(component = name, "component stopped");
        });

        self.components.push(Component {
            name,
            state: state_rx,
            handle,
        });
    }

    /// Spawn a component without restart supervision.
    ///
    /// Used for tasks that never fail and end on their own when the
    /// pipeline shuts down (the normalizer).
    pub fn spawn<Fut>(&mut self, name: &'static str, future: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (state_tx, state_rx) = watch::channel(ComponentState::Running);
        let handle = tokio::spawn(async move {
            future.await;
            let _ = state_tx.send(ComponentState::Stopped);
            tracing::debug!(component = name, "component stopped");
        });
        self.components.push(Component {
            name,
            state: state_rx,
            handle,
        });
    }

    /// Current state of a managed component, by name.
    pub fn component_state(&self, name: &str) -> Option<ComponentState> {
        self.components
            .iter()
            .find(|c| c.name == name)
            .map(|c| *c.state.borrow())
    }

    /// Run until Ctrl+C (or external cancellation), then shut down.
    pub async fn run(self) -> Result<()> {
        let stats = self.stats.clone();
        let queue = self.queue.clone();
        let summary_token = self.token.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = summary_token.cancelled() => break,
                    _ = tokio::time::sleep(STATS_INTERVAL) => {
                        let snap = stats.snapshot();
                        tracing::info!(
                            frames_read = snap.frames_read,
                            malformed = snap.malformed,
                            dropped = snap.dropped,
                            published = snap.published,
                            reconnects = snap.reconnects,
                            queued = queue.len(),
                            "bridge stats"
                        );
                    }
                }
            }
        });

        tracing::info!(components = self.components.len(), "bridge running");

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "failed to listen for Ctrl+C");
                }
                tracing::info!("shutdown signal received");
            }
            _ = self.token.cancelled() => {}
        }

        self.shutdown().await
    }

    /// Stop all components: cancel, drain the queue, bound the wait.
    pub async fn shutdown(mut self) -> Result<()> {
        self.token.cancel();
        self.queue.shutdown();

        for component in &mut self.components {
            match timeout(self.shutdown_timeout, &mut component.handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(component = component.name, error = %e, "component task panicked");
                }
                Err(_) => {
                    tracing::warn!(
                        component = component.name,
                        timeout = ?self.shutdown_timeout,
                        "component did not stop within timeout, aborting"
                    );
                    component.handle.abort();
                }
            }
        }

        let snap = self.stats.snapshot();
        tracing::info!(
            frames_read = snap.frames_read,
            malformed = snap.malformed,
            dropped = snap.dropped,
            published = snap.published,
            reconnects = snap.reconnects,
            "bridge stopped"
        );
        Ok(())
    }
}
