use std::sync::Arc;

use axum::Router;
use event_bus::EventBus;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::auth::{Authorizer, TokenAuthorizer};
use crate::config::SessionConfig;
use crate::files;
use crate::gateway::{self, GatewayState};
use crate::git::{self, GitGraphRenderer};
use crate::metrics::SessionMetrics;
use crate::terminal::{ShellSpawner, TerminalMultiplexer};

/// One running session: the bus plus every component attached to it.
pub struct Session {
    bus: EventBus,
    metrics: Arc<SessionMetrics>,
    terminals: Arc<TerminalMultiplexer>,
    default_cols: u16,
    default_rows: u16,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Session {
    /// Start the file synchronizer and (if enabled) the git cache.
    ///
    /// Returns once the default files are open and the first tree scan is
    /// done, so viewers that attach afterwards get a complete resync.
    pub async fn start(config: SessionConfig) -> Self {
        let bus = EventBus::new();
        let metrics = Arc::new(SessionMetrics::new());
        let shutdown = CancellationToken::new();
        let authorizer: Arc<dyn Authorizer> =
            Arc::new(TokenAuthorizer::new(config.admin_token.clone()));
        if config.admin_token.is_none() {
            info!("No admin token configured; bulk resets are disabled");
        }

        let mut tasks = Vec::new();
        tasks.push(
            files::spawn(
                config.files.clone(),
                bus.clone(),
                authorizer,
                metrics.clone(),
                shutdown.child_token(),
            )
            .await,
        );

        if config.git.enabled {
            let renderer = Arc::new(GitGraphRenderer::new(
                config.git.repository.clone(),
                config.git.limit,
            ));
            tasks.push(git::spawn(
                config.git.clone(),
                renderer,
                bus.clone(),
                metrics.clone(),
                shutdown.child_token(),
            ));
        } else {
            info!("Git snapshots disabled");
        }

        let terminals = Arc::new(TerminalMultiplexer::new(
            Arc::new(ShellSpawner::new(config.terminal.clone())),
            metrics.clone(),
        ));

        Self {
            bus,
            metrics,
            terminals,
            default_cols: config.terminal.default_cols,
            default_rows: config.terminal.default_rows,
            shutdown,
            tasks,
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn metrics(&self) -> &Arc<SessionMetrics> {
        &self.metrics
    }

    pub fn terminals(&self) -> &Arc<TerminalMultiplexer> {
        &self.terminals
    }

    pub fn router(&self) -> Router {
        gateway::router(GatewayState {
            bus: self.bus.clone(),
            terminals: self.terminals.clone(),
            metrics: self.metrics.clone(),
            default_cols: self.default_cols,
            default_rows: self.default_rows,
        })
    }

    /// Stop the components and hang up every terminal.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("Component task failed: {}", e);
            }
        }
        self.terminals.shutdown().await;
        info!("Session stopped");
    }
}
