//! Git Snapshot Cache
//!
//! Holds the last rendered repository graph. Viewers that attach are served
//! the cached render without recomputation; ref changes under
//! `.git/refs/heads` force a fresh render once they go quiet.

pub mod executor;
pub mod render;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use event_bus::{Event, EventBus, Filter, SourceId, Subscription};
use notify::RecursiveMode;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::GitConfig;
use crate::debounce::Debouncer;
use crate::error::SessionError;
use crate::events;
use crate::files::watcher::{self, PathWatcher};
use crate::metrics::SessionMetrics;

pub use render::{GitGraphRenderer, SnapshotRenderer};

/// Coalescing window for raw ref notifications, ahead of the re-render debounce.
const WATCH_WINDOW: Duration = Duration::from_millis(50);

#[derive(Clone, Debug)]
pub struct CachedRender {
    pub rendered: String,
    pub rendered_at: DateTime<Utc>,
}

pub(crate) enum Internal {
    RefsChanged,
    Refresh { generation: u64 },
    Rendered {
        seq: u64,
        result: Result<String, SessionError>,
    },
}

pub struct GitCache {
    config: GitConfig,
    renderer: Arc<dyn SnapshotRenderer>,
    bus: EventBus,
    origin: SourceId,
    metrics: Arc<SessionMetrics>,
    cache: Option<CachedRender>,
    /// Sequence number handed to the most recently started render.
    started: u64,
    /// Sequence number of the render currently in `cache`.
    applied: u64,
    refresh: Debouncer<()>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    watcher: Option<PathWatcher>,
}

/// Watch the ref directory, kick off the first render, and run until
/// `shutdown`.
pub fn spawn(
    config: GitConfig,
    renderer: Arc<dyn SnapshotRenderer>,
    bus: EventBus,
    metrics: Arc<SessionMetrics>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let (mut cache, internal_rx) = GitCache::new(config, renderer, bus, metrics);
    let commands = cache.subscribe();
    cache.start();
    tokio::spawn(cache.run(commands, internal_rx, shutdown))
}

impl GitCache {
    pub(crate) fn new(
        config: GitConfig,
        renderer: Arc<dyn SnapshotRenderer>,
        bus: EventBus,
        metrics: Arc<SessionMetrics>,
    ) -> (Self, mpsc::UnboundedReceiver<Internal>) {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let refresh = Debouncer::new(config.debounce);
        let cache = Self {
            config,
            renderer,
            bus,
            origin: SourceId::new_v4(),
            metrics,
            cache: None,
            started: 0,
            applied: 0,
            refresh,
            internal_tx,
            watcher: None,
        };
        (cache, internal_rx)
    }

    pub(crate) fn subscribe(&self) -> Subscription {
        self.bus.subscribe(
            Filter::kinds([events::CONNECTED]).and(Filter::except_source(self.origin)),
        )
    }

    pub(crate) fn start(&mut self) {
        let refs = self.config.refs_dir();
        let tx = self.internal_tx.clone();
        match watcher::watch(&refs, RecursiveMode::Recursive, WATCH_WINDOW, move |_| {
            let _ = tx.send(Internal::RefsChanged);
        }) {
            Ok(w) => self.watcher = Some(w),
            Err(e) => warn!(refs = %refs.display(), "Ref watching disabled: {}", e),
        }
        info!(repository = %self.config.repository.display(), "Git snapshot cache started");
        self.render(false);
    }

    async fn run(
        mut self,
        mut commands: Subscription,
        mut internal_rx: mpsc::UnboundedReceiver<Internal>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(event) = commands.recv() => self.handle_event(event),
                Some(msg) = internal_rx.recv() => self.handle_internal(msg),
                else => break,
            }
        }
        self.refresh.cancel_all();
        self.watcher = None;
        debug!("Git snapshot cache stopped");
    }

    pub(crate) fn handle_event(&mut self, event: Event) {
        if event.kind == events::CONNECTED {
            self.render(true);
        }
    }

    pub(crate) fn handle_internal(&mut self, msg: Internal) {
        match msg {
            Internal::RefsChanged => {
                let tx = self.internal_tx.clone();
                self.refresh.arm((), move |generation| {
                    let _ = tx.send(Internal::Refresh { generation });
                });
            }
            Internal::Refresh { generation } => {
                if self.refresh.fire(&(), generation) {
                    debug!("Refs changed, re-rendering");
                    self.render(false);
                }
            }
            Internal::Rendered { seq, .. } if seq < self.applied => {
                debug!(seq, applied = self.applied, "Dropping stale git render");
            }
            Internal::Rendered {
                seq,
                result: Ok(rendered),
            } => {
                self.applied = seq;
                self.cache = Some(CachedRender {
                    rendered,
                    rendered_at: Utc::now(),
                });
                self.publish_cached();
            }
            Internal::Rendered { result: Err(e), .. } => {
                warn!("Git render failed: {}", e);
                self.bus
                    .publish(Event::new(events::ERROR, e.to_event_data()).from_source(self.origin));
            }
        }
    }

    /// Serve the cache when allowed and present, otherwise start a render
    /// whose result comes back as [`Internal::Rendered`]. A completion that
    /// finishes after a newer one is discarded.
    pub(crate) fn render(&mut self, use_cache: bool) {
        if use_cache && self.cache.is_some() {
            self.publish_cached();
            return;
        }

        SessionMetrics::incr(&self.metrics.git_renders);
        self.started += 1;
        let seq = self.started;
        let render = self.renderer.render();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(Internal::Rendered {
                seq,
                result: render.await,
            });
        });
    }

    pub fn cached(&self) -> Option<&CachedRender> {
        self.cache.as_ref()
    }

    fn publish_cached(&self) {
        if let Some(cache) = &self.cache {
            let data = Value::String(cache.rendered.clone());
            self.bus
                .publish(Event::new(events::GIT_SVG, data).from_source(self.origin));
        }
    }
}
