//! Terminal Session Multiplexer
//!
//! Addressable PTY instances shared by any number of viewer connections.
//! The first attach to an id spawns the process sized to that viewer; later
//! attaches join the same process. Detaching never kills it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use pty_manager::{PtyActor, PtyConfig, PtyError, PtyEvent, PtyHandle, PtySignal};
use serde::Serialize;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::TerminalConfig;
use crate::error::SessionError;
use crate::metrics::SessionMetrics;

pub type InstanceId = u32;
pub type ConnectionId = Uuid;

/// Starts the process behind a new instance.
pub trait TerminalSpawner: Send + Sync {
    fn spawn(&self, cols: u16, rows: u16) -> Result<PtyHandle, PtyError>;
}

/// Runs the configured shell in the workspace home.
pub struct ShellSpawner {
    config: TerminalConfig,
}

impl ShellSpawner {
    pub fn new(config: TerminalConfig) -> Self {
        Self { config }
    }
}

impl TerminalSpawner for ShellSpawner {
    fn spawn(&self, cols: u16, rows: u16) -> Result<PtyHandle, PtyError> {
        PtyActor::spawn(PtyConfig {
            command: self.config.shell.clone(),
            args: self.config.args.clone(),
            working_dir: Some(self.config.working_dir.clone()),
            env: vec![("TERM".to_string(), "xterm-256color".to_string())],
            rows,
            cols,
        })
    }
}

struct TerminalInstance {
    cols: u16,
    rows: u16,
    handle: PtyHandle,
    attached: HashSet<ConnectionId>,
}

/// A connection's view of an instance: live output from the moment it
/// attached, no replay.
pub struct Attachment {
    pub instance: InstanceId,
    pub connection: ConnectionId,
    pub output: broadcast::Receiver<PtyEvent>,
}

#[derive(Clone, Debug, Serialize)]
pub struct InstanceSummary {
    pub id: InstanceId,
    pub cols: u16,
    pub rows: u16,
    pub pid: Option<u32>,
    pub attached: usize,
    pub running: bool,
}

pub struct TerminalMultiplexer {
    spawner: Arc<dyn TerminalSpawner>,
    instances: RwLock<HashMap<InstanceId, TerminalInstance>>,
    metrics: Arc<SessionMetrics>,
}

impl TerminalMultiplexer {
    pub fn new(spawner: Arc<dyn TerminalSpawner>, metrics: Arc<SessionMetrics>) -> Self {
        Self {
            spawner,
            instances: RwLock::new(HashMap::new()),
            metrics,
        }
    }

    /// Join `id`, spawning it (or respawning a dead one) at `cols`x`rows`.
    pub async fn attach(
        &self,
        id: InstanceId,
        cols: u16,
        rows: u16,
        connection: ConnectionId,
    ) -> Result<Attachment, SessionError> {
        let mut instances = self.instances.write().await;

        let alive = instances.get(&id).is_some_and(|i| i.handle.is_running());
        if !alive {
            let handle = self.spawner.spawn(cols, rows)?;
            SessionMetrics::incr(&self.metrics.terminal_spawns);
            info!(instance = id, pid = ?handle.pid(), cols, rows, "Spawned terminal");

            let attached = instances.remove(&id).map(|i| i.attached).unwrap_or_default();
            instances.insert(
                id,
                TerminalInstance {
                    cols,
                    rows,
                    handle,
                    attached,
                },
            );
        }

        let Some(instance) = instances.get_mut(&id) else {
            return Err(SessionError::UnknownTerminal(id));
        };
        instance.attached.insert(connection);
        debug!(instance = id, %connection, attached = instance.attached.len(), "Attached");

        Ok(Attachment {
            instance: id,
            connection,
            output: instance.handle.subscribe(),
        })
    }

    /// Forward viewer input to the instance's process.
    pub async fn input(&self, id: InstanceId, data: &[u8]) -> Result<(), SessionError> {
        let handle = self.handle(id).await?;
        handle.write(data).await?;
        Ok(())
    }

    pub async fn resize(
        &self,
        id: InstanceId,
        cols: u16,
        rows: u16,
    ) -> Result<(), SessionError> {
        let handle = self.handle(id).await?;
        handle.resize(rows, cols).await?;
        if let Some(instance) = self.instances.write().await.get_mut(&id) {
            instance.cols = cols;
            instance.rows = rows;
        }
        Ok(())
    }

    /// The instance keeps running with zero attachments.
    pub async fn detach(&self, id: InstanceId, connection: ConnectionId) {
        if let Some(instance) = self.instances.write().await.get_mut(&id) {
            if instance.attached.remove(&connection) {
                debug!(instance = id, %connection, attached = instance.attached.len(), "Detached");
            }
        }
    }

    pub async fn list(&self) -> Vec<InstanceSummary> {
        let instances = self.instances.read().await;
        let mut summaries: Vec<InstanceSummary> = instances
            .iter()
            .map(|(id, i)| InstanceSummary {
                id: *id,
                cols: i.cols,
                rows: i.rows,
                pid: i.handle.pid(),
                attached: i.attached.len(),
                running: i.handle.is_running(),
            })
            .collect();
        summaries.sort_by_key(|s| s.id);
        summaries
    }

    /// Hang up every running instance.
    pub async fn shutdown(&self) {
        let mut instances = self.instances.write().await;
        for (id, instance) in instances.drain() {
            if instance.handle.is_running() {
                if let Err(e) = instance.handle.kill(PtySignal::Hangup).await {
                    warn!(instance = id, "Failed to hang up terminal: {}", e);
                }
            }
        }
    }

    async fn handle(&self, id: InstanceId) -> Result<PtyHandle, SessionError> {
        self.instances
            .read()
            .await
            .get(&id)
            .map(|i| i.handle.clone())
            .ok_or(SessionError::UnknownTerminal(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CatSpawner {
        spawns: AtomicUsize,
    }

    impl TerminalSpawner for CatSpawner {
        fn spawn(&self, cols: u16, rows: u16) -> Result<PtyHandle, PtyError> {
            self.spawns.fetch_add(1, Ordering::SeqCst);
            PtyActor::spawn(PtyConfig {
                command: "/bin/cat".to_string(),
                cols,
                rows,
                ..Default::default()
            })
        }
    }

    fn multiplexer() -> (TerminalMultiplexer, Arc<CatSpawner>) {
        let spawner = Arc::new(CatSpawner {
            spawns: AtomicUsize::new(0),
        });
        let mux = TerminalMultiplexer::new(spawner.clone(), Arc::new(SessionMetrics::new()));
        (mux, spawner)
    }

    /// Collect output until `needle` shows up.
    async fn read_until(rx: &mut broadcast::Receiver<PtyEvent>, needle: &str) -> String {
        let mut seen = String::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !seen.contains(needle) {
            let event = tokio::time::timeout_at(deadline, rx.recv())
                .await
                .expect("timed out waiting for output")
                .expect("output stream closed");
            if let PtyEvent::Output { data } = event {
                seen.push_str(&String::from_utf8_lossy(&data));
            }
        }
        seen
    }

    #[tokio::test]
    async fn test_second_attach_joins_existing_process() {
        let (mux, spawner) = multiplexer();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let mut att_a = mux.attach(0, 100, 24, a).await.unwrap();
        let mut att_b = mux.attach(0, 80, 20, b).await.unwrap();
        assert_eq!(spawner.spawns.load(Ordering::SeqCst), 1);

        mux.input(0, b"shared\n").await.unwrap();
        read_until(&mut att_a.output, "shared").await;
        read_until(&mut att_b.output, "shared").await;

        let list = mux.list().await;
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].attached, 2);
        assert_eq!((list[0].cols, list[0].rows), (100, 24));
        mux.shutdown().await;
    }

    #[tokio::test]
    async fn test_detach_keeps_instance_alive() {
        let (mux, spawner) = multiplexer();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let att_a = mux.attach(0, 100, 24, a).await.unwrap();
        let mut att_b = mux.attach(0, 100, 24, b).await.unwrap();
        mux.detach(0, a).await;
        drop(att_a);

        mux.input(0, b"still here\n").await.unwrap();
        read_until(&mut att_b.output, "still here").await;

        mux.detach(0, b).await;
        let list = mux.list().await;
        assert_eq!(list[0].attached, 0);
        assert!(list[0].running);
        assert_eq!(spawner.spawns.load(Ordering::SeqCst), 1);
        mux.shutdown().await;
    }

    #[tokio::test]
    async fn test_instances_are_independent() {
        let (mux, spawner) = multiplexer();
        let conn = Uuid::new_v4();

        mux.attach(0, 100, 24, conn).await.unwrap();
        mux.attach(1, 100, 24, conn).await.unwrap();

        assert_eq!(spawner.spawns.load(Ordering::SeqCst), 2);
        let ids: Vec<_> = mux.list().await.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![0, 1]);
        mux.shutdown().await;
    }

    #[tokio::test]
    async fn test_resize_updates_summary() {
        let (mux, _spawner) = multiplexer();
        mux.attach(3, 100, 24, Uuid::new_v4()).await.unwrap();

        mux.resize(3, 120, 40).await.unwrap();

        let list = mux.list().await;
        assert_eq!((list[0].cols, list[0].rows), (120, 40));
        mux.shutdown().await;
    }

    #[tokio::test]
    async fn test_input_to_unknown_instance_fails() {
        let (mux, _spawner) = multiplexer();
        assert!(matches!(
            mux.input(9, b"x").await,
            Err(SessionError::UnknownTerminal(9))
        ));
        assert!(matches!(
            mux.resize(9, 80, 24).await,
            Err(SessionError::UnknownTerminal(9))
        ));
    }

    #[tokio::test]
    async fn test_dead_instance_respawns_on_attach() {
        let (mux, spawner) = multiplexer();
        let mut att = mux.attach(0, 100, 24, Uuid::new_v4()).await.unwrap();

        // Ctrl+D on an empty line ends cat
        mux.input(0, &[0x04]).await.unwrap();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            match tokio::time::timeout_at(deadline, att.output.recv()).await {
                Ok(Ok(PtyEvent::Exited)) | Ok(Err(broadcast::error::RecvError::Closed)) => break,
                Ok(_) => continue,
                Err(_) => panic!("process did not exit"),
            }
        }
        assert!(!mux.list().await[0].running);

        mux.attach(0, 100, 24, Uuid::new_v4()).await.unwrap();
        assert_eq!(spawner.spawns.load(Ordering::SeqCst), 2);
        assert!(mux.list().await[0].running);
        mux.shutdown().await;
    }
}
