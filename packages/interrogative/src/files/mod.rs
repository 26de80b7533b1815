//! File-State Synchronizer
//!
//! A single actor owns the workspace tree snapshot, the registry of open
//! files, the upload registry and the focused path. It reacts to viewer
//! commands from the bus, to coalesced watcher batches, and to its own
//! debounce timers. All I/O failures are reported as `error` events; no
//! single-file failure stops the actor.
//!
//! Write-back is debounced per path. From the moment a save fires until the
//! write has settled, the node is marked `saving` and watcher notifications
//! for it are ignored, so a viewer's own save never bounces back as an
//! external modification.

pub mod metadata;
pub mod node;
pub mod tree;
pub mod watcher;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use event_bus::{Event, EventBus, Filter, SourceId, Subscription};
use notify::RecursiveMode;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::Authorizer;
use crate::config::FilesConfig;
use crate::debounce::Debouncer;
use crate::error::SessionError;
use crate::events;
use crate::metrics::SessionMetrics;

use node::{FileNode, NodeType};
use tree::{TreeScanner, TreeSnapshot};
use watcher::{PathWatcher, WatchKind};

#[derive(Deserialize)]
struct PathRequest {
    path: PathBuf,
}

#[derive(Deserialize)]
struct ChangeRequest {
    path: PathBuf,
    contents: String,
}

#[derive(Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
enum CreateKind {
    #[default]
    File,
    Directory,
}

#[derive(Deserialize)]
struct CreateRequest {
    path: PathBuf,
    name: String,
    #[serde(rename = "type", default)]
    kind: CreateKind,
}

#[derive(Deserialize)]
struct AuthRequest {
    #[serde(default)]
    auth: Option<String>,
}

/// Completions delivered back to the actor.
pub(crate) enum Internal {
    Flush { path: PathBuf, generation: u64 },
    Settled { path: PathBuf, generation: u64 },
    Changed(Vec<PathBuf>),
}

pub struct FileSync {
    config: FilesConfig,
    scanner: TreeScanner,
    bus: EventBus,
    origin: SourceId,
    authorizer: Arc<dyn Authorizer>,
    metrics: Arc<SessionMetrics>,
    registry: BTreeMap<PathBuf, FileNode>,
    tree: TreeSnapshot,
    uploads: BTreeMap<String, Value>,
    focus: Option<PathBuf>,
    saves: Debouncer<PathBuf>,
    settles: Debouncer<PathBuf>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    watcher: Option<PathWatcher>,
}

/// Open the defaults, scan, start watching, then run until `shutdown`.
pub async fn spawn(
    config: FilesConfig,
    bus: EventBus,
    authorizer: Arc<dyn Authorizer>,
    metrics: Arc<SessionMetrics>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let (mut sync, internal_rx) = FileSync::new(config, bus, authorizer, metrics);
    let commands = sync.subscribe();
    sync.start().await;
    tokio::spawn(sync.run(commands, internal_rx, shutdown))
}

impl FileSync {
    pub(crate) fn new(
        config: FilesConfig,
        bus: EventBus,
        authorizer: Arc<dyn Authorizer>,
        metrics: Arc<SessionMetrics>,
    ) -> (Self, mpsc::UnboundedReceiver<Internal>) {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let scanner = TreeScanner::new(config.exclusions.clone(), config.depth);
        let saves = Debouncer::new(config.save_debounce);
        let settles = Debouncer::new(config.watch_debounce * 2);
        let sync = Self {
            config,
            scanner,
            bus,
            origin: SourceId::new_v4(),
            authorizer,
            metrics,
            registry: BTreeMap::new(),
            tree: TreeSnapshot::default(),
            uploads: BTreeMap::new(),
            focus: None,
            saves,
            settles,
            internal_tx,
            watcher: None,
        };
        (sync, internal_rx)
    }

    /// Commands addressed to this component, minus its own publications.
    pub(crate) fn subscribe(&self) -> Subscription {
        self.bus.subscribe(
            Filter::kinds(events::FILE_COMMANDS.iter().copied())
                .and(Filter::except_source(self.origin)),
        )
    }

    pub(crate) async fn start(&mut self) {
        self.open_defaults().await;
        self.rescan().await;

        let tx = self.internal_tx.clone();
        match watcher::watch(
            &self.config.home,
            RecursiveMode::NonRecursive,
            self.config.watch_debounce,
            move |paths| {
                let _ = tx.send(Internal::Changed(paths));
            },
        ) {
            Ok(w) => {
                self.watcher = Some(w);
                self.watch_tree();
            }
            Err(e) => warn!("File watching disabled: {}", e),
        }
        info!(
            home = %self.config.home.display(),
            open = self.registry.len(),
            "File synchronizer started"
        );
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
                Some(event) = commands.recv() => self.handle_event(event).await,
                Some(msg) = internal_rx.recv() => self.handle_internal(msg).await,
                else => break,
            }
        }
        self.saves.cancel_all();
        self.settles.cancel_all();
        self.watcher = None;
        debug!("File synchronizer stopped");
    }

    pub(crate) async fn handle_event(&mut self, event: Event) {
        match event.kind.as_str() {
            events::FILE_OPEN => {
                if let Some(req) = parse::<PathRequest>(&event) {
                    let path = self.absolute(&req.path);
                    self.open(&path).await;
                }
            }
            events::FILE_CLOSED => {
                if let Some(req) = parse::<PathRequest>(&event) {
                    let path = self.absolute(&req.path);
                    self.close(&path);
                }
            }
            events::DOCUMENT_CHANGE => {
                if let Some(req) = parse::<ChangeRequest>(&event) {
                    let path = self.absolute(&req.path);
                    self.edit(&path, req.contents);
                }
            }
            events::TAB_FOCUS => {
                if let Some(req) = parse::<PathRequest>(&event) {
                    let path = self.absolute(&req.path);
                    self.set_focus(Some(path));
                }
            }
            events::FILE_CREATE => {
                if let Some(req) = parse::<CreateRequest>(&event) {
                    self.create(req, event.data).await;
                }
            }
            events::UPLOAD_SUCCESS => self.upload_succeeded(event.data),
            events::UPLOAD_FAILED => self.upload_failed(event.data),
            events::CLEAR_OPEN => {
                if self.authorized(&event) {
                    self.clear_open().await;
                }
            }
            events::CLEAR_UPLOADS => {
                if self.authorized(&event) {
                    self.uploads.clear();
                    self.publish_uploads();
                }
            }
            events::CONNECTED => self.resync(),
            other => debug!(kind = other, "Ignoring event"),
        }
    }

    pub(crate) async fn handle_internal(&mut self, msg: Internal) {
        match msg {
            Internal::Flush { path, generation } => {
                if self.saves.fire(&path, generation) {
                    self.flush(&path).await;
                }
            }
            Internal::Settled { path, generation } => {
                if self.settles.fire(&path, generation) {
                    if let Some(node) = self.registry.get_mut(&path) {
                        node.saving = false;
                    }
                }
            }
            Internal::Changed(paths) => self.handle_changes(paths).await,
        }
    }

    // ── operations ─────────────────────────────────────────────────────

    /// Register `path` and publish it. Re-publishes an already-open node.
    pub(crate) async fn open(&mut self, path: &Path) {
        if let Some(node) = self.registry.get(path) {
            let data = to_value(node);
            self.publish(events::FILE_OPENED, data);
            return;
        }

        let meta = match tokio::fs::metadata(path).await {
            Ok(meta) => meta,
            Err(e) => return self.publish_error(SessionError::io(path, e)),
        };

        let mut node = FileNode::new(path, &meta);
        if node.stat.size > self.config.open_max_size {
            let message = format!("{} is too big to open interactively.", node.name);
            self.bus.publish(
                events::notification(
                    "file",
                    "open-failed",
                    message,
                    json!({ "size": node.stat.size, "limit": self.config.open_max_size }),
                )
                .from_source(self.origin),
            );
            return;
        }

        if node.node_type == NodeType::File {
            match tokio::fs::read(path).await {
                Ok(data) => node.set_contents(&data),
                Err(e) => return self.publish_error(SessionError::io(path, e)),
            }
        }

        debug!(path = %path.display(), binary = node.binary, "Opened");
        self.registry.insert(path.to_path_buf(), node);
        self.set_focus(Some(path.to_path_buf()));
        if let Some(node) = self.registry.get(path) {
            let data = to_value(node);
            self.publish(events::FILE_OPENED, data);
        }
    }

    /// Forget `path`. Pending write-back is dropped; disk is untouched.
    pub(crate) fn close(&mut self, path: &Path) {
        if self.registry.remove(path).is_some() {
            self.saves.cancel(&path.to_path_buf());
            self.settles.cancel(&path.to_path_buf());
            if self.focus.as_deref() == Some(path) {
                self.focus = None;
            }
            debug!(path = %path.display(), "Closed");
        }
    }

    /// Replace contents and (re)arm the trailing-edge write-back.
    pub(crate) fn edit(&mut self, path: &Path, contents: String) {
        let Some(node) = self.registry.get_mut(path) else {
            debug!(path = %path.display(), "Edit for unopened path");
            return;
        };
        if node.node_type != NodeType::File {
            return;
        }
        node.contents = Some(contents);

        let key = path.to_path_buf();
        let tx = self.internal_tx.clone();
        self.saves.arm(key.clone(), move |generation| {
            let _ = tx.send(Internal::Flush {
                path: key,
                generation,
            });
        });
    }

    async fn flush(&mut self, path: &Path) {
        let Some(node) = self.registry.get_mut(path) else {
            return;
        };
        let bytes = match node.disk_bytes() {
            Ok(bytes) => bytes,
            Err(source) => {
                return self.publish_error(SessionError::Hex {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        node.saving = true;
        // A settle still pending from an earlier write must not clear this one early
        self.settles.cancel(&path.to_path_buf());

        debug!(path = %path.display(), bytes = bytes.len(), "Saving");
        if let Err(e) = tokio::fs::write(path, &bytes).await {
            if let Some(node) = self.registry.get_mut(path) {
                node.saving = false;
            }
            return self.publish_error(SessionError::io(path, e));
        }
        SessionMetrics::incr(&self.metrics.file_writes);

        if let (Ok(meta), Some(node)) = (tokio::fs::metadata(path).await, self.registry.get_mut(path)) {
            node.stat = node::FileStat::from_metadata(&meta);
        }

        let key = path.to_path_buf();
        let tx = self.internal_tx.clone();
        self.settles.arm(key.clone(), move |generation| {
            let _ = tx.send(Internal::Settled {
                path: key,
                generation,
            });
        });
    }

    async fn create(&mut self, req: CreateRequest, request: Value) {
        let target = self.absolute(&req.path).join(&req.name);

        if tokio::fs::symlink_metadata(&target).await.is_ok() {
            let message = format!("{} already exists", req.name);
            return self.notify("create", "failed", message, request);
        }

        match req.kind {
            CreateKind::Directory => match tokio::fs::create_dir_all(&target).await {
                Ok(()) => {
                    let message = format!("New folder {} created", req.name);
                    self.notify("create", "success", message, request);
                }
                Err(e) => {
                    warn!(path = %target.display(), "Create folder failed: {}", e);
                    let message = format!("Failed to create folder {}", req.name);
                    self.notify("create", "failed", message, request);
                }
            },
            CreateKind::File => {
                let created = tokio::fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(&target)
                    .await;
                match created {
                    Ok(_) => {
                        let message = format!("New file {} created", req.name);
                        self.notify("create", "success", message, request);
                        self.open(&target).await;
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                        let message = format!("{} already exists", req.name);
                        self.notify("create", "failed", message, request);
                    }
                    Err(e) => {
                        warn!(path = %target.display(), "Create file failed: {}", e);
                        let message = format!("Failed to create file {}", req.name);
                        self.notify("create", "failed", message, request);
                    }
                }
            }
        }
    }

    fn upload_succeeded(&mut self, data: Value) {
        let Some(id) = upload_id(&data) else {
            debug!("Upload report without id");
            return;
        };
        let message = format!("{} uploaded", str_field(&data, "name"));
        self.uploads.insert(id, data);
        self.notify("upload", "success", message, Value::Null);
    }

    fn upload_failed(&mut self, data: Value) {
        if let Some(id) = upload_id(&data) {
            self.uploads.remove(&id);
        }
        let message = data
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{} failed to upload", str_field(&data, "name")));
        self.notify("upload", "failed", message, Value::Null);
    }

    async fn clear_open(&mut self) {
        let paths: Vec<PathBuf> = self.registry.keys().cloned().collect();
        for path in &paths {
            self.publish(events::FILE_CLOSED, json!({ "path": path }));
        }
        self.registry.clear();
        self.saves.cancel_all();
        self.settles.cancel_all();
        self.focus = None;
        info!(closed = paths.len(), "Cleared open files");
        self.open_defaults().await;
    }

    /// Replay full state for a newly attached viewer.
    pub(crate) fn resync(&mut self) {
        self.publish_tree();
        let nodes: Vec<Value> = self
            .registry
            .values()
            .map(|node| {
                let mut node = node.clone();
                node.focus = false;
                to_value(&node)
            })
            .collect();
        for data in nodes {
            self.publish(events::FILE_OPENED, data);
        }
        self.publish_uploads();
        if let Some(focus) = self.focus.clone() {
            self.publish(events::TAB_FOCUS, json!({ "path": focus }));
        }
    }

    pub(crate) async fn handle_changes(&mut self, mut paths: Vec<PathBuf>) {
        paths.sort();
        paths.dedup();

        let mut structural = false;
        for path in paths {
            if self.scanner.is_excluded_path(&self.config.home, &path) || self.too_deep(&path) {
                continue;
            }
            let registered = self.registry.contains_key(&path);
            let Some(kind) = watcher::classify(&path, &self.tree, registered) else {
                continue;
            };

            self.bus
                .publish(events::fs_event(kind.as_str(), &path).from_source(self.origin));

            structural |= kind.is_structural();
            match kind {
                WatchKind::Change if registered => self.reload(&path).await,
                WatchKind::Unlink | WatchKind::UnlinkDir => {
                    let removed: Vec<PathBuf> = self
                        .registry
                        .keys()
                        .filter(|p| p.starts_with(&path))
                        .cloned()
                        .collect();
                    for p in removed {
                        self.publish(events::FILE_CLOSED, json!({ "path": p }));
                        self.close(&p);
                    }
                }
                _ => {}
            }
        }

        if structural {
            self.rescan().await;
            self.publish_tree();
        }
    }

    async fn reload(&mut self, path: &Path) {
        let saving = self.registry.get(path).map(|n| n.saving).unwrap_or(true);
        if saving {
            SessionMetrics::incr(&self.metrics.suppressed_reloads);
            debug!(path = %path.display(), "Change during save, not reloading");
            return;
        }

        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) => return self.publish_error(SessionError::io(path, e)),
        };
        let meta = tokio::fs::metadata(path).await.ok();

        // The node may have been closed or started saving while the read was in flight
        let Some(node) = self.registry.get_mut(path) else {
            return;
        };
        if node.saving {
            return;
        }
        node.set_contents(&data);
        if let Some(meta) = meta {
            node.stat = node::FileStat::from_metadata(&meta);
        }
        let data = to_value(node);
        SessionMetrics::incr(&self.metrics.file_reloads);
        debug!(path = %path.display(), "External change reloaded");
        self.publish(events::FILE_UPDATED, data);
    }

    // ── helpers ────────────────────────────────────────────────────────

    async fn open_defaults(&mut self) {
        let defaults = self.config.open.clone();
        for path in &defaults {
            self.open(path).await;
        }
        let first = defaults.into_iter().find(|p| self.registry.contains_key(p));
        self.set_focus(first);
    }

    async fn rescan(&mut self) {
        let scanner = self.scanner.clone();
        let home = self.config.home.clone();
        match tokio::task::spawn_blocking(move || scanner.scan(&home)).await {
            Ok(snapshot) => self.tree = snapshot,
            Err(e) => warn!("Tree scan failed: {}", e),
        }
        self.watch_tree();
    }

    /// Watch every scanned directory whose entries are still within `depth`.
    /// Excluded directories never enter the tree, so they are never watched.
    fn watch_tree(&mut self) {
        let Some(watcher) = self.watcher.as_mut() else {
            return;
        };
        let home = &self.config.home;
        let depth = self.config.depth;
        let dirs = self
            .tree
            .directories()
            .filter(|dir| {
                dir.strip_prefix(home)
                    .map(|rel| rel.components().count() < depth)
                    .unwrap_or(false)
            })
            .map(Path::to_path_buf);
        let watched = watcher.watch_dirs(dirs);
        debug!(watched, "Watching workspace directories");
    }

    /// At most one node carries `focus`.
    fn set_focus(&mut self, path: Option<PathBuf>) {
        for (p, node) in self.registry.iter_mut() {
            node.focus = path.as_deref() == Some(p.as_path());
        }
        self.focus = path;
    }

    fn authorized(&self, event: &Event) -> bool {
        let credential = event.data_as::<AuthRequest>().ok().and_then(|r| r.auth);
        let ok = self.authorizer.validate(credential.as_deref());
        if !ok {
            debug!(kind = %event.kind, source = ?event.source, "Unauthorized request ignored");
        }
        ok
    }

    fn absolute(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config.home.join(path)
        }
    }

    fn too_deep(&self, path: &Path) -> bool {
        path.strip_prefix(&self.config.home)
            .map(|rel| rel.components().count() > self.config.depth)
            .unwrap_or(false)
    }

    fn publish(&self, kind: &str, data: Value) {
        self.bus.publish(Event::new(kind, data).from_source(self.origin));
    }

    fn publish_tree(&self) {
        let data = self.tree.root.as_ref().map(to_value).unwrap_or(Value::Null);
        self.publish(events::TREE_UPDATE, data);
    }

    fn publish_uploads(&self) {
        let data = serde_json::to_value(&self.uploads).unwrap_or(Value::Null);
        self.publish(events::UPLOAD_LIST, data);
    }

    fn publish_error(&self, err: SessionError) {
        warn!("{}", err);
        self.publish(events::ERROR, err.to_event_data());
    }

    fn notify(&self, domain: &str, outcome: &str, message: String, extra: Value) {
        self.bus
            .publish(events::notification(domain, outcome, message, extra).from_source(self.origin));
    }
}

fn parse<T: serde::de::DeserializeOwned>(event: &Event) -> Option<T> {
    match event.data_as::<T>() {
        Ok(req) => Some(req),
        Err(e) => {
            debug!(kind = %event.kind, "Malformed payload: {}", e);
            None
        }
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn upload_id(data: &Value) -> Option<String> {
    match data.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn str_field<'a>(data: &'a Value, key: &str) -> &'a str {
    data.get(key).and_then(Value::as_str).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{AllowAll, drain, files_config, kinds};
    use std::time::Duration;

    struct Harness {
        sync: FileSync,
        internal_rx: mpsc::UnboundedReceiver<Internal>,
        observer: Subscription,
        _tmp: tempfile::TempDir,
        home: PathBuf,
    }

    fn harness_with(authorizer: Arc<dyn Authorizer>, open: &[&str]) -> Harness {
        let tmp = tempfile::tempdir().unwrap();
        let home = tmp.path().canonicalize().unwrap();
        for name in open {
            std::fs::write(home.join(name), format!("{} contents", name)).unwrap();
        }
        let mut config = files_config(&home);
        config.open = open.iter().map(|n| home.join(n)).collect();

        let bus = EventBus::new();
        let observer = bus.subscribe(Filter::all());
        let (sync, internal_rx) =
            FileSync::new(config, bus, authorizer, Arc::new(SessionMetrics::new()));
        Harness {
            sync,
            internal_rx,
            observer,
            _tmp: tmp,
            home,
        }
    }

    fn harness() -> Harness {
        harness_with(Arc::new(AllowAll), &[])
    }

    impl Harness {
        /// Deliver the next internal completion (timer fire) to the actor.
        async fn pump(&mut self) {
            let msg = tokio::time::timeout(Duration::from_secs(5), self.internal_rx.recv())
                .await
                .expect("timed out waiting for internal message")
                .expect("internal channel closed");
            self.sync.handle_internal(msg).await;
        }
    }

    #[tokio::test]
    async fn test_open_registers_and_publishes_once() {
        let mut h = harness();
        let path = h.home.join("a.txt");
        std::fs::write(&path, "hello").unwrap();

        h.sync.open(&path).await;

        let published = drain(&mut h.observer);
        assert_eq!(kinds(&published), vec!["files:file:opened"]);
        assert_eq!(published[0].data["contents"], "hello");
        assert_eq!(published[0].data["saving"], false);
        assert_eq!(published[0].data["focus"], true);
        assert_eq!(published[0].source, Some(h.sync.origin));

        let node = h.sync.registry.get(&path).unwrap();
        assert!(!node.saving);
        assert!(!node.binary);
    }

    #[tokio::test]
    async fn test_open_twice_republishes_without_rereading() {
        let mut h = harness();
        let path = h.home.join("a.txt");
        std::fs::write(&path, "first").unwrap();

        h.sync.open(&path).await;
        std::fs::write(&path, "second").unwrap();
        h.sync.open(&path).await;

        let published = drain(&mut h.observer);
        assert_eq!(published.len(), 2);
        assert_eq!(published[1].data["contents"], "first");
        assert_eq!(h.sync.registry.len(), 1);
    }

    #[tokio::test]
    async fn test_open_binary_is_hex() {
        let mut h = harness();
        let path = h.home.join("image.png");
        std::fs::write(&path, [0x89, b'P', b'N', b'G']).unwrap();

        h.sync.open(&path).await;

        let published = drain(&mut h.observer);
        assert_eq!(published[0].data["binary"], true);
        assert_eq!(published[0].data["contents"], "89504e47");
    }

    #[tokio::test]
    async fn test_open_too_large_is_refused() {
        let mut h = harness();
        h.sync.config.open_max_size = 4;
        let path = h.home.join("big.txt");
        std::fs::write(&path, "0123456789").unwrap();

        h.sync.open(&path).await;

        let published = drain(&mut h.observer);
        assert_eq!(kinds(&published), vec!["notification:file:open-failed"]);
        assert_eq!(published[0].data["size"], 10);
        assert_eq!(published[0].data["limit"], 4);
        assert_eq!(published[0].data["message"], "big.txt is too big to open interactively.");
        assert!(h.sync.registry.is_empty());
    }

    #[tokio::test]
    async fn test_open_missing_publishes_error() {
        let mut h = harness();
        let path = h.home.join("nope.txt");

        h.sync.open(&path).await;

        let published = drain(&mut h.observer);
        assert_eq!(kinds(&published), vec!["error"]);
        assert_eq!(published[0].data["path"], path.to_string_lossy().as_ref());
    }

    #[tokio::test]
    async fn test_open_directory_has_no_contents() {
        let mut h = harness();
        let dir = h.home.join("src");
        std::fs::create_dir(&dir).unwrap();

        h.sync.open(&dir).await;

        let node = h.sync.registry.get(&dir).unwrap();
        assert_eq!(node.node_type, NodeType::Directory);
        assert!(node.contents.is_none());
    }

    #[tokio::test]
    async fn test_two_edits_write_once_with_latest_contents() {
        let mut h = harness();
        let path = h.home.join("a.txt");
        std::fs::write(&path, "v0").unwrap();
        h.sync.open(&path).await;

        h.sync.edit(&path, "v1".into());
        h.sync.edit(&path, "v2".into());
        h.pump().await;

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "v2");
        assert_eq!(h.sync.metrics.snapshot().files.writes, 1);
        assert!(h.sync.registry[&path].saving);

        // Settle clears the flag
        h.pump().await;
        assert!(!h.sync.registry[&path].saving);
        assert_eq!(h.sync.metrics.snapshot().files.writes, 1);
    }

    #[tokio::test]
    async fn test_binary_edit_is_hex_decoded_on_write() {
        let mut h = harness();
        let path = h.home.join("blob.bin");
        std::fs::write(&path, [0xff]).unwrap();
        h.sync.open(&path).await;

        h.sync.edit(&path, "cafe".into());
        h.pump().await;

        assert_eq!(std::fs::read(&path).unwrap(), vec![0xca, 0xfe]);
    }

    #[tokio::test]
    async fn test_close_cancels_pending_write() {
        let mut h = harness();
        let path = h.home.join("a.txt");
        std::fs::write(&path, "orig").unwrap();
        h.sync.open(&path).await;

        h.sync.edit(&path, "changed".into());
        h.sync.close(&path);

        tokio::time::sleep(h.sync.config.save_debounce * 3).await;
        assert!(h.internal_rx.try_recv().is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "orig");
        assert!(h.sync.registry.is_empty());
    }

    #[tokio::test]
    async fn test_external_change_while_saving_is_ignored() {
        let mut h = harness();
        let path = h.home.join("a.txt");
        std::fs::write(&path, "v0").unwrap();
        h.sync.open(&path).await;
        h.sync.rescan().await;
        h.sync.registry.get_mut(&path).unwrap().saving = true;
        drain(&mut h.observer);

        std::fs::write(&path, "external").unwrap();
        h.sync.handle_changes(vec![path.clone()]).await;

        let published = drain(&mut h.observer);
        assert_eq!(kinds(&published), vec![format!("fs:change:{}", path.display())]);
        assert_eq!(h.sync.registry[&path].contents.as_deref(), Some("v0"));
        assert_eq!(h.sync.metrics.snapshot().files.suppressed_reloads, 1);
    }

    #[tokio::test]
    async fn test_external_change_reloads() {
        let mut h = harness();
        let path = h.home.join("a.txt");
        std::fs::write(&path, "v0").unwrap();
        h.sync.open(&path).await;
        h.sync.rescan().await;
        drain(&mut h.observer);

        std::fs::write(&path, "external").unwrap();
        h.sync.handle_changes(vec![path.clone()]).await;

        let published = drain(&mut h.observer);
        assert_eq!(
            kinds(&published),
            vec![format!("fs:change:{}", path.display()), "files:file:updated".to_string()]
        );
        assert_eq!(published[1].data["contents"], "external");
        assert_eq!(published[0].data["type"], "change");
    }

    #[tokio::test]
    async fn test_deletion_closes_and_rescans() {
        let mut h = harness();
        let path = h.home.join("a.txt");
        std::fs::write(&path, "v0").unwrap();
        h.sync.open(&path).await;
        h.sync.rescan().await;
        drain(&mut h.observer);

        std::fs::remove_file(&path).unwrap();
        h.sync.handle_changes(vec![path.clone()]).await;

        let published = drain(&mut h.observer);
        assert_eq!(
            kinds(&published),
            vec![
                format!("fs:unlink:{}", path.display()),
                "files:file:closed".to_string(),
                "files:tree:update".to_string(),
            ]
        );
        assert!(h.sync.registry.is_empty());
        assert!(h.sync.tree.node_type(&path).is_none());
    }

    #[tokio::test]
    async fn test_deleted_directory_closes_nested_files() {
        let mut h = harness();
        let docs = h.home.join("docs");
        std::fs::create_dir_all(docs.join("sub")).unwrap();
        std::fs::write(docs.join("a.txt"), "a").unwrap();
        std::fs::write(docs.join("sub/b.txt"), "b").unwrap();
        std::fs::write(h.home.join("docs.txt"), "kept").unwrap();
        h.sync.open(&docs.join("a.txt")).await;
        h.sync.open(&docs.join("sub/b.txt")).await;
        h.sync.open(&h.home.join("docs.txt")).await;
        h.sync.rescan().await;
        drain(&mut h.observer);

        std::fs::remove_dir_all(&docs).unwrap();
        h.sync.handle_changes(vec![docs.clone()]).await;

        let published = drain(&mut h.observer);
        assert_eq!(
            kinds(&published),
            vec![
                format!("fs:unlinkDir:{}", docs.display()),
                "files:file:closed".to_string(),
                "files:file:closed".to_string(),
                "files:tree:update".to_string(),
            ]
        );
        assert_eq!(published[1].data["path"], json!(docs.join("a.txt")));
        assert_eq!(published[2].data["path"], json!(docs.join("sub/b.txt")));
        // A sibling sharing the name prefix stays open
        let open: Vec<&PathBuf> = h.sync.registry.keys().collect();
        assert_eq!(open, vec![&h.home.join("docs.txt")]);
        assert!(h.sync.tree.node_type(&docs).is_none());
    }

    #[tokio::test]
    async fn test_rename_is_unlink_then_add() {
        let mut h = harness();
        let from = h.home.join("draft.md");
        let to = h.home.join("final.md");
        std::fs::write(&from, "text").unwrap();
        h.sync.open(&from).await;
        h.sync.rescan().await;
        drain(&mut h.observer);

        std::fs::rename(&from, &to).unwrap();
        h.sync.handle_changes(vec![to.clone(), from.clone()]).await;

        let published = drain(&mut h.observer);
        assert_eq!(
            kinds(&published),
            vec![
                format!("fs:unlink:{}", from.display()),
                "files:file:closed".to_string(),
                format!("fs:add:{}", to.display()),
                "files:tree:update".to_string(),
            ]
        );
        assert!(h.sync.registry.is_empty());
        assert!(h.sync.tree.node_type(&from).is_none());
        assert_eq!(h.sync.tree.node_type(&to), Some(NodeType::File));
    }

    #[tokio::test]
    async fn test_watches_scanned_directories_only() {
        let mut h = harness();
        std::fs::create_dir_all(h.home.join("src/nested")).unwrap();
        std::fs::create_dir_all(h.home.join("node_modules/pkg")).unwrap();

        h.sync.start().await;
        let watching = |h: &Harness, rel: &str| {
            h.sync.watcher.as_ref().unwrap().is_watching(&h.home.join(rel))
        };
        assert!(h.sync.watcher.as_ref().unwrap().is_watching(&h.home));
        assert!(watching(&h, "src"));
        assert!(watching(&h, "src/nested"));
        assert!(!watching(&h, "node_modules"));
        assert!(!watching(&h, "node_modules/pkg"));

        let later = h.home.join("later");
        std::fs::create_dir(&later).unwrap();
        h.sync.handle_changes(vec![later]).await;
        assert!(watching(&h, "later"));

        std::fs::remove_dir_all(h.home.join("src")).unwrap();
        h.sync.handle_changes(vec![h.home.join("src")]).await;
        assert!(!watching(&h, "src"));
    }

    #[tokio::test]
    async fn test_added_directory_updates_tree() {
        let mut h = harness();
        h.sync.rescan().await;
        let dir = h.home.join("newdir");
        std::fs::create_dir(&dir).unwrap();

        h.sync.handle_changes(vec![dir.clone(), dir.clone()]).await;

        let published = drain(&mut h.observer);
        assert_eq!(
            kinds(&published),
            vec![format!("fs:addDir:{}", dir.display()), "files:tree:update".to_string()]
        );
        assert_eq!(h.sync.tree.node_type(&dir), Some(NodeType::Directory));
    }

    #[tokio::test]
    async fn test_excluded_paths_are_ignored() {
        let mut h = harness();
        h.sync.rescan().await;
        let ignored = h.home.join("node_modules").join("x.js");
        std::fs::create_dir_all(ignored.parent().unwrap()).unwrap();
        std::fs::write(&ignored, "").unwrap();

        h.sync.handle_changes(vec![ignored]).await;

        assert!(drain(&mut h.observer).is_empty());
    }

    #[tokio::test]
    async fn test_create_existing_fails_without_mutation() {
        let mut h = harness();
        std::fs::write(h.home.join("a.txt"), "keep").unwrap();
        let data = json!({ "path": h.home, "name": "a.txt", "type": "file" });

        h.sync
            .handle_event(Event::new(events::FILE_CREATE, data))
            .await;

        let published = drain(&mut h.observer);
        assert_eq!(kinds(&published), vec!["notification:create:failed"]);
        assert_eq!(published[0].data["message"], "a.txt already exists");
        assert_eq!(std::fs::read_to_string(h.home.join("a.txt")).unwrap(), "keep");
        assert!(h.sync.registry.is_empty());
    }

    #[tokio::test]
    async fn test_create_file_opens_it() {
        let mut h = harness();
        let data = json!({ "path": h.home, "name": "new.txt", "type": "file" });

        h.sync
            .handle_event(Event::new(events::FILE_CREATE, data))
            .await;

        let published = drain(&mut h.observer);
        assert_eq!(
            kinds(&published),
            vec!["notification:create:success", "files:file:opened"]
        );
        assert_eq!(published[0].data["message"], "New file new.txt created");
        assert!(h.sync.registry.contains_key(&h.home.join("new.txt")));
    }

    #[tokio::test]
    async fn test_create_directory_is_recursive() {
        let mut h = harness();
        let data = json!({ "path": h.home.join("a/b"), "name": "c", "type": "directory" });

        h.sync
            .handle_event(Event::new(events::FILE_CREATE, data))
            .await;

        let published = drain(&mut h.observer);
        assert_eq!(kinds(&published), vec!["notification:create:success"]);
        assert!(h.home.join("a/b/c").is_dir());
        assert!(h.sync.registry.is_empty());
    }

    #[tokio::test]
    async fn test_focus_is_exclusive() {
        let mut h = harness();
        for name in ["a.txt", "b.txt"] {
            std::fs::write(h.home.join(name), name).unwrap();
            h.sync.open(&h.home.join(name)).await;
        }

        let data = json!({ "path": h.home.join("a.txt") });
        h.sync.handle_event(Event::new(events::TAB_FOCUS, data)).await;

        let focused: Vec<_> = h.sync.registry.values().filter(|n| n.focus).collect();
        assert_eq!(focused.len(), 1);
        assert_eq!(focused[0].name, "a.txt");
    }

    #[tokio::test]
    async fn test_connected_replays_state() {
        let mut h = harness_with(Arc::new(AllowAll), &["README.md"]);
        h.sync.start().await;
        h.sync.handle_event(Event::new(events::UPLOAD_SUCCESS, json!({ "id": "u1", "name": "pic.png" })))
            .await;
        drain(&mut h.observer);

        h.sync.handle_event(Event::new(events::CONNECTED, Value::Null)).await;

        let published = drain(&mut h.observer);
        assert_eq!(
            kinds(&published),
            vec![
                "files:tree:update",
                "files:file:opened",
                "files:upload:list",
                "editor:tab:focus"
            ]
        );
        assert_eq!(published[1].data["focus"], false);
        assert_eq!(published[2].data["u1"]["name"], "pic.png");
        assert_eq!(published[3].data["path"], h.home.join("README.md").to_string_lossy().as_ref());
        // Replay does not disturb the registry's own focus flag
        assert!(h.sync.registry[&h.home.join("README.md")].focus);
    }

    #[tokio::test]
    async fn test_upload_reports() {
        let mut h = harness();

        h.sync.handle_event(Event::new(events::UPLOAD_SUCCESS, json!({ "id": 7, "name": "a.zip" })))
            .await;
        h.sync.handle_event(Event::new(events::UPLOAD_FAILED, json!({ "id": 7, "name": "a.zip" })))
            .await;
        h.sync.handle_event(Event::new(
            events::UPLOAD_FAILED,
            json!({ "id": 8, "name": "b.zip", "message": "disk full" }),
        ))
        .await;

        let published = drain(&mut h.observer);
        assert_eq!(
            kinds(&published),
            vec![
                "notification:upload:success",
                "notification:upload:failed",
                "notification:upload:failed"
            ]
        );
        assert_eq!(published[0].data["message"], "a.zip uploaded");
        assert_eq!(published[1].data["message"], "a.zip failed to upload");
        assert_eq!(published[2].data["message"], "disk full");
        assert!(h.sync.uploads.is_empty());
    }

    #[tokio::test]
    async fn test_unauthorized_clear_is_ignored() {
        let mut h = harness_with(Arc::new(crate::auth::TokenAuthorizer::new(Some("tok".into()))), &[]);
        let path = h.home.join("a.txt");
        std::fs::write(&path, "x").unwrap();
        h.sync.open(&path).await;
        h.sync.uploads.insert("u".into(), json!({ "id": "u" }));
        drain(&mut h.observer);

        h.sync.handle_event(Event::new(events::CLEAR_OPEN, json!({ "auth": "bad" }))).await;
        h.sync.handle_event(Event::new(events::CLEAR_UPLOADS, json!({}))).await;

        assert!(drain(&mut h.observer).is_empty());
        assert_eq!(h.sync.registry.len(), 1);
        assert_eq!(h.sync.uploads.len(), 1);
    }

    #[tokio::test]
    async fn test_clear_open_closes_and_reopens_defaults() {
        let mut h = harness_with(Arc::new(crate::auth::TokenAuthorizer::new(Some("tok".into()))), &["README.md"]);
        h.sync.start().await;
        let extra = h.home.join("extra.txt");
        std::fs::write(&extra, "x").unwrap();
        h.sync.open(&extra).await;
        drain(&mut h.observer);

        h.sync.handle_event(Event::new(events::CLEAR_OPEN, json!({ "auth": "tok" }))).await;

        let published = drain(&mut h.observer);
        assert_eq!(
            kinds(&published),
            vec!["files:file:closed", "files:file:closed", "files:file:opened"]
        );
        assert_eq!(h.sync.registry.len(), 1);
        assert!(h.sync.registry.contains_key(&h.home.join("README.md")));
        assert_eq!(h.sync.focus, Some(h.home.join("README.md")));
    }

    #[tokio::test]
    async fn test_own_publications_are_not_consumed() {
        let h = harness();
        let mut commands = h.sync.subscribe();

        h.sync.publish(events::FILE_CLOSED, json!({ "path": "/x" }));
        h.sync.bus.publish(Event::new(events::FILE_CLOSED, json!({ "path": "/y" })));
        h.sync.bus.publish(Event::new(events::TREE_UPDATE, json!({})));

        let received: Vec<Event> = std::iter::from_fn(|| commands.try_recv()).collect();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].data["path"], "/y");
    }
}
