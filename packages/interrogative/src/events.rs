//! Event type names and payload builders shared by the session components.
//!
//! Names are part of the wire protocol with viewers and must not change.

use std::path::Path;

use event_bus::Event;
use serde_json::{Map, Value, json};

// Session lifecycle
pub const CONNECTED: &str = "connected";
pub const REGISTER: &str = "register";
pub const ERROR: &str = "error";

// File-state synchronizer
pub const FILE_OPEN: &str = "files:file:open";
pub const FILE_OPENED: &str = "files:file:opened";
pub const FILE_UPDATED: &str = "files:file:updated";
pub const FILE_CLOSED: &str = "files:file:closed";
pub const FILE_CREATE: &str = "files:file:create";
pub const TREE_UPDATE: &str = "files:tree:update";
pub const UPLOAD_LIST: &str = "files:upload:list";
pub const UPLOAD_SUCCESS: &str = "file:upload:success";
pub const UPLOAD_FAILED: &str = "file:upload:failed";
pub const DOCUMENT_CHANGE: &str = "editor:document:change";
pub const TAB_FOCUS: &str = "editor:tab:focus";
pub const CLEAR_OPEN: &str = "tools:files:clear-open";
pub const CLEAR_UPLOADS: &str = "tools:files:clear-uploads";

// Git snapshot cache
pub const GIT_SVG: &str = "git:repository:svg";

/// Commands the file-state synchronizer reacts to.
pub const FILE_COMMANDS: &[&str] = &[
    FILE_OPEN,
    FILE_CLOSED,
    FILE_CREATE,
    DOCUMENT_CHANGE,
    TAB_FOCUS,
    UPLOAD_SUCCESS,
    UPLOAD_FAILED,
    CLEAR_OPEN,
    CLEAR_UPLOADS,
    CONNECTED,
];

/// `fs:<kind>:<path>` mirror of a raw watcher notification.
pub fn fs_event(kind: &str, path: &Path) -> Event {
    Event::new(
        format!("fs:{}:{}", kind, path.display()),
        json!({ "type": kind, "filename": path }),
    )
}

/// `notification:<domain>:<outcome>` with a `{level, message}` payload.
///
/// `level` is `success` for the `success` outcome and `failed` otherwise.
/// Extra object fields are merged in under the level and message.
pub fn notification(domain: &str, outcome: &str, message: impl Into<String>, extra: Value) -> Event {
    let mut data = match extra {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    let level = if outcome == "success" { "success" } else { "failed" };
    data.insert("level".into(), Value::from(level));
    data.insert("message".into(), Value::from(message.into()));
    Event::new(format!("notification:{}:{}", domain, outcome), Value::Object(data))
}
