use std::path::Path;
use std::time::Duration;

use event_bus::{Event, Subscription};

use crate::auth::Authorizer;
use crate::config::FilesConfig;

pub struct AllowAll;

impl Authorizer for AllowAll {
    fn validate(&self, _credential: Option<&str>) -> bool {
        true
    }
}

/// Everything queued on `sub` right now.
pub fn drain(sub: &mut Subscription) -> Vec<Event> {
    std::iter::from_fn(|| sub.try_recv()).collect()
}

pub fn kinds(events: &[Event]) -> Vec<String> {
    events.iter().map(|e| e.kind.clone()).collect()
}

/// Short timers so debounce tests finish quickly.
pub fn files_config(home: &Path) -> FilesConfig {
    FilesConfig {
        home: home.to_path_buf(),
        open: Vec::new(),
        exclusions: vec![".git".into(), "node_modules".into()],
        depth: 10,
        open_max_size: 1024 * 1024,
        save_debounce: Duration::from_millis(40),
        watch_debounce: Duration::from_millis(20),
    }
}
