use std::fmt;
use std::sync::Arc;

use crate::event::{Event, SourceId};

/// Per-subscription delivery predicate, evaluated on every publish.
///
/// Filters run while the bus registry is locked, so they must be cheap and
/// must never publish.
#[derive(Clone)]
pub struct Filter(Arc<dyn Fn(&Event) -> bool + Send + Sync>);

impl Filter {
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(predicate))
    }

    /// Accept every event.
    pub fn all() -> Self {
        Self::new(|_| true)
    }

    /// Echo suppression: accept everything not published by `source`.
    pub fn except_source(source: SourceId) -> Self {
        Self::new(move |event| event.source != Some(source))
    }

    /// Accept events whose type is one of `kinds`, exactly.
    pub fn kinds<I, S>(kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let kinds: Vec<String> = kinds.into_iter().map(Into::into).collect();
        Self::new(move |event| kinds.iter().any(|k| *k == event.kind))
    }

    /// Accept events whose type lies under one of the given hierarchical prefixes.
    pub fn prefixes<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let prefixes: Vec<String> = prefixes.into_iter().map(Into::into).collect();
        Self::new(move |event| prefixes.iter().any(|p| event.is_within(p)))
    }

    pub fn and(self, other: Filter) -> Self {
        Self::new(move |event| self.accepts(event) && other.accepts(event))
    }

    pub fn accepts(&self, event: &Event) -> bool {
        (self.0)(event)
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Filter(..)")
    }
}
