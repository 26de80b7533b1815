//! Event Bus - in-process publish/subscribe hub
//!
//! Every stateful component of a session talks to the others only through a
//! shared [`EventBus`]. The bus knows nothing about connections or files: each
//! subscription carries a [`Filter`] predicate that is evaluated at publish
//! time, and matching events are queued on the subscriber's own FIFO channel.
//!
//! # Example
//!
//! ```no_run
//! use event_bus::{Event, EventBus, Filter};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let bus = EventBus::new();
//!     let me = uuid::Uuid::new_v4();
//!
//!     // Receive everything except what `me` published itself.
//!     let mut sub = bus.subscribe(Filter::except_source(me));
//!
//!     bus.publish(Event::new("files:file:open", json!({ "path": "/tmp/a" })).from_source(me));
//!     bus.publish(Event::new("files:tree:update", json!({})));
//!
//!     let event = sub.recv().await.unwrap();
//!     assert_eq!(event.kind, "files:tree:update");
//! }
//! ```

mod bus;
mod event;
mod filter;

pub use bus::{EventBus, Subscription, SubscriptionId};
pub use event::{Event, SourceId};
pub use filter::Filter;
