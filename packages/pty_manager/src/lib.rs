//! PTY Manager - process lifecycle on a pseudo-terminal
//!
//! Spawns one command per PTY behind an actor. Callers hold a cloneable
//! [`PtyHandle`] to write input, resize, signal the process and subscribe to
//! its output. There is no output backlog: a subscriber sees output produced
//! after it subscribed.
//!
//! # Example
//!
//! ```no_run
//! use pty_manager::{PtyActor, PtyConfig, PtyEvent};
//!
//! #[tokio::main]
//! async fn main() {
//!     let handle = PtyActor::spawn(PtyConfig {
//!         command: "/bin/bash".to_string(),
//!         working_dir: Some("/tmp".into()),
//!         ..Default::default()
//!     })
//!     .unwrap();
//!
//!     let mut rx = handle.subscribe();
//!     handle.write_str("echo hello\n").await.unwrap();
//!
//!     while let Ok(event) = rx.recv().await {
//!         match event {
//!             PtyEvent::Output { data } => print!("{}", String::from_utf8_lossy(&data)),
//!             PtyEvent::Exited => break,
//!         }
//!     }
//! }
//! ```

mod error;
pub mod pty;

pub use error::PtyError;
pub use pty::{PtyActor, PtyConfig, PtyEvent, PtyHandle, PtySignal, PtyState};
