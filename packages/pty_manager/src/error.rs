use thiserror::Error;

#[derive(Debug, Error)]
pub enum PtyError {
    #[error("failed to open pty: {0}")]
    Open(String),
    #[error("failed to spawn `{command}`: {reason}")]
    Spawn { command: String, reason: String },
    #[error("failed to write to pty: {0}")]
    Write(#[source] std::io::Error),
    #[error("failed to resize pty: {0}")]
    Resize(String),
    #[error("failed to signal pty process: {0}")]
    Kill(String),
    #[error("pty process has exited")]
    Exited,
    #[error("pty actor is gone")]
    ActorGone,
}
