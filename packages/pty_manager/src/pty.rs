use portable_pty::{Child, CommandBuilder, MasterPty, PtySize, native_pty_system};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::error::PtyError;

const OUTPUT_CHANNEL_CAPACITY: usize = 1024;
const READ_BUFFER_SIZE: usize = 4096;

/// Configuration for spawning a PTY
#[derive(Clone, Debug)]
pub struct PtyConfig {
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub rows: u16,
    pub cols: u16,
}

impl Default for PtyConfig {
    fn default() -> Self {
        Self {
            command: "/bin/bash".to_string(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
            rows: 24,
            cols: 80,
        }
    }
}

/// Snapshot of a PTY session
#[derive(Clone, Debug)]
pub struct PtyState {
    pub running: bool,
    pub pid: Option<u32>,
    pub command: String,
    pub rows: u16,
    pub cols: u16,
}

/// Events broadcast to output subscribers
#[derive(Clone, Debug)]
pub enum PtyEvent {
    /// A chunk of raw terminal output
    Output { data: Vec<u8> },
    /// The process closed its side of the terminal
    Exited,
}

/// Signals deliverable through [`PtyHandle::kill`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PtySignal {
    /// SIGHUP: what a shell gets when its terminal goes away
    Hangup,
    /// Forceful kill through the child handle
    Kill,
}

enum PtyMessage {
    Write {
        data: Vec<u8>,
        respond_to: oneshot::Sender<Result<usize, PtyError>>,
    },
    Resize {
        rows: u16,
        cols: u16,
        respond_to: oneshot::Sender<Result<(), PtyError>>,
    },
    GetState {
        respond_to: oneshot::Sender<PtyState>,
    },
    Kill {
        signal: PtySignal,
        respond_to: oneshot::Sender<Result<(), PtyError>>,
    },
}

/// Cloneable handle to a PTY actor
#[derive(Clone)]
pub struct PtyHandle {
    sender: mpsc::Sender<PtyMessage>,
    output_tx: broadcast::Sender<PtyEvent>,
    exited: Arc<AtomicBool>,
    pid: Option<u32>,
}

impl PtyHandle {
    pub async fn write(&self, data: &[u8]) -> Result<usize, PtyError> {
        if !self.is_running() {
            return Err(PtyError::Exited);
        }
        let (tx, rx) = oneshot::channel();
        self.send(PtyMessage::Write {
            data: data.to_vec(),
            respond_to: tx,
        })
        .await?;
        rx.await.map_err(|_| PtyError::ActorGone)?
    }

    pub async fn write_str(&self, text: &str) -> Result<usize, PtyError> {
        self.write(text.as_bytes()).await
    }

    pub async fn resize(&self, rows: u16, cols: u16) -> Result<(), PtyError> {
        let (tx, rx) = oneshot::channel();
        self.send(PtyMessage::Resize {
            rows,
            cols,
            respond_to: tx,
        })
        .await?;
        rx.await.map_err(|_| PtyError::ActorGone)?
    }

    pub async fn state(&self) -> Result<PtyState, PtyError> {
        let (tx, rx) = oneshot::channel();
        self.send(PtyMessage::GetState { respond_to: tx }).await?;
        rx.await.map_err(|_| PtyError::ActorGone)
    }

    pub async fn kill(&self, signal: PtySignal) -> Result<(), PtyError> {
        let (tx, rx) = oneshot::channel();
        self.send(PtyMessage::Kill {
            signal,
            respond_to: tx,
        })
        .await?;
        rx.await.map_err(|_| PtyError::ActorGone)?
    }

    /// Live output from this point on. No replay of earlier output.
    pub fn subscribe(&self) -> broadcast::Receiver<PtyEvent> {
        self.output_tx.subscribe()
    }

    /// False once the process has closed the terminal.
    pub fn is_running(&self) -> bool {
        !self.exited.load(Ordering::Acquire)
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    async fn send(&self, msg: PtyMessage) -> Result<(), PtyError> {
        self.sender.send(msg).await.map_err(|_| PtyError::ActorGone)
    }
}

/// Owns the master side of one PTY and its child process
pub struct PtyActor {
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    child: Box<dyn Child + Send + Sync>,
    state: PtyState,
    exited: Arc<AtomicBool>,
    receiver: mpsc::Receiver<PtyMessage>,
}

impl PtyActor {
    /// Spawn the configured command on a fresh PTY and start its actor.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(config: PtyConfig) -> Result<PtyHandle, PtyError> {
        let pair = native_pty_system()
            .openpty(PtySize {
                rows: config.rows,
                cols: config.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::Open(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&config.command);
        cmd.args(&config.args);
        if let Some(dir) = &config.working_dir {
            cmd.cwd(dir);
        }
        cmd.env("TERM", "xterm-256color");
        cmd.env("COLORTERM", "truecolor");
        for key in ["PATH", "HOME", "USER", "LANG"] {
            if let Ok(value) = std::env::var(key) {
                cmd.env(key, value);
            }
        }
        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        let child = pair.slave.spawn_command(cmd).map_err(|e| {
            error!("Failed to spawn command '{}': {}", config.command, e);
            PtyError::Spawn {
                command: config.command.clone(),
                reason: e.to_string(),
            }
        })?;
        // The reader only sees EOF once no slave handle remains open in this process
        drop(pair.slave);

        let pid = child.process_id();
        info!(command = %config.command, ?pid, "PTY process started");

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::Open(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::Open(e.to_string()))?;

        let (output_tx, _) = broadcast::channel(OUTPUT_CHANNEL_CAPACITY);
        let (msg_tx, msg_rx) = mpsc::channel(32);
        let exited = Arc::new(AtomicBool::new(false));

        let reader_tx = output_tx.clone();
        let reader_exited = exited.clone();
        std::thread::spawn(move || {
            let mut buffer = vec![0u8; READ_BUFFER_SIZE];
            loop {
                match reader.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(n) => {
                        let _ = reader_tx.send(PtyEvent::Output {
                            data: buffer[..n].to_vec(),
                        });
                    }
                    // EIO is how Linux reports a hung-up slave
                    Err(e) => {
                        debug!("PTY read ended: {}", e);
                        break;
                    }
                }
            }
            reader_exited.store(true, Ordering::Release);
            let _ = reader_tx.send(PtyEvent::Exited);
            info!(?pid, "PTY output closed");
        });

        let mut actor = Self {
            master: pair.master,
            writer,
            child,
            state: PtyState {
                running: true,
                pid,
                command: config.command,
                rows: config.rows,
                cols: config.cols,
            },
            exited: exited.clone(),
            receiver: msg_rx,
        };
        tokio::spawn(async move { actor.run().await });

        Ok(PtyHandle {
            sender: msg_tx,
            output_tx,
            exited,
            pid,
        })
    }

    async fn run(&mut self) {
        while let Some(msg) = self.receiver.recv().await {
            match msg {
                PtyMessage::Write { data, respond_to } => {
                    let _ = respond_to.send(self.handle_write(&data));
                }
                PtyMessage::Resize {
                    rows,
                    cols,
                    respond_to,
                } => {
                    let _ = respond_to.send(self.handle_resize(rows, cols));
                }
                PtyMessage::GetState { respond_to } => {
                    self.refresh_running();
                    let _ = respond_to.send(self.state.clone());
                }
                PtyMessage::Kill { signal, respond_to } => {
                    let _ = respond_to.send(self.handle_kill(signal));
                }
            }
        }

        // Every handle is gone; nobody can reach this process any more
        if self.refresh_running() {
            if let Err(e) = self.child.kill() {
                warn!("Failed to kill orphaned PTY process: {}", e);
            }
        }
        debug!(pid = ?self.state.pid, "PTY actor shutting down");
    }

    fn refresh_running(&mut self) -> bool {
        let reaped = matches!(self.child.try_wait(), Ok(Some(_)));
        if reaped || self.exited.load(Ordering::Acquire) {
            self.state.running = false;
        }
        self.state.running
    }

    fn handle_write(&mut self, data: &[u8]) -> Result<usize, PtyError> {
        self.writer.write_all(data).map_err(PtyError::Write)?;
        self.writer.flush().map_err(PtyError::Write)?;
        Ok(data.len())
    }

    fn handle_resize(&mut self, rows: u16, cols: u16) -> Result<(), PtyError> {
        self.master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::Resize(e.to_string()))?;
        self.state.rows = rows;
        self.state.cols = cols;
        Ok(())
    }

    fn handle_kill(&mut self, signal: PtySignal) -> Result<(), PtyError> {
        match signal {
            PtySignal::Kill => {
                self.child
                    .kill()
                    .map_err(|e| PtyError::Kill(e.to_string()))?;
            }
            #[cfg(unix)]
            PtySignal::Hangup => {
                use nix::sys::signal::{Signal, kill};
                use nix::unistd::Pid;

                if let Some(pid) = self.state.pid {
                    kill(Pid::from_raw(pid as i32), Signal::SIGHUP)
                        .map_err(|e| PtyError::Kill(e.to_string()))?;
                }
            }
            #[cfg(not(unix))]
            PtySignal::Hangup => {
                self.child
                    .kill()
                    .map_err(|e| PtyError::Kill(e.to_string()))?;
            }
        }
        self.state.running = false;
        Ok(())
    }
}
