//! Interface to the process-management collaborator that runs game servers
//!
//! The tracker only needs two things from whoever supervises server processes:
//! a per-server stream of console lines and a way to submit console commands.
//! [`ServerBackend`] captures exactly that. [`ChannelBackend`] is an in-memory
//! implementation for embedding hosts that already own the console stream.

use log::{debug, warn};
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

/// Lines buffered per server before slow subscribers start lagging.
pub const LOG_CHANNEL_CAPACITY: usize = 1024;

/// Errors reported by a server backend
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("server {0} is not running")]
    NotRunning(String),

    #[error("server {0} is already running")]
    AlreadyRunning(String),

    #[error("console input of server {0} is unavailable")]
    StdinUnavailable(String),

    #[error("failed to start server {id}: {source}")]
    Spawn {
        id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command channel of server {0} is closed")]
    ChannelClosed(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Process-management collaborator as seen by the tracker
///
/// Implementations must not block in `send_command`: submission is
/// fire-and-forget and its success says nothing about the command's output.
pub trait ServerBackend: Send + Sync {
    /// Opens a console line stream for `server_id`, starting at the next line.
    fn subscribe(&self, server_id: &str) -> Result<LogSubscription, BackendError>;

    /// Submits one console command to a running server.
    fn send_command(&self, server_id: &str, command: &str) -> Result<(), BackendError>;
}

/// Console lines of one server, in emission order
///
/// Dropping the subscription stops delivery; [`LogSubscription::unsubscribe`]
/// does the same explicitly and may be called any number of times.
#[derive(Debug)]
pub struct LogSubscription {
    server_id: String,
    receiver: Option<broadcast::Receiver<String>>,
}

impl LogSubscription {
    pub fn new(server_id: impl Into<String>, receiver: broadcast::Receiver<String>) -> Self {
        Self {
            server_id: server_id.into(),
            receiver: Some(receiver),
        }
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn is_active(&self) -> bool {
        self.receiver.is_some()
    }

    /// Waits for the next line. Returns `None` once the stream has ended or
    /// the subscription was cancelled.
    ///
    /// Lines dropped because this subscriber fell behind are skipped with a
    /// warning; delivery is at-most-once.
    pub async fn next_line(&mut self) -> Option<String> {
        loop {
            let receiver = self.receiver.as_mut()?;
            match receiver.recv().await {
                Ok(line) => return Some(line),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        "Console subscriber for {} fell behind, skipped {} lines",
                        self.server_id, skipped
                    );
                }
                Err(RecvError::Closed) => {
                    debug!("Console stream for {} closed", self.server_id);
                    self.receiver = None;
                    return None;
                }
            }
        }
    }

    pub fn unsubscribe(&mut self) {
        if self.receiver.take().is_some() {
            debug!("Unsubscribed from console of {}", self.server_id);
        }
    }
}

/// In-memory backend fed by the host application
///
/// Lines pushed with [`ChannelBackend::push_line`] are delivered to every
/// current subscriber of that server. Submitted commands are recorded and can
/// be drained with [`ChannelBackend::take_commands`].
#[derive(Debug, Default)]
pub struct ChannelBackend {
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
    commands: Mutex<Vec<(String, String)>>,
    reject_commands: Mutex<bool>,
}

impl ChannelBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, server_id: &str) -> broadcast::Sender<String> {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels
            .entry(server_id.to_string())
            .or_insert_with(|| broadcast::channel(LOG_CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Publishes a console line. Returns how many subscribers received it.
    pub fn push_line(&self, server_id: &str, line: impl Into<String>) -> usize {
        self.sender(server_id).send(line.into()).unwrap_or(0)
    }

    /// Ends the console stream of `server_id` for every subscriber.
    pub fn close(&self, server_id: &str) {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels.remove(server_id);
    }

    pub fn subscriber_count(&self, server_id: &str) -> usize {
        let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels
            .get(server_id)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Makes every following `send_command` fail, as a stopped server would.
    pub fn set_reject_commands(&self, reject: bool) {
        *self.reject_commands.lock().unwrap_or_else(|e| e.into_inner()) = reject;
    }

    /// Drains the commands submitted so far as `(server_id, command)` pairs.
    pub fn take_commands(&self) -> Vec<(String, String)> {
        std::mem::take(&mut *self.commands.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

impl ServerBackend for ChannelBackend {
    fn subscribe(&self, server_id: &str) -> Result<LogSubscription, BackendError> {
        Ok(LogSubscription::new(server_id, self.sender(server_id).subscribe()))
    }

    fn send_command(&self, server_id: &str, command: &str) -> Result<(), BackendError> {
        if *self.reject_commands.lock().unwrap_or_else(|e| e.into_inner()) {
            return Err(BackendError::NotRunning(server_id.to_string()));
        }
        self.commands
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((server_id.to_string(), command.to_string()));
        Ok(())
    }
}
