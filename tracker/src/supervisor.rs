//! Process-backed server backend
//!
//! Launches game server processes with piped console streams, fans every
//! stdout/stderr line out to subscribers, and feeds console commands to the
//! process's stdin through a dedicated writer task.

use crate::backend::{BackendError, LogSubscription, ServerBackend, LOG_CHANNEL_CAPACITY};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{broadcast, mpsc};

/// Console command that asks a server to shut down cleanly.
pub const STOP_COMMAND: &str = "stop";
/// How long a server gets to exit after the stop command before it is killed.
pub const DEFAULT_STOP_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// How to launch one server process
#[derive(Debug, Clone)]
pub struct ServerLaunch {
    pub id: String,
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl ServerLaunch {
    pub fn new(id: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// How a stop request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Graceful,
    Forced,
}

struct RunningServer {
    child: Child,
    stdin_tx: mpsc::UnboundedSender<String>,
}

/// Supervises server processes and exposes them as a [`ServerBackend`]
///
/// Console channels are keyed by server id and outlive individual processes,
/// so a subscription taken before `start` (or across a restart) keeps
/// receiving lines.
pub struct ProcessSupervisor {
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
    running: Mutex<HashMap<String, RunningServer>>,
    grace_period: Duration,
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self::with_grace_period(DEFAULT_STOP_GRACE_PERIOD)
    }

    pub fn with_grace_period(grace_period: Duration) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            running: Mutex::new(HashMap::new()),
            grace_period,
        }
    }

    fn channel(&self, server_id: &str) -> broadcast::Sender<String> {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels
            .entry(server_id.to_string())
            .or_insert_with(|| broadcast::channel(LOG_CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Spawns the server process. Must be called from within a Tokio runtime.
    pub fn start(&self, launch: ServerLaunch) -> Result<(), BackendError> {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(server) = running.get_mut(&launch.id) {
            if matches!(server.child.try_wait(), Ok(None)) {
                return Err(BackendError::AlreadyRunning(launch.id));
            }
            running.remove(&launch.id);
        }

        let mut command = Command::new(&launch.program);
        command
            .args(&launch.args)
            .envs(launch.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &launch.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| BackendError::Spawn {
            id: launch.id.clone(),
            source,
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BackendError::StdinUnavailable(launch.id.clone()))?;
        let lines = self.channel(&launch.id);
        if let Some(stdout) = child.stdout.take() {
            spawn_line_reader(launch.id.clone(), stdout, lines.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_line_reader(launch.id.clone(), stderr, lines);
        }
        let stdin_tx = spawn_stdin_writer(launch.id.clone(), stdin);

        info!(
            "Started server {} ({} {})",
            launch.id,
            launch.program,
            launch.args.join(" ")
        );
        running.insert(launch.id, RunningServer { child, stdin_tx });
        Ok(())
    }

    /// Asks the server to stop, killing it if it outlives the grace period.
    pub async fn stop(&self, server_id: &str) -> Result<StopOutcome, BackendError> {
        let server = {
            let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
            running.remove(server_id)
        };
        let Some(RunningServer {
            mut child,
            stdin_tx,
        }) = server
        else {
            return Err(BackendError::NotRunning(server_id.to_string()));
        };

        if stdin_tx.send(STOP_COMMAND.to_string()).is_err() {
            debug!("Console input of {} already closed", server_id);
        }
        drop(stdin_tx);

        match tokio::time::timeout(self.grace_period, child.wait()).await {
            Ok(Ok(status)) => {
                info!("Server {} stopped ({})", server_id, status);
                Ok(StopOutcome::Graceful)
            }
            Ok(Err(e)) => {
                warn!("Failed to wait for server {}: {}", server_id, e);
                child.kill().await?;
                Ok(StopOutcome::Forced)
            }
            Err(_) => {
                warn!(
                    "Server {} did not stop within {:?}, killing it",
                    server_id, self.grace_period
                );
                child.kill().await?;
                Ok(StopOutcome::Forced)
            }
        }
    }

    /// Stops every running server.
    pub async fn stop_all(&self) {
        for server_id in self.running_servers() {
            if let Err(e) = self.stop(&server_id).await {
                warn!("Failed to stop server {}: {}", server_id, e);
            }
        }
    }

    pub fn is_running(&self, server_id: &str) -> bool {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        running
            .get_mut(server_id)
            .map(|server| matches!(server.child.try_wait(), Ok(None)))
            .unwrap_or(false)
    }

    /// Ids of servers whose process is still alive, sorted.
    pub fn running_servers(&self) -> Vec<String> {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = running
            .iter_mut()
            .filter_map(|(id, server)| {
                matches!(server.child.try_wait(), Ok(None)).then(|| id.clone())
            })
            .collect();
        ids.sort();
        ids
    }
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBackend for ProcessSupervisor {
    fn subscribe(&self, server_id: &str) -> Result<LogSubscription, BackendError> {
        Ok(LogSubscription::new(server_id, self.channel(server_id).subscribe()))
    }

    fn send_command(&self, server_id: &str, command: &str) -> Result<(), BackendError> {
        let running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        let server = running
            .get(server_id)
            .ok_or_else(|| BackendError::NotRunning(server_id.to_string()))?;
        server
            .stdin_tx
            .send(command.to_string())
            .map_err(|_| BackendError::ChannelClosed(server_id.to_string()))
    }
}

/// Forwards every line of a child output stream to the server's channel.
fn spawn_line_reader<R>(server_id: String, stream: R, lines: broadcast::Sender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream).lines();
        loop {
            match reader.next_line().await {
                Ok(Some(line)) => {
                    // No subscribers is fine, the line is simply not observed.
                    let _ = lines.send(line);
                }
                Ok(None) => break,
                Err(e) => {
                    error!("Failed to read console of {}: {}", server_id, e);
                    break;
                }
            }
        }
        debug!("Console reader for {} finished", server_id);
    });
}

/// Spawns the task that owns the child's stdin and writes queued commands.
fn spawn_stdin_writer(server_id: String, mut stdin: ChildStdin) -> mpsc::UnboundedSender<String> {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            let mut line = command.into_bytes();
            line.push(b'\n');
            if let Err(e) = stdin.write_all(&line).await {
                error!("Failed to write to console of {}: {}", server_id, e);
                break;
            }
            if let Err(e) = stdin.flush().await {
                error!("Failed to flush console of {}: {}", server_id, e);
                break;
            }
        }
        debug!("Console writer for {} finished", server_id);
    });

    tx
}
