use clap::{Parser, Subcommand};
use log::{info, warn};
use serde::Serialize;
use shared::{
    Notification, ServerFamily, Signal, DEFAULT_INITIAL_RECONCILE_DELAY, DEFAULT_LIST_COMMAND,
    DEFAULT_RECONCILE_INTERVAL,
};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{interval, MissedTickBehavior};
use tracker::backend::ServerBackend;
use tracker::classifier::Classifier;
use tracker::config::TrackerConfig;
use tracker::manager::PresenceManager;
use tracker::roster::RosterReconciler;
use tracker::supervisor::{ProcessSupervisor, ServerLaunch};

/// How often the run loop checks whether the server process is still alive
const LIVENESS_CHECK_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Launch a server process and track who is online
    Run {
        /// Identifier used in notifications and logs
        #[arg(long, default_value = "server")]
        id: String,

        /// Log dialect of the server (java, bedrock, pocket); all when omitted
        #[arg(short = 'f', long)]
        family: Option<ServerFamily>,

        /// Seconds between roster listing requests
        #[arg(short = 'i', long, default_value_t = DEFAULT_RECONCILE_INTERVAL.as_secs())]
        interval: u64,

        /// Seconds before the first roster listing request
        #[arg(long, default_value_t = DEFAULT_INITIAL_RECONCILE_DELAY.as_secs())]
        initial_delay: u64,

        /// Console command that prints the player listing
        #[arg(long, default_value = DEFAULT_LIST_COMMAND)]
        list_command: String,

        /// Print events as JSON lines instead of text (suppresses console echo)
        #[arg(long)]
        json: bool,

        /// Server program followed by its arguments
        #[arg(last = true, required = true, value_name = "PROGRAM")]
        program: Vec<String>,
    },

    /// Classify a saved console log and print the resulting roster
    Replay {
        /// Console log to read
        file: PathBuf,

        /// Log dialect of the server that wrote the log; all when omitted
        #[arg(short = 'f', long)]
        family: Option<ServerFamily>,

        /// Print events as JSON lines instead of text
        #[arg(long)]
        json: bool,
    },
}

/// One line of CLI output
#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum Output<'a> {
    Signal { line: usize, signal: &'a Signal },
    Notification(&'a Notification),
    Roster { server_id: &'a str, players: &'a [String] },
}

impl fmt::Display for Output<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Output::Signal { line, signal } => write!(f, "{:>6}  {:?}", line, signal),
            Output::Notification(notification) => write!(f, "{}", notification),
            Output::Roster { server_id, players } => write!(
                f,
                "[{}] online ({}): {}",
                server_id,
                players.len(),
                players.join(", ")
            ),
        }
    }
}

fn emit(output: &Output<'_>, json: bool) -> Result<(), serde_json::Error> {
    if json {
        println!("{}", serde_json::to_string(output)?);
    } else {
        println!("{}", output);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();

    match args.command {
        Command::Run {
            id,
            family,
            interval,
            initial_delay,
            list_command,
            json,
            program,
        } => {
            let config = TrackerConfig::default()
                .with_family(family)
                .with_reconcile_timing(
                    Duration::from_secs(initial_delay),
                    Duration::from_secs(interval),
                )
                .with_list_command(list_command);
            run_server(&id, config, json, &program).await
        }
        Command::Replay { file, family, json } => replay(&file, family, json).await,
    }
}

/// Runs one server under supervision until it exits or Ctrl+C is pressed.
async fn run_server(
    id: &str,
    config: TrackerConfig,
    json: bool,
    program: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    let (executable, program_args) = program.split_first().ok_or("no server program given")?;

    let supervisor = Arc::new(ProcessSupervisor::new());
    let mut manager = PresenceManager::new(supervisor.clone(), config);
    let mut notifications = manager.subscribe_notifications();

    // Subscribe before the process starts so no early line is missed.
    manager.start_tracking(id, None)?;
    let mut roster = manager
        .watch_roster(id)
        .ok_or("tracking session did not start")?;
    let mut console = supervisor.subscribe(id)?;
    let mut echo = !json;

    supervisor.start(ServerLaunch::new(id, executable.as_str()).args(program_args))?;
    info!("Forwarding stdin to {}, Ctrl+C stops the server", id);

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    let mut liveness = interval(LIVENESS_CHECK_INTERVAL);
    liveness.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            result = notifications.recv() => {
                match result {
                    Ok(notification) => emit(&Output::Notification(&notification), json)?,
                    Err(RecvError::Lagged(skipped)) => warn!("Missed {} notifications", skipped),
                    Err(RecvError::Closed) => break,
                }
            }
            changed = roster.changed() => {
                if changed.is_err() {
                    break;
                }
                let players = roster.borrow_and_update().clone();
                emit(&Output::Roster { server_id: id, players: &players }, json)?;
            }
            line = console.next_line(), if echo => {
                match line {
                    Some(line) => println!("{}", line),
                    None => echo = false,
                }
            }
            line = stdin.next_line(), if stdin_open => {
                match line {
                    Ok(Some(command)) => {
                        let command = command.trim();
                        if !command.is_empty() {
                            if let Err(e) = supervisor.send_command(id, command) {
                                warn!("Could not send command to {}: {}", id, e);
                            }
                        }
                    }
                    Ok(None) => stdin_open = false,
                    Err(e) => {
                        warn!("Failed to read stdin: {}", e);
                        stdin_open = false;
                    }
                }
            }
            _ = liveness.tick() => {
                if !supervisor.is_running(id) {
                    info!("Server {} exited", id);
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, stopping {}", id);
                break;
            }
        }
    }

    manager.shutdown().await;
    if supervisor.is_running(id) {
        match supervisor.stop(id).await {
            Ok(outcome) => info!("Server {} stopped ({:?})", id, outcome),
            Err(e) => warn!("Failed to stop server {}: {}", id, e),
        }
    }

    Ok(())
}

/// Feeds a saved console log through a reconciler, printing every recognized line.
async fn replay(
    file: &Path,
    family: Option<ServerFamily>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = tokio::fs::read(file).await?;
    let contents = String::from_utf8_lossy(&bytes);
    let server_id = file
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("replay");

    let mut reconciler =
        RosterReconciler::new(server_id, Arc::new(Classifier::for_family(family)));

    for (index, line) in contents.lines().enumerate() {
        let outcome = reconciler.feed_line(line);
        if !outcome.signal.is_match() {
            continue;
        }
        emit(
            &Output::Signal {
                line: index + 1,
                signal: &outcome.signal,
            },
            json,
        )?;
        if let Some(notification) = &outcome.notification {
            emit(&Output::Notification(notification), json)?;
        }
    }

    emit(
        &Output::Roster {
            server_id,
            players: reconciler.roster().players(),
        },
        json,
    )?;
    Ok(())
}
