//! Per-server tracking session
//!
//! A [`PresenceTracker`] owns one background task per tracked server. The task
//! is the only writer of that server's roster and consumes three inputs:
//! - console lines, classified and applied strictly in arrival order
//! - the reconciliation timer (one early kick, then a fixed interval)
//! - control messages from the owner (manual reconcile, stop)
//!
//! Reconciliation only submits the listing command. Its answer comes back
//! later as an ordinary console line and takes the same path as every
//! other line.

use crate::backend::{BackendError, LogSubscription, ServerBackend};
use crate::classifier::Classifier;
use crate::config::TrackerConfig;
use crate::roster::RosterReconciler;
use log::{debug, info, warn};
use shared::Notification;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Messages from a [`PresenceTracker`] handle to its session task
#[derive(Debug)]
pub enum SessionControl {
    /// Request a roster listing now, in addition to the timer.
    Reconcile,
    Stop,
}

/// Handle to the tracking session of one server
///
/// Dropping the handle stops the session.
pub struct PresenceTracker {
    server_id: String,
    control_tx: mpsc::UnboundedSender<SessionControl>,
    roster_rx: watch::Receiver<Vec<String>>,
    notifications: broadcast::Sender<Notification>,
    handle: Option<JoinHandle<()>>,
}

impl PresenceTracker {
    /// Subscribes to the server's console and starts tracking its players.
    ///
    /// Notifications are published on `notifications`. Must be called from
    /// within a Tokio runtime.
    pub fn spawn(
        server_id: impl Into<String>,
        backend: Arc<dyn ServerBackend>,
        classifier: Arc<Classifier>,
        config: &TrackerConfig,
        notifications: broadcast::Sender<Notification>,
    ) -> Result<Self, BackendError> {
        let server_id = server_id.into();
        let subscription = backend.subscribe(&server_id)?;
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (roster_tx, roster_rx) = watch::channel(Vec::new());

        let session = Session {
            server_id: server_id.clone(),
            backend,
            subscription,
            reconciler: RosterReconciler::new(server_id.clone(), classifier),
            list_command: config.list_command.clone(),
            initial_delay: config.initial_reconcile_delay,
            interval: config.effective_reconcile_interval(),
            control_rx,
            roster_tx,
            notifications: notifications.clone(),
        };
        let handle = tokio::spawn(session.run());

        Ok(Self {
            server_id,
            control_tx,
            roster_rx,
            notifications,
            handle: Some(handle),
        })
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Current roster, in display order.
    pub fn roster(&self) -> Vec<String> {
        self.roster_rx.borrow().clone()
    }

    /// Receiver that is marked changed whenever the roster changes.
    pub fn watch_roster(&self) -> watch::Receiver<Vec<String>> {
        self.roster_rx.clone()
    }

    pub fn subscribe_notifications(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    /// Asks the session to request a roster listing right away.
    /// Returns false if the session has already ended.
    pub fn request_reconcile(&self) -> bool {
        self.control_tx.send(SessionControl::Reconcile).is_ok()
    }

    pub fn is_active(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Stops the session and waits for it to release its state.
    pub async fn stop(&mut self) {
        let _ = self.control_tx.send(SessionControl::Stop);
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!("Tracking session for {} panicked: {}", self.server_id, e);
            }
        }
    }
}

impl Drop for PresenceTracker {
    fn drop(&mut self) {
        let _ = self.control_tx.send(SessionControl::Stop);
    }
}

struct Session {
    server_id: String,
    backend: Arc<dyn ServerBackend>,
    subscription: LogSubscription,
    reconciler: RosterReconciler,
    list_command: String,
    initial_delay: Duration,
    interval: Duration,
    control_rx: mpsc::UnboundedReceiver<SessionControl>,
    roster_tx: watch::Sender<Vec<String>>,
    notifications: broadcast::Sender<Notification>,
}

impl Session {
    async fn run(mut self) {
        let mut reconcile_timer = interval_at(Instant::now() + self.initial_delay, self.interval);
        reconcile_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Tracking players on {}", self.server_id);

        loop {
            tokio::select! {
                biased;

                control = self.control_rx.recv() => {
                    match control {
                        Some(SessionControl::Reconcile) => self.request_roster(),
                        Some(SessionControl::Stop) | None => break,
                    }
                },

                // Ahead of the console so a chatty server cannot starve it.
                _ = reconcile_timer.tick() => {
                    self.request_roster();
                },

                line = self.subscription.next_line() => {
                    match line {
                        Some(line) => self.handle_line(&line),
                        None => {
                            info!("Console of {} closed", self.server_id);
                            break;
                        }
                    }
                },
            }
        }

        self.subscription.unsubscribe();
        self.roster_tx.send_replace(Vec::new());
        info!("Stopped tracking players on {}", self.server_id);
    }

    fn handle_line(&mut self, line: &str) {
        let outcome = self.reconciler.feed_line(line);

        if outcome.signal.is_match() {
            debug!("{}: {:?}", self.server_id, outcome.signal);
        }

        if outcome.change.changes_membership() {
            self.roster_tx
                .send_replace(self.reconciler.roster().to_vec());
        }

        if let Some(notification) = outcome.notification {
            info!("{}", notification);
            // Nobody listening is not an error.
            let _ = self.notifications.send(notification);
        }
    }

    /// Best effort: a failed submission leaves the current roster in place.
    fn request_roster(&self) {
        match self.backend.send_command(&self.server_id, &self.list_command) {
            Ok(()) => debug!("Requested player listing from {}", self.server_id),
            Err(e) => debug!(
                "Player listing request for {} not submitted: {}",
                self.server_id, e
            ),
        }
    }
}
