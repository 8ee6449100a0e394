//! Player tracking across several servers at once
//!
//! This module keeps one independent [`PresenceTracker`] per server identity:
//! - Starting and stopping observation of individual servers
//! - A single fan-in stream of join/leave notifications for every server
//! - Read access to each server's current roster
//!
//! Sessions share nothing but the backend handle and the compiled rule
//! tables, so servers are processed concurrently without locking.

use crate::backend::{BackendError, ServerBackend};
use crate::classifier::Classifier;
use crate::config::TrackerConfig;
use crate::session::PresenceTracker;
use log::{debug, info};
use shared::{Notification, ServerFamily};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

/// Notifications buffered before slow listeners start missing some.
pub const NOTIFICATION_CHANNEL_CAPACITY: usize = 256;

/// Owns the tracking sessions of every observed server
pub struct PresenceManager {
    backend: Arc<dyn ServerBackend>,
    config: TrackerConfig,
    classifiers: HashMap<Option<ServerFamily>, Arc<Classifier>>,
    trackers: HashMap<String, PresenceTracker>,
    notifications: broadcast::Sender<Notification>,
}

impl PresenceManager {
    pub fn new(backend: Arc<dyn ServerBackend>, config: TrackerConfig) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CHANNEL_CAPACITY);
        Self {
            backend,
            config,
            classifiers: HashMap::new(),
            trackers: HashMap::new(),
            notifications,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Rule table for `family`, compiled once and shared by every session using it.
    fn classifier_for(&mut self, family: Option<ServerFamily>) -> Arc<Classifier> {
        self.classifiers
            .entry(family)
            .or_insert_with(|| Arc::new(Classifier::for_family(family)))
            .clone()
    }

    /// Begins observing `server_id` with an empty roster.
    ///
    /// Does nothing if the server is already tracked by a live session. A
    /// session that ended on its own (console closed) is replaced. `family`
    /// overrides the configured default for this server only.
    pub fn start_tracking(
        &mut self,
        server_id: &str,
        family: Option<ServerFamily>,
    ) -> Result<(), BackendError> {
        if self.is_tracking(server_id) {
            debug!("Already tracking players on {}", server_id);
            return Ok(());
        }

        let family = family.or(self.config.family);
        let classifier = self.classifier_for(family);
        let config = self.config.clone().with_family(family);
        let tracker = PresenceTracker::spawn(
            server_id,
            self.backend.clone(),
            classifier,
            &config,
            self.notifications.clone(),
        )?;

        let family_name = family.map(|f| f.as_str()).unwrap_or("any");
        info!("Started tracking {} (family: {})", server_id, family_name);
        self.trackers.insert(server_id.to_string(), tracker);
        Ok(())
    }

    /// Ends observation of `server_id` and discards its roster.
    /// Returns false if the server was not tracked.
    pub async fn stop_tracking(&mut self, server_id: &str) -> bool {
        match self.trackers.remove(server_id) {
            Some(mut tracker) => {
                tracker.stop().await;
                info!("Stopped tracking {}", server_id);
                true
            }
            None => false,
        }
    }

    pub fn is_tracking(&self, server_id: &str) -> bool {
        self.trackers
            .get(server_id)
            .map(|tracker| tracker.is_active())
            .unwrap_or(false)
    }

    /// Current roster of `server_id`; empty when the server is not tracked.
    pub fn roster(&self, server_id: &str) -> Vec<String> {
        self.trackers
            .get(server_id)
            .map(|tracker| tracker.roster())
            .unwrap_or_default()
    }

    pub fn watch_roster(&self, server_id: &str) -> Option<watch::Receiver<Vec<String>>> {
        self.trackers.get(server_id).map(|tracker| tracker.watch_roster())
    }

    /// Join/leave notifications of every tracked server.
    pub fn subscribe_notifications(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    pub fn request_reconcile(&self, server_id: &str) -> bool {
        self.trackers
            .get(server_id)
            .map(|tracker| tracker.request_reconcile())
            .unwrap_or(false)
    }

    /// Ids of every server with a session, sorted.
    pub fn tracked_servers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.trackers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Stops every session.
    pub async fn shutdown(&mut self) {
        let ids = self.tracked_servers();
        for id in ids {
            self.stop_tracking(&id).await;
        }
    }
}
