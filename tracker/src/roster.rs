//! Player roster state and its reconciliation against classified console signals
//!
//! The roster state machine is split in two halves:
//! - [`Roster::apply`] is the pure membership transition for one signal
//! - [`notification_for`] decides, from the signal and the resulting change,
//!   whether anything should be announced
//!
//! [`RosterReconciler`] glues the classifier and both halves together for a
//! single tracked server. It owns no I/O.

use crate::classifier::Classifier;
use log::trace;
use serde::Serialize;
use shared::{normalize_name, Notification, Signal};
use std::collections::HashSet;
use std::sync::Arc;

/// Membership change produced by applying one signal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RosterChange {
    Unchanged,
    Added(String),
    /// Join line for a player an identity probe had already seeded.
    Confirmed(String),
    Removed(String),
    /// Whole roster was swapped for a snapshot that differs from it.
    Replaced,
}

impl RosterChange {
    /// True when the set of names (or its order) changed.
    pub fn changes_membership(&self) -> bool {
        matches!(
            self,
            RosterChange::Added(_) | RosterChange::Removed(_) | RosterChange::Replaced
        )
    }
}

/// Players believed to be connected to one server
///
/// Names are unique by exact match. Order follows arrival, or the order of
/// the last applied snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Roster {
    players: Vec<String>,
    /// Seeded by an identity probe, join line not seen yet.
    #[serde(skip)]
    unannounced: HashSet<String>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a roster from raw names, normalizing and dropping duplicates.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut players: Vec<String> = Vec::new();
        for name in names {
            if let Some(name) = normalize_name(name.as_ref()) {
                if !players.contains(&name) {
                    players.push(name);
                }
            }
        }
        Self {
            players,
            unannounced: HashSet::new(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.players.iter().any(|p| p == name)
    }

    pub fn players(&self) -> &[String] {
        &self.players
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.players.clone()
    }

    /// Applies one signal to the membership set.
    ///
    /// - `Join` adds the name if absent; a name seeded by a probe is confirmed once
    /// - `IdentityProbe` adds the name if absent and marks it unannounced
    /// - `Leave` removes the name if present
    /// - `RosterSnapshot` replaces everything, including with an empty list
    /// - `NoMatch` does nothing
    pub fn apply(&mut self, signal: &Signal) -> RosterChange {
        match signal {
            Signal::Join(name) => {
                let Some(name) = normalize_name(name) else {
                    return RosterChange::Unchanged;
                };
                if !self.contains(&name) {
                    self.players.push(name.clone());
                    RosterChange::Added(name)
                } else if self.unannounced.remove(&name) {
                    RosterChange::Confirmed(name)
                } else {
                    RosterChange::Unchanged
                }
            }
            Signal::IdentityProbe(name) => {
                let Some(name) = normalize_name(name) else {
                    return RosterChange::Unchanged;
                };
                if self.contains(&name) {
                    RosterChange::Unchanged
                } else {
                    self.players.push(name.clone());
                    self.unannounced.insert(name.clone());
                    RosterChange::Added(name)
                }
            }
            Signal::Leave(name) => {
                let Some(name) = normalize_name(name) else {
                    return RosterChange::Unchanged;
                };
                match self.players.iter().position(|p| *p == name) {
                    Some(index) => {
                        self.players.remove(index);
                        self.unannounced.remove(&name);
                        RosterChange::Removed(name)
                    }
                    None => RosterChange::Unchanged,
                }
            }
            Signal::RosterSnapshot(names) => {
                let snapshot = Roster::from_names(names);
                if snapshot.players == self.players {
                    return RosterChange::Unchanged;
                }
                self.unannounced.retain(|name| snapshot.contains(name));
                self.players = snapshot.players;
                RosterChange::Replaced
            }
            Signal::NoMatch => RosterChange::Unchanged,
        }
    }
}

/// Announcement for a transition, if it deserves one.
///
/// Only a `Join` that added or confirmed someone and a `Leave` that removed
/// someone are announced. Identity probes and snapshots are always silent.
pub fn notification_for(
    server_id: &str,
    signal: &Signal,
    change: &RosterChange,
) -> Option<Notification> {
    match (signal, change) {
        (Signal::Join(_), RosterChange::Added(name) | RosterChange::Confirmed(name)) => {
            Some(Notification::joined(server_id, name))
        }
        (Signal::Leave(_), RosterChange::Removed(name)) => Some(Notification::left(server_id, name)),
        _ => None,
    }
}

/// Result of feeding one console line through a reconciler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineOutcome {
    pub signal: Signal,
    pub change: RosterChange,
    pub notification: Option<Notification>,
}

/// Roster owner for one tracked server
pub struct RosterReconciler {
    server_id: String,
    roster: Roster,
    classifier: Arc<Classifier>,
}

impl RosterReconciler {
    pub fn new(server_id: impl Into<String>, classifier: Arc<Classifier>) -> Self {
        Self {
            server_id: server_id.into(),
            roster: Roster::new(),
            classifier,
        }
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn contains(&self, name: &str) -> bool {
        self.roster.contains(name)
    }

    pub fn len(&self) -> usize {
        self.roster.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roster.is_empty()
    }

    /// Applies a signal and returns the notification it produced, if any.
    pub fn apply(&mut self, signal: &Signal) -> Option<Notification> {
        let change = self.roster.apply(signal);
        notification_for(&self.server_id, signal, &change)
    }

    /// Classifies a console line and applies the resulting signal.
    pub fn feed_line(&mut self, line: &str) -> LineOutcome {
        let signal = self.classifier.classify(line);
        let change = self.roster.apply(&signal);
        let notification = notification_for(&self.server_id, &signal, &change);

        if signal.is_match() {
            trace!("{}: {:?} -> {:?}", self.server_id, signal, change);
        }

        LineOutcome {
            signal,
            change,
            notification,
        }
    }
}
