//! # Player Presence Tracker
//!
//! This library derives, and keeps current, the set of players connected to
//! one or more game servers by reading nothing but their console output. It
//! works across several server implementations whose log formats share no
//! schema, and reconciles two independent sources of truth: incremental
//! join/leave lines and periodic full listings.
//!
//! ## Core Responsibilities
//!
//! ### Line Classification
//! Every console line is mapped to exactly one signal (join, leave, roster
//! snapshot, identity probe, or no match) by an ordered, declarative rule table.
//! Family-specific patterns are tried before the generic fallback, so one line
//! never produces two signals.
//!
//! ### Roster Reconciliation
//! Signals are applied strictly in arrival order to a per-server roster:
//! - Joins and leaves change membership and are announced
//! - Identity probes seed the roster silently
//! - Snapshots replace the roster wholesale and are never announced
//!
//! ### Periodic Refresh
//! Shortly after tracking starts, and on a fixed interval afterwards, each
//! session asks the server to print its player listing. The answer arrives as
//! an ordinary console line and goes through the same classifier as any other.
//! Failures to submit the request are swallowed; the roster simply stays as it was.
//!
//! ## Architecture Design
//!
//! ### One Task Per Server
//! Each tracked server gets its own Tokio task which is the only writer of that
//! server's roster. Servers share no mutable state and are processed
//! concurrently.
//!
//! ### Collaborator Seam
//! Process management lives behind the [`backend::ServerBackend`] trait: a
//! console line subscription and a fire-and-forget command channel. The
//! [`supervisor::ProcessSupervisor`] implements it over real child processes,
//! [`backend::ChannelBackend`] over in-memory channels.
//!
//! ## Module Organization
//!
//! ### Classifier Module (`classifier`)
//! Recognizer rules and the stateless line classifier.
//!
//! ### Roster Module (`roster`)
//! The pure roster transition, notification policy, and the per-server reconciler.
//!
//! ### Backend Module (`backend`)
//! The collaborator interface, its error type, and the in-memory implementation.
//!
//! ### Supervisor Module (`supervisor`)
//! Spawns server processes, fans out their console output, and feeds their stdin.
//!
//! ### Session Module (`session`)
//! The per-server tracking task with its reconciliation timer.
//!
//! ### Manager Module (`manager`)
//! Tracking of many servers at once behind a single notification stream.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tracker::backend::ChannelBackend;
//! use tracker::config::TrackerConfig;
//! use tracker::manager::PresenceManager;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = Arc::new(ChannelBackend::new());
//!     let mut manager = PresenceManager::new(backend.clone(), TrackerConfig::default());
//!     let mut notifications = manager.subscribe_notifications();
//!
//!     manager.start_tracking("survival", None)?;
//!     backend.push_line("survival", "[12:00:01] [Server thread/INFO]: Alice joined the game");
//!
//!     let notification = notifications.recv().await?;
//!     println!("{}", notification); // [survival] Alice joined
//!     println!("{:?}", manager.roster("survival")); // ["Alice"]
//!
//!     manager.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod classifier;
pub mod config;
pub mod manager;
pub mod roster;
pub mod session;
pub mod supervisor;
