//! Real-time state synchronization engine for the netsync network mirror.
//!
//! This crate keeps a client-side mirror of a remote network graph
//! consistent while an unordered stream of snapshots, deltas, metrics, and
//! consensus rounds arrives over a transport that may fail at any time.
//! When no transport is reachable it keeps running on a seeded synthetic
//! feed that speaks exactly the same schemas.
//!
//! # Modules
//!
//! - [`config`] -- Configuration loading from `netsync-config.yaml`.
//! - [`observers`] -- Ordered handler lists with snapshot-at-emit semantics
//!   and per-handler failure isolation.
//! - [`dispatcher`] -- [`UpdateDispatcher`], the typed publish/subscribe bus.
//! - [`reconciler`] -- [`StateReconciler`], owner of the canonical graph,
//!   and [`MirrorReader`], its read-only view.
//! - [`scheduler`] -- [`ConsensusScheduler`], paced FIFO delivery of
//!   consensus rounds.
//! - [`simulator`] -- Seeded synthetic feed and the fallback tick task.
//! - [`transport`] -- [`Connector`] trait, frames, and the in-memory connector.
//! - [`nats`] -- NATS-backed [`Connector`].
//! - [`connection`] -- [`ConnectionManager`], the connect/retry/fallback
//!   state machine.
//! - [`engine`] -- [`SyncEngine`], the facade that wires everything together.
//! - [`stats`] -- Diagnostic counters.
//!
//! [`UpdateDispatcher`]: dispatcher::UpdateDispatcher
//! [`StateReconciler`]: reconciler::StateReconciler
//! [`MirrorReader`]: reconciler::MirrorReader
//! [`ConsensusScheduler`]: scheduler::ConsensusScheduler
//! [`Connector`]: transport::Connector
//! [`ConnectionManager`]: connection::ConnectionManager
//! [`SyncEngine`]: engine::SyncEngine

pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod engine;
pub mod nats;
pub mod observers;
mod pipeline;
pub mod reconciler;
pub mod scheduler;
pub mod simulator;
pub mod stats;
pub mod transport;
