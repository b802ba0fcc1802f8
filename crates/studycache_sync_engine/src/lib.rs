//! # studycache sync engine
//!
//! Drives the offline cache and action queue from `studycache_core` against
//! a remote backend.
//!
//! This crate provides:
//! - Sync state machine per owner (idle → syncing → completed/error → idle)
//! - Single-flight guard: at most one cycle per owner at a time
//! - Retry with capped exponential backoff and per-call timeouts
//! - Cancellation when connectivity is lost
//! - Per-owner status streams for the UI
//! - A background scheduler for reconnect, periodic sync and expiry sweeps
//!
//! ## Architecture
//!
//! The engine implements a **push-then-pull** cycle:
//! 1. Deliver queued local actions in order (strict FIFO per owner)
//! 2. Pull a fresh snapshot of each artifact type
//! 3. Resolve it against local state (server is authoritative)
//! 4. Write the result into the cache
//!
//! ## Key Invariants
//!
//! - An action leaves the queue only when the backend acknowledged it
//! - A dead letter blocks later actions of the same owner
//! - Cancellation never counts as a failed attempt
//! - `SyncStatus.pending_count` mirrors the live queue depth

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod config;
mod connectivity;
mod engine;
mod error;
mod orchestrator;
mod status;

pub use backend::{BackendClient, BackendError, BackendResult, MockBackend};
pub use config::{BackoffPolicy, SyncConfig};
pub use connectivity::{ConnectivityObserver, ConnectivitySignal};
pub use engine::{EngineHandle, SyncEngine, SyncEngineBuilder};
pub use error::{SyncError, SyncResult};
pub use orchestrator::{CycleOutcome, CycleReport, SyncOrchestrator};
pub use status::{StatusPublisher, StatusSubscription};
