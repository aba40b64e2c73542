//! # Project Sync
//!
//! Local-first persistence for compliance-assessment projects, with a
//! Drive-style cloud file store as the durable, shareable backing store.
//!
//! Users work offline against a per-identity local cache. Each project is
//! also stored remotely as one JSON file, next to a single knowledge-base
//! file. The sync manager reconciles the two on start (remote wins) and
//! pushes local changes after a debounce window.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   save    ┌──────────────┐
//! │  working set │──────────▶│ ScopedStore  │  <app>-<identity>-<key>
//! │  (projects)  │           │  (SqliteKv)  │
//! └──────┬───────┘           └──────────────┘
//!        │ schedule_sync            ▲ text offload
//!        ▼                          │
//! ┌──────────────┐           ┌──────────────┐
//! │ SyncManager  │           │ TextStore    │  scope|project|agent|doc
//! │ debounce +   │           │ (SQLite)     │
//! │ single-flight│           └──────────────┘
//! └──────┬───────┘
//!        ▼
//! ┌──────────────┐   OAuth2  ┌──────────────┐
//! │ DriveClient  │◀─────────▶│ TokenManager │
//! └──────────────┘           └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! psync init                        # create local databases
//! psync login                       # authorize and pick identity
//! psync projects add "Vendor audit"
//! psync sync                        # initial reconciliation
//! psync push                        # push local projects now
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`commands`] | `psync` subcommand implementations |
//! | [`db`] | SQLite connection pools |
//! | [`migrate`] | Schema migrations and text store upgrades |
//! | [`kv_sqlite`] | SQLite key-value store |
//! | [`user_storage`] | Identity-scoped local storage |
//! | [`text_store`] | SQLite document text store |
//! | [`drive`] | OAuth2 tokens and the remote file client |
//! | [`sync`] | Initial sync and debounced pushes |
//! | [`progress`] | Sync progress reporting |
//! | [`logging`] | tracing subscriber setup |
//!
//! Models, identity hashing, storage traits and the merge policy live in
//! the I/O-free `project-sync-core` crate.

pub mod commands;
pub mod config;
pub mod db;
pub mod drive;
pub mod kv_sqlite;
pub mod logging;
pub mod migrate;
pub mod progress;
pub mod sync;
pub mod text_store;
pub mod user_storage;
