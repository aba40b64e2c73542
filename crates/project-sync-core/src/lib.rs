//! # project-sync core
//!
//! Shared, I/O-free logic for project-sync: data models, identity hashing,
//! the key-value and document-text store abstractions, hydration helpers,
//! the remote project store trait, and the initial-sync merge policy.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem dependencies.
//! Each storage trait ships with an in-memory implementation used by tests
//! and by embedders that bring their own persistence.

pub mod identity;
pub mod kv;
pub mod merge;
pub mod models;
pub mod remote;
pub mod text;
