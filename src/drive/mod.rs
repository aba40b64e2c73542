//! Remote object store: OAuth2 token lifecycle plus the file client that
//! stores projects and knowledge bases.
//!
//! ```text
//! TokenSource (silent / interactive)
//!        │
//!  TokenManager ── cached token, 60 s skew
//!        │
//!   DriveClient ── folders, project files, knowledge-base file
//!        │
//!  ProjectRemote (consumed by the sync manager)
//! ```

pub mod auth;
pub mod client;
pub mod error;

pub use auth::{ConsentHandler, OAuthTokenSource, TokenManager, TokenSource};
pub use client::DriveClient;
pub use error::DriveError;
