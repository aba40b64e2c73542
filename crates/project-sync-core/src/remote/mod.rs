//! Remote project store abstraction.
//!
//! The sync manager only needs four operations from the remote side: list
//! project files, load one, save one, delete one. [`ProjectRemote`] captures
//! them so the cloud file client and the in-memory test double are
//! interchangeable.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::Project;

/// Metadata of one remote project file, as returned by a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub id: String,
    pub name: String,
    pub modified_at: Option<DateTime<Utc>>,
}

/// Remote store holding one JSON file per project.
#[async_trait]
pub trait ProjectRemote: Send + Sync {
    /// Upload `project`.
    ///
    /// When `project.drive_file_id` is set the existing file is overwritten
    /// and its id returned unchanged; otherwise a new file is created and
    /// its fresh id returned.
    async fn save_project(&self, project: &Project) -> Result<String>;

    /// List project files, newest-modified first.
    async fn list_project_files(&self) -> Result<Vec<RemoteFile>>;

    /// Download and decode a project file. The returned project carries
    /// `file_id` as its `drive_file_id`.
    async fn load_project(&self, file_id: &str) -> Result<Project>;

    /// Delete a project file.
    async fn delete_project(&self, file_id: &str) -> Result<()>;
}
