//! In-memory [`ProjectRemote`] for tests.
//!
//! Behaves like the cloud file store as far as the sync manager can tell:
//! create assigns a fresh id, update of an unknown id fails, listing is
//! newest-modified first. Failures can be injected for listing, for loads
//! of specific files, or for saves of specific projects, and every save is
//! counted per project id.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{ProjectRemote, RemoteFile};
use crate::models::Project;

struct StoredFile {
    name: String,
    body: String,
    modified_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct MemoryRemote {
    files: RwLock<HashMap<String, StoredFile>>,
    saves: RwLock<HashMap<String, usize>>,
    failing_saves: RwLock<HashSet<String>>,
    failing_loads: RwLock<HashSet<String>>,
    fail_listing: AtomicBool,
    next_id: AtomicU64,
    clock: AtomicU64,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every listing call fail, as if the service were unreachable.
    pub fn set_fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    /// Make saves of the project with this local id fail.
    pub fn fail_saves_for(&self, project_id: &str) {
        self.failing_saves
            .write()
            .unwrap()
            .insert(project_id.to_string());
    }

    /// Make downloads of this file fail while it still shows in listings.
    pub fn fail_loads_for(&self, file_id: &str) {
        self.failing_loads
            .write()
            .unwrap()
            .insert(file_id.to_string());
    }

    /// Number of successful saves recorded for a local project id.
    pub fn save_count(&self, project_id: &str) -> usize {
        self.saves
            .read()
            .unwrap()
            .get(project_id)
            .copied()
            .unwrap_or(0)
    }

    /// Total successful saves across all projects.
    pub fn total_saves(&self) -> usize {
        self.saves.read().unwrap().values().sum()
    }

    pub fn file_count(&self) -> usize {
        self.files.read().unwrap().len()
    }

    /// Ids of files whose content decodes to a project with this local id.
    pub fn files_for_project(&self, project_id: &str) -> Vec<String> {
        self.files
            .read()
            .unwrap()
            .iter()
            .filter(|(_, f)| {
                serde_json::from_str::<Project>(&f.body)
                    .map(|p| p.id == project_id)
                    .unwrap_or(false)
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Place a project file directly, as another device would.
    pub fn insert_remote(&self, project: &Project) -> String {
        let id = self.fresh_id();
        let mut stored = project.clone();
        stored.drive_file_id = None;
        let body = serde_json::to_string(&stored).unwrap_or_default();
        self.files.write().unwrap().insert(
            id.clone(),
            StoredFile {
                name: format!("{}.project.json", project.name),
                body,
                modified_at: self.tick(),
            },
        );
        id
    }

    fn fresh_id(&self) -> String {
        format!("mem-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn tick(&self) -> DateTime<Utc> {
        let n = self.clock.fetch_add(1, Ordering::SeqCst) as i64;
        DateTime::from_timestamp(1_700_000_000 + n, 0).unwrap_or_default()
    }
}

#[async_trait]
impl ProjectRemote for MemoryRemote {
    async fn save_project(&self, project: &Project) -> Result<String> {
        if self.failing_saves.read().unwrap().contains(&project.id) {
            bail!("injected save failure for project {}", project.id);
        }
        let body = serde_json::to_string(project)?;
        let modified_at = self.tick();
        let id = {
            let mut files = self.files.write().unwrap();
            match &project.drive_file_id {
                Some(id) => {
                    let file = files
                        .get_mut(id)
                        .ok_or_else(|| anyhow!("update of unknown file {} (HTTP 404)", id))?;
                    file.body = body;
                    file.modified_at = modified_at;
                    id.clone()
                }
                None => {
                    let id = self.fresh_id();
                    files.insert(
                        id.clone(),
                        StoredFile {
                            name: format!("{}.project.json", project.name),
                            body,
                            modified_at,
                        },
                    );
                    id
                }
            }
        };
        *self
            .saves
            .write()
            .unwrap()
            .entry(project.id.clone())
            .or_insert(0) += 1;
        Ok(id)
    }

    async fn list_project_files(&self) -> Result<Vec<RemoteFile>> {
        if self.fail_listing.load(Ordering::SeqCst) {
            bail!("listProjectFiles failed: service unreachable");
        }
        let mut out: Vec<RemoteFile> = self
            .files
            .read()
            .unwrap()
            .iter()
            .map(|(id, f)| RemoteFile {
                id: id.clone(),
                name: f.name.clone(),
                modified_at: Some(f.modified_at),
            })
            .collect();
        out.sort_by(|a, b| b.modified_at.cmp(&a.modified_at));
        Ok(out)
    }

    async fn load_project(&self, file_id: &str) -> Result<Project> {
        if self.failing_loads.read().unwrap().contains(file_id) {
            bail!("injected download failure for file {}", file_id);
        }
        let body = self
            .files
            .read()
            .unwrap()
            .get(file_id)
            .map(|f| f.body.clone())
            .ok_or_else(|| anyhow!("file {} not found (HTTP 404)", file_id))?;
        let mut project: Project = serde_json::from_str(&body)?;
        project.drive_file_id = Some(file_id.to_string());
        Ok(project)
    }

    async fn delete_project(&self, file_id: &str) -> Result<()> {
        self.files
            .write()
            .unwrap()
            .remove(file_id)
            .map(|_| ())
            .ok_or_else(|| anyhow!("file {} not found (HTTP 404)", file_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_update_keeps_file_id() {
        let remote = MemoryRemote::new();
        let mut project = Project::new("Supplier audit");

        let id = remote.save_project(&project).await.unwrap();
        project.drive_file_id = Some(id.clone());
        let again = remote.save_project(&project).await.unwrap();

        assert_eq!(id, again);
        assert_eq!(remote.file_count(), 1);
        assert_eq!(remote.save_count(&project.id), 2);
    }

    #[tokio::test]
    async fn listing_is_newest_first_and_load_stamps_id() {
        let remote = MemoryRemote::new();
        let older = remote.insert_remote(&Project::new("older"));
        let newer = remote.insert_remote(&Project::new("newer"));

        let files = remote.list_project_files().await.unwrap();
        assert_eq!(files[0].id, newer);
        assert_eq!(files[1].id, older);

        let loaded = remote.load_project(&older).await.unwrap();
        assert_eq!(loaded.drive_file_id.as_deref(), Some(older.as_str()));
    }
}
