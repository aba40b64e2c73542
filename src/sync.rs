//! Sync manager: initial reconciliation plus debounced pushes.
//!
//! # Initial sync
//!
//! Runs once per session. Every remote project file is loaded and stamped
//! with `last_synced_at`; the configured [`MergePolicy`] decides which
//! local projects still need uploading, and those are uploaded as new
//! files. A failed listing leaves the local collection untouched; a failed
//! load or upload skips that one project. A local project linked to a file
//! that listed but failed to load is kept as it is.
//!
//! # Incremental sync
//!
//! [`SyncManager::schedule_sync`] (re)starts a debounce timer. When it
//! fires, the push runs as its own task, so [`SyncManager::cancel_pending`]
//! only ever stops a timer and never a request in flight. Pushes are
//! single-flight: a pass that starts while another is running is skipped.
//!
//! # Integrity
//!
//! Two local projects claiming the same remote file would overwrite each
//! other on every push. Initial sync refuses such a collection with
//! [`SyncError::DuplicateRemoteId`]; a push pass logs it and does nothing.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;

use project_sync_core::merge::{duplicate_remote_claims, MergePolicy, RemoteAuthoritativeMerge};
use project_sync_core::models::{Project, SyncResult};
use project_sync_core::remote::ProjectRemote;

use crate::drive::DriveError;
use crate::progress::{NoProgress, SyncProgressEvent, SyncProgressReporter};

/// Default debounce window.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(30);

/// Called with the updated collection after a push pass that uploaded at
/// least one project.
pub type SyncedCallback = Arc<dyn Fn(Vec<Project>) + Send + Sync>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("remote file {file_id} is claimed by several local projects: {}", project_ids.join(", "))]
    DuplicateRemoteId {
        file_id: String,
        project_ids: Vec<String>,
    },
}

/// Result of one push pass.
#[derive(Debug, Clone, PartialEq)]
pub struct PushReport {
    /// The input collection with fresh `drive_file_id` / `last_synced_at`
    /// on every project that was pushed.
    pub projects: Vec<Project>,
    pub pushed: usize,
    pub failed: usize,
}

/// Tuning for a [`SyncManager`].
pub struct SyncOptions {
    pub debounce: Duration,
    pub policy: Box<dyn MergePolicy>,
    pub progress: Box<dyn SyncProgressReporter>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            policy: Box::new(RemoteAuthoritativeMerge),
            progress: Box::new(NoProgress),
        }
    }
}

struct Inner {
    remote: Arc<dyn ProjectRemote>,
    options: SyncOptions,
    syncing: AtomicBool,
    pending: Mutex<Option<JoinHandle<()>>>,
    on_synced: Mutex<Option<SyncedCallback>>,
}

/// Clears the in-flight flag when a push pass ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn integrity_check(projects: &[Project]) -> Result<(), SyncError> {
    match duplicate_remote_claims(projects).into_iter().next() {
        Some((file_id, project_ids)) => Err(SyncError::DuplicateRemoteId {
            file_id,
            project_ids,
        }),
        None => Ok(()),
    }
}

impl Inner {
    async fn perform_sync(&self, projects: Vec<Project>) -> Result<Option<PushReport>, SyncError> {
        if self
            .syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("push already in flight; skipping");
            return Ok(None);
        }
        let _guard = InFlight(&self.syncing);

        if let Err(e) = integrity_check(&projects) {
            tracing::error!(error = %e, "refusing to push");
            return Err(e);
        }

        let total = projects.len() as u64;
        let mut updated = Vec::with_capacity(projects.len());
        let mut pushed = 0;
        let mut failed = 0;

        for (i, mut project) in projects.into_iter().enumerate() {
            match self.remote.save_project(&project).await {
                Ok(file_id) => {
                    project.drive_file_id = Some(file_id);
                    project.last_synced_at = Some(Utc::now());
                    pushed += 1;
                }
                Err(e) => {
                    if DriveError::is_auth_error(&e) {
                        tracing::warn!(project = %project.id, error = %e, "push needs sign-in");
                    } else {
                        tracing::warn!(project = %project.id, error = %e, "push failed");
                    }
                    failed += 1;
                }
            }
            updated.push(project);
            self.options.progress.report(SyncProgressEvent::Pushing {
                n: i as u64 + 1,
                total,
            });
        }

        tracing::info!(pushed, failed, "push pass finished");

        if pushed > 0 {
            let callback = self
                .on_synced
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone();
            if let Some(callback) = callback {
                callback(updated.clone());
            }
        }

        Ok(Some(PushReport {
            projects: updated,
            pushed,
            failed,
        }))
    }
}

/// Reconciles the local project collection with a [`ProjectRemote`].
pub struct SyncManager {
    inner: Arc<Inner>,
}

impl SyncManager {
    pub fn new(remote: Arc<dyn ProjectRemote>) -> Self {
        Self::with_options(remote, SyncOptions::default())
    }

    pub fn with_options(remote: Arc<dyn ProjectRemote>, options: SyncOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                remote,
                options,
                syncing: AtomicBool::new(false),
                pending: Mutex::new(None),
                on_synced: Mutex::new(None),
            }),
        }
    }

    /// Register the callback invoked after a successful push pass.
    pub fn on_synced<F>(&self, callback: F)
    where
        F: Fn(Vec<Project>) + Send + Sync + 'static,
    {
        *self.inner.on_synced.lock().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(callback));
    }

    /// One-time reconciliation at session start.
    ///
    /// Returns the merged collection and what happened. A remote outage
    /// yields the local collection unchanged.
    pub async fn initial_sync(
        &self,
        local: Vec<Project>,
    ) -> Result<(Vec<Project>, SyncResult), SyncError> {
        integrity_check(&local)?;

        let inner = &self.inner;
        let progress = &inner.options.progress;
        progress.report(SyncProgressEvent::Listing);

        let files = match inner.remote.list_project_files().await {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!(error = %e, "could not list remote projects; keeping local data");
                return Ok((local, SyncResult::default()));
            }
        };

        let total = files.len() as u64;
        let mut remote = Vec::with_capacity(files.len());
        for (i, file) in files.iter().enumerate() {
            match inner.remote.load_project(&file.id).await {
                Ok(mut project) => {
                    project.drive_file_id = Some(file.id.clone());
                    project.last_synced_at = Some(Utc::now());
                    remote.push(project);
                }
                Err(e) => {
                    tracing::warn!(file = %file.id, name = %file.name, error = %e, "skipping unreadable remote project");
                }
            }
            progress.report(SyncProgressEvent::Pulling {
                n: i as u64 + 1,
                total,
            });
        }

        let listed: HashSet<String> = files.into_iter().map(|f| f.id).collect();
        let plan = inner.options.policy.plan(&local, remote, &listed);
        tracing::debug!(
            policy = inner.options.policy.name(),
            merged = plan.merged.len(),
            to_upload = plan.to_upload.len(),
            kept_local = plan.kept_local.len(),
            "merge planned"
        );

        let mut result = SyncResult {
            new_from_drive: plan.merged.len(),
            uploaded_to_drive: 0,
        };
        let mut merged = plan.merged;
        merged.extend(plan.kept_local);
        let upload_total = plan.to_upload.len() as u64;

        for (i, mut project) in plan.to_upload.into_iter().enumerate() {
            match inner.remote.save_project(&project).await {
                Ok(file_id) => {
                    project.drive_file_id = Some(file_id);
                    project.last_synced_at = Some(Utc::now());
                    result.uploaded_to_drive += 1;
                    merged.push(project);
                }
                Err(e) => {
                    tracing::warn!(project = %project.id, error = %e, "upload failed; keeping local copy");
                    let original = local.iter().find(|p| p.id == project.id).cloned();
                    merged.push(original.unwrap_or(project));
                }
            }
            progress.report(SyncProgressEvent::Pushing {
                n: i as u64 + 1,
                total: upload_total,
            });
        }

        tracing::info!(
            new_from_drive = result.new_from_drive,
            uploaded_to_drive = result.uploaded_to_drive,
            "initial sync finished"
        );
        Ok((merged, result))
    }

    /// Push `projects` once the debounce window passes without another
    /// call. Each call restarts the window.
    pub fn schedule_sync(&self, projects: Vec<Project>) {
        let mut pending = self.inner.pending.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(timer) = pending.take() {
            timer.abort();
        }

        let inner = Arc::clone(&self.inner);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(inner.options.debounce).await;
            tokio::spawn(async move {
                if let Err(e) = inner.perform_sync(projects).await {
                    tracing::error!(error = %e, "scheduled push aborted");
                }
            });
        });
        *pending = Some(timer);
    }

    /// Push `projects` now. Returns `Ok(None)` when another push is
    /// already running.
    pub async fn perform_sync(
        &self,
        projects: Vec<Project>,
    ) -> Result<Option<PushReport>, SyncError> {
        self.inner.perform_sync(projects).await
    }

    /// Stop the pending timer, if any. A push already running is not
    /// affected.
    pub fn cancel_pending(&self) {
        if let Some(timer) = self
            .inner
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            timer.abort();
        }
    }

    /// Whether a debounce timer is waiting to fire.
    pub fn has_pending(&self) -> bool {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|timer| !timer.is_finished())
            .unwrap_or(false)
    }

    pub fn is_syncing(&self) -> bool {
        self.inner.syncing.load(Ordering::Acquire)
    }
}

impl Drop for SyncManager {
    fn drop(&mut self) {
        self.cancel_pending();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use project_sync_core::remote::memory::MemoryRemote;

    #[test]
    fn duplicate_claims_are_reported() {
        let mut a = Project::new("A");
        let mut b = Project::new("B");
        a.drive_file_id = Some("f-1".into());
        b.drive_file_id = Some("f-1".into());
        let err = integrity_check(&[a.clone(), b.clone()]).unwrap_err();
        assert_eq!(
            err,
            SyncError::DuplicateRemoteId {
                file_id: "f-1".into(),
                project_ids: vec![a.id, b.id],
            }
        );
    }

    #[tokio::test]
    async fn in_flight_flag_resets_after_pass() {
        let manager = SyncManager::new(Arc::new(MemoryRemote::new()));
        let report = manager
            .perform_sync(vec![Project::new("A")])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.pushed, 1);
        assert!(!manager.is_syncing());
    }
}
