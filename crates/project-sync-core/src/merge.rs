//! Initial-sync merge policies.
//!
//! A [`MergePolicy`] decides, given the local collection and the projects
//! loaded from the remote store, which projects make up the merged working
//! set and which local projects still have to be uploaded. The sync manager
//! performs the uploads; policies are pure.
//!
//! The shipped policy, [`RemoteAuthoritativeMerge`], resolves at whole
//! project granularity: anything the remote already has replaces the local
//! copy. Concurrent edits of the same project on two devices therefore lose
//! one side. Timestamp or version-vector policies can implement the same
//! trait without touching callers.

use std::collections::{HashMap, HashSet};

use crate::models::Project;

/// Outcome of a merge decision.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergePlan {
    /// Projects taken as-is into the merged result.
    pub merged: Vec<Project>,
    /// Local projects that must be uploaded as new remote files and then
    /// appended to the merged result.
    pub to_upload: Vec<Project>,
    /// Local projects linked to a listed remote file that could not be
    /// loaded. Kept unchanged, link included.
    pub kept_local: Vec<Project>,
}

/// Strategy for reconciling local and remote project collections.
pub trait MergePolicy: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// Build the merge plan. `remote` holds the projects that loaded, in
    /// listing order (newest first), each carrying its `drive_file_id`.
    /// `listed` is every file id the listing returned, loadable or not.
    fn plan(
        &self,
        local: &[Project],
        remote: Vec<Project>,
        listed: &HashSet<String>,
    ) -> MergePlan;
}

/// Remote wins for every project it has; local-only projects are uploaded.
///
/// A local project is considered present remotely if a remote project has
/// the same local id, or if its own `drive_file_id` names a listed remote
/// file. Duplicate remote files for one project id keep only the first
/// (newest) one. Local projects to upload lose any stale `drive_file_id`
/// so they are created fresh rather than updating a file that is gone.
///
/// A local project linked to a file that was listed but not loaded stays
/// as it is: it is neither uploaded again nor unlinked.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoteAuthoritativeMerge;

impl MergePolicy for RemoteAuthoritativeMerge {
    fn name(&self) -> &'static str {
        "remote-authoritative"
    }

    fn plan(
        &self,
        local: &[Project],
        remote: Vec<Project>,
        listed: &HashSet<String>,
    ) -> MergePlan {
        let mut seen_ids = HashSet::new();
        let mut loaded_files = HashSet::new();
        let mut merged = Vec::with_capacity(remote.len());

        for project in remote {
            if let Some(file_id) = &project.drive_file_id {
                loaded_files.insert(file_id.clone());
            }
            if seen_ids.insert(project.id.clone()) {
                merged.push(project);
            }
        }

        let mut to_upload = Vec::new();
        let mut kept_local = Vec::new();
        for p in local {
            if seen_ids.contains(&p.id) {
                continue;
            }
            match p.drive_file_id.as_deref() {
                Some(f) if loaded_files.contains(f) => {}
                Some(f) if listed.contains(f) => kept_local.push(p.clone()),
                _ => {
                    let mut p = p.clone();
                    p.drive_file_id = None;
                    to_upload.push(p);
                }
            }
        }

        MergePlan {
            merged,
            to_upload,
            kept_local,
        }
    }
}

/// Find remote file ids claimed by more than one local project.
///
/// Returns `(file_id, project_ids)` pairs, sorted by file id.
pub fn duplicate_remote_claims(projects: &[Project]) -> Vec<(String, Vec<String>)> {
    let mut claims: HashMap<&str, Vec<String>> = HashMap::new();
    for p in projects {
        if let Some(file_id) = p.drive_file_id.as_deref() {
            claims.entry(file_id).or_default().push(p.id.clone());
        }
    }
    let mut dups: Vec<(String, Vec<String>)> = claims
        .into_iter()
        .filter(|(_, ids)| ids.len() > 1)
        .map(|(f, ids)| (f.to_string(), ids))
        .collect();
    dups.sort_by(|a, b| a.0.cmp(&b.0));
    dups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote_copy(p: &Project, file_id: &str) -> Project {
        let mut r = p.clone();
        r.drive_file_id = Some(file_id.to_string());
        r.name = format!("{} (remote)", p.name);
        r
    }

    fn listed(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn remote_replaces_local_with_same_id() {
        let local = Project::new("Local name");
        let remote = remote_copy(&local, "f1");

        let plan = RemoteAuthoritativeMerge.plan(&[local], vec![remote.clone()], &listed(&["f1"]));
        assert_eq!(plan.merged, vec![remote]);
        assert!(plan.to_upload.is_empty());
    }

    #[test]
    fn local_matched_by_file_id_is_not_uploaded() {
        let mut local = Project::new("Renamed locally");
        local.drive_file_id = Some("f1".into());
        let mut remote = Project::new("Other id");
        remote.drive_file_id = Some("f1".into());

        let plan = RemoteAuthoritativeMerge.plan(&[local], vec![remote], &listed(&["f1"]));
        assert_eq!(plan.merged.len(), 1);
        assert!(plan.to_upload.is_empty());
    }

    #[test]
    fn local_only_projects_are_uploaded_fresh() {
        let fresh = Project::new("Never uploaded");
        let mut orphaned = Project::new("Remote copy deleted");
        orphaned.drive_file_id = Some("gone".into());

        let plan = RemoteAuthoritativeMerge.plan(
            &[fresh.clone(), orphaned.clone()],
            Vec::new(),
            &listed(&[]),
        );
        assert!(plan.merged.is_empty());
        assert_eq!(plan.to_upload.len(), 2);
        assert_eq!(plan.to_upload[0].id, fresh.id);
        assert_eq!(plan.to_upload[1].id, orphaned.id);
        assert!(plan.to_upload.iter().all(|p| p.drive_file_id.is_none()));
    }

    #[test]
    fn unreadable_linked_file_keeps_local_copy() {
        let mut linked = Project::new("Download failed");
        linked.drive_file_id = Some("f1".into());

        let plan = RemoteAuthoritativeMerge.plan(
            &[linked.clone()],
            Vec::new(),
            &listed(&["f1"]),
        );
        assert!(plan.merged.is_empty());
        assert!(plan.to_upload.is_empty());
        assert_eq!(plan.kept_local, vec![linked]);
    }

    #[test]
    fn duplicate_remote_files_keep_newest() {
        let p = Project::new("Twice");
        let newest = remote_copy(&p, "f-new");
        let oldest = remote_copy(&p, "f-old");

        let plan = RemoteAuthoritativeMerge.plan(
            &[],
            vec![newest.clone(), oldest],
            &listed(&["f-new", "f-old"]),
        );
        assert_eq!(plan.merged, vec![newest]);
    }

    #[test]
    fn detects_duplicate_claims() {
        let mut a = Project::new("a");
        let mut b = Project::new("b");
        let mut c = Project::new("c");
        a.drive_file_id = Some("shared".into());
        b.drive_file_id = Some("shared".into());
        c.drive_file_id = Some("own".into());

        let dups = duplicate_remote_claims(&[a.clone(), b.clone(), c]);
        assert_eq!(dups, vec![("shared".to_string(), vec![a.id, b.id])]);
    }
}
