//! Per-identity local storage.
//!
//! Every piece of local state lives in a [`KvStore`] under a key namespaced
//! by the active identity hash:
//!
//! ```text
//! <app>-<identityHash>-projects         JSON array of projects
//! <app>-<identityHash>-active-project   id of the selected project
//! <app>-<identityHash>-settings         JSON object of user settings
//! ```
//!
//! A few unscoped keys hold state needed before (or across) identities:
//!
//! ```text
//! <app>-global-settings   configuration needed before sign-in
//! <app>-current-session   the session used for silent resume
//! <app>-user-registry     every identity seen on this device
//! <app>-projects          \
//! <app>-active-project     > legacy data from before namespacing
//! <app>-settings          /
//! ```
//!
//! Nothing here fails loudly. Store errors and malformed JSON are logged
//! and replaced by defaults; writes report whether they landed.

use std::sync::Arc;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use project_sync_core::kv::KvStore;
use project_sync_core::models::{
    Project, Session, SharedRepositoryConfig, UserProfile, UserRegistry,
};

const KEY_PROJECTS: &str = "projects";
const KEY_ACTIVE_PROJECT: &str = "active-project";
const KEY_SETTINGS: &str = "settings";

const KEY_GLOBAL_SETTINGS: &str = "global-settings";
const KEY_CURRENT_SESSION: &str = "current-session";
const KEY_USER_REGISTRY: &str = "user-registry";

/// Logical keys that existed unscoped before identity namespacing.
const LEGACY_KEYS: [&str; 3] = [KEY_PROJECTS, KEY_ACTIVE_PROJECT, KEY_SETTINGS];

/// Per-identity preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSettings {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_thinking_enabled")]
    pub thinking_enabled: bool,
    #[serde(default)]
    pub self_review_enabled: bool,
    #[serde(default)]
    pub drive_refresh_token: Option<String>,
}

fn default_thinking_enabled() -> bool {
    true
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            thinking_enabled: default_thinking_enabled(),
            self_review_enabled: false,
            drive_refresh_token: None,
        }
    }
}

/// A single setting update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserSetting {
    ApiKey(Option<String>),
    ThinkingEnabled(bool),
    SelfReviewEnabled(bool),
    DriveRefreshToken(Option<String>),
}

impl UserSettings {
    fn apply(&mut self, setting: UserSetting) {
        match setting {
            UserSetting::ApiKey(v) => self.api_key = v,
            UserSetting::ThinkingEnabled(v) => self.thinking_enabled = v,
            UserSetting::SelfReviewEnabled(v) => self.self_review_enabled = v,
            UserSetting::DriveRefreshToken(v) => self.drive_refresh_token = v,
        }
    }
}

/// Unscoped configuration available before any identity is known.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalSettings {
    #[serde(default)]
    pub drive_client_id: Option<String>,
    #[serde(default)]
    pub shared_repository: Option<SharedRepositoryConfig>,
    /// Set when the user switched back to the private folder, so a shared
    /// folder from the config file no longer applies.
    #[serde(default)]
    pub private_repository: bool,
}

impl GlobalSettings {
    /// Shared repository in effect: the stored choice first, then
    /// `configured` unless private mode was chosen explicitly.
    pub fn effective_shared_repository(
        &self,
        configured: Option<&SharedRepositoryConfig>,
    ) -> Option<SharedRepositoryConfig> {
        match &self.shared_repository {
            Some(shared) => Some(shared.clone()),
            None if self.private_repository => None,
            None => configured.cloned(),
        }
    }
}

/// An identity's stored projects and selected project.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserProjects {
    pub projects: Vec<Project>,
    pub active_project_id: Option<String>,
}

/// Result of [`ScopedStore::migrate_unscoped_data`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// No legacy keys were present.
    NothingToMigrate,
    /// Legacy keys were copied into the identity's namespace and removed.
    Migrated { keys: usize },
    /// The identity already had scoped data; legacy keys were only removed.
    SkippedExisting { removed: usize },
    /// The store could not be inspected or a copy failed. Legacy keys are
    /// left in place and the next sign-in retries.
    Deferred,
}

/// Identity-namespaced view over a [`KvStore`].
#[derive(Clone)]
pub struct ScopedStore {
    kv: Arc<dyn KvStore>,
    app: String,
}

impl ScopedStore {
    pub fn new(kv: Arc<dyn KvStore>, app_prefix: impl Into<String>) -> Self {
        Self {
            kv,
            app: app_prefix.into(),
        }
    }

    /// `<app>-<identityHash>-<logicalKey>`
    pub fn scoped_key(&self, identity_hash: &str, logical: &str) -> String {
        format!("{}-{}-{}", self.app, identity_hash, logical)
    }

    fn global_key(&self, name: &str) -> String {
        format!("{}-{}", self.app, name)
    }

    async fn read_raw(&self, key: &str) -> Option<String> {
        match self.kv.get(key).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(key, error = %e, "local store read failed");
                None
            }
        }
    }

    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.read_raw(key).await?;
        match serde_json::from_str(&raw) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(key, error = %e, "ignoring malformed stored JSON");
                None
            }
        }
    }

    async fn write_raw(&self, key: &str, value: &str) -> bool {
        match self.kv.set(key, value).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key, error = %e, "local store write failed");
                false
            }
        }
    }

    async fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> bool {
        match serde_json::to_string(value) {
            Ok(json) => self.write_raw(key, &json).await,
            Err(e) => {
                tracing::warn!(key, error = %e, "could not serialize value for local store");
                false
            }
        }
    }

    async fn remove(&self, key: &str) -> bool {
        match self.kv.remove(key).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key, error = %e, "local store remove failed");
                false
            }
        }
    }

    // ── Projects ────────────────────────────────────────────────────────

    pub async fn load_user_projects(&self, identity_hash: &str) -> UserProjects {
        let projects = self
            .read_json::<Vec<Project>>(&self.scoped_key(identity_hash, KEY_PROJECTS))
            .await
            .unwrap_or_default();
        let active_project_id = self
            .read_raw(&self.scoped_key(identity_hash, KEY_ACTIVE_PROJECT))
            .await
            .filter(|id| !id.is_empty());
        UserProjects {
            projects,
            active_project_id,
        }
    }

    pub async fn save_user_projects(
        &self,
        identity_hash: &str,
        projects: &[Project],
        active_project_id: Option<&str>,
    ) -> bool {
        let saved = self
            .write_json(&self.scoped_key(identity_hash, KEY_PROJECTS), projects)
            .await;
        let active_key = self.scoped_key(identity_hash, KEY_ACTIVE_PROJECT);
        let pointer = match active_project_id {
            Some(id) => self.write_raw(&active_key, id).await,
            None => self.remove(&active_key).await,
        };
        saved && pointer
    }

    // ── Settings ────────────────────────────────────────────────────────

    pub async fn load_user_settings(&self, identity_hash: &str) -> UserSettings {
        self.read_json(&self.scoped_key(identity_hash, KEY_SETTINGS))
            .await
            .unwrap_or_default()
    }

    pub async fn save_user_setting(&self, identity_hash: &str, setting: UserSetting) -> bool {
        let mut settings = self.load_user_settings(identity_hash).await;
        settings.apply(setting);
        self.write_json(&self.scoped_key(identity_hash, KEY_SETTINGS), &settings)
            .await
    }

    pub async fn load_global_settings(&self) -> GlobalSettings {
        self.read_json(&self.global_key(KEY_GLOBAL_SETTINGS))
            .await
            .unwrap_or_default()
    }

    pub async fn save_global_settings(&self, settings: &GlobalSettings) -> bool {
        self.write_json(&self.global_key(KEY_GLOBAL_SETTINGS), settings)
            .await
    }

    // ── Session & registry ──────────────────────────────────────────────

    pub async fn persist_session(&self, profile: &UserProfile) -> bool {
        let session = Session {
            profile: profile.clone(),
            signed_in_at: Utc::now(),
        };
        self.write_json(&self.global_key(KEY_CURRENT_SESSION), &session)
            .await
    }

    pub async fn load_persisted_session(&self) -> Option<Session> {
        self.read_json(&self.global_key(KEY_CURRENT_SESSION)).await
    }

    pub async fn clear_persisted_session(&self) -> bool {
        self.remove(&self.global_key(KEY_CURRENT_SESSION)).await
    }

    pub async fn load_user_registry(&self) -> UserRegistry {
        self.read_json(&self.global_key(KEY_USER_REGISTRY))
            .await
            .unwrap_or_default()
    }

    /// Upsert `profile` into the device registry and mark it most recently
    /// active.
    pub async fn add_user_to_registry(&self, profile: &UserProfile) -> bool {
        let mut registry = self.load_user_registry().await;
        registry.upsert(profile, Utc::now());
        self.write_json(&self.global_key(KEY_USER_REGISTRY), &registry)
            .await
    }

    // ── Migration ───────────────────────────────────────────────────────

    /// Whether the identity already has any scoped keys. `None` when the
    /// store could not be listed.
    async fn scoped_data_state(&self, identity_hash: &str) -> Option<bool> {
        let prefix = format!("{}-{}-", self.app, identity_hash);
        match self.kv.keys_with_prefix(&prefix).await {
            Ok(keys) => Some(!keys.is_empty()),
            Err(e) => {
                tracing::warn!(error = %e, "could not list scoped keys");
                None
            }
        }
    }

    /// Whether the identity already has any scoped keys.
    pub async fn has_scoped_data(&self, identity_hash: &str) -> bool {
        self.scoped_data_state(identity_hash)
            .await
            .unwrap_or(false)
    }

    /// Move pre-namespacing data into `identity_hash`'s namespace.
    ///
    /// Legacy keys are removed only after every one of them was copied; a
    /// failed copy rolls back what was written. If the identity already
    /// owns scoped data the legacy keys are removed without copying. When
    /// the namespace cannot be listed nothing is touched.
    pub async fn migrate_unscoped_data(&self, identity_hash: &str) -> MigrationOutcome {
        let mut legacy = Vec::new();
        for logical in LEGACY_KEYS {
            let key = self.global_key(logical);
            if let Some(value) = self.read_raw(&key).await {
                legacy.push((logical, key, value));
            }
        }
        if legacy.is_empty() {
            return MigrationOutcome::NothingToMigrate;
        }

        match self.scoped_data_state(identity_hash).await {
            None => {
                tracing::warn!(
                    identity = identity_hash,
                    "scoped data unknown; legacy keys kept for a later attempt"
                );
                return MigrationOutcome::Deferred;
            }
            Some(true) => {
                let mut removed = 0;
                for (_, key, _) in &legacy {
                    if self.remove(key).await {
                        removed += 1;
                    }
                }
                tracing::info!(
                    identity = identity_hash,
                    removed,
                    "identity already has scoped data; dropped legacy keys"
                );
                return MigrationOutcome::SkippedExisting { removed };
            }
            Some(false) => {}
        }

        let mut written: Vec<String> = Vec::with_capacity(legacy.len());
        for (logical, _, value) in &legacy {
            let target = self.scoped_key(identity_hash, logical);
            if !self.write_raw(&target, value).await {
                for copied in &written {
                    self.remove(copied).await;
                }
                tracing::warn!(
                    identity = identity_hash,
                    "legacy copy failed; rolled back and kept legacy keys"
                );
                return MigrationOutcome::Deferred;
            }
            written.push(target);
        }

        for (_, key, _) in &legacy {
            self.remove(key).await;
        }
        let keys = written.len();
        tracing::info!(identity = identity_hash, keys, "migrated legacy local data");
        MigrationOutcome::Migrated { keys }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use project_sync_core::identity::{identity_hash, profile_for};
    use project_sync_core::kv::memory::MemoryKv;

    fn store() -> (Arc<MemoryKv>, ScopedStore) {
        let kv = Arc::new(MemoryKv::new());
        let scoped = ScopedStore::new(kv.clone(), "compliance");
        (kv, scoped)
    }

    #[tokio::test]
    async fn identities_do_not_see_each_other() {
        let (_, s) = store();
        let alice = identity_hash("alice@example.com");
        let bob = identity_hash("bob@example.com");

        let project = Project::new("Alice's audit");
        assert!(
            s.save_user_projects(&alice, &[project.clone()], Some(&project.id))
                .await
        );

        let loaded = s.load_user_projects(&alice).await;
        assert_eq!(loaded.projects, vec![project.clone()]);
        assert_eq!(loaded.active_project_id, Some(project.id));
        assert_eq!(s.load_user_projects(&bob).await, UserProjects::default());
    }

    #[tokio::test]
    async fn keys_follow_the_documented_layout() {
        let (kv, s) = store();
        let hash = identity_hash("a@b.com");
        s.save_user_projects(&hash, &[], None).await;
        let keys = kv.keys_with_prefix("compliance-").await.unwrap();
        assert_eq!(keys, vec![format!("compliance-{}-projects", hash)]);
    }

    #[tokio::test]
    async fn corrupt_projects_load_as_empty() {
        let (kv, s) = store();
        let hash = identity_hash("a@b.com");
        kv.set(&s.scoped_key(&hash, "projects"), "{not json")
            .await
            .unwrap();
        assert!(s.load_user_projects(&hash).await.projects.is_empty());
    }

    #[tokio::test]
    async fn settings_have_typed_defaults_and_update_individually() {
        let (_, s) = store();
        let hash = identity_hash("a@b.com");
        let defaults = s.load_user_settings(&hash).await;
        assert_eq!(defaults, UserSettings::default());
        assert!(defaults.thinking_enabled);
        assert!(!defaults.self_review_enabled);

        s.save_user_setting(&hash, UserSetting::SelfReviewEnabled(true))
            .await;
        s.save_user_setting(&hash, UserSetting::ApiKey(Some("sk-123".into())))
            .await;
        let settings = s.load_user_settings(&hash).await;
        assert!(settings.self_review_enabled);
        assert!(settings.thinking_enabled);
        assert_eq!(settings.api_key.as_deref(), Some("sk-123"));
    }

    #[tokio::test]
    async fn session_roundtrip_and_clear() {
        let (_, s) = store();
        let profile = profile_for("Jane@Example.com", Some("Jane".into()));
        assert!(s.load_persisted_session().await.is_none());

        s.persist_session(&profile).await;
        assert_eq!(s.load_persisted_session().await.unwrap().profile, profile);

        s.clear_persisted_session().await;
        assert!(s.load_persisted_session().await.is_none());
    }

    #[tokio::test]
    async fn registry_tracks_last_active_identity() {
        let (_, s) = store();
        let jane = profile_for("jane@example.com", None);
        let joe = profile_for("joe@example.com", None);
        s.add_user_to_registry(&jane).await;
        s.add_user_to_registry(&joe).await;
        s.add_user_to_registry(&jane).await;

        let registry = s.load_user_registry().await;
        assert_eq!(registry.users.len(), 2);
        assert_eq!(registry.users[0].email, "jane@example.com");
        assert_eq!(registry.last_active, Some(jane.identity_hash));
    }

    #[tokio::test]
    async fn legacy_data_is_migrated_once() {
        let (kv, s) = store();
        let project = Project::new("From before namespacing");
        kv.set(
            "compliance-projects",
            &serde_json::to_string(&vec![project.clone()]).unwrap(),
        )
        .await
        .unwrap();
        kv.set("compliance-active-project", &project.id)
            .await
            .unwrap();

        let hash = identity_hash("a@b.com");
        assert_eq!(
            s.migrate_unscoped_data(&hash).await,
            MigrationOutcome::Migrated { keys: 2 }
        );
        assert!(kv.get("compliance-projects").await.unwrap().is_none());
        let loaded = s.load_user_projects(&hash).await;
        assert_eq!(loaded.projects, vec![project.clone()]);
        assert_eq!(loaded.active_project_id, Some(project.id));

        assert_eq!(
            s.migrate_unscoped_data(&hash).await,
            MigrationOutcome::NothingToMigrate
        );
    }

    #[tokio::test]
    async fn migration_skips_identity_with_existing_data() {
        let (kv, s) = store();
        let hash = identity_hash("a@b.com");
        let existing = Project::new("Already scoped");
        s.save_user_projects(&hash, &[existing.clone()], None).await;
        kv.set("compliance-projects", "[]").await.unwrap();
        kv.set("compliance-settings", "{}").await.unwrap();

        assert_eq!(
            s.migrate_unscoped_data(&hash).await,
            MigrationOutcome::SkippedExisting { removed: 2 }
        );
        assert!(kv.get("compliance-projects").await.unwrap().is_none());
        assert_eq!(s.load_user_projects(&hash).await.projects, vec![existing]);
    }

    struct BrokenKv;

    #[async_trait]
    impl KvStore for BrokenKv {
        async fn get(&self, _key: &str) -> Result<Option<String>> {
            bail!("storage unavailable")
        }
        async fn set(&self, _key: &str, _value: &str) -> Result<()> {
            bail!("quota exceeded")
        }
        async fn remove(&self, _key: &str) -> Result<()> {
            bail!("storage unavailable")
        }
        async fn keys_with_prefix(&self, _prefix: &str) -> Result<Vec<String>> {
            bail!("storage unavailable")
        }
    }

    #[test]
    fn stored_repository_choice_overrides_config_file() {
        let configured = SharedRepositoryConfig {
            folder_id: "from-config".into(),
            name: None,
        };
        let chosen = SharedRepositoryConfig {
            folder_id: "chosen".into(),
            name: Some("Team".into()),
        };

        let untouched = GlobalSettings::default();
        assert_eq!(
            untouched.effective_shared_repository(Some(&configured)),
            Some(configured.clone())
        );

        let shared = GlobalSettings {
            shared_repository: Some(chosen.clone()),
            ..GlobalSettings::default()
        };
        assert_eq!(
            shared.effective_shared_repository(Some(&configured)),
            Some(chosen)
        );

        let private = GlobalSettings {
            private_repository: true,
            ..GlobalSettings::default()
        };
        assert_eq!(private.effective_shared_repository(Some(&configured)), None);
    }

    #[tokio::test]
    async fn private_choice_survives_a_reload() {
        let (_, s) = store();
        let settings = GlobalSettings {
            private_repository: true,
            ..GlobalSettings::default()
        };
        assert!(s.save_global_settings(&settings).await);
        let loaded = s.load_global_settings().await;
        assert!(loaded.private_repository);
        assert_eq!(loaded.effective_shared_repository(None), None);
    }

    /// Memory store whose listing or writes to one key can be made to fail.
    #[derive(Default)]
    struct FlakyKv {
        inner: MemoryKv,
        listing_fails: bool,
        failing_key: Mutex<Option<String>>,
    }

    #[async_trait]
    impl KvStore for FlakyKv {
        async fn get(&self, key: &str) -> Result<Option<String>> {
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, value: &str) -> Result<()> {
            if self.failing_key.lock().unwrap().as_deref() == Some(key) {
                bail!("disk full");
            }
            self.inner.set(key, value).await
        }
        async fn remove(&self, key: &str) -> Result<()> {
            self.inner.remove(key).await
        }
        async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
            if self.listing_fails {
                bail!("storage unavailable");
            }
            self.inner.keys_with_prefix(prefix).await
        }
    }

    #[tokio::test]
    async fn unlistable_namespace_leaves_everything_in_place() {
        let kv = Arc::new(FlakyKv {
            listing_fails: true,
            ..FlakyKv::default()
        });
        let s = ScopedStore::new(kv.clone(), "compliance");
        let hash = identity_hash("a@b.com");
        let existing = Project::new("Already scoped");
        assert!(s.save_user_projects(&hash, &[existing.clone()], None).await);
        kv.set("compliance-projects", "[]").await.unwrap();

        assert_eq!(
            s.migrate_unscoped_data(&hash).await,
            MigrationOutcome::Deferred
        );
        assert_eq!(s.load_user_projects(&hash).await.projects, vec![existing]);
        assert_eq!(
            kv.get("compliance-projects").await.unwrap().as_deref(),
            Some("[]")
        );
    }

    #[tokio::test]
    async fn failed_copy_keeps_legacy_keys_until_a_full_copy() {
        let kv = Arc::new(FlakyKv::default());
        let s = ScopedStore::new(kv.clone(), "compliance");
        let hash = identity_hash("a@b.com");
        let project = Project::new("Legacy");
        kv.set(
            "compliance-projects",
            &serde_json::to_string(&vec![project.clone()]).unwrap(),
        )
        .await
        .unwrap();
        kv.set("compliance-settings", "{\"thinkingEnabled\":false}")
            .await
            .unwrap();
        *kv.failing_key.lock().unwrap() = Some(s.scoped_key(&hash, "settings"));

        assert_eq!(
            s.migrate_unscoped_data(&hash).await,
            MigrationOutcome::Deferred
        );
        assert!(kv.get("compliance-projects").await.unwrap().is_some());
        assert!(kv.get("compliance-settings").await.unwrap().is_some());
        assert!(!s.has_scoped_data(&hash).await);

        *kv.failing_key.lock().unwrap() = None;
        assert_eq!(
            s.migrate_unscoped_data(&hash).await,
            MigrationOutcome::Migrated { keys: 2 }
        );
        assert_eq!(s.load_user_projects(&hash).await.projects, vec![project]);
        assert!(!s.load_user_settings(&hash).await.thinking_enabled);
        assert!(kv.get("compliance-settings").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn storage_failures_fall_back_to_defaults() {
        let s = ScopedStore::new(Arc::new(BrokenKv), "compliance");
        let hash = identity_hash("a@b.com");
        assert!(s.load_user_projects(&hash).await.projects.is_empty());
        assert_eq!(s.load_user_settings(&hash).await, UserSettings::default());
        assert!(!s.save_user_projects(&hash, &[], None).await);
        assert_eq!(
            s.migrate_unscoped_data(&hash).await,
            MigrationOutcome::NothingToMigrate
        );
    }
}
