//! Implementations behind the `psync` subcommands.
//!
//! Each `run_*` function loads what it needs from the configuration,
//! prints human-readable results on stdout, and returns `anyhow` errors
//! for the binary to report.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};

use project_sync_core::identity::profile_for;
use project_sync_core::models::{
    Document, GlobalKnowledgeBases, Project, Session, SharedRepositoryConfig,
};
use project_sync_core::text::{
    forget_project_texts, hydrate_project, offload_project, TextStore,
};

use crate::config::Config;
use crate::db;
use crate::drive::{ConsentHandler, DriveClient, DriveError, OAuthTokenSource, TokenManager};
use crate::kv_sqlite::SqliteKv;
use crate::progress::ProgressMode;
use crate::sync::{SyncManager, SyncOptions};
use crate::text_store::SqliteTextStore;
use crate::user_storage::{GlobalSettings, MigrationOutcome, ScopedStore, UserSetting};

/// Local stores opened from the configuration.
pub struct Local {
    pub store: ScopedStore,
    pub texts: SqliteTextStore,
}

pub async fn open_local(cfg: &Config) -> Result<Local> {
    let kv = SqliteKv::open(db::connect_kv(cfg).await?).await?;
    let texts = SqliteTextStore::open(db::connect_text(cfg).await?).await?;
    Ok(Local {
        store: ScopedStore::new(Arc::new(kv), cfg.storage.app_prefix.clone()),
        texts,
    })
}

async fn require_session(store: &ScopedStore) -> Result<Session> {
    match store.load_persisted_session().await {
        Some(session) => Ok(session),
        None => bail!("Not signed in. Run `psync login` first."),
    }
}

/// Reads the authorization code (or the whole redirect URL) from stdin.
pub struct StdinConsent;

#[async_trait]
impl ConsentHandler for StdinConsent {
    async fn authorization_code(&self, authorization_url: &str) -> Result<String> {
        eprintln!("Open this URL in a browser and authorize access:\n");
        eprintln!("  {}\n", authorization_url);
        eprintln!("Then paste the URL you were redirected to (or just the code):");

        let mut line = String::new();
        BufReader::new(tokio::io::stdin())
            .read_line(&mut line)
            .await
            .context("reading authorization code")?;
        Ok(extract_code(&line))
    }
}

/// Accept either a bare code or a redirect URL carrying `?code=`.
pub fn extract_code(input: &str) -> String {
    let input = input.trim();
    match reqwest::Url::parse(input) {
        Ok(url) => url
            .query_pairs()
            .find(|(k, _)| k == "code")
            .map(|(_, v)| v.into_owned())
            .unwrap_or_default(),
        Err(_) => input.to_string(),
    }
}

/// Build a remote client for `identity_hash`, seeded with its stored
/// refresh token and the active repository mode.
pub async fn connect_drive(
    cfg: &Config,
    store: &ScopedStore,
    identity_hash: Option<&str>,
) -> Result<Arc<DriveClient>> {
    let global = store.load_global_settings().await;
    let client_id = global
        .drive_client_id
        .clone()
        .or_else(|| cfg.drive.client_id.clone())
        .context("No OAuth client id configured. Set [drive] client_id in the config file.")?;

    let refresh = match identity_hash {
        Some(hash) => store.load_user_settings(hash).await.drive_refresh_token,
        None => None,
    };

    let http = DriveClient::http_client(&cfg.drive)?;
    let mut source =
        OAuthTokenSource::new(&cfg.drive, client_id, http.clone()).with_refresh_token(refresh);
    let interactive = atty::is(atty::Stream::Stdin);
    if interactive {
        source = source.with_consent(Arc::new(StdinConsent));
    }
    let mut tokens = TokenManager::new(Arc::new(source));
    if !interactive {
        tokens = tokens.without_interactive();
    }

    let client = DriveClient::new(&cfg.drive, http, tokens);
    let shared = global.effective_shared_repository(cfg.shared_repository.as_ref());
    client.set_shared_repository_config(shared).await;
    Ok(Arc::new(client))
}

/// Persist the client's current refresh token for `identity_hash`.
async fn remember_refresh_token(store: &ScopedStore, identity_hash: &str, client: &DriveClient) {
    if let Some(token) = client.auth().refresh_token() {
        store
            .save_user_setting(identity_hash, UserSetting::DriveRefreshToken(Some(token)))
            .await;
    }
}

fn explain(err: anyhow::Error) -> anyhow::Error {
    if DriveError::is_auth_error(&err) {
        err.context("Remote sign-in required. Run `psync login` again.")
    } else {
        err
    }
}

// ── Identity ────────────────────────────────────────────────────────────

pub async fn run_login(cfg: &Config) -> Result<()> {
    let local = open_local(cfg).await?;
    let client = connect_drive(cfg, &local.store, None).await?;
    let user = client.current_user().await.map_err(anyhow::Error::from)?;

    let profile = profile_for(&user.email_address, user.display_name);
    let store = &local.store;
    store.persist_session(&profile).await;
    store.add_user_to_registry(&profile).await;
    remember_refresh_token(store, &profile.identity_hash, &client).await;

    match store.migrate_unscoped_data(&profile.identity_hash).await {
        MigrationOutcome::Migrated { keys } => {
            println!("Moved {} legacy record(s) into this account.", keys)
        }
        MigrationOutcome::SkippedExisting { removed } => {
            println!("Removed {} stale legacy record(s).", removed)
        }
        MigrationOutcome::Deferred => {
            eprintln!("Legacy local data could not be moved yet; it will be retried next login.")
        }
        MigrationOutcome::NothingToMigrate => {}
    }

    println!(
        "Signed in as {} ({})",
        profile.display_name.as_deref().unwrap_or(&profile.email),
        profile.identity_hash
    );
    Ok(())
}

pub async fn run_logout(cfg: &Config) -> Result<()> {
    let local = open_local(cfg).await?;
    match local.store.load_persisted_session().await {
        Some(session) => {
            local
                .store
                .save_user_setting(
                    &session.profile.identity_hash,
                    UserSetting::DriveRefreshToken(None),
                )
                .await;
            local.store.clear_persisted_session().await;
            println!("Signed out {}.", session.profile.email);
        }
        None => println!("Not signed in."),
    }
    Ok(())
}

pub async fn run_whoami(cfg: &Config) -> Result<()> {
    let local = open_local(cfg).await?;
    match local.store.load_persisted_session().await {
        Some(session) => {
            println!("email:     {}", session.profile.email);
            if let Some(name) = &session.profile.display_name {
                println!("name:      {}", name);
            }
            println!("identity:  {}", session.profile.identity_hash);
            println!("signed in: {}", session.signed_in_at.to_rfc3339());
        }
        None => println!("Not signed in."),
    }
    Ok(())
}

pub async fn run_users(cfg: &Config) -> Result<()> {
    let local = open_local(cfg).await?;
    let registry = local.store.load_user_registry().await;
    if registry.users.is_empty() {
        println!("No users have signed in on this device.");
        return Ok(());
    }
    for user in &registry.users {
        let marker = if registry.last_active.as_deref() == Some(user.identity_hash.as_str()) {
            "*"
        } else {
            " "
        };
        println!(
            "{} {}  {:<32}  last active {}",
            marker,
            user.identity_hash,
            user.email,
            user.last_active_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

// ── Projects ────────────────────────────────────────────────────────────

pub async fn run_projects_list(cfg: &Config) -> Result<()> {
    let local = open_local(cfg).await?;
    let session = require_session(&local.store).await?;
    let stored = local
        .store
        .load_user_projects(&session.profile.identity_hash)
        .await;

    if stored.projects.is_empty() {
        println!("No projects.");
        return Ok(());
    }
    for p in &stored.projects {
        let active = if stored.active_project_id.as_deref() == Some(p.id.as_str()) {
            "*"
        } else {
            " "
        };
        let synced = p
            .last_synced_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{} {}  {:<40}  remote: {:<12}  synced: {}",
            active,
            p.id,
            p.name,
            p.drive_file_id.as_deref().unwrap_or("-"),
            synced
        );
    }
    Ok(())
}

pub async fn run_projects_add(
    cfg: &Config,
    name: &str,
    description: Option<String>,
    documents: &[PathBuf],
) -> Result<()> {
    let local = open_local(cfg).await?;
    let session = require_session(&local.store).await?;
    let hash = &session.profile.identity_hash;

    let mut project = Project::new(name);
    if let Some(description) = description {
        project.description = description;
    }
    for path in documents {
        project.uploaded_documents.push(read_document(path)?);
    }
    offload_project(&local.texts, &mut project).await?;

    let mut stored = local.store.load_user_projects(hash).await;
    stored.projects.push(project.clone());
    if !local
        .store
        .save_user_projects(hash, &stored.projects, Some(&project.id))
        .await
    {
        bail!("could not save projects locally");
    }
    println!("Added project {} ({})", project.name, project.id);
    Ok(())
}

fn read_document(path: &Path) -> Result<Document> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read document: {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let mut doc = Document::new(name, text);
    doc.size = Some(doc.text.len() as u64);
    doc.mime_type = Some("text/plain".to_string());
    Ok(doc)
}

pub async fn run_projects_show(cfg: &Config, id: &str) -> Result<()> {
    let local = open_local(cfg).await?;
    let session = require_session(&local.store).await?;
    let stored = local
        .store
        .load_user_projects(&session.profile.identity_hash)
        .await;
    let mut project = stored
        .projects
        .into_iter()
        .find(|p| p.id == id)
        .with_context(|| format!("No project with id {}", id))?;
    hydrate_project(&local.texts, &mut project).await;
    println!("{}", serde_json::to_string_pretty(&project)?);
    Ok(())
}

pub async fn run_projects_rm(cfg: &Config, id: &str, remote: bool) -> Result<()> {
    let local = open_local(cfg).await?;
    let session = require_session(&local.store).await?;
    let hash = &session.profile.identity_hash;

    let mut stored = local.store.load_user_projects(hash).await;
    let position = stored
        .projects
        .iter()
        .position(|p| p.id == id)
        .with_context(|| format!("No project with id {}", id))?;
    let project = stored.projects.remove(position);

    if remote {
        if let Some(file_id) = &project.drive_file_id {
            let client = connect_drive(cfg, &local.store, Some(hash)).await?;
            client
                .delete_project_file(file_id)
                .await
                .map_err(|e| explain(e.into()))?;
            remember_refresh_token(&local.store, hash, &client).await;
            println!("Deleted remote file {}", file_id);
        }
    }

    let active = stored
        .active_project_id
        .filter(|active| active != &project.id);
    local
        .store
        .save_user_projects(hash, &stored.projects, active.as_deref())
        .await;
    let removed = forget_project_texts(&local.texts, &project.id).await?;
    println!(
        "Removed project {} ({} stored text record(s))",
        project.name, removed
    );
    Ok(())
}

// ── Sync ────────────────────────────────────────────────────────────────

async fn hydrated(texts: &dyn TextStore, projects: Vec<Project>) -> Vec<Project> {
    let mut out = Vec::with_capacity(projects.len());
    for mut p in projects {
        hydrate_project(texts, &mut p).await;
        out.push(p);
    }
    out
}

async fn store_offloaded(
    local: &Local,
    hash: &str,
    projects: Vec<Project>,
    active: Option<&str>,
) -> Result<()> {
    let mut out = Vec::with_capacity(projects.len());
    for mut p in projects {
        offload_project(&local.texts, &mut p).await?;
        out.push(p);
    }
    if !local.store.save_user_projects(hash, &out, active).await {
        bail!("could not save projects locally");
    }
    Ok(())
}

pub async fn run_sync(cfg: &Config, progress: ProgressMode) -> Result<()> {
    let local = open_local(cfg).await?;
    let session = require_session(&local.store).await?;
    let hash = &session.profile.identity_hash;
    let stored = local.store.load_user_projects(hash).await;

    let client = connect_drive(cfg, &local.store, Some(hash)).await?;
    let manager = SyncManager::with_options(
        client.clone(),
        SyncOptions {
            progress: progress.reporter(),
            ..SyncOptions::default()
        },
    );

    let projects = hydrated(&local.texts, stored.projects).await;
    let (merged, result) = manager.initial_sync(projects).await?;
    remember_refresh_token(&local.store, hash, &client).await;

    store_offloaded(&local, hash, merged, stored.active_project_id.as_deref()).await?;
    println!(
        "Sync complete: {} from remote, {} uploaded.",
        result.new_from_drive, result.uploaded_to_drive
    );
    Ok(())
}

pub async fn run_push(cfg: &Config, progress: ProgressMode) -> Result<()> {
    let local = open_local(cfg).await?;
    let session = require_session(&local.store).await?;
    let hash = &session.profile.identity_hash;
    let stored = local.store.load_user_projects(hash).await;
    if stored.projects.is_empty() {
        println!("Nothing to push.");
        return Ok(());
    }

    let client = connect_drive(cfg, &local.store, Some(hash)).await?;
    let manager = SyncManager::with_options(
        client.clone(),
        SyncOptions {
            progress: progress.reporter(),
            ..SyncOptions::default()
        },
    );

    let projects = hydrated(&local.texts, stored.projects).await;
    let report = manager
        .perform_sync(projects)
        .await?
        .context("another push is already running")?;
    remember_refresh_token(&local.store, hash, &client).await;

    if report.pushed > 0 {
        store_offloaded(
            &local,
            hash,
            report.projects,
            stored.active_project_id.as_deref(),
        )
        .await?;
    }
    println!("Pushed {} project(s), {} failed.", report.pushed, report.failed);
    if report.failed > 0 && report.pushed == 0 {
        bail!("no project could be pushed; see the log for details");
    }
    Ok(())
}

// ── Remote files ────────────────────────────────────────────────────────

pub async fn run_remote_list(cfg: &Config) -> Result<()> {
    let local = open_local(cfg).await?;
    let session = require_session(&local.store).await?;
    let hash = &session.profile.identity_hash;
    let client = connect_drive(cfg, &local.store, Some(hash)).await?;

    let files = client
        .list_project_files()
        .await
        .map_err(|e| explain(e.into()))?;
    remember_refresh_token(&local.store, hash, &client).await;

    if files.is_empty() {
        println!("No remote project files.");
    }
    for f in files {
        let modified = f
            .modified_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("{}  {}  {}", f.id, modified, f.name);
    }
    Ok(())
}

pub async fn run_remote_rm(cfg: &Config, file_id: &str) -> Result<()> {
    let local = open_local(cfg).await?;
    let session = require_session(&local.store).await?;
    let hash = &session.profile.identity_hash;
    let client = connect_drive(cfg, &local.store, Some(hash)).await?;
    client
        .delete_project_file(file_id)
        .await
        .map_err(|e| explain(e.into()))?;
    remember_refresh_token(&local.store, hash, &client).await;
    println!("Deleted remote file {}", file_id);
    Ok(())
}

// ── Knowledge bases ─────────────────────────────────────────────────────

pub async fn run_kb_pull(cfg: &Config, out: Option<&Path>) -> Result<()> {
    let local = open_local(cfg).await?;
    let session = require_session(&local.store).await?;
    let hash = &session.profile.identity_hash;
    let client = connect_drive(cfg, &local.store, Some(hash)).await?;

    let knowledge = client
        .load_global_knowledge_bases()
        .await
        .map_err(|e| explain(e.into()))?;
    remember_refresh_token(&local.store, hash, &client).await;

    let json = serde_json::to_string_pretty(&knowledge)?;
    match out {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            let docs: usize = knowledge.agents.values().map(Vec::len).sum();
            println!(
                "Wrote {} agent(s), {} document(s) to {}",
                knowledge.agents.len(),
                docs,
                path.display()
            );
        }
        None => println!("{}", json),
    }
    Ok(())
}

pub async fn run_kb_push(cfg: &Config, file: &Path) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let mut knowledge: GlobalKnowledgeBases = serde_json::from_str(&content)
        .with_context(|| format!("{} is not a knowledge-base file", file.display()))?;
    knowledge.updated_at = Some(chrono::Utc::now());

    let local = open_local(cfg).await?;
    let session = require_session(&local.store).await?;
    let hash = &session.profile.identity_hash;
    let client = connect_drive(cfg, &local.store, Some(hash)).await?;

    let id = client
        .save_global_knowledge_bases(&knowledge)
        .await
        .map_err(|e| explain(e.into()))?;
    remember_refresh_token(&local.store, hash, &client).await;
    println!("Knowledge bases saved to remote file {}", id);
    Ok(())
}

// ── Shared repository ───────────────────────────────────────────────────

pub async fn run_shared_set(cfg: &Config, folder_id: &str, name: Option<String>) -> Result<()> {
    if folder_id.trim().is_empty() {
        bail!("folder id must not be empty");
    }
    let local = open_local(cfg).await?;
    let mut global = local.store.load_global_settings().await;
    global.shared_repository = Some(SharedRepositoryConfig {
        folder_id: folder_id.trim().to_string(),
        name,
    });
    global.private_repository = false;
    save_global(&local, &global).await?;
    println!("Shared repository set to {}", folder_id.trim());
    Ok(())
}

pub async fn run_shared_clear(cfg: &Config) -> Result<()> {
    let local = open_local(cfg).await?;
    let mut global = local.store.load_global_settings().await;
    global.shared_repository = None;
    global.private_repository = true;
    save_global(&local, &global).await?;
    println!("Using the private application folder.");
    Ok(())
}

pub async fn run_shared_show(cfg: &Config) -> Result<()> {
    let local = open_local(cfg).await?;
    let global = local.store.load_global_settings().await;
    match global.effective_shared_repository(cfg.shared_repository.as_ref()) {
        Some(shared) => println!(
            "shared: {} {}",
            shared.folder_id,
            shared.name.as_deref().unwrap_or("")
        ),
        None => println!("private: {}", cfg.drive.app_folder_name),
    }
    Ok(())
}

async fn save_global(local: &Local, global: &GlobalSettings) -> Result<()> {
    if !local.store.save_global_settings(global).await {
        bail!("could not save global settings");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_is_extracted_from_redirect_url() {
        assert_eq!(
            extract_code("http://localhost/?state=abc&code=4%2F0Ab-xyz&scope=drive\n"),
            "4/0Ab-xyz"
        );
        assert_eq!(extract_code("  4/0Ab-xyz \n"), "4/0Ab-xyz");
        assert_eq!(extract_code("http://localhost/?error=access_denied"), "");
    }
}
