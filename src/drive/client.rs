//! Remote file client.
//!
//! Stores one JSON file per project and one knowledge-base file per scope
//! in a Drive-style file service. Addressing has two modes:
//!
//! | Mode | Projects live in | Knowledge bases live in |
//! |------|------------------|-------------------------|
//! | private | the application folder (found or created by name) | the application folder |
//! | shared | `<shared root>/Projects` | `<shared root>/Knowledge-Bases` |
//!
//! Folder and file ids are resolved once and memoized on the client
//! instance. Resolution happens under an async mutex, so concurrent callers
//! never create the same folder twice. Switching modes drops every cached
//! id.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::CONTENT_TYPE;
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use project_sync_core::models::{GlobalKnowledgeBases, Project, SharedRepositoryConfig};
use project_sync_core::remote::{ProjectRemote, RemoteFile};

use super::auth::TokenManager;
use super::error::DriveError;
use crate::config::DriveConfig;

pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
pub const PROJECT_FILE_SUFFIX: &str = ".project.json";
pub const KNOWLEDGE_BASE_FILE_NAME: &str = "knowledge-bases.json";
pub const SHARED_PROJECTS_FOLDER: &str = "Projects";
pub const SHARED_KNOWLEDGE_BASES_FOLDER: &str = "Knowledge-Bases";

const MAX_FILE_STEM_LEN: usize = 100;
const PAGE_SIZE: u32 = 100;

/// File name for a project: sanitized name plus [`PROJECT_FILE_SUFFIX`].
///
/// ```
/// use project_sync::drive::client::project_file_name;
/// assert_eq!(project_file_name("Q3 / Vendor: ACME"), "Q3 _ Vendor_ ACME.project.json");
/// assert_eq!(project_file_name("  "), "untitled.project.json");
/// ```
pub fn project_file_name(project_name: &str) -> String {
    format!("{}{}", sanitize_file_name(project_name), PROJECT_FILE_SUFFIX)
}

/// Replace characters outside `[A-Za-z0-9 _-]` with `_`, trim, and cap
/// the length. Empty names become `untitled`.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == ' ' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed: String = cleaned.trim().chars().take(MAX_FILE_STEM_LEN).collect();
    let trimmed = trimmed.trim_end();
    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Escape a literal for use inside a single-quoted search query.
pub fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<FileMeta>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileMeta {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    modified_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct CreatedFile {
    id: String,
}

/// The account the client is signed in as.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveUser {
    pub email_address: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Deserialize)]
struct About {
    user: DriveUser,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NewFile<'a> {
    name: &'a str,
    mime_type: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    parents: Vec<&'a str>,
}

/// Memoized addressing state. Replaced wholesale on a mode switch.
#[derive(Debug, Default)]
struct Addressing {
    shared: Option<SharedRepositoryConfig>,
    app_folder_id: Option<String>,
    projects_folder_id: Option<String>,
    knowledge_folder_id: Option<String>,
    knowledge_file_id: Option<String>,
}

/// Client for project and knowledge-base files.
pub struct DriveClient {
    http: reqwest::Client,
    api_base: String,
    upload_base: String,
    app_folder_name: String,
    auth: TokenManager,
    addressing: Mutex<Addressing>,
}

impl DriveClient {
    pub fn new(config: &DriveConfig, http: reqwest::Client, auth: TokenManager) -> Self {
        Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            upload_base: config.upload_base.trim_end_matches('/').to_string(),
            app_folder_name: config.app_folder_name.clone(),
            auth,
            addressing: Mutex::new(Addressing::default()),
        }
    }

    /// HTTP client with the configured timeout.
    pub fn http_client(config: &DriveConfig) -> anyhow::Result<reqwest::Client> {
        Ok(reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?)
    }

    pub fn auth(&self) -> &TokenManager {
        &self.auth
    }

    // ── Mode ────────────────────────────────────────────────────────────

    /// Switch between private and shared addressing. Drops every cached
    /// folder and file id.
    pub async fn set_shared_repository_config(&self, config: Option<SharedRepositoryConfig>) {
        let mut addressing = self.addressing.lock().await;
        tracing::debug!(shared = ?config, "switching repository mode");
        *addressing = Addressing {
            shared: config,
            ..Addressing::default()
        };
    }

    pub async fn shared_repository_config(&self) -> Option<SharedRepositoryConfig> {
        self.addressing.lock().await.shared.clone()
    }

    // ── HTTP plumbing ───────────────────────────────────────────────────

    async fn send(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<Response, DriveError> {
        let token = self.auth.ensure_valid_token().await?;
        let resp = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| DriveError::network(operation, e))?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            self.auth.invalidate().await;
            return Err(DriveError::Auth(format!(
                "{} was rejected: access token no longer valid",
                operation
            )));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::debug!(operation, status = status.as_u16(), "remote request failed");
            return Err(DriveError::Http {
                operation,
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }

    async fn json<T: DeserializeOwned>(
        operation: &'static str,
        resp: Response,
    ) -> Result<T, DriveError> {
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| DriveError::network(operation, e))?;
        serde_json::from_slice(&bytes).map_err(|e| DriveError::decode(operation, e))
    }

    /// Run a file search, following pagination.
    async fn search(
        &self,
        operation: &'static str,
        query: &str,
        order_by: Option<&str>,
    ) -> Result<Vec<FileMeta>, DriveError> {
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut params: Vec<(&str, String)> = vec![
                ("q", query.to_string()),
                ("fields", "nextPageToken, files(id, name, modifiedTime)".into()),
                ("spaces", "drive".into()),
                ("pageSize", PAGE_SIZE.to_string()),
                ("supportsAllDrives", "true".into()),
                ("includeItemsFromAllDrives", "true".into()),
            ];
            if let Some(order) = order_by {
                params.push(("orderBy", order.to_string()));
            }
            if let Some(token) = &page_token {
                params.push(("pageToken", token.clone()));
            }

            let req = self
                .http
                .get(format!("{}/files", self.api_base))
                .query(&params);
            let page: FileList = Self::json(operation, self.send(operation, req).await?).await?;
            files.extend(page.files);

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        Ok(files)
    }

    /// Find a folder by exact name, globally or within `parent`.
    async fn find_folder(
        &self,
        name: &str,
        parent: Option<&str>,
    ) -> Result<Option<String>, DriveError> {
        let mut query = format!(
            "name = '{}' and mimeType = '{}' and trashed = false",
            escape_query(name),
            FOLDER_MIME_TYPE
        );
        if let Some(parent) = parent {
            query.push_str(&format!(" and '{}' in parents", escape_query(parent)));
        }
        let found = self.search("find folder", &query, None).await?;
        Ok(found.into_iter().next().map(|f| f.id))
    }

    async fn create_folder(&self, name: &str, parent: Option<&str>) -> Result<String, DriveError> {
        let metadata = NewFile {
            name,
            mime_type: FOLDER_MIME_TYPE,
            parents: parent.into_iter().collect(),
        };
        let req = self
            .http
            .post(format!("{}/files", self.api_base))
            .query(&[("fields", "id"), ("supportsAllDrives", "true")])
            .json(&metadata);
        let created: CreatedFile =
            Self::json("create folder", self.send("create folder", req).await?).await?;
        tracing::info!(name, id = %created.id, "created remote folder");
        Ok(created.id)
    }

    async fn find_or_create_folder(
        &self,
        name: &str,
        parent: Option<&str>,
    ) -> Result<String, DriveError> {
        match self.find_folder(name, parent).await? {
            Some(id) => Ok(id),
            None => self.create_folder(name, parent).await,
        }
    }

    /// Multipart create: JSON metadata plus JSON content in one request.
    async fn create_file(
        &self,
        operation: &'static str,
        name: &str,
        parent: &str,
        content: Vec<u8>,
    ) -> Result<String, DriveError> {
        let metadata = NewFile {
            name,
            mime_type: "application/json",
            parents: vec![parent],
        };
        let metadata =
            serde_json::to_vec(&metadata).map_err(|e| DriveError::decode(operation, e))?;
        let (boundary, body) = multipart_related(&metadata, &content);

        let req = self
            .http
            .post(format!("{}/files", self.upload_base))
            .query(&[
                ("uploadType", "multipart"),
                ("fields", "id"),
                ("supportsAllDrives", "true"),
            ])
            .header(
                CONTENT_TYPE,
                format!("multipart/related; boundary={}", boundary),
            )
            .body(body);
        let created: CreatedFile = Self::json(operation, self.send(operation, req).await?).await?;
        Ok(created.id)
    }

    /// Replace the content of an existing file.
    async fn update_file(
        &self,
        operation: &'static str,
        file_id: &str,
        content: Vec<u8>,
    ) -> Result<(), DriveError> {
        let req = self
            .http
            .patch(format!("{}/files/{}", self.upload_base, file_id))
            .query(&[("uploadType", "media"), ("supportsAllDrives", "true")])
            .header(CONTENT_TYPE, "application/json")
            .body(content);
        self.send(operation, req).await?;
        Ok(())
    }

    async fn download(&self, operation: &'static str, file_id: &str) -> Result<Response, DriveError> {
        let req = self
            .http
            .get(format!("{}/files/{}", self.api_base, file_id))
            .query(&[("alt", "media"), ("supportsAllDrives", "true")]);
        self.send(operation, req).await
    }

    // ── Folder resolution ───────────────────────────────────────────────

    async fn root_folder(&self, addressing: &mut Addressing) -> Result<String, DriveError> {
        if let Some(shared) = &addressing.shared {
            return Ok(shared.folder_id.clone());
        }
        if let Some(id) = &addressing.app_folder_id {
            return Ok(id.clone());
        }
        let id = self
            .find_or_create_folder(&self.app_folder_name, None)
            .await?;
        addressing.app_folder_id = Some(id.clone());
        Ok(id)
    }

    async fn projects_folder(&self, addressing: &mut Addressing) -> Result<String, DriveError> {
        if addressing.shared.is_none() {
            return self.root_folder(addressing).await;
        }
        if let Some(id) = &addressing.projects_folder_id {
            return Ok(id.clone());
        }
        let root = self.root_folder(addressing).await?;
        let id = self
            .find_or_create_folder(SHARED_PROJECTS_FOLDER, Some(&root))
            .await?;
        addressing.projects_folder_id = Some(id.clone());
        Ok(id)
    }

    async fn knowledge_folder(&self, addressing: &mut Addressing) -> Result<String, DriveError> {
        if addressing.shared.is_none() {
            return self.root_folder(addressing).await;
        }
        if let Some(id) = &addressing.knowledge_folder_id {
            return Ok(id.clone());
        }
        let root = self.root_folder(addressing).await?;
        let id = self
            .find_or_create_folder(SHARED_KNOWLEDGE_BASES_FOLDER, Some(&root))
            .await?;
        addressing.knowledge_folder_id = Some(id.clone());
        Ok(id)
    }

    /// Root folder id: the private application folder, or the shared
    /// repository folder in shared mode.
    pub async fn get_or_create_app_folder(&self) -> Result<String, DriveError> {
        let mut addressing = self.addressing.lock().await;
        self.root_folder(&mut addressing).await
    }

    /// Folder `name` directly under the root folder.
    pub async fn get_or_create_subfolder(&self, name: &str) -> Result<String, DriveError> {
        let mut addressing = self.addressing.lock().await;
        match name {
            SHARED_PROJECTS_FOLDER if addressing.shared.is_some() => {
                self.projects_folder(&mut addressing).await
            }
            SHARED_KNOWLEDGE_BASES_FOLDER if addressing.shared.is_some() => {
                self.knowledge_folder(&mut addressing).await
            }
            _ => {
                let root = self.root_folder(&mut addressing).await?;
                self.find_or_create_folder(name, Some(&root)).await
            }
        }
    }

    // ── Project files ───────────────────────────────────────────────────

    /// Upload a project. Overwrites the linked file when `drive_file_id` is
    /// set, otherwise creates a new file and returns its id.
    pub async fn save_project_file(&self, project: &Project) -> Result<String, DriveError> {
        let content =
            serde_json::to_vec(project).map_err(|e| DriveError::decode("save project", e))?;

        if let Some(file_id) = &project.drive_file_id {
            tracing::debug!(project = %project.id, file = %file_id, "updating project file");
            self.update_file("update project file", file_id, content)
                .await?;
            return Ok(file_id.clone());
        }

        let folder = {
            let mut addressing = self.addressing.lock().await;
            self.projects_folder(&mut addressing).await?
        };
        let id = self
            .create_file(
                "create project file",
                &project_file_name(&project.name),
                &folder,
                content,
            )
            .await?;
        tracing::debug!(project = %project.id, file = %id, "created project file");
        Ok(id)
    }

    /// Project files in the projects location, newest-modified first.
    pub async fn list_project_files(&self) -> Result<Vec<RemoteFile>, DriveError> {
        let folder = {
            let mut addressing = self.addressing.lock().await;
            self.projects_folder(&mut addressing).await?
        };
        let query = format!(
            "'{}' in parents and name contains '{}' and trashed = false",
            escape_query(&folder),
            PROJECT_FILE_SUFFIX
        );
        let files = self
            .search("list project files", &query, Some("modifiedTime desc"))
            .await?;
        tracing::debug!(count = files.len(), "listed project files");
        Ok(files
            .into_iter()
            .filter(|f| f.name.ends_with(PROJECT_FILE_SUFFIX))
            .map(|f| RemoteFile {
                id: f.id,
                name: f.name,
                modified_at: f.modified_time,
            })
            .collect())
    }

    /// Download a project file. The result carries `file_id` as its
    /// `drive_file_id`.
    pub async fn load_project_file(&self, file_id: &str) -> Result<Project, DriveError> {
        let resp = self.download("load project file", file_id).await?;
        let mut project: Project = Self::json("load project file", resp).await?;
        project.drive_file_id = Some(file_id.to_string());
        Ok(project)
    }

    pub async fn delete_project_file(&self, file_id: &str) -> Result<(), DriveError> {
        let req = self
            .http
            .delete(format!("{}/files/{}", self.api_base, file_id))
            .query(&[("supportsAllDrives", "true")]);
        self.send("delete project file", req).await?;
        tracing::debug!(file = %file_id, "deleted project file");
        Ok(())
    }

    // ── Knowledge bases ─────────────────────────────────────────────────

    async fn knowledge_file(&self, addressing: &mut Addressing) -> Result<Option<String>, DriveError> {
        if let Some(id) = &addressing.knowledge_file_id {
            return Ok(Some(id.clone()));
        }
        let folder = self.knowledge_folder(addressing).await?;
        let query = format!(
            "name = '{}' and '{}' in parents and trashed = false",
            KNOWLEDGE_BASE_FILE_NAME,
            escape_query(&folder)
        );
        let found = self
            .search("find knowledge base file", &query, Some("modifiedTime desc"))
            .await?;
        let id = found.into_iter().next().map(|f| f.id);
        addressing.knowledge_file_id = id.clone();
        Ok(id)
    }

    /// Global knowledge bases of the current scope. Empty when no file
    /// exists yet.
    pub async fn load_global_knowledge_bases(&self) -> Result<GlobalKnowledgeBases, DriveError> {
        let file_id = {
            let mut addressing = self.addressing.lock().await;
            self.knowledge_file(&mut addressing).await?
        };
        match file_id {
            Some(id) => {
                let resp = self.download("load knowledge bases", &id).await?;
                Self::json("load knowledge bases", resp).await
            }
            None => Ok(GlobalKnowledgeBases::default()),
        }
    }

    /// Write the global knowledge bases, creating the file on first save.
    pub async fn save_global_knowledge_bases(
        &self,
        knowledge: &GlobalKnowledgeBases,
    ) -> Result<String, DriveError> {
        let content = serde_json::to_vec(knowledge)
            .map_err(|e| DriveError::decode("save knowledge bases", e))?;

        let mut addressing = self.addressing.lock().await;
        if let Some(id) = self.knowledge_file(&mut addressing).await? {
            self.update_file("update knowledge bases", &id, content)
                .await?;
            return Ok(id);
        }

        let folder = self.knowledge_folder(&mut addressing).await?;
        let id = self
            .create_file(
                "create knowledge bases",
                KNOWLEDGE_BASE_FILE_NAME,
                &folder,
                content,
            )
            .await?;
        addressing.knowledge_file_id = Some(id.clone());
        Ok(id)
    }

    // ── Account ─────────────────────────────────────────────────────────

    /// The signed-in account.
    pub async fn current_user(&self) -> Result<DriveUser, DriveError> {
        let req = self
            .http
            .get(format!("{}/about", self.api_base))
            .query(&[("fields", "user(emailAddress, displayName)")]);
        let about: About = Self::json("about", self.send("about", req).await?).await?;
        Ok(about.user)
    }
}

/// Build a `multipart/related` body. Returns the boundary and the body.
fn multipart_related(metadata: &[u8], content: &[u8]) -> (String, Vec<u8>) {
    let boundary = format!("psync-{}", Uuid::new_v4().simple());
    let mut body = Vec::with_capacity(metadata.len() + content.len() + 256);
    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(metadata);
    body.extend_from_slice(format!("\r\n--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(b"Content-Type: application/json\r\n\r\n");
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    (boundary, body)
}

#[async_trait]
impl ProjectRemote for DriveClient {
    async fn save_project(&self, project: &Project) -> anyhow::Result<String> {
        Ok(self.save_project_file(project).await?)
    }

    async fn list_project_files(&self) -> anyhow::Result<Vec<RemoteFile>> {
        Ok(DriveClient::list_project_files(self).await?)
    }

    async fn load_project(&self, file_id: &str) -> anyhow::Result<Project> {
        Ok(self.load_project_file(file_id).await?)
    }

    async fn delete_project(&self, file_id: &str) -> anyhow::Result<()> {
        Ok(self.delete_project_file(file_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_and_caps() {
        assert_eq!(sanitize_file_name("ISO 27001 - Gap_Review"), "ISO 27001 - Gap_Review");
        assert_eq!(sanitize_file_name("a/b\\c:d*e"), "a_b_c_d_e");
        assert_eq!(sanitize_file_name(""), "untitled");
        assert_eq!(sanitize_file_name("   "), "untitled");
        assert_eq!(sanitize_file_name("Revisión"), "Revisi_n");
        assert_eq!(sanitize_file_name(&"x".repeat(250)).len(), 100);
    }

    #[test]
    fn query_literals_are_escaped() {
        assert_eq!(escape_query("Bob's audit"), "Bob\\'s audit");
        assert_eq!(escape_query("a\\b"), "a\\\\b");
    }

    #[test]
    fn multipart_body_has_both_parts() {
        let (boundary, body) = multipart_related(br#"{"name":"x"}"#, br#"{"id":"p"}"#);
        let text = String::from_utf8(body).unwrap();
        assert!(text.starts_with(&format!("--{}\r\n", boundary)));
        assert!(text.contains(r#"{"name":"x"}"#));
        assert!(text.contains(r#"{"id":"p"}"#));
        assert!(text.ends_with(&format!("--{}--\r\n", boundary)));
        assert_eq!(text.matches(&format!("--{}", boundary)).count(), 3);
    }
}
