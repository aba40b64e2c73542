//! Core data models shared by the local stores, the remote client, and the
//! sync manager.
//!
//! All types serialize as camelCase JSON so that project files written by
//! any client of the same format can be read back. Nested collections the
//! sync engine never inspects (assessments, analyses, revisions, simulation
//! results) are carried as raw JSON values, and unknown top-level fields are
//! kept in `extra` so a load/save round-trip never drops data.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Map of agent id → documents forming that agent's knowledge base.
pub type AgentKnowledgeBases = BTreeMap<String, Vec<Document>>;

/// A user-owned project aggregate.
///
/// `drive_file_id` links the project to its remote file. Once set it is
/// reused for every later upload; a project never owns two remote files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub assessments: Vec<Value>,
    #[serde(default)]
    pub reference_documents: Vec<Document>,
    #[serde(default)]
    pub uploaded_documents: Vec<Document>,
    #[serde(default)]
    pub agent_knowledge_bases: AgentKnowledgeBases,
    #[serde(default)]
    pub analyses: Vec<Value>,
    #[serde(default)]
    pub document_revisions: Vec<Value>,
    #[serde(default)]
    pub simulation_results: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drive_file_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Project {
    /// Create an empty project with a fresh local identifier.
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description: String::new(),
            created_at: now,
            updated_at: now,
            assessments: Vec::new(),
            reference_documents: Vec::new(),
            uploaded_documents: Vec::new(),
            agent_knowledge_bases: AgentKnowledgeBases::new(),
            analyses: Vec::new(),
            document_revisions: Vec::new(),
            simulation_results: Vec::new(),
            drive_file_id: None,
            last_synced_at: None,
            extra: Map::new(),
        }
    }

    /// Mark the project as modified now.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// An uploaded, reference, or knowledge-base document.
///
/// `text` holds the extracted text. It is empty when the text has been
/// offloaded to the document text store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    pub uploaded_at: DateTime<Utc>,
    #[serde(default)]
    pub text: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Document {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            mime_type: None,
            size: None,
            uploaded_at: Utc::now(),
            text: text.into(),
            extra: Map::new(),
        }
    }
}

/// Knowledge bases shared across all projects of a scope (private or
/// shared repository), stored remotely as a single JSON file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalKnowledgeBases {
    #[serde(default)]
    pub agents: AgentKnowledgeBases,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl GlobalKnowledgeBases {
    pub fn is_empty(&self) -> bool {
        self.agents.values().all(|docs| docs.is_empty())
    }
}

/// Report of one initial sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    /// Projects taken from the remote store.
    pub new_from_drive: usize,
    /// Local-only projects uploaded during the pass.
    pub uploaded_to_drive: usize,
}

/// Display profile of an authenticated identity, as provided by the auth
/// collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub identity_hash: String,
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// The single "current session" record used for silent resume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub profile: UserProfile,
    pub signed_in_at: DateTime<Utc>,
}

/// One identity previously seen on this device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
    pub identity_hash: String,
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

/// Device-wide list of known identities, most recently active first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRegistry {
    #[serde(default)]
    pub users: Vec<RegistryEntry>,
    #[serde(default)]
    pub last_active: Option<String>,
}

impl UserRegistry {
    /// Insert or refresh `profile`, moving it to the front and marking it
    /// as the last active identity.
    pub fn upsert(&mut self, profile: &UserProfile, now: DateTime<Utc>) {
        let first_seen_at = match self
            .users
            .iter()
            .position(|u| u.identity_hash == profile.identity_hash)
        {
            Some(pos) => self.users.remove(pos).first_seen_at,
            None => now,
        };
        self.users.insert(
            0,
            RegistryEntry {
                identity_hash: profile.identity_hash.clone(),
                email: profile.email.clone(),
                display_name: profile.display_name.clone(),
                first_seen_at,
                last_active_at: now,
            },
        );
        self.last_active = Some(profile.identity_hash.clone());
    }
}

/// Location of a shared repository: an externally managed folder that
/// replaces the private application folder as the root of all files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedRepositoryConfig {
    #[serde(alias = "folder_id")]
    pub folder_id: String,
    #[serde(default)]
    pub name: Option<String>,
}
