//! Document text offloading.
//!
//! Extracted document text can be large, and the per-identity project record
//! lives in a store with tighter size limits. Text is therefore moved into a
//! separate [`TextStore`] keyed by [`DocumentTextKey`] and reattached on
//! demand ("hydration").
//!
//! # Key layout
//!
//! | Scope | Project | Agent | Used for |
//! |-------|---------|-------|----------|
//! | [`TextScope::Uploaded`] | yes | no | a project's uploaded documents |
//! | [`TextScope::ProjectAgent`] | yes | yes | a project's per-agent knowledge base |
//! | [`TextScope::GlobalAgent`] | no | yes | the global knowledge bases |
//!
//! Hydration never fails: a missing record or a store error both resolve to
//! empty text.

pub mod memory;

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{AgentKnowledgeBases, Document, Project};

/// Which collection a text record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextScope {
    Uploaded,
    ProjectAgent,
    GlobalAgent,
}

impl TextScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            TextScope::Uploaded => "uploaded",
            TextScope::ProjectAgent => "project-agent",
            TextScope::GlobalAgent => "global-agent",
        }
    }
}

impl fmt::Display for TextScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Composite key of a document text record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentTextKey {
    pub scope: TextScope,
    pub project_id: Option<String>,
    pub agent_id: Option<String>,
    pub document_id: String,
}

impl DocumentTextKey {
    pub fn uploaded(project_id: &str, document_id: &str) -> Self {
        Self {
            scope: TextScope::Uploaded,
            project_id: Some(project_id.to_string()),
            agent_id: None,
            document_id: document_id.to_string(),
        }
    }

    pub fn project_agent(project_id: &str, agent_id: &str, document_id: &str) -> Self {
        Self {
            scope: TextScope::ProjectAgent,
            project_id: Some(project_id.to_string()),
            agent_id: Some(agent_id.to_string()),
            document_id: document_id.to_string(),
        }
    }

    pub fn global_agent(agent_id: &str, document_id: &str) -> Self {
        Self {
            scope: TextScope::GlobalAgent,
            project_id: None,
            agent_id: Some(agent_id.to_string()),
            document_id: document_id.to_string(),
        }
    }

    /// Flat storage key: `scope|project|agent|document`, `-` for absent parts.
    ///
    /// Parts are escaped (`%` as `%25`, `|` as `%7C`, a literal `-` as
    /// `%2D`), so distinct keys never share a storage key. Plain ids are
    /// stored unchanged.
    pub fn storage_key(&self) -> String {
        let optional = |part: &Option<String>| match part {
            Some(p) => escape_key_part(p),
            None => "-".to_string(),
        };
        format!(
            "{}|{}|{}|{}",
            self.scope,
            optional(&self.project_id),
            optional(&self.agent_id),
            escape_key_part(&self.document_id)
        )
    }
}

fn escape_key_part(part: &str) -> String {
    if part == "-" {
        return "%2D".to_string();
    }
    part.replace('%', "%25").replace('|', "%7C")
}

/// A stored text body.
#[derive(Debug, Clone, PartialEq)]
pub struct TextRecord {
    pub text: String,
    pub updated_at: DateTime<Utc>,
}

/// Abstract document text store.
#[async_trait]
pub trait TextStore: Send + Sync {
    /// Insert or replace the text stored under `key`.
    async fn put_document_text(&self, key: &DocumentTextKey, text: &str) -> Result<()>;

    /// Read the record stored under `key`.
    async fn get_document_text(&self, key: &DocumentTextKey) -> Result<Option<TextRecord>>;

    /// Delete the record stored under `key`. Absent keys are not an error.
    async fn delete_document_text(&self, key: &DocumentTextKey) -> Result<()>;

    /// Delete every record whose key names `project_id`. Returns the number
    /// of records removed.
    async fn delete_project_texts(&self, project_id: &str) -> Result<u64>;
}

/// Stored text for `key`, or an empty string when absent or unreadable.
pub async fn text_or_empty(store: &dyn TextStore, key: &DocumentTextKey) -> String {
    match store.get_document_text(key).await {
        Ok(Some(record)) => record.text,
        _ => String::new(),
    }
}

async fn hydrate_docs<F>(store: &dyn TextStore, docs: &[Document], key_for: F) -> Vec<Document>
where
    F: Fn(&Document) -> DocumentTextKey,
{
    let mut out = Vec::with_capacity(docs.len());
    for doc in docs {
        let mut doc = doc.clone();
        if doc.text.is_empty() {
            doc.text = text_or_empty(store, &key_for(&doc)).await;
        }
        out.push(doc);
    }
    out
}

/// Reattach offloaded text to a project's uploaded documents.
pub async fn hydrate_uploaded_documents(
    store: &dyn TextStore,
    project_id: &str,
    docs: &[Document],
) -> Vec<Document> {
    hydrate_docs(store, docs, |d| DocumentTextKey::uploaded(project_id, &d.id)).await
}

/// Reattach offloaded text to a project's per-agent knowledge bases.
pub async fn hydrate_agent_knowledge_bases(
    store: &dyn TextStore,
    project_id: &str,
    kbs: &AgentKnowledgeBases,
) -> AgentKnowledgeBases {
    let mut out = AgentKnowledgeBases::new();
    for (agent_id, docs) in kbs {
        let hydrated = hydrate_docs(store, docs, |d| {
            DocumentTextKey::project_agent(project_id, agent_id, &d.id)
        })
        .await;
        out.insert(agent_id.clone(), hydrated);
    }
    out
}

/// Reattach offloaded text to the global knowledge bases.
pub async fn hydrate_global_knowledge_bases(
    store: &dyn TextStore,
    kbs: &AgentKnowledgeBases,
) -> AgentKnowledgeBases {
    let mut out = AgentKnowledgeBases::new();
    for (agent_id, docs) in kbs {
        let hydrated =
            hydrate_docs(store, docs, |d| DocumentTextKey::global_agent(agent_id, &d.id)).await;
        out.insert(agent_id.clone(), hydrated);
    }
    out
}

/// Hydrate every offloaded collection of a project in place.
pub async fn hydrate_project(store: &dyn TextStore, project: &mut Project) {
    project.uploaded_documents =
        hydrate_uploaded_documents(store, &project.id, &project.uploaded_documents).await;
    project.agent_knowledge_bases =
        hydrate_agent_knowledge_bases(store, &project.id, &project.agent_knowledge_bases).await;
}

async fn offload_docs<F>(
    store: &dyn TextStore,
    docs: &[Document],
    key_for: F,
) -> Result<Vec<Document>>
where
    F: Fn(&Document) -> DocumentTextKey,
{
    let mut out = Vec::with_capacity(docs.len());
    for doc in docs {
        let mut doc = doc.clone();
        if !doc.text.is_empty() {
            store.put_document_text(&key_for(&doc), &doc.text).await?;
            doc.text.clear();
        }
        out.push(doc);
    }
    Ok(out)
}

/// Move inline text of uploaded documents into the store.
///
/// Returns the documents with empty `text`. Documents that are already
/// empty are left alone, so an existing record is never overwritten with
/// nothing.
pub async fn offload_uploaded_documents(
    store: &dyn TextStore,
    project_id: &str,
    docs: &[Document],
) -> Result<Vec<Document>> {
    offload_docs(store, docs, |d| DocumentTextKey::uploaded(project_id, &d.id)).await
}

/// Move inline text of a project's per-agent knowledge bases into the store.
pub async fn offload_agent_knowledge_bases(
    store: &dyn TextStore,
    project_id: &str,
    kbs: &AgentKnowledgeBases,
) -> Result<AgentKnowledgeBases> {
    let mut out = AgentKnowledgeBases::new();
    for (agent_id, docs) in kbs {
        let stripped = offload_docs(store, docs, |d| {
            DocumentTextKey::project_agent(project_id, agent_id, &d.id)
        })
        .await?;
        out.insert(agent_id.clone(), stripped);
    }
    Ok(out)
}

/// Move inline text of the global knowledge bases into the store.
pub async fn offload_global_knowledge_bases(
    store: &dyn TextStore,
    kbs: &AgentKnowledgeBases,
) -> Result<AgentKnowledgeBases> {
    let mut out = AgentKnowledgeBases::new();
    for (agent_id, docs) in kbs {
        let stripped =
            offload_docs(store, docs, |d| DocumentTextKey::global_agent(agent_id, &d.id)).await?;
        out.insert(agent_id.clone(), stripped);
    }
    Ok(out)
}

/// Offload every text-bearing collection of a project in place.
pub async fn offload_project(store: &dyn TextStore, project: &mut Project) -> Result<()> {
    project.uploaded_documents =
        offload_uploaded_documents(store, &project.id, &project.uploaded_documents).await?;
    project.agent_knowledge_bases =
        offload_agent_knowledge_bases(store, &project.id, &project.agent_knowledge_bases).await?;
    Ok(())
}

/// Remove an uploaded document from a project together with its text record.
///
/// Returns `true` if the document was present.
pub async fn remove_uploaded_document(
    store: &dyn TextStore,
    project: &mut Project,
    document_id: &str,
) -> Result<bool> {
    let before = project.uploaded_documents.len();
    project.uploaded_documents.retain(|d| d.id != document_id);
    store
        .delete_document_text(&DocumentTextKey::uploaded(&project.id, document_id))
        .await?;
    Ok(project.uploaded_documents.len() != before)
}

/// Remove a document from one of a project's agent knowledge bases
/// together with its text record.
pub async fn remove_agent_document(
    store: &dyn TextStore,
    project: &mut Project,
    agent_id: &str,
    document_id: &str,
) -> Result<bool> {
    let removed = match project.agent_knowledge_bases.get_mut(agent_id) {
        Some(docs) => {
            let before = docs.len();
            docs.retain(|d| d.id != document_id);
            docs.len() != before
        }
        None => false,
    };
    store
        .delete_document_text(&DocumentTextKey::project_agent(
            &project.id,
            agent_id,
            document_id,
        ))
        .await?;
    Ok(removed)
}

/// Delete every text record belonging to a project.
pub async fn forget_project_texts(store: &dyn TextStore, project_id: &str) -> Result<u64> {
    store.delete_project_texts(project_id).await
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryTextStore;
    use super::*;

    #[test]
    fn storage_key_marks_absent_parts() {
        assert_eq!(
            DocumentTextKey::uploaded("p1", "d1").storage_key(),
            "uploaded|p1|-|d1"
        );
        assert_eq!(
            DocumentTextKey::global_agent("auditor", "d2").storage_key(),
            "global-agent|-|auditor|d2"
        );
        assert_eq!(
            DocumentTextKey::project_agent("p1", "auditor", "d3").storage_key(),
            "project-agent|p1|auditor|d3"
        );
    }

    #[test]
    fn separator_and_dash_ids_do_not_collide() {
        let a = DocumentTextKey::project_agent("p", "a|x", "d");
        let b = DocumentTextKey::project_agent("p|a", "x", "d");
        assert_ne!(a.storage_key(), b.storage_key());
        assert_eq!(a.storage_key(), "project-agent|p|a%7Cx|d");

        let dash = DocumentTextKey::project_agent("-", "auditor", "d");
        let absent = DocumentTextKey {
            project_id: None,
            ..dash.clone()
        };
        assert_ne!(dash.storage_key(), absent.storage_key());
        assert_eq!(dash.storage_key(), "project-agent|%2D|auditor|d");

        let literal = DocumentTextKey::uploaded("p", "%7C");
        let escaped = DocumentTextKey::uploaded("p", "|");
        assert_ne!(literal.storage_key(), escaped.storage_key());
    }

    #[tokio::test]
    async fn colliding_looking_keys_keep_separate_texts() {
        let store = MemoryTextStore::new();
        let a = DocumentTextKey::project_agent("p", "a|x", "d");
        let b = DocumentTextKey::project_agent("p|a", "x", "d");
        store.put_document_text(&a, "first").await.unwrap();
        store.put_document_text(&b, "second").await.unwrap();

        assert_eq!(text_or_empty(&store, &a).await, "first");
        assert_eq!(text_or_empty(&store, &b).await, "second");
    }

    #[tokio::test]
    async fn hydration_leaves_inline_text_alone() {
        let store = MemoryTextStore::new();
        let inline = Document::new("inline.txt", "already here");
        store
            .put_document_text(&DocumentTextKey::uploaded("p1", &inline.id), "stale copy")
            .await
            .unwrap();

        let out = hydrate_uploaded_documents(&store, "p1", &[inline.clone()]).await;
        assert_eq!(out[0].text, "already here");
    }

    #[tokio::test]
    async fn hydration_fills_empty_text_and_tolerates_missing_records() {
        let store = MemoryTextStore::new();
        let stored = Document::new("stored.pdf", "");
        let missing = Document::new("missing.pdf", "");
        store
            .put_document_text(&DocumentTextKey::uploaded("p1", &stored.id), "extracted body")
            .await
            .unwrap();

        let out = hydrate_uploaded_documents(&store, "p1", &[stored, missing]).await;
        assert_eq!(out[0].text, "extracted body");
        assert_eq!(out[1].text, "");
    }

    #[tokio::test]
    async fn offload_then_hydrate_restores_knowledge_bases() {
        let store = MemoryTextStore::new();
        let mut kbs = AgentKnowledgeBases::new();
        kbs.insert(
            "auditor".into(),
            vec![Document::new("iso27001.pdf", "control text")],
        );

        let stripped = offload_global_knowledge_bases(&store, &kbs).await.unwrap();
        assert_eq!(stripped["auditor"][0].text, "");

        let restored = hydrate_global_knowledge_bases(&store, &stripped).await;
        assert_eq!(restored, kbs);
    }

    #[tokio::test]
    async fn removing_a_document_leaves_no_orphaned_text() {
        let store = MemoryTextStore::new();
        let mut project = Project::new("Audit");
        project
            .uploaded_documents
            .push(Document::new("evidence.docx", "long text"));
        let doc_id = project.uploaded_documents[0].id.clone();
        offload_project(&store, &mut project).await.unwrap();

        let key = DocumentTextKey::uploaded(&project.id, &doc_id);
        assert!(store.get_document_text(&key).await.unwrap().is_some());

        assert!(remove_uploaded_document(&store, &mut project, &doc_id)
            .await
            .unwrap());
        assert!(project.uploaded_documents.is_empty());
        assert!(store.get_document_text(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn forgetting_a_project_drops_all_its_records() {
        let store = MemoryTextStore::new();
        let mut project = Project::new("Audit");
        project.uploaded_documents.push(Document::new("a", "one"));
        project
            .agent_knowledge_bases
            .insert("legal".into(), vec![Document::new("b", "two")]);
        offload_project(&store, &mut project).await.unwrap();
        store
            .put_document_text(&DocumentTextKey::global_agent("legal", "g"), "global")
            .await
            .unwrap();

        assert_eq!(forget_project_texts(&store, &project.id).await.unwrap(), 2);
        assert_eq!(store.len(), 1);
    }
}
