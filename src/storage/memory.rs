use super::{CommitOutcome, DocumentSnapshot, DocumentStore, Precondition, WriteBatch, WriteOp};
use crate::core::{CoreError, DocPath, Fields, FencingToken, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

struct StoredDocument {
    fields: Fields,
    token: FencingToken,
}

#[derive(Default)]
struct DocumentState {
    documents: BTreeMap<DocPath, StoredDocument>,
    /// Last issued fencing sequence
    sequence: u64,
    /// Number of committed writes, counted per document touched
    writes: u64,
}

impl DocumentState {
    fn next_token(&mut self) -> FencingToken {
        self.sequence += 1;
        FencingToken::new(self.sequence)
    }

    fn holds(&self, path: &DocPath, precondition: Precondition) -> bool {
        let current = self.documents.get(path);
        match precondition {
            Precondition::None => true,
            Precondition::Exists => current.is_some(),
            Precondition::TokenEquals(expected) => {
                current.is_some_and(|document| document.token == expected)
            }
        }
    }
}

/// In-memory document store
///
/// All reads and commits serialize on one mutex, which makes every batch
/// trivially atomic. Fencing tokens come from a store-wide sequence, so a
/// token never repeats even across delete and re-create.
#[derive(Clone, Default)]
pub struct MemoryDocumentStore {
    state: Arc<Mutex<DocumentState>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total document writes committed so far.
    pub async fn write_count(&self) -> u64 {
        self.state.lock().await.writes
    }

    /// Number of stored documents.
    pub async fn len(&self) -> usize {
        self.state.lock().await.documents.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Removes a document outside of any batch, as an external actor would.
    pub async fn remove(&self, path: &DocPath) -> bool {
        let mut state = self.state.lock().await;
        let removed = state.documents.remove(path).is_some();
        if removed {
            state.writes += 1;
        }
        removed
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn read(&self, path: &DocPath) -> Result<Option<DocumentSnapshot>> {
        let state = self.state.lock().await;
        Ok(state.documents.get(path).map(|document| DocumentSnapshot {
            path: path.clone(),
            fields: document.fields.clone(),
            token: document.token,
        }))
    }

    async fn create_if_absent(&self, path: &DocPath, fields: Fields) -> Result<FencingToken> {
        let mut state = self.state.lock().await;
        if state.documents.contains_key(path) {
            return Err(CoreError::AlreadyExists(path.to_string()));
        }
        let token = state.next_token();
        state
            .documents
            .insert(path.clone(), StoredDocument { fields, token });
        state.writes += 1;
        Ok(token)
    }

    async fn commit(&self, batch: WriteBatch) -> Result<CommitOutcome> {
        let mut state = self.state.lock().await;

        for op in batch.ops() {
            if !state.holds(op.path(), op.precondition()) {
                return Ok(CommitOutcome::PreconditionFailed);
            }
            if let WriteOp::Update { path, .. } = op {
                if !state.documents.contains_key(path) {
                    return Err(CoreError::NotFound(path.to_string()));
                }
            }
        }

        let token = state.next_token();
        for op in batch.ops() {
            match op {
                WriteOp::Update { path, updates, .. } => {
                    if let Some(document) = state.documents.get_mut(path) {
                        for (field, value) in updates {
                            document.fields.insert(field.clone(), value.clone());
                        }
                        document.token = token;
                    }
                }
                WriteOp::Set { path, fields } => {
                    state.documents.insert(
                        path.clone(),
                        StoredDocument {
                            fields: fields.clone(),
                            token,
                        },
                    );
                }
                WriteOp::Delete { path, .. } => {
                    state.documents.remove(path);
                }
            }
            state.writes += 1;
        }

        Ok(CommitOutcome::Committed { token })
    }

    async fn query_group(
        &self,
        collection_id: &str,
        field: &str,
        equals: &serde_json::Value,
    ) -> Result<Vec<DocumentSnapshot>> {
        let state = self.state.lock().await;
        let matches = state
            .documents
            .iter()
            .filter(|(path, document)| {
                path.parent_document().is_some()
                    && path.collection_id() == collection_id
                    && document.fields.get(field) == Some(equals)
            })
            .map(|(path, document)| DocumentSnapshot {
                path: path.clone(),
                fields: document.fields.clone(),
                token: document.token,
            })
            .collect();
        Ok(matches)
    }

    async fn list_collection(
        &self,
        parent: &DocPath,
        collection_id: &str,
    ) -> Result<Vec<DocumentSnapshot>> {
        let state = self.state.lock().await;
        let listed = state
            .documents
            .iter()
            .filter(|(path, _)| {
                path.collection_id() == collection_id
                    && path.parent_document().as_ref() == Some(parent)
            })
            .map(|(path, document)| DocumentSnapshot {
                path: path.clone(),
                fields: document.fields.clone(),
                token: document.token,
            })
            .collect();
        Ok(listed)
    }
}
