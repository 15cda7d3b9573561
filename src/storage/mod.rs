// ============================================================================
// Backing store contracts
// ============================================================================
//
// Two stores back the write-coordination core: a key-value store holding the
// idempotency markers and a document store holding entities with fencing
// tokens. Production adapters (Redis, Firestore) implement these traits
// outside this crate; the in-memory versions here are complete, atomic
// implementations used by tests and single-process deployments.

pub mod kv;
pub mod memory;

pub use kv::MemoryCoordinationStore;
pub use memory::MemoryDocumentStore;

use crate::core::{DocPath, Fields, FencingToken, Result};
use async_trait::async_trait;
use std::time::Duration;

/// Key-value store with expiring entries used for coordination markers.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Atomically creates `key` unless a live entry already exists.
    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool>;

    /// Reads a live entry. Expired entries read as absent.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Atomically deletes `key` only if its current value equals `expected`.
    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> Result<bool>;

    /// Unconditionally writes `key` with a fresh expiry.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;

    /// Resets the expiry of a live entry. Returns false when the key is absent.
    async fn extend_ttl(&self, key: &str, ttl: Duration) -> Result<bool>;
}

/// A document as read together with its fencing token.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    pub path: DocPath,
    pub fields: Fields,
    pub token: FencingToken,
}

/// Condition checked against the stored document before a batch applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    None,
    Exists,
    TokenEquals(FencingToken),
}

/// Ordered field-path/value pairs merged into an existing document.
pub type FieldUpdates = Vec<(String, serde_json::Value)>;

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Merge `updates` into an existing document. Missing document is `NotFound`.
    Update {
        path: DocPath,
        updates: FieldUpdates,
        precondition: Precondition,
    },
    /// Create or fully replace a document.
    Set { path: DocPath, fields: Fields },
    /// Delete a document. Deleting an absent document is a no-op.
    Delete {
        path: DocPath,
        precondition: Precondition,
    },
}

impl WriteOp {
    pub fn path(&self) -> &DocPath {
        match self {
            Self::Update { path, .. } | Self::Set { path, .. } | Self::Delete { path, .. } => path,
        }
    }

    pub fn precondition(&self) -> Precondition {
        match self {
            Self::Update { precondition, .. } | Self::Delete { precondition, .. } => *precondition,
            Self::Set { .. } => Precondition::None,
        }
    }
}

/// Writes that commit atomically: either every op applies or none does.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(mut self, path: DocPath, updates: FieldUpdates, precondition: Precondition) -> Self {
        self.ops.push(WriteOp::Update {
            path,
            updates,
            precondition,
        });
        self
    }

    pub fn set(mut self, path: DocPath, fields: Fields) -> Self {
        self.ops.push(WriteOp::Set { path, fields });
        self
    }

    pub fn delete(mut self, path: DocPath, precondition: Precondition) -> Self {
        self.ops.push(WriteOp::Delete { path, precondition });
        self
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Every op applied; touched documents now carry `token`.
    Committed { token: FencingToken },
    /// A precondition did not hold; nothing was written.
    PreconditionFailed,
}

/// Document store offering single-batch atomic commits with preconditions.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Reads a document with its current fencing token.
    async fn read(&self, path: &DocPath) -> Result<Option<DocumentSnapshot>>;

    /// Creates a document, failing with `AlreadyExists` when one is present.
    async fn create_if_absent(&self, path: &DocPath, fields: Fields) -> Result<FencingToken>;

    /// Checks every precondition in `batch`, then applies every op, atomically.
    async fn commit(&self, batch: WriteBatch) -> Result<CommitOutcome>;

    /// Scans every subcollection named `collection_id`, at any depth, for
    /// documents whose `field` equals `equals`.
    async fn query_group(
        &self,
        collection_id: &str,
        field: &str,
        equals: &serde_json::Value,
    ) -> Result<Vec<DocumentSnapshot>>;

    /// Lists every document directly inside `parent/collection_id`.
    async fn list_collection(
        &self,
        parent: &DocPath,
        collection_id: &str,
    ) -> Result<Vec<DocumentSnapshot>>;
}
