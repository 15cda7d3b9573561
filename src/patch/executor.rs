use super::diff::Diff;
use super::entity::{ID_FIELD, Mutation, PatchEntity, UPDATED_AT_FIELD};
use crate::core::{CoreError, DocPath, Fields, Result};
use crate::storage::{CommitOutcome, DocumentStore, Precondition, WriteBatch};
use chrono::Utc;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{Instrument, Level, event, info_span};

/// Safe read-modify-write over single documents of one entity type.
///
/// Conflicting writers race on the fencing token: one commits, the others get
/// `ConcurrentUpdate`. Nothing here retries; the caller owns retry policy.
pub struct PatchExecutor<E> {
    store: Arc<dyn DocumentStore>,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for PatchExecutor<E> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            _entity: PhantomData,
        }
    }
}

impl<E: PatchEntity> PatchExecutor<E> {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            _entity: PhantomData,
        }
    }

    pub fn path(id: &str) -> Result<DocPath> {
        DocPath::new(E::COLLECTION, id)
    }

    /// Reads one entity.
    pub async fn get(&self, id: &str) -> Result<E> {
        let path = Self::path(id)?;
        let snapshot = self
            .store
            .read(&path)
            .await?
            .ok_or_else(|| CoreError::NotFound(path.to_string()))?;
        E::from_fields(id, snapshot.fields)
    }

    /// Persists a new entity; an existing document with the same id is `AlreadyExists`.
    pub async fn create(&self, entity: &E) -> Result<()> {
        if entity.id().is_empty() {
            return Err(CoreError::InvalidInput(format!(
                "{} id is required",
                E::COLLECTION
            )));
        }
        let path = Self::path(entity.id())?;
        self.store.create_if_absent(&path, entity.to_fields()?).await?;
        Ok(())
    }

    /// Applies `mutation` to the current entity and writes back only what changed.
    ///
    /// Returns the entity as persisted. A mutation that changes nothing performs no
    /// write and returns the entity as read.
    pub async fn update<M>(&self, id: &str, mutation: M) -> Result<E>
    where
        M: Mutation<E> + Send,
    {
        let path = Self::path(id)?;
        let span = info_span!("patch.update", collection = E::COLLECTION, path = %path);
        self.update_at(path, id, mutation).instrument(span).await
    }

    async fn update_at<M>(&self, path: DocPath, id: &str, mutation: M) -> Result<E>
    where
        M: Mutation<E> + Send,
    {
        let snapshot = self
            .store
            .read(&path)
            .await?
            .ok_or_else(|| CoreError::NotFound(path.to_string()))?;
        let fenced_on = snapshot.token;

        let before = E::from_fields(id, snapshot.fields)?;
        let mut after = before.clone();
        if let Err(err) = mutation.apply(&mut after) {
            event!(Level::DEBUG, error = %err, "patch mutation rejected");
            return Err(err);
        }

        let before_fields = before.to_fields()?;
        let after_fields = after.to_fields()?;
        let mut diff = Diff::between(&before_fields, &after_fields, E::is_managed_field);
        if diff.is_empty() {
            event!(Level::DEBUG, "patch produced no changes, skipping write");
            return Ok(before);
        }
        // The returned entity must match the stored one, so fields this
        // executor never writes keep their stored values.
        let mut after = E::from_fields(id, Self::restore_unwritten(&before_fields, after_fields))?;

        let now = Utc::now();
        after.set_updated_at(now);
        diff.push(UPDATED_AT_FIELD, serde_json::to_value(now)?);
        let changed = diff.len();

        let batch = WriteBatch::new().update(
            path.clone(),
            diff.into_updates(),
            Precondition::TokenEquals(fenced_on),
        );
        match self.store.commit(batch).await? {
            CommitOutcome::Committed { token } => {
                event!(Level::DEBUG, fields = changed, token = %token, "patch committed");
                Ok(after)
            }
            CommitOutcome::PreconditionFailed => {
                event!(Level::DEBUG, fenced_on = %fenced_on, "patch lost fencing race");
                Err(CoreError::ConcurrentUpdate(format!(
                    "{path} changed since {fenced_on}"
                )))
            }
        }
    }

    fn restore_unwritten(before: &Fields, mut after: Fields) -> Fields {
        for field in E::unmanaged_fields().iter().chain(std::iter::once(&ID_FIELD)) {
            match before.get(*field) {
                Some(value) => {
                    after.insert((*field).to_string(), value.clone());
                }
                None => {
                    after.remove(*field);
                }
            }
        }
        after
    }
}
