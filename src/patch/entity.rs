use crate::core::{CoreError, Fields, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

pub const ID_FIELD: &str = "id";
pub const UPDATED_AT_FIELD: &str = "updated_at";

/// An entity stored as one document and patched field by field.
///
/// The serde representation is the document representation: each top-level
/// serialized field is one field path.
pub trait PatchEntity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Top-level collection holding this entity's documents.
    const COLLECTION: &'static str;

    fn id(&self) -> &str;

    fn set_id(&mut self, id: &str);

    fn set_updated_at(&mut self, at: DateTime<Utc>);

    /// Fields owned by another writer; mutations touching them are not persisted
    /// by the executor.
    fn unmanaged_fields() -> &'static [&'static str] {
        &[]
    }

    fn to_fields(&self) -> Result<Fields> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => Ok(map.into_iter().collect()),
            other => Err(CoreError::Serialization(format!(
                "{} must serialize to an object, got {}",
                Self::COLLECTION,
                other
            ))),
        }
    }

    /// Rebuilds the entity from stored fields, taking the id from the document path.
    fn from_fields(id: &str, fields: Fields) -> Result<Self> {
        let object: serde_json::Map<String, serde_json::Value> = fields.into_iter().collect();
        let mut entity: Self = serde_json::from_value(serde_json::Value::Object(object))?;
        if entity.id().is_empty() {
            entity.set_id(id);
        }
        Ok(entity)
    }

    /// Whether the executor may persist a change to `field`.
    fn is_managed_field(field: &str) -> bool {
        field != ID_FIELD
            && field != UPDATED_AT_FIELD
            && !Self::unmanaged_fields()
                .iter()
                .any(|unmanaged| *unmanaged == field)
    }
}

/// A typed change applied to the working copy of an entity.
///
/// Returning an error aborts the update with that error, untouched.
pub trait Mutation<E> {
    fn apply(self, entity: &mut E) -> Result<()>;
}

impl<E, F> Mutation<E> for F
where
    F: FnOnce(&mut E) -> Result<()>,
{
    fn apply(self, entity: &mut E) -> Result<()> {
        self(entity)
    }
}
