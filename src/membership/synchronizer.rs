use super::types::{ListForUserQuery, MemberIndexEntry, MemberRole, Page};
use crate::config::MembershipConfig;
use crate::core::{CoreError, DocPath, Fields, Result};
use crate::patch::{PatchEntity, UPDATED_AT_FIELD};
use crate::storage::{CommitOutcome, DocumentSnapshot, DocumentStore, Precondition, WriteBatch};
use chrono::{DateTime, SecondsFormat, Utc};
use futures::future::join_all;
use log::warn;
use std::sync::Arc;
use tracing::{Instrument, Level, event, info_span};

const INDEX_MEMBER_FIELD: &str = "user_id";

/// Keeps the denormalized member list and the normalized member index in step.
#[derive(Clone)]
pub struct MembershipSynchronizer {
    store: Arc<dyn DocumentStore>,
    config: MembershipConfig,
}

impl MembershipSynchronizer {
    pub fn new(store: Arc<dyn DocumentStore>, config: MembershipConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { store, config })
    }

    pub fn with_defaults(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            config: MembershipConfig::default(),
        }
    }

    pub fn config(&self) -> &MembershipConfig {
        &self.config
    }

    /// Checks that `P` is the entity stored at the configured parent
    /// collection and that it leaves the member list field to this type.
    pub fn ensure_parent_entity<P: PatchEntity>(&self) -> Result<()> {
        if self.config.parent_collection != P::COLLECTION {
            return Err(CoreError::InvalidInput(format!(
                "parent_collection '{}' does not match entity collection '{}'",
                self.config.parent_collection,
                P::COLLECTION
            )));
        }
        let list_field = self.config.member_list_field.as_str();
        if !P::unmanaged_fields().iter().any(|field| *field == list_field) {
            return Err(CoreError::InvalidInput(format!(
                "member_list_field '{list_field}' is not an unmanaged field of '{}'",
                P::COLLECTION
            )));
        }
        Ok(())
    }

    pub fn parent_path(&self, parent_id: &str) -> Result<DocPath> {
        DocPath::new(&self.config.parent_collection, parent_id)
    }

    pub fn index_path(&self, parent_id: &str, member_id: &str) -> Result<DocPath> {
        self.parent_path(parent_id)?
            .child(&self.config.index_collection, member_id)
    }

    /// Adds `member_id` as a regular member. Already a member is a no-op.
    pub async fn add_member(&self, parent_id: &str, member_id: &str) -> Result<()> {
        self.add_member_with_role(parent_id, member_id, MemberRole::Member)
            .await
    }

    /// Adds `member_id` with `role` to both representations in one commit.
    pub async fn add_member_with_role(
        &self,
        parent_id: &str,
        member_id: &str,
        role: MemberRole,
    ) -> Result<()> {
        let parent = self.parent_path(parent_id)?;
        let index = self.index_path(parent_id, member_id)?;
        let span = info_span!("membership.add", parent = %parent, member = %member_id, role = %role);

        async move {
            let snapshot = self.read_parent(&parent).await?;
            let mut members = self.member_list(&snapshot)?;
            if members.iter().any(|id| id == member_id) {
                event!(Level::DEBUG, "already a member, nothing to write");
                return Ok(());
            }

            members.push(member_id.to_string());
            let now = Utc::now();
            let entry = MemberIndexEntry::new(member_id, role, now);

            let batch = WriteBatch::new()
                .update(
                    parent.clone(),
                    vec![
                        (self.config.member_list_field.clone(), serde_json::to_value(&members)?),
                        (UPDATED_AT_FIELD.to_string(), serde_json::to_value(now)?),
                    ],
                    Precondition::TokenEquals(snapshot.token),
                )
                .set(index, entry_fields(&entry)?);
            self.commit_membership(&parent, batch).await?;
            event!(Level::DEBUG, members = members.len(), "member added");
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Removes `member_id` from both representations in one commit. Not a
    /// member is a no-op.
    pub async fn remove_member(&self, parent_id: &str, member_id: &str) -> Result<()> {
        let parent = self.parent_path(parent_id)?;
        let index = self.index_path(parent_id, member_id)?;
        let span = info_span!("membership.remove", parent = %parent, member = %member_id);

        async move {
            let snapshot = self.read_parent(&parent).await?;
            let members = self.member_list(&snapshot)?;
            let remaining: Vec<String> = members
                .iter()
                .filter(|id| id.as_str() != member_id)
                .cloned()
                .collect();
            if remaining.len() == members.len() {
                event!(Level::DEBUG, "not a member, nothing to write");
                return Ok(());
            }

            let batch = WriteBatch::new()
                .update(
                    parent.clone(),
                    vec![
                        (self.config.member_list_field.clone(), serde_json::to_value(&remaining)?),
                        (UPDATED_AT_FIELD.to_string(), serde_json::to_value(Utc::now())?),
                    ],
                    Precondition::TokenEquals(snapshot.token),
                )
                .delete(index, Precondition::None);
            self.commit_membership(&parent, batch).await?;
            event!(Level::DEBUG, members = remaining.len(), "member removed");
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Member ids from the denormalized list, in join order.
    pub async fn list_member_ids(&self, parent_id: &str) -> Result<Vec<String>> {
        let parent = self.parent_path(parent_id)?;
        let snapshot = self.read_parent(&parent).await?;
        self.member_list(&snapshot)
    }

    /// Parents `query.member_id` belongs to, found through the member index.
    ///
    /// Index entries whose parent has disappeared are skipped.
    pub async fn list_for_user<P: PatchEntity>(&self, query: &ListForUserQuery) -> Result<Page<P>> {
        if query.member_id.trim().is_empty() {
            return Err(CoreError::InvalidInput("member_id is required".to_string()));
        }
        let limit = self.config.clamp_limit(query.limit);
        let after = query.cursor.as_deref().map(parse_cursor).transpose()?;
        let span = info_span!("membership.list_for_user", member = %query.member_id, limit = limit);

        async move {
            let hits = self
                .store
                .query_group(
                    &self.config.index_collection,
                    INDEX_MEMBER_FIELD,
                    &serde_json::Value::String(query.member_id.clone()),
                )
                .await?;

            let mut entries = Vec::with_capacity(hits.len());
            for hit in hits {
                let Some(parent) = hit.path.parent_document() else {
                    continue;
                };
                if parent.collection_id() != self.config.parent_collection
                    || parent.parent_document().is_some()
                {
                    continue;
                }
                let entry: MemberIndexEntry = serde_json::from_value(fields_value(hit.fields))?;
                if after.is_some_and(|cursor| entry.joined_at >= cursor) {
                    continue;
                }
                entries.push((parent, entry.joined_at));
            }
            entries.sort_by(|(a_path, a_joined), (b_path, b_joined)| {
                b_joined.cmp(a_joined).then_with(|| a_path.cmp(b_path))
            });

            let has_more = entries.len() > limit;
            entries.truncate(limit);
            let next_cursor = if has_more {
                entries.last().map(|(_, joined_at)| format_cursor(joined_at))
            } else {
                None
            };

            let reads = join_all(entries.iter().map(|(parent, _)| self.store.read(parent))).await;
            let mut items = Vec::with_capacity(reads.len());
            for ((parent, _), read) in entries.iter().zip(reads) {
                match read? {
                    Some(snapshot) => items.push(P::from_fields(parent.id(), snapshot.fields)?),
                    None => warn!("member index points at missing parent '{}', skipping", parent),
                }
            }

            Ok(Page { items, next_cursor })
        }
        .instrument(span)
        .await
    }

    /// Index entries stored under one parent, for verification.
    pub async fn list_index_entries(&self, parent_id: &str) -> Result<Vec<MemberIndexEntry>> {
        let parent = self.parent_path(parent_id)?;
        let mut entries: Vec<MemberIndexEntry> = Vec::new();
        for snapshot in self
            .store
            .list_collection(&parent, &self.config.index_collection)
            .await?
        {
            entries.push(serde_json::from_value(fields_value(snapshot.fields))?);
        }
        entries.sort_by(|a, b| a.joined_at.cmp(&b.joined_at));
        Ok(entries)
    }

    /// Writes one index document directly, bypassing the member list.
    ///
    /// Repair tooling only: normal traffic goes through add/remove.
    pub async fn repair_index_entry(&self, parent_id: &str, entry: &MemberIndexEntry) -> Result<()> {
        let index = self.index_path(parent_id, &entry.user_id)?;
        event!(Level::WARN, index = %index, "repairing member index entry");
        self.store
            .commit(WriteBatch::new().set(index, entry_fields(entry)?))
            .await?;
        Ok(())
    }

    async fn read_parent(&self, parent: &DocPath) -> Result<DocumentSnapshot> {
        self.store
            .read(parent)
            .await?
            .ok_or_else(|| CoreError::NotFound(parent.to_string()))
    }

    fn member_list(&self, snapshot: &DocumentSnapshot) -> Result<Vec<String>> {
        match snapshot.fields.get(&self.config.member_list_field) {
            None | Some(serde_json::Value::Null) => Ok(Vec::new()),
            Some(value) => Ok(serde_json::from_value(value.clone())?),
        }
    }

    async fn commit_membership(&self, parent: &DocPath, batch: WriteBatch) -> Result<()> {
        match self.store.commit(batch).await? {
            CommitOutcome::Committed { .. } => Ok(()),
            CommitOutcome::PreconditionFailed => Err(CoreError::ConcurrentUpdate(format!(
                "{parent} changed during membership update"
            ))),
        }
    }
}

fn entry_fields(entry: &MemberIndexEntry) -> Result<Fields> {
    match serde_json::to_value(entry)? {
        serde_json::Value::Object(map) => Ok(map.into_iter().collect()),
        _ => Err(CoreError::Internal("member index entry is not an object".to_string())),
    }
}

fn fields_value(fields: Fields) -> serde_json::Value {
    serde_json::Value::Object(fields.into_iter().collect())
}

fn format_cursor(joined_at: &DateTime<Utc>) -> String {
    joined_at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_cursor(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|err| CoreError::InvalidInput(format!("invalid cursor '{raw}': {err}")))
}
