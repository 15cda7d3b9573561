use super::{CREATE_IDEMPOTENCY_TTL, require};
use crate::core::{CoreError, Result};
use crate::domain::{Sheet, SheetCommand, SheetStatus};
use crate::idempotency::{IdempotencyContext, IdempotencyCoordinator, payload_hash};
use crate::membership::{ListForUserQuery, MemberRole, MembershipSynchronizer, Page};
use crate::patch::PatchExecutor;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Level, event, info_span};
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSheetRequest {
    pub host_user_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub delivery_fee: i64,
    #[serde(default)]
    pub discount: u32,
    /// Extra members registered alongside the host.
    #[serde(default)]
    pub member_ids: Vec<String>,
}

impl CreateSheetRequest {
    pub fn new(host_user_id: &str, name: &str) -> Self {
        Self {
            host_user_id: host_user_id.to_string(),
            name: name.to_string(),
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<()> {
        require("host_user_id", &self.host_user_id)?;
        require("name", &self.name)
    }
}

#[derive(Clone)]
pub struct SheetService {
    coordinator: IdempotencyCoordinator,
    sheets: PatchExecutor<Sheet>,
    members: MembershipSynchronizer,
}

impl SheetService {
    pub fn new(
        coordinator: IdempotencyCoordinator,
        sheets: PatchExecutor<Sheet>,
        members: MembershipSynchronizer,
    ) -> Self {
        Self {
            coordinator,
            sheets,
            members,
        }
    }

    /// Creates a sheet at most once per idempotency key. Retries with the same
    /// key get the sheet created by the first call.
    pub async fn create_sheet(
        &self,
        context: &IdempotencyContext,
        request: &CreateSheetRequest,
        cancel: &CancellationToken,
    ) -> Result<Sheet> {
        request.validate()?;
        context.validate()?;
        let key = context.key_or_derive(&[&request.host_user_id], &payload_hash(request)?);

        self.coordinator
            .execute_json(&key, CREATE_IDEMPOTENCY_TTL, cancel, || {
                self.create_sheet_once(request)
            })
            .await
    }

    async fn create_sheet_once(&self, request: &CreateSheetRequest) -> Result<Sheet> {
        let id = Uuid::new_v4().to_string();
        let span = info_span!("sheet.create", sheet = %id, host = %request.host_user_id);

        async {
            let mut sheet = Sheet::new(&id, &request.name, &request.host_user_id, Utc::now());
            sheet.description = request.description.clone();
            sheet.delivery_fee = request.delivery_fee;
            sheet.discount = request.discount;
            sheet.validate()?;
            self.sheets.create(&sheet).await?;

            self.members
                .add_member_with_role(&id, &request.host_user_id, MemberRole::Host)
                .await?;
            for member_id in &request.member_ids {
                if member_id != &request.host_user_id {
                    self.members.add_member(&id, member_id).await?;
                }
            }
            event!(Level::INFO, members = request.member_ids.len() + 1, "sheet created");

            self.sheets.get(&id).await
        }
        .instrument(span)
        .await
    }

    pub async fn get_sheet(&self, sheet_id: &str) -> Result<Sheet> {
        require("sheet_id", sheet_id)?;
        self.sheets.get(sheet_id).await
    }

    /// Applies a partial update (status, description, fees).
    pub async fn update_sheet(&self, sheet_id: &str, command: SheetCommand) -> Result<Sheet> {
        require("sheet_id", sheet_id)?;
        self.sheets.update(sheet_id, command).await
    }

    pub async fn close_sheet(&self, sheet_id: &str, actor_user_id: &str) -> Result<Sheet> {
        require("sheet_id", sheet_id)?;
        require("actor_user_id", actor_user_id)?;
        self.sheets
            .update(
                sheet_id,
                SheetCommand::Close {
                    actor: actor_user_id.to_string(),
                },
            )
            .await
    }

    pub async fn reopen_sheet(&self, sheet_id: &str, actor_user_id: &str) -> Result<Sheet> {
        require("sheet_id", sheet_id)?;
        require("actor_user_id", actor_user_id)?;
        self.sheets
            .update(
                sheet_id,
                SheetCommand::Reopen {
                    actor: actor_user_id.to_string(),
                },
            )
            .await
    }

    /// Adds `user_id` to an open sheet. Joining twice is a no-op.
    pub async fn join_sheet(&self, sheet_id: &str, user_id: &str) -> Result<()> {
        require("sheet_id", sheet_id)?;
        require("user_id", user_id)?;
        let sheet = self.sheets.get(sheet_id).await?;
        if !sheet.is_open() {
            return Err(CoreError::InvalidInput(format!(
                "sheet {sheet_id} is not open for joining"
            )));
        }
        self.members.add_member(sheet_id, user_id).await
    }

    /// Removes `user_id` from a sheet. The host cannot leave.
    pub async fn leave_sheet(&self, sheet_id: &str, user_id: &str) -> Result<()> {
        require("sheet_id", sheet_id)?;
        require("user_id", user_id)?;
        let sheet = self.sheets.get(sheet_id).await?;
        if sheet.is_host(user_id) {
            return Err(CoreError::Forbidden(
                "host cannot leave sheet".to_string(),
            ));
        }
        self.members.remove_member(sheet_id, user_id).await
    }

    pub async fn members(&self, sheet_id: &str) -> Result<Vec<String>> {
        require("sheet_id", sheet_id)?;
        self.members.list_member_ids(sheet_id).await
    }

    /// Sheets `query.member_id` belongs to, most recently joined first.
    ///
    /// `status` filters the fetched page, so a filtered page can hold fewer
    /// than `limit` sheets while `next_cursor` still points past the whole
    /// page.
    pub async fn list_for_user(
        &self,
        query: &ListForUserQuery,
        status: Option<SheetStatus>,
    ) -> Result<Page<Sheet>> {
        let mut page: Page<Sheet> = self.members.list_for_user(query).await?;
        if let Some(status) = status {
            page.items.retain(|sheet| sheet.status == status);
        }
        Ok(page)
    }
}
