use super::{CREATE_IDEMPOTENCY_TTL, require};
use crate::core::{CoreError, Result};
use crate::domain::{Order, OrderCommand, OrderLine, Sheet};
use crate::idempotency::{IdempotencyContext, IdempotencyCoordinator, payload_hash};
use crate::patch::PatchExecutor;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{Level, event};
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    pub sheet_id: String,
    pub user_id: String,
    pub lines: Vec<OrderLine>,
    #[serde(default)]
    pub note: String,
}

impl CreateOrderRequest {
    pub fn new(sheet_id: &str, user_id: &str, lines: Vec<OrderLine>) -> Self {
        Self {
            sheet_id: sheet_id.to_string(),
            user_id: user_id.to_string(),
            lines,
            note: String::new(),
        }
    }

    fn validate(&self) -> Result<()> {
        require("sheet_id", &self.sheet_id)?;
        require("user_id", &self.user_id)?;
        if self.lines.is_empty() {
            return Err(CoreError::InvalidInput("order needs at least one line".to_string()));
        }
        self.lines.iter().try_for_each(OrderLine::validate)
    }
}

#[derive(Clone)]
pub struct OrderService {
    coordinator: IdempotencyCoordinator,
    orders: PatchExecutor<Order>,
    sheets: PatchExecutor<Sheet>,
}

impl OrderService {
    pub fn new(
        coordinator: IdempotencyCoordinator,
        orders: PatchExecutor<Order>,
        sheets: PatchExecutor<Sheet>,
    ) -> Self {
        Self {
            coordinator,
            orders,
            sheets,
        }
    }

    /// Places an order on an open sheet, once per idempotency key.
    ///
    /// Without a caller key the key is derived from the method, sheet, user and
    /// request payload, so identical retries collapse onto one order.
    pub async fn create_order(
        &self,
        context: &IdempotencyContext,
        request: &CreateOrderRequest,
        cancel: &CancellationToken,
    ) -> Result<Order> {
        request.validate()?;
        context.validate()?;
        let key = context.key_or_derive(
            &[&request.sheet_id, &request.user_id],
            &payload_hash(request)?,
        );

        self.coordinator
            .execute_json(&key, CREATE_IDEMPOTENCY_TTL, cancel, || {
                self.create_order_once(request)
            })
            .await
    }

    async fn create_order_once(&self, request: &CreateOrderRequest) -> Result<Order> {
        let sheet = self.sheets.get(&request.sheet_id).await?;
        if !sheet.is_open() {
            return Err(CoreError::InvalidInput(format!(
                "sheet {} is not open for orders",
                request.sheet_id
            )));
        }

        let now = Utc::now();
        let order = Order {
            id: Uuid::new_v4().to_string(),
            sheet_id: request.sheet_id.clone(),
            user_id: request.user_id.clone(),
            lines: request.lines.clone(),
            note: request.note.clone(),
            created_at: now,
            updated_at: now,
        };
        self.orders.create(&order).await?;
        event!(Level::INFO, order = %order.id, sheet = %order.sheet_id, "order created");
        Ok(order)
    }

    pub async fn get_order(&self, order_id: &str) -> Result<Order> {
        require("order_id", order_id)?;
        self.orders.get(order_id).await
    }

    pub async fn update_note(&self, order_id: &str, actor_user_id: &str, note: &str) -> Result<Order> {
        require("order_id", order_id)?;
        require("actor_user_id", actor_user_id)?;
        self.orders
            .update(
                order_id,
                OrderCommand::SetNote {
                    actor: actor_user_id.to_string(),
                    note: note.to_string(),
                },
            )
            .await
    }

    pub async fn replace_lines(
        &self,
        order_id: &str,
        actor_user_id: &str,
        lines: Vec<OrderLine>,
    ) -> Result<Order> {
        require("order_id", order_id)?;
        require("actor_user_id", actor_user_id)?;
        self.orders
            .update(
                order_id,
                OrderCommand::ReplaceLines {
                    actor: actor_user_id.to_string(),
                    lines,
                },
            )
            .await
    }
}
