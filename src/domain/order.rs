use crate::core::{CoreError, Result};
use crate::patch::{Mutation, PatchEntity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub menu_item_id: String,
    pub quantity: u32,
    #[serde(default)]
    pub note: String,
}

impl OrderLine {
    pub fn new(menu_item_id: &str, quantity: u32) -> Self {
        Self {
            menu_item_id: menu_item_id.to_string(),
            quantity,
            note: String::new(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.menu_item_id.trim().is_empty() {
            return Err(CoreError::InvalidInput("menu_item_id is required".to_string()));
        }
        if self.quantity == 0 {
            return Err(CoreError::InvalidInput(format!(
                "quantity for {} must be > 0",
                self.menu_item_id
            )));
        }
        Ok(())
    }
}

/// One member's order on a sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    #[serde(default)]
    pub id: String,
    pub sheet_id: String,
    pub user_id: String,
    pub lines: Vec<OrderLine>,
    #[serde(default)]
    pub note: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PatchEntity for Order {
    const COLLECTION: &'static str = "orders";

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: &str) {
        self.id = id.to_string();
    }

    fn set_updated_at(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OrderCommand {
    /// Only the order's owner may change its note.
    SetNote { actor: String, note: String },
    ReplaceLines { actor: String, lines: Vec<OrderLine> },
}

impl OrderCommand {
    fn actor(&self) -> &str {
        match self {
            Self::SetNote { actor, .. } | Self::ReplaceLines { actor, .. } => actor,
        }
    }
}

impl Mutation<Order> for OrderCommand {
    fn apply(self, order: &mut Order) -> Result<()> {
        if order.user_id != self.actor() {
            return Err(CoreError::Forbidden(format!(
                "order {} belongs to another user",
                order.id
            )));
        }
        match self {
            Self::SetNote { note, .. } => order.note = note,
            Self::ReplaceLines { lines, .. } => {
                if lines.is_empty() {
                    return Err(CoreError::InvalidInput("order needs at least one line".to_string()));
                }
                for line in &lines {
                    line.validate()?;
                }
                order.lines = lines;
            }
        }
        Ok(())
    }
}
