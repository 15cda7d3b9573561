use crate::core::{CoreError, Result};
use crate::patch::{Mutation, PatchEntity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const MAX_DISCOUNT_PERCENT: u32 = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SheetStatus {
    #[default]
    Open,
    Paused,
    Closed,
}

impl SheetStatus {
    /// Status changes allowed through a plain update. Leaving `Closed`
    /// needs an explicit reopen.
    pub fn can_transition_to(self, next: SheetStatus) -> bool {
        matches!(
            (self, next),
            (Self::Open, Self::Paused)
                | (Self::Open, Self::Closed)
                | (Self::Paused, Self::Open)
                | (Self::Paused, Self::Closed)
        )
    }
}

impl fmt::Display for SheetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Open => "open",
            Self::Paused => "paused",
            Self::Closed => "closed",
        };
        write!(f, "{label}")
    }
}

/// A shared bill that members order against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sheet {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub host_user_id: String,
    #[serde(default)]
    pub status: SheetStatus,
    #[serde(default)]
    pub delivery_fee: i64,
    /// Percentage, 0..=100.
    #[serde(default)]
    pub discount: u32,
    /// Maintained by the membership synchronizer only.
    #[serde(default)]
    pub member_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Sheet {
    pub fn new(id: &str, name: &str, host_user_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: String::new(),
            host_user_id: host_user_id.to_string(),
            status: SheetStatus::Open,
            delivery_fee: 0,
            discount: 0,
            member_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Field rules that hold for any stored sheet.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(CoreError::InvalidInput("name is required".to_string()));
        }
        if self.delivery_fee < 0 {
            return Err(CoreError::InvalidInput(format!(
                "delivery_fee must be >= 0, got {}",
                self.delivery_fee
            )));
        }
        if self.discount > MAX_DISCOUNT_PERCENT {
            return Err(CoreError::InvalidInput(format!(
                "discount must be between 0 and {MAX_DISCOUNT_PERCENT}, got {}",
                self.discount
            )));
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.status == SheetStatus::Open
    }

    pub fn is_host(&self, user_id: &str) -> bool {
        self.host_user_id == user_id
    }

    pub fn is_member(&self, user_id: &str) -> bool {
        self.member_ids.iter().any(|id| id == user_id)
    }
}

impl PatchEntity for Sheet {
    const COLLECTION: &'static str = "sheets";

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: &str) {
        self.id = id.to_string();
    }

    fn set_updated_at(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }

    fn unmanaged_fields() -> &'static [&'static str] {
        &["member_ids"]
    }
}

/// Typed changes to a sheet, each carrying the acting user where the rule
/// depends on who asks.
#[derive(Debug, Clone, PartialEq)]
pub enum SheetCommand {
    Close {
        actor: String,
    },
    Reopen {
        actor: String,
    },
    /// Partial update; `None` leaves a field unchanged.
    Update {
        status: Option<SheetStatus>,
        description: Option<String>,
        delivery_fee: Option<i64>,
        discount: Option<u32>,
    },
}

impl Mutation<Sheet> for SheetCommand {
    fn apply(self, sheet: &mut Sheet) -> Result<()> {
        match self {
            Self::Close { actor } => {
                if !sheet.is_host(&actor) {
                    return Err(CoreError::Forbidden("only host can close sheet".to_string()));
                }
                if sheet.status == SheetStatus::Closed {
                    return Err(CoreError::InvalidInput(format!(
                        "sheet {} is already closed",
                        sheet.id
                    )));
                }
                sheet.status = SheetStatus::Closed;
            }
            Self::Reopen { actor } => {
                if !sheet.is_host(&actor) {
                    return Err(CoreError::Forbidden("only host can reopen sheet".to_string()));
                }
                if sheet.status != SheetStatus::Closed {
                    return Err(CoreError::InvalidInput(format!(
                        "can only reopen closed sheets, current status: {}",
                        sheet.status
                    )));
                }
                sheet.status = SheetStatus::Open;
            }
            Self::Update {
                status,
                description,
                delivery_fee,
                discount,
            } => {
                if let Some(next) = status {
                    if next != sheet.status && !sheet.status.can_transition_to(next) {
                        return Err(CoreError::InvalidInput(format!(
                            "cannot transition from {} to {}",
                            sheet.status, next
                        )));
                    }
                    sheet.status = next;
                }
                if let Some(fee) = delivery_fee {
                    if fee < 0 {
                        return Err(CoreError::InvalidInput(format!(
                            "delivery_fee must be >= 0, got {fee}"
                        )));
                    }
                    sheet.delivery_fee = fee;
                }
                if let Some(percent) = discount {
                    if percent > MAX_DISCOUNT_PERCENT {
                        return Err(CoreError::InvalidInput(format!(
                            "discount must be between 0 and {MAX_DISCOUNT_PERCENT}, got {percent}"
                        )));
                    }
                    sheet.discount = percent;
                }
                if let Some(text) = description {
                    sheet.description = text;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet() -> Sheet {
        Sheet::new("S1", "lunch", "host", Utc::now())
    }

    #[test]
    fn test_close_requires_host() {
        let mut s = sheet();
        let err = SheetCommand::Close {
            actor: "guest".into(),
        }
        .apply(&mut s)
        .unwrap_err();

        assert!(matches!(err, CoreError::Forbidden(_)));
        assert_eq!(s.status, SheetStatus::Open);
    }

    #[test]
    fn test_close_then_reopen() {
        let mut s = sheet();
        SheetCommand::Close { actor: "host".into() }.apply(&mut s).unwrap();
        assert_eq!(s.status, SheetStatus::Closed);

        let again = SheetCommand::Close { actor: "host".into() }.apply(&mut s);
        assert!(matches!(again, Err(CoreError::InvalidInput(_))));

        SheetCommand::Reopen { actor: "host".into() }.apply(&mut s).unwrap();
        assert!(s.is_open());
    }

    #[test]
    fn test_reopen_open_sheet_rejected() {
        let mut s = sheet();
        let err = SheetCommand::Reopen { actor: "host".into() }
            .apply(&mut s)
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }

    #[test]
    fn test_update_validates_transition_and_discount() {
        let mut s = sheet();
        s.status = SheetStatus::Closed;
        let reopen_via_update = SheetCommand::Update {
            status: Some(SheetStatus::Open),
            description: None,
            delivery_fee: None,
            discount: None,
        }
        .apply(&mut s);
        assert!(matches!(reopen_via_update, Err(CoreError::InvalidInput(_))));

        let mut s = sheet();
        let too_much = SheetCommand::Update {
            status: None,
            description: None,
            delivery_fee: None,
            discount: Some(150),
        }
        .apply(&mut s);
        assert!(matches!(too_much, Err(CoreError::InvalidInput(_))));

        SheetCommand::Update {
            status: Some(SheetStatus::Paused),
            description: Some("friday".into()),
            delivery_fee: Some(15_000),
            discount: Some(10),
        }
        .apply(&mut s)
        .unwrap();
        assert_eq!(s.status, SheetStatus::Paused);
        assert_eq!(s.description, "friday");
        assert_eq!(s.delivery_fee, 15_000);
        assert_eq!(s.discount, 10);
    }

    #[test]
    fn test_member_ids_unmanaged() {
        assert!(!Sheet::is_managed_field("member_ids"));
        assert!(!Sheet::is_managed_field("updated_at"));
        assert!(Sheet::is_managed_field("status"));
    }
}
