//! Business operations wired from the coordinator, executor and synchronizer.

pub mod order;
pub mod sheet;

pub use order::{CreateOrderRequest, OrderService};
pub use sheet::{CreateSheetRequest, SheetService};

use crate::core::{CoreError, Result};
use std::time::Duration;

/// How long a create request's key deduplicates retries.
pub const CREATE_IDEMPOTENCY_TTL: Duration = Duration::from_secs(24 * 60 * 60);

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(CoreError::InvalidInput(format!("{field} is required")));
    }
    Ok(())
}
