// ============================================================================
// Distributed idempotency coordinator
// ============================================================================

pub mod coordinator;
pub mod key;
mod lease;

pub use coordinator::IdempotencyCoordinator;
pub use key::{IdempotencyContext, is_write_method, payload_hash};
