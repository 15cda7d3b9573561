// ============================================================================
// Optimistic-concurrency patch executor
// ============================================================================
//
// read -> mutate -> diff -> conditional write, all against one document and
// fenced on the token observed by the read.

pub mod diff;
pub mod entity;
pub mod executor;

pub use diff::Diff;
pub use entity::{Mutation, PatchEntity, UPDATED_AT_FIELD};
pub use executor::PatchExecutor;
