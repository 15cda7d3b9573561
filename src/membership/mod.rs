// ============================================================================
// Dual-representation membership
// ============================================================================
//
// Membership lives twice: as an ordered id list on the parent document (fast
// "who is in this sheet") and as one index document per member under the
// parent (reverse lookup "which sheets is this user in"). Every add/remove
// commits both shapes in one batch fenced on the parent's token.

pub mod synchronizer;
pub mod types;

pub use synchronizer::MembershipSynchronizer;
pub use types::{ListForUserQuery, MemberIndexEntry, MemberRole, Page};
