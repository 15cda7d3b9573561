// ============================================================================
// dae-core Library
// ============================================================================

pub mod config;
pub mod core;
pub mod domain;
pub mod idempotency;
pub mod membership;
pub mod patch;
pub mod service;
pub mod storage;

// Re-export main types for convenience
pub use crate::config::{CoordinatorConfig, CoreConfig, MembershipConfig};
pub use crate::core::{CoreError, DocPath, ErrorCode, Fields, FencingToken, Result};
pub use idempotency::{IdempotencyContext, IdempotencyCoordinator};
pub use membership::{ListForUserQuery, MemberIndexEntry, MemberRole, MembershipSynchronizer, Page};
pub use patch::{Mutation, PatchEntity, PatchExecutor};

// Re-export store contracts
pub use storage::{
    CommitOutcome, CoordinationStore, DocumentSnapshot, DocumentStore, MemoryCoordinationStore,
    MemoryDocumentStore, Precondition, WriteBatch,
};

use domain::{Order, Sheet};
use service::{OrderService, SheetService};
use std::sync::Arc;

// ============================================================================
// Wiring
// ============================================================================

/// The write-coordination core wired against one pair of stores.
///
/// Holds a single coordinator, executor set and synchronizer, shared by the
/// sheet and order services. Clone it freely: every part is reference counted.
///
/// # Examples
///
/// ```
/// use dae_core::{Backend, IdempotencyContext};
/// use dae_core::service::CreateSheetRequest;
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main]
/// # async fn main() -> dae_core::Result<()> {
/// let backend = Backend::in_memory();
/// let context = IdempotencyContext::new("CreateSheet").with_key("req-1");
/// let request = CreateSheetRequest::new("host", "friday lunch");
///
/// let sheet = backend
///     .sheets()
///     .create_sheet(&context, &request, &CancellationToken::new())
///     .await?;
/// assert_eq!(sheet.member_ids, vec!["host".to_string()]);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Backend {
    coordinator: IdempotencyCoordinator,
    membership: MembershipSynchronizer,
    sheets: SheetService,
    orders: OrderService,
}

impl Backend {
    /// Wires the core against in-memory stores with default configuration.
    pub fn in_memory() -> Self {
        let coordination: Arc<dyn CoordinationStore> = Arc::new(MemoryCoordinationStore::new());
        let documents: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());
        let coordinator = IdempotencyCoordinator::with_defaults(coordination);
        let membership = MembershipSynchronizer::with_defaults(Arc::clone(&documents));
        Self::assemble(coordinator, membership, documents)
    }

    /// Wires the core against caller-provided stores.
    ///
    /// The membership config must describe where sheets live: its parent
    /// collection and member list field have to match `Sheet`.
    pub fn with_stores(
        coordination: Arc<dyn CoordinationStore>,
        documents: Arc<dyn DocumentStore>,
        config: CoreConfig,
    ) -> Result<Self> {
        config.validate()?;
        let coordinator = IdempotencyCoordinator::new(coordination, config.coordinator)?;
        let membership = MembershipSynchronizer::new(Arc::clone(&documents), config.membership)?;
        membership.ensure_parent_entity::<Sheet>()?;
        Ok(Self::assemble(coordinator, membership, documents))
    }

    fn assemble(
        coordinator: IdempotencyCoordinator,
        membership: MembershipSynchronizer,
        documents: Arc<dyn DocumentStore>,
    ) -> Self {
        let sheet_executor = PatchExecutor::<Sheet>::new(Arc::clone(&documents));
        let order_executor = PatchExecutor::<Order>::new(documents);
        let sheets = SheetService::new(
            coordinator.clone(),
            sheet_executor.clone(),
            membership.clone(),
        );
        let orders = OrderService::new(coordinator.clone(), order_executor, sheet_executor);
        Self {
            coordinator,
            membership,
            sheets,
            orders,
        }
    }

    pub fn coordinator(&self) -> &IdempotencyCoordinator {
        &self.coordinator
    }

    pub fn membership(&self) -> &MembershipSynchronizer {
        &self.membership
    }

    pub fn sheets(&self) -> &SheetService {
        &self.sheets
    }

    pub fn orders(&self) -> &OrderService {
        &self.orders
    }
}
