//! Shared-bill entities persisted through the patch executor.

pub mod order;
pub mod sheet;

pub use order::{Order, OrderCommand, OrderLine};
pub use sheet::{Sheet, SheetCommand, SheetStatus};
