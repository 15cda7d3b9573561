pub mod error;
pub mod types;

pub use error::{CoreError, ErrorCode, Result};
pub use types::{DocPath, Fields, FencingToken};
