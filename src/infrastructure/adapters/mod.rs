//! Infrastructure Adapters
//!
//! 六边形架构的适配器实现

pub mod batch_api;
pub mod storage;

pub use batch_api::*;
pub use storage::*;
