//! Batch API Adapter - 远端批处理 API 客户端实现

mod dto;
mod fake_batch_client;
mod http_batch_client;

pub use fake_batch_client::{FakeBatchClient, FakeBatchProvider, FakeBatchScript};
pub use http_batch_client::*;
