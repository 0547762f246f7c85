//! SQLite Persistence - SQLite 数据库持久化实现

mod database;
mod file_repo;
mod job_repo;
mod project_repo;

pub use database::*;
pub use file_repo::*;
pub use job_repo::*;
pub use project_repo::*;
