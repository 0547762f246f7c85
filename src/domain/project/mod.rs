//! Project Context - 项目限界上下文

mod aggregate;
mod errors;

pub use aggregate::{Project, ProjectName};
pub use errors::ProjectError;
