//! Event publishing

mod publisher;

pub use publisher::{EventPublisher, JobNotification};
