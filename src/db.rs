pub mod error;
pub mod models;
pub mod snapshot_repository;
pub mod user_repository;

pub use error::DbError;
pub use models::*;
pub use snapshot_repository::{SnapshotRepository, SnapshotStore};
pub use user_repository::UserRepository;
