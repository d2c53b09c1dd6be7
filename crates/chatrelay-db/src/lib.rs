pub mod migrations;
pub mod repository;
pub mod sqlite_store;

pub use repository::{MemoryRepository, Repository};
pub use sqlite_store::SqliteStore;
