pub mod database;
pub mod error;
pub mod policies;
pub mod row_helpers;
pub mod schema;
pub mod storage;

pub use database::Database;
pub use error::StoreError;
pub use policies::PolicyRepo;
pub use storage::Storage;
