pub mod context;
pub mod error;
pub mod lock;

pub use context::AppContext;
pub use error::{Result, SyncError};
pub use lock::FileLock;
