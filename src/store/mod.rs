pub mod sqlite;

use std::path::{Path, PathBuf};

use crate::app::Result;
use crate::domain::CoreData;

pub use sqlite::SqliteStore;

/// Durable home of [`CoreData`] and the consolidated-file pointer.
///
/// `update` is a serialized read-modify-write: concurrent callers never lose each
/// other's changes and readers never observe a half-applied mutation.
pub trait CoreStore: Send + Sync {
    fn get(&self) -> Result<CoreData>;
    fn update(&self, mutate: &mut dyn FnMut(&mut CoreData)) -> Result<CoreData>;

    // Consolidated file pointer, stored apart from the record
    fn subscriptions_path(&self) -> Result<Option<PathBuf>>;
    fn set_subscriptions_path(&self, path: Option<&Path>) -> Result<()>;
}
