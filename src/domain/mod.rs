pub mod app_info;
pub mod core_data;
pub mod settings;
pub mod status;
pub mod subscription;

pub use app_info::AppInfo;
pub use core_data::CoreData;
pub use settings::{SavedState, Settings, UpdateConfig};
pub use status::SyncStatus;
pub use subscription::{saturating_count, DownloadedSubscription, Subscription, SubscriptionType};
