pub mod config;
pub mod errors;
pub mod types;

// Re-export commonly used items for convenience
pub use config::Config;
pub use errors::{AnalysisError, ConfigError, DispatchError, StoreError, UpstreamError};
pub use types::{
    AnalysisCacheEntry, AnalysisResult, DrinkActivity, HydrationPlan, NotificationTemplate,
    ScanLimitKind, ScheduledReminderSlot, SentNotificationRecord, SubscriptionTier, UserProfile,
};
