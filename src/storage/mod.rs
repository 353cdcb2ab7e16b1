// External store interface
//
// Everything the two pipelines persist or read goes through `Store`. The
// accounting call is the only place concurrent requests for one user are
// coordinated, so implementations must make it atomic.

pub mod memory;
pub mod supabase;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::core::errors::StoreResult;
use crate::core::types::{
    AccountingOutcome, AccountingRequest, AnalysisCacheEntry, DrinkActivity, HydrationPlan,
    NotificationTemplate, SentNotificationRecord, UserProfile,
};

pub use memory::MemoryStore;
pub use supabase::SupabaseStore;

#[async_trait]
pub trait Store: Send + Sync {
    /// Cache row for a fingerprint, regardless of age
    async fn cached_analysis(&self, fingerprint: &str) -> StoreResult<Option<AnalysisCacheEntry>>;

    /// Atomically check the caller's daily quota, count the scan and upsert
    /// the cache row. Returns `StoreError::LimitExceeded` when the caller has
    /// already reached `daily_limit` scans today.
    async fn process_analysis(&self, request: AccountingRequest) -> StoreResult<AccountingOutcome>;

    async fn profile(&self, user_id: &str) -> StoreResult<Option<UserProfile>>;

    /// Users opted into coaching with a push token on file
    async fn coaching_users(&self) -> StoreResult<Vec<UserProfile>>;

    async fn hydration_plan(&self, user_id: &str) -> StoreResult<Option<HydrationPlan>>;

    /// Check-ins and ounces between `day_start` and `now`, plus the most
    /// recent drink at or before `now`
    async fn drink_activity(
        &self,
        user_id: &str,
        day_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<DrinkActivity>;

    /// Active template by name
    async fn template(&self, name: &str) -> StoreResult<Option<NotificationTemplate>>;

    async fn recent_notifications(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<SentNotificationRecord>>;

    async fn record_notification(&self, record: SentNotificationRecord) -> StoreResult<()>;

    async fn clear_push_token(&self, user_id: &str) -> StoreResult<()>;
}
