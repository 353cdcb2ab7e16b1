use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use dashmap::DashMap;
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::core::errors::{StoreError, StoreResult};
use crate::core::types::{
    AccountingOutcome, AccountingRequest, AnalysisCacheEntry, DrinkActivity, HydrationPlan,
    NotificationTemplate, SentNotificationRecord, UserProfile,
};
use crate::storage::Store;

/// In-process store with an LRU analysis cache and an explicit
/// increment-with-ceiling scan counter.
///
/// Used by tests and single-node deployments. The analysis cache and the
/// daily counters can be snapshotted to a JSON file so a restart doesn't
/// reset quotas.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    // Cache rows and counters share one lock so accounting is atomic
    analysis: Mutex<AnalysisState>,
    cache_ttl: Duration,
    snapshot_path: Option<PathBuf>,

    profiles: DashMap<String, UserProfile>,
    plans: DashMap<String, HydrationPlan>,
    drinks: DashMap<String, Vec<DrinkLogEntry>>,
    templates: DashMap<String, NotificationTemplate>,
    sent: RwLock<Vec<SentNotificationRecord>>,
}

struct AnalysisState {
    cache: LruCache<String, AnalysisCacheEntry>,
    usage: HashMap<(String, NaiveDate), u32>,
    usage_day: Option<NaiveDate>,
}

#[derive(Debug, Clone)]
struct DrinkLogEntry {
    ounces: f64,
    logged_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    cache: Vec<AnalysisCacheEntry>,
    usage: Vec<UsageRow>,
}

#[derive(Debug, Serialize, Deserialize)]
struct UsageRow {
    user_id: String,
    day: NaiveDate,
    count: u32,
}

impl MemoryStore {
    /// Create an empty store.
    ///
    /// # Arguments
    /// * `capacity` - Maximum cached analyses before LRU eviction
    /// * `cache_ttl` - Age after which a cached row no longer counts as a hit
    pub fn new(capacity: usize, cache_ttl: Duration) -> Self {
        Self::build(capacity, cache_ttl, None)
    }

    fn build(capacity: usize, cache_ttl: Duration, snapshot_path: Option<PathBuf>) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);

        Self {
            inner: Arc::new(MemoryInner {
                analysis: Mutex::new(AnalysisState {
                    cache: LruCache::new(capacity),
                    usage: HashMap::new(),
                    usage_day: None,
                }),
                cache_ttl,
                snapshot_path,
                profiles: DashMap::new(),
                plans: DashMap::new(),
                drinks: DashMap::new(),
                templates: DashMap::new(),
                sent: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Create a store backed by a JSON snapshot file, loading it if present
    pub async fn open(
        capacity: usize,
        cache_ttl: Duration,
        snapshot_path: impl AsRef<Path>,
    ) -> StoreResult<Self> {
        let path = snapshot_path.as_ref().to_path_buf();
        let store = Self::build(capacity, cache_ttl, Some(path.clone()));

        let snapshot = if path.exists() {
            let data = tokio::fs::read_to_string(&path)
                .await
                .map_err(|source| StoreError::Snapshot {
                    path: path.display().to_string(),
                    source,
                })?;
            serde_json::from_str::<Snapshot>(&data).unwrap_or_else(|e| {
                warn!("Ignoring unreadable snapshot {}: {}", path.display(), e);
                Snapshot::default()
            })
        } else {
            Snapshot::default()
        };

        {
            let mut state = store.inner.analysis.lock();
            for entry in snapshot.cache {
                state.cache.put(entry.fingerprint.clone(), entry);
            }
            for row in snapshot.usage {
                state.usage.insert((row.user_id, row.day), row.count);
            }
            info!(
                "Loaded store snapshot: {} cached analyses, {} usage counters",
                state.cache.len(),
                state.usage.len()
            );
        }

        Ok(store)
    }

    /// Write the analysis cache and usage counters to the snapshot file.
    /// No-op when the store wasn't opened with a snapshot path.
    pub async fn save(&self) -> StoreResult<()> {
        let Some(path) = &self.inner.snapshot_path else {
            return Ok(());
        };

        let snapshot = {
            let state = self.inner.analysis.lock();
            Snapshot {
                cache: state.cache.iter().map(|(_, v)| v.clone()).collect(),
                usage: state
                    .usage
                    .iter()
                    .map(|((user_id, day), count)| UsageRow {
                        user_id: user_id.clone(),
                        day: *day,
                        count: *count,
                    })
                    .collect(),
            }
        };

        let json = serde_json::to_string_pretty(&snapshot)?;
        tokio::fs::write(path, json)
            .await
            .map_err(|source| StoreError::Snapshot {
                path: path.display().to_string(),
                source,
            })?;

        debug!("Saved store snapshot to {}", path.display());
        Ok(())
    }

    /// Scans counted for a user on a UTC calendar day
    pub fn scans_on(&self, user_id: &str, day: NaiveDate) -> u32 {
        self.inner
            .analysis
            .lock()
            .usage
            .get(&(user_id.to_string(), day))
            .copied()
            .unwrap_or(0)
    }

    pub fn cached_entries(&self) -> usize {
        self.inner.analysis.lock().cache.len()
    }

    // Seeding helpers for tests and local development

    pub fn upsert_profile(&self, profile: UserProfile) {
        self.inner.profiles.insert(profile.id.clone(), profile);
    }

    pub fn set_plan(&self, plan: HydrationPlan) {
        self.inner.plans.insert(plan.user_id.clone(), plan);
    }

    pub fn log_drink(&self, user_id: &str, ounces: f64, logged_at: DateTime<Utc>) {
        self.inner
            .drinks
            .entry(user_id.to_string())
            .or_default()
            .push(DrinkLogEntry { ounces, logged_at });
    }

    pub fn put_template(&self, template: NotificationTemplate) {
        self.inner.templates.insert(template.name.clone(), template);
    }

    pub fn put_cache_entry(&self, entry: AnalysisCacheEntry) {
        self.inner
            .analysis
            .lock()
            .cache
            .put(entry.fingerprint.clone(), entry);
    }

    pub fn sent_notifications(&self) -> Vec<SentNotificationRecord> {
        self.inner.sent.read().clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn cached_analysis(&self, fingerprint: &str) -> StoreResult<Option<AnalysisCacheEntry>> {
        Ok(self.inner.analysis.lock().cache.get(fingerprint).cloned())
    }

    async fn process_analysis(&self, request: AccountingRequest) -> StoreResult<AccountingOutcome> {
        let mut guard = self.inner.analysis.lock();
        let state = &mut *guard;
        let day = request.scanned_at.date_naive();

        // Drop counters from previous days once per day rollover
        if state.usage_day.map_or(true, |d| d < day) {
            state.usage.retain(|(_, d), _| *d >= day);
            state.usage_day = Some(day);
        }

        if let Some(user_id) = &request.user_id {
            let count = state.usage.entry((user_id.clone(), day)).or_insert(0);
            if let Some(limit) = request.daily_limit {
                if *count >= limit {
                    debug!("User {} at daily limit {} ({} scans)", user_id, limit, count);
                    return Err(StoreError::LimitExceeded);
                }
            }
            *count += 1;
        }

        let existing = state
            .cache
            .get(&request.fingerprint)
            .filter(|e| e.is_fresh(request.scanned_at, self.inner.cache_ttl))
            .map(|e| e.result.clone());

        match existing {
            Some(result) => Ok(AccountingOutcome {
                result,
                cached: true,
            }),
            None => {
                let result = request.result.normalized();
                state.cache.put(
                    request.fingerprint.clone(),
                    AnalysisCacheEntry {
                        fingerprint: request.fingerprint,
                        result: result.clone(),
                        created_at: request.scanned_at,
                    },
                );
                Ok(AccountingOutcome {
                    result,
                    cached: false,
                })
            }
        }
    }

    async fn profile(&self, user_id: &str) -> StoreResult<Option<UserProfile>> {
        Ok(self.inner.profiles.get(user_id).map(|p| p.value().clone()))
    }

    async fn coaching_users(&self) -> StoreResult<Vec<UserProfile>> {
        let mut users: Vec<UserProfile> = self
            .inner
            .profiles
            .iter()
            .filter(|p| {
                p.coaching_enabled && p.push_token.as_deref().is_some_and(|t| !t.is_empty())
            })
            .map(|p| p.value().clone())
            .collect();
        users.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(users)
    }

    async fn hydration_plan(&self, user_id: &str) -> StoreResult<Option<HydrationPlan>> {
        Ok(self.inner.plans.get(user_id).map(|p| p.value().clone()))
    }

    async fn drink_activity(
        &self,
        user_id: &str,
        day_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<DrinkActivity> {
        let Some(logs) = self.inner.drinks.get(user_id) else {
            return Ok(DrinkActivity::default());
        };

        let mut activity = DrinkActivity::default();
        for log in logs.iter().filter(|l| l.logged_at <= now) {
            if log.logged_at >= day_start {
                activity.checkins_today += 1;
                activity.ounces_today += log.ounces;
            }
            if activity.last_drink_at.map_or(true, |last| log.logged_at > last) {
                activity.last_drink_at = Some(log.logged_at);
            }
        }
        Ok(activity)
    }

    async fn template(&self, name: &str) -> StoreResult<Option<NotificationTemplate>> {
        Ok(self
            .inner
            .templates
            .get(name)
            .filter(|t| t.is_active)
            .map(|t| t.value().clone()))
    }

    async fn recent_notifications(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<SentNotificationRecord>> {
        Ok(self
            .inner
            .sent
            .read()
            .iter()
            .filter(|r| r.user_id == user_id && r.sent_at >= since)
            .cloned()
            .collect())
    }

    async fn record_notification(&self, record: SentNotificationRecord) -> StoreResult<()> {
        self.inner.sent.write().push(record);
        Ok(())
    }

    async fn clear_push_token(&self, user_id: &str) -> StoreResult<()> {
        if let Some(mut profile) = self.inner.profiles.get_mut(user_id) {
            profile.push_token = None;
        }
        Ok(())
    }
}
