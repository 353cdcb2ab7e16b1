// Drink image analysis: cache gate, vision + interpretation, quota accounting

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::core::config::AnalysisConfig;
use crate::core::errors::{AnalysisError, AnalyzeResult, StoreError};
use crate::core::types::{AccountingRequest, AnalysisResult, ScanLimitKind, SubscriptionTier, UNKNOWN_DRINK};
use crate::services::drinks::{categorize, DrinkCategory};
use crate::services::interpretation::InterpretationService;
use crate::services::vision::VisionService;
use crate::storage::Store;
use crate::utils::{fingerprint, Metrics};

/// One scan request as received from the client
#[derive(Debug, Clone, Default)]
pub struct AnalyzeRequest {
    /// Base64 image, optionally as a data URL
    pub image: Option<String>,
    pub user_id: Option<String>,
}

/// Analysis returned to the caller
#[derive(Debug, Clone)]
pub struct DrinkAnalysis {
    pub result: AnalysisResult,
    pub cached: bool,
    pub category: DrinkCategory,
    pub hydration_oz: f64,
}

pub struct DrinkAnalyzer {
    store: Arc<dyn Store>,
    vision: Arc<dyn VisionService>,
    interpreter: Arc<dyn InterpretationService>,
    cache_ttl: Duration,
    trial_daily_scans: u32,
    paid_daily_scans: u32,
    metrics: Metrics,
}

impl DrinkAnalyzer {
    pub fn new(
        store: Arc<dyn Store>,
        vision: Arc<dyn VisionService>,
        interpreter: Arc<dyn InterpretationService>,
        config: &AnalysisConfig,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            vision,
            interpreter,
            cache_ttl: Duration::days(config.cache_ttl_days),
            trial_daily_scans: config.trial_daily_scans,
            paid_daily_scans: config.paid_daily_scans,
            metrics,
        }
    }

    /// Resolve the caller's tier. Lookup failures and missing profiles
    /// count as trial.
    async fn tier_for(&self, user_id: &str) -> SubscriptionTier {
        match self.store.profile(user_id).await {
            Ok(Some(profile)) => profile.tier(),
            Ok(None) => SubscriptionTier::Trial,
            Err(e) => {
                warn!("Profile lookup failed for {}, assuming trial: {}", user_id, e);
                SubscriptionTier::Trial
            }
        }
    }

    fn daily_limit(&self, tier: SubscriptionTier) -> u32 {
        match tier {
            SubscriptionTier::Trial => self.trial_daily_scans,
            SubscriptionTier::Paid => self.paid_daily_scans,
        }
    }

    /// Fresh cached result for a fingerprint. Store errors are treated
    /// as a miss.
    async fn cache_lookup(&self, key: &str, now: DateTime<Utc>) -> Option<AnalysisResult> {
        match self.store.cached_analysis(key).await {
            Ok(Some(entry)) if entry.is_fresh(now, self.cache_ttl) => Some(entry.result),
            Ok(Some(_)) => {
                debug!("Cached analysis {} is stale", key);
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Cache lookup failed for {}, recomputing: {}", key, e);
                None
            }
        }
    }

    /// Analyse one drink photo
    ///
    /// # Workflow:
    /// 1. Reject an empty payload
    /// 2. Resolve the caller's tier and daily ceiling
    /// 3. Reuse a fresh cached result for the same fingerprint, otherwise
    ///    run vision then interpretation
    /// 4. Count the scan and persist the result through the store's
    ///    atomic accounting call
    ///
    /// # Arguments:
    /// * `request` - Image payload and optional caller id
    /// * `now` - Scan time, used for freshness and the daily counter
    #[instrument(skip(self, request), fields(user = request.user_id.as_deref().unwrap_or("anonymous")))]
    pub async fn analyze(&self, request: AnalyzeRequest, now: DateTime<Utc>) -> AnalyzeResult<DrinkAnalysis> {
        let start = Instant::now();

        let image = match request.image.as_deref().map(str::trim) {
            Some(image) if !image.is_empty() => image,
            _ => return Err(AnalysisError::MissingImage),
        };
        let user_id = request.user_id.as_deref().map(str::trim).filter(|id| !id.is_empty());
        self.metrics.record_scan();

        let tier = match user_id {
            Some(id) => self.tier_for(id).await,
            None => SubscriptionTier::Trial,
        };
        let daily_limit = user_id.map(|_| self.daily_limit(tier));

        let key = fingerprint(image);
        let (result, gate_hit) = match self.cache_lookup(&key, now).await {
            Some(result) => {
                self.metrics.record_cache_hit();
                (result, true)
            }
            None => {
                self.metrics.record_cache_miss();
                let features = self
                    .vision
                    .extract_features(image)
                    .await
                    .map_err(AnalysisError::Vision)?;
                let result = self
                    .interpreter
                    .interpret(&features)
                    .await
                    .map_err(AnalysisError::Interpretation)?;
                (result.normalized(), false)
            }
        };

        let outcome = self
            .store
            .process_analysis(AccountingRequest {
                fingerprint: key.clone(),
                result,
                user_id: user_id.map(str::to_string),
                daily_limit,
                scanned_at: now,
            })
            .await
            .map_err(|e| match e {
                StoreError::LimitExceeded => {
                    self.metrics.record_scan_limited();
                    let kind = ScanLimitKind::for_caller(user_id, tier);
                    info!("Scan refused: {} (limit {:?})", kind.as_str(), daily_limit);
                    AnalysisError::LimitExceeded {
                        kind,
                        limit: daily_limit.unwrap_or(0),
                    }
                }
                other => AnalysisError::Accounting(other),
            })?;

        // The placeholder name would otherwise hit the alcohol keyword
        let category = if outcome.result.drink_name == UNKNOWN_DRINK {
            DrinkCategory::Other
        } else {
            categorize(&outcome.result.drink_name)
        };
        let hydration_oz = category.hydration_oz(outcome.result.estimated_volume_oz);

        info!(
            "✓ Analysed {} as {} ({:.1} oz, cached={}) in {:.2}ms",
            key,
            outcome.result.drink_name,
            outcome.result.estimated_volume_oz,
            gate_hit || outcome.cached,
            start.elapsed().as_secs_f64() * 1000.0
        );

        Ok(DrinkAnalysis {
            result: outcome.result,
            cached: gate_hit || outcome.cached,
            category,
            hydration_oz,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::{StoreResult, UpstreamError, UpstreamResult};
    use crate::core::types::{
        AccountingOutcome, AnalysisCacheEntry, DrinkActivity, HydrationPlan, NotificationTemplate,
        SentNotificationRecord, UserProfile,
    };
    use crate::services::interpretation::parse_interpretation;
    use crate::services::vision::VisualFeatures;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingVision {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl VisionService for CountingVision {
        async fn extract_features(&self, _image: &str) -> UpstreamResult<VisualFeatures> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(UpstreamError::Status {
                    service: "vision",
                    status: 503,
                    body: "unavailable".to_string(),
                });
            }
            Ok(VisualFeatures::default())
        }
    }

    /// Replies with fixed model text, parsed the same way as the real client
    struct ScriptedInterpreter {
        reply: &'static str,
        calls: AtomicUsize,
    }

    impl ScriptedInterpreter {
        fn new(reply: &'static str) -> Self {
            Self {
                reply,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl InterpretationService for ScriptedInterpreter {
        async fn interpret(&self, _features: &VisualFeatures) -> UpstreamResult<AnalysisResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(parse_interpretation(self.reply))
        }
    }

    /// Memory store whose cache reads always fail
    struct CacheReadFailingStore {
        inner: MemoryStore,
    }

    #[async_trait]
    impl Store for CacheReadFailingStore {
        async fn cached_analysis(&self, _: &str) -> StoreResult<Option<AnalysisCacheEntry>> {
            Err(StoreError::Api {
                status: 500,
                message: "cache table unreachable".to_string(),
            })
        }
        async fn process_analysis(&self, request: AccountingRequest) -> StoreResult<AccountingOutcome> {
            self.inner.process_analysis(request).await
        }
        async fn profile(&self, user_id: &str) -> StoreResult<Option<UserProfile>> {
            self.inner.profile(user_id).await
        }
        async fn coaching_users(&self) -> StoreResult<Vec<UserProfile>> {
            self.inner.coaching_users().await
        }
        async fn hydration_plan(&self, user_id: &str) -> StoreResult<Option<HydrationPlan>> {
            self.inner.hydration_plan(user_id).await
        }
        async fn drink_activity(&self, user_id: &str, since: DateTime<Utc>, now: DateTime<Utc>) -> StoreResult<DrinkActivity> {
            self.inner.drink_activity(user_id, since, now).await
        }
        async fn template(&self, name: &str) -> StoreResult<Option<NotificationTemplate>> {
            self.inner.template(name).await
        }
        async fn recent_notifications(&self, user_id: &str, since: DateTime<Utc>) -> StoreResult<Vec<SentNotificationRecord>> {
            self.inner.recent_notifications(user_id, since).await
        }
        async fn record_notification(&self, record: SentNotificationRecord) -> StoreResult<()> {
            self.inner.record_notification(record).await
        }
        async fn clear_push_token(&self, user_id: &str) -> StoreResult<()> {
            self.inner.clear_push_token(user_id).await
        }
    }

    const LATTE: &str = r#"{"drinkName": "Iced Latte", "estimatedOz": 16, "confidence": 0.9, "description": "Grande"}"#;

    struct Harness {
        store: MemoryStore,
        vision: Arc<CountingVision>,
        interpreter: Arc<ScriptedInterpreter>,
        analyzer: DrinkAnalyzer,
    }

    fn harness_with(reply: &'static str, vision: CountingVision) -> Harness {
        let config = AnalysisConfig {
            cache_ttl_days: 7,
            trial_daily_scans: 3,
            paid_daily_scans: 8,
        };
        let store = MemoryStore::new(100, Duration::days(config.cache_ttl_days));
        let vision = Arc::new(vision);
        let interpreter = Arc::new(ScriptedInterpreter::new(reply));
        let analyzer = DrinkAnalyzer::new(
            Arc::new(store.clone()),
            vision.clone(),
            interpreter.clone(),
            &config,
            Metrics::new(),
        );
        Harness {
            store,
            vision,
            interpreter,
            analyzer,
        }
    }

    fn harness(reply: &'static str) -> Harness {
        harness_with(reply, CountingVision::default())
    }

    fn scan(image: &str, user: Option<&str>) -> AnalyzeRequest {
        AnalyzeRequest {
            image: Some(image.to_string()),
            user_id: user.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_repeat_payload_is_served_from_cache() {
        let h = harness(LATTE);
        let now = Utc::now();

        let first = h.analyzer.analyze(scan("aW1hZ2UtMQ==", Some("u1")), now).await.unwrap();
        assert!(!first.cached);
        assert_eq!(first.category, DrinkCategory::Coffee);
        assert_eq!(first.hydration_oz, 12.8);

        let second = h
            .analyzer
            .analyze(scan("aW1hZ2UtMQ==", Some("u1")), now + Duration::days(6))
            .await
            .unwrap();
        assert!(second.cached);
        assert_eq!(second.result, first.result);
        assert_eq!(h.vision.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.interpreter.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stale_cache_entry_is_recomputed() {
        let h = harness(LATTE);
        let now = Utc::now();
        h.store.put_cache_entry(AnalysisCacheEntry {
            fingerprint: fingerprint("b2xkLWltYWdl"),
            result: AnalysisResult::fallback(),
            created_at: now - Duration::days(8),
        });

        let analysis = h.analyzer.analyze(scan("b2xkLWltYWdl", None), now).await.unwrap();
        assert!(!analysis.cached);
        assert_eq!(analysis.result.drink_name, "Iced Latte");
        assert_eq!(h.vision.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_out_of_range_model_output_is_clamped() {
        let h = harness(r#"{"drinkName": "Bucket", "estimatedOz": 500, "confidence": 3.5}"#);
        let analysis = h.analyzer.analyze(scan("YnVja2V0", None), Utc::now()).await.unwrap();
        assert_eq!(analysis.result.estimated_volume_oz, 100.0);
        assert_eq!(analysis.result.confidence, 1.0);
    }

    #[tokio::test]
    async fn test_malformed_model_output_falls_back_to_water() {
        let h = harness("Looks refreshing!");
        let analysis = h.analyzer.analyze(scan("d2F0ZXI=", None), Utc::now()).await.unwrap();
        assert_eq!(analysis.result.drink_name, "Water");
        assert_eq!(analysis.result.estimated_volume_oz, 8.0);
        assert_eq!(analysis.result.confidence, 0.5);
    }

    #[tokio::test]
    async fn test_trial_user_fourth_scan_is_refused() {
        let h = harness(LATTE);
        let now = Utc::now();

        for i in 0..3 {
            h.analyzer
                .analyze(scan(&format!("dHJpYWwt{i}"), Some("trial-user")), now)
                .await
                .unwrap();
        }
        let err = h
            .analyzer
            .analyze(scan("dHJpYWwtMw==", Some("trial-user")), now)
            .await
            .unwrap_err();

        match err {
            AnalysisError::LimitExceeded { kind, limit } => {
                assert_eq!(kind, ScanLimitKind::Trial);
                assert_eq!(limit, 3);
            }
            other => panic!("expected limit error, got {other}"),
        }
        assert_eq!(h.store.scans_on("trial-user", now.date_naive()), 3);
    }

    #[tokio::test]
    async fn test_paid_user_ninth_scan_is_refused() {
        let h = harness(LATTE);
        h.store.upsert_profile(UserProfile {
            id: "paid-user".to_string(),
            subscription_status: Some("active".to_string()),
            ..Default::default()
        });
        let now = Utc::now();

        for i in 0..8 {
            h.analyzer
                .analyze(scan(&format!("cGFpZC0{i}"), Some("paid-user")), now)
                .await
                .unwrap();
        }
        let err = h
            .analyzer
            .analyze(scan("cGFpZC05", Some("paid-user")), now)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::LimitExceeded {
                kind: ScanLimitKind::Paid,
                limit: 8
            }
        ));
    }

    #[tokio::test]
    async fn test_anonymous_scans_are_not_limited() {
        let h = harness(LATTE);
        let now = Utc::now();
        for i in 0..10 {
            h.analyzer
                .analyze(scan(&format!("YW5vbi0{i}"), None), now)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_missing_image() {
        let h = harness(LATTE);
        for image in [None, Some("   ".to_string())] {
            let err = h
                .analyzer
                .analyze(AnalyzeRequest { image, user_id: None }, Utc::now())
                .await
                .unwrap_err();
            assert!(matches!(err, AnalysisError::MissingImage));
        }
        assert_eq!(h.vision.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_vision_failure_is_not_counted() {
        let h = harness_with(
            LATTE,
            CountingVision {
                fail: true,
                ..Default::default()
            },
        );
        let now = Utc::now();
        let err = h
            .analyzer
            .analyze(scan("ZmFpbA==", Some("u2")), now)
            .await
            .unwrap_err();

        assert!(matches!(err, AnalysisError::Vision(_)));
        assert_eq!(h.interpreter.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.store.scans_on("u2", now.date_naive()), 0);
        assert_eq!(h.store.cached_entries(), 0);
    }

    #[tokio::test]
    async fn test_cache_read_error_is_treated_as_miss() {
        let inner = MemoryStore::new(100, Duration::days(7));
        let vision = Arc::new(CountingVision::default());
        let interpreter = Arc::new(ScriptedInterpreter::new(LATTE));
        let analyzer = DrinkAnalyzer::new(
            Arc::new(CacheReadFailingStore { inner: inner.clone() }),
            vision.clone(),
            interpreter.clone(),
            &AnalysisConfig {
                cache_ttl_days: 7,
                trial_daily_scans: 3,
                paid_daily_scans: 8,
            },
            Metrics::new(),
        );
        let now = Utc::now();

        for _ in 0..2 {
            let analysis = analyzer.analyze(scan("Y2FjaGUtZG93bg==", Some("u3")), now).await.unwrap();
            assert_eq!(analysis.result.drink_name, "Iced Latte");
        }

        assert_eq!(vision.calls.load(Ordering::SeqCst), 2);
        assert_eq!(interpreter.calls.load(Ordering::SeqCst), 2);
        assert_eq!(inner.scans_on("u3", now.date_naive()), 2);
        assert_eq!(inner.cached_entries(), 1);
    }

    #[tokio::test]
    async fn test_unknown_drink_is_not_categorised_as_alcohol() {
        let h = harness("{}");
        let analysis = h.analyzer.analyze(scan("bXlzdGVyeQ==", None), Utc::now()).await.unwrap();
        assert_eq!(analysis.result.drink_name, UNKNOWN_DRINK);
        assert_eq!(analysis.category, DrinkCategory::Other);
        assert_eq!(analysis.hydration_oz, 6.4);
    }
}
