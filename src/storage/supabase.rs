// Hosted store backed by Supabase (PostgREST over HTTP)
//
// Quota enforcement and the cache upsert run inside the
// `process_drink_analysis` database function; this client only maps its
// responses.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::core::errors::{StoreError, StoreResult};
use crate::core::types::{
    AccountingOutcome, AccountingRequest, AnalysisCacheEntry, AnalysisResult, DrinkActivity,
    HydrationPlan, NotificationTemplate, ScheduledReminderSlot, SentNotificationRecord,
    UserProfile,
};
use crate::storage::Store;

/// Marker the accounting function raises when a caller is over quota
const LIMIT_EXCEEDED_MARKER: &str = "LIMIT_EXCEEDED";

const PROFILE_COLUMNS: &str = "id,display_name,timezone,push_token,coaching_enabled,subscription_status,current_streak,daily_goal_oz";

pub struct SupabaseStore {
    base_url: String,
    service_key: String,
    http_client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct CacheRow {
    image_hash: String,
    analysis_result: AnalysisResult,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct ProcessAnalysisRow {
    result: AnalysisResult,
    #[serde(default)]
    cached: bool,
}

#[derive(Debug, Deserialize)]
struct PlanRow {
    user_id: String,
    #[serde(default)]
    daily_goal_oz: Option<f64>,
    #[serde(default)]
    schedule: Vec<ScheduledReminderSlot>,
}

#[derive(Debug, Deserialize)]
struct DrinkLogRow {
    ounces: f64,
    logged_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct HistoryRow {
    user_id: String,
    sent_at: DateTime<Utc>,
    #[serde(default)]
    metadata: serde_json::Value,
}

/// PostgREST error body
#[derive(Debug, Default, Deserialize)]
struct PostgrestError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    hint: Option<String>,
    #[serde(default)]
    details: Option<String>,
}

impl SupabaseStore {
    pub fn new(base_url: &str, service_key: &str, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key: service_key.to_string(),
            http_client,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http_client
            .request(method, format!("{}/rest/v1/{}", self.base_url, path))
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
    }

    async fn fetch<T: DeserializeOwned>(&self, builder: RequestBuilder) -> StoreResult<T> {
        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(map_error(status, &body));
        }
        Ok(serde_json::from_str(&body)?)
    }

    async fn execute(&self, builder: RequestBuilder) -> StoreResult<()> {
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_error(status, &body));
        }
        Ok(())
    }
}

/// Translate a PostgREST failure, picking out the quota signal
fn map_error(status: StatusCode, body: &str) -> StoreError {
    let parsed: PostgrestError = serde_json::from_str(body).unwrap_or_default();

    let mentions_limit = [
        Some(parsed.message.as_str()),
        parsed.hint.as_deref(),
        parsed.details.as_deref(),
    ]
    .into_iter()
    .flatten()
    .any(|s| s.contains(LIMIT_EXCEEDED_MARKER));

    if mentions_limit {
        return StoreError::LimitExceeded;
    }

    StoreError::Api {
        status: status.as_u16(),
        message: if parsed.message.is_empty() {
            body.to_string()
        } else {
            parsed.message
        },
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[async_trait]
impl Store for SupabaseStore {
    #[instrument(skip(self))]
    async fn cached_analysis(&self, fingerprint: &str) -> StoreResult<Option<AnalysisCacheEntry>> {
        let rows: Vec<CacheRow> = self
            .fetch(self.request(Method::GET, "drink_analysis_cache").query(&[
                ("select", "image_hash,analysis_result,created_at"),
                ("image_hash", format!("eq.{}", fingerprint).as_str()),
                ("order", "created_at.desc"),
                ("limit", "1"),
            ]))
            .await?;

        Ok(rows.into_iter().next().map(|row| AnalysisCacheEntry {
            fingerprint: row.image_hash,
            result: row.analysis_result,
            created_at: row.created_at,
        }))
    }

    #[instrument(skip(self, request), fields(fingerprint = %request.fingerprint))]
    async fn process_analysis(&self, request: AccountingRequest) -> StoreResult<AccountingOutcome> {
        let body = json!({
            "p_image_hash": request.fingerprint,
            "p_analysis_result": request.result,
            "p_user_id": request.user_id,
            "p_daily_limit": request.daily_limit,
            "p_scanned_at": timestamp(request.scanned_at),
        });

        let row: ProcessAnalysisRow = self
            .fetch(self.request(Method::POST, "rpc/process_drink_analysis").json(&body))
            .await?;

        debug!("Accounting completed (cached: {})", row.cached);
        Ok(AccountingOutcome {
            result: row.result,
            cached: row.cached,
        })
    }

    async fn profile(&self, user_id: &str) -> StoreResult<Option<UserProfile>> {
        let rows: Vec<UserProfile> = self
            .fetch(self.request(Method::GET, "profiles").query(&[
                ("select", PROFILE_COLUMNS),
                ("id", format!("eq.{}", user_id).as_str()),
                ("limit", "1"),
            ]))
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn coaching_users(&self) -> StoreResult<Vec<UserProfile>> {
        self.fetch(self.request(Method::GET, "profiles").query(&[
            ("select", PROFILE_COLUMNS),
            ("coaching_enabled", "eq.true"),
            ("push_token", "not.is.null"),
            ("order", "id.asc"),
        ]))
        .await
    }

    async fn hydration_plan(&self, user_id: &str) -> StoreResult<Option<HydrationPlan>> {
        let rows: Vec<PlanRow> = self
            .fetch(self.request(Method::GET, "hydration_plans").query(&[
                ("select", "user_id,daily_goal_oz,schedule"),
                ("user_id", format!("eq.{}", user_id).as_str()),
                ("order", "created_at.desc"),
                ("limit", "1"),
            ]))
            .await?;

        Ok(rows.into_iter().next().map(|row| HydrationPlan {
            user_id: row.user_id,
            daily_goal_oz: row.daily_goal_oz,
            slots: row.schedule,
        }))
    }

    async fn drink_activity(
        &self,
        user_id: &str,
        day_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<DrinkActivity> {
        let user_filter = format!("eq.{}", user_id);
        let window = format!(
            "(logged_at.gte.{},logged_at.lte.{})",
            timestamp(day_start),
            timestamp(now)
        );
        let today: Vec<DrinkLogRow> = self
            .fetch(self.request(Method::GET, "drink_logs").query(&[
                ("select", "ounces,logged_at"),
                ("user_id", user_filter.as_str()),
                ("and", window.as_str()),
            ]))
            .await?;

        let latest: Vec<DrinkLogRow> = self
            .fetch(self.request(Method::GET, "drink_logs").query(&[
                ("select", "ounces,logged_at"),
                ("user_id", user_filter.as_str()),
                ("logged_at", format!("lte.{}", timestamp(now)).as_str()),
                ("order", "logged_at.desc"),
                ("limit", "1"),
            ]))
            .await?;

        Ok(DrinkActivity {
            checkins_today: today.len() as u32,
            ounces_today: today.iter().map(|r| r.ounces).sum(),
            last_drink_at: latest.first().map(|r| r.logged_at),
        })
    }

    async fn template(&self, name: &str) -> StoreResult<Option<NotificationTemplate>> {
        let rows: Vec<NotificationTemplate> = self
            .fetch(self.request(Method::GET, "notification_templates").query(&[
                ("select", "name,title,body,is_active"),
                ("name", format!("eq.{}", name).as_str()),
                ("is_active", "eq.true"),
                ("limit", "1"),
            ]))
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn recent_notifications(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<SentNotificationRecord>> {
        let rows: Vec<HistoryRow> = self
            .fetch(self.request(Method::GET, "notification_history").query(&[
                ("select", "user_id,sent_at,metadata"),
                ("user_id", format!("eq.{}", user_id).as_str()),
                ("sent_at", format!("gte.{}", timestamp(since)).as_str()),
            ]))
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| SentNotificationRecord {
                scheduled_time_key: row.metadata["scheduled_time_key"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string(),
                user_id: row.user_id,
                sent_at: row.sent_at,
                metadata: row.metadata,
            })
            .collect())
    }

    async fn record_notification(&self, record: SentNotificationRecord) -> StoreResult<()> {
        let mut metadata = record.metadata;
        if !metadata.is_object() {
            metadata = json!({});
        }
        metadata["scheduled_time_key"] = json!(record.scheduled_time_key);

        self.execute(
            self.request(Method::POST, "notification_history")
                .header("Prefer", "return=minimal")
                .json(&json!({
                    "user_id": record.user_id,
                    "sent_at": timestamp(record.sent_at),
                    "metadata": metadata,
                })),
        )
        .await
    }

    async fn clear_push_token(&self, user_id: &str) -> StoreResult<()> {
        self.execute(
            self.request(Method::PATCH, "profiles")
                .query(&[("id", format!("eq.{}", user_id))])
                .header("Prefer", "return=minimal")
                .json(&json!({ "push_token": null })),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_marker_maps_to_limit_exceeded() {
        let body = r#"{"code":"P0001","message":"LIMIT_EXCEEDED","details":null,"hint":null}"#;
        assert!(matches!(
            map_error(StatusCode::BAD_REQUEST, body),
            StoreError::LimitExceeded
        ));

        let body = r#"{"code":"P0001","message":"scan rejected","hint":"LIMIT_EXCEEDED: 3/3"}"#;
        assert!(matches!(
            map_error(StatusCode::BAD_REQUEST, body),
            StoreError::LimitExceeded
        ));
    }

    #[test]
    fn test_other_errors_keep_status_and_message() {
        let body = r#"{"code":"42P01","message":"relation does not exist"}"#;
        match map_error(StatusCode::NOT_FOUND, body) {
            StoreError::Api { status, message } => {
                assert_eq!(status, 404);
                assert_eq!(message, "relation does not exist");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        match map_error(StatusCode::BAD_GATEWAY, "upstream down") {
            StoreError::Api { message, .. } => assert_eq!(message, "upstream down"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_cache_row_deserializes_camel_case_result() {
        let json = r#"{
            "image_hash": "abc123",
            "analysis_result": {"drinkName": "Coke", "estimatedVolumeOz": 12, "confidence": 0.92, "description": "Red can"},
            "created_at": "2025-03-01T10:00:00Z"
        }"#;
        let row: CacheRow = serde_json::from_str(json).unwrap();
        assert_eq!(row.analysis_result.drink_name, "Coke");
        assert_eq!(row.analysis_result.estimated_volume_oz, 12.0);
    }

    #[test]
    fn test_base_url_is_normalized() {
        let store =
            SupabaseStore::new("https://demo.supabase.co/", "key", Duration::from_secs(5)).unwrap();
        assert_eq!(store.base_url, "https://demo.supabase.co");
    }
}
