// Shared domain types for the analysis and reminder pipelines

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_VOLUME_OZ: f64 = 8.0;
pub const DEFAULT_CONFIDENCE: f64 = 0.5;
pub const UNKNOWN_DRINK: &str = "Unknown Drink";
pub const FALLBACK_DRINK: &str = "Water";

/// Structured drink analysis record, as produced by the interpretation step
/// and stored in the analysis cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub drink_name: String,
    pub estimated_volume_oz: f64,
    pub confidence: f64,
    #[serde(default)]
    pub description: String,
}

impl AnalysisResult {
    /// Result used when the interpretation text carries no usable JSON
    pub fn fallback() -> Self {
        Self {
            drink_name: FALLBACK_DRINK.to_string(),
            estimated_volume_oz: DEFAULT_VOLUME_OZ,
            confidence: DEFAULT_CONFIDENCE,
            description: String::new(),
        }
    }

    /// Clamp numeric fields into range and default empty strings.
    ///
    /// Volume is clamped to [1, 100] oz, confidence to [0, 1]. Non-finite
    /// values fall back to the defaults before clamping.
    pub fn normalized(self) -> Self {
        let volume = if self.estimated_volume_oz.is_finite() {
            self.estimated_volume_oz
        } else {
            DEFAULT_VOLUME_OZ
        };
        let confidence = if self.confidence.is_finite() {
            self.confidence
        } else {
            DEFAULT_CONFIDENCE
        };
        let name = self.drink_name.trim();

        Self {
            drink_name: if name.is_empty() {
                UNKNOWN_DRINK.to_string()
            } else {
                name.to_string()
            },
            estimated_volume_oz: volume.clamp(1.0, 100.0),
            confidence: confidence.clamp(0.0, 1.0),
            description: self.description.trim().to_string(),
        }
    }
}

/// Cached analysis row keyed by image fingerprint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisCacheEntry {
    pub fingerprint: String,
    pub result: AnalysisResult,
    pub created_at: DateTime<Utc>,
}

impl AnalysisCacheEntry {
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now.signed_duration_since(self.created_at) <= ttl
    }
}

/// Input to the atomic accounting procedure
#[derive(Debug, Clone)]
pub struct AccountingRequest {
    pub fingerprint: String,
    pub result: AnalysisResult,
    pub user_id: Option<String>,
    /// Ceiling for the caller's tier; `None` for anonymous callers
    pub daily_limit: Option<u32>,
    pub scanned_at: DateTime<Utc>,
}

/// Authoritative result returned by the accounting procedure
#[derive(Debug, Clone)]
pub struct AccountingOutcome {
    pub result: AnalysisResult,
    pub cached: bool,
}

/// Subscription tier, looked up from the caller's profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    Trial,
    Paid,
}

impl SubscriptionTier {
    /// Map a stored subscription status string onto a tier.
    /// Anything that isn't an active paid status counts as trial.
    pub fn from_status(status: Option<&str>) -> Self {
        match status.map(|s| s.trim().to_lowercase()).as_deref() {
            Some("active") | Some("paid") | Some("subscribed") | Some("pro") => Self::Paid,
            _ => Self::Trial,
        }
    }
}

/// Which quota message a caller sees when the accounting step refuses a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanLimitKind {
    Anonymous,
    Trial,
    Paid,
}

impl ScanLimitKind {
    pub fn for_caller(user_id: Option<&str>, tier: SubscriptionTier) -> Self {
        match (user_id, tier) {
            (None, _) => Self::Anonymous,
            (Some(_), SubscriptionTier::Trial) => Self::Trial,
            (Some(_), SubscriptionTier::Paid) => Self::Paid,
        }
    }

    /// Value of the `errorType` field in 429 responses
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anonymous => "LIMIT_EXCEEDED",
            Self::Trial => "TRIAL_LIMIT_EXCEEDED",
            Self::Paid => "PAID_LIMIT_EXCEEDED",
        }
    }

    /// Trial users are told the quota; paid users get a capacity message;
    /// anonymous callers get a generic connection error.
    pub fn user_message(&self, limit: u32) -> String {
        match self {
            Self::Anonymous => {
                "Unable to connect to the analysis service. Please check your connection and try again."
                    .to_string()
            }
            Self::Trial => format!(
                "You've reached your daily limit of {} drink scans. Upgrade to keep scanning today.",
                limit
            ),
            Self::Paid => {
                "Our servers are at capacity right now. Please try again in a little while."
                    .to_string()
            }
        }
    }
}

/// Profile row (only the fields the pipelines read)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub push_token: Option<String>,
    #[serde(default)]
    pub coaching_enabled: bool,
    #[serde(default)]
    pub subscription_status: Option<String>,
    #[serde(default)]
    pub current_streak: u32,
    #[serde(default)]
    pub daily_goal_oz: Option<f64>,
}

impl UserProfile {
    pub fn tier(&self) -> SubscriptionTier {
        SubscriptionTier::from_status(self.subscription_status.as_deref())
    }

    pub fn first_name(&self) -> &str {
        self.display_name
            .as_deref()
            .and_then(|n| n.split_whitespace().next())
            .unwrap_or("there")
    }
}

/// One entry in a hydration plan's schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledReminderSlot {
    /// "H:MM AM/PM"
    pub time: String,
    #[serde(default)]
    pub suggested_ounces: f64,
    #[serde(default)]
    pub note: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HydrationPlan {
    pub user_id: String,
    #[serde(default)]
    pub daily_goal_oz: Option<f64>,
    #[serde(default)]
    pub slots: Vec<ScheduledReminderSlot>,
}

/// Drinking activity since the start of the user's local day
#[derive(Debug, Clone, Default)]
pub struct DrinkActivity {
    pub checkins_today: u32,
    pub ounces_today: f64,
    /// Most recent drink, regardless of day
    pub last_drink_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationTemplate {
    pub name: String,
    pub title: String,
    pub body: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

/// Persisted record of a delivered reminder, used for dedup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentNotificationRecord {
    pub user_id: String,
    pub scheduled_time_key: String,
    pub sent_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_clamps_ranges() {
        let result = AnalysisResult {
            drink_name: "  Big Gulp ".to_string(),
            estimated_volume_oz: 250.0,
            confidence: 1.7,
            description: String::new(),
        }
        .normalized();

        assert_eq!(result.drink_name, "Big Gulp");
        assert_eq!(result.estimated_volume_oz, 100.0);
        assert_eq!(result.confidence, 1.0);

        let result = AnalysisResult {
            drink_name: String::new(),
            estimated_volume_oz: -3.0,
            confidence: f64::NAN,
            description: String::new(),
        }
        .normalized();

        assert_eq!(result.drink_name, UNKNOWN_DRINK);
        assert_eq!(result.estimated_volume_oz, 1.0);
        assert_eq!(result.confidence, DEFAULT_CONFIDENCE);
    }

    #[test]
    fn test_cache_entry_freshness() {
        let now = Utc::now();
        let entry = AnalysisCacheEntry {
            fingerprint: "abc".to_string(),
            result: AnalysisResult::fallback(),
            created_at: now - Duration::days(6),
        };
        assert!(entry.is_fresh(now, Duration::days(7)));
        assert!(!entry.is_fresh(now + Duration::days(2), Duration::days(7)));
    }

    #[test]
    fn test_tier_from_status() {
        assert_eq!(SubscriptionTier::from_status(Some("active")), SubscriptionTier::Paid);
        assert_eq!(SubscriptionTier::from_status(Some("trial")), SubscriptionTier::Trial);
        assert_eq!(SubscriptionTier::from_status(None), SubscriptionTier::Trial);
    }

    #[test]
    fn test_limit_kind_selection() {
        assert_eq!(
            ScanLimitKind::for_caller(None, SubscriptionTier::Paid).as_str(),
            "LIMIT_EXCEEDED"
        );
        assert_eq!(
            ScanLimitKind::for_caller(Some("u1"), SubscriptionTier::Trial).as_str(),
            "TRIAL_LIMIT_EXCEEDED"
        );
        assert!(ScanLimitKind::Trial.user_message(3).contains("daily limit of 3"));
        assert!(!ScanLimitKind::Paid.user_message(8).contains('8'));
    }
}
