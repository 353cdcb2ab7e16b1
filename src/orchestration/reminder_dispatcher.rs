// Hydration reminder dispatch
//
// One run walks every coaching user, finds plan slots due at the user's
// local time, and pushes at most one reminder per slot per dedup window.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::core::config::ReminderConfig;
use crate::core::errors::{DispatchError, DispatchResult};
use crate::core::types::{
    DrinkActivity, HydrationPlan, ScheduledReminderSlot, SentNotificationRecord, UserProfile,
};
use crate::services::notifications::schedule::expected_ounces_by;
use crate::services::notifications::{
    fallback_message, is_due, local_clock, parse_slot_time, render, resolve_timezone,
    scheduled_time_key, select_template, ReminderContext, TemplateKind,
};
use crate::services::push::{PushMessage, PushOutcome, PushService};
use crate::storage::Store;
use crate::utils::Metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    Sent,
    Duplicate,
    InvalidToken,
    Rejected,
    Failed,
}

/// Per-(user, slot) line in the run report
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchDetail {
    pub user_id: String,
    /// `None` when the failure happened before any slot was considered
    pub scheduled_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    pub status: DispatchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReport {
    pub notifications_sent: u32,
    pub details: Vec<DispatchDetail>,
}

impl DispatchReport {
    fn push(&mut self, detail: DispatchDetail) {
        if detail.status == DispatchStatus::Sent {
            self.notifications_sent += 1;
        }
        self.details.push(detail);
    }
}

/// Store reads needed once per user with at least one due slot
struct UserState {
    plan: HydrationPlan,
    activity: DrinkActivity,
    recent_keys: Vec<String>,
}

enum SlotOutcome {
    Sent,
    InvalidToken,
    Rejected(String),
}

pub struct ReminderDispatcher {
    store: Arc<dyn Store>,
    push: Arc<dyn PushService>,
    window_minutes: u32,
    dedup_window: Duration,
    metrics: Metrics,
}

impl ReminderDispatcher {
    pub fn new(
        store: Arc<dyn Store>,
        push: Arc<dyn PushService>,
        config: &ReminderConfig,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            push,
            window_minutes: config.window_minutes,
            dedup_window: Duration::hours(config.dedup_hours),
            metrics,
        }
    }

    /// Run one dispatch pass
    ///
    /// Only a failure to list users aborts the run; every other error is
    /// logged and reported per user or slot.
    #[instrument(skip(self))]
    pub async fn run(&self, now: DateTime<Utc>) -> DispatchResult<DispatchReport> {
        let start = Instant::now();
        self.metrics.record_reminder_run();

        let users = self
            .store
            .coaching_users()
            .await
            .map_err(DispatchError::UserListing)?;
        info!("Reminder run: {} coaching users", users.len());

        let mut report = DispatchReport::default();
        for user in &users {
            self.dispatch_user(user, now, &mut report).await;
        }

        info!(
            "✓ Reminder run complete: {} sent, {} details in {:.2}ms",
            report.notifications_sent,
            report.details.len(),
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(report)
    }

    async fn load_user_state(&self, user: &UserProfile, now: DateTime<Utc>, day_start: DateTime<Utc>) -> DispatchResult<Option<UserState>> {
        let Some(plan) = self.store.hydration_plan(&user.id).await? else {
            return Ok(None);
        };
        let activity = self.store.drink_activity(&user.id, day_start, now).await?;
        let recent_keys = self
            .store
            .recent_notifications(&user.id, now - self.dedup_window)
            .await?
            .into_iter()
            .map(|record| record.scheduled_time_key)
            .collect();

        Ok(Some(UserState {
            plan,
            activity,
            recent_keys,
        }))
    }

    async fn dispatch_user(&self, user: &UserProfile, now: DateTime<Utc>, report: &mut DispatchReport) {
        let Some(token) = user.push_token.as_deref().filter(|t| !t.is_empty()) else {
            return;
        };

        let tz = resolve_timezone(user.timezone.as_deref());
        let clock = local_clock(now, tz);
        let now_minutes = clock.minutes_of_day();

        let mut state = match self.load_user_state(user, now, clock.day_start_utc).await {
            Ok(Some(state)) => state,
            Ok(None) => {
                debug!("User {} has no hydration plan", user.id);
                return;
            }
            Err(e) => {
                error!("Failed to load reminder state for {}: {}", user.id, e);
                self.metrics.record_notification_failed();
                report.push(DispatchDetail {
                    user_id: user.id.clone(),
                    scheduled_time: None,
                    template: None,
                    status: DispatchStatus::Failed,
                    reason: Some(e.to_string()),
                });
                return;
            }
        };

        let due: Vec<(String, &ScheduledReminderSlot)> = state
            .plan
            .slots
            .iter()
            .filter_map(|slot| {
                let (hour, minute) = parse_slot_time(&slot.time).or_else(|| {
                    warn!("Skipping unparseable slot time {:?} for {}", slot.time, user.id);
                    None
                })?;
                is_due(now_minutes, hour * 60 + minute, self.window_minutes)
                    .then(|| (scheduled_time_key(hour, minute), slot))
            })
            .collect();

        if due.is_empty() {
            return;
        }

        let expected_oz = expected_ounces_by(&state.plan.slots, now_minutes);
        let goal_oz = state.plan.daily_goal_oz.or(user.daily_goal_oz).unwrap_or(0.0);

        for (key, slot) in due {
            if state.recent_keys.contains(&key) {
                debug!("Reminder {} for {} already sent", key, user.id);
                self.metrics.record_notification_skipped();
                report.push(DispatchDetail {
                    user_id: user.id.clone(),
                    scheduled_time: Some(key),
                    template: None,
                    status: DispatchStatus::Duplicate,
                    reason: None,
                });
                continue;
            }

            let ctx = ReminderContext {
                name: user.first_name().to_string(),
                ounces: slot.suggested_ounces,
                time_label: slot.time.trim().to_string(),
                checkins_today: state.activity.checkins_today,
                hours_since_last_drink: state
                    .activity
                    .last_drink_at
                    .map(|at| (now - at).num_minutes().max(0) as f64 / 60.0),
                current_streak: user.current_streak,
                goal_percent: if goal_oz > 0.0 {
                    (state.activity.ounces_today / goal_oz * 100.0).round().max(0.0) as u32
                } else {
                    0
                },
                behind_schedule: state.activity.ounces_today < expected_oz,
            };
            let kind = select_template(&ctx);

            let outcome = self.send_slot(user, token, slot, &key, kind, &ctx, now).await;
            let (status, reason) = match outcome {
                Ok(SlotOutcome::Sent) => {
                    self.metrics.record_notification_sent();
                    state.recent_keys.push(key.clone());
                    (DispatchStatus::Sent, None)
                }
                Ok(SlotOutcome::InvalidToken) => {
                    warn!("Push token for {} is no longer registered, clearing it", user.id);
                    self.metrics.record_notification_failed();
                    let reason = match self.store.clear_push_token(&user.id).await {
                        Ok(()) => {
                            self.metrics.record_token_cleared();
                            None
                        }
                        Err(e) => {
                            error!("Failed to clear push token for {}: {}", user.id, e);
                            Some(e.to_string())
                        }
                    };
                    report.push(DispatchDetail {
                        user_id: user.id.clone(),
                        scheduled_time: Some(key),
                        template: Some(kind.name().to_string()),
                        status: DispatchStatus::InvalidToken,
                        reason,
                    });
                    return;
                }
                Ok(SlotOutcome::Rejected(message)) => {
                    warn!("Push for {} at {} rejected: {}", user.id, key, message);
                    self.metrics.record_notification_failed();
                    (DispatchStatus::Rejected, Some(message))
                }
                Err(e) => {
                    error!("Reminder {} for {} failed: {}", key, user.id, e);
                    self.metrics.record_notification_failed();
                    (DispatchStatus::Failed, Some(e.to_string()))
                }
            };

            report.push(DispatchDetail {
                user_id: user.id.clone(),
                scheduled_time: Some(key),
                template: Some(kind.name().to_string()),
                status,
                reason,
            });
        }
    }

    /// Resolve the message, push it and persist the sent record
    #[allow(clippy::too_many_arguments)]
    async fn send_slot(
        &self,
        user: &UserProfile,
        token: &str,
        slot: &ScheduledReminderSlot,
        key: &str,
        kind: TemplateKind,
        ctx: &ReminderContext,
        now: DateTime<Utc>,
    ) -> DispatchResult<SlotOutcome> {
        let (title, body) = match self.store.template(kind.name()).await {
            Ok(Some(template)) if template.is_active => {
                (render(&template.title, ctx), render(&template.body, ctx))
            }
            Ok(_) => {
                debug!("No active template {}, using fallback copy", kind.name());
                (kind.fallback_title().to_string(), fallback_message(kind, ctx, slot))
            }
            Err(e) => {
                warn!("Template lookup for {} failed, using fallback copy: {}", kind.name(), e);
                (kind.fallback_title().to_string(), fallback_message(kind, ctx, slot))
            }
        };

        let message = PushMessage::new(
            token,
            title,
            body,
            json!({
                "type": "hydration_reminder",
                "scheduledTime": key,
                "template": kind.name(),
            }),
        );

        let ticket_id = match self.push.send(&message).await? {
            PushOutcome::Delivered { ticket_id } => ticket_id,
            PushOutcome::InvalidToken => return Ok(SlotOutcome::InvalidToken),
            PushOutcome::Rejected(reason) => return Ok(SlotOutcome::Rejected(reason)),
        };

        self.store
            .record_notification(SentNotificationRecord {
                user_id: user.id.clone(),
                scheduled_time_key: key.to_string(),
                sent_at: now,
                metadata: json!({
                    "scheduled_time_key": key,
                    "template": kind.name(),
                    "ticket_id": ticket_id,
                    "title": message.title,
                    "body": message.body,
                }),
            })
            .await?;

        info!("Sent {} reminder to {} for {}", kind.name(), user.id, key);
        Ok(SlotOutcome::Sent)
    }
}
