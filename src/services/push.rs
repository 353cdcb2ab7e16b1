// Expo push delivery

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

use crate::core::config::PushConfig;
use crate::core::errors::{UpstreamError, UpstreamResult};
use crate::utils::Metrics;

const SERVICE: &str = "push";

#[derive(Debug, Clone, Serialize)]
pub struct PushMessage {
    pub to: String,
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
    pub sound: &'static str,
}

impl PushMessage {
    pub fn new(to: impl Into<String>, title: impl Into<String>, body: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            to: to.into(),
            title: title.into(),
            body: body.into(),
            data,
            sound: "default",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Delivered { ticket_id: Option<String> },
    /// The device token is no longer registered and should be dropped
    InvalidToken,
    Rejected(String),
}

#[async_trait]
pub trait PushService: Send + Sync {
    async fn send(&self, message: &PushMessage) -> UpstreamResult<PushOutcome>;
}

#[derive(Debug, Deserialize)]
struct PushResponse {
    data: TicketPayload,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TicketPayload {
    Many(Vec<PushTicket>),
    One(PushTicket),
}

#[derive(Debug, Deserialize)]
struct PushTicket {
    status: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Option<TicketDetails>,
}

#[derive(Debug, Deserialize)]
struct TicketDetails {
    #[serde(default)]
    error: Option<String>,
}

impl PushTicket {
    fn into_outcome(self) -> PushOutcome {
        if self.status == "ok" {
            return PushOutcome::Delivered { ticket_id: self.id };
        }
        match self.details.and_then(|d| d.error).as_deref() {
            Some("DeviceNotRegistered") => PushOutcome::InvalidToken,
            Some(code) => PushOutcome::Rejected(format!(
                "{}: {}",
                code,
                self.message.unwrap_or_default()
            )),
            None => PushOutcome::Rejected(self.message.unwrap_or_else(|| self.status.clone())),
        }
    }
}

/// Parse an Expo send response into the outcome for the single message sent
fn parse_ticket(body: &str) -> UpstreamResult<PushOutcome> {
    let response: PushResponse =
        serde_json::from_str(body).map_err(|e| UpstreamError::InvalidResponse {
            service: SERVICE,
            reason: e.to_string(),
        })?;

    let ticket = match response.data {
        TicketPayload::One(ticket) => Some(ticket),
        TicketPayload::Many(tickets) => tickets.into_iter().next(),
    };

    ticket
        .map(PushTicket::into_outcome)
        .ok_or_else(|| UpstreamError::InvalidResponse {
            service: SERVICE,
            reason: "response carried no ticket".to_string(),
        })
}

pub struct ExpoPushClient {
    endpoint: String,
    access_token: Option<String>,
    http_client: reqwest::Client,
    metrics: Option<Metrics>,
}

impl ExpoPushClient {
    pub fn new(config: &PushConfig, timeout: Duration, metrics: Option<Metrics>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            endpoint: config.endpoint.clone(),
            access_token: config.access_token.clone(),
            http_client,
            metrics,
        })
    }
}

#[async_trait]
impl PushService for ExpoPushClient {
    #[instrument(skip(self, message), fields(title = %message.title))]
    async fn send(&self, message: &PushMessage) -> UpstreamResult<PushOutcome> {
        let start = Instant::now();

        let result = async {
            let mut request = self
                .http_client
                .post(&self.endpoint)
                .header("Accept", "application/json")
                .json(message);
            if let Some(ref token) = self.access_token {
                request = request.bearer_auth(token);
            }

            let response = request.send().await.map_err(|source| UpstreamError::Request {
                service: SERVICE,
                source,
            })?;

            let status = response.status();
            let body = response.text().await.map_err(|source| UpstreamError::Request {
                service: SERVICE,
                source,
            })?;
            if !status.is_success() {
                return Err(UpstreamError::Status {
                    service: SERVICE,
                    status: status.as_u16(),
                    body,
                });
            }
            parse_ticket(&body)
        }
        .await;

        if let Some(ref m) = self.metrics {
            m.record_upstream_call(result.is_ok(), start.elapsed(), 0);
        }
        debug!("Push result: {:?}", result);
        result
    }
}
