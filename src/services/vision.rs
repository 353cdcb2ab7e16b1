// Google Cloud Vision client for drink photo feature extraction
//
// One images:annotate call per scan requesting labels, objects, text,
// dominant colours and web entities. No retry: a failure aborts the scan.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

use crate::core::config::VisionConfig;
use crate::core::errors::{UpstreamError, UpstreamResult};
use crate::utils::fingerprint::strip_data_url;
use crate::utils::Metrics;

const SERVICE: &str = "vision";

const MAX_LABELS: usize = 15;
const MAX_OBJECTS: usize = 10;
const MAX_TEXTS: usize = 10;
const MAX_WEB_ENTITIES: usize = 5;

/// A detected label, object or web entity with its score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub description: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DominantColor {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub score: f64,
}

/// Everything the interpretation prompt needs from the photo
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisualFeatures {
    pub labels: Vec<Annotation>,
    pub objects: Vec<Annotation>,
    pub texts: Vec<String>,
    pub web_entities: Vec<Annotation>,
    pub colors: Vec<DominantColor>,
}

#[async_trait]
pub trait VisionService: Send + Sync {
    async fn extract_features(&self, image_base64: &str) -> UpstreamResult<VisualFeatures>;
}

pub struct GoogleVisionClient {
    api_key: String,
    endpoint: String,
    http_client: reqwest::Client,
    metrics: Option<Metrics>,
}

impl GoogleVisionClient {
    pub fn new(config: &VisionConfig, timeout: Duration, metrics: Option<Metrics>) -> Result<Self> {
        if config.api_key.is_empty() {
            warn!("GOOGLE_VISION_API_KEY is not set; drink scans will fail");
        }

        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_key: config.api_key.clone(),
            endpoint: config.endpoint.clone(),
            http_client,
            metrics,
        })
    }

    fn build_request(image_base64: &str) -> serde_json::Value {
        json!({
            "requests": [{
                "image": { "content": strip_data_url(image_base64) },
                "features": [
                    { "type": "LABEL_DETECTION", "maxResults": MAX_LABELS },
                    { "type": "OBJECT_LOCALIZATION", "maxResults": MAX_OBJECTS },
                    { "type": "TEXT_DETECTION", "maxResults": MAX_TEXTS },
                    { "type": "IMAGE_PROPERTIES" },
                    { "type": "WEB_DETECTION", "maxResults": MAX_WEB_ENTITIES }
                ]
            }]
        })
    }
}

#[async_trait]
impl VisionService for GoogleVisionClient {
    #[instrument(skip(self, image_base64), fields(payload_len = image_base64.len()))]
    async fn extract_features(&self, image_base64: &str) -> UpstreamResult<VisualFeatures> {
        let start = Instant::now();

        let result = async {
            let response = self
                .http_client
                .post(&self.endpoint)
                .query(&[("key", &self.api_key)])
                .json(&Self::build_request(image_base64))
                .send()
                .await
                .map_err(|source| UpstreamError::Request {
                    service: SERVICE,
                    source,
                })?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(UpstreamError::Status {
                    service: SERVICE,
                    status: status.as_u16(),
                    body,
                });
            }

            let body: serde_json::Value =
                response.json().await.map_err(|source| UpstreamError::Request {
                    service: SERVICE,
                    source,
                })?;
            parse_annotations(&body)
        }
        .await;

        if let Some(ref m) = self.metrics {
            m.record_upstream_call(result.is_ok(), start.elapsed(), 0);
        }

        if let Ok(ref features) = result {
            debug!(
                "Vision: {} labels, {} objects, {} texts, {} web entities, {} colours",
                features.labels.len(),
                features.objects.len(),
                features.texts.len(),
                features.web_entities.len(),
                features.colors.len()
            );
        }
        result
    }
}

/// Pull the first response out of an images:annotate body
pub fn parse_annotations(body: &serde_json::Value) -> UpstreamResult<VisualFeatures> {
    let response = body["responses"]
        .get(0)
        .ok_or_else(|| UpstreamError::InvalidResponse {
            service: SERVICE,
            reason: "missing responses[0]".to_string(),
        })?;

    if let Some(message) = response["error"]["message"].as_str() {
        return Err(UpstreamError::InvalidResponse {
            service: SERVICE,
            reason: message.to_string(),
        });
    }

    let annotations = |key: &str, name_field: &str, limit: usize| -> Vec<Annotation> {
        response[key]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        let description = item[name_field].as_str()?.trim();
                        if description.is_empty() {
                            return None;
                        }
                        Some(Annotation {
                            description: description.to_string(),
                            score: item["score"].as_f64().unwrap_or(0.0),
                        })
                    })
                    .take(limit)
                    .collect()
            })
            .unwrap_or_default()
    };

    let labels = annotations("labelAnnotations", "description", MAX_LABELS);
    let objects = annotations("localizedObjectAnnotations", "name", MAX_OBJECTS);

    let texts = response["textAnnotations"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item["description"].as_str())
                .map(|s| s.trim().replace('\n', " "))
                .filter(|s| !s.is_empty())
                .take(MAX_TEXTS)
                .collect()
        })
        .unwrap_or_default();

    let web_entities = response["webDetection"]["webEntities"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    Some(Annotation {
                        description: item["description"].as_str()?.to_string(),
                        score: item["score"].as_f64().unwrap_or(0.0),
                    })
                })
                .take(MAX_WEB_ENTITIES)
                .collect()
        })
        .unwrap_or_default();

    let colors = response["imagePropertiesAnnotation"]["dominantColors"]["colors"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .map(|item| {
                    let channel = |name: &str| item["color"][name].as_f64().unwrap_or(0.0).clamp(0.0, 255.0) as u8;
                    DominantColor {
                        red: channel("red"),
                        green: channel("green"),
                        blue: channel("blue"),
                        score: item["score"].as_f64().unwrap_or(0.0),
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(VisualFeatures {
        labels,
        objects,
        texts,
        web_entities,
        colors,
    })
}
