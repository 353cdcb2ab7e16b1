// Chat-completions client that turns vision features into a drink estimate
//
// The model is asked for a single JSON object. Anything that can't be read
// as one degrades to the fixed Water / 8 oz / 0.5 result instead of failing.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::Write as _;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

use crate::core::config::LlmConfig;
use crate::core::errors::{UpstreamError, UpstreamResult};
use crate::core::types::{AnalysisResult, DEFAULT_CONFIDENCE, DEFAULT_VOLUME_OZ, UNKNOWN_DRINK};
use crate::services::vision::VisualFeatures;
use crate::utils::Metrics;

const SERVICE: &str = "interpretation";

/// Number of dominant colours quoted in the prompt
const PROMPT_COLORS: usize = 3;

/// Common containers and their standard volumes in ounces. Given to the
/// model as a prior; the model does the matching.
const CONTAINER_VOLUMES: &[(&str, f64)] = &[
    ("Stanley Quencher", 40.0),
    ("Stanley Quencher (small)", 30.0),
    ("Hydro Flask Standard Mouth", 21.0),
    ("Hydro Flask Wide Mouth", 32.0),
    ("Yeti Rambler Bottle", 26.0),
    ("Owala FreeSip", 24.0),
    ("Nalgene Wide Mouth", 32.0),
    ("S'well Bottle", 17.0),
    ("CamelBak Chute", 25.0),
    ("Starbucks Tall", 12.0),
    ("Starbucks Grande", 16.0),
    ("Starbucks Venti Hot", 20.0),
    ("Starbucks Venti Iced", 24.0),
    ("Soda can", 12.0),
    ("Red Bull can", 8.4),
    ("Monster can", 16.0),
    ("Gatorade bottle", 20.0),
    ("Disposable water bottle", 16.9),
    ("Smartwater bottle", 20.0),
    ("Standard coffee mug", 10.0),
    ("Pint glass", 16.0),
    ("Wine glass pour", 5.0),
];

const SYSTEM_PROMPT: &str = "You identify drinks from image analysis data and estimate their volume. \
     Respond with a single JSON object and nothing else.";

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: u64,
}

#[async_trait]
pub trait InterpretationService: Send + Sync {
    async fn interpret(&self, features: &VisualFeatures) -> UpstreamResult<AnalysisResult>;
}

pub struct OpenAiInterpreter {
    api_key: String,
    endpoint: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    http_client: reqwest::Client,
    metrics: Option<Metrics>,
}

impl OpenAiInterpreter {
    pub fn new(config: &LlmConfig, timeout: Duration, metrics: Option<Metrics>) -> Result<Self> {
        if config.api_key.is_empty() {
            warn!("OPENAI_API_KEY is not set; drink scans will fail");
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
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            http_client,
            metrics,
        })
    }

    async fn complete(&self, prompt: String) -> UpstreamResult<(String, u64)> {
        let request = ChatCompletionRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let response = self
            .http_client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
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

        let completion: ChatCompletionResponse =
            response.json().await.map_err(|source| UpstreamError::Request {
                service: SERVICE,
                source,
            })?;

        let tokens = completion.usage.map(|u| u.total_tokens).unwrap_or(0);
        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| UpstreamError::InvalidResponse {
                service: SERVICE,
                reason: "completion has no message content".to_string(),
            })?;

        Ok((content, tokens))
    }
}

#[async_trait]
impl InterpretationService for OpenAiInterpreter {
    #[instrument(skip(self, features), fields(model = %self.model))]
    async fn interpret(&self, features: &VisualFeatures) -> UpstreamResult<AnalysisResult> {
        let start = Instant::now();
        let completion = self.complete(build_prompt(features)).await;

        if let Some(ref m) = self.metrics {
            let tokens = completion.as_ref().map(|(_, t)| *t).unwrap_or(0);
            m.record_upstream_call(completion.is_ok(), start.elapsed(), tokens);
        }

        let (text, _) = completion?;
        match try_parse_interpretation(&text) {
            Some(result) => {
                debug!("Interpreted drink: {}", result.drink_name);
                Ok(result)
            }
            None => {
                warn!("Interpretation text had no usable JSON, using fallback result");
                if let Some(ref m) = self.metrics {
                    m.record_interpretation_fallback();
                }
                Ok(AnalysisResult::fallback())
            }
        }
    }
}

/// Assemble the user prompt from the extracted features
///
/// # Arguments
/// * `features` - Output of the vision step
pub fn build_prompt(features: &VisualFeatures) -> String {
    let join = |items: &[crate::services::vision::Annotation]| -> String {
        if items.is_empty() {
            return "none".to_string();
        }
        items
            .iter()
            .map(|a| format!("{} ({:.2})", a.description, a.score))
            .collect::<Vec<_>>()
            .join(", ")
    };

    let mut prompt = String::from("Identify the drink in this photo from the image analysis below.\n\n");

    let _ = writeln!(prompt, "Labels: {}", join(&features.labels));
    let _ = writeln!(prompt, "Objects: {}", join(&features.objects));
    let _ = writeln!(
        prompt,
        "Detected text: {}",
        if features.texts.is_empty() {
            "none".to_string()
        } else {
            features.texts.join(" | ")
        }
    );
    let _ = writeln!(prompt, "Web entities: {}", join(&features.web_entities));

    let colors: Vec<String> = features
        .colors
        .iter()
        .take(PROMPT_COLORS)
        .map(|c| format!("rgb({},{},{}) {:.2}", c.red, c.green, c.blue, c.score))
        .collect();
    let _ = writeln!(
        prompt,
        "Dominant colors: {}",
        if colors.is_empty() {
            "none".to_string()
        } else {
            colors.join(", ")
        }
    );

    prompt.push_str("\nReference container volumes (oz):\n");
    for (container, oz) in CONTAINER_VOLUMES {
        let _ = writeln!(prompt, "- {container}: {oz}");
    }

    prompt.push_str(
        "\nIf a brand or container above matches, prefer its standard volume. \
         Otherwise estimate from the container type.\n\
         Respond with JSON only:\n\
         {\"drinkName\": string, \"estimatedOz\": number, \"confidence\": number between 0 and 1, \"description\": string}",
    );

    prompt
}

/// Byte range of the first balanced `{...}` in `text`, ignoring braces
/// inside string literals
fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// First string value found under any of `keys`
fn str_field<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| object.get(*key)?.as_str())
}

/// First numeric value under any of `keys`. Models sometimes quote
/// numbers, so `"12"` reads the same as `12`.
fn number_field(object: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| match object.get(*key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    })
}

/// Every field is read on its own, so one mistyped value only loses that
/// value. `None` means there was no JSON object to read at all.
fn try_parse_interpretation(text: &str) -> Option<AnalysisResult> {
    let value: Value = serde_json::from_str(first_json_object(text)?).ok()?;
    let object = value.as_object()?;

    Some(AnalysisResult {
        drink_name: str_field(object, &["drinkName", "name"])
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(UNKNOWN_DRINK)
            .to_string(),
        estimated_volume_oz: number_field(object, &["estimatedOz", "estimatedVolumeOz", "volumeOz"])
            .unwrap_or(DEFAULT_VOLUME_OZ),
        confidence: number_field(object, &["confidence"]).unwrap_or(DEFAULT_CONFIDENCE),
        description: str_field(object, &["description"]).unwrap_or_default().to_string(),
    })
}

/// Read the model's reply. Missing or unparseable JSON yields the
/// fixed fallback result.
pub fn parse_interpretation(text: &str) -> AnalysisResult {
    try_parse_interpretation(text).unwrap_or_else(AnalysisResult::fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::vision::{Annotation, DominantColor};

    #[test]
    fn test_parse_plain_object() {
        let result = parse_interpretation(
            r#"{"drinkName": "Iced Latte", "estimatedOz": 16, "confidence": 0.82, "description": "Grande cup"}"#,
        );
        assert_eq!(result.drink_name, "Iced Latte");
        assert_eq!(result.estimated_volume_oz, 16.0);
        assert_eq!(result.confidence, 0.82);
    }

    #[test]
    fn test_parse_object_wrapped_in_prose() {
        let text = "Sure! Here it is:\n```json\n{\"drinkName\": \"Cola {zero}\", \"estimatedOz\": 12}\n```\nAnything else?";
        let result = parse_interpretation(text);
        assert_eq!(result.drink_name, "Cola {zero}");
        assert_eq!(result.estimated_volume_oz, 12.0);
        assert_eq!(result.confidence, DEFAULT_CONFIDENCE);
    }

    #[test]
    fn test_parse_garbage_falls_back_to_water() {
        for text in ["I can't tell what this is.", "{not json", ""] {
            assert_eq!(parse_interpretation(text), AnalysisResult::fallback());
        }
    }

    #[test]
    fn test_parse_string_typed_fields() {
        let result = parse_interpretation(r#"{"drinkName":"Cola","estimatedOz":"12","confidence":" 0.9 "}"#);
        assert_eq!(result.drink_name, "Cola");
        assert_eq!(result.estimated_volume_oz, 12.0);
        assert_eq!(result.confidence, 0.9);
    }

    #[test]
    fn test_wrong_typed_field_only_loses_that_field() {
        let result = parse_interpretation(r#"{"drinkName": 5, "estimatedOz": "a can", "confidence": 0.7, "description": "Tall glass"}"#);
        assert_eq!(result.drink_name, UNKNOWN_DRINK);
        assert_eq!(result.estimated_volume_oz, DEFAULT_VOLUME_OZ);
        assert_eq!(result.confidence, 0.7);
        assert_eq!(result.description, "Tall glass");
    }

    #[test]
    fn test_missing_fields_default() {
        let result = parse_interpretation("{}");
        assert_eq!(result.drink_name, UNKNOWN_DRINK);
        assert_eq!(result.estimated_volume_oz, DEFAULT_VOLUME_OZ);
        assert_eq!(result.confidence, DEFAULT_CONFIDENCE);
    }

    #[test]
    fn test_prompt_quotes_top_three_colors() {
        let color = |v: u8, score: f64| DominantColor {
            red: v,
            green: v,
            blue: v,
            score,
        };
        let features = VisualFeatures {
            labels: vec![Annotation {
                description: "Tumbler".to_string(),
                score: 0.9,
            }],
            texts: vec!["STANLEY".to_string()],
            colors: vec![color(10, 0.5), color(20, 0.2), color(30, 0.1), color(40, 0.05)],
            ..Default::default()
        };

        let prompt = build_prompt(&features);
        assert!(prompt.contains("Tumbler (0.90)"));
        assert!(prompt.contains("STANLEY"));
        assert!(prompt.contains("rgb(30,30,30) 0.10"));
        assert!(!prompt.contains("rgb(40,40,40)"));
        assert!(prompt.contains("Stanley Quencher: 40"));
        assert!(prompt.contains("Objects: none"));
    }
}
