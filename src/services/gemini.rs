use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde_json::{json, Map, Value};
use tokio::time::sleep;
use tracing::{debug, instrument, warn};

use crate::config::AppConfig;
use crate::error::ServiceError;
use crate::models::generation::{
    FailureKind, GeneratedImage, GenerationFailure, GenerationRequest, GenerationResult,
};
use crate::models::verification::Rubric;
use crate::services::generator::{build_prompt, ImageGenerator};
use crate::services::verifier::{rubric_prompt, ImageVerifier};

/// Categories relaxed when safety relaxation is on. Stylized fight scenes and
/// fan service trip these filters on otherwise harmless pages.
const RELAXED_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

/// `finishReason` values that mean the output was withheld by a filter.
const BLOCKING_FINISH_REASONS: [&str; 6] = [
    "SAFETY",
    "IMAGE_SAFETY",
    "PROHIBITED_CONTENT",
    "BLOCKLIST",
    "SPII",
    "RECITATION",
];

/// Client for the Gemini `generateContent` API, serving as both the image
/// generator and the verifier.
pub struct GeminiClient {
    http: Client,
    api_base_url: String,
    api_key: String,
    generator_model: String,
    verifier_model: String,
    safety_relaxation: bool,
    transport_retries: u32,
    transport_backoff: Duration,
}

impl GeminiClient {
    pub fn new(config: &AppConfig) -> Result<Self, ServiceError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            http,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            api_key: config.gemini_api_key.clone(),
            generator_model: config.generator_model.clone(),
            verifier_model: config.verifier_model.clone(),
            safety_relaxation: config.safety_relaxation,
            transport_retries: config.transport_retries,
            transport_backoff: Duration::from_millis(config.transport_backoff_ms),
        })
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.api_base_url, model)
    }

    /// POST a payload, retrying rate limits, 5xx and connection failures with
    /// a linear backoff.
    async fn post_with_retries(&self, url: &str, payload: &Value) -> Result<Value, ServiceError> {
        let mut attempt = 0;
        loop {
            let last_try = attempt >= self.transport_retries;
            let delay = self.transport_backoff * (attempt + 1);

            let response = self
                .http
                .post(url)
                .header("x-goog-api-key", &self.api_key)
                .json(payload)
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().is_success() => {
                    let text = resp.text().await?;
                    return Ok(serde_json::from_str(&text)?);
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    if last_try || !is_retryable_status(status) {
                        return Err(ServiceError::Status {
                            status: status.as_u16(),
                            body,
                        });
                    }
                    warn!(
                        status = status.as_u16(),
                        attempt = attempt + 1,
                        "Gemini returned a transient error, backing off"
                    );
                }
                Err(e) => {
                    if last_try || !(e.is_timeout() || e.is_connect()) {
                        return Err(ServiceError::Http(e));
                    }
                    warn!(error = %e, attempt = attempt + 1, "Gemini transport error, backing off");
                }
            }

            sleep(delay).await;
            attempt += 1;
        }
    }
}

#[async_trait]
impl ImageGenerator for GeminiClient {
    #[instrument(skip(self, request), fields(model = %self.generator_model, temperature = request.temperature))]
    async fn generate(
        &self,
        request: &GenerationRequest<'_>,
    ) -> Result<GenerationResult, ServiceError> {
        let payload =
            build_generation_payload(request, &self.generator_model, self.safety_relaxation);
        let url = self.endpoint(&self.generator_model);

        classify_generation(self.post_with_retries(&url, &payload).await)
    }
}

/// Map a finished generation call onto the generator contract.
///
/// HTTP status and body errors become typed failures; only connection-level
/// errors stay `Err`.
pub fn classify_generation(
    response: Result<Value, ServiceError>,
) -> Result<GenerationResult, ServiceError> {
    match response {
        Ok(response) => Ok(extract_generation(&response)),
        Err(e) if e.is_rate_limit() => Ok(GenerationResult::Failure(GenerationFailure::new(
            FailureKind::RateLimited,
            "rate limit still exceeded after retrying",
        ))),
        Err(ServiceError::Status { status, body }) => {
            Ok(GenerationResult::Failure(GenerationFailure::new(
                FailureKind::Upstream,
                format!("HTTP {}: {}", status, body.chars().take(200).collect::<String>()),
            )))
        }
        Err(ServiceError::Json(e)) => Ok(GenerationResult::Failure(GenerationFailure::new(
            FailureKind::EmptyResult,
            format!("unreadable response body: {e}"),
        ))),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl ImageVerifier for GeminiClient {
    #[instrument(skip(self, original, candidate), fields(model = %self.verifier_model, rubric = %rubric))]
    async fn verify(
        &self,
        original: &[u8],
        candidate: &[u8],
        rubric: Rubric,
    ) -> Result<String, ServiceError> {
        let Some(prompt) = rubric_prompt(rubric) else {
            return Ok(r#"{"status":"PASS"}"#.to_string());
        };

        let mut payload = json!({
            "contents": [{
                "role": "user",
                "parts": [
                    {"text": prompt},
                    {"text": "Original page:"},
                    inline_image_part(original),
                    {"text": "Translated page:"},
                    inline_image_part(candidate),
                ]
            }],
            "generationConfig": {
                "temperature": 0.0,
                "response_mime_type": "application/json",
            }
        });
        if self.safety_relaxation {
            payload["safetySettings"] = Value::Array(relaxed_safety_settings());
        }

        let url = self.endpoint(&self.verifier_model);
        let response = self.post_with_retries(&url, &payload).await?;
        let text = extract_text(&response);
        debug!(response_len = text.len(), "Verifier responded");
        Ok(text)
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Only Gemini 3 image models honor `imageConfig.imageSize`.
pub fn supports_image_size(model: &str) -> bool {
    model.contains("gemini-3")
}

fn inline_image_part(bytes: &[u8]) -> Value {
    let mime_type = image::guess_format(bytes)
        .map(|format| format.to_mime_type())
        .unwrap_or("image/png");
    json!({
        "inline_data": {
            "mime_type": mime_type,
            "data": base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    })
}

fn relaxed_safety_settings() -> Vec<Value> {
    RELAXED_CATEGORIES
        .iter()
        .map(|category| json!({"category": category, "threshold": "BLOCK_NONE"}))
        .collect()
}

/// Request body for one generation attempt.
pub fn build_generation_payload(
    request: &GenerationRequest<'_>,
    model: &str,
    safety_relaxation: bool,
) -> Value {
    let prompt = build_prompt(request.instruction, request.prior_failure);

    let mut generation_config = Map::new();
    generation_config.insert("temperature".to_string(), json!(request.temperature));
    generation_config.insert("responseModalities".to_string(), json!(["IMAGE"]));
    if supports_image_size(model) {
        generation_config.insert(
            "imageConfig".to_string(),
            json!({"imageSize": request.resolution.to_string()}),
        );
    }

    let mut payload = json!({
        "contents": [{
            "role": "user",
            "parts": [
                {"text": prompt},
                inline_image_part(request.source_image),
            ]
        }],
        "generationConfig": Value::Object(generation_config),
    });
    if safety_relaxation {
        payload["safetySettings"] = Value::Array(relaxed_safety_settings());
    }
    payload
}

/// Collapse every shape a `generateContent` response can take into one
/// `GenerationResult`.
///
/// Checks, in order: a prompt-level block, any inline image part (camelCase or
/// snake_case keys), a blocking finish reason, and finally an empty result
/// carrying whatever text the model returned instead.
pub fn extract_generation(response: &Value) -> GenerationResult {
    if let Some(block) = response
        .pointer("/promptFeedback/blockReason")
        .and_then(Value::as_str)
    {
        return GenerationResult::Failure(GenerationFailure::new(
            FailureKind::ContentBlocked,
            format!("blocked by content filter ({block})"),
        ));
    }

    let candidates = response
        .get("candidates")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    for candidate in candidates {
        let parts = candidate
            .pointer("/content/parts")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        for part in parts {
            let Some(inline) = part.get("inlineData").or_else(|| part.get("inline_data")) else {
                continue;
            };
            let data = inline.get("data").and_then(Value::as_str).unwrap_or_default();
            if data.is_empty() {
                continue;
            }
            let mime_type = inline
                .get("mimeType")
                .or_else(|| inline.get("mime_type"))
                .and_then(Value::as_str)
                .map(str::to_string);
            return decode_image(data, mime_type);
        }
    }

    if let Some(reason) = candidates
        .iter()
        .filter_map(|c| c.get("finishReason").and_then(Value::as_str))
        .find(|reason| BLOCKING_FINISH_REASONS.contains(reason))
    {
        return GenerationResult::Failure(GenerationFailure::new(
            FailureKind::ContentBlocked,
            format!("blocked by content filter ({reason})"),
        ));
    }

    let text = extract_text(response);
    let reason = if text.trim().is_empty() {
        "no image in response".to_string()
    } else {
        format!(
            "no image in response; model said: {}",
            text.trim().chars().take(200).collect::<String>()
        )
    };
    GenerationResult::Failure(GenerationFailure::new(FailureKind::EmptyResult, reason))
}

fn decode_image(data: &str, mime_type: Option<String>) -> GenerationResult {
    let bytes = match base64::engine::general_purpose::STANDARD.decode(data.as_bytes()) {
        Ok(bytes) => bytes,
        Err(e) => {
            return GenerationResult::Failure(GenerationFailure::new(
                FailureKind::EmptyResult,
                format!("image payload is not valid base64: {e}"),
            ))
        }
    };

    match probe_dimensions(&bytes) {
        Ok((width, height)) => GenerationResult::Image(GeneratedImage {
            bytes,
            mime_type,
            width,
            height,
        }),
        Err(e) => GenerationResult::Failure(GenerationFailure::new(
            FailureKind::EmptyResult,
            format!("image payload does not decode: {e}"),
        )),
    }
}

/// Read the image header. Enough to reject truncated or non-image payloads.
fn probe_dimensions(bytes: &[u8]) -> Result<(u32, u32), String> {
    image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| e.to_string())?
        .into_dimensions()
        .map_err(|e| e.to_string())
}

/// Concatenated text parts of the first candidate.
fn extract_text(response: &Value) -> String {
    response
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}
