//! Scripted stand-ins for the Gemini generator and verifier

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use manga_ko_pipeline::error::ServiceError;
use manga_ko_pipeline::models::generation::{
    FailureKind, GeneratedImage, GenerationFailure, GenerationRequest, GenerationResult,
};
use manga_ko_pipeline::models::verification::Rubric;
use manga_ko_pipeline::services::generator::{build_prompt, ImageGenerator};
use manga_ko_pipeline::services::verifier::ImageVerifier;

use crate::fixtures::page_png;

/// What the generator saw on one call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub prompt: String,
    pub temperature: f32,
    pub prior_failure: Option<String>,
}

/// Generator that replays a script, then keeps returning a valid image.
#[derive(Default)]
pub struct ScriptedGenerator {
    script: Mutex<VecDeque<Result<GenerationResult, ServiceError>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then_image(self) -> Self {
        self.push(Ok(image_result()))
    }

    pub fn then_failure(self, kind: FailureKind, reason: &str) -> Self {
        self.push(Ok(GenerationResult::Failure(GenerationFailure::new(
            kind, reason,
        ))))
    }

    /// Connection-level failure, the only error kind the Gemini client lets
    /// through; status errors come back as typed failures instead.
    pub fn then_transport_error(self) -> Self {
        self.push(Err(transport_error()))
    }

    fn push(self, step: Result<GenerationResult, ServiceError>) -> Self {
        self.script.lock().unwrap().push_back(step);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

/// A real `reqwest::Error`, produced without touching the network.
pub fn transport_error() -> ServiceError {
    let err = reqwest::Client::new()
        .get("not a url")
        .build()
        .expect_err("invalid url must not build");
    ServiceError::Http(err)
}

pub fn image_result() -> GenerationResult {
    GenerationResult::Image(GeneratedImage {
        bytes: page_png(200),
        mime_type: Some("image/png".to_string()),
        width: 8,
        height: 12,
    })
}

#[async_trait]
impl ImageGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        request: &GenerationRequest<'_>,
    ) -> Result<GenerationResult, ServiceError> {
        self.calls.lock().unwrap().push(RecordedCall {
            prompt: build_prompt(request.instruction, request.prior_failure),
            temperature: request.temperature,
            prior_failure: request.prior_failure.map(str::to_string),
        });
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(image_result()))
    }
}

/// Verifier that replays raw responses, then keeps passing.
#[derive(Default)]
pub struct ScriptedVerifier {
    script: Mutex<VecDeque<Result<String, ServiceError>>>,
    calls: Mutex<Vec<Rubric>>,
}

impl ScriptedVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then_raw(self, raw: &str) -> Self {
        self.script.lock().unwrap().push_back(Ok(raw.to_string()));
        self
    }

    pub fn then_fail(self, reason: &str) -> Self {
        let raw = serde_json::json!({"status": "FAIL", "reason": reason}).to_string();
        self.then_raw(&raw)
    }

    pub fn then_pass(self) -> Self {
        self.then_raw(r#"{"status":"PASS"}"#)
    }

    pub fn then_error(self) -> Self {
        self.script.lock().unwrap().push_back(Err(ServiceError::Status {
            status: 500,
            body: "internal".to_string(),
        }));
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn rubrics(&self) -> Vec<Rubric> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageVerifier for ScriptedVerifier {
    async fn verify(
        &self,
        _original: &[u8],
        _candidate: &[u8],
        rubric: Rubric,
    ) -> Result<String, ServiceError> {
        self.calls.lock().unwrap().push(rubric);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(r#"{"status":"PASS"}"#.to_string()))
    }
}
