use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Output resolution hint understood by Gemini image models.
///
/// Honored on a best-effort basis; models without image-size support ignore it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
#[strum(ascii_case_insensitive)]
pub enum ResolutionTag {
    #[strum(serialize = "1K")]
    #[serde(rename = "1K")]
    OneK,
    #[strum(serialize = "2K")]
    #[serde(rename = "2K")]
    TwoK,
    #[strum(serialize = "4K")]
    #[serde(rename = "4K")]
    FourK,
}

/// Everything a single generation attempt needs. Built anew for every attempt.
#[derive(Debug, Clone)]
pub struct GenerationRequest<'a> {
    pub source_image: &'a [u8],
    pub instruction: &'a str,
    pub temperature: f32,
    pub resolution: ResolutionTag,
    pub prior_failure: Option<&'a str>,
}

/// A decodable image returned by the generator.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
    pub width: u32,
    pub height: u32,
}

/// Why a generation attempt produced no usable image.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Display, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureKind {
    /// Prompt or output blocked by the upstream content filter.
    ContentBlocked,
    /// Response carried no image payload, or the payload did not decode.
    EmptyResult,
    /// Rate limit still in effect after the transport-level retry.
    RateLimited,
    /// Non-success HTTP status from the upstream service.
    Upstream,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationFailure {
    pub kind: FailureKind,
    pub reason: String,
}

impl GenerationFailure {
    pub fn new(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for GenerationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.reason)
    }
}

/// Result of one generation call. Failures are terminal for the work item.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationResult {
    Image(GeneratedImage),
    Failure(GenerationFailure),
}
