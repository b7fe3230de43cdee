use async_trait::async_trait;
use tracing::warn;

use crate::error::ServiceError;
use crate::models::verification::{Rubric, VerdictPayload, VerificationVerdict};

const RESPONSE_FORMAT: &str = "\
Respond with JSON only: {\"status\": \"PASS\"} or {\"status\": \"FAIL\", \"reason\": \"<one short sentence>\"}.";

const LENIENT_CHECKLIST: &str = "\
You are checking a manga page that was translated into Korean.
The first image is the original page, the second is the translated page.
FAIL only if one of these is clearly true:
- Japanese or English dialogue remains untranslated in a speech bubble.
- Korean text is typeset vertically.
- The artwork is visibly damaged or new elements were added.
Otherwise PASS.";

const STRICT_CHECKLIST: &str = "\
You are a strict quality inspector for manga pages translated into Korean.
The first image is the original page, the second is the translated page.
FAIL if any of these is true:
- Any original text remains, including sound effects and signs.
- Any Korean text is typeset vertically or overflows its bubble.
- The Korean is unnatural or does not match the speaker's tone.
- Screentone or line art behind the text was not restored.
- The artwork was altered, cropped, or new elements were added.
Otherwise PASS.";

/// Fallback reason when the verifier rejects without explaining why.
const UNSPECIFIED_REASON: &str = "the verifier rejected the page without giving a reason";

/// Prompt text for a rubric. `None` for `Rubric::Off`.
pub fn rubric_prompt(rubric: Rubric) -> Option<String> {
    let checklist = match rubric {
        Rubric::Off => return None,
        Rubric::Lenient => LENIENT_CHECKLIST,
        Rubric::Strict => STRICT_CHECKLIST,
    };
    Some(format!("{checklist}\n\n{RESPONSE_FORMAT}"))
}

/// One call to a judge model comparing a candidate against its original.
///
/// Returns the model's raw text. Decoding into a verdict happens once, in
/// [`judge`].
#[async_trait]
pub trait ImageVerifier: Send + Sync {
    async fn verify(
        &self,
        original: &[u8],
        candidate: &[u8],
        rubric: Rubric,
    ) -> Result<String, ServiceError>;
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum VerdictError {
    #[error("verifier returned an empty response")]
    Empty,

    #[error("verifier response is not a verdict object: {0}")]
    Malformed(String),

    #[error("unknown verdict status '{0}'")]
    UnknownStatus(String),
}

/// Decode a verifier response into a verdict.
///
/// Accepts bare JSON, JSON inside markdown fences, or JSON embedded in prose.
pub fn parse_verdict(raw: &str) -> Result<VerificationVerdict, VerdictError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(VerdictError::Empty);
    }

    let payload = decode_payload(trimmed)
        .ok_or_else(|| VerdictError::Malformed(trimmed.chars().take(120).collect()))?;

    match payload.status.trim().to_ascii_uppercase().as_str() {
        "PASS" => Ok(VerificationVerdict::Pass),
        "FAIL" => {
            let reason = payload
                .reason
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| UNSPECIFIED_REASON.to_string());
            Ok(VerificationVerdict::Fail { reason })
        }
        other => Err(VerdictError::UnknownStatus(other.to_string())),
    }
}

fn decode_payload(text: &str) -> Option<VerdictPayload> {
    if let Ok(payload) = serde_json::from_str(text) {
        return Some(payload);
    }

    let unfenced = strip_code_fence(text);
    if let Ok(payload) = serde_json::from_str(unfenced) {
        return Some(payload);
    }

    let start = unfenced.find('{')?;
    let end = unfenced.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&unfenced[start..=end]).ok()
}

/// Remove a surrounding ```json ... ``` fence, if present.
fn strip_code_fence(text: &str) -> &str {
    for marker in ["```json", "```JSON", "```"] {
        if let Some(start) = text.find(marker) {
            let body_start = start + marker.len();
            if let Some(len) = text[body_start..].find("```") {
                return text[body_start..body_start + len].trim();
            }
        }
    }
    text
}

/// Run the verification step and turn every outcome into a verdict.
///
/// Verifier errors and unusable responses yield `Pass` when `fail_open` is set,
/// so a flaky judge never stalls the batch. With `fail_open` off they become a
/// `Fail` that drives another attempt.
pub async fn judge<V>(
    verifier: &V,
    original: &[u8],
    candidate: &[u8],
    rubric: Rubric,
    fail_open: bool,
) -> VerificationVerdict
where
    V: ImageVerifier + ?Sized,
{
    let problem = match verifier.verify(original, candidate, rubric).await {
        Ok(raw) => match parse_verdict(&raw) {
            Ok(verdict) => return verdict,
            Err(e) => e.to_string(),
        },
        Err(e) => e.to_string(),
    };

    if fail_open {
        warn!(error = %problem, "Verifier unusable, treating candidate as passed");
        VerificationVerdict::Pass
    } else {
        warn!(error = %problem, "Verifier unusable, rejecting candidate");
        VerificationVerdict::Fail {
            reason: format!("verifier response unusable: {problem}"),
        }
    }
}
