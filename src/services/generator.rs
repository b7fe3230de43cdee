use async_trait::async_trait;

use crate::error::ServiceError;
use crate::models::generation::{GenerationRequest, GenerationResult};

/// Instruction sent with every page unless `INSTRUCTION_PROMPT` overrides it.
pub const DEFAULT_INSTRUCTION: &str = "\
# Role
You are a professional manga translator and typesetter.

# Task
Translate every piece of text in the provided manga page into natural Korean and \
typeset it back into the page.

# Rules
1. Match each character's tone and personality.
2. Typeset all Korean text horizontally, never vertically.
3. Clean up scan noise and restore screentone behind removed text.
4. Do not alter the artwork or add anything that was not there.

# Output
Return only the finished image, without commentary.";

/// One call to an image-editing model.
///
/// Implementations turn upstream rejections (content filter, empty payload,
/// exhausted rate limits) into `GenerationResult::Failure`. Only transport
/// errors that survive the implementation's own retry are returned as `Err`.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(
        &self,
        request: &GenerationRequest<'_>,
    ) -> Result<GenerationResult, ServiceError>;
}

/// Final prompt text for an attempt.
///
/// A rejection reason from the previous attempt is appended verbatim so the
/// model can correct that specific problem.
pub fn build_prompt(instruction: &str, prior_failure: Option<&str>) -> String {
    match prior_failure {
        Some(reason) if !reason.trim().is_empty() => format!(
            "{instruction}\n\n\
             # Correction\n\
             The previous attempt failed verification for this reason: {reason}\n\
             Correct this specific issue in this attempt."
        ),
        _ => instruction.to_string(),
    }
}
