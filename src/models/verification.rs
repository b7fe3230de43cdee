use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Checklist the verifier model judges a candidate against.
///
/// `Off` disables verification entirely.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Rubric {
    Off,
    Lenient,
    Strict,
}

/// Verdict on a single candidate image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationVerdict {
    Pass,
    Fail { reason: String },
}

/// Wire shape the verifier model is asked to produce.
#[derive(Debug, Deserialize)]
pub(crate) struct VerdictPayload {
    pub status: String,
    #[serde(default)]
    pub reason: Option<String>,
}
