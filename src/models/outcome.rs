use serde::{Deserialize, Serialize};
use super::verification::VerificationVerdict;
use super::work_item::{ItemStatus, WorkItem};

/// Terminal status of one work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// The verifier passed the returned image.
    Success,
    /// An image was produced but never passed verification (or verification was off).
    SuccessUnverified,
    /// No image; generation failed terminally.
    Failed(String),
}

/// The only value the pipeline hands back for a work item.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutcome {
    pub image: Option<Vec<u8>>,
    pub status: OutcomeStatus,
}

impl PipelineOutcome {
    pub fn item_status(&self) -> ItemStatus {
        match self.status {
            OutcomeStatus::Failed(_) => ItemStatus::Failed,
            _ => ItemStatus::Completed,
        }
    }
}

/// Bookkeeping for one attempt inside the retry loop. Dropped when the item completes.
#[derive(Debug, Clone)]
pub(crate) struct AttemptRecord {
    pub index: u32,
    pub temperature: f32,
    pub verdict: VerificationVerdict,
}

impl AttemptRecord {
    /// Reason to feed into the next attempt's prompt, if this attempt was rejected.
    pub fn failure_reason(&self) -> Option<&str> {
        match &self.verdict {
            VerificationVerdict::Fail { reason } => Some(reason.as_str()),
            VerificationVerdict::Pass => None,
        }
    }
}

/// Entry in the caller-owned results collection.
#[derive(Debug, Clone)]
pub struct ProcessedItem {
    pub item: WorkItem,
    pub status: ItemStatus,
    pub outcome: Option<PipelineOutcome>,
    pub error: Option<String>,
    pub elapsed_ms: u64,
}
