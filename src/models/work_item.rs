use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a work item when the batch processor stops.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// An image was produced (verified or not).
    Completed,
    /// Generation failed terminally.
    Failed,
    /// Processing raised a fatal error.
    Errored,
    /// Still queued when the batch was cancelled.
    Pending,
}

/// One source page awaiting (or having undergone) translation.
///
/// Immutable once created. The queue owns it; the pipeline only borrows it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: Uuid,
    pub name: String,
    #[serde(skip)]
    pub image: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

impl WorkItem {
    pub fn new(name: impl Into<String>, image: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            image,
            created_at: Utc::now(),
        }
    }
}
