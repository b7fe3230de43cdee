use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tokio::time::sleep;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::outcome::ProcessedItem;
use crate::models::work_item::{ItemStatus, WorkItem};
use crate::services::pipeline;

/// FIFO queue of pages awaiting processing. Owned by the caller.
#[derive(Debug, Default)]
pub struct WorkQueue {
    items: VecDeque<WorkItem>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an item, returning its id.
    pub fn enqueue(&mut self, item: WorkItem) -> Uuid {
        let id = item.id;
        self.items.push_back(item);
        id
    }

    /// Put a finished item back at the end of the queue for another run.
    pub fn requeue(&mut self, results: &mut Results, item_id: Uuid) -> bool {
        match results.take(item_id) {
            Some(processed) => {
                self.items.push_back(processed.item);
                true
            }
            None => false,
        }
    }

    pub fn dequeue(&mut self) -> Option<WorkItem> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items still waiting, front first.
    pub fn iter(&self) -> impl Iterator<Item = &WorkItem> {
        self.items.iter()
    }
}

impl FromIterator<WorkItem> for WorkQueue {
    fn from_iter<I: IntoIterator<Item = WorkItem>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

/// Processed items in completion order. Owned by the caller.
#[derive(Debug, Default)]
pub struct Results {
    entries: Vec<ProcessedItem>,
}

impl Results {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: ProcessedItem) {
        self.entries.push(entry);
    }

    pub fn get(&self, item_id: Uuid) -> Option<&ProcessedItem> {
        self.entries.iter().find(|e| e.item.id == item_id)
    }

    /// Remove and return an entry.
    pub fn take(&mut self, item_id: Uuid) -> Option<ProcessedItem> {
        let idx = self.entries.iter().position(|e| e.item.id == item_id)?;
        Some(self.entries.remove(idx))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProcessedItem> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count(&self, status: ItemStatus) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }
}

/// Counters for one `process_queue` run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub processed: usize,
    pub completed: usize,
    pub failed: usize,
    pub errored: usize,
    pub cancelled: bool,
}

/// Drain the queue one item at a time.
///
/// A fatal error on one item marks it errored and moves on to the next.
/// `cancel` is checked before each item and again after the pacing delay;
/// an item already in flight finishes.
pub async fn process_queue(
    queue: &mut WorkQueue,
    results: &mut Results,
    state: &AppState,
    cancel: &AtomicBool,
) -> BatchSummary {
    let mut summary = BatchSummary::default();

    while !queue.is_empty() {
        if cancel.load(Ordering::Relaxed) {
            tracing::info!(remaining = queue.len(), "Batch cancelled");
            summary.cancelled = true;
            break;
        }

        // Pace consecutive items to respect upstream rate limits.
        if summary.processed > 0 && !state.item_delay.is_zero() {
            sleep(state.item_delay).await;
            if cancel.load(Ordering::Relaxed) {
                tracing::info!(remaining = queue.len(), "Batch cancelled during pacing delay");
                summary.cancelled = true;
                break;
            }
        }

        let Some(item) = queue.dequeue() else {
            break;
        };

        tracing::info!(item_id = %item.id, name = %item.name, "Processing work item");
        let start = Instant::now();

        let result = pipeline::run_item(
            &item,
            &state.pipeline,
            state.generator.as_ref(),
            state.verifier.as_ref(),
        )
        .await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        let entry = match result {
            Ok(outcome) => {
                let status = outcome.item_status();
                tracing::info!(
                    item_id = %item.id,
                    status = ?outcome.status,
                    elapsed_ms,
                    "Work item finished"
                );
                ProcessedItem {
                    item,
                    status,
                    outcome: Some(outcome),
                    error: None,
                    elapsed_ms,
                }
            }
            Err(e) => {
                tracing::error!(item_id = %item.id, error = %e, "Work item errored");
                ProcessedItem {
                    item,
                    status: ItemStatus::Errored,
                    outcome: None,
                    error: Some(e.to_string()),
                    elapsed_ms,
                }
            }
        };

        summary.processed += 1;
        match entry.status {
            ItemStatus::Completed => summary.completed += 1,
            ItemStatus::Failed => summary.failed += 1,
            ItemStatus::Errored => summary.errored += 1,
            ItemStatus::Pending => {}
        }
        results.push(entry);
    }

    summary
}
