//! Generate → verify → retry controller.
//!
//! One work item runs through an explicit state machine:
//!
//! - `Attempting(n)`: generate with the temperature and feedback for attempt `n`;
//!   the last allowed attempt is returned without verification.
//! - `Done(outcome)`: terminal.
//!
//! Generation calls per item never exceed `last_attempt + 1`, and verification
//! never runs on the last attempt.

use std::time::Instant;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::models::generation::{GenerationRequest, GenerationResult};
use crate::models::outcome::{AttemptRecord, OutcomeStatus, PipelineOutcome};
use crate::models::work_item::WorkItem;
use crate::services::generator::ImageGenerator;
use crate::services::verifier::{judge, ImageVerifier};

enum AttemptState {
    Attempting(u32),
    Done(PipelineOutcome),
}

/// Carry one work item through the retry loop.
///
/// Expected failures (content blocks, empty results, verifier trouble) come back
/// as an `OutcomeStatus`. Only generator transport errors return `Err`.
pub async fn run_item<G, V>(
    item: &WorkItem,
    config: &PipelineConfig,
    generator: &G,
    verifier: &V,
) -> Result<PipelineOutcome>
where
    G: ImageGenerator + ?Sized,
    V: ImageVerifier + ?Sized,
{
    let started = Instant::now();
    let last_attempt = config.last_attempt();
    let mut previous: Option<AttemptRecord> = None;
    let mut state = AttemptState::Attempting(0);

    let outcome = loop {
        let attempt = match state {
            AttemptState::Done(outcome) => break outcome,
            AttemptState::Attempting(n) => n,
        };

        let temperature = config.temperature_for_attempt(attempt);
        let request = GenerationRequest {
            source_image: &item.image,
            instruction: &config.instruction,
            temperature,
            resolution: config.resolution,
            prior_failure: previous.as_ref().and_then(AttemptRecord::failure_reason),
        };

        info!(
            item_id = %item.id,
            attempt,
            temperature,
            has_feedback = request.prior_failure.is_some(),
            "Generating"
        );
        metrics::counter!("generation_calls_total").increment(1);

        let image = match generator.generate(&request).await? {
            GenerationResult::Image(image) => image,
            GenerationResult::Failure(failure) => {
                warn!(item_id = %item.id, attempt, kind = %failure.kind, reason = %failure.reason, "Generation failed");
                state = AttemptState::Done(PipelineOutcome {
                    image: None,
                    status: OutcomeStatus::Failed(failure.reason),
                });
                continue;
            }
        };

        if attempt >= last_attempt {
            debug!(item_id = %item.id, attempt, "Final attempt, returning without verification");
            state = AttemptState::Done(PipelineOutcome {
                image: Some(image.bytes),
                status: OutcomeStatus::SuccessUnverified,
            });
            continue;
        }

        metrics::counter!("verification_calls_total").increment(1);
        let verdict = judge(
            verifier,
            &item.image,
            &image.bytes,
            config.rubric,
            config.verifier_fail_open,
        )
        .await;

        let record = AttemptRecord {
            index: attempt,
            temperature,
            verdict,
        };

        state = match record.failure_reason() {
            None => {
                info!(item_id = %item.id, attempt, "Verification passed");
                AttemptState::Done(PipelineOutcome {
                    image: Some(image.bytes),
                    status: OutcomeStatus::Success,
                })
            }
            Some(reason) => {
                info!(
                    item_id = %item.id,
                    attempt = record.index,
                    temperature = record.temperature,
                    reason,
                    "Verification failed, retrying"
                );
                sleep(config.retry_delay).await;
                previous = Some(record);
                AttemptState::Attempting(attempt + 1)
            }
        };
    };

    let status_label = match &outcome.status {
        OutcomeStatus::Success => "success",
        OutcomeStatus::SuccessUnverified => "success_unverified",
        OutcomeStatus::Failed(_) => "failed",
    };
    metrics::counter!("pipeline_outcomes_total", "status" => status_label).increment(1);
    metrics::histogram!("pipeline_item_seconds").record(started.elapsed().as_secs_f64());

    Ok(outcome)
}
