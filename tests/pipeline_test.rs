//! Retry controller behaviour against scripted generator/verifier fakes.

mod fixtures;
mod helpers;

use std::time::Duration;

use fixtures::page_png;
use helpers::{ScriptedGenerator, ScriptedVerifier};
use manga_ko_pipeline::config::PipelineConfig;
use manga_ko_pipeline::error::{PipelineError, ServiceError};
use manga_ko_pipeline::models::generation::FailureKind;
use manga_ko_pipeline::models::outcome::OutcomeStatus;
use manga_ko_pipeline::models::verification::Rubric;
use manga_ko_pipeline::models::work_item::WorkItem;
use manga_ko_pipeline::services::pipeline::run_item;
use tokio_test::{assert_err, assert_ok};

fn config() -> PipelineConfig {
    PipelineConfig {
        instruction: "Translate this page into Korean.".to_string(),
        max_retries: 2,
        base_temperature: 0.3,
        retry_delay: Duration::ZERO,
        ..PipelineConfig::default()
    }
}

fn item() -> WorkItem {
    WorkItem::new("page_001.png", page_png(30))
}

#[tokio::test]
async fn test_verifier_disabled_single_generation() {
    let generator = ScriptedGenerator::new();
    let verifier = ScriptedVerifier::new().then_fail("should never be asked");
    let config = PipelineConfig {
        verification_enabled: false,
        ..config()
    };

    let outcome = assert_ok!(run_item(&item(), &config, &generator, &verifier).await);

    assert_eq!(outcome.status, OutcomeStatus::SuccessUnverified);
    assert!(outcome.image.is_some());
    assert_eq!(generator.call_count(), 1);
    assert_eq!(verifier.call_count(), 0);
}

#[tokio::test]
async fn test_pass_on_first_attempt_stops_early() {
    let generator = ScriptedGenerator::new();
    let verifier = ScriptedVerifier::new().then_pass();

    let outcome = assert_ok!(run_item(&item(), &config(), &generator, &verifier).await);

    assert_eq!(outcome.status, OutcomeStatus::Success);
    assert_eq!(generator.call_count(), 1);
    assert_eq!(verifier.call_count(), 1);
}

#[tokio::test]
async fn test_budget_exhausted_returns_last_image_unverified() {
    let generator = ScriptedGenerator::new();
    let verifier = ScriptedVerifier::new()
        .then_fail("vertical text")
        .then_fail("vertical text");

    let outcome = assert_ok!(run_item(&item(), &config(), &generator, &verifier).await);

    assert_eq!(outcome.status, OutcomeStatus::SuccessUnverified);
    assert!(outcome.image.is_some());
    assert_eq!(generator.call_count(), 3);
    assert_eq!(verifier.call_count(), 2);

    let calls = generator.calls();
    assert!(calls[0].prior_failure.is_none());
    assert!(calls[1].prompt.contains("vertical text"));
    assert!(calls[2].prompt.contains("vertical text"));
}

#[tokio::test]
async fn test_content_block_short_circuits() {
    let generator =
        ScriptedGenerator::new().then_failure(FailureKind::ContentBlocked, "content policy block");
    let verifier = ScriptedVerifier::new();

    let outcome = assert_ok!(run_item(&item(), &config(), &generator, &verifier).await);

    assert_eq!(
        outcome.status,
        OutcomeStatus::Failed("content policy block".to_string())
    );
    assert!(outcome.image.is_none());
    assert_eq!(generator.call_count(), 1);
    assert_eq!(verifier.call_count(), 0);
}

#[tokio::test]
async fn test_unparseable_verdict_fails_open() {
    let generator = ScriptedGenerator::new();
    let verifier = ScriptedVerifier::new().then_raw("Looks great, nice work!");

    let outcome = assert_ok!(run_item(&item(), &config(), &generator, &verifier).await);

    assert_eq!(outcome.status, OutcomeStatus::Success);
    assert_eq!(generator.call_count(), 1);
    assert_eq!(verifier.call_count(), 1);
}

#[tokio::test]
async fn test_verifier_error_fails_open() {
    let generator = ScriptedGenerator::new();
    let verifier = ScriptedVerifier::new().then_error();

    let outcome = assert_ok!(run_item(&item(), &config(), &generator, &verifier).await);

    assert_eq!(outcome.status, OutcomeStatus::Success);
    assert_eq!(generator.call_count(), 1);
}

#[tokio::test]
async fn test_fail_closed_verifier_drives_retry() {
    let generator = ScriptedGenerator::new();
    let verifier = ScriptedVerifier::new().then_raw("").then_pass();
    let config = PipelineConfig {
        verifier_fail_open: false,
        ..config()
    };

    let outcome = assert_ok!(run_item(&item(), &config, &generator, &verifier).await);

    assert_eq!(outcome.status, OutcomeStatus::Success);
    assert_eq!(generator.call_count(), 2);
    let calls = generator.calls();
    let feedback = calls[1].prior_failure.as_deref().unwrap();
    assert!(feedback.starts_with("verifier response unusable"));
}

#[tokio::test]
async fn test_failure_on_retry_short_circuits() {
    let generator = ScriptedGenerator::new()
        .then_image()
        .then_failure(FailureKind::EmptyResult, "no image in response");
    let verifier = ScriptedVerifier::new().then_fail("speech bubble 2 untranslated");

    let outcome = assert_ok!(run_item(&item(), &config(), &generator, &verifier).await);

    assert_eq!(
        outcome.status,
        OutcomeStatus::Failed("no image in response".to_string())
    );
    assert_eq!(generator.call_count(), 2);
    assert_eq!(verifier.call_count(), 1);
}

#[tokio::test]
async fn test_transport_error_propagates() {
    let generator = ScriptedGenerator::new().then_transport_error();
    let verifier = ScriptedVerifier::new();

    let err = assert_err!(run_item(&item(), &config(), &generator, &verifier).await);

    assert!(matches!(
        err,
        PipelineError::Generation(ServiceError::Http(_))
    ));
    assert_eq!(generator.call_count(), 1);
}

#[tokio::test]
async fn test_temperature_escalates_and_stays_up() {
    let generator = ScriptedGenerator::new();
    let verifier = ScriptedVerifier::new()
        .then_fail("text still vertical")
        .then_fail("text still vertical");

    assert_ok!(run_item(&item(), &config(), &generator, &verifier).await);

    let temps: Vec<f32> = generator.calls().iter().map(|c| c.temperature).collect();
    assert_eq!(temps, vec![0.3, 0.6, 0.6]);
    assert!(temps.windows(2).all(|w| w[1] >= w[0]));
}

#[tokio::test]
async fn test_high_base_temperature_not_lowered() {
    let generator = ScriptedGenerator::new();
    let verifier = ScriptedVerifier::new().then_fail("bad typesetting");
    let config = PipelineConfig {
        base_temperature: 0.9,
        ..config()
    };

    assert_ok!(run_item(&item(), &config, &generator, &verifier).await);

    let temps: Vec<f32> = generator.calls().iter().map(|c| c.temperature).collect();
    assert_eq!(temps, vec![0.9, 0.9]);
}

#[tokio::test]
async fn test_feedback_uses_latest_reason() {
    let generator = ScriptedGenerator::new();
    let verifier = ScriptedVerifier::new()
        .then_fail("bubble 1 untranslated")
        .then_fail("sound effect left in Japanese");

    assert_ok!(run_item(&item(), &config(), &generator, &verifier).await);

    let calls = generator.calls();
    assert_eq!(calls[1].prior_failure.as_deref(), Some("bubble 1 untranslated"));
    assert_eq!(
        calls[2].prior_failure.as_deref(),
        Some("sound effect left in Japanese")
    );
}

#[tokio::test]
async fn test_zero_retries_never_verifies() {
    let generator = ScriptedGenerator::new();
    let verifier = ScriptedVerifier::new();
    let config = PipelineConfig {
        max_retries: 0,
        ..config()
    };

    let outcome = assert_ok!(run_item(&item(), &config, &generator, &verifier).await);

    assert_eq!(outcome.status, OutcomeStatus::SuccessUnverified);
    assert_eq!(verifier.call_count(), 0);
}

#[tokio::test]
async fn test_attempt_bounds_hold_for_every_budget() {
    for max_retries in 0..=4 {
        let generator = ScriptedGenerator::new();
        let mut verifier = ScriptedVerifier::new();
        for _ in 0..10 {
            verifier = verifier.then_fail("never good enough");
        }
        let config = PipelineConfig {
            max_retries,
            ..config()
        };

        assert_ok!(run_item(&item(), &config, &generator, &verifier).await);

        assert_eq!(generator.call_count(), max_retries as usize + 1);
        assert_eq!(verifier.call_count(), max_retries as usize);
    }
}

#[tokio::test]
async fn test_rubric_forwarded_to_verifier() {
    let generator = ScriptedGenerator::new();
    let verifier = ScriptedVerifier::new().then_pass();
    let config = PipelineConfig {
        rubric: Rubric::Strict,
        ..config()
    };

    assert_ok!(run_item(&item(), &config, &generator, &verifier).await);

    assert_eq!(verifier.rubrics(), vec![Rubric::Strict]);
}

#[tokio::test(start_paused = true)]
async fn test_retry_pacing_delay_applied() {
    let generator = ScriptedGenerator::new();
    let verifier = ScriptedVerifier::new().then_fail("vertical text").then_pass();
    let config = PipelineConfig {
        retry_delay: Duration::from_millis(1200),
        ..config()
    };

    let start = tokio::time::Instant::now();
    let outcome = assert_ok!(run_item(&item(), &config, &generator, &verifier).await);

    assert_eq!(outcome.status, OutcomeStatus::Success);
    assert!(start.elapsed() >= Duration::from_millis(1200));
}
