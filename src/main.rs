use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use manga_ko_pipeline::{
    app_state::AppState,
    config::AppConfig,
    services::{
        gemini::GeminiClient,
        queue::{process_queue, Results, WorkQueue},
        storage,
    },
};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting manga translation batch");

    let config = AppConfig::from_env()?;

    let prometheus = PrometheusBuilder::new().install_recorder()?;
    metrics::describe_counter!("generation_calls_total", "Image generation calls");
    metrics::describe_counter!("verification_calls_total", "Verifier calls");
    metrics::describe_counter!(
        "pipeline_outcomes_total",
        "Work items finished, by outcome status"
    );
    metrics::describe_histogram!(
        "pipeline_item_seconds",
        "Time to carry one work item through the retry loop"
    );

    tracing::info!(
        generator = %config.generator_model,
        verifier = %config.verifier_model,
        rubric = %config.rubric,
        resolution = %config.resolution,
        max_retries = config.max_retries,
        verification = config.verification_enabled(),
        "Pipeline configured"
    );

    let client = GeminiClient::new(&config)?;
    let state = AppState::with_shared(client, &config);

    let items = storage::load_work_items(&config.input_dir)?;
    tracing::info!(count = items.len(), input_dir = %config.input_dir.display(), "Loaded pages");
    let mut queue: WorkQueue = items.into_iter().collect();
    let mut results = Results::new();

    // Ctrl-C stops the batch before the next page starts.
    let cancel = Arc::new(AtomicBool::new(false));
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing current page");
            cancel_on_signal.store(true, Ordering::Relaxed);
        }
    });

    let summary = process_queue(&mut queue, &mut results, &state, &cancel).await;

    if summary.cancelled {
        let pending: Vec<&str> = queue.iter().map(|item| item.name.as_str()).collect();
        tracing::warn!(count = pending.len(), pages = ?pending, "Pages left unprocessed");
    }

    let report = storage::export_results(&config.output_dir, &results, &queue)?;
    std::fs::write(config.output_dir.join("metrics.prom"), prometheus.render())?;

    tracing::info!(
        processed = summary.processed,
        completed = summary.completed,
        failed = summary.failed,
        errored = summary.errored,
        cancelled = summary.cancelled,
        pending = queue.len(),
        saved = report.items.iter().filter(|i| i.output_file.is_some()).count(),
        output_dir = %config.output_dir.display(),
        "Batch finished"
    );

    Ok(())
}
