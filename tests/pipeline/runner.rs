use std::sync::Arc;

use crate::support::{
    helpers::{init_tracing, pipeline_config, read_aggregate, stored_ids, FaultyStore},
    mock_http::{MockHttpServer, MockPosts},
};
use anyhow::Result;
use fetchpool::{FailureKind, HttpFetcher, PipelineConfig, Runner};
use serde_json::json;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn empty_catalog_is_a_clean_success() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let target = dir.path().join("posts.json");

    // Nothing listens here; an empty catalog must never open a connection.
    let runner = Runner::new(pipeline_config("http://127.0.0.1:9/posts/", 0, 4, &target)?)?;
    let report = runner.run().await?;

    assert_eq!(report.total(), 0);
    assert!(report.verification_ok);
    assert_eq!(report.verification_found, 0);
    assert!(read_aggregate(&target).await?.is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn previous_aggregate_is_replaced() -> Result<()> {
    init_tracing();
    let server = MockHttpServer::start(MockPosts::new()).await?;
    let dir = tempfile::tempdir()?;
    let target = dir.path().join("posts.json");
    std::fs::write(&target, json!([{ "id": 99 }, { "id": 98 }]).to_string())?;

    let report = Runner::new(pipeline_config(server.base_url(), 2, 2, &target)?)?
        .run()
        .await?;

    assert!(report.verification_ok);
    assert_eq!(stored_ids(&read_aggregate(&target).await?), vec![1, 2]);

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reset_failure_aborts_before_fetching() -> Result<()> {
    init_tracing();
    let server = MockHttpServer::start(MockPosts::new()).await?;
    let dir = tempfile::tempdir()?;
    let target = dir.path().join("posts.json");

    let config = pipeline_config(server.base_url(), 3, 2, &target)?;
    let worker = Arc::new(HttpFetcher::from_config(&config)?);
    let store = Arc::new(FaultyStore::new(&target).failing_reset());
    let runner = Runner::with_components(config, worker, store);

    let err = runner.run().await.expect_err("reset failure must be fatal");
    let message = format!("{err:#}");
    assert!(
        message.contains("failed to reset aggregate"),
        "unexpected error: {message}"
    );
    assert_eq!(server.total_requests(), 0);

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unwritable_target_is_a_setup_error() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"file")?;
    let target = blocker.join("posts.json");

    let runner = Runner::new(pipeline_config("http://127.0.0.1:9/posts/", 3, 2, &target)?)?;
    let err = runner.run().await.expect_err("reset must fail");
    assert!(format!("{err:#}").contains("failed to reset aggregate"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn persistence_error_counts_the_item_as_failed() -> Result<()> {
    init_tracing();
    let server = MockHttpServer::start(MockPosts::new()).await?;
    let dir = tempfile::tempdir()?;
    let target = dir.path().join("posts.json");

    let config = pipeline_config(server.base_url(), 4, 1, &target)?;
    let worker = Arc::new(HttpFetcher::from_config(&config)?);
    let store = Arc::new(FaultyStore::new(&target).rejecting(3));
    let report = Runner::with_components(config, worker, store).run().await?;

    assert_eq!(report.succeeded, 3);
    assert_eq!(report.failures_of(FailureKind::PersistenceError), 1);
    assert_eq!(report.failed_ids, vec![3]);
    assert!(!report.verification_ok);
    assert_eq!(stored_ids(&read_aggregate(&target).await?), vec![1, 2, 4]);

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancelled_run_still_reports_every_item() -> Result<()> {
    init_tracing();
    let server = MockHttpServer::start(MockPosts::new()).await?;
    let dir = tempfile::tempdir()?;
    let target = dir.path().join("posts.json");

    let runner = Runner::new(pipeline_config(server.base_url(), 5, 2, &target)?)?;
    runner.cancellation_token().cancel();
    let report = runner.run().await?;

    assert_eq!(report.total(), 5);
    assert_eq!(report.failures_of(FailureKind::Cancelled), 5);
    assert!(!report.verification_ok);
    assert!(read_aggregate(&target).await?.is_empty());
    assert_eq!(server.total_requests(), 0);

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn runner_is_reusable_after_a_cancelled_run() -> Result<()> {
    init_tracing();
    let server = MockHttpServer::start(MockPosts::new()).await?;
    let dir = tempfile::tempdir()?;
    let target = dir.path().join("posts.json");

    let runner = Runner::new(pipeline_config(server.base_url(), 4, 2, &target)?)?;
    runner.cancellation_token().cancel();
    let cancelled = runner.run().await?;
    assert_eq!(cancelled.failures_of(FailureKind::Cancelled), 4);
    assert!(!runner.cancellation_token().is_cancelled());

    let report = runner.run().await?;
    assert_eq!(report.succeeded, 4);
    assert_eq!(report.failed, 0);
    assert!(report.verification_ok);
    assert_eq!(stored_ids(&read_aggregate(&target).await?), vec![1, 2, 3, 4]);

    // Counters describe the latest run only.
    let telemetry = runner.telemetry().snapshot();
    assert_eq!(telemetry.dispatched, 4);
    assert_eq!(telemetry.committed, 4);
    assert_eq!(telemetry.failed, 0);
    assert!(runner.telemetry().failures_by_kind().is_empty());
    assert_eq!(report.fetch_metrics.map(|metrics| metrics.requests), Some(4));

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn repeated_runs_do_not_accumulate_counters() -> Result<()> {
    init_tracing();
    let server = MockHttpServer::start(MockPosts::new().with_status(2, 404)).await?;
    let dir = tempfile::tempdir()?;
    let target = dir.path().join("posts.json");

    let runner = Runner::new(pipeline_config(server.base_url(), 3, 3, &target)?)?;
    let first = runner.run().await?;
    let second = runner.run().await?;

    assert_eq!(first.failures_by_kind, second.failures_by_kind);
    assert_eq!(first.fetch_metrics.map(|m| m.requests), Some(3));
    assert_eq!(second.fetch_metrics.map(|m| m.requests), Some(3));
    assert_eq!(second.fetch_metrics.map(|m| m.status_errors), Some(1));

    let telemetry = runner.telemetry().snapshot();
    assert_eq!(telemetry.dispatched, 3);
    assert_eq!(telemetry.failed, 1);
    assert_eq!(
        runner.telemetry().failures_by_kind().get(&FailureKind::NonSuccessStatus),
        Some(&1)
    );
    assert_eq!(server.total_requests(), 6);

    server.shutdown().await;
    Ok(())
}

#[test]
fn invalid_configuration_is_rejected_up_front() {
    let err = PipelineConfig::builder()
        .base_url("localhost/posts/")
        .build()
        .unwrap_err();
    assert!(format!("{err:#}").contains("base_url"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn report_serializes_for_the_cli() -> Result<()> {
    init_tracing();
    let server = MockHttpServer::start(MockPosts::new().with_status(2, 500)).await?;
    let dir = tempfile::tempdir()?;
    let target = dir.path().join("posts.json");

    let report = Runner::new(pipeline_config(server.base_url(), 2, 2, &target)?)?
        .run()
        .await?;
    let encoded = serde_json::to_value(&report)?;

    assert_eq!(encoded["succeeded"], 1);
    assert_eq!(encoded["failed"], 1);
    assert_eq!(encoded["failures_by_kind"]["non_success_status"], 1);
    assert_eq!(encoded["verification_ok"], false);
    assert_eq!(encoded["expected_count"], 2);
    assert!(encoded["elapsed_seconds"].as_f64().is_some());

    server.shutdown().await;
    Ok(())
}
