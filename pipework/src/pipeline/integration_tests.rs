//! End-to-end pipeline tests exercising steps, policies, validation,
//! metrics, and cancellation together.

use crate::cancellation::CancellationToken;
use crate::context::PipeContext;
use crate::errors::PipeworkError;
use crate::pipeline::PipelineBuilder;
use crate::pipes::{FnPipe, Pipe};
use crate::policies::{BackoffMode, RetryConfig};
use crate::steps::PipeConfig;
use crate::strategies::{ErrorHandlingOptions, RetryWithBackoffStrategy};
use crate::subpipeline::SubPipeline;
use crate::testing::mocks::{AddPipe, FailingPipe, FlakyPipe, ResourcePipe, SlowPipe};
use crate::validation::ResourceDependencyValidator;
use std::sync::Arc;
use std::time::Instant;

fn add(name: &str, amount: i64) -> Arc<dyn Pipe> {
    Arc::new(AddPipe::new(name.to_string(), amount))
}

fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig::new()
        .with_max_attempts(max_attempts)
        .with_base_delay_ms(1)
        .with_max_delay_ms(5)
        .with_backoff(BackoffMode::Fixed)
}

#[tokio::test]
async fn test_sequential_arithmetic_end_to_end() {
    let ctx = Arc::new(PipeContext::new());
    let builder = PipelineBuilder::new("arithmetic")
        .attach_context(ctx.clone())
        .set_source(serde_json::json!({"seed": true}))
        .attach_pipe(add("add_5", 5))
        .attach_pipe(add("add_1", 1))
        .attach_sub_pipeline(SubPipeline::new("tail", |b| {
            b.attach_pipe(add("add_2", 2)).attach_pipe(add("add_3", 3))
        }));

    builder.run().await.unwrap();

    // 5 + 1 + 2 + 3, accumulated in one shared output.
    assert_eq!(ctx.output()["result"], serde_json::json!(11));
    assert!(ctx.failures.is_empty());
}

#[tokio::test]
async fn test_sequential_steps_see_earlier_mutations() {
    let ctx = Arc::new(PipeContext::new());
    let doubler = FnPipe::new("double", |ctx: &PipeContext| {
        let current = ctx.output()["result"].as_i64().unwrap_or(0);
        ctx.with_output_mut(|out| out["result"] = serde_json::json!(current * 2));
        Ok(())
    });

    PipelineBuilder::new("ordering")
        .attach_context(ctx.clone())
        .set_source(serde_json::Value::Null)
        .attach_pipe(add("add_3", 3))
        .attach_pipe(Arc::new(doubler))
        .run()
        .await
        .unwrap();

    // The doubler observed the first step's write: (0 + 3) * 2.
    assert_eq!(ctx.output()["result"], serde_json::json!(6));
}

#[tokio::test]
async fn test_parallel_wall_clock_tracks_slowest_branch() {
    let ctx = Arc::new(PipeContext::new());
    let builder = PipelineBuilder::new("fan-out")
        .attach_context(ctx.clone())
        .set_source(serde_json::Value::Null)
        .attach_parallel(vec![
            Arc::new(SlowPipe::new("a", 60)),
            Arc::new(SlowPipe::new("b", 60)),
            Arc::new(SlowPipe::new("c", 60)),
        ]);

    let started = Instant::now();
    builder.run().await.unwrap();
    let elapsed = started.elapsed().as_millis();

    assert!(elapsed >= 60, "finished before the slowest branch: {elapsed}ms");
    assert!(elapsed < 170, "branches ran serially: {elapsed}ms");
}

#[tokio::test]
async fn test_retry_policy_recovers_flaky_pipe() {
    let ctx = Arc::new(PipeContext::new());
    let flaky = Arc::new(FlakyPipe::new("flaky", 2));

    PipelineBuilder::new("retrying")
        .attach_context(ctx.clone())
        .set_source(serde_json::Value::Null)
        .attach_pipe(flaky.clone())
        .with_retry_policy(fast_retry(3))
        .run()
        .await
        .unwrap();

    assert_eq!(flaky.call_count(), 3);
    // Both failed attempts were logged with attempt numbers.
    assert_eq!(ctx.failures.len(), 2);
    assert_eq!(ctx.failures.records()[0].attempt, Some(1));
    assert_eq!(ctx.failures.records()[1].attempt, Some(2));
}

#[tokio::test]
async fn test_retry_exhaustion_propagates() {
    let ctx = Arc::new(PipeContext::new());
    let broken = Arc::new(FailingPipe::new("broken", "boom"));

    let err = PipelineBuilder::new("retrying")
        .attach_context(ctx.clone())
        .set_source(serde_json::Value::Null)
        .attach_pipe(broken.clone())
        .with_retry_policy(fast_retry(3))
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, PipeworkError::RetryExhausted { attempts: 3, .. }));
    assert_eq!(broken.call_count(), 3);
}

#[tokio::test]
async fn test_circuit_breaker_fast_fails_within_run() {
    let ctx = Arc::new(PipeContext::new());
    ctx.set_continue_on_failure(true);
    let broken = Arc::new(FailingPipe::new("db", "connection refused"));

    // Same pipe attached four times behind one shared breaker.
    let breaker = Arc::new(crate::policies::CircuitBreakerPolicy::new(2, 60_000));
    let mut builder = PipelineBuilder::new("guarded")
        .attach_context(ctx.clone())
        .set_source(serde_json::Value::Null);
    for _ in 0..4 {
        builder = builder
            .attach_pipe(broken.clone() as Arc<dyn Pipe>)
            .with_policy(breaker.clone());
    }

    builder.run().await.unwrap();

    // Attempts three and four were rejected without invoking the pipe.
    assert_eq!(broken.call_count(), 2);
    let messages = ctx.failures.messages();
    assert!(messages[2].starts_with("Circuit open"));
    assert!(messages[3].starts_with("Circuit open"));
}

#[tokio::test]
async fn test_circuit_breaker_half_open_trial_recovers() {
    let ctx = Arc::new(PipeContext::new());
    let pipe = Arc::new(FlakyPipe::new("flaky", 1));
    let breaker = Arc::new(crate::policies::CircuitBreakerPolicy::new(1, 20));

    let builder = PipelineBuilder::new("guarded")
        .attach_context(ctx.clone())
        .set_source(serde_json::Value::Null)
        .attach_pipe(pipe.clone() as Arc<dyn Pipe>)
        .with_policy(breaker.clone());

    // First run trips the breaker.
    assert!(builder.run().await.is_err());
    assert_eq!(breaker.core().state(), crate::policies::BreakerState::Open);

    tokio::time::sleep(std::time::Duration::from_millis(30)).await;

    // The trial call succeeds and closes the circuit again.
    builder.run().await.unwrap();
    assert_eq!(breaker.core().state(), crate::policies::BreakerState::Closed);
}

#[tokio::test]
async fn test_fallback_policy_end_to_end() {
    let ctx = Arc::new(PipeContext::new());
    let fallback = FnPipe::new("cache", |ctx: &PipeContext| {
        ctx.set_output(serde_json::json!({"source": "cache"}));
        Ok(())
    });

    PipelineBuilder::new("degrading")
        .attach_context(ctx.clone())
        .set_source(serde_json::Value::Null)
        .attach_pipe(Arc::new(FailingPipe::new("origin", "timeout")))
        .with_fallback_policy(Arc::new(fallback))
        .run()
        .await
        .unwrap();

    assert_eq!(ctx.output()["source"], serde_json::json!("cache"));
    assert_eq!(ctx.failures.len(), 1);
}

#[tokio::test]
async fn test_default_strategy_applies_to_unconfigured_pipes() {
    let ctx = Arc::new(PipeContext::new());
    let flaky = Arc::new(FlakyPipe::new("flaky", 1));

    PipelineBuilder::new("defaulted")
        .attach_context(ctx.clone())
        .set_source(serde_json::Value::Null)
        .with_error_handling_options(ErrorHandlingOptions::new().with_default_strategy(
            Arc::new(RetryWithBackoffStrategy::new(3, 1, 5)),
        ))
        .attach_pipe(flaky.clone())
        .run()
        .await
        .unwrap();

    // The pipe had no policy of its own; the context default retried it.
    assert_eq!(flaky.call_count(), 2);
}

#[tokio::test]
async fn test_recovery_strategy_applies_pipeline_wide() {
    let ctx = Arc::new(PipeContext::new());
    let first = Arc::new(FlakyPipe::new("first", 1));
    let second = Arc::new(FlakyPipe::new("second", 1));

    PipelineBuilder::new("defaulted")
        .attach_context(ctx.clone())
        .set_source(serde_json::Value::Null)
        .with_recovery_strategy(Arc::new(RetryWithBackoffStrategy::new(3, 1, 5)))
        .attach_pipe(first.clone())
        .attach_pipe(second.clone())
        .run()
        .await
        .unwrap();

    // Both unconfigured pipes were retried by the pipeline-wide default.
    assert_eq!(first.call_count(), 2);
    assert_eq!(second.call_count(), 2);
}

#[tokio::test]
async fn test_validator_blocks_missing_provider() {
    let ctx = Arc::new(PipeContext::new());
    let err = PipelineBuilder::new("validated")
        .attach_context(ctx.clone())
        .set_source(serde_json::Value::Null)
        .attach_pipe(Arc::new(ResourcePipe::new(
            "consumer",
            ["session"],
            Vec::<String>::new(),
        )))
        .attach_validator(Arc::new(ResourceDependencyValidator::new()))
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, PipeworkError::Validation(_)));
    assert!(ctx.is_validated());
    assert_eq!(ctx.validation_report().errors.len(), 1);
}

#[tokio::test]
async fn test_validator_passes_with_provider_and_resources_flow() {
    let ctx = Arc::new(PipeContext::new());
    PipelineBuilder::new("validated")
        .attach_context(ctx.clone())
        .set_source(serde_json::Value::Null)
        .attach_pipe(Arc::new(ResourcePipe::new(
            "provider",
            Vec::<String>::new(),
            ["session"],
        )))
        .attach_pipe(Arc::new(ResourcePipe::new(
            "consumer",
            ["session"],
            Vec::<String>::new(),
        )))
        .attach_validator(Arc::new(ResourceDependencyValidator::new()))
        .run()
        .await
        .unwrap();

    assert!(ctx.is_validated());
    assert!(ctx.validation_report().is_ok());
    assert!(ctx.resources.contains_key("session"));
}

#[tokio::test]
async fn test_default_validator_runs_when_none_attached() {
    let ctx = Arc::new(PipeContext::new());
    let err = PipelineBuilder::new("unvalidated")
        .attach_context(ctx.clone())
        .set_source(serde_json::Value::Null)
        .attach_pipe(Arc::new(ResourcePipe::new(
            "consumer",
            ["session"],
            Vec::<String>::new(),
        )))
        .run()
        .await
        .unwrap_err();

    // No validator was attached; the resource scan still ran.
    assert!(matches!(err, PipeworkError::Validation(_)));
}

#[tokio::test]
async fn test_sub_pipeline_requirement_satisfied_by_parent_pipe() {
    let ctx = Arc::new(PipeContext::new());
    PipelineBuilder::new("nested")
        .attach_context(ctx.clone())
        .set_source(serde_json::Value::Null)
        .attach_pipe(Arc::new(ResourcePipe::new(
            "provider",
            Vec::<String>::new(),
            ["session"],
        )))
        .attach_sub_pipeline(SubPipeline::new("inner", |b| {
            b.attach_pipe(Arc::new(ResourcePipe::new(
                "consumer",
                ["session"],
                Vec::<String>::new(),
            )))
        }))
        .run()
        .await
        .unwrap();

    // The outer scan saw the flattened pipe list; the nested consumer's
    // requirement was satisfied by the parent's provider.
    assert!(ctx.resources.contains_key("session"));
}

#[tokio::test]
async fn test_conditional_step_skipped_on_false_predicate() {
    let ctx = Arc::new(PipeContext::new());
    PipelineBuilder::new("conditional")
        .attach_context(ctx.clone())
        .set_source(serde_json::json!({"premium": false}))
        .attach_pipe(add("base", 1))
        .attach_conditional(
            add("premium_bonus", 100),
            Arc::new(|ctx: &PipeContext| ctx.input()["premium"] == serde_json::json!(true)),
        )
        .run()
        .await
        .unwrap();

    assert_eq!(ctx.output()["result"], serde_json::json!(1));
}

#[tokio::test]
async fn test_cancellation_stops_subsequent_steps() {
    let ctx = Arc::new(PipeContext::new());
    let never_runs = Arc::new(AddPipe::new("never", 100));
    let token = CancellationToken::new();

    let cancel_token = token.clone();
    let canceller = FnPipe::new("canceller", move |_ctx: &PipeContext| {
        cancel_token.cancel("operator abort");
        Ok(())
    });

    let err = PipelineBuilder::new("cancelled")
        .attach_context(ctx.clone())
        .set_source(serde_json::Value::Null)
        .attach_pipe(add("first", 1))
        .attach_pipe(Arc::new(canceller))
        .attach_pipe(never_runs.clone() as Arc<dyn Pipe>)
        .run_with_token(&token)
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(ctx.output()["result"], serde_json::json!(1));
    // The cancellation was recorded before aborting.
    assert!(ctx.failures.last().unwrap().message.contains("operator abort"));
}

#[tokio::test]
async fn test_cancellation_interrupts_slow_pipe() {
    let ctx = Arc::new(PipeContext::new());
    let token = CancellationToken::new();

    let builder = PipelineBuilder::new("interrupted")
        .attach_context(ctx.clone())
        .set_source(serde_json::Value::Null)
        .attach_pipe(Arc::new(SlowPipe::new("slow", 5_000)));

    let trigger = token.clone();
    let handle = tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        trigger.cancel("deadline");
    });

    let started = Instant::now();
    let err = builder.run_with_token(&token).await.unwrap_err();
    handle.await.unwrap();

    assert!(err.is_cancelled());
    // Interrupted mid-sleep, far short of the 5s delay.
    assert!(started.elapsed().as_millis() < 1_000);
}

#[tokio::test]
async fn test_continue_on_failure_keeps_pipeline_going() {
    let ctx = Arc::new(PipeContext::new());
    ctx.set_continue_on_failure(true);

    PipelineBuilder::new("tolerant")
        .attach_context(ctx.clone())
        .set_source(serde_json::Value::Null)
        .attach_pipe(Arc::new(FailingPipe::new("broken", "boom")))
        .attach_pipe(add("after", 7))
        .run()
        .await
        .unwrap();

    assert_eq!(ctx.output()["result"], serde_json::json!(7));
    assert_eq!(ctx.failures.len(), 1);
}

#[tokio::test]
async fn test_metrics_record_step_durations() {
    let ctx = Arc::new(PipeContext::new());
    PipelineBuilder::new("measured")
        .attach_context(ctx.clone())
        .set_source(serde_json::Value::Null)
        .enable_performance_metrics()
        .attach_pipe(add("add_1", 1))
        .attach_pipe(Arc::new(SlowPipe::new("pause", 15)))
        .run()
        .await
        .unwrap();

    let metrics = ctx.metrics().unwrap();
    assert!(metrics.is_finished());
    assert_eq!(metrics.step_durations_ms.len(), 2);
    assert!(metrics.step_durations_ms["step_2_pause"] >= 10.0);
    assert!(metrics.total_duration_ms.unwrap() >= 10.0);
}

#[tokio::test]
async fn test_pipe_config_attachment() {
    let ctx = Arc::new(PipeContext::new());
    PipelineBuilder::new("configured")
        .attach_context(ctx.clone())
        .set_source(serde_json::Value::Null)
        .attach_pipe_with_config(
            Arc::new(FailingPipe::new("optional", "boom")),
            PipeConfig::new()
                .with_continue_on_failure(true)
                .with_metadata("stage", serde_json::json!("enrichment")),
        )
        .attach_pipe(add("after", 2))
        .run()
        .await
        .unwrap();

    assert_eq!(ctx.output()["result"], serde_json::json!(2));
}

#[tokio::test]
async fn test_rerun_preserves_correlation_id() {
    let ctx = Arc::new(PipeContext::new());
    let builder = PipelineBuilder::new("repeated")
        .attach_context(ctx.clone())
        .set_source(serde_json::Value::Null)
        .enable_performance_metrics()
        .attach_pipe(add("add_1", 1));

    builder.run().await.unwrap();
    let first_id = ctx.metrics().unwrap().correlation_id;

    builder.run().await.unwrap();
    assert_eq!(ctx.metrics().unwrap().correlation_id, first_id);
}
