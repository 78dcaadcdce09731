//! Integration tests for pipeline execution, timeouts and SLA evaluation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reelflow_engine::sla::EXECUTION_TIME;
use reelflow_engine::{
    fn_stage, ExecutionStatus, PipelineConfig, PipelineEngine, PipelineStageConfig, SlaConfig,
    StageOutput, StageStatus, StageType,
};
use serde_json::json;

fn counting_stage(id: &str, calls: Arc<AtomicUsize>) -> PipelineStageConfig {
    PipelineStageConfig::new(
        id,
        StageType::Transform,
        fn_stage(move |input| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(StageOutput::ok(input.unwrap_or(json!([]))))
            }
        }),
    )
}

/// Test: the first failure stops the run and leaves later stages pending
#[tokio::test]
async fn test_fail_fast_with_pending_tail() {
    let calls = Arc::new(AtomicUsize::new(0));
    let config = PipelineConfig::new(
        "ingest",
        vec![
            counting_stage("extract", Arc::clone(&calls)),
            PipelineStageConfig::new(
                "validate",
                StageType::Validate,
                fn_stage(|_| async { Ok(StageOutput::failed("schema mismatch")) }),
            ),
            counting_stage("load", Arc::clone(&calls)),
            counting_stage("analyze", Arc::clone(&calls)),
        ],
    );

    let result = PipelineEngine::new().execute(&config).await;

    assert!(!result.success);
    assert_eq!(result.report.status, ExecutionStatus::Failed);
    let statuses: Vec<StageStatus> = result.report.stages.iter().map(|s| s.status).collect();
    assert_eq!(
        statuses,
        vec![
            StageStatus::Completed,
            StageStatus::Failed,
            StageStatus::Pending,
            StageStatus::Pending,
        ]
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1, "later stages must not run");
    assert!(result
        .first_error()
        .unwrap_or_default()
        .contains("schema mismatch"));
    assert_eq!(result.report.failed_count(), 1);
}

/// Test: exceeding the time budget yields exactly one critical execution_time violation
#[tokio::test(start_paused = true)]
async fn test_time_budget_breach_is_one_critical_violation() {
    let slow = |id: &str| {
        PipelineStageConfig::new(
            id,
            StageType::Transform,
            fn_stage(|_| async {
                tokio::time::sleep(Duration::from_millis(80)).await;
                Ok(StageOutput::ok(json!([])))
            }),
        )
    };
    let config = PipelineConfig::new("render", vec![slow("a"), slow("b")]).with_sla(SlaConfig {
        max_execution_time: Duration::from_millis(100),
        ..Default::default()
    });

    let result = PipelineEngine::new().execute(&config).await;

    assert_eq!(result.report.completed_count(), 2, "each stage fits its own budget");
    let time_violations: Vec<_> = result
        .report
        .sla_violations
        .iter()
        .filter(|v| v.violation_type == EXECUTION_TIME)
        .collect();
    assert_eq!(time_violations.len(), 1);
    assert!(time_violations[0].is_critical());
    assert!(!result.success);
    assert_eq!(result.report.status, ExecutionStatus::Failed);
}

/// Test: a stage exceeding its own timeout fails with a timeout message
#[tokio::test(start_paused = true)]
async fn test_stage_timeout_fails_stage() {
    let config = PipelineConfig::new(
        "transcode",
        vec![PipelineStageConfig::new(
            "encode",
            StageType::Transform,
            fn_stage(|_| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(StageOutput::ok(json!([])))
            }),
        )
        .with_timeout(Duration::from_millis(500))],
    );

    let result = PipelineEngine::new().execute(&config).await;
    let encode = result.report.stage("encode").expect("stage result");
    assert_eq!(encode.status, StageStatus::Failed);
    assert!(encode.error.as_deref().unwrap_or_default().contains("timed out"));
    assert!(!result.success);
}

/// Test: records processed follow the output shape
#[tokio::test]
async fn test_records_processed_counts() {
    let config = PipelineConfig::new(
        "count",
        vec![
            PipelineStageConfig::new(
                "list",
                StageType::Extract,
                fn_stage(|_| async { Ok(StageOutput::ok(json!([1, 2, 3, 4]))) }),
            ),
            PipelineStageConfig::new(
                "group",
                StageType::Transform,
                fn_stage(|_| async {
                    Ok(StageOutput::ok(json!({ "clips": [1, 2], "audio": [3], "title": "x" })))
                }),
            ),
            PipelineStageConfig::new(
                "summary",
                StageType::Analyze,
                fn_stage(|_| async { Ok(StageOutput::ok(json!("done"))) }),
            ),
        ],
    );

    let result = PipelineEngine::new().execute(&config).await;
    let counts: Vec<usize> = result
        .report
        .stages
        .iter()
        .map(|s| s.records_processed)
        .collect();
    assert_eq!(counts, vec![4, 4, 1]);
    assert!(result.success);
}
