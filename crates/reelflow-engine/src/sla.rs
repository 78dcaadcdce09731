//! Service-level objectives and their evaluation after a run.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::pipeline::ExecutionReport;

pub const EXECUTION_TIME: &str = "execution_time";
pub const ERROR_RATE: &str = "error_rate";
pub const QUALITY_SCORE: &str = "quality_score";

/// Service-level objectives for one pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct SlaConfig {
    pub max_execution_time: Duration,
    /// Highest tolerated `failed / executed-eligible` stage ratio.
    pub max_error_rate: f64,
    /// Read by [`QualityScoreCheck`] only.
    pub required_quality_score: Option<f64>,
}

impl Default for SlaConfig {
    fn default() -> Self {
        Self {
            max_execution_time: Duration::from_secs(300),
            max_error_rate: 0.1,
            required_quality_score: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    Warning,
    Critical,
}

impl ViolationSeverity {
    pub fn name(&self) -> &'static str {
        match self {
            ViolationSeverity::Warning => "warning",
            ViolationSeverity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlaViolation {
    pub violation_type: String,
    pub expected: f64,
    pub actual: f64,
    pub severity: ViolationSeverity,
}

impl SlaViolation {
    pub fn is_critical(&self) -> bool {
        self.severity == ViolationSeverity::Critical
    }
}

/// Everything a check may look at once the stage loop has ended.
#[derive(Debug, Clone, Copy)]
pub struct SlaContext<'a> {
    pub sla: &'a SlaConfig,
    pub report: &'a ExecutionReport,
    pub elapsed: Duration,
    /// Output of the last stage that produced data.
    pub output: Option<&'a Value>,
}

/// A caller-supplied objective evaluated after the built-in ones.
pub trait SlaCheck: Send + Sync {
    fn name(&self) -> &str;
    fn evaluate(&self, ctx: &SlaContext<'_>) -> Option<SlaViolation>;
}

/// Built-in objectives: total time and stage error rate, both critical.
pub fn builtin_violations(ctx: &SlaContext<'_>) -> Vec<SlaViolation> {
    let mut out = Vec::new();

    let elapsed_ms = ctx.elapsed.as_millis() as f64;
    let budget_ms = ctx.sla.max_execution_time.as_millis() as f64;
    if elapsed_ms > budget_ms {
        out.push(SlaViolation {
            violation_type: EXECUTION_TIME.to_string(),
            expected: budget_ms,
            actual: elapsed_ms,
            severity: ViolationSeverity::Critical,
        });
    }

    let error_rate = ctx.report.error_rate();
    if error_rate > ctx.sla.max_error_rate {
        out.push(SlaViolation {
            violation_type: ERROR_RATE.to_string(),
            expected: ctx.sla.max_error_rate,
            actual: error_rate,
            severity: ViolationSeverity::Critical,
        });
    }
    out
}

/// Warns when the final output's `qualityScore` falls below
/// `required_quality_score`. Silent when either is absent.
#[derive(Debug, Clone, Default)]
pub struct QualityScoreCheck;

impl SlaCheck for QualityScoreCheck {
    fn name(&self) -> &str {
        QUALITY_SCORE
    }

    fn evaluate(&self, ctx: &SlaContext<'_>) -> Option<SlaViolation> {
        let required = ctx.sla.required_quality_score?;
        let actual = ctx.output?.get("qualityScore")?.as_f64()?;
        (actual < required).then(|| SlaViolation {
            violation_type: QUALITY_SCORE.to_string(),
            expected: required,
            actual,
            severity: ViolationSeverity::Warning,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ExecutionStatus;
    use crate::stage::{StageResult, StageStatus};
    use serde_json::json;

    fn report(statuses: &[StageStatus]) -> ExecutionReport {
        ExecutionReport {
            status: ExecutionStatus::Completed,
            stages: statuses
                .iter()
                .enumerate()
                .map(|(i, s)| StageResult {
                    stage_id: format!("s{i}"),
                    name: format!("s{i}"),
                    status: *s,
                    execution_time_ms: 0,
                    records_processed: 0,
                    error: None,
                })
                .collect(),
            sla_violations: Vec::new(),
        }
    }

    #[test]
    fn test_execution_time_breach_is_critical() {
        let sla = SlaConfig {
            max_execution_time: Duration::from_millis(100),
            ..Default::default()
        };
        let report = report(&[StageStatus::Completed]);
        let ctx = SlaContext {
            sla: &sla,
            report: &report,
            elapsed: Duration::from_millis(150),
            output: None,
        };
        let violations = builtin_violations(&ctx);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].violation_type, EXECUTION_TIME);
        assert_eq!(violations[0].expected, 100.0);
        assert!(violations[0].is_critical());
    }

    #[test]
    fn test_error_rate_breach() {
        let sla = SlaConfig {
            max_error_rate: 0.25,
            ..Default::default()
        };
        let report = report(&[StageStatus::Completed, StageStatus::Failed, StageStatus::Pending]);
        let ctx = SlaContext {
            sla: &sla,
            report: &report,
            elapsed: Duration::ZERO,
            output: None,
        };
        let violations = builtin_violations(&ctx);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].violation_type, ERROR_RATE);
        assert!((violations[0].actual - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_quality_check_warns_below_requirement() {
        let sla = SlaConfig {
            required_quality_score: Some(0.8),
            ..Default::default()
        };
        let report = report(&[StageStatus::Completed]);
        let low = json!({ "qualityScore": 0.6 });
        let high = json!({ "qualityScore": 0.9 });
        let mut ctx = SlaContext {
            sla: &sla,
            report: &report,
            elapsed: Duration::ZERO,
            output: Some(&low),
        };

        let violation = QualityScoreCheck.evaluate(&ctx).unwrap();
        assert_eq!(violation.severity, ViolationSeverity::Warning);
        ctx.output = Some(&high);
        assert!(QualityScoreCheck.evaluate(&ctx).is_none());
        ctx.output = None;
        assert!(QualityScoreCheck.evaluate(&ctx).is_none());
    }
}
