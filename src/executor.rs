//! Live end-to-end orchestration: lifts a combinatorial spec into a
//! graph, optionally explores it, and replays every combination's
//! setup sequence against a live client.

use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::combinatorial_builder::CombinatorialGraphBuilder;
use crate::context::Context;
use crate::dimension::Combination;
use crate::error::BuilderError;
use crate::exploration::{explore, ExplorationResult};
use crate::state_graph::{Action, ResetState};

/// The outcome of replaying one combination's entry-action sequence.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub combination_id: String,
    pub combination: serde_json::Value,
    pub success: bool,
    pub error: Option<String>,
    pub traceback: Option<String>,
    pub duration_ms: f64,
    pub timestamp: DateTime<Utc>,
    pub last_response: Option<serde_json::Value>,
    pub context_snapshot: serde_json::Value,
}

/// Aggregate of one `execute` call: builder identity, every
/// per-combination [`StepResult`], and the optional graph
/// [`ExplorationResult`].
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub builder_name: String,
    pub strength: usize,
    pub combination_count: usize,
    pub steps: Vec<StepResult>,
    pub exploration: Option<ExplorationResult>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn success_rate(&self) -> f64 {
        if self.steps.is_empty() {
            return 0.0;
        }
        let passed = self.steps.iter().filter(|s| s.success).count();
        (passed as f64 / self.steps.len() as f64) * 100.0
    }

    pub fn total_wall_time_ms(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64
    }

    pub fn average_step_time_ms(&self) -> f64 {
        if self.steps.is_empty() {
            return 0.0;
        }
        self.steps.iter().map(|s| s.duration_ms).sum::<f64>() / self.steps.len() as f64
    }

    pub fn failed_steps(&self) -> impl Iterator<Item = &StepResult> {
        self.steps.iter().filter(|s| !s.success)
    }

    /// Human-readable summary: counts, rates, and timings.
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("Execution of {} at strength {}", self.builder_name, self.strength),
            format!("Combinations: {}", self.combination_count),
            format!(
                "Step success rate: {:.1}% ({}/{})",
                self.success_rate(),
                self.steps.iter().filter(|s| s.success).count(),
                self.steps.len()
            ),
            format!("Total wall time: {:.1}ms", self.total_wall_time_ms()),
            format!("Average step time: {:.1}ms", self.average_step_time_ms()),
        ];
        match &self.exploration {
            Some(exploration) => lines.push(format!(
                "Exploration: {} paths ({} successful, {} failed), {} violations",
                exploration.total_paths(),
                exploration.successful_paths(),
                exploration.failed_paths(),
                exploration.violations.len()
            )),
            None => lines.push("Exploration: not run".to_string()),
        }
        lines.join("\n")
    }

    /// A Markdown bug report listing every failed combination replay
    /// and every invariant violation observed during exploration.
    pub fn bug_report(&self) -> String {
        let mut lines = vec![format!("# Bug report: {}", self.builder_name)];

        let failed: Vec<&StepResult> = self.failed_steps().collect();
        if failed.is_empty() {
            lines.push("No failed combination replays.".to_string());
        } else {
            lines.push(format!("## Failed combinations ({})", failed.len()));
            for step in failed {
                lines.push(format!(
                    "- `{}`: {}",
                    step.combination_id,
                    step.error.as_deref().unwrap_or("unknown error")
                ));
            }
        }

        match &self.exploration {
            Some(exploration) if !exploration.violations.is_empty() => {
                lines.push(format!("\n## Invariant violations ({})", exploration.violations.len()));
                for violation in &exploration.violations {
                    lines.push(format!(
                        "- `{}` at `{}` ({}): {}",
                        violation.invariant_name,
                        violation.node_id,
                        violation.severity,
                        violation.error_message.as_deref().unwrap_or(&violation.description)
                    ));
                }
            }
            Some(_) => lines.push("\nNo invariant violations observed during exploration.".to_string()),
            None => {}
        }

        lines.join("\n")
    }
}

/// Orchestrates building, exploring, and replaying a combinatorial
/// spec against a live system under test.
pub struct CombinatorialExecutor<'a, C, D> {
    builder: &'a CombinatorialGraphBuilder<C, D>,
}

impl<'a, C: 'static, D: 'static> CombinatorialExecutor<'a, C, D> {
    pub fn new(builder: &'a CombinatorialGraphBuilder<C, D>) -> Self {
        Self { builder }
    }

    /// Builds a journey graph at `strength`, optionally explores it
    /// (Phase A), then replays every combination's setup sequence
    /// (Phase B). A Phase A failure is logged and leaves the
    /// exploration result absent; Phase B always runs regardless.
    /// Never performs a preflight connectivity check -- a caller
    /// wanting one should run [`Self::execute_single`] against one
    /// combination first.
    #[allow(clippy::too_many_arguments)]
    pub fn execute(
        &self,
        client: &C,
        store: Option<&D>,
        strength: usize,
        max_depth: usize,
        stop_on_first_failure: bool,
        explore_graph: bool,
        stop_exploration_on_violation: bool,
        reset_state: Option<&dyn ResetState>,
    ) -> Result<ExecutionResult, BuilderError> {
        let started_at = Utc::now();
        let (graph, combinations) = self.builder.build_journey_graph(strength)?;

        let exploration = if explore_graph {
            match explore(
                &graph,
                client,
                store,
                max_depth,
                stop_exploration_on_violation,
                reset_state,
            ) {
                Ok(result) => Some(result),
                Err(error) => {
                    tracing::warn!(
                        error = %error,
                        "graph exploration phase failed; continuing with combination replay only"
                    );
                    None
                }
            }
        } else {
            None
        };

        let mut steps = Vec::with_capacity(combinations.len());
        for combination in &combinations {
            let step = self.execute_single(combination, client);
            let failed = !step.success;
            steps.push(step);
            if failed && stop_on_first_failure {
                break;
            }
        }

        Ok(ExecutionResult {
            builder_name: self.builder.name().to_string(),
            strength,
            combination_count: combinations.len(),
            steps,
            exploration,
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Replays one combination's registered setup actions, in
    /// dimension-name-sorted order, against `client`. Seeds the
    /// context with `"_current_combination"` and records the last
    /// response produced; any setup error aborts the remaining
    /// setups for this combination.
    pub fn execute_single(&self, combination: &Combination, client: &C) -> StepResult {
        let combination_id = combination.node_id();
        let combination_json = combination.to_json();
        let mut context = Context::new();
        context.set_current_combination(combination_json.clone());

        let mut dims: Vec<&String> = combination.values().keys().collect();
        dims.sort();

        let start = Instant::now();
        let mut last_response = None;
        let mut error = None;

        for dim in dims {
            let value = combination.get(dim).expect("dim came from this combination");
            let Some(action) = self.builder.setup_for(dim, value) else {
                continue;
            };
            match action.run(client, &mut context) {
                Ok(response) => last_response = response.json(),
                Err(message) => {
                    error = Some(message);
                    break;
                }
            }
        }

        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
        StepResult {
            combination_id,
            combination: combination_json,
            success: error.is_none(),
            // Actions report failure as a plain `String`, not a caught
            // exception, so there is no backtrace to carry here.
            traceback: None,
            error,
            duration_ms,
            timestamp: Utc::now(),
            last_response,
            context_snapshot: context.to_json(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::ConstraintSet;
    use crate::context::ActionResponse;
    use crate::dimension::{Dimension, DimensionSpace};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    fn stage_space(values: &[&str]) -> DimensionSpace {
        let values: Vec<_> = values.iter().map(|v| (*v).into()).collect();
        DimensionSpace::new(vec![Dimension::new("stage", values, None, None).unwrap()]).unwrap()
    }

    #[test]
    fn execute_single_records_a_setup_failure() {
        let space = stage_space(&["a", "b"]);
        let mut builder: CombinatorialGraphBuilder<(), ()> =
            CombinatorialGraphBuilder::new("stages", space, ConstraintSet::default());
        builder
            .register_setup("stage", "b".into(), |_: &(), _: &mut Context| {
                Err("boom".to_string())
            })
            .unwrap();
        let executor = CombinatorialExecutor::new(&builder);

        let ok_combo = builder
            .space()
            .combination_from(HashMap::from([("stage".to_string(), "a".into())]))
            .unwrap();
        let ok_step = executor.execute_single(&ok_combo, &());
        assert!(ok_step.success);
        assert!(ok_step.error.is_none());

        let failing_combo = builder
            .space()
            .combination_from(HashMap::from([("stage".to_string(), "b".into())]))
            .unwrap();
        let failed_step = executor.execute_single(&failing_combo, &());
        assert!(!failed_step.success);
        assert_eq!(failed_step.error.as_deref(), Some("boom"));
        assert!(failed_step.last_response.is_none());
    }

    #[test]
    fn execute_single_runs_setups_in_dimension_name_order() {
        let space = DimensionSpace::new(vec![
            Dimension::new("a", vec![1i64.into()], None, None).unwrap(),
            Dimension::new("b", vec![1i64.into()], None, None).unwrap(),
        ])
        .unwrap();
        let mut builder: CombinatorialGraphBuilder<(), ()> =
            CombinatorialGraphBuilder::new("order", space, ConstraintSet::default());
        let order = Arc::new(Mutex::new(Vec::new()));

        let order_a = order.clone();
        builder
            .register_setup("a", 1i64.into(), move |_: &(), _: &mut Context| {
                order_a.lock().unwrap().push("a".to_string());
                Ok(Box::new(()) as Box<dyn ActionResponse>)
            })
            .unwrap();
        let order_b = order.clone();
        builder
            .register_setup("b", 1i64.into(), move |_: &(), _: &mut Context| {
                order_b.lock().unwrap().push("b".to_string());
                Ok(Box::new(()) as Box<dyn ActionResponse>)
            })
            .unwrap();

        let executor = CombinatorialExecutor::new(&builder);
        let combo = builder
            .space()
            .combination_from(HashMap::from([
                ("a".to_string(), 1i64.into()),
                ("b".to_string(), 1i64.into()),
            ]))
            .unwrap();
        let step = executor.execute_single(&combo, &());
        assert!(step.success);
        assert_eq!(*order.lock().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn execute_runs_every_combination_when_not_stopping_on_failure() {
        let space = stage_space(&["a", "b"]);
        let mut builder: CombinatorialGraphBuilder<(), ()> =
            CombinatorialGraphBuilder::new("stages", space, ConstraintSet::default());
        builder
            .register_setup("stage", "b".into(), |_: &(), _: &mut Context| {
                Err("boom".to_string())
            })
            .unwrap();
        let executor = CombinatorialExecutor::new(&builder);

        let result = executor
            .execute(&(), None, 2, 10, false, true, false, None)
            .unwrap();
        assert_eq!(result.combination_count, 2);
        assert_eq!(result.steps.len(), 2);
        assert_eq!(result.success_rate(), 50.0);
        let exploration = result.exploration.expect("exploration was requested");
        assert_eq!(exploration.total_paths(), 1);
    }

    #[test]
    fn execute_stops_at_the_first_failure_when_requested() {
        let space = stage_space(&["a", "b", "c"]);
        let mut builder: CombinatorialGraphBuilder<(), ()> =
            CombinatorialGraphBuilder::new("stages", space, ConstraintSet::default());
        builder
            .register_setup("stage", "b".into(), |_: &(), _: &mut Context| {
                Err("boom".to_string())
            })
            .unwrap();
        builder
            .register_setup("stage", "c".into(), |_: &(), _: &mut Context| {
                Err("never reached".to_string())
            })
            .unwrap();
        let executor = CombinatorialExecutor::new(&builder);

        let result = executor
            .execute(&(), None, 1, 10, true, false, false, None)
            .unwrap();
        assert_eq!(result.combination_count, 3);
        assert_eq!(result.steps.len(), 2);
        assert!(result.exploration.is_none());
        assert!(result.summary().contains("Exploration: not run"));
        let report = result.bug_report();
        assert!(report.contains("Failed combinations (1)"));
        assert!(report.contains("stage=b"));
    }

    #[test]
    fn success_rate_is_zero_percent_with_no_steps() {
        let now = Utc::now();
        let result = ExecutionResult {
            builder_name: "empty".to_string(),
            strength: 1,
            combination_count: 0,
            steps: Vec::new(),
            exploration: None,
            started_at: now,
            finished_at: now,
        };
        assert_eq!(result.success_rate(), 0.0);
        assert_eq!(result.average_step_time_ms(), 0.0);
    }
}
