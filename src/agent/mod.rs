//! Anomaly analysis pipeline.
//!
//! The controller runs four stages in a fixed order:
//! 1. **Plan**: ask the model for a step list and parse it
//! 2. **Execute**: one concurrent model call per step (failures stay per step)
//! 3. **Reflect**: one call judging the step outputs
//! 4. **Aggregate**: pass outputs through, or rewrite the justification
//!
//! Each stage returns a [`StageUpdate`] that the controller merges into the
//! run's [`RunState`]. Model failures in Plan, Reflect or Aggregate end the
//! run; nothing is retried here.

pub mod aggregate;
pub mod execute;
pub mod model;
pub mod plan;
pub mod reflect;
pub mod types;

use std::time::Instant;

use serde::Serialize;
use uuid::Uuid;

use crate::cluster::{partition, Cluster, UNKNOWN_CLUSTER};
use crate::gateway::ProviderError;
use crate::report::AnalysisReport;
use crate::trace::{NoopObserver, RunEvent, RunEventKind, RunObserver};

pub use aggregate::{aggregate, AggregateBranch, Aggregation};
pub use execute::execute;
pub use model::AnalystModel;
pub use plan::{missing_steps, parse_plan, run_plan};
pub use reflect::{reflect, Verdict};
pub use types::*;

/// Steps the plan prompt asks for unless configured otherwise.
pub const DEFAULT_EXPECTED_STEPS: usize = 4;

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("plan stage failed: {0}")]
    Plan(#[source] ProviderError),
    #[error("reflect stage failed: {0}")]
    Reflect(#[source] ProviderError),
    #[error("aggregate stage failed: {0}")]
    Aggregate(#[source] ProviderError),
    #[error("run state violation: {0}")]
    State(#[from] StateError),
}

impl PipelineError {
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::Plan(_) => Some(Stage::Plan),
            PipelineError::Reflect(_) => Some(Stage::Reflect),
            PipelineError::Aggregate(_) => Some(Stage::Aggregate),
            PipelineError::State(_) => None,
        }
    }
}

// =============================================================================
// Controller
// =============================================================================

#[derive(Debug, Clone)]
pub struct AnalysisPipeline {
    model: AnalystModel,
    expected_steps: usize,
}

impl AnalysisPipeline {
    pub fn new(model: AnalystModel) -> Self {
        Self {
            model,
            expected_steps: DEFAULT_EXPECTED_STEPS,
        }
    }

    pub fn expected_steps(mut self, n: usize) -> Self {
        self.expected_steps = n;
        self
    }

    pub fn model(&self) -> &AnalystModel {
        &self.model
    }

    /// Run the pipeline over `raw_text` with no observer.
    pub async fn run(&self, raw_text: &str) -> Result<RunState, PipelineError> {
        self.run_observed(raw_text, &NoopObserver).await
    }

    /// Run the pipeline over `raw_text`, reporting progress to `observer`.
    pub async fn run_observed(
        &self,
        raw_text: &str,
        observer: &dyn RunObserver,
    ) -> Result<RunState, PipelineError> {
        let mut state = RunState::new(raw_text);
        let run_id = state.run_id;
        let model = self.model.for_run(run_id);

        if raw_text.trim().is_empty() {
            tracing::info!(%run_id, "blank input, skipping model calls");
            state.apply(StageUpdate::Plan(Vec::new()))?;
            state.apply(StageUpdate::Execute(StepOutputs::new()))?;
            state.apply(StageUpdate::Reflect(String::new()))?;
            state.apply(StageUpdate::Aggregate(OutputFields::new()))?;
            return Ok(state);
        }

        tracing::info!(%run_id, model = model.model_id(), "starting analysis run");

        let mut next = Some(Stage::Plan);
        while let Some(stage) = next {
            observer.on_event(RunEvent::new(run_id, RunEventKind::StageStarted { stage }));
            let start = Instant::now();

            let update = self.run_stage(stage, &state, &model, observer).await?;
            state.apply(update)?;

            let elapsed_ms = start.elapsed().as_millis() as u64;
            tracing::info!(%run_id, %stage, elapsed_ms, "stage finished");
            observer.on_event(RunEvent::new(
                run_id,
                RunEventKind::StageFinished { stage, elapsed_ms },
            ));
            next = stage.next();
        }

        Ok(state)
    }

    async fn run_stage(
        &self,
        stage: Stage,
        state: &RunState,
        model: &AnalystModel,
        observer: &dyn RunObserver,
    ) -> Result<StageUpdate, PipelineError> {
        let run_id = state.run_id;
        match stage {
            Stage::Plan => {
                let steps = run_plan(model, state.raw_text(), self.expected_steps)
                    .await
                    .map_err(PipelineError::Plan)?;
                observer.on_event(RunEvent::new(
                    run_id,
                    RunEventKind::PlanParsed {
                        expected: self.expected_steps,
                        parsed: steps.len(),
                        missing: missing_steps(&steps, self.expected_steps),
                    },
                ));
                Ok(StageUpdate::Plan(steps))
            }
            Stage::Execute => {
                let outputs = execute(model, state.plan(), state.raw_text()).await;
                let mut ordered: Vec<&StepResult> = outputs.values().collect();
                ordered.sort_by_key(|r| r.index);
                for result in ordered {
                    observer.on_event(RunEvent::new(
                        run_id,
                        RunEventKind::StepFinished {
                            key: result.key.clone(),
                            index: result.index,
                            succeeded: result.succeeded,
                            duration_ms: result.duration.as_millis() as u64,
                        },
                    ));
                }
                Ok(StageUpdate::Execute(outputs))
            }
            Stage::Reflect => {
                let fields = current_fields(state, stage)?;
                let reflection = reflect(model, &fields)
                    .await
                    .map_err(PipelineError::Reflect)?;
                observer.on_event(RunEvent::new(
                    run_id,
                    RunEventKind::Reflected {
                        verdict: Verdict::of(&reflection),
                    },
                ));
                Ok(StageUpdate::Reflect(reflection))
            }
            Stage::Aggregate => {
                let fields = current_fields(state, stage)?;
                let reflection = state.reflection().ok_or(StateError::OutOfOrder {
                    stage,
                    missing: Stage::Reflect,
                })?;
                let aggregation = aggregate(model, &fields, reflection)
                    .await
                    .map_err(PipelineError::Aggregate)?;
                observer.on_event(RunEvent::new(
                    run_id,
                    RunEventKind::Aggregated {
                        branch: aggregation.branch,
                    },
                ));
                Ok(StageUpdate::Aggregate(aggregation.fields))
            }
        }
    }
}

fn current_fields(state: &RunState, stage: Stage) -> Result<OutputFields, StateError> {
    state
        .step_outputs()
        .map(output_fields)
        .ok_or(StateError::OutOfOrder {
            stage,
            missing: Stage::Execute,
        })
}

// =============================================================================
// Cluster-wise analysis
// =============================================================================

/// Report for one cluster of anomaly records.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterReport {
    pub cluster_id: String,
    pub member_count: usize,
    pub run_id: Uuid,
    pub report: AnalysisReport,
}

/// Cluster id of the single report produced over all records at once.
pub const ALL_CLUSTERS: &str = "all";

/// Partition `raw_text` and run the pipeline once over every record found.
///
/// Records are joined in cluster order; text outside records never reaches
/// the model. Zero records runs the pipeline on empty input, which makes no
/// model calls and yields four empty fields.
pub async fn analyze_records(
    pipeline: &AnalysisPipeline,
    raw_text: &str,
    observer: &dyn RunObserver,
) -> Result<ClusterReport, PipelineError> {
    let clusters = partition(raw_text);
    if clusters.is_empty() {
        tracing::warn!("no anomaly records found in input");
    }
    let member_count = clusters.iter().map(|c| c.members.len()).sum();
    let text = clusters
        .iter()
        .map(Cluster::text)
        .collect::<Vec<_>>()
        .join("\n\n");

    let state = pipeline.run_observed(&text, observer).await?;
    Ok(ClusterReport {
        cluster_id: ALL_CLUSTERS.to_string(),
        member_count,
        run_id: state.run_id,
        report: AnalysisReport::from_state(&state),
    })
}

/// Partition `raw_text` and run the pipeline once per cluster, in cluster order.
///
/// Zero clusters still yields one report: an `unknown` cluster with no
/// members, four empty fields and no model calls. The first fatal stage
/// failure ends the whole analysis.
pub async fn analyze_clusters(
    pipeline: &AnalysisPipeline,
    raw_text: &str,
    observer: &dyn RunObserver,
) -> Result<Vec<ClusterReport>, PipelineError> {
    let mut clusters = partition(raw_text);
    if clusters.is_empty() {
        tracing::warn!("no anomaly records found in input");
        clusters.push(Cluster {
            cluster_id: UNKNOWN_CLUSTER.to_string(),
            members: Vec::new(),
        });
    }

    let mut reports = Vec::with_capacity(clusters.len());
    for cluster in clusters {
        tracing::info!(
            cluster = %cluster.cluster_id,
            members = cluster.members.len(),
            "analyzing cluster"
        );
        let state = pipeline.run_observed(&cluster.text(), observer).await?;
        reports.push(ClusterReport {
            member_count: cluster.members.len(),
            run_id: state.run_id,
            report: AnalysisReport::from_state(&state),
            cluster_id: cluster.cluster_id,
        });
    }
    Ok(reports)
}
