//! Execute stage: one concurrent model call per plan step.

use std::collections::HashSet;
use std::time::Instant;

use futures::stream::{self, StreamExt};

use crate::prompts;

use super::model::AnalystModel;
use super::types::{StepDescriptor, StepOutputs, StepResult};

/// Run every step concurrently and wait for all of them.
///
/// A failed call becomes a `succeeded = false` result carrying the error
/// text; it never cancels or fails its siblings. Each task owns its own
/// result, merged into the map after the join. Step indices are keys, so
/// only the first descriptor with a given index runs.
pub async fn execute(model: &AnalystModel, steps: &[StepDescriptor], raw_text: &str) -> StepOutputs {
    let mut seen = HashSet::new();
    let steps: Vec<&StepDescriptor> = steps
        .iter()
        .filter(|step| {
            let first = seen.insert(step.index);
            if !first {
                tracing::warn!(step = step.index, "duplicate step index, skipping");
            }
            first
        })
        .collect();
    if steps.is_empty() {
        return StepOutputs::new();
    }

    let tasks = steps.iter().map(|&step| {
        let prompt = prompts::step_prompt(&step.instruction_text, raw_text);
        async move {
            let key = step.key();
            tracing::info!(step = step.index, key = %key, label = step.label.title(), "executing step");

            let start = Instant::now();
            let outcome = model.invoke("agent::execute", &prompt).await;
            let duration = start.elapsed();

            match outcome {
                Ok(value) => {
                    tracing::info!(
                        key = %key,
                        elapsed_ms = duration.as_millis() as u64,
                        "step completed"
                    );
                    StepResult {
                        key,
                        index: step.index,
                        value,
                        succeeded: true,
                        duration,
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        key = %key,
                        elapsed_ms = duration.as_millis() as u64,
                        error = %err,
                        "step failed"
                    );
                    StepResult {
                        key,
                        index: step.index,
                        value: format!("step {} failed: {err}", step.index),
                        succeeded: false,
                        duration,
                    }
                }
            }
        }
    });

    let results: Vec<StepResult> = stream::iter(tasks)
        .buffer_unordered(steps.len())
        .collect()
        .await;

    let mut outputs = StepOutputs::new();
    for result in results {
        outputs.insert(result.key.clone(), result);
    }
    outputs
}
