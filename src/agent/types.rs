//! Types shared by the pipeline stages.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

// =============================================================================
// Stages
// =============================================================================

/// The four pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Plan,
    Execute,
    Reflect,
    Aggregate,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Plan, Stage::Execute, Stage::Reflect, Stage::Aggregate];

    /// Transitions are unconditional and linear.
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Plan => Some(Stage::Execute),
            Stage::Execute => Some(Stage::Reflect),
            Stage::Reflect => Some(Stage::Aggregate),
            Stage::Aggregate => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Plan => "plan",
            Stage::Execute => "execute",
            Stage::Reflect => "reflect",
            Stage::Aggregate => "aggregate",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Plan steps
// =============================================================================

/// Semantic category of a plan step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepLabel {
    Confidence,
    Classification,
    Justification,
    Recommendation,
    Other,
}

impl StepLabel {
    /// Keyword cues, checked in precedence order.
    pub fn classify(instruction: &str) -> Self {
        let lower = instruction.to_lowercase();
        if lower.contains("confidence score") {
            StepLabel::Confidence
        } else if lower.contains("classify") || lower.contains("anomaly type") {
            StepLabel::Classification
        } else if lower.contains("justify") {
            StepLabel::Justification
        } else if lower.contains("recommend") || lower.contains("investigat") {
            StepLabel::Recommendation
        } else {
            StepLabel::Other
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            StepLabel::Confidence => "Confidence Scoring",
            StepLabel::Classification => "Anomaly Classification",
            StepLabel::Justification => "Justification",
            StepLabel::Recommendation => "Follow-up Recommendation",
            StepLabel::Other => "Additional Analysis",
        }
    }
}

/// One step extracted from the plan response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDescriptor {
    /// 1-based step number as written by the model.
    pub index: usize,
    pub label: StepLabel,
    pub instruction_text: String,
}

impl StepDescriptor {
    pub fn new(index: usize, instruction_text: impl Into<String>) -> Self {
        let instruction_text = instruction_text.into();
        Self {
            index,
            label: StepLabel::classify(&instruction_text),
            instruction_text,
        }
    }

    /// Result key this step's output is stored under.
    pub fn key(&self) -> String {
        result_key(self.index)
    }
}

/// Result keys for the first four step positions.
pub const STEP_KEYS: [&str; 4] = ["assign", "classify", "justify", "recommend"];

/// Positional key for step `index`; `step_{index}` outside the first four.
pub fn result_key(index: usize) -> String {
    match index {
        1..=4 => STEP_KEYS[index - 1].to_string(),
        _ => format!("step_{index}"),
    }
}

// =============================================================================
// Step results
// =============================================================================

/// Outcome of one executor task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepResult {
    pub key: String,
    pub index: usize,
    /// Model output, or a readable error description when `succeeded` is false.
    pub value: String,
    pub succeeded: bool,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
}

fn serialize_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// Executor results by key.
pub type StepOutputs = BTreeMap<String, StepResult>;

/// Field name to text; the shape reflection and aggregation work on.
pub type OutputFields = BTreeMap<String, String>;

/// Project step results onto their text values.
pub fn output_fields(outputs: &StepOutputs) -> OutputFields {
    outputs
        .iter()
        .map(|(k, r)| (k.clone(), r.value.clone()))
        .collect()
}

/// Value for `key`, or "" when the step never produced one.
pub fn field<'a>(fields: &'a OutputFields, key: &str) -> &'a str {
    fields.get(key).map(String::as_str).unwrap_or("")
}

// =============================================================================
// Run state
// =============================================================================

/// Per-request record threaded through the pipeline.
///
/// Each field is owned by exactly one stage and written once; the controller
/// merges stage updates through [`RunState::apply`].
#[derive(Debug, Clone, Serialize)]
pub struct RunState {
    pub run_id: Uuid,
    raw_text: String,
    plan: Option<Vec<StepDescriptor>>,
    step_outputs: Option<StepOutputs>,
    reflection: Option<String>,
    final_output: Option<OutputFields>,
}

/// Partial update returned by a stage.
#[derive(Debug, Clone)]
pub enum StageUpdate {
    Plan(Vec<StepDescriptor>),
    Execute(StepOutputs),
    Reflect(String),
    Aggregate(OutputFields),
}

impl StageUpdate {
    pub fn stage(&self) -> Stage {
        match self {
            StageUpdate::Plan(_) => Stage::Plan,
            StageUpdate::Execute(_) => Stage::Execute,
            StageUpdate::Reflect(_) => Stage::Reflect,
            StageUpdate::Aggregate(_) => Stage::Aggregate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("{stage} stage already wrote its output")]
    AlreadyWritten { stage: Stage },
    #[error("{stage} stage ran before {missing} produced its output")]
    OutOfOrder { stage: Stage, missing: Stage },
}

impl RunState {
    pub fn new(raw_text: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4(), raw_text)
    }

    pub fn with_id(run_id: Uuid, raw_text: impl Into<String>) -> Self {
        Self {
            run_id,
            raw_text: raw_text.into(),
            plan: None,
            step_outputs: None,
            reflection: None,
            final_output: None,
        }
    }

    pub fn raw_text(&self) -> &str {
        &self.raw_text
    }

    pub fn plan(&self) -> &[StepDescriptor] {
        self.plan.as_deref().unwrap_or(&[])
    }

    pub fn step_outputs(&self) -> Option<&StepOutputs> {
        self.step_outputs.as_ref()
    }

    pub fn reflection(&self) -> Option<&str> {
        self.reflection.as_deref()
    }

    pub fn final_output(&self) -> Option<&OutputFields> {
        self.final_output.as_ref()
    }

    /// Whether `stage` has written its field.
    pub fn is_complete(&self, stage: Stage) -> bool {
        match stage {
            Stage::Plan => self.plan.is_some(),
            Stage::Execute => self.step_outputs.is_some(),
            Stage::Reflect => self.reflection.is_some(),
            Stage::Aggregate => self.final_output.is_some(),
        }
    }

    /// Merge a stage update, rejecting rewrites and out-of-order stages.
    pub fn apply(&mut self, update: StageUpdate) -> Result<(), StateError> {
        let stage = update.stage();
        if self.is_complete(stage) {
            return Err(StateError::AlreadyWritten { stage });
        }
        if let Some(missing) = Stage::ALL
            .iter()
            .take_while(|s| **s != stage)
            .find(|s| !self.is_complete(**s))
        {
            return Err(StateError::OutOfOrder {
                stage,
                missing: *missing,
            });
        }

        match update {
            StageUpdate::Plan(plan) => self.plan = Some(plan),
            StageUpdate::Execute(outputs) => self.step_outputs = Some(outputs),
            StageUpdate::Reflect(reflection) => self.reflection = Some(reflection),
            StageUpdate::Aggregate(fields) => self.final_output = Some(fields),
        }
        Ok(())
    }
}
