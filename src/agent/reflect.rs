//! Reflect stage: one call judging whether the step outputs need revision.

use serde::Serialize;

use crate::gateway::ProviderError;
use crate::prompts::{self, AFFIRMATIVE_PREFIX};

use super::model::AnalystModel;
use super::types::{field, OutputFields};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    AllGood,
    NeedsRevision,
}

impl Verdict {
    /// Affirmative iff the reflection starts with "all good", ignoring case.
    pub fn of(reflection: &str) -> Self {
        let head: String = reflection
            .trim_start()
            .chars()
            .take(AFFIRMATIVE_PREFIX.len())
            .collect();
        if head.to_lowercase() == AFFIRMATIVE_PREFIX {
            Verdict::AllGood
        } else {
            Verdict::NeedsRevision
        }
    }
}

/// Ask the model to review the confidence, type and justification outputs.
///
/// Returns the trimmed reply verbatim; only [`Verdict::of`] interprets it.
pub async fn reflect(model: &AnalystModel, fields: &OutputFields) -> Result<String, ProviderError> {
    let prompt = prompts::reflection_prompt(
        field(fields, "assign"),
        field(fields, "classify"),
        field(fields, "justify"),
    );
    let reflection = model.invoke("agent::reflect", &prompt).await?;
    tracing::info!(verdict = ?Verdict::of(&reflection), "reflection completed");
    Ok(reflection)
}
