//! Aggregate stage: keep the step outputs or rewrite the justification.

use serde::Serialize;

use crate::gateway::ProviderError;
use crate::prompts;

use super::model::AnalystModel;
use super::reflect::Verdict;
use super::types::{field, OutputFields};

/// Field the rewrite branch replaces.
pub const REWRITE_FIELD: &str = "justify";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateBranch {
    NoRewrite,
    Rewrite,
}

impl From<Verdict> for AggregateBranch {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::AllGood => AggregateBranch::NoRewrite,
            Verdict::NeedsRevision => AggregateBranch::Rewrite,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregation {
    pub branch: AggregateBranch,
    pub fields: OutputFields,
}

/// Produce the final output fields.
///
/// An affirmative reflection passes `fields` through with no model call.
/// Otherwise one call rewrites `justify`; every other field is copied as is.
pub async fn aggregate(
    model: &AnalystModel,
    fields: &OutputFields,
    reflection: &str,
) -> Result<Aggregation, ProviderError> {
    let branch = AggregateBranch::from(Verdict::of(reflection));
    match branch {
        AggregateBranch::NoRewrite => {
            tracing::info!("no rewrite needed");
            Ok(Aggregation {
                branch,
                fields: fields.clone(),
            })
        }
        AggregateBranch::Rewrite => {
            tracing::info!("rewriting justification");
            let prompt = prompts::rewrite_prompt(field(fields, REWRITE_FIELD), reflection);
            let rewritten = model.invoke("agent::aggregate", &prompt).await?;

            let mut updated = fields.clone();
            updated.insert(REWRITE_FIELD.to_string(), rewritten);
            Ok(Aggregation {
                branch,
                fields: updated,
            })
        }
    }
}
