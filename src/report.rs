//! Final analysis reports and their console rendering.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::agent::{AnalystModel, OutputFields, RunState, STEP_KEYS};
use crate::gateway::ProviderError;
use crate::prompts;

/// Placeholder the SOC mode stores in every field except `justify`.
pub const SOC_READY: &str = "SOC Report Ready";

/// Team name used in SOC reports when none is given.
pub const DEFAULT_SOC_TEAM: &str = "SOC Team";

/// The four named output fields plus anything a longer plan produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub assign: String,
    pub classify: String,
    pub justify: String,
    pub recommend: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl AnalysisReport {
    /// Missing named fields become empty strings.
    pub fn from_fields(mut fields: OutputFields) -> Self {
        let mut take = |key: &str| fields.remove(key).unwrap_or_default();
        let assign = take("assign");
        let classify = take("classify");
        let justify = take("justify");
        let recommend = take("recommend");
        Self {
            assign,
            classify,
            justify,
            recommend,
            extra: fields,
        }
    }

    /// Report for a finished run; empty if the run never aggregated.
    pub fn from_state(state: &RunState) -> Self {
        state
            .final_output()
            .cloned()
            .map(Self::from_fields)
            .unwrap_or_default()
    }

    pub fn into_fields(self) -> OutputFields {
        let mut fields = self.extra;
        for (key, value) in STEP_KEYS.iter().zip([
            self.assign,
            self.classify,
            self.justify,
            self.recommend,
        ]) {
            fields.insert((*key).to_string(), value);
        }
        fields
    }

    pub fn is_empty(&self) -> bool {
        self.assign.is_empty()
            && self.classify.is_empty()
            && self.justify.is_empty()
            && self.recommend.is_empty()
            && self.extra.is_empty()
    }
}

/// Plain-text report for terminal output.
pub fn render_report_text(report: &AnalysisReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== Final Anomaly Report ===");
    let sections = [
        ("Confidence Score", &report.assign),
        ("Anomaly Type", &report.classify),
        ("Justification", &report.justify),
        ("Recommendation", &report.recommend),
    ];
    for (title, value) in sections {
        let _ = writeln!(out, "\n{title}:\n{}", display_value(value));
    }
    for (key, value) in &report.extra {
        let _ = writeln!(out, "\n{key}:\n{}", display_value(value));
    }
    out
}

fn display_value(value: &str) -> &str {
    if value.trim().is_empty() {
        "(none)"
    } else {
        value
    }
}

/// One-call SOC report for a cluster treated as a single event.
///
/// Blank input makes no call and returns an empty report.
pub async fn soc_report(
    model: &AnalystModel,
    raw_text: &str,
    team: &str,
) -> Result<AnalysisReport, ProviderError> {
    if raw_text.trim().is_empty() {
        return Ok(AnalysisReport::default());
    }
    let prompt = prompts::soc_report_prompt(raw_text, team);
    let body = model.invoke("report::soc", &prompt).await?;
    Ok(AnalysisReport {
        assign: SOC_READY.to_string(),
        classify: SOC_READY.to_string(),
        justify: body,
        recommend: SOC_READY.to_string(),
        extra: BTreeMap::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> OutputFields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn from_fields_splits_named_and_extra() {
        let report = AnalysisReport::from_fields(fields(&[
            ("assign", "85"),
            ("justify", "burst of SYN"),
            ("step_5", "extra work"),
        ]));
        assert_eq!(report.assign, "85");
        assert_eq!(report.classify, "");
        assert_eq!(report.justify, "burst of SYN");
        assert_eq!(report.extra.get("step_5").map(String::as_str), Some("extra work"));

        let back = report.into_fields();
        assert_eq!(back.len(), 5);
        assert_eq!(back["classify"], "");
    }

    #[test]
    fn empty_extra_is_not_serialized() {
        let json = serde_json::to_value(AnalysisReport::default()).unwrap();
        assert!(json.get("extra").is_none());
        assert_eq!(json["assign"], "");
    }

    #[test]
    fn rendering_marks_missing_sections() {
        let report = AnalysisReport {
            assign: "90".into(),
            ..Default::default()
        };
        let text = render_report_text(&report);
        assert!(text.starts_with("=== Final Anomaly Report ==="));
        assert!(text.contains("Confidence Score:\n90"));
        assert!(text.contains("Anomaly Type:\n(none)"));
    }

    #[test]
    fn run_without_aggregate_gives_empty_report() {
        let state = RunState::new("text");
        assert!(AnalysisReport::from_state(&state).is_empty());
    }
}
