//! Plan stage: ask for a step list and parse it out of free-form text.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::gateway::ProviderError;
use crate::prompts;

use super::model::AnalystModel;
use super::types::StepDescriptor;

/// `Step 2:` at a line start, tolerating markdown emphasis and loose spacing.
static STEP_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^[ \t]*(?:[*_#>]+[ \t]*)?step[ \t]*(\d+)[ \t]*[*_]*[ \t]*:[*_]*")
        .expect("step marker regex")
});

/// `2.` or `2)` at a line start; the older plan format.
static NUMBERED_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*(\d+)[.)](?:[ \t]+|$)").expect("numbered marker regex"));

struct Marker {
    number: usize,
    start: usize,
    end: usize,
}

fn markers(re: &Regex, text: &str) -> Vec<Marker> {
    re.captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let number = caps.get(1)?.as_str().parse().ok()?;
            Some(Marker {
                number,
                start: whole.start(),
                end: whole.end(),
            })
        })
        .collect()
}

/// Extract up to `expected_count` labeled steps from a plan response.
///
/// Step `i` runs from its marker to the next step marker of any number. A
/// terminal `Step {expected_count + 1}:` marker is appended so the last step
/// is bounded. Missing step numbers are skipped, so the result may be short.
pub fn parse_plan(model_text: &str, expected_count: usize) -> Vec<StepDescriptor> {
    let terminal = expected_count + 1;

    let text = format!("{model_text}\nStep {terminal}:");
    let mut found = markers(&STEP_MARKER, &text);

    // Only the synthetic marker matched: fall back to a numbered list.
    let text = if found.len() <= 1 {
        let numbered = format!("{model_text}\n{terminal}.");
        let numbered_markers = markers(&NUMBERED_MARKER, &numbered);
        if numbered_markers.len() > 1 {
            found = numbered_markers;
            numbered
        } else {
            text
        }
    } else {
        text
    };

    let mut steps = Vec::new();
    for i in 1..=expected_count {
        let Some(pos) = found.iter().position(|m| m.number == i) else {
            continue;
        };
        let start = found[pos].end;
        let end = found.get(pos + 1).map(|m| m.start).unwrap_or(text.len());
        let body = text[start..end].trim();
        if body.is_empty() {
            tracing::debug!(step = i, "plan step has an empty body, skipping");
            continue;
        }
        steps.push(StepDescriptor::new(i, body));
    }
    steps
}

/// Step numbers in `1..=expected_count` that the parsed plan lacks.
pub fn missing_steps(steps: &[StepDescriptor], expected_count: usize) -> Vec<usize> {
    (1..=expected_count)
        .filter(|i| !steps.iter().any(|s| s.index == *i))
        .collect()
}

/// Run the plan call and parse its response. A short plan is logged, not fatal.
pub async fn run_plan(
    model: &AnalystModel,
    raw_text: &str,
    expected_count: usize,
) -> Result<Vec<StepDescriptor>, ProviderError> {
    let prompt = prompts::plan_prompt(raw_text, expected_count);
    tracing::debug!(prompt_chars = prompt.len(), "sending plan prompt");

    let response = model.invoke("agent::plan", &prompt).await?;
    let preview: String = response.chars().take(120).collect();
    tracing::debug!(%preview, "received plan response");

    let steps = parse_plan(&response, expected_count);
    if steps.len() < expected_count {
        tracing::warn!(
            parsed = steps.len(),
            expected = expected_count,
            missing = ?missing_steps(&steps, expected_count),
            "plan under-count, continuing with the steps found"
        );
    } else {
        tracing::info!(parsed = steps.len(), "parsed plan steps");
    }
    Ok(steps)
}
