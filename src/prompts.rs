//! Prompt templates for each pipeline stage.
//!
//! Every stage sends a single user message; the anomaly text is embedded
//! verbatim so the model sees exactly what the detector printed.

/// Goals the plan stage asks the model to turn into steps, in result-key order.
pub const PLAN_GOALS: [&str; 4] = [
    "Assign a confidence score (0-100).",
    "Classify the anomaly type.",
    "Justify the classification.",
    "Recommend follow-up investigation.",
];

/// Prefix of a reflection that accepts the executor outputs as they are.
pub const AFFIRMATIVE_PREFIX: &str = "all good";

pub fn plan_prompt(raw_text: &str, expected_steps: usize) -> String {
    let mut prompt = format!("Given this anomaly:\n\n{raw_text}\n\nList the steps to:\n");
    for (i, goal) in PLAN_GOALS.iter().enumerate() {
        prompt.push_str(&format!("{}. {goal}\n", i + 1));
    }
    prompt.push_str(&format!(
        "\nAnswer with exactly {expected_steps} steps, each starting on its own line as \
         \"Step N: <instruction>\"."
    ));
    prompt
}

pub fn step_prompt(instruction: &str, raw_text: &str) -> String {
    format!("{instruction}\n\nDetails:\n{raw_text}")
}

pub fn reflection_prompt(confidence: &str, anomaly_type: &str, justification: &str) -> String {
    format!(
        "Confidence: {confidence}\n\
         Anomaly Type: {anomaly_type}\n\
         Justification: {justification}\n\n\
         Is anything missing or uncertain? If good, reply 'All good'."
    )
}

pub fn rewrite_prompt(justification: &str, issue: &str) -> String {
    format!(
        "Original Justification:\n{justification}\n\n\
         Issue Found:\n{issue}\n\n\
         Please rewrite the justification with more clarity or detail."
    )
}

/// Single-call structured report for a cluster treated as one event.
pub fn soc_report_prompt(raw_text: &str, team: &str) -> String {
    format!(
        "You are a cybersecurity analyst reporting to the SOC team \"{team}\".

You are analyzing the following anomaly cluster. Treat it as a single cohesive event.

=== Anomaly Cluster ===
{raw_text}
=======================

Generate a structured, concise report in this format:

**{team} Anomaly Report**

- **Anomaly ID**: auto-generated or derived from IP
- **Confidence Score**: <0-100>
- **Classification**: e.g. Denial-of-Service (DoS), Port Scan

**Impact Summary**:
- Describe affected systems, risks, goals

**Key Metrics**:
- Packet Lengths: avg/max
- Packet Count: total
- Source IPs: [list]
- Affected Ports: [list]
- Flags: e.g. PSH/ACK/URG

**Supporting Evidence**:
- Unusual timing, packet bursts, repeated flags, etc.

**Recommendations**:
1. Investigate source IPs
2. Analyze suspicious ports
3. Apply firewall/rate-limit

Respond with only this structured report. No extra commentary.
"
    )
}
