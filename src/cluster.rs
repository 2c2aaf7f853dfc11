//! Groups raw anomaly records into clusters before analysis.
//!
//! A record looks like
//!
//! ```text
//! Found DoS anomaly in node: {'cluster': 'A', 'src_ip': '10.0.0.5',
//!                             'length': 1514}
//! ```
//!
//! The attribute blob may span lines. Text that is not part of a record is
//! dropped. Clusters come back in first-appearance order, members in
//! appearance order.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::literal::parse_attributes;

/// Cluster id used when a record has no usable `cluster` attribute.
pub const UNKNOWN_CLUSTER: &str = "unknown";

/// Attribute that carries the grouping key.
pub const CLUSTER_ATTRIBUTE: &str = "cluster";

static RECORD_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bfound\s+(?:[\w-]+\s+)?anomaly\s+in\s+node\s*:\s*\{")
        .expect("record header regex")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub cluster_id: String,
    pub members: Vec<String>,
}

impl Cluster {
    /// Member records joined as one analysis input.
    pub fn text(&self) -> String {
        self.members.join("\n\n")
    }
}

/// Partition `raw_text` into clusters of anomaly records.
pub fn partition(raw_text: &str) -> Vec<Cluster> {
    let mut clusters: Vec<Cluster> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for record in find_records(raw_text) {
        let cluster_id = cluster_id_for(record.blob);
        let slot = *index.entry(cluster_id.clone()).or_insert_with(|| {
            clusters.push(Cluster {
                cluster_id,
                members: Vec::new(),
            });
            clusters.len() - 1
        });
        clusters[slot].members.push(record.text.to_string());
    }

    tracing::debug!(
        clusters = clusters.len(),
        records = clusters.iter().map(|c| c.members.len()).sum::<usize>(),
        "partitioned anomaly records"
    );
    clusters
}

struct Record<'a> {
    /// From the `found` keyword through the closing brace.
    text: &'a str,
    /// The `{...}` attribute blob.
    blob: &'a str,
}

fn find_records(raw_text: &str) -> Vec<Record<'_>> {
    let mut records = Vec::new();
    let mut search_from = 0;

    while let Some(header) = RECORD_HEADER.find_at(raw_text, search_from) {
        let open = header.end() - 1;
        match matching_brace(raw_text, open) {
            Some(close) => {
                records.push(Record {
                    text: &raw_text[header.start()..=close],
                    blob: &raw_text[open..=close],
                });
                search_from = close + 1;
            }
            None => {
                tracing::debug!(offset = header.start(), "anomaly record without closing brace");
                search_from = header.end();
            }
        }
    }

    records
}

/// Byte index of the brace closing the one at `open`, skipping quoted text.
fn matching_brace(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (offset, c) in text[open..].char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + offset);
                }
            }
            _ => {}
        }
    }
    None
}

fn cluster_id_for(blob: &str) -> String {
    match parse_attributes(blob) {
        Ok(attrs) => attrs
            .get(CLUSTER_ATTRIBUTE)
            .and_then(|v| v.as_key_text())
            .unwrap_or_else(|| UNKNOWN_CLUSTER.to_string()),
        Err(err) => {
            tracing::warn!(error = %err, "unparsable anomaly attributes, using unknown cluster");
            UNKNOWN_CLUSTER.to_string()
        }
    }
}
