//! Administrative scripts.
//!
//! Scripts are split into batches on standalone `GO` lines the way `sqlcmd`
//! does: the separator is case-insensitive, may be surrounded by
//! whitespace and may carry a repeat count, which is ignored.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref BATCH_SEPARATOR: Regex = Regex::new(r"(?i)^\s*GO(?:\s+\d+)?\s*$").unwrap();
}

/// Result of executing a script.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptOutcome {
    /// Number of batches that ran, all successfully.
    pub batches: usize,
}

/// Split `sql` into its non-empty batches, in order.
pub fn split_batches(sql: &str) -> Vec<String> {
    let mut batches = vec![];
    let mut current: Vec<&str> = vec![];
    for line in sql.lines() {
        if BATCH_SEPARATOR.is_match(line) {
            push_batch(&mut batches, &current);
            current.clear();
        } else {
            current.push(line);
        }
    }
    push_batch(&mut batches, &current);
    batches
}

fn push_batch(batches: &mut Vec<String>, lines: &[&str]) {
    let batch = lines.join("\n");
    if !batch.trim().is_empty() {
        batches.push(batch.trim().to_owned());
    }
}
