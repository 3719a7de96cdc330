use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;

use crate::types::Cause;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryOutcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, Serialize)]
pub struct StrategyAttempt {
    pub strategy: String,
    pub action: String,
    pub detail: String,
    pub success: bool,
}

/// One recovery episode, win or lose. Append-only; the engine reorders
/// strategies per cause from this history.
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryRecord {
    pub timestamp: DateTime<Utc>,
    pub cause: Cause,
    pub is_proactive: bool,
    pub attempt_number: u32,
    pub strategies_tried: Vec<StrategyAttempt>,
    pub outcome: RecoveryOutcome,
    pub duration_ms: u64,
}

/// Bounded ring of past episodes.
pub struct RecoveryHistory {
    records: VecDeque<RecoveryRecord>,
    cap: usize,
}

impl RecoveryHistory {
    pub fn new(cap: usize) -> Self {
        Self {
            records: VecDeque::new(),
            cap,
        }
    }

    pub fn append(&mut self, record: RecoveryRecord) {
        self.records.push_back(record);
        while self.records.len() > self.cap {
            self.records.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> Vec<RecoveryRecord> {
        self.records.iter().cloned().collect()
    }

    /// Fraction of this strategy's attempts for `cause` that restored the
    /// link. `None` when it has never been tried for that cause.
    pub fn success_rate(&self, cause: Cause, strategy: &str) -> Option<f64> {
        let mut tried = 0u32;
        let mut succeeded = 0u32;
        for record in &self.records {
            if record.cause != cause {
                continue;
            }
            for attempt in &record.strategies_tried {
                if attempt.strategy == strategy {
                    tried += 1;
                    if attempt.success {
                        succeeded += 1;
                    }
                }
            }
        }
        if tried == 0 {
            None
        } else {
            Some(succeeded as f64 / tried as f64)
        }
    }

    /// Order strategy names for a cause: best historical success rate
    /// first, untried ones after (in their given order).
    pub fn order_for(&self, cause: Cause, names: Vec<String>) -> Vec<String> {
        let mut scored: Vec<(usize, Option<f64>, String)> = names
            .into_iter()
            .enumerate()
            .map(|(i, name)| (i, self.success_rate(cause, &name), name))
            .collect();
        scored.sort_by(|a, b| match (a.1, b.1) {
            (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(std::cmp::Ordering::Equal),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.0.cmp(&b.0),
        });
        scored.into_iter().map(|(_, _, name)| name).collect()
    }
}
