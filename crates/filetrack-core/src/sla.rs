//! Stage durations and SLA classification
//!
//! Pure derivations over stage history. Nothing in here writes.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::StageOrder;
use crate::model::{StageHistoryEntry, StageTracking};
use crate::stage::Stage;

/// Outcome of comparing a stage duration with its thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlaStatus {
    WithinIdeal,
    OverIdeal,
    /// Also reported as `over_max`.
    #[serde(alias = "over_max")]
    EscalationNeeded,
}

impl SlaStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WithinIdeal => "within_ideal",
            Self::OverIdeal => "over_ideal",
            Self::EscalationNeeded => "escalation_needed",
        }
    }

    pub fn is_breach(self) -> bool {
        self == Self::EscalationNeeded
    }
}

impl fmt::Display for SlaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whole minutes between entering and completing a stage, floored.
///
/// `None` when either timestamp is missing or the interval is negative.
pub fn stage_duration(entry: &StageHistoryEntry) -> Option<i64> {
    let completed_at = entry.completed_at?;
    let seconds = (completed_at - entry.entered_at).num_seconds();
    if seconds < 0 {
        return None;
    }
    Some(seconds.div_euclid(60))
}

/// Classify a duration against the stage's thresholds.
pub fn classify(order: &StageOrder, stage: Stage, duration_minutes: i64) -> SlaStatus {
    let threshold = order.threshold(stage);
    if duration_minutes <= threshold.ideal_minutes {
        SlaStatus::WithinIdeal
    } else if duration_minutes <= threshold.max_minutes {
        SlaStatus::OverIdeal
    } else {
        SlaStatus::EscalationNeeded
    }
}

fn entry_minutes(entry: &StageHistoryEntry) -> Option<i64> {
    entry.duration_minutes.or_else(|| stage_duration(entry))
}

/// Total minutes across closed entries.
///
/// A precomputed `total_minutes` on the tracking wins over summation.
pub fn total_duration(tracking: &StageTracking) -> i64 {
    if let Some(total) = tracking.total_minutes {
        return total;
    }
    tracking
        .stage_history
        .iter()
        .filter(|e| !e.is_open())
        .filter_map(entry_minutes)
        .sum()
}

/// One closed stage in a report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageLine {
    pub stage: Stage,
    pub assignee: Option<String>,
    pub duration_minutes: Option<i64>,
    pub sla_status: Option<SlaStatus>,
}

/// Per-stage timing summary of one file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageReport {
    pub lines: Vec<StageLine>,
    /// Entries classified `escalation_needed`.
    pub breaches: usize,
    /// Sum of penalty points carried by the entries.
    pub penalty_total: f64,
    pub total_minutes: i64,
}

/// Summarize every closed entry of a tracking.
pub fn report(order: &StageOrder, tracking: &StageTracking) -> StageReport {
    let mut lines = Vec::new();
    let mut breaches = 0;
    let mut penalty_total = 0.0;

    for entry in tracking.stage_history.iter().filter(|e| !e.is_open()) {
        let duration_minutes = entry_minutes(entry);
        let sla_status = duration_minutes.map(|d| classify(order, entry.stage, d));
        if sla_status.is_some_and(SlaStatus::is_breach) {
            breaches += 1;
        }
        penalty_total += entry.penalty_points.unwrap_or(0.0);
        lines.push(StageLine {
            stage: entry.stage,
            assignee: entry
                .assignee_name
                .clone()
                .or_else(|| entry.assignee_id.clone()),
            duration_minutes,
            sla_status,
        });
    }

    StageReport {
        lines,
        breaches,
        penalty_total,
        total_minutes: total_duration(tracking),
    }
}
