use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::wire::Decision;

/// Hard cap on retained history; prompts only ever render a much smaller window.
pub const DEFAULT_RETAIN_LIMIT: usize = 512;

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Ok,
    Failed,
    /// The target could not be grounded; nothing was executed.
    Unresolvable,
    /// Executed, but the effect cannot be judged from the inputs alone (e.g. mining).
    Unknown,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StepOutcome {
    pub status: StepStatus,
    #[serde(default)]
    pub detail: String,
}

impl StepOutcome {
    pub fn ok(detail: impl Into<String>) -> Self {
        Self::with(StepStatus::Ok, detail)
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self::with(StepStatus::Failed, detail)
    }

    pub fn unresolvable(detail: impl Into<String>) -> Self {
        Self::with(StepStatus::Unresolvable, detail)
    }

    pub fn unknown(detail: impl Into<String>) -> Self {
        Self::with(StepStatus::Unknown, detail)
    }

    fn with(status: StepStatus, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }
}

/// Outcome counts over every entry ever recorded, including ones the retention cap evicted.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct StatusCounts {
    pub ok: u64,
    pub failed: u64,
    pub unresolvable: u64,
    pub unknown: u64,
}

impl StatusCounts {
    fn add(&mut self, status: StepStatus) {
        let slot = match status {
            StepStatus::Ok => &mut self.ok,
            StepStatus::Failed => &mut self.failed,
            StepStatus::Unresolvable => &mut self.unresolvable,
            StepStatus::Unknown => &mut self.unknown,
        };
        *slot = slot.saturating_add(1);
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ActionHistoryEntry {
    pub iteration: u64,
    /// Observation tick the decision was made on.
    pub tick: u64,
    pub decision: Decision,
    pub outcome: StepOutcome,
}

/// Run-scoped memory: the goal, the last error and the append-only history.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentMemory {
    pub goal: String,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    history: VecDeque<ActionHistoryEntry>,
    retain_limit: usize,
    #[serde(default)]
    totals: StatusCounts,
}

impl AgentMemory {
    pub fn new(goal: impl Into<String>) -> Self {
        Self::with_retain_limit(goal, DEFAULT_RETAIN_LIMIT)
    }

    pub fn with_retain_limit(goal: impl Into<String>, retain_limit: usize) -> Self {
        Self {
            goal: goal.into(),
            last_error: None,
            history: VecDeque::new(),
            retain_limit: retain_limit.max(1),
            totals: StatusCounts::default(),
        }
    }

    /// Appends one entry. Entries are never edited afterwards.
    pub fn record(&mut self, entry: ActionHistoryEntry) {
        self.last_error = match entry.outcome.status {
            StepStatus::Ok | StepStatus::Unknown => None,
            StepStatus::Failed | StepStatus::Unresolvable => {
                Some(format!("{}: {}", entry.decision.kind(), entry.outcome.detail))
            }
        };

        self.totals.add(entry.outcome.status);
        self.history.push_back(entry);
        while self.history.len() > self.retain_limit {
            self.history.pop_front();
        }
    }

    pub fn history(
        &self,
    ) -> impl DoubleEndedIterator<Item = &ActionHistoryEntry> + ExactSizeIterator {
        self.history.iter()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn last(&self) -> Option<&ActionHistoryEntry> {
        self.history.back()
    }

    /// The last `window` entries, oldest first.
    pub fn recent(&self, window: usize) -> Vec<&ActionHistoryEntry> {
        let skip = self.history.len().saturating_sub(window);
        self.history.iter().skip(skip).collect()
    }

    pub fn totals(&self) -> StatusCounts {
        self.totals
    }
}
