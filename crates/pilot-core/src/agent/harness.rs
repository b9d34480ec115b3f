use serde::Serialize;
use tracing::{error, info};

use super::r#loop::{AgentLoop, LoopState};

/// Summary of one finished run, logged at the end.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    #[serde(serialize_with = "serialize_state")]
    pub final_state: LoopState,
    pub iterations: u64,
    pub ok: u64,
    pub failed: u64,
    pub unresolvable: u64,
    pub unknown: u64,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

fn serialize_state<S: serde::Serializer>(state: &LoopState, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(state)
}

impl RunReport {
    pub fn from_loop(agent: &AgentLoop) -> Self {
        let totals = agent.memory.totals();
        Self {
            final_state: agent.state(),
            iterations: agent.iteration(),
            ok: totals.ok,
            failed: totals.failed,
            unresolvable: totals.unresolvable,
            unknown: totals.unknown,
            elapsed_ms: agent.elapsed().as_millis() as u64,
            failure: agent.failure().map(str::to_string),
        }
    }
}

impl AgentLoop {
    /// Drives the state machine until it stops or fails. Never returns early on a single bad step.
    pub async fn run(&mut self) -> RunReport {
        while !self.state().is_terminal() {
            self.step().await;
        }

        let report = RunReport::from_loop(self);
        match report.final_state {
            LoopState::Failed(_) => error!(
                state = %report.final_state,
                iterations = report.iterations,
                failure = report.failure.as_deref().unwrap_or(""),
                "loop.finished"
            ),
            _ => info!(
                state = %report.final_state,
                iterations = report.iterations,
                ok = report.ok,
                failed = report.failed,
                unresolvable = report.unresolvable,
                unknown = report.unknown,
                elapsed_ms = report.elapsed_ms,
                "loop.finished"
            ),
        }
        report
    }
}
