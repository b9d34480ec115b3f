use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::decision::DecisionClient;
use super::game_api::{Grounder, InputControl, LlmClient, ScreenCapturer};
use super::input::InputSynthesizer;
use super::memory::{ActionHistoryEntry, AgentMemory, StepOutcome};
use super::observation::{Observation, ObservationBuilder};
use super::prompt::PromptConfig;
use super::tools::ActionSet;
use super::translator::{ActionTranslator, CraftPhase, Translation, open_inventory};
use super::wire::{Action, Decision};
use crate::error::{CaptureError, DecisionError};
use crate::vision::{Frame, ScreenGeometry};

pub const DEFAULT_SCENE_QUESTION: &str = "Describe the scene. Include the distances to all objects.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The model issued `stop` with `goal_complete = true`.
    GoalComplete,
    /// The model issued `stop` and gave up on the goal.
    StopRequested,
    BudgetExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailReason {
    CaptureUnavailable,
    DecisionService,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Observing,
    Deciding,
    Acting,
    Evaluating,
    Stopped(StopReason),
    Failed(FailReason),
}

impl LoopState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoopState::Stopped(_) | LoopState::Failed(_))
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopState::Idle => f.write_str("idle"),
            LoopState::Observing => f.write_str("observing"),
            LoopState::Deciding => f.write_str("deciding"),
            LoopState::Acting => f.write_str("acting"),
            LoopState::Evaluating => f.write_str("evaluating"),
            LoopState::Stopped(StopReason::GoalComplete) => f.write_str("stopped(goal_complete)"),
            LoopState::Stopped(StopReason::StopRequested) => f.write_str("stopped(stop_requested)"),
            LoopState::Stopped(StopReason::BudgetExhausted) => {
                f.write_str("stopped(budget_exhausted)")
            }
            LoopState::Failed(FailReason::CaptureUnavailable) => {
                f.write_str("failed(capture_unavailable)")
            }
            LoopState::Failed(FailReason::DecisionService) => {
                f.write_str("failed(decision_service)")
            }
        }
    }
}

/// The service handles one run talks to.
#[derive(Clone)]
pub struct LoopServices {
    pub capturer: Arc<dyn ScreenCapturer>,
    pub grounder: Arc<dyn Grounder>,
    pub llm: Arc<dyn LlmClient>,
    pub control: Arc<dyn InputControl>,
}

#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub max_iterations: u64,
    pub max_duration: Duration,
    pub capture_timeout: Duration,
    /// Consecutive capture failures that end the run.
    pub max_capture_failures: u32,
    pub capture_retry_delay: Duration,
    /// Fresh-capture retries after a transient grounding error (0 or 1).
    pub grounding_retries: u32,
    pub enable_repair: bool,
    pub describe_scene: bool,
    pub scene_question: String,
    pub available: ActionSet,
    pub screen: ScreenGeometry,
    pub look_gain: f32,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            max_duration: Duration::from_secs(30 * 60),
            capture_timeout: Duration::from_secs(5),
            max_capture_failures: 3,
            capture_retry_delay: Duration::from_millis(500),
            grounding_retries: 1,
            enable_repair: false,
            describe_scene: false,
            scene_question: DEFAULT_SCENE_QUESTION.to_string(),
            available: ActionSet::all(),
            screen: ScreenGeometry {
                width: 1920,
                height: 1080,
            },
            look_gain: 1.0,
        }
    }
}

/// Owns everything one run needs; nothing is shared process-wide.
pub struct AgentLoop {
    pub config: LoopConfig,
    pub memory: AgentMemory,
    capturer: Arc<dyn ScreenCapturer>,
    grounder: Arc<dyn Grounder>,
    decision: DecisionClient,
    translator: ActionTranslator,
    synthesizer: InputSynthesizer,
    observations: ObservationBuilder,
    state: LoopState,
    iteration: u64,
    started: Option<Instant>,
    capture_failures: u32,
    current: Option<Observation>,
    pending: Option<(u64, Decision)>,
    outcome: Option<StepOutcome>,
    failure: Option<String>,
}

impl fmt::Debug for AgentLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentLoop")
            .field("state", &self.state)
            .field("iteration", &self.iteration)
            .field("history_len", &self.memory.len())
            .finish_non_exhaustive()
    }
}

impl AgentLoop {
    pub fn new(
        goal: impl Into<String>,
        services: LoopServices,
        config: LoopConfig,
        prompt: PromptConfig,
    ) -> Self {
        let decision = DecisionClient::new(services.llm, prompt).with_repair(config.enable_repair);
        let translator = ActionTranslator::new(services.grounder.clone(), config.screen)
            .with_look_gain(config.look_gain);
        Self {
            memory: AgentMemory::new(goal),
            capturer: services.capturer,
            grounder: services.grounder,
            decision,
            translator,
            synthesizer: InputSynthesizer::new(services.control),
            observations: ObservationBuilder::default(),
            state: LoopState::Idle,
            iteration: 0,
            started: None,
            capture_failures: 0,
            current: None,
            pending: None,
            outcome: None,
            failure: None,
            config,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Completed iterations, i.e. history entries appended by this run.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn elapsed(&self) -> Duration {
        self.started.map(|s| s.elapsed()).unwrap_or_default()
    }

    /// Why the run failed, when it did.
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn inventory_open(&self) -> bool {
        self.observations.inventory_open()
    }

    /// Advances the state machine by one transition. Terminal states stay put.
    pub async fn step(&mut self) -> LoopState {
        let next = match self.state {
            LoopState::Idle => {
                self.started = Some(Instant::now());
                info!(goal = %self.memory.goal, "loop.start");
                LoopState::Observing
            }
            LoopState::Observing => self.observe().await,
            LoopState::Deciding => self.decide().await,
            LoopState::Acting => self.act().await,
            LoopState::Evaluating => self.evaluate(),
            terminal => terminal,
        };
        if next != self.state {
            debug!(from = %self.state, to = %next, "loop.transition");
        }
        self.state = next;
        next
    }

    fn budget_exhausted(&self) -> bool {
        self.iteration >= self.config.max_iterations || self.elapsed() >= self.config.max_duration
    }

    async fn capture_frame(&self) -> Result<Frame, CaptureError> {
        match tokio::time::timeout(self.config.capture_timeout, self.capturer.capture()).await {
            Ok(res) => res,
            Err(_) => Err(CaptureError::Unavailable(format!(
                "capture timed out after {}ms",
                self.config.capture_timeout.as_millis()
            ))),
        }
    }

    async fn describe_scene(&self, frame: &Frame) -> Option<String> {
        if !self.config.describe_scene {
            return None;
        }
        match self.grounder.ask(frame, &self.config.scene_question).await {
            Ok(answer) => Some(answer),
            Err(err) => {
                warn!(error = %err, "loop.scene_failed");
                None
            }
        }
    }

    async fn observe(&mut self) -> LoopState {
        if self.budget_exhausted() {
            info!(
                iteration = self.iteration,
                elapsed_ms = self.elapsed().as_millis() as u64,
                "loop.budget_exhausted"
            );
            return LoopState::Stopped(StopReason::BudgetExhausted);
        }

        match self.capture_frame().await {
            Ok(frame) => {
                self.capture_failures = 0;
                let scene = self.describe_scene(&frame).await;
                let obs = self.observations.build(frame, scene);
                debug!(
                    tick = obs.tick,
                    width = obs.frame.width,
                    height = obs.frame.height,
                    "loop.observe"
                );
                self.current = Some(obs);
                LoopState::Deciding
            }
            Err(err) => {
                self.capture_failures += 1;
                warn!(
                    failures = self.capture_failures,
                    max = self.config.max_capture_failures,
                    error = %err,
                    "loop.capture_failed"
                );
                if self.capture_failures >= self.config.max_capture_failures {
                    self.failure = Some(err.to_string());
                    return LoopState::Failed(FailReason::CaptureUnavailable);
                }
                tokio::time::sleep(self.config.capture_retry_delay).await;
                LoopState::Observing
            }
        }
    }

    async fn decide(&mut self) -> LoopState {
        let Some(obs) = self.current.as_ref() else {
            return LoopState::Observing;
        };
        let tick = obs.tick;
        match self.decision.decide(&self.memory, obs, &self.config.available).await {
            Ok(decision) => {
                info!(
                    iteration = self.iteration,
                    tick,
                    action = %decision.kind(),
                    rationale = decision.rationale.as_deref().unwrap_or(""),
                    "loop.decided"
                );
                self.pending = Some((tick, decision));
                LoopState::Acting
            }
            Err(DecisionError::Parse(err)) => {
                warn!(iteration = self.iteration, error = %err, "loop.decision_parse_error");
                self.current = None;
                self.append(
                    tick,
                    Decision::observe(),
                    StepOutcome::failed(format!("decision_parse_error: {err}")),
                );
                LoopState::Observing
            }
            Err(DecisionError::Service(err)) => {
                error!(iteration = self.iteration, error = %err, "loop.decision_service_failed");
                self.failure = Some(err.to_string());
                LoopState::Failed(FailReason::DecisionService)
            }
        }
    }

    async fn act(&mut self) -> LoopState {
        let (Some(obs), Some((_, decision))) = (self.current.take(), self.pending.as_ref()) else {
            return LoopState::Observing;
        };
        let decision = decision.clone();
        let outcome = self.execute(&decision, obs).await;
        if outcome.status != super::memory::StepStatus::Ok {
            info!(
                action = %decision.kind(),
                status = ?outcome.status,
                detail = %outcome.detail,
                "loop.step_failed"
            );
        }
        self.outcome = Some(outcome);
        LoopState::Evaluating
    }

    async fn recapture(&mut self) -> Result<Observation, CaptureError> {
        let frame = self.capture_frame().await?;
        Ok(self.observations.build(frame, None))
    }

    async fn translate_with_retry(
        &mut self,
        decision: &Decision,
        craft: Option<(CraftPhase, &str)>,
        mut obs: Observation,
    ) -> Result<Translation, String> {
        let mut retries_left = self.config.grounding_retries;
        loop {
            let attempt = match craft {
                Some((phase, item)) => self.translator.translate_craft(phase, item, &obs).await,
                None => self.translator.translate(decision, &obs).await,
            };
            match attempt {
                Ok(t) => return Ok(t),
                Err(err) if err.is_transient() && retries_left > 0 => {
                    retries_left -= 1;
                    warn!(error = %err, "loop.grounding_retry");
                    match self.recapture().await {
                        Ok(fresh) => obs = fresh,
                        Err(cerr) => {
                            return Err(format!("grounding_error: {err}; recapture failed: {cerr}"));
                        }
                    }
                }
                Err(err) => return Err(format!("grounding_error: {err}")),
            }
        }
    }

    async fn execute(&mut self, decision: &Decision, obs: Observation) -> StepOutcome {
        match &decision.action {
            Action::Stop(args) => {
                let reason = args.reason.clone().unwrap_or_else(|| "stop requested".to_string());
                return StepOutcome::ok(reason);
            }
            Action::Craft(args) => return self.craft(decision, &args.item, obs).await,
            _ => {}
        }

        let translation = match self.translate_with_retry(decision, None, obs).await {
            Ok(t) => t,
            Err(detail) => return StepOutcome::failed(detail),
        };

        let events = match translation {
            Translation::Unresolvable { target } => {
                return StepOutcome::unresolvable(format!("target not found on screen: {target}"));
            }
            Translation::Answer(answer) => return StepOutcome::ok(answer),
            Translation::Events(events) => events,
        };
        if events.is_empty() {
            return StepOutcome::ok("no input needed");
        }

        match self.synthesizer.dispatch(&events).await {
            Ok(report) => {
                match decision.action {
                    Action::ObserveInventory => self.observations.set_inventory_open(true),
                    Action::CloseInventory => self.observations.set_inventory_open(false),
                    _ => {}
                }
                if let Action::Mine(args) = &decision.action {
                    StepOutcome::unknown(format!(
                        "held attack for {}ms; check the next observation to see if the block broke",
                        args.duration_ms
                    ))
                } else {
                    StepOutcome::ok(format!("dispatched {} input events", report.dispatched))
                }
            }
            Err(err) => StepOutcome::failed(err.to_string()),
        }
    }

    /// Runs the recipe-book steps one at a time, grounding each on a fresh frame. Opens the
    /// inventory once when the search field is not visible and no screen is known to be open.
    async fn craft(
        &mut self,
        decision: &Decision,
        item: &str,
        mut obs: Observation,
    ) -> StepOutcome {
        let mut dispatched = 0;
        let mut opened_inventory = false;
        let mut phases = CraftPhase::ALL.into_iter().peekable();
        while let Some(&phase) = phases.peek() {
            let step = self.translate_with_retry(decision, Some((phase, item)), obs).await;
            let translation = match step {
                Ok(t) => t,
                Err(detail) => return StepOutcome::failed(format!("craft {item}: {detail}")),
            };
            let (events, advance) = match translation {
                Translation::Events(events) => (events, true),
                Translation::Unresolvable { .. }
                    if phase == CraftPhase::SearchField
                        && !opened_inventory
                        && !self.observations.inventory_open() =>
                {
                    opened_inventory = true;
                    (open_inventory(), false)
                }
                Translation::Unresolvable { target } => {
                    return StepOutcome::unresolvable(format!(
                        "craft {item}: target not found on screen: {target}"
                    ));
                }
                Translation::Answer(_) => (Vec::new(), true),
            };

            match self.synthesizer.dispatch(&events).await {
                Ok(report) => dispatched += report.dispatched,
                Err(err) => return StepOutcome::failed(format!("craft {item}: {err}")),
            }
            debug!(item, ?phase, dispatched, "loop.craft_step");
            if advance {
                phases.next();
            } else {
                self.observations.set_inventory_open(true);
            }

            if phases.peek().is_none() {
                break;
            }
            obs = match self.recapture().await {
                Ok(fresh) => fresh,
                Err(err) => return StepOutcome::failed(format!("craft {item}: {err}")),
            };
        }
        // The last step closes whichever crafting screen was open.
        self.observations.set_inventory_open(false);
        StepOutcome::unknown(format!(
            "took the {item} recipe result ({dispatched} input events); check the inventory to confirm"
        ))
    }

    fn evaluate(&mut self) -> LoopState {
        let (Some((tick, decision)), Some(outcome)) = (self.pending.take(), self.outcome.take())
        else {
            return LoopState::Observing;
        };
        let stop = match &decision.action {
            Action::Stop(args) if args.goal_complete => Some(StopReason::GoalComplete),
            Action::Stop(_) => Some(StopReason::StopRequested),
            _ => None,
        };
        self.append(tick, decision, outcome);

        if let Some(reason) = stop {
            info!(iteration = self.iteration, ?reason, "loop.stop");
            return LoopState::Stopped(reason);
        }
        if self.budget_exhausted() {
            info!(iteration = self.iteration, "loop.budget_exhausted");
            return LoopState::Stopped(StopReason::BudgetExhausted);
        }
        LoopState::Observing
    }

    fn append(&mut self, tick: u64, decision: Decision, outcome: StepOutcome) {
        debug!(
            iteration = self.iteration,
            action = %decision.kind(),
            status = ?outcome.status,
            "loop.recorded"
        );
        self.memory.record(ActionHistoryEntry {
            iteration: self.iteration,
            tick,
            decision,
            outcome,
        });
        self.iteration += 1;
    }
}
