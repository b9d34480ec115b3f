use std::sync::Arc;

use tracing::debug;

use super::game_api::Grounder;
use super::grounding::GroundingResult;
use super::input::{InputEvent, InputOp, MouseButton};
use super::observation::Observation;
use super::wire::{Action, Decision, MoveDirection, TurnDirection, WALK_BLOCKS_PER_SEC};
use crate::error::GroundingError;
use crate::vision::{Frame, ScreenGeometry};

const LOOK_MOVE_MS: u32 = 100;
const TURN_MOVE_MS: u32 = 500;
const TURN_DX: i32 = 60;
const TURN_DY: i32 = 50;
const CLICK_MOVE_MS: u32 = 200;
const TAP_MS: u64 = 50;
const SETTLE_MS: u64 = 100;

/// What an action turned into.
#[derive(Debug, Clone, PartialEq)]
pub enum Translation {
    Events(Vec<InputEvent>),
    /// The grounding model could not find the target; nothing may be executed.
    Unresolvable { target: String },
    /// `visual_question`: answered by the vision model, no input involved.
    Answer(String),
}

/// The recipe-book steps of `craft`, in order. Each one is grounded on a fresh frame because
/// the screen changes after the previous step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CraftPhase {
    SearchField,
    FirstRecipe,
    OutputSlot,
}

impl CraftPhase {
    pub const ALL: [CraftPhase; 3] =
        [CraftPhase::SearchField, CraftPhase::FirstRecipe, CraftPhase::OutputSlot];

    /// What the grounding model is asked to find.
    pub fn target(self) -> &'static str {
        match self {
            CraftPhase::SearchField => "recipe book search field",
            CraftPhase::FirstRecipe => "first recipe in the recipe book results",
            CraftPhase::OutputSlot => "crafting output slot",
        }
    }
}

fn tap(key: &str) -> [InputEvent; 2] {
    [InputEvent::key_down(key, TAP_MS), InputEvent::key_up(key, SETTLE_MS)]
}

fn click(button: MouseButton) -> [InputEvent; 2] {
    [
        InputEvent::mouse_down(button, TAP_MS),
        InputEvent::mouse_up(button, SETTLE_MS),
    ]
}

fn move_key(direction: MoveDirection) -> &'static str {
    match direction {
        MoveDirection::Forward => "w",
        MoveDirection::Backward => "s",
        MoveDirection::Left => "a",
        MoveDirection::Right => "d",
    }
}

/// Key-hold time for walking `blocks` at normal speed.
pub fn walk_hold_ms(blocks: f32) -> u64 {
    ((blocks / WALK_BLOCKS_PER_SEC) * 1000.0).round() as u64
}

/// Events for non-visual actions. Pure: the same action always yields the same events.
/// Returns `None` for actions that need the vision model.
pub fn translate_direct(action: &Action) -> Option<Vec<InputEvent>> {
    let events = match action {
        Action::LookAt(_)
        | Action::ClickOn(_)
        | Action::PlaceNear(_)
        | Action::VisualQuestion(_)
        | Action::Craft(_) => {
            return None;
        }
        Action::Turn(args) => {
            let (dx, dy) = match args.direction {
                TurnDirection::Left => (-TURN_DX, 0),
                TurnDirection::Right => (TURN_DX, 0),
                TurnDirection::Up => (0, -TURN_DY),
                TurnDirection::Down => (0, TURN_DY),
            };
            vec![InputEvent::new(
                InputOp::MoveBy {
                    dx,
                    dy,
                    duration_ms: TURN_MOVE_MS,
                },
                SETTLE_MS,
            )]
        }
        Action::Move(args) => {
            let key = move_key(args.direction);
            vec![
                InputEvent::key_down(key, walk_hold_ms(args.blocks)),
                InputEvent::key_up(key, SETTLE_MS),
            ]
        }
        Action::Jump => tap("space").to_vec(),
        Action::Mine(args) => vec![
            InputEvent::mouse_down(MouseButton::Left, u64::from(args.duration_ms)),
            InputEvent::mouse_up(MouseButton::Left, SETTLE_MS),
        ],
        Action::PlaceBlock => click(MouseButton::Right).to_vec(),
        Action::SelectSlot(args) => tap(&args.slot.to_string()).to_vec(),
        Action::Scroll(args) => {
            vec![InputEvent::new(InputOp::Scroll { amount: args.amount }, SETTLE_MS)]
        }
        Action::ObserveInventory => open_inventory(),
        Action::CloseInventory => tap("escape").to_vec(),
        Action::Observe | Action::Stop(_) => Vec::new(),
    };
    Some(events)
}

/// Maps decisions to input, resolving on-screen targets through the grounder first.
#[derive(Clone)]
pub struct ActionTranslator {
    grounder: Arc<dyn Grounder>,
    screen: ScreenGeometry,
    /// Mouse counts per image pixel for camera moves.
    pub look_gain: f32,
}

impl std::fmt::Debug for ActionTranslator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionTranslator")
            .field("screen", &self.screen)
            .field("look_gain", &self.look_gain)
            .finish_non_exhaustive()
    }
}

impl ActionTranslator {
    pub fn new(grounder: Arc<dyn Grounder>, screen: ScreenGeometry) -> Self {
        Self {
            grounder,
            screen,
            look_gain: 1.0,
        }
    }

    pub fn with_look_gain(mut self, gain: f32) -> Self {
        self.look_gain = gain;
        self
    }

    fn look_delta(&self, frame: &Frame, x: u32, y: u32) -> Option<InputEvent> {
        let (cx, cy) = frame.center();
        let dx = ((x as f32 - cx) * self.look_gain).round() as i32;
        let dy = ((y as f32 - cy) * self.look_gain).round() as i32;
        if dx == 0 && dy == 0 {
            return None;
        }
        Some(InputEvent::new(
            InputOp::MoveBy {
                dx,
                dy,
                duration_ms: LOOK_MOVE_MS,
            },
            SETTLE_MS,
        ))
    }

    fn cursor_to(&self, frame: &Frame, x: u32, y: u32) -> InputEvent {
        let (sx, sy) = self.screen.scale_from(frame, x, y);
        InputEvent::new(
            InputOp::MoveTo {
                x: sx,
                y: sy,
                duration_ms: CLICK_MOVE_MS,
            },
            SETTLE_MS,
        )
    }

    async fn locate(
        &self,
        obs: &Observation,
        target: &str,
    ) -> Result<Option<(u32, u32)>, GroundingError> {
        match self.grounder.locate(&obs.frame, target).await? {
            GroundingResult::Found { x, y, .. } => Ok(Some((x, y))),
            GroundingResult::NotFound => {
                debug!(target, tick = obs.tick, "translate.unresolvable");
                Ok(None)
            }
        }
    }

    pub async fn translate(
        &self,
        decision: &Decision,
        obs: &Observation,
    ) -> Result<Translation, GroundingError> {
        if let Some(events) = translate_direct(&decision.action) {
            return Ok(Translation::Events(events));
        }

        match &decision.action {
            Action::VisualQuestion(args) => {
                let answer = self.grounder.ask(&obs.frame, &args.question).await?;
                return Ok(Translation::Answer(answer));
            }
            Action::Craft(args) => {
                return self.translate_craft(CraftPhase::SearchField, &args.item, obs).await;
            }
            _ => {}
        }

        let Some(target) = decision.action.grounding_target() else {
            return Ok(Translation::Events(Vec::new()));
        };
        let Some((x, y)) = self.locate(obs, target).await? else {
            return Ok(Translation::Unresolvable {
                target: target.to_string(),
            });
        };

        let frame = &obs.frame;
        let events = match &decision.action {
            Action::LookAt(_) => self.look_delta(frame, x, y).into_iter().collect(),
            Action::PlaceNear(_) => {
                let mut events: Vec<InputEvent> =
                    self.look_delta(frame, x, y).into_iter().collect();
                events.extend(click(MouseButton::Right));
                events
            }
            Action::ClickOn(_) => {
                let mut events = vec![self.cursor_to(frame, x, y)];
                events.extend(click(MouseButton::Left));
                events
            }
            _ => Vec::new(),
        };
        Ok(Translation::Events(events))
    }

    /// One step of crafting `item` through the recipe book on the current frame. The last step
    /// shift-clicks the result into the inventory and closes the screen.
    pub async fn translate_craft(
        &self,
        phase: CraftPhase,
        item: &str,
        obs: &Observation,
    ) -> Result<Translation, GroundingError> {
        let target = phase.target();
        let Some((x, y)) = self.locate(obs, target).await? else {
            return Ok(Translation::Unresolvable {
                target: target.to_string(),
            });
        };

        let mut events = vec![self.cursor_to(&obs.frame, x, y)];
        match phase {
            CraftPhase::SearchField => {
                events.extend(click(MouseButton::Left));
                let text = InputOp::TypeText { text: item.to_string() };
                events.push(InputEvent::new(text, SETTLE_MS));
            }
            CraftPhase::FirstRecipe => events.extend(click(MouseButton::Left)),
            CraftPhase::OutputSlot => {
                events.push(InputEvent::key_down("shift", TAP_MS));
                events.extend(click(MouseButton::Left));
                events.push(InputEvent::key_up("shift", SETTLE_MS));
                events.extend(tap("escape"));
            }
        }
        Ok(Translation::Events(events))
    }
}

/// Events that open the player inventory so the recipe book becomes visible.
pub fn open_inventory() -> Vec<InputEvent> {
    tap("e").to_vec()
}
