use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::tools::ActionSet;

pub const TOOL_CALL_START: &str = "<tool_call>";
pub const TOOL_CALL_END: &str = "</tool_call>";

/// Walking speed in blocks per second; `move` distances are converted to key-hold time with it.
pub const WALK_BLOCKS_PER_SEC: f32 = 4.317;
pub const MAX_MOVE_BLOCKS: f32 = 100.0;
pub const DEFAULT_MINE_MS: u32 = 4_000;
pub const MINE_MS_RANGE: std::ops::RangeInclusive<u32> = 150..=10_000;
pub const MAX_SCROLL: i32 = 10;
pub const MAX_TARGET_CHARS: usize = 200;
const MAX_RATIONALE_CHARS: usize = 280;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct DecisionWire {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
    #[serde(default)]
    pub rationale: Option<String>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecisionParseError {
    #[error("missing <tool_call> block")]
    MissingToolCallBlock,
    #[error("multiple <tool_call> blocks")]
    MultipleToolCallBlocks,
    #[error("invalid tool call json: {0}")]
    InvalidJson(String),
    #[error("unsupported action name: {0}")]
    UnsupportedAction(String),
    #[error("invalid action arguments: {0}")]
    InvalidArguments(String),
    #[error("action not available: {0}")]
    UnavailableAction(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    LookAt,
    ClickOn,
    PlaceNear,
    Turn,
    Move,
    Jump,
    Mine,
    PlaceBlock,
    SelectSlot,
    Scroll,
    ObserveInventory,
    CloseInventory,
    VisualQuestion,
    Craft,
    Observe,
    Stop,
}

impl ActionKind {
    pub const ALL: [ActionKind; 16] = [
        ActionKind::LookAt,
        ActionKind::ClickOn,
        ActionKind::PlaceNear,
        ActionKind::Turn,
        ActionKind::Move,
        ActionKind::Jump,
        ActionKind::Mine,
        ActionKind::PlaceBlock,
        ActionKind::SelectSlot,
        ActionKind::Scroll,
        ActionKind::ObserveInventory,
        ActionKind::CloseInventory,
        ActionKind::VisualQuestion,
        ActionKind::Craft,
        ActionKind::Observe,
        ActionKind::Stop,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ActionKind::LookAt => "look_at",
            ActionKind::ClickOn => "click_on",
            ActionKind::PlaceNear => "place_near",
            ActionKind::Turn => "turn",
            ActionKind::Move => "move",
            ActionKind::Jump => "jump",
            ActionKind::Mine => "mine",
            ActionKind::PlaceBlock => "place_block",
            ActionKind::SelectSlot => "select_slot",
            ActionKind::Scroll => "scroll",
            ActionKind::ObserveInventory => "observe_inventory",
            ActionKind::CloseInventory => "close_inventory",
            ActionKind::VisualQuestion => "visual_question",
            ActionKind::Craft => "craft",
            ActionKind::Observe => "observe",
            ActionKind::Stop => "stop",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|k| k.name() == name)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MoveDirection {
    Forward,
    Backward,
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnDirection {
    Left,
    Right,
    Up,
    Down,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TargetArgs {
    pub target: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TurnArgs {
    pub direction: TurnDirection,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MoveArgs {
    pub direction: MoveDirection,
    pub blocks: f32,
}

fn default_mine_ms() -> u32 {
    DEFAULT_MINE_MS
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MineArgs {
    #[serde(default = "default_mine_ms")]
    pub duration_ms: u32,
}

impl Default for MineArgs {
    fn default() -> Self {
        Self {
            duration_ms: DEFAULT_MINE_MS,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SelectSlotArgs {
    pub slot: u8,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ScrollArgs {
    pub amount: i32,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct QuestionArgs {
    pub question: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CraftArgs {
    /// Recipe name as typed into the recipe book search field.
    pub item: String,
}

fn default_goal_complete() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StopArgs {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default = "default_goal_complete")]
    pub goal_complete: bool,
}

/// A validated action with its parameters. Serialized as `{"name": .., "arguments": ..}`
/// so history entries read back the same way the model wrote them.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "name", content = "arguments", rename_all = "snake_case")]
pub enum Action {
    LookAt(TargetArgs),
    ClickOn(TargetArgs),
    PlaceNear(TargetArgs),
    Turn(TurnArgs),
    Move(MoveArgs),
    Jump,
    Mine(MineArgs),
    PlaceBlock,
    SelectSlot(SelectSlotArgs),
    Scroll(ScrollArgs),
    ObserveInventory,
    CloseInventory,
    VisualQuestion(QuestionArgs),
    Craft(CraftArgs),
    Observe,
    Stop(StopArgs),
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::LookAt(_) => ActionKind::LookAt,
            Action::ClickOn(_) => ActionKind::ClickOn,
            Action::PlaceNear(_) => ActionKind::PlaceNear,
            Action::Turn(_) => ActionKind::Turn,
            Action::Move(_) => ActionKind::Move,
            Action::Jump => ActionKind::Jump,
            Action::Mine(_) => ActionKind::Mine,
            Action::PlaceBlock => ActionKind::PlaceBlock,
            Action::SelectSlot(_) => ActionKind::SelectSlot,
            Action::Scroll(_) => ActionKind::Scroll,
            Action::ObserveInventory => ActionKind::ObserveInventory,
            Action::CloseInventory => ActionKind::CloseInventory,
            Action::VisualQuestion(_) => ActionKind::VisualQuestion,
            Action::Craft(_) => ActionKind::Craft,
            Action::Observe => ActionKind::Observe,
            Action::Stop(_) => ActionKind::Stop,
        }
    }

    /// The on-screen description to ground, for kinds that need one.
    pub fn grounding_target(&self) -> Option<&str> {
        match self {
            Action::LookAt(args) | Action::ClickOn(args) | Action::PlaceNear(args) => {
                Some(args.target.as_str())
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Decision {
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

impl Decision {
    pub fn new(action: Action) -> Self {
        Self {
            action,
            rationale: None,
        }
    }

    pub fn kind(&self) -> ActionKind {
        self.action.kind()
    }

    /// The no-op the loop substitutes when a reply could not be parsed.
    pub fn observe() -> Self {
        Self::new(Action::Observe)
    }
}

fn parse_args<T: for<'de> Deserialize<'de>>(
    val: serde_json::Value,
    kind: ActionKind,
) -> Result<T, DecisionParseError> {
    serde_json::from_value::<T>(val)
        .map_err(|e| DecisionParseError::InvalidArguments(format!("{kind}: {e}")))
}

fn validate_phrase(
    text: String,
    kind: ActionKind,
    field: &str,
) -> Result<String, DecisionParseError> {
    let text = text.trim().to_string();
    if text.is_empty() {
        return Err(DecisionParseError::InvalidArguments(format!(
            "{kind}: {field} must be non-empty"
        )));
    }
    if text.chars().count() > MAX_TARGET_CHARS {
        return Err(DecisionParseError::InvalidArguments(format!(
            "{kind}: {field} must be at most {MAX_TARGET_CHARS} chars"
        )));
    }
    Ok(text)
}

fn target_args(val: serde_json::Value, kind: ActionKind) -> Result<TargetArgs, DecisionParseError> {
    let args = parse_args::<TargetArgs>(val, kind)?;
    Ok(TargetArgs {
        target: validate_phrase(args.target, kind, "target")?,
    })
}

impl TryFrom<DecisionWire> for Action {
    type Error = DecisionParseError;

    fn try_from(wire: DecisionWire) -> Result<Self, Self::Error> {
        let kind = ActionKind::from_name(&wire.name)
            .ok_or_else(|| DecisionParseError::UnsupportedAction(wire.name.trim().to_string()))?;
        let args = wire.arguments;
        match kind {
            ActionKind::LookAt => Ok(Action::LookAt(target_args(args, kind)?)),
            ActionKind::ClickOn => Ok(Action::ClickOn(target_args(args, kind)?)),
            ActionKind::PlaceNear => Ok(Action::PlaceNear(target_args(args, kind)?)),
            ActionKind::Turn => Ok(Action::Turn(parse_args(args, kind)?)),
            ActionKind::Move => {
                let args = parse_args::<MoveArgs>(args, kind)?;
                if !args.blocks.is_finite() || args.blocks <= 0.0 || args.blocks > MAX_MOVE_BLOCKS {
                    return Err(DecisionParseError::InvalidArguments(format!(
                        "move: blocks must be greater than 0 and at most {MAX_MOVE_BLOCKS}"
                    )));
                }
                Ok(Action::Move(args))
            }
            ActionKind::Jump => Ok(Action::Jump),
            ActionKind::Mine => {
                let args = if args.is_null() {
                    MineArgs::default()
                } else {
                    parse_args::<MineArgs>(args, kind)?
                };
                if !MINE_MS_RANGE.contains(&args.duration_ms) {
                    return Err(DecisionParseError::InvalidArguments(format!(
                        "mine: duration_ms must be {}..={}",
                        MINE_MS_RANGE.start(),
                        MINE_MS_RANGE.end()
                    )));
                }
                Ok(Action::Mine(args))
            }
            ActionKind::PlaceBlock => Ok(Action::PlaceBlock),
            ActionKind::SelectSlot => {
                let args = parse_args::<SelectSlotArgs>(args, kind)?;
                if !(1..=9).contains(&args.slot) {
                    return Err(DecisionParseError::InvalidArguments(
                        "select_slot: slot must be 1..=9".to_string(),
                    ));
                }
                Ok(Action::SelectSlot(args))
            }
            ActionKind::Scroll => {
                let args = parse_args::<ScrollArgs>(args, kind)?;
                if args.amount == 0 || args.amount.abs() > MAX_SCROLL {
                    return Err(DecisionParseError::InvalidArguments(format!(
                        "scroll: amount must be nonzero and within -{MAX_SCROLL}..={MAX_SCROLL}"
                    )));
                }
                Ok(Action::Scroll(args))
            }
            ActionKind::ObserveInventory => Ok(Action::ObserveInventory),
            ActionKind::CloseInventory => Ok(Action::CloseInventory),
            ActionKind::VisualQuestion => {
                let args = parse_args::<QuestionArgs>(args, kind)?;
                Ok(Action::VisualQuestion(QuestionArgs {
                    question: validate_phrase(args.question, kind, "question")?,
                }))
            }
            ActionKind::Craft => {
                let args = parse_args::<CraftArgs>(args, kind)?;
                // Recipe book search matches display names, which use spaces.
                let item = args.item.replace('_', " ");
                Ok(Action::Craft(CraftArgs {
                    item: validate_phrase(item, kind, "item")?,
                }))
            }
            ActionKind::Observe => Ok(Action::Observe),
            ActionKind::Stop => {
                let args = if args.is_null() {
                    StopArgs {
                        reason: None,
                        goal_complete: true,
                    }
                } else {
                    parse_args::<StopArgs>(args, kind)?
                };
                Ok(Action::Stop(args))
            }
        }
    }
}

/// Extracts the JSON inside the single `<tool_call>...</tool_call>` block, together with
/// whatever prose the model wrote before it.
pub fn extract_tool_call_json(script: &str) -> Result<(&str, String), DecisionParseError> {
    let open = script
        .find(TOOL_CALL_START)
        .ok_or(DecisionParseError::MissingToolCallBlock)?;
    let start = open + TOOL_CALL_START.len();
    let rest = &script[start..];
    let end_rel = rest
        .find(TOOL_CALL_END)
        .ok_or(DecisionParseError::MissingToolCallBlock)?;
    let end = start + end_rel;

    // One decision per reply keeps "exactly one action per iteration" enforceable at parse time.
    let after_end = &script[end + TOOL_CALL_END.len()..];
    if after_end.contains(TOOL_CALL_START) || rest[..end_rel].contains(TOOL_CALL_START) {
        return Err(DecisionParseError::MultipleToolCallBlocks);
    }

    Ok((script[..open].trim(), script[start..end].trim().to_string()))
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max).collect();
    out.push('…');
    out
}

/// Parses a full model reply into a validated `Decision`.
///
/// Contract:
/// - Exactly one `<tool_call>...</tool_call>` block
/// - The JSON is an object `{ "name": "...", "arguments": { ... }, "rationale"?: "..." }`
/// - The named action is one of `available`
///
/// Without an explicit `rationale`, the prose preceding the block is kept as the rationale.
pub fn parse_decision(script: &str, available: &ActionSet) -> Result<Decision, DecisionParseError> {
    let (preamble, json_str) = extract_tool_call_json(script)?;

    let wire: DecisionWire = serde_json::from_str(&json_str)
        .map_err(|e| DecisionParseError::InvalidJson(format!("{e}: {json_str}")))?;

    let rationale = wire
        .rationale
        .clone()
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .or_else(|| (!preamble.is_empty()).then(|| preamble.to_string()))
        .map(|r| truncate_chars(&r, MAX_RATIONALE_CHARS));

    let action = Action::try_from(wire)?;
    if !available.contains(action.kind()) {
        return Err(DecisionParseError::UnavailableAction(action.kind().to_string()));
    }

    Ok(Decision { action, rationale })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all() -> ActionSet {
        ActionSet::all()
    }

    #[test]
    fn extract_ok_keeps_preamble() {
        let s = "I see stone ahead.\n<tool_call>\n{\"name\":\"jump\",\"arguments\":{}}\n</tool_call>\n";
        let (pre, json) = extract_tool_call_json(s).unwrap();
        assert_eq!(pre, "I see stone ahead.");
        assert_eq!(json, "{\"name\":\"jump\",\"arguments\":{}}");
    }

    #[test]
    fn extract_rejects_multiple_and_missing() {
        let s = "<tool_call>{\"name\":\"jump\"}</tool_call>\n<tool_call>{\"name\":\"jump\"}</tool_call>";
        assert_eq!(
            extract_tool_call_json(s).unwrap_err(),
            DecisionParseError::MultipleToolCallBlocks
        );
        assert_eq!(
            extract_tool_call_json("look_at(\"tree\")").unwrap_err(),
            DecisionParseError::MissingToolCallBlock
        );
        assert_eq!(
            extract_tool_call_json("<tool_call>{\"name\":\"jump\"}").unwrap_err(),
            DecisionParseError::MissingToolCallBlock
        );
    }

    #[test]
    fn parse_look_at_trims_target() {
        let s = "<tool_call>{\"name\":\"look_at\",\"arguments\":{\"target\":\"  stone block \"}}</tool_call>";
        let d = parse_decision(s, &all()).unwrap();
        assert_eq!(
            d.action,
            Action::LookAt(TargetArgs {
                target: "stone block".to_string()
            })
        );
        assert_eq!(d.rationale, None);
    }

    #[test]
    fn parse_rejects_empty_target() {
        let s = "<tool_call>{\"name\":\"click_on\",\"arguments\":{\"target\":\"  \"}}</tool_call>";
        let err = parse_decision(s, &all()).unwrap_err();
        assert!(err.to_string().contains("target must be non-empty"));
    }

    #[test]
    fn parse_rejects_hallucinated_action() {
        let s = "<tool_call>{\"name\":\"teleport\",\"arguments\":{}}</tool_call>";
        assert_eq!(
            parse_decision(s, &all()).unwrap_err(),
            DecisionParseError::UnsupportedAction("teleport".to_string())
        );
    }

    #[test]
    fn parse_rejects_action_outside_available_set() {
        let available = ActionSet::from_kinds([ActionKind::LookAt, ActionKind::Mine]);
        let s = "<tool_call>{\"name\":\"jump\",\"arguments\":{}}</tool_call>";
        assert_eq!(
            parse_decision(s, &available).unwrap_err(),
            DecisionParseError::UnavailableAction("jump".to_string())
        );
    }

    #[test]
    fn parse_mine_defaults_duration() {
        let d = parse_decision("<tool_call>{\"name\":\"mine\"}</tool_call>", &all()).unwrap();
        assert_eq!(d.action, Action::Mine(MineArgs { duration_ms: 4_000 }));

        let d = parse_decision(
            "<tool_call>{\"name\":\"mine\",\"arguments\":{\"duration_ms\":10000}}</tool_call>",
            &all(),
        )
        .unwrap();
        assert_eq!(d.action, Action::Mine(MineArgs { duration_ms: 10_000 }));
    }

    #[test]
    fn parse_rejects_out_of_range_arguments() {
        let cases = [
            r#"{"name":"move","arguments":{"direction":"forward","blocks":250}}"#,
            r#"{"name":"move","arguments":{"direction":"forward","blocks":0}}"#,
            r#"{"name":"mine","arguments":{"duration_ms":999999}}"#,
            r#"{"name":"mine","arguments":{"duration_ms":1}}"#,
            r#"{"name":"scroll","arguments":{"amount":50}}"#,
            r#"{"name":"scroll","arguments":{"amount":-11}}"#,
            r#"{"name":"scroll","arguments":{"amount":0}}"#,
        ];
        for json in cases {
            let reply = format!("<tool_call>{json}</tool_call>");
            let err = parse_decision(&reply, &all()).unwrap_err();
            assert!(
                matches!(err, DecisionParseError::InvalidArguments(_)),
                "{json} gave {err:?}"
            );
        }
    }

    #[test]
    fn parse_move_accepts_the_upper_bound() {
        let d = parse_decision(
            "<tool_call>{\"name\":\"move\",\"arguments\":{\"direction\":\"forward\",\"blocks\":100}}</tool_call>",
            &all(),
        )
        .unwrap();
        match d.action {
            Action::Move(args) => assert_eq!(args.blocks, MAX_MOVE_BLOCKS),
            other => panic!("expected move, got {other:?}"),
        }
    }

    #[test]
    fn parse_craft_uses_display_name() {
        let d = parse_decision(
            "<tool_call>{\"name\":\"craft\",\"arguments\":{\"item\":\"crafting_table\"}}</tool_call>",
            &all(),
        )
        .unwrap();
        assert_eq!(
            d.action,
            Action::Craft(CraftArgs {
                item: "crafting table".to_string()
            })
        );
        let s = "<tool_call>{\"name\":\"craft\",\"arguments\":{\"item\":\"\"}}</tool_call>";
        let err = parse_decision(s, &all()).unwrap_err();
        assert!(err.to_string().contains("item must be non-empty"));
    }

    #[test]
    fn parse_turn_rejects_unknown_direction() {
        let err = parse_decision(
            "<tool_call>{\"name\":\"turn\",\"arguments\":{\"direction\":\"backflip\"}}</tool_call>",
            &all(),
        )
        .unwrap_err();
        assert!(matches!(err, DecisionParseError::InvalidArguments(_)));
    }

    #[test]
    fn parse_select_slot_range() {
        let err = parse_decision(
            "<tool_call>{\"name\":\"select_slot\",\"arguments\":{\"slot\":0}}</tool_call>",
            &all(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("slot must be 1..=9"));
    }

    #[test]
    fn parse_invalid_json_is_parse_error() {
        let err = parse_decision("<tool_call>{name: look_at}</tool_call>", &all()).unwrap_err();
        assert!(matches!(err, DecisionParseError::InvalidJson(_)));
    }

    #[test]
    fn rationale_prefers_explicit_field_over_preamble() {
        let s = "thinking...\n<tool_call>{\"name\":\"observe\",\"rationale\":\"wait for the mob\"}</tool_call>";
        let d = parse_decision(s, &all()).unwrap();
        assert_eq!(d.rationale.as_deref(), Some("wait for the mob"));

        let s = "Nothing useful in view.\n<tool_call>{\"name\":\"observe\"}</tool_call>";
        let d = parse_decision(s, &all()).unwrap();
        assert_eq!(d.rationale.as_deref(), Some("Nothing useful in view."));
    }

    #[test]
    fn stop_defaults_to_goal_complete() {
        let d = parse_decision("<tool_call>{\"name\":\"stop\"}</tool_call>", &all()).unwrap();
        assert_eq!(
            d.action,
            Action::Stop(StopArgs {
                reason: None,
                goal_complete: true
            })
        );
    }

    #[test]
    fn action_serializes_as_name_and_arguments() {
        let v = serde_json::to_value(Action::Mine(MineArgs { duration_ms: 500 })).unwrap();
        assert_eq!(
            v,
            serde_json::json!({"name": "mine", "arguments": {"duration_ms": 500}})
        );
        let v = serde_json::to_value(Action::Jump).unwrap();
        assert_eq!(v, serde_json::json!({"name": "jump"}));
    }
}
