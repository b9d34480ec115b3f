use std::collections::BTreeSet;
use std::fmt::Write;

use super::wire::ActionKind;

pub fn signature(kind: ActionKind) -> &'static str {
    match kind {
        ActionKind::LookAt | ActionKind::ClickOn | ActionKind::PlaceNear => {
            "{\"target\":\"short noun phrase\"}"
        }
        ActionKind::Turn => "{\"direction\":\"left|right|up|down\"}",
        ActionKind::Move => {
            "{\"direction\":\"forward|backward|left|right\",\"blocks\":number greater than 0, at most 100}"
        }
        ActionKind::Mine => "{\"duration_ms\":150..=10000}",
        ActionKind::SelectSlot => "{\"slot\":1..=9}",
        ActionKind::Scroll => "{\"amount\":-10..=10, not 0}",
        ActionKind::VisualQuestion => "{\"question\":\"...\"}",
        ActionKind::Craft => "{\"item\":\"recipe name\"}",
        ActionKind::Stop => "{\"reason\":\"...\",\"goal_complete\":true|false}",
        ActionKind::Jump
        | ActionKind::PlaceBlock
        | ActionKind::ObserveInventory
        | ActionKind::CloseInventory
        | ActionKind::Observe => "{}",
    }
}

pub fn description(kind: ActionKind) -> &'static str {
    match kind {
        ActionKind::LookAt => {
            "Turn the camera toward a visible object. The object must be in view."
        }
        ActionKind::ClickOn => {
            "Left-click a GUI element such as an inventory slot. Only useful while a screen like the inventory is open."
        }
        ActionKind::PlaceNear => "Look at a visible spot and place the held block there.",
        ActionKind::Turn => "Rotate the camera by a fixed step in one direction.",
        ActionKind::Move => {
            "Walk a number of blocks. Look at your destination first and make sure the path is clear."
        }
        ActionKind::Jump => "Jump once.",
        ActionKind::Mine => {
            "Hold the attack button on the block under the crosshair. The block must be within 3 blocks."
        }
        ActionKind::PlaceBlock => {
            "Right-click: place the held block or use the object under the crosshair."
        }
        ActionKind::SelectSlot => "Select a hotbar slot.",
        ActionKind::Scroll => "Scroll the hotbar selection.",
        ActionKind::ObserveInventory => {
            "Open the inventory so the next observation shows its contents."
        }
        ActionKind::CloseInventory => "Close the inventory or any open screen.",
        ActionKind::VisualQuestion => {
            "Ask the vision model a question about the current view. The answer is recorded in history."
        }
        ActionKind::Craft => {
            "Craft an item through the recipe book of the open crafting screen, opening the inventory if none is. For 3x3 recipes open a crafting table first."
        }
        ActionKind::Observe => "Do nothing this turn and observe again.",
        ActionKind::Stop => "End the run. Set goal_complete=false if you are giving up.",
    }
}

/// The enumerated actions the decision model may choose from for one run.
///
/// `observe` and `stop` are always present: the loop needs the first as its corrective no-op
/// and the model needs the second to end a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionSet {
    kinds: BTreeSet<ActionKind>,
}

impl ActionSet {
    pub fn all() -> Self {
        Self::from_kinds(ActionKind::ALL)
    }

    pub fn from_kinds(kinds: impl IntoIterator<Item = ActionKind>) -> Self {
        let mut kinds: BTreeSet<ActionKind> = kinds.into_iter().collect();
        kinds.insert(ActionKind::Observe);
        kinds.insert(ActionKind::Stop);
        Self { kinds }
    }

    /// Builds the set from configured wire names; returns the first unknown name as the error.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, String> {
        let kinds = names
            .iter()
            .map(|n| ActionKind::from_name(n.as_ref()).ok_or_else(|| n.as_ref().to_string()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_kinds(kinds))
    }

    pub fn contains(&self, kind: ActionKind) -> bool {
        self.kinds.contains(&kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = ActionKind> + '_ {
        self.kinds.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

impl Default for ActionSet {
    fn default() -> Self {
        Self::all()
    }
}

/// Renders the `[TOOLS]` prompt section in a fixed order.
pub fn render_tool_list(available: &ActionSet) -> String {
    let mut out = String::from("Allowed tool calls:\n");
    for kind in available.iter() {
        let _ = writeln!(
            out,
            "- {} {} : {}",
            kind.name(),
            signature(kind),
            description(kind)
        );
    }
    out
}
