use serde_json::json;

use super::memory::{ActionHistoryEntry, AgentMemory};
use super::observation::Observation;
use super::tools::{ActionSet, render_tool_list};
use crate::llm::ChatMessage;

pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are an agent playing Minecraft through screenshots and synthetic input. \
You cannot see the screen yourself: a vision model grounds the objects you name \
and answers your visual questions. Work toward the goal one action at a time, \
using the history to learn from failed or unresolvable steps. \
Look at a block before mining it, and only move toward things you have looked at.";

const TOOL_CALL_CONTRACT: &str = "\
Return exactly one <tool_call> JSON block. \
You may write one short sentence of reasoning before it.\n\n\
Format:\n<tool_call>\n\
{\"name\":\"look_at\",\"arguments\":{\"target\":\"stone block\"},\
\"rationale\":\"stone is needed for the goal\"}\n\
</tool_call>";

#[derive(Debug, Clone)]
pub struct PromptConfig {
    pub system_prompt: String,
    pub tool_call_contract: String,
    /// Maximum number of most-recent history entries rendered into the prompt.
    pub history_window: usize,
    /// Oldest rendered entries are dropped while the history JSON exceeds this many chars.
    pub max_history_chars: usize,
    /// Attach the frame itself for multimodal decision models.
    pub attach_image: bool,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            tool_call_contract: TOOL_CALL_CONTRACT.to_string(),
            history_window: 12,
            max_history_chars: 6_000,
            attach_image: false,
        }
    }
}

/// Renders the bounded history window: at most `window` entries, oldest first, with further
/// oldest entries dropped until the JSON fits in `max_chars`.
pub fn render_history(mem: &AgentMemory, window: usize, max_chars: usize) -> serde_json::Value {
    let mut entries: Vec<&ActionHistoryEntry> = mem.recent(window);
    loop {
        let rendered = serde_json::to_value(&entries).unwrap_or_else(|_| json!([]));
        if entries.is_empty() || rendered.to_string().len() <= max_chars {
            return rendered;
        }
        entries.remove(0);
    }
}

pub fn build_state_json(obs: &Observation, mem: &AgentMemory, cfg: &PromptConfig) -> String {
    let state = json!({
        "goal": mem.goal,
        "last_error": mem.last_error,
        "observation": obs.summary(),
        "history": render_history(mem, cfg.history_window, cfg.max_history_chars),
    });
    serde_json::to_string_pretty(&state).unwrap_or_else(|_| "{}".to_string())
}

/// System message plus one user turn carrying `[STATE_JSON]`, `[TOOLS]` and `[CONTRACT]`.
pub fn build_decision_messages(
    obs: &Observation,
    mem: &AgentMemory,
    available: &ActionSet,
    cfg: &PromptConfig,
) -> Vec<ChatMessage> {
    let user = format!(
        "[STATE_JSON]\n{}\n\n[TOOLS]\n{}\n[CONTRACT]\n{}\n",
        build_state_json(obs, mem, cfg),
        render_tool_list(available),
        cfg.tool_call_contract
    );
    let user = if cfg.attach_image {
        ChatMessage::user_with_image(user, obs.frame.data_url())
    } else {
        ChatMessage::user(user)
    };
    vec![ChatMessage::system(cfg.system_prompt.clone()), user]
}
