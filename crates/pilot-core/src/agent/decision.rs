use std::sync::Arc;

use tracing::{debug, warn};

use super::game_api::LlmClient;
use super::memory::AgentMemory;
use super::observation::Observation;
use super::prompt::{PromptConfig, build_decision_messages};
use super::tools::ActionSet;
use super::wire::{Decision, parse_decision};
use crate::error::DecisionError;
use crate::llm::ChatMessage;

const REPAIR_INSTRUCTION: &str = "Your previous response was invalid.\n\
Return exactly one <tool_call>...</tool_call> block.\n\
The JSON must be an object with keys: name, arguments (and optional: rationale), \
and name must be one of the allowed tool calls.\n";

/// Asks the reasoning model for the next action and holds it to the tool-call grammar.
#[derive(Clone)]
pub struct DecisionClient {
    llm: Arc<dyn LlmClient>,
    pub prompt: PromptConfig,
    /// Re-prompt once with the invalid output before reporting a parse error.
    pub enable_repair: bool,
}

impl std::fmt::Debug for DecisionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionClient")
            .field("prompt", &self.prompt)
            .field("enable_repair", &self.enable_repair)
            .finish_non_exhaustive()
    }
}

impl DecisionClient {
    pub fn new(llm: Arc<dyn LlmClient>, prompt: PromptConfig) -> Self {
        Self {
            llm,
            prompt,
            enable_repair: false,
        }
    }

    pub fn with_repair(mut self, enable: bool) -> Self {
        self.enable_repair = enable;
        self
    }

    pub async fn decide(
        &self,
        mem: &AgentMemory,
        obs: &Observation,
        available: &ActionSet,
    ) -> Result<Decision, DecisionError> {
        let messages = build_decision_messages(obs, mem, available, &self.prompt);
        let raw = self.llm.complete(messages.clone()).await?;
        debug!(tick = obs.tick, chars = raw.len(), "decision.reply");

        let err = match parse_decision(&raw, available) {
            Ok(decision) => return Ok(decision),
            Err(err) => err,
        };
        if !self.enable_repair {
            return Err(err.into());
        }

        warn!(error = %err, "decision.repair");
        let mut repair = messages;
        repair.push(ChatMessage::assistant(raw));
        repair.push(ChatMessage::user(format!("[REPAIR]\n{REPAIR_INSTRUCTION}[ERROR]\n{err}\n")));
        let repaired = self.llm.complete(repair).await?;
        Ok(parse_decision(&repaired, available)?)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;
    use crate::agent::game_api::BoxFuture;
    use crate::agent::observation::ObservationBuilder;
    use crate::agent::wire::{Action, DecisionParseError, TargetArgs};
    use crate::error::ServiceError;
    use crate::vision::{Frame, scene_png};

    #[derive(Default)]
    struct ScriptedLlm {
        replies: Mutex<VecDeque<Result<String, ServiceError>>>,
        calls: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedLlm {
        fn new(replies: impl IntoIterator<Item = Result<String, ServiceError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().collect()),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    impl LlmClient for ScriptedLlm {
        fn complete<'a>(
            &'a self,
            messages: Vec<ChatMessage>,
        ) -> BoxFuture<'a, Result<String, ServiceError>> {
            Box::pin(async move {
                self.calls.lock().unwrap().push(messages);
                self.replies
                    .lock()
                    .unwrap()
                    .pop_front()
                    .unwrap_or_else(|| Err(ServiceError::Transport("script exhausted".into())))
            })
        }
    }

    fn obs() -> Observation {
        ObservationBuilder::default().build(Frame::decode(scene_png(64, 48)).unwrap(), None)
    }

    const LOOK: &str = "<tool_call>{\"name\":\"look_at\",\"arguments\":{\"target\":\"stone block\"}}</tool_call>";

    #[tokio::test]
    async fn valid_reply_becomes_decision() {
        let llm = ScriptedLlm::new([Ok(LOOK.to_string())]);
        let client = DecisionClient::new(llm.clone(), PromptConfig::default());
        let d = client
            .decide(&AgentMemory::new("mine stone"), &obs(), &ActionSet::all())
            .await
            .unwrap();
        assert_eq!(
            d.action,
            Action::LookAt(TargetArgs {
                target: "stone block".into()
            })
        );
        assert_eq!(llm.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invalid_reply_is_a_parse_error_without_repair() {
        let llm = ScriptedLlm::new([Ok("I will look at the stone.".to_string())]);
        let client = DecisionClient::new(llm.clone(), PromptConfig::default());
        let err = client
            .decide(&AgentMemory::new("g"), &obs(), &ActionSet::all())
            .await
            .unwrap_err();
        assert_eq!(err, DecisionError::Parse(DecisionParseError::MissingToolCallBlock));
        assert_eq!(llm.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn repair_reprompts_once_with_the_invalid_output() {
        let llm = ScriptedLlm::new([Ok("look_at(stone)".to_string()), Ok(LOOK.to_string())]);
        let client = DecisionClient::new(llm.clone(), PromptConfig::default()).with_repair(true);
        let d = client
            .decide(&AgentMemory::new("g"), &obs(), &ActionSet::all())
            .await
            .unwrap();
        assert!(matches!(d.action, Action::LookAt(_)));

        let calls = llm.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        let repair = &calls[1];
        assert_eq!(repair[repair.len() - 2].text(), "look_at(stone)");
        assert!(repair[repair.len() - 1].text().contains("[REPAIR]"));
    }

    #[tokio::test]
    async fn service_failure_is_a_service_error() {
        let llm = ScriptedLlm::new([Err(ServiceError::Timeout)]);
        let client = DecisionClient::new(llm, PromptConfig::default());
        let err = client
            .decide(&AgentMemory::new("g"), &obs(), &ActionSet::all())
            .await
            .unwrap_err();
        assert_eq!(err, DecisionError::Service(ServiceError::Timeout));
    }
}
