//! The perception-to-action loop: capture, decide, ground, dispatch, record.
//!
//! The `<tool_call>...</tool_call>` contract and the action set live in `wire`/`tools`;
//! service seams are the traits in `game_api`, with HTTP implementations in `grounding`,
//! `remote` and `crate::llm`.

pub mod decision;
pub mod game_api;
pub mod grounding;
pub mod harness;
pub mod input;
pub mod r#loop;
pub mod memory;
pub mod observation;
pub mod prompt;
pub mod remote;
pub mod tools;
pub mod translator;
pub mod wire;

pub use grounding::{GroundingClient, GroundingConfig, GroundingProtocol, GroundingResult};
pub use harness::RunReport;
pub use r#loop::{AgentLoop, FailReason, LoopConfig, LoopServices, LoopState, StopReason};
pub use tools::ActionSet;
pub use wire::{Action, ActionKind, Decision, extract_tool_call_json, parse_decision};
