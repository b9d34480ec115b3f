use std::future::Future;
use std::pin::Pin;

use super::grounding::GroundingResult;
use super::input::InputOp;
use crate::error::{CaptureError, ControlError, GroundingError, ServiceError};
use crate::llm::ChatMessage;
use crate::vision::Frame;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Produces a still of the current game view.
pub trait ScreenCapturer: Send + Sync {
    fn capture<'a>(&'a self) -> BoxFuture<'a, Result<Frame, CaptureError>>;
}

/// The local input control surface. Only the input synthesizer (and the screenshot-key tap of
/// the directory capturer) writes to it.
pub trait InputControl: Send + Sync {
    fn send<'a>(&'a self, op: &'a InputOp) -> BoxFuture<'a, Result<(), ControlError>>;
}

/// Vision-language model: grounds target descriptions and answers questions about a frame.
pub trait Grounder: Send + Sync {
    fn locate<'a>(
        &'a self,
        frame: &'a Frame,
        description: &'a str,
    ) -> BoxFuture<'a, Result<GroundingResult, GroundingError>>;

    fn ask<'a>(
        &'a self,
        frame: &'a Frame,
        question: &'a str,
    ) -> BoxFuture<'a, Result<String, GroundingError>>;
}

/// Reasoning model behind an OpenAI-compatible chat endpoint; returns the raw reply text.
pub trait LlmClient: Send + Sync {
    fn complete<'a>(
        &'a self,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'a, Result<String, ServiceError>>;
}
