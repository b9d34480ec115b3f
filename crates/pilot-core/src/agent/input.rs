use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::game_api::InputControl;
use crate::error::{ControlError, DispatchError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

/// One primitive op as sent to the input control service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum InputOp {
    KeyDown { key: String },
    KeyUp { key: String },
    /// Absolute cursor move in screen pixels (GUI screens).
    MoveTo { x: i32, y: i32, duration_ms: u32 },
    /// Relative mouse move; the game reads it as camera rotation while the cursor is captured.
    MoveBy { dx: i32, dy: i32, duration_ms: u32 },
    MouseDown { button: MouseButton },
    MouseUp { button: MouseButton },
    Scroll { amount: i32 },
    /// Types literal text into the focused GUI field.
    TypeText { text: String },
}

/// An op plus the gap to wait after it before the next event. Holds are expressed as the gap
/// between a down and its matching up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputEvent {
    pub op: InputOp,
    pub gap: Duration,
}

impl InputEvent {
    pub fn new(op: InputOp, gap_ms: u64) -> Self {
        Self {
            op,
            gap: Duration::from_millis(gap_ms),
        }
    }

    pub fn key_down(key: &str, gap_ms: u64) -> Self {
        Self::new(InputOp::KeyDown { key: key.to_string() }, gap_ms)
    }

    pub fn key_up(key: &str, gap_ms: u64) -> Self {
        Self::new(InputOp::KeyUp { key: key.to_string() }, gap_ms)
    }

    pub fn mouse_down(button: MouseButton, gap_ms: u64) -> Self {
        Self::new(InputOp::MouseDown { button }, gap_ms)
    }

    pub fn mouse_up(button: MouseButton, gap_ms: u64) -> Self {
        Self::new(InputOp::MouseUp { button }, gap_ms)
    }
}

/// Sum of all gaps: how long the sequence keeps the input surface busy.
pub fn total_duration(events: &[InputEvent]) -> Duration {
    events.iter().map(|e| e.gap).sum()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub dispatched: usize,
}

/// Executes input sequences strictly in order against the control surface.
#[derive(Clone)]
pub struct InputSynthesizer {
    control: Arc<dyn InputControl>,
}

impl std::fmt::Debug for InputSynthesizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputSynthesizer").finish_non_exhaustive()
    }
}

impl InputSynthesizer {
    pub fn new(control: Arc<dyn InputControl>) -> Self {
        Self { control }
    }

    /// No reordering, no coalescing, no rollback: on failure the events before it have
    /// already reached the game.
    pub async fn dispatch(&self, events: &[InputEvent]) -> Result<DispatchReport, DispatchError> {
        let total = events.len();
        for (completed, event) in events.iter().enumerate() {
            if let Err(err) = self.control.send(&event.op).await {
                warn!(completed, total, error = %err, "input.dispatch_aborted");
                return Err(match err {
                    ControlError::FocusLost => DispatchError::FocusLost { completed, total },
                    source => DispatchError::Control {
                        completed,
                        total,
                        source,
                    },
                });
            }
            if !event.gap.is_zero() {
                tokio::time::sleep(event.gap).await;
            }
        }
        debug!(total, busy_ms = total_duration(events).as_millis() as u64, "input.dispatched");
        Ok(DispatchReport { dispatched: total })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::agent::game_api::BoxFuture;

    #[derive(Default)]
    struct RecordingControl {
        sent: Mutex<Vec<InputOp>>,
        fail_at: Option<(usize, ControlError)>,
    }

    impl InputControl for RecordingControl {
        fn send<'a>(&'a self, op: &'a InputOp) -> BoxFuture<'a, Result<(), ControlError>> {
            Box::pin(async move {
                let mut sent = self.sent.lock().unwrap();
                if let Some((idx, err)) = &self.fail_at
                    && sent.len() == *idx
                {
                    return Err(err.clone());
                }
                sent.push(op.clone());
                Ok(())
            })
        }
    }

    fn hold_w(ms: u64) -> Vec<InputEvent> {
        vec![
            InputEvent::key_down("w", ms),
            InputEvent::key_up("w", 100),
            InputEvent::key_down("space", 50),
            InputEvent::key_up("space", 0),
        ]
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_preserves_order_and_waits_gaps() {
        let control = Arc::new(RecordingControl::default());
        let synth = InputSynthesizer::new(control.clone());
        let events = hold_w(1_000);

        let started = tokio::time::Instant::now();
        let report = synth.dispatch(&events).await.unwrap();
        assert_eq!(report.dispatched, 4);
        assert!(started.elapsed() >= Duration::from_millis(1_150));

        let sent = control.sent.lock().unwrap().clone();
        let expected: Vec<InputOp> = events.into_iter().map(|e| e.op).collect();
        assert_eq!(sent, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn focus_loss_stops_mid_sequence_without_rollback() {
        let control = Arc::new(RecordingControl {
            sent: Mutex::new(Vec::new()),
            fail_at: Some((2, ControlError::FocusLost)),
        });
        let synth = InputSynthesizer::new(control.clone());

        let err = synth.dispatch(&hold_w(200)).await.unwrap_err();
        assert_eq!(
            err,
            DispatchError::FocusLost {
                completed: 2,
                total: 4
            }
        );
        // The key press and release already happened; nothing is undone.
        assert_eq!(control.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn other_control_failures_keep_their_cause() {
        let control = Arc::new(RecordingControl {
            sent: Mutex::new(Vec::new()),
            fail_at: Some((0, ControlError::Rejected("unknown key".into()))),
        });
        let err = InputSynthesizer::new(control)
            .dispatch(&hold_w(10))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Control {
                completed: 0,
                source: ControlError::Rejected(_),
                ..
            }
        ));
    }

    #[test]
    fn ops_serialize_with_op_tag() {
        let v = serde_json::to_value(InputOp::MoveBy {
            dx: -60,
            dy: 0,
            duration_ms: 500,
        })
        .unwrap();
        assert_eq!(
            v,
            serde_json::json!({"op": "move_by", "dx": -60, "dy": 0, "duration_ms": 500})
        );
        let v = serde_json::to_value(InputOp::TypeText {
            text: "stick".into(),
        })
        .unwrap();
        assert_eq!(v, serde_json::json!({"op": "type_text", "text": "stick"}));
    }

    #[test]
    fn total_duration_sums_gaps() {
        assert_eq!(total_duration(&hold_w(1_000)), Duration::from_millis(1_150));
    }
}
