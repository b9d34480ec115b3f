use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::json;

use crate::vision::Frame;

/// One capture and what the loop knows alongside it. Read-only once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub tick: u64,
    pub captured_at: SystemTime,
    pub frame: Frame,
    /// Best-effort: tracks the last successful inventory open/close the loop dispatched.
    pub inventory_open: bool,
    /// Vision-model description of the scene, when enabled.
    pub scene: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ImageSummary {
    pub width: u32,
    pub height: u32,
    pub format: &'static str,
}

impl Observation {
    pub fn captured_at_ms(&self) -> u64 {
        self.captured_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    /// The part of the observation that goes into prompts and survives in logs. The image itself
    /// never does.
    pub fn summary(&self) -> serde_json::Value {
        json!({
            "tick": self.tick,
            "captured_at_ms": self.captured_at_ms(),
            "image": ImageSummary {
                width: self.frame.width,
                height: self.frame.height,
                format: self.frame.format_name(),
            },
            "inventory_open": self.inventory_open,
            "scene": self.scene,
        })
    }
}

/// Hands out monotonically increasing ticks and carries the inventory flag between captures.
#[derive(Debug, Clone, Default)]
pub struct ObservationBuilder {
    next_tick: u64,
    inventory_open: bool,
}

impl ObservationBuilder {
    pub fn build(&mut self, frame: Frame, scene: Option<String>) -> Observation {
        let tick = self.next_tick;
        self.next_tick = self.next_tick.saturating_add(1);
        Observation {
            tick,
            captured_at: SystemTime::now(),
            frame,
            inventory_open: self.inventory_open,
            scene,
        }
    }

    pub fn inventory_open(&self) -> bool {
        self.inventory_open
    }

    pub fn set_inventory_open(&mut self, open: bool) {
        self.inventory_open = open;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::scene_png;

    #[test]
    fn ticks_increase_and_inventory_flag_carries_over() {
        let frame = Frame::decode(scene_png(32, 16)).unwrap();
        let mut builder = ObservationBuilder::default();

        let a = builder.build(frame.clone(), None);
        builder.set_inventory_open(true);
        let b = builder.build(frame, Some("a cave".into()));

        assert_eq!((a.tick, b.tick), (0, 1));
        assert!(!a.inventory_open);
        assert!(b.inventory_open);
    }

    #[test]
    fn summary_omits_image_bytes() {
        let frame = Frame::decode(scene_png(32, 16)).unwrap();
        let obs = ObservationBuilder::default()
            .build(frame, Some("grass and a tree 5 blocks away".into()));
        let s = obs.summary();
        assert_eq!(s["image"], json!({"width": 32, "height": 16, "format": "png"}));
        assert_eq!(s["scene"], "grass and a tree 5 blocks away");
        assert!(!s.to_string().contains("base64"));
    }
}
