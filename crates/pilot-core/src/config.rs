//! `voxel-pilot.toml` plus `VOXEL_PILOT_*` environment overrides, read once at start-up.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail, ensure};
use reqwest::Url;
use serde::Deserialize;

use crate::agent::grounding::{GroundingConfig, GroundingProtocol};
use crate::agent::r#loop::{DEFAULT_SCENE_QUESTION, LoopConfig};
use crate::agent::prompt::{DEFAULT_SYSTEM_PROMPT, PromptConfig};
use crate::agent::tools::ActionSet;
use crate::config_loader::ConfigLoader;
use crate::llm::ChatConfig;
use crate::vision::ScreenGeometry;

pub const CONFIG_FILE: &str = "voxel-pilot.toml";

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct DecisionSection {
    /// OpenAI-compatible base URL, including `/v1` if the server wants it.
    pub url: String,
    pub model: String,
    pub temperature: Option<f32>,
    pub timeout_ms: u64,
    pub attach_image: bool,
}

impl Default for DecisionSection {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:1234/v1".to_string(),
            model: "qwen2.5-7b-instruct".to_string(),
            temperature: Some(0.2),
            timeout_ms: 60_000,
            attach_image: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct VisionSection {
    pub url: String,
    pub model: String,
    pub protocol: GroundingProtocol,
    pub timeout_ms: u64,
    pub describe_scene: bool,
    pub scene_question: Option<String>,
}

impl Default for VisionSection {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8000".to_string(),
            model: "allenai/Molmo-7B-D-0924".to_string(),
            protocol: GroundingProtocol::Json,
            timeout_ms: 30_000,
            describe_scene: false,
            scene_question: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ControlSection {
    pub url: String,
    pub timeout_ms: u64,
}

impl Default for ControlSection {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:5000".to_string(),
            timeout_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    /// `GET {control_url}/screenshot`.
    #[default]
    Control,
    /// Press the screenshot key and read the game's screenshot directory.
    ScreenshotDir,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CaptureSection {
    pub mode: CaptureMode,
    pub screenshot_dir: Option<PathBuf>,
    pub timeout_ms: u64,
    /// Wait after the screenshot key before looking for the file.
    pub settle_ms: u64,
}

impl Default for CaptureSection {
    fn default() -> Self {
        Self {
            mode: CaptureMode::Control,
            screenshot_dir: None,
            timeout_ms: 5_000,
            settle_ms: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LoopSection {
    pub max_iterations: u64,
    pub max_duration_secs: u64,
    pub history_window: usize,
    pub max_history_chars: usize,
    pub max_capture_failures: u32,
    pub capture_retry_delay_ms: u64,
    pub grounding_retries: u32,
    pub enable_repair: bool,
}

impl Default for LoopSection {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            max_duration_secs: 30 * 60,
            history_window: 12,
            max_history_chars: 6_000,
            max_capture_failures: 3,
            capture_retry_delay_ms: 500,
            grounding_retries: 1,
            enable_repair: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ScreenSection {
    pub width: u32,
    pub height: u32,
    pub look_gain: f32,
}

impl Default for ScreenSection {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            look_gain: 1.0,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PilotConfig {
    pub goal: String,
    pub system_prompt: Option<String>,
    /// Wire names; empty means every action. `observe` and `stop` are always added.
    pub available_actions: Vec<String>,
    pub decision: DecisionSection,
    pub vision: VisionSection,
    pub control: ControlSection,
    pub capture: CaptureSection,
    #[serde(rename = "loop")]
    pub run: LoopSection,
    pub screen: ScreenSection,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl PilotConfig {
    /// Resolves `voxel-pilot.toml`, applies process environment overrides and validates.
    pub fn load() -> anyhow::Result<(Self, Option<PathBuf>)> {
        let (mut cfg, path) = ConfigLoader::parse_or_default::<PilotConfig>(CONFIG_FILE)?;
        cfg.apply_env(|key| std::env::var(key).ok())?;
        cfg.validate()?;
        Ok((cfg, path))
    }

    /// Applies `VOXEL_PILOT_*` overrides from `lookup`. Empty values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        let get = |key: &str| non_empty(lookup(key));
        if let Some(v) = get("VOXEL_PILOT_GOAL") {
            self.goal = v;
        }
        if let Some(v) = get("VOXEL_PILOT_SYSTEM_PROMPT") {
            self.system_prompt = Some(v);
        }
        if let Some(v) = get("VOXEL_PILOT_DECISION_URL") {
            self.decision.url = v;
        }
        if let Some(v) = get("VOXEL_PILOT_DECISION_MODEL") {
            self.decision.model = v;
        }
        if let Some(v) = get("VOXEL_PILOT_VISION_URL") {
            self.vision.url = v;
        }
        if let Some(v) = get("VOXEL_PILOT_CONTROL_URL") {
            self.control.url = v;
        }
        if let Some(v) = get("VOXEL_PILOT_MAX_ITERATIONS") {
            self.run.max_iterations = v
                .trim()
                .parse()
                .with_context(|| format!("VOXEL_PILOT_MAX_ITERATIONS={v:?} is not a number"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            !self.goal.trim().is_empty(),
            "goal must be set (config `goal` or VOXEL_PILOT_GOAL)"
        );
        self.action_set()?;

        for (name, url) in [
            ("decision.url", &self.decision.url),
            ("vision.url", &self.vision.url),
            ("control.url", &self.control.url),
        ] {
            Url::parse(url).with_context(|| format!("{name} is not a valid URL: {url:?}"))?;
        }

        for (name, value) in [
            ("loop.max_iterations", self.run.max_iterations),
            ("loop.max_duration_secs", self.run.max_duration_secs),
            ("loop.history_window", self.run.history_window as u64),
            ("loop.max_history_chars", self.run.max_history_chars as u64),
            ("loop.max_capture_failures", u64::from(self.run.max_capture_failures)),
            ("decision.timeout_ms", self.decision.timeout_ms),
            ("vision.timeout_ms", self.vision.timeout_ms),
            ("control.timeout_ms", self.control.timeout_ms),
            ("capture.timeout_ms", self.capture.timeout_ms),
            ("screen.width", u64::from(self.screen.width)),
            ("screen.height", u64::from(self.screen.height)),
        ] {
            ensure!(value > 0, "{name} must be greater than zero");
        }

        ensure!(self.run.grounding_retries <= 1, "loop.grounding_retries must be 0 or 1");
        ensure!(
            self.screen.look_gain.is_finite() && self.screen.look_gain > 0.0,
            "screen.look_gain must be a positive number"
        );
        if self.capture.mode == CaptureMode::ScreenshotDir && self.capture.screenshot_dir.is_none()
        {
            bail!("capture.screenshot_dir is required when capture.mode = \"screenshot_dir\"");
        }
        Ok(())
    }

    pub fn action_set(&self) -> anyhow::Result<ActionSet> {
        if self.available_actions.is_empty() {
            return Ok(ActionSet::all());
        }
        ActionSet::from_names(&self.available_actions)
            .map_err(|name| anyhow::anyhow!("available_actions contains unknown action {name:?}"))
    }

    pub fn prompt_config(&self) -> PromptConfig {
        PromptConfig {
            system_prompt: self
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            history_window: self.run.history_window,
            max_history_chars: self.run.max_history_chars,
            attach_image: self.decision.attach_image,
            ..PromptConfig::default()
        }
    }

    pub fn loop_config(&self) -> anyhow::Result<LoopConfig> {
        Ok(LoopConfig {
            max_iterations: self.run.max_iterations,
            max_duration: Duration::from_secs(self.run.max_duration_secs),
            capture_timeout: Duration::from_millis(self.capture.timeout_ms),
            max_capture_failures: self.run.max_capture_failures,
            capture_retry_delay: Duration::from_millis(self.run.capture_retry_delay_ms),
            grounding_retries: self.run.grounding_retries,
            enable_repair: self.run.enable_repair,
            describe_scene: self.vision.describe_scene,
            scene_question: self
                .vision
                .scene_question
                .clone()
                .unwrap_or_else(|| DEFAULT_SCENE_QUESTION.to_string()),
            available: self.action_set()?,
            screen: ScreenGeometry {
                width: self.screen.width,
                height: self.screen.height,
            },
            look_gain: self.screen.look_gain,
        })
    }

    pub fn chat_config(&self) -> ChatConfig {
        ChatConfig {
            base_url: self.decision.url.clone(),
            model: self.decision.model.clone(),
            temperature: self.decision.temperature,
            timeout: Duration::from_millis(self.decision.timeout_ms),
        }
    }

    pub fn grounding_config(&self) -> GroundingConfig {
        GroundingConfig {
            base_url: self.vision.url.clone(),
            model: self.vision.model.clone(),
            protocol: self.vision.protocol,
            timeout: Duration::from_millis(self.vision.timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::agent::wire::ActionKind;

    const SAMPLE: &str = r#"
goal = "mine one block of stone"
available_actions = ["look_at", "mine", "observe_inventory"]

[decision]
url = "http://10.0.0.2:1234/v1"
model = "llama-3.1-8b"

[vision]
protocol = "point_chat"
describe_scene = true

[capture]
mode = "screenshot_dir"
screenshot_dir = "/home/steve/.minecraft/screenshots"

[loop]
max_iterations = 40
history_window = 8

[screen]
width = 2560
height = 1440
look_gain = 0.6
"#;

    fn sample() -> PilotConfig {
        ConfigLoader::parse_from_string(SAMPLE).unwrap()
    }

    #[test]
    fn parses_sections_and_keeps_defaults() {
        let cfg = sample();
        cfg.validate().unwrap();
        assert_eq!(cfg.decision.model, "llama-3.1-8b");
        assert_eq!(cfg.decision.timeout_ms, 60_000);
        assert_eq!(cfg.vision.protocol, GroundingProtocol::PointChat);
        assert_eq!(cfg.capture.mode, CaptureMode::ScreenshotDir);
        assert_eq!(cfg.run.max_capture_failures, 3);

        let lc = cfg.loop_config().unwrap();
        assert_eq!(lc.max_iterations, 40);
        assert!(lc.describe_scene);
        assert_eq!(lc.scene_question, DEFAULT_SCENE_QUESTION);
        assert!(lc.available.contains(ActionKind::Stop));
        assert!(!lc.available.contains(ActionKind::Jump));
        assert_eq!(cfg.prompt_config().history_window, 8);
    }

    #[test]
    fn env_overrides_ignore_empty_values() {
        let mut cfg = sample();
        let env: HashMap<&str, &str> = HashMap::from([
            ("VOXEL_PILOT_GOAL", "collect wood"),
            ("VOXEL_PILOT_DECISION_MODEL", "  "),
            ("VOXEL_PILOT_CONTROL_URL", "http://192.168.1.7:5000"),
            ("VOXEL_PILOT_MAX_ITERATIONS", "5"),
        ]);
        cfg.apply_env(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(cfg.goal, "collect wood");
        assert_eq!(cfg.decision.model, "llama-3.1-8b");
        assert_eq!(cfg.control.url, "http://192.168.1.7:5000");
        assert_eq!(cfg.run.max_iterations, 5);
    }

    #[test]
    fn bad_numeric_override_is_an_error() {
        let mut cfg = sample();
        let err = cfg
            .apply_env(|k| (k == "VOXEL_PILOT_MAX_ITERATIONS").then(|| "many".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("VOXEL_PILOT_MAX_ITERATIONS"));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let cfg = PilotConfig::default();
        assert!(cfg.validate().unwrap_err().to_string().contains("goal"));

        let mut cfg = sample();
        cfg.available_actions.push("fly".into());
        assert!(cfg.validate().unwrap_err().to_string().contains("\"fly\""));

        let mut cfg = sample();
        cfg.vision.url = "not a url".into();
        assert!(cfg.validate().unwrap_err().to_string().contains("vision.url"));

        let mut cfg = sample();
        cfg.run.history_window = 0;
        assert!(cfg.validate().unwrap_err().to_string().contains("history_window"));

        let mut cfg = sample();
        cfg.capture.screenshot_dir = None;
        assert!(cfg.validate().unwrap_err().to_string().contains("screenshot_dir"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = ConfigLoader::parse_from_string::<PilotConfig>(
            "goal = \"x\"\n[loop]\nmax_iteration = 3\n",
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("max_iteration"));
    }
}
