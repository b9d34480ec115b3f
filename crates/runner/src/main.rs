use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use voxel_pilot::agent::game_api::{InputControl, ScreenCapturer};
use voxel_pilot::agent::remote::{ControlScreenCapturer, RemoteInputControl, ScreenshotDirCapturer};
use voxel_pilot::agent::{
    AgentLoop, FailReason, GroundingClient, LoopServices, LoopState, RunReport,
};
use voxel_pilot::config::{CaptureMode, PilotConfig};
use voxel_pilot::llm::HttpLlmClient;

const EXIT_CONFIG: u8 = 2;
const EXIT_CAPTURE_UNAVAILABLE: u8 = 3;
const EXIT_DECISION_SERVICE: u8 = 4;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("voxel_pilot=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

/// Stopped runs exit 0 whatever the reason; the log line says which.
fn exit_code(state: LoopState) -> u8 {
    match state {
        LoopState::Failed(FailReason::CaptureUnavailable) => EXIT_CAPTURE_UNAVAILABLE,
        LoopState::Failed(FailReason::DecisionService) => EXIT_DECISION_SERVICE,
        _ => 0,
    }
}

fn build_agent(cfg: &PilotConfig) -> anyhow::Result<AgentLoop> {
    let http = reqwest::Client::builder()
        .build()
        .context("Failed to build HTTP client")?;

    let control: Arc<dyn InputControl> = Arc::new(RemoteInputControl::new(
        http.clone(),
        cfg.control.url.clone(),
        Duration::from_millis(cfg.control.timeout_ms),
    ));
    let capturer: Arc<dyn ScreenCapturer> = match cfg.capture.mode {
        CaptureMode::Control => Arc::new(ControlScreenCapturer::new(
            http.clone(),
            cfg.control.url.clone(),
            Duration::from_millis(cfg.capture.timeout_ms),
        )),
        CaptureMode::ScreenshotDir => {
            let dir = cfg
                .capture
                .screenshot_dir
                .clone()
                .context("capture.screenshot_dir is not set")?;
            Arc::new(ScreenshotDirCapturer::new(
                control.clone(),
                dir,
                Duration::from_millis(cfg.capture.settle_ms),
            ))
        }
    };

    let services = LoopServices {
        capturer,
        grounder: Arc::new(GroundingClient::new(http.clone(), cfg.grounding_config())),
        llm: Arc::new(HttpLlmClient::new(http, cfg.chat_config())),
        control,
    };
    Ok(AgentLoop::new(
        cfg.goal.clone(),
        services,
        cfg.loop_config()?,
        cfg.prompt_config(),
    ))
}

async fn run() -> anyhow::Result<RunReport> {
    let (cfg, path) = PilotConfig::load().context("Failed to load configuration")?;
    match &path {
        Some(path) => info!(path = %path.display(), "config.loaded"),
        None => info!("config.defaults"),
    }
    let mut agent = build_agent(&cfg)?;
    Ok(agent.run().await)
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    match run().await {
        Ok(report) => ExitCode::from(exit_code(report.final_state)),
        Err(err) => {
            error!(error = %format!("{err:#}"), "runner.startup_failed");
            ExitCode::from(EXIT_CONFIG)
        }
    }
}
