//! HTTP-backed implementations of the capture and input seams.
//!
//! The input control service is a small local process that owns the OS input devices and the
//! game window; everything here talks to it over plain HTTP.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use super::game_api::{BoxFuture, InputControl, ScreenCapturer};
use super::input::InputOp;
use crate::error::{CaptureError, ControlError};
use crate::vision::Frame;

/// Filesystem mtimes can be coarser than the request clock; files this much older than the
/// request still count as fresh.
const MTIME_TOLERANCE: Duration = Duration::from_secs(1);
/// Extra request time per typed character.
const TYPE_CHAR_ALLOWANCE: Duration = Duration::from_millis(20);

#[derive(Debug, Deserialize)]
struct ControlReply {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

fn base(url: &str) -> &str {
    url.trim_end_matches('/')
}

/// `POST {control_url}/input`, one op per request.
#[derive(Debug, Clone)]
pub struct RemoteInputControl {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl RemoteInputControl {
    pub fn new(client: Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            timeout,
        }
    }

    async fn send_op(&self, op: &InputOp) -> Result<(), ControlError> {
        // Timed moves block the service for their duration.
        let extra = match op {
            InputOp::MoveTo { duration_ms, .. } | InputOp::MoveBy { duration_ms, .. } => {
                Duration::from_millis(u64::from(*duration_ms))
            }
            InputOp::TypeText { text } => TYPE_CHAR_ALLOWANCE * text.chars().count() as u32,
            _ => Duration::ZERO,
        };
        let res = self
            .client
            .post(format!("{}/input", base(&self.base_url)))
            .timeout(self.timeout + extra)
            .json(op)
            .send()
            .await
            .map_err(|e| ControlError::Transport(e.to_string()))?;

        let status = res.status();
        if status == StatusCode::CONFLICT {
            return Err(ControlError::FocusLost);
        }
        let body = res.text().await.map_err(|e| ControlError::Transport(e.to_string()))?;
        let reply = serde_json::from_str::<ControlReply>(&body).ok();
        if let Some(reply) = &reply
            && !reply.ok
        {
            return Err(match reply.error.as_deref() {
                Some("focus_lost") => ControlError::FocusLost,
                Some(other) => ControlError::Rejected(other.to_string()),
                None => ControlError::Rejected("unspecified".to_string()),
            });
        }
        if status.is_client_error() {
            return Err(ControlError::Rejected(format!("{status}: {body}")));
        }
        if !status.is_success() {
            return Err(ControlError::Transport(format!("{status}: {body}")));
        }
        Ok(())
    }
}

impl InputControl for RemoteInputControl {
    fn send<'a>(&'a self, op: &'a InputOp) -> BoxFuture<'a, Result<(), ControlError>> {
        Box::pin(self.send_op(op))
    }
}

/// `GET {control_url}/screenshot`.
#[derive(Debug, Clone)]
pub struct ControlScreenCapturer {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl ControlScreenCapturer {
    pub fn new(client: Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            timeout,
        }
    }

    async fn fetch(&self) -> Result<Frame, CaptureError> {
        let res = self
            .client
            .get(format!("{}/screenshot", base(&self.base_url)))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| CaptureError::Unavailable(format!("control service unreachable: {e}")))?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(CaptureError::Unavailable(format!("screenshot status {status}: {body}")));
        }
        let bytes = res
            .bytes()
            .await
            .map_err(|e| CaptureError::Unavailable(format!("screenshot body: {e}")))?;
        Frame::decode(bytes.to_vec())
    }
}

impl ScreenCapturer for ControlScreenCapturer {
    fn capture<'a>(&'a self) -> BoxFuture<'a, Result<Frame, CaptureError>> {
        Box::pin(self.fetch())
    }
}

/// Presses the game's screenshot key and reads the newest file from its screenshot directory.
#[derive(Clone)]
pub struct ScreenshotDirCapturer {
    control: Arc<dyn InputControl>,
    dir: PathBuf,
    settle: Duration,
    key: String,
}

impl std::fmt::Debug for ScreenshotDirCapturer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScreenshotDirCapturer")
            .field("dir", &self.dir)
            .field("settle", &self.settle)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

async fn newest_png(dir: &Path) -> std::io::Result<Option<(PathBuf, SystemTime)>> {
    let mut newest: Option<(PathBuf, SystemTime)> = None;
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_png = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("png"));
        if !is_png {
            continue;
        }
        let modified = entry.metadata().await?.modified()?;
        if newest.as_ref().is_none_or(|(_, t)| modified > *t) {
            newest = Some((path, modified));
        }
    }
    Ok(newest)
}

impl ScreenshotDirCapturer {
    pub fn new(control: Arc<dyn InputControl>, dir: impl Into<PathBuf>, settle: Duration) -> Self {
        Self {
            control,
            dir: dir.into(),
            settle,
            key: "f2".to_string(),
        }
    }

    async fn take(&self) -> Result<Frame, CaptureError> {
        let requested_at = SystemTime::now();
        for op in [
            InputOp::KeyDown { key: self.key.clone() },
            InputOp::KeyUp { key: self.key.clone() },
        ] {
            self.control
                .send(&op)
                .await
                .map_err(|e| CaptureError::Unavailable(format!("screenshot key: {e}")))?;
        }
        tokio::time::sleep(self.settle).await;

        let (path, modified) = newest_png(&self.dir)
            .await
            .map_err(|e| CaptureError::Unavailable(format!("reading {}: {e}", self.dir.display())))?
            .ok_or_else(|| {
                CaptureError::Unavailable(format!("no screenshots in {}", self.dir.display()))
            })?;

        if modified + MTIME_TOLERANCE < requested_at {
            warn!(path = %path.display(), "capture.stale_screenshot");
            return Err(CaptureError::Unavailable(format!(
                "newest screenshot {} predates the capture request",
                path.display()
            )));
        }

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| CaptureError::Unavailable(format!("reading {}: {e}", path.display())))?;
        debug!(path = %path.display(), bytes = bytes.len(), "capture.screenshot");
        Frame::decode(bytes)
    }
}

impl ScreenCapturer for ScreenshotDirCapturer {
    fn capture<'a>(&'a self) -> BoxFuture<'a, Result<Frame, CaptureError>> {
        Box::pin(self.take())
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::sync::Mutex;

    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::vision::scene_png;

    fn control(server: &MockServer) -> RemoteInputControl {
        RemoteInputControl::new(Client::new(), server.uri(), Duration::from_secs(2))
    }

    #[tokio::test]
    async fn input_op_is_posted_as_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/input"))
            .and(body_json(json!({"op": "key_down", "key": "w"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        control(&server)
            .send(&InputOp::KeyDown { key: "w".into() })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn focus_loss_is_reported_by_body_or_conflict() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_json(json!({"op": "key_down", "key": "w"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"ok": false, "error": "focus_lost"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_json(json!({"op": "key_up", "key": "w"})))
            .respond_with(ResponseTemplate::new(409))
            .mount(&server)
            .await;

        let c = control(&server);
        assert_eq!(
            c.send(&InputOp::KeyDown { key: "w".into() }).await.unwrap_err(),
            ControlError::FocusLost
        );
        assert_eq!(
            c.send(&InputOp::KeyUp { key: "w".into() }).await.unwrap_err(),
            ControlError::FocusLost
        );
    }

    #[tokio::test]
    async fn other_refusals_are_rejections() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({"ok": false, "error": "unknown key"})),
            )
            .mount(&server)
            .await;

        let err = control(&server)
            .send(&InputOp::KeyDown { key: "hyper".into() })
            .await
            .unwrap_err();
        assert_eq!(err, ControlError::Rejected("unknown key".into()));
    }

    #[tokio::test]
    async fn screenshot_endpoint_decodes_frame() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/screenshot"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(scene_png(320, 200)))
            .mount(&server)
            .await;

        let frame = ControlScreenCapturer::new(Client::new(), server.uri(), Duration::from_secs(2))
            .capture()
            .await
            .unwrap();
        assert_eq!((frame.width, frame.height), (320, 200));
    }

    #[tokio::test]
    async fn screenshot_endpoint_failures_are_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/screenshot"))
            .respond_with(ResponseTemplate::new(503).set_body_string("window not visible"))
            .mount(&server)
            .await;

        let err = ControlScreenCapturer::new(Client::new(), server.uri(), Duration::from_secs(2))
            .capture()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("window not visible"));
    }

    /// Writes a screenshot into the directory when F2 is released, like the game does.
    struct FakeGame {
        dir: PathBuf,
        presses: Mutex<Vec<InputOp>>,
        writes: bool,
    }

    impl InputControl for FakeGame {
        fn send<'a>(&'a self, op: &'a InputOp) -> BoxFuture<'a, Result<(), ControlError>> {
            Box::pin(async move {
                self.presses.lock().unwrap().push(op.clone());
                if self.writes && matches!(op, InputOp::KeyUp { .. }) {
                    let path = self.dir.join("2026-10-19_12.00.00.png");
                    std::fs::write(path, scene_png(64, 32)).unwrap();
                }
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn directory_capture_reads_the_fresh_screenshot() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not an image").unwrap();
        let game = Arc::new(FakeGame {
            dir: dir.path().to_path_buf(),
            presses: Mutex::new(Vec::new()),
            writes: true,
        });
        let capturer = ScreenshotDirCapturer::new(game.clone(), dir.path(), Duration::ZERO);

        let frame = capturer.capture().await.unwrap();
        assert_eq!((frame.width, frame.height), (64, 32));
        assert_eq!(
            *game.presses.lock().unwrap(),
            vec![
                InputOp::KeyDown { key: "f2".into() },
                InputOp::KeyUp { key: "f2".into() }
            ]
        );
    }

    #[tokio::test]
    async fn directory_capture_rejects_stale_screenshots() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("old.png");
        std::fs::write(&old, scene_png(8, 8)).unwrap();
        File::options()
            .write(true)
            .open(&old)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(3_600))
            .unwrap();

        let game = Arc::new(FakeGame {
            dir: dir.path().to_path_buf(),
            presses: Mutex::new(Vec::new()),
            writes: false,
        });
        let err = ScreenshotDirCapturer::new(game, dir.path(), Duration::ZERO)
            .capture()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("predates the capture request"));
    }

    #[tokio::test]
    async fn empty_directory_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let game = Arc::new(FakeGame {
            dir: dir.path().to_path_buf(),
            presses: Mutex::new(Vec::new()),
            writes: false,
        });
        let err = ScreenshotDirCapturer::new(game, dir.path(), Duration::ZERO)
            .capture()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no screenshots"));
    }
}
