//! Drives one virtual display: input synthesis and screen capture.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::warn;

use crate::action::{Action, Coordinate};
use crate::display::{DisplayConfig, DisplaySession};
use crate::error::AgentError;

/// What an action produced for the model to look at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Observation {
    /// Base64-encoded PNG of the whole screen.
    Screenshot(String),
    /// Raw pointer location as reported by the input tool.
    CursorPosition(String),
}

#[async_trait]
pub trait Computer: Send + Sync {
    /// Pixel size of the screen the model is looking at.
    fn dimensions(&self) -> (u32, u32);
    async fn screenshot(&self) -> Result<String, AgentError>;
    async fn execute(&self, action: &Action) -> Result<Observation, AgentError>;
}

/// [`Computer`] backed by an X virtual framebuffer and xdotool.
pub struct ActionExecutor {
    cfg: DisplayConfig,
    session: Mutex<Option<DisplaySession>>,
}

impl ActionExecutor {
    pub fn new(cfg: DisplayConfig) -> Self {
        Self { cfg, session: Mutex::new(None) }
    }

    /// Creates an executor and starts its display.
    pub async fn launch(cfg: DisplayConfig) -> Result<Self, AgentError> {
        let exec = Self::new(cfg);
        exec.start().await?;
        Ok(exec)
    }

    pub fn config(&self) -> &DisplayConfig {
        &self.cfg
    }

    pub async fn start(&self) -> Result<(), AgentError> {
        let mut slot = self.session.lock().await;
        if slot.is_some() {
            return Err(AgentError::DisplayAlreadyStarted);
        }
        *slot = Some(DisplaySession::start(&self.cfg).await?);
        Ok(())
    }

    pub async fn stop(&self) {
        if let Some(mut session) = self.session.lock().await.take() {
            session.stop().await;
        }
    }

    pub async fn is_healthy(&self) -> bool {
        match self.session.lock().await.as_mut() {
            Some(session) => session.is_healthy(),
            None => false,
        }
    }

    async fn capture(&self, session: &DisplaySession) -> Result<String, AgentError> {
        let path = session.screenshot_path();
        let out = session
            .run(&self.cfg.capture, &["-o".to_string(), path.display().to_string()])
            .await
            .map_err(|e| AgentError::Screenshot(e.to_string()))?;
        if !out.success {
            return Err(AgentError::Screenshot(format!(
                "capture failed: {}",
                out.stderr.trim()
            )));
        }
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| AgentError::Screenshot(format!("read {}: {e}", path.display())))?;
        Ok(B64.encode(bytes))
    }

    /// Runs one input command; failures are logged and otherwise ignored.
    async fn input(&self, session: &DisplaySession, args: Vec<String>) -> Option<String> {
        match session.run(&self.cfg.input, &args).await {
            Ok(out) if out.success => Some(out.stdout),
            Ok(out) => {
                warn!(args = ?args, stderr = %out.stderr.trim(), "input command failed");
                None
            }
            Err(err) => {
                warn!(args = ?args, error = %err, "input command failed");
                None
            }
        }
    }

    async fn perform(&self, session: &DisplaySession, action: &Action) {
        match action {
            Action::LeftClick { coordinate } => {
                self.input(session, click_args(coordinate, &["1"])).await;
            }
            Action::RightClick { coordinate } => {
                self.input(session, click_args(coordinate, &["3"])).await;
            }
            Action::DoubleClick { coordinate } => {
                self.input(session, click_args(coordinate, &["--repeat", "2", "1"]))
                    .await;
            }
            Action::Type { text } => {
                let delay = self.cfg.typing_delay_ms.to_string();
                // `--` keeps payloads like "-5" from being read as options.
                let typed = args(&["type", "--delay", delay.as_str(), "--", text.as_str()]);
                self.input(session, typed).await;
            }
            Action::Key { key } => {
                self.input(session, args(&["key", "--", key.as_str()])).await;
            }
            Action::Scroll { coordinate, direction, amount } => {
                if let Some(c) = coordinate {
                    self.input(session, move_args(c)).await;
                }
                if *amount > 0 {
                    let repeat = amount.to_string();
                    let button = direction.button().to_string();
                    let click = args(&["click", "--repeat", repeat.as_str(), button.as_str()]);
                    self.input(session, click).await;
                }
            }
            Action::MouseMove { coordinate } => {
                self.input(session, move_args(coordinate)).await;
            }
            Action::Screenshot | Action::CursorPosition => {}
            Action::Unknown { name } => warn!(action = %name, "unknown action"),
        }
    }
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn move_args(c: &Coordinate) -> Vec<String> {
    vec![
        "mousemove".into(),
        "--sync".into(),
        c.x.to_string(),
        c.y.to_string(),
    ]
}

fn click_args(coordinate: &Option<Coordinate>, click: &[&str]) -> Vec<String> {
    let mut v = coordinate.as_ref().map(move_args).unwrap_or_default();
    v.push("click".into());
    v.extend(click.iter().map(|s| s.to_string()));
    v
}

#[async_trait]
impl Computer for ActionExecutor {
    fn dimensions(&self) -> (u32, u32) {
        (self.cfg.width, self.cfg.height)
    }

    async fn screenshot(&self) -> Result<String, AgentError> {
        let guard = self.session.lock().await;
        let session = guard.as_ref().ok_or(AgentError::DisplayNotStarted)?;
        self.capture(session).await
    }

    async fn execute(&self, action: &Action) -> Result<Observation, AgentError> {
        let guard = self.session.lock().await;
        let session = guard.as_ref().ok_or(AgentError::DisplayNotStarted)?;

        if let Action::CursorPosition = action {
            let raw = self
                .input(session, args(&["getmouselocation"]))
                .await
                .unwrap_or_default();
            return Ok(Observation::CursorPosition(raw.trim().to_string()));
        }

        self.perform(session, action).await;
        sleep(self.cfg.action_settle).await;
        Ok(Observation::Screenshot(self.capture(session).await?))
    }
}
