//! Virtual display lifecycle: framebuffer, window manager and browser processes.

use std::env;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::{Duration, Instant};

use nanoid::nanoid;
use tokio::process::{Child, Command};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::AgentError;

const REAP_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone, Debug)]
pub struct DisplayConfig {
    pub display: String,
    pub width: u32,
    pub height: u32,
    /// Program and leading args; display and geometry are appended.
    pub framebuffer: Vec<String>,
    /// Empty skips the launch.
    pub window_manager: Vec<String>,
    /// Empty skips the launch.
    pub browser: Vec<String>,
    /// Exits 0 once the display accepts clients.
    pub probe: Vec<String>,
    /// Called as `<capture...> -o <path>`.
    pub capture: Vec<String>,
    /// xdotool-compatible input synthesis.
    pub input: Vec<String>,
    pub screenshot_dir: PathBuf,
    pub start_timeout: Duration,
    pub poll_interval: Duration,
    pub window_manager_settle: Duration,
    pub browser_settle: Duration,
    pub action_settle: Duration,
    pub typing_delay_ms: u64,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            display: env::var("CUA_DISPLAY").unwrap_or_else(|_| ":99".into()),
            width: env_u32("CUA_DISPLAY_WIDTH").unwrap_or(1024),
            height: env_u32("CUA_DISPLAY_HEIGHT").unwrap_or(768),
            framebuffer: argv(&["Xvfb"]),
            window_manager: argv(&["openbox"]),
            browser: argv(&["firefox", "--no-remote"]),
            probe: argv(&["xset", "q"]),
            capture: argv(&["scrot"]),
            input: argv(&["xdotool"]),
            screenshot_dir: env::temp_dir(),
            start_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(200),
            window_manager_settle: Duration::from_millis(500),
            browser_settle: Duration::from_secs(2),
            action_settle: Duration::from_secs(1),
            typing_delay_ms: 50,
        }
    }
}

fn env_u32(key: &str) -> Option<u32> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

/// Captured result of one display command.
#[derive(Clone, Debug)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

impl From<Output> for CommandOutput {
    fn from(out: Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&out.stdout).to_string(),
            stderr: String::from_utf8_lossy(&out.stderr).to_string(),
            success: out.status.success(),
        }
    }
}

/// One live virtual desktop.
///
/// The window manager and browser are launched into the framebuffer's
/// process group, so [`DisplaySession::stop`] tears all of them down with a
/// single group signal.
pub struct DisplaySession {
    pub display: String,
    pub width: u32,
    pub height: u32,
    pub session_id: String,
    screenshot_path: PathBuf,
    framebuffer: Option<Child>,
    pgid: i32,
}

impl std::fmt::Debug for DisplaySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisplaySession")
            .field("display", &self.display)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("session_id", &self.session_id)
            .field("pgid", &self.pgid)
            .field("running", &self.framebuffer.is_some())
            .finish()
    }
}

impl DisplaySession {
    pub async fn start(cfg: &DisplayConfig) -> Result<Self, AgentError> {
        let session_id = nanoid!(16);
        let screenshot_path = cfg
            .screenshot_dir
            .join(format!("cua-screenshot-{session_id}.png"));

        let (program, lead) = split_argv(&cfg.framebuffer)?;
        let mut cmd = std::process::Command::new(program);
        cmd.args(lead)
            .arg(&cfg.display)
            .args(["-screen", "0"])
            .arg(format!("{}x{}x24", cfg.width, cfg.height))
            .arg("-ac")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0);
        let child = Command::from(cmd)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AgentError::Spawn(format!("{program}: {e}")))?;
        let pgid = child
            .id()
            .ok_or_else(|| AgentError::Spawn(format!("{program}: exited before pid was read")))?
            as i32;

        let mut session = Self {
            display: cfg.display.clone(),
            width: cfg.width,
            height: cfg.height,
            session_id,
            screenshot_path,
            framebuffer: Some(child),
            pgid,
        };

        if let Err(err) = session.wait_until_ready(cfg).await {
            session.stop().await;
            return Err(err);
        }

        if let Err(err) = session.launch_apps(cfg).await {
            session.stop().await;
            return Err(err);
        }

        info!(
            display = %session.display,
            width = session.width,
            height = session.height,
            session = %session.session_id,
            "display started"
        );
        Ok(session)
    }

    async fn wait_until_ready(&mut self, cfg: &DisplayConfig) -> Result<(), AgentError> {
        let started = Instant::now();
        let deadline = started + cfg.start_timeout;
        loop {
            if self.framebuffer_exited() {
                break;
            }
            match self.run(&cfg.probe, &[]).await {
                Ok(out) if out.success => {
                    if self.framebuffer_exited() {
                        break;
                    }
                    debug!(
                        display = %self.display,
                        waited_ms = started.elapsed().as_millis(),
                        "display ready"
                    );
                    return Ok(());
                }
                Ok(_) => {}
                Err(err) => debug!(display = %self.display, error = %err, "probe failed"),
            }
            if Instant::now() >= deadline {
                break;
            }
            sleep(cfg.poll_interval).await;
        }
        Err(AgentError::DisplayStartTimeout {
            display: self.display.clone(),
            waited_ms: started.elapsed().as_millis(),
        })
    }

    fn framebuffer_exited(&mut self) -> bool {
        let Some(fb) = self.framebuffer.as_mut() else {
            return true;
        };
        match fb.try_wait() {
            Ok(Some(status)) => {
                // Whatever answers the probe now is not our server.
                warn!(display = %self.display, %status, "framebuffer exited during startup");
                true
            }
            _ => false,
        }
    }

    async fn launch_apps(&self, cfg: &DisplayConfig) -> Result<(), AgentError> {
        if !cfg.window_manager.is_empty() {
            self.spawn_detached(&cfg.window_manager)?;
            sleep(cfg.window_manager_settle).await;
        }
        if !cfg.browser.is_empty() {
            self.spawn_detached(&cfg.browser)?;
            sleep(cfg.browser_settle).await;
        }
        Ok(())
    }

    fn spawn_detached(&self, argv: &[String]) -> Result<(), AgentError> {
        let (program, args) = split_argv(argv)?;
        let mut cmd = std::process::Command::new(program);
        cmd.args(args)
            .env("DISPLAY", &self.display)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(self.pgid);
        let child = Command::from(cmd)
            .spawn()
            .map_err(|e| AgentError::Spawn(format!("{program}: {e}")))?;
        debug!(display = %self.display, program, pid = ?child.id(), "launched");
        Ok(())
    }

    /// Terminates the display's process group and removes the screenshot
    /// file. Safe to call repeatedly; failures are only logged.
    pub async fn stop(&mut self) {
        if let Some(mut fb) = self.framebuffer.take() {
            // SAFETY: kill(2) with a negative pid signals the process group.
            let rc = unsafe { libc::kill(-self.pgid, libc::SIGTERM) };
            if rc != 0 {
                let err = std::io::Error::last_os_error();
                if err.raw_os_error() != Some(libc::ESRCH) {
                    warn!(
                        display = %self.display,
                        pgid = self.pgid,
                        error = %err,
                        "failed to signal display"
                    );
                }
            }
            match tokio::time::timeout(REAP_TIMEOUT, fb.wait()).await {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => {
                    warn!(display = %self.display, error = %err, "failed to reap framebuffer")
                }
                Err(_) => {
                    warn!(display = %self.display, "framebuffer ignored SIGTERM, killing");
                    // SAFETY: as above.
                    unsafe { libc::kill(-self.pgid, libc::SIGKILL) };
                    let _ = fb.wait().await;
                }
            }
        }
        match tokio::fs::remove_file(&self.screenshot_path).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(
                path = %self.screenshot_path.display(),
                error = %err,
                "failed to remove screenshot"
            ),
        }
        info!(display = %self.display, session = %self.session_id, "display stopped");
    }

    pub fn is_healthy(&mut self) -> bool {
        let Some(fb) = self.framebuffer.as_mut() else {
            return false;
        };
        if !matches!(fb.try_wait(), Ok(None)) {
            return false;
        }
        // SAFETY: signal 0 only checks that the process exists.
        unsafe { libc::kill(self.pgid, 0) == 0 }
    }

    pub fn is_running(&self) -> bool {
        self.framebuffer.is_some()
    }

    pub fn screenshot_path(&self) -> &PathBuf {
        &self.screenshot_path
    }

    /// Runs `argv + extra` with `DISPLAY` pointing at this session.
    pub async fn run(
        &self,
        argv: &[String],
        extra: &[String],
    ) -> Result<CommandOutput, AgentError> {
        let (program, lead) = split_argv(argv)?;
        debug!(display = %self.display, program, args = ?extra, "running");
        let out = Command::new(program)
            .args(lead)
            .args(extra)
            .env("DISPLAY", &self.display)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| AgentError::Spawn(format!("{program}: {e}")))?;
        Ok(out.into())
    }
}

impl Drop for DisplaySession {
    /// Covers sessions dropped without [`DisplaySession::stop`], including a
    /// `start` future cancelled mid-poll.
    fn drop(&mut self) {
        if self.framebuffer.is_none() {
            return;
        }
        warn!(
            display = %self.display,
            pgid = self.pgid,
            "display dropped while running, killing"
        );
        // SAFETY: kill(2) with a negative pid signals the process group.
        unsafe { libc::kill(-self.pgid, libc::SIGKILL) };
        let _ = std::fs::remove_file(&self.screenshot_path);
    }
}

fn split_argv(argv: &[String]) -> Result<(&str, &[String]), AgentError> {
    match argv.split_first() {
        Some((program, rest)) => Ok((program.as_str(), rest)),
        None => Err(AgentError::Spawn("empty command".into())),
    }
}
