//! Screen-share session and screenshot capture.

use super::{encode_data_uri, sniff_image_mime};
use crate::log_debug;
use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

const CAPTURE_PATH_ENV: &str = "ESSENCE_CAPTURE_PATH";

/// User-toggled share session. Screenshots are only taken while it is active.
#[derive(Debug, Clone, Default)]
pub struct ScreenShare {
    command: Option<String>,
    active: bool,
}

impl ScreenShare {
    /// `command` overrides the platform screenshot tool; it receives the output
    /// path in `$ESSENCE_CAPTURE_PATH`.
    #[must_use]
    pub fn new(command: Option<String>) -> Self {
        Self {
            command,
            active: false,
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Returns `false` if the session was already running.
    pub fn start(&mut self) -> bool {
        !std::mem::replace(&mut self.active, true)
    }

    /// Returns `false` if there was nothing to stop.
    pub fn stop(&mut self) -> bool {
        std::mem::replace(&mut self.active, false)
    }

    /// Grab the screen as a `data:image/...;base64,` URI.
    pub fn capture(&self) -> Result<String> {
        if !self.active {
            bail!("screen share is not active");
        }
        let path = next_capture_path();
        let result = self.run_capture(&path).and_then(|()| read_capture(&path));
        let _ = fs::remove_file(&path);
        result
    }

    fn run_capture(&self, path: &Path) -> Result<()> {
        match self.command.as_deref() {
            Some(command) => run_custom_capture_command(command, path),
            None => run_default_capture_command(path),
        }
    }
}

fn next_capture_path() -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    env::temp_dir().join(format!("essence-capture-{}-{nanos}.png", std::process::id()))
}

fn read_capture(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("captured file missing: {}", path.display()))?;
    if bytes.is_empty() {
        bail!("captured image is empty");
    }
    let mime = sniff_image_mime(&bytes).unwrap_or("image/png");
    log_debug(&format!("screenshot captured: {mime}, {} bytes", bytes.len()));
    Ok(encode_data_uri(mime, &bytes))
}

fn run_custom_capture_command(command: &str, path: &Path) -> Result<()> {
    let status = Command::new("sh")
        .arg("-lc")
        .arg(command)
        .env(CAPTURE_PATH_ENV, path)
        .status()
        .with_context(|| format!("launch screenshot command: {command}"))?;
    if status.success() {
        Ok(())
    } else {
        Err(anyhow!("screenshot command exited with status {status}"))
    }
}

#[cfg(target_os = "macos")]
fn run_default_capture_command(path: &Path) -> Result<()> {
    let status = Command::new("screencapture")
        .arg("-x")
        .arg(path)
        .status()
        .context("launch screencapture")?;
    if status.success() {
        Ok(())
    } else {
        Err(anyhow!("screencapture exited with status {status}"))
    }
}

#[cfg(not(target_os = "macos"))]
fn run_default_capture_command(path: &Path) -> Result<()> {
    let mut command = if env::var_os("WAYLAND_DISPLAY").is_some() {
        Command::new("grim")
    } else {
        let mut import = Command::new("import");
        import.args(["-window", "root"]);
        import
    };
    let status = command
        .arg(path)
        .status()
        .context("launch screenshot tool (grim/import); set --screenshot-command")?;
    if status.success() {
        Ok(())
    } else {
        Err(anyhow!("screenshot tool exited with status {status}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn share_session_toggles() {
        let mut share = ScreenShare::new(None);
        assert!(!share.is_active());
        assert!(share.start());
        assert!(!share.start());
        assert!(share.stop());
        assert!(!share.stop());
    }

    #[test]
    fn capture_requires_active_share() {
        let share = ScreenShare::new(Some("true".to_string()));
        let err = share.capture().expect_err("inactive share");
        assert!(err.to_string().contains("not active"));
    }

    #[cfg(unix)]
    #[test]
    fn custom_command_output_becomes_data_uri() {
        let mut share = ScreenShare::new(Some(
            "printf '\\211PNG\\r\\n\\032\\n' > \"$ESSENCE_CAPTURE_PATH\"".to_string(),
        ));
        share.start();
        let uri = share.capture().expect("capture");
        assert!(uri.starts_with("data:image/png;base64,"));
    }

    #[cfg(unix)]
    #[test]
    fn empty_capture_is_an_error() {
        let mut share = ScreenShare::new(Some(": > \"$ESSENCE_CAPTURE_PATH\"".to_string()));
        share.start();
        assert!(share.capture().is_err());
    }

    #[cfg(unix)]
    #[test]
    fn failing_command_is_an_error() {
        let mut share = ScreenShare::new(Some("exit 3".to_string()));
        share.start();
        let err = share.capture().expect_err("failing command");
        assert!(err.to_string().contains("exited with status"));
    }
}
