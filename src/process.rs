use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// The external decoder/encoder binary every subprocess is launched from.
#[derive(Clone, Debug)]
pub struct Toolchain {
    binary: PathBuf,
}

impl Toolchain {
    /// Find a usable binary: `ffmpeg` if it runs, `avconv` otherwise.
    pub fn locate() -> Self {
        if cfg!(windows) {
            return Self::with_binary("ffmpeg.exe");
        }
        let ffmpeg = Self::with_binary("ffmpeg");
        if ffmpeg.is_available() {
            return ffmpeg;
        }
        log::warn!("ffmpeg not found on PATH, falling back to avconv");
        Self::with_binary("avconv")
    }

    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn command(&self) -> Command {
        Command::new(&self.binary)
    }

    pub fn is_available(&self) -> bool {
        self.command()
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Whether `-encoders` lists the named encoder.
    pub fn has_encoder(&self, encoder: &str) -> bool {
        self.command()
            .args(["-hide_banner", "-encoders"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .map(|output| String::from_utf8_lossy(&output.stdout).contains(encoder))
            .unwrap_or(false)
    }
}

/// Cooperative cancellation flag shared between a lane and its controller.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Wait for `child`, killing it outright if `cancel` fires first.
/// Returns `Ok(None)` when the child was killed.
pub fn wait_or_kill(child: &mut Child, cancel: &CancelToken) -> io::Result<Option<ExitStatus>> {
    wait_or_kill_when(child, || cancel.is_cancelled())
}

/// Like [`wait_or_kill`], with an arbitrary kill condition polled every 50 ms.
pub fn wait_or_kill_when(child: &mut Child, should_kill: impl Fn() -> bool) -> io::Result<Option<ExitStatus>> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if should_kill() {
            kill_quietly(child);
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

pub fn kill_quietly(child: &mut Child) {
    if let Err(err) = child.kill() {
        log::debug!("kill on already-exited process: {err}");
    }
    let _ = child.wait();
}
