//! # Audio Transcoder
//!
//! Wraps the external converter (ffmpeg by default) that turns an arbitrary
//! upload into canonical audio: mono, 16 kHz, 16-bit PCM WAV.
//!
//! ## Failure Policy:
//! Conversion failures are *expected* (clients upload things that are not
//! audio), so `convert` never returns an error. Every failure, whether a
//! non-zero exit, a missing binary, or a timeout, is logged with its reason
//! and reported as `false`. The tool's stderr only ever reaches the service
//! log, never an HTTP response.

use crate::config::TranscoderConfig;
use std::ffi::OsString;
use std::fmt;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, error, warn};

/// Keep only the end of stderr in logs; ffmpeg prints a long banner first.
const STDERR_TAIL_BYTES: usize = 2048;

/// Why a conversion did not produce canonical audio.
#[derive(Debug)]
pub enum TranscodeError {
    /// The program could not be started (not installed, not executable)
    Spawn(std::io::Error),
    /// Waiting on the child failed
    Wait(std::io::Error),
    /// The program ran and exited unsuccessfully
    Failed { status: ExitStatus, stderr: String },
    /// The program was still running when the deadline passed and was killed
    TimedOut(Duration),
}

impl fmt::Display for TranscodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscodeError::Spawn(err) => write!(f, "failed to start transcoder: {}", err),
            TranscodeError::Wait(err) => write!(f, "failed to wait for transcoder: {}", err),
            TranscodeError::Failed { status, .. } => write!(f, "transcoder exited with {}", status),
            TranscodeError::TimedOut(timeout) => {
                write!(f, "transcoder timed out after {:.1}s", timeout.as_secs_f64())
            }
        }
    }
}

impl std::error::Error for TranscodeError {}

/// Invokes the external converter with the canonical output settings.
#[derive(Debug, Clone)]
pub struct Transcoder {
    program: String,
    sample_rate: u32,
    channels: u16,
    timeout: Duration,
}

impl Transcoder {
    pub fn new(config: &TranscoderConfig) -> Self {
        Self {
            program: config.program.clone(),
            sample_rate: config.sample_rate,
            channels: config.channels,
            timeout: config.timeout(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Command line equivalent to `ffmpeg -y -i <in> -ar 16000 -ac 1 <out>`.
    pub fn arguments(&self, input: &Path, output: &Path) -> Vec<OsString> {
        vec![
            "-y".into(),
            "-i".into(),
            input.as_os_str().to_owned(),
            "-ar".into(),
            self.sample_rate.to_string().into(),
            "-ac".into(),
            self.channels.to_string().into(),
            output.as_os_str().to_owned(),
        ]
    }

    /// Convert `input` into canonical audio at `output`.
    ///
    /// Returns `true` only when the converter exited successfully within the
    /// timeout. An existing `output` is overwritten.
    pub async fn convert(&self, input: &Path, output: &Path) -> bool {
        let start_time = Instant::now();
        match self.run(input, output).await {
            Ok(()) => {
                debug!(
                    program = %self.program,
                    duration_ms = start_time.elapsed().as_millis() as u64,
                    "Audio conversion succeeded"
                );
                true
            }
            Err(TranscodeError::Failed { status, stderr }) => {
                error!(program = %self.program, %status, "Audio conversion failed");
                if !stderr.is_empty() {
                    warn!(program = %self.program, stderr = %stderr, "Transcoder diagnostics");
                }
                false
            }
            Err(err) => {
                error!(program = %self.program, error = %err, "Unexpected error during audio conversion");
                false
            }
        }
    }

    async fn run(&self, input: &Path, output: &Path) -> Result<(), TranscodeError> {
        let mut child = Command::new(&self.program)
            .args(self.arguments(input, output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            // A cancelled request drops this future; take the child down with it.
            .kill_on_drop(true)
            .spawn()
            .map_err(TranscodeError::Spawn)?;

        let stderr_pipe = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(mut pipe) = stderr_pipe {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        });

        match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) if status.success() => {
                stderr_task.abort();
                Ok(())
            }
            Ok(Ok(status)) => {
                let stderr = stderr_task.await.unwrap_or_default();
                Err(TranscodeError::Failed {
                    status,
                    stderr: stderr_tail(&stderr),
                })
            }
            Ok(Err(err)) => {
                stderr_task.abort();
                Err(TranscodeError::Wait(err))
            }
            Err(_) => {
                let _ = child.kill().await;
                stderr_task.abort();
                Err(TranscodeError::TimedOut(self.timeout))
            }
        }
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let start = stderr.len().saturating_sub(STDERR_TAIL_BYTES);
    String::from_utf8_lossy(&stderr[start..]).trim().to_string()
}
