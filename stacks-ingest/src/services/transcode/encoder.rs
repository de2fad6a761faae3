//! External encoder invocation

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use super::profiles::TranscodeProfile;

/// Longest stderr excerpt kept in an error
const STDERR_LIMIT: usize = 4096;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("Failed to start encoder {binary}: {source}")]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Encoder exited with status {status:?}: {stderr}")]
    Failed { status: Option<i32>, stderr: String },

    #[error("Encoder timed out after {0:?}")]
    Timeout(Duration),

    #[error("Encoder produced no output at {0}")]
    MissingOutput(PathBuf),

    #[error("Encoder I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Produces `output` from `input` according to `profile`
#[async_trait]
pub trait Encoder: Send + Sync {
    async fn encode(&self, input: &Path, output: &Path, profile: &TranscodeProfile, bitrate_kbps: u32) -> Result<(), EncodeError>;
}

/// Runs the ffmpeg binary with a wall-clock limit
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    binary: PathBuf,
    timeout: Duration,
}

impl FfmpegEncoder {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    fn command(&self, input: &Path, output: &Path, profile: &TranscodeProfile, bitrate_kbps: u32) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-nostdin")
            .args(["-hide_banner", "-loglevel", "error", "-y"])
            .arg("-i")
            .arg(input)
            .args(["-map", "0:a:0", "-vn"])
            .args(["-c:a", &profile.codec])
            .args(["-b:a", &format!("{}k", bitrate_kbps)]);
        if let Some(rate) = profile.sample_rate {
            cmd.args(["-ar", &rate.to_string()]);
        }
        if let Some(channels) = profile.channels {
            cmd.args(["-ac", &channels.to_string()]);
        }
        cmd.arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn encode(&self, input: &Path, output: &Path, profile: &TranscodeProfile, bitrate_kbps: u32) -> Result<(), EncodeError> {
        let mut child = self
            .command(input, output, profile, bitrate_kbps)
            .spawn()
            .map_err(|source| EncodeError::Spawn {
                binary: self.binary.clone(),
                source,
            })?;

        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = stderr.read_to_end(&mut buf).await;
                buf
            })
        });

        let waited = tokio::time::timeout(self.timeout, child.wait()).await;
        let status = match waited {
            Ok(status) => status?,
            Err(_) => {
                tracing::warn!(input = %input.display(), timeout_secs = self.timeout.as_secs(), "Encoder timed out, killing");
                let _ = child.kill().await;
                let _ = tokio::fs::remove_file(output).await;
                return Err(EncodeError::Timeout(self.timeout));
            }
        };

        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => Vec::new(),
        };

        if !status.success() {
            let _ = tokio::fs::remove_file(output).await;
            let mut text = String::from_utf8_lossy(&stderr).trim().to_string();
            if text.len() > STDERR_LIMIT {
                let mut cut = STDERR_LIMIT;
                while !text.is_char_boundary(cut) {
                    cut -= 1;
                }
                text.truncate(cut);
            }
            return Err(EncodeError::Failed {
                status: status.code(),
                stderr: text,
            });
        }

        if !tokio::fs::try_exists(output).await.unwrap_or(false) {
            return Err(EncodeError::MissingOutput(output.to_path_buf()));
        }

        tracing::debug!(
            input = %input.display(),
            output = %output.display(),
            profile = %profile.name,
            bitrate_kbps,
            "Encoded rendition"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::transcode::profiles::ProfileRegistry;

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let encoder = FfmpegEncoder::new("/nonexistent/ffmpeg-binary", Duration::from_secs(5));
        let profile = ProfileRegistry::with_builtins().get("mp3_192").cloned().unwrap();
        let dir = tempfile::TempDir::new().unwrap();

        let err = encoder
            .encode(&dir.path().join("in.wav"), &dir.path().join("out.mp3"), &profile, 192)
            .await
            .unwrap_err();
        assert!(matches!(err, EncodeError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_slow_encoder_is_killed_on_timeout() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let script = dir.path().join("slow-encoder.sh");
        std::fs::write(&script, "#!/bin/sh\nsleep 30\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let encoder = FfmpegEncoder::new(&script, Duration::from_millis(200));
        let profile = ProfileRegistry::with_builtins().get("mp3_192").cloned().unwrap();

        let started = std::time::Instant::now();
        let err = encoder
            .encode(&dir.path().join("in.wav"), &dir.path().join("out.mp3"), &profile, 192)
            .await
            .unwrap_err();
        assert!(matches!(err, EncodeError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
