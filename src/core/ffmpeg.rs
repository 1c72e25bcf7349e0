use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;

use crate::models::errors::AssembleError;

const STDERR_TAIL: usize = 600;

/// Exit report of one conversion.
#[derive(Debug, Clone)]
pub struct ConvertStatus {
    pub code: Option<i32>,
    pub stderr_tail: String,
}

impl ConvertStatus {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// External converter, observed only through its exit status.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Confirms the tool can run and returns its version.
    async fn probe(&self) -> Result<String, AssembleError>;

    async fn convert(&self, input: &Path, output: &Path) -> Result<ConvertStatus, AssembleError>;
}

pub struct FfmpegTranscoder {
    program: PathBuf,
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FfmpegTranscoder {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Locates ffmpeg on PATH or in the managed bin dir.
    pub async fn locate() -> Option<Self> {
        crate::core::dependencies::find_tool("ffmpeg")
            .await
            .map(Self::new)
    }
}

/// Arguments for turning `input` into `output`. Local HLS manifests are
/// remuxed; anything else (browser recordings) is re-encoded to H.264/AAC.
pub fn build_args(input: &Path, output: &Path) -> Vec<OsString> {
    let is_manifest = input
        .extension()
        .map(|e| e.eq_ignore_ascii_case("m3u8"))
        .unwrap_or(false);

    let mut args: Vec<OsString> = ["-hide_banner", "-loglevel", "error", "-y"]
        .iter()
        .map(OsString::from)
        .collect();

    if is_manifest {
        for a in [
            "-protocol_whitelist",
            "file,crypto,data",
            "-allowed_extensions",
            "ALL",
        ] {
            args.push(a.into());
        }
    }

    args.push("-i".into());
    args.push(input.as_os_str().to_owned());

    let codec: &[&str] = if is_manifest {
        &["-c", "copy", "-bsf:a", "aac_adtstoasc"]
    } else {
        &["-c:v", "libx264", "-preset", "veryfast", "-c:a", "aac"]
    };
    args.extend(codec.iter().map(OsString::from));
    args.push("-movflags".into());
    args.push("+faststart".into());
    args.push("-f".into());
    args.push("mp4".into());
    args.push(output.as_os_str().to_owned());
    args
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn probe(&self) -> Result<String, AssembleError> {
        let output = crate::core::process::command(&self.program)
            .arg("-version")
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .await
            .map_err(|e| AssembleError::TranscoderUnavailable(format!("{}: {}", self.program.display(), e)))?;

        if !output.status.success() {
            return Err(AssembleError::TranscoderUnavailable(format!(
                "{} -version exited with {}",
                self.program.display(),
                output.status
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .next()
            .and_then(|l| l.split_whitespace().nth(2))
            .unwrap_or("unknown")
            .to_string())
    }

    async fn convert(&self, input: &Path, output: &Path) -> Result<ConvertStatus, AssembleError> {
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let result = crate::core::process::command(&self.program)
            .args(build_args(input, output))
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await?;

        let stderr = String::from_utf8_lossy(&result.stderr);
        let start = stderr.len().saturating_sub(STDERR_TAIL);
        let start = (start..stderr.len())
            .find(|i| stderr.is_char_boundary(*i))
            .unwrap_or(stderr.len());

        Ok(ConvertStatus {
            code: result.status.code(),
            stderr_tail: stderr[start..].trim().to_string(),
        })
    }
}
