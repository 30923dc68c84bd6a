//! Sink that spawns the system `ffmpeg` and streams PNG frames to its stdin.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

use crate::encode::sink::{FrameSink, SinkConfig};
use crate::foundation::core::FrameIndex;
use crate::foundation::error::{TrackcastError, TrackcastResult};

/// Options for [`FfmpegSink`] MP4 output.
#[derive(Clone, Debug)]
pub struct FfmpegSinkOpts {
    /// Output MP4 file path.
    pub out_path: PathBuf,
    /// Target video bitrate, in ffmpeg notation (e.g. `6M`).
    pub bitrate: String,
    /// Overwrite the output file if it already exists.
    pub overwrite: bool,
}

impl FfmpegSinkOpts {
    pub fn new(out_path: impl Into<PathBuf>) -> Self {
        Self {
            out_path: out_path.into(),
            bitrate: "6M".to_string(),
            overwrite: true,
        }
    }
}

/// Streams independently-decodable PNG frames over `image2pipe` and encodes
/// h264/yuv420p. The exit status is checked after stdin closes.
pub struct FfmpegSink {
    opts: FfmpegSinkOpts,

    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stderr_drain: Option<std::thread::JoinHandle<std::io::Result<Vec<u8>>>>,
    last_idx: Option<FrameIndex>,
}

impl FfmpegSink {
    pub fn new(opts: FfmpegSinkOpts) -> Self {
        Self {
            opts,
            child: None,
            stdin: None,
            stderr_drain: None,
            last_idx: None,
        }
    }
}

impl FrameSink for FfmpegSink {
    fn begin(&mut self, cfg: SinkConfig) -> TrackcastResult<()> {
        if cfg.width == 0 || cfg.height == 0 {
            return Err(TrackcastError::encode("output width/height must be non-zero"));
        }
        if cfg.width % 2 != 0 || cfg.height % 2 != 0 {
            return Err(TrackcastError::encode(
                "output width/height must be even (required for yuv420p)",
            ));
        }

        ensure_parent_dir(&self.opts.out_path)?;
        if !self.opts.overwrite && self.opts.out_path.exists() {
            return Err(TrackcastError::encode(format!(
                "output file '{}' already exists",
                self.opts.out_path.display()
            )));
        }
        if !is_ffmpeg_on_path() {
            return Err(TrackcastError::encode(
                "ffmpeg is required for MP4 encoding, but was not found on PATH",
            ));
        }

        let fps = format!("{}", cfg.fps.0);
        let mut cmd = Command::new("ffmpeg");
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        cmd.arg(if self.opts.overwrite { "-y" } else { "-n" });
        cmd.args(["-loglevel", "error"]);
        cmd.args(["-f", "image2pipe", "-vcodec", "png", "-r", &fps, "-i", "-"]);
        cmd.args(["-c:v", "libx264", "-b:v", &self.opts.bitrate]);
        cmd.args(["-pix_fmt", "yuv420p", "-r", &fps]);
        cmd.arg(&self.opts.out_path);

        let mut child = cmd.spawn().map_err(|e| {
            TrackcastError::encode(format!(
                "failed to spawn ffmpeg (is it installed and on PATH?): {e}"
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TrackcastError::encode("failed to open ffmpeg stdin"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| TrackcastError::encode("failed to open ffmpeg stderr"))?;
        let stderr_drain = std::thread::spawn(move || {
            let mut bytes = Vec::new();
            stderr.read_to_end(&mut bytes)?;
            Ok(bytes)
        });

        self.child = Some(child);
        self.stdin = Some(stdin);
        self.stderr_drain = Some(stderr_drain);
        self.last_idx = None;
        Ok(())
    }

    fn push_frame(&mut self, idx: FrameIndex, png: &[u8]) -> TrackcastResult<()> {
        if let Some(last) = self.last_idx
            && idx.0 <= last.0
        {
            return Err(TrackcastError::encode(
                "ffmpeg sink received out-of-order frame index",
            ));
        }
        self.last_idx = Some(idx);

        let Some(stdin) = self.stdin.as_mut() else {
            return Err(TrackcastError::encode("ffmpeg sink not started"));
        };
        use std::io::Write as _;
        stdin.write_all(png).map_err(|e| {
            TrackcastError::encode(format!("failed to write frame {} to ffmpeg: {e}", idx.0))
        })?;
        Ok(())
    }

    fn end(&mut self) -> TrackcastResult<()> {
        // Closing stdin signals end-of-stream.
        drop(self.stdin.take());
        let mut child = self
            .child
            .take()
            .ok_or_else(|| TrackcastError::encode("ffmpeg sink not started"))?;

        let status = child
            .wait()
            .map_err(|e| TrackcastError::encode(format!("failed to wait for ffmpeg: {e}")))?;
        let stderr_bytes = match self.stderr_drain.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| TrackcastError::encode("ffmpeg stderr drain thread panicked"))?
                .map_err(|e| TrackcastError::encode(format!("ffmpeg stderr read failed: {e}")))?,
            None => Vec::new(),
        };

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr_bytes);
            return Err(TrackcastError::encode(format!(
                "ffmpeg exited with status {status}: {}",
                stderr.trim()
            )));
        }
        Ok(())
    }
}

/// Ensure the parent directory of `path` exists.
pub fn ensure_parent_dir(path: &Path) -> TrackcastResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| {
            TrackcastError::encode(format!(
                "failed to create output directory '{}': {e}",
                parent.display()
            ))
        })?;
    }
    Ok(())
}

/// Return `true` when `ffmpeg` can be invoked from `PATH`.
pub fn is_ffmpeg_on_path() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}
