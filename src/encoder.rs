use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

use crate::error::{Error, Result};
use crate::frame_source::Frame;

const CBR_BITRATE_KBPS: u32 = 15_000;

/// Configuration for one encoder run (§4.5).
#[derive(Clone, Debug)]
pub struct EncodeConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub out_path: PathBuf,
    /// `true` for the incremental-session segment format (Annex-B `.h264`), `false` for a
    /// directly-muxed one-shot `.mp4`.
    pub elementary_stream: bool,
}

impl EncodeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::config("encode width/height must be non-zero"));
        }
        if !self.width.is_multiple_of(2) || !self.height.is_multiple_of(2) {
            return Err(Error::config("encode width/height must be even (required for yuv420p output)"));
        }
        if self.fps == 0 {
            return Err(Error::config("encode fps must be non-zero"));
        }
        Ok(())
    }
}

/// Sink contract for consuming composited frames in timeline order (§4.5).
///
/// Ordering contract: `push_frame` is called in strictly increasing order for a single
/// `begin`/`end` span; frames are never reordered or skipped.
pub trait FrameSink {
    fn begin(&mut self) -> Result<()>;
    fn push_frame(&mut self, frame: &Frame) -> Result<()>;
    fn end(&mut self) -> Result<PathBuf>;
}

/// Feeds raw RGB24 to an `ffmpeg`/libx264 child process over stdin: CBR, zero lookahead,
/// `ultrafast` preset, so encode latency never becomes the pipeline bottleneck (§4.5).
pub struct EncoderSink {
    cfg: EncodeConfig,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
}

impl EncoderSink {
    pub fn new(cfg: EncodeConfig) -> Result<Self> {
        cfg.validate()?;
        Ok(Self { cfg, child: None, stdin: None })
    }

    fn spawn(&mut self) -> Result<()> {
        ensure_parent_dir(&self.cfg.out_path)?;

        let size = format!("{}x{}", self.cfg.width, self.cfg.height);
        let fps = self.cfg.fps.to_string();
        let bitrate = format!("{CBR_BITRATE_KBPS}k");

        let mut command = Command::new("ffmpeg");
        command
            .args(["-v", "error", "-y"])
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "-s", &size, "-r", &fps])
            .args(["-i", "pipe:0"])
            .args(["-c:v", "libx264", "-preset", "ultrafast", "-pix_fmt", "yuv420p"])
            .args(["-x264-params", "rc-lookahead=0"])
            .args(["-b:v", &bitrate, "-minrate", &bitrate, "-maxrate", &bitrate])
            .args(["-bufsize", &bitrate]);

        if self.cfg.elementary_stream {
            command.args(["-f", "h264"]);
        } else {
            command.args(["-f", "mp4", "-movflags", "+faststart"]);
        }
        command.arg(&self.cfg.out_path);

        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::encode(format!("failed to spawn ffmpeg encoder: {e}")))?;
        self.stdin = child.stdin.take();
        self.child = Some(child);
        Ok(())
    }

    fn reap_on_failure(&mut self) -> String {
        let Some(mut child) = self.child.take() else {
            return String::new();
        };
        self.stdin = None;
        let mut msg = String::new();
        if let Some(mut err) = child.stderr.take() {
            use std::io::Read as _;
            let _ = err.read_to_string(&mut msg);
        }
        let _ = child.wait();
        msg.trim().to_string()
    }
}

impl FrameSink for EncoderSink {
    fn begin(&mut self) -> Result<()> {
        self.spawn()
    }

    fn push_frame(&mut self, frame: &Frame) -> Result<()> {
        let expected = Frame::byte_len(self.cfg.width, self.cfg.height);
        if frame.data.len() != expected {
            return Err(Error::encode(format!(
                "frame size mismatch: expected {expected} bytes, got {}",
                frame.data.len()
            )));
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| Error::encode("encoder not started: call begin() first"))?;
        if let Err(e) = stdin.write_all(&frame.data) {
            let stderr = self.reap_on_failure();
            return Err(Error::encode(format!("failed to write frame to encoder: {e}: {stderr}")));
        }
        Ok(())
    }

    fn end(&mut self) -> Result<PathBuf> {
        self.stdin = None; // drop stdin to signal EOF to ffmpeg
        let mut child = self
            .child
            .take()
            .ok_or_else(|| Error::encode("encoder not started: call begin() first"))?;

        let mut stderr = String::new();
        if let Some(mut err) = child.stderr.take() {
            use std::io::Read as _;
            let _ = err.read_to_string(&mut stderr);
        }
        let status = child
            .wait()
            .map_err(|e| Error::encode(format!("failed to wait for encoder: {e}")))?;
        if !status.success() {
            return Err(Error::encode(format!(
                "ffmpeg encoder exited with {status}: {}",
                stderr.trim()
            )));
        }
        Ok(self.cfg.out_path.clone())
    }
}

impl Drop for EncoderSink {
    fn drop(&mut self) {
        self.stdin = None;
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

pub fn is_ffmpeg_on_path() -> bool {
    crate::media::is_ffmpeg_on_path()
}

pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::encode(format!("failed to create output directory '{}': {e}", parent.display())))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_validation_catches_bad_values() {
        let base = EncodeConfig {
            width: 10,
            height: 10,
            fps: 30,
            out_path: PathBuf::from("out.h264"),
            elementary_stream: true,
        };
        assert!(EncodeConfig { width: 0, ..base.clone() }.validate().is_err());
        assert!(EncodeConfig { width: 11, ..base.clone() }.validate().is_err());
        assert!(EncodeConfig { fps: 0, ..base }.validate().is_err());
    }

    #[test]
    fn encodes_a_handful_of_frames_to_elementary_stream() {
        if !is_ffmpeg_on_path() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("segment.h264");
        let cfg = EncodeConfig { width: 32, height: 32, fps: 10, out_path: out.clone(), elementary_stream: true };
        let mut sink = EncoderSink::new(cfg).unwrap();
        sink.begin().unwrap();
        let frame = Frame { width: 32, height: 32, data: vec![128u8; Frame::byte_len(32, 32)] };
        for _ in 0..5 {
            sink.push_frame(&frame).unwrap();
        }
        let path = sink.end().unwrap();
        assert!(path.exists());
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
    }
}
