use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};

use crate::error::{Error, Result};
use crate::media;

/// A packed RGB24 raster of fixed dimensions, row-major, top-left origin. Always exactly
/// `width * height * 3` bytes (§3 Frame).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn byte_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * 3
    }
}

/// Produces a lazy sequence of canonical RGB frames for one input, terminating at a
/// configured frame count and padding by repeating the last frame on upstream exhaustion
/// (§4.1).
pub trait FrameSource {
    fn pull(&mut self) -> Result<Frame>;
    fn frames_remaining(&self) -> u64;
    fn close(&mut self);
}

/// A still image resized once to (width, height); returns the same buffer on every pull
/// until `terminal_count` is reached.
pub struct ImageFrameSource {
    frame: Frame,
    emitted: u64,
    terminal_count: u64,
}

impl ImageFrameSource {
    pub fn new(path: &Path, width: u32, height: u32, terminal_count: u64) -> Result<Self> {
        let img = image::open(path)
            .map_err(|e| Error::decode(format!("failed to load image '{}': {e}", path.display())))?;
        let resized = img.resize_exact(width, height, image::imageops::FilterType::Lanczos3);
        let rgb = resized.to_rgb8();
        Ok(Self {
            frame: Frame { width, height, data: rgb.into_raw() },
            emitted: 0,
            terminal_count,
        })
    }
}

impl FrameSource for ImageFrameSource {
    fn pull(&mut self) -> Result<Frame> {
        self.emitted = self.emitted.saturating_add(1);
        Ok(self.frame.clone())
    }

    fn frames_remaining(&self) -> u64 {
        self.terminal_count.saturating_sub(self.emitted)
    }

    fn close(&mut self) {}
}

/// A video clip, normalized via a persistent `ffmpeg` child process: reset timestamps,
/// scale to (width, height), resample to `fps`, raw rgb24 on stdout (§4.1).
pub struct VideoFrameSource {
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    frame_len: usize,
    width: u32,
    height: u32,
    emitted: u64,
    terminal_count: u64,
    last_good: Option<Vec<u8>>,
    eof: bool,
}

impl VideoFrameSource {
    /// Construct and perform the mandatory first-frame preload (§4.1): the caller never
    /// observes a source that hasn't already produced one real frame.
    pub fn open(path: &Path, width: u32, height: u32, fps: u32, terminal_count: u64) -> Result<Self> {
        media::probe_video(path)?;

        let mut child = Command::new("ffmpeg")
            .args(["-v", "error"])
            .arg("-i")
            .arg(path)
            .args([
                "-vf",
                &format!("scale={width}:{height},fps={fps},setpts=PTS-STARTPTS"),
                "-f",
                "rawvideo",
                "-pix_fmt",
                "rgb24",
                "pipe:1",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::decode(format!("failed to spawn ffmpeg decoder: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::decode("ffmpeg decoder stdout not captured"))?;

        let mut source = Self {
            child: Some(child),
            stdout: Some(stdout),
            frame_len: Frame::byte_len(width, height),
            width,
            height,
            emitted: 0,
            terminal_count,
            last_good: None,
            eof: false,
        };

        // First-frame preload is mandatory so downstream never sees a black frame while the
        // decoder starts up.
        let preload = source.read_frame_bytes()?.ok_or_else(|| {
            let stderr = source.reap_stderr();
            Error::decode(format!(
                "decoder produced no frames for '{}' before first-frame preload: {stderr}",
                path.display()
            ))
        })?;
        source.last_good = Some(preload);
        source.emitted = 0; // preload does not count against the first pull
        Ok(source)
    }

    fn read_frame_bytes(&mut self) -> Result<Option<Vec<u8>>> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(None);
        };
        let mut buf = vec![0u8; self.frame_len];
        let mut filled = 0usize;
        while filled < self.frame_len {
            let n = stdout
                .read(&mut buf[filled..])
                .map_err(|e| Error::decode(format!("failed to read decoded frame: {e}")))?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            return Ok(None);
        }
        if filled < self.frame_len {
            // Partial trailing frame at EOF; treat as exhaustion rather than a corrupt frame.
            return Ok(None);
        }
        Ok(Some(buf))
    }

    fn reap_stderr(&mut self) -> String {
        let Some(mut child) = self.child.take() else {
            return String::new();
        };
        let mut msg = String::new();
        if let Some(mut err) = child.stderr.take() {
            let _ = err.read_to_string(&mut msg);
        }
        let _ = child.wait();
        msg.trim().to_string()
    }
}

impl FrameSource for VideoFrameSource {
    fn pull(&mut self) -> Result<Frame> {
        if !self.eof {
            match self.read_frame_bytes()? {
                Some(bytes) => {
                    self.last_good = Some(bytes);
                }
                None => {
                    // EOF after preload is latched and silently converted to last-frame
                    // padding, never an error (§7 propagation policy).
                    self.eof = true;
                }
            }
        }
        self.emitted += 1;
        let data = self
            .last_good
            .clone()
            .ok_or_else(|| Error::decode("video source has no cached frame to pad with"))?;
        Ok(Frame { width: self.width, height: self.height, data })
    }

    fn frames_remaining(&self) -> u64 {
        self.terminal_count.saturating_sub(self.emitted)
    }

    fn close(&mut self) {
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl Drop for VideoFrameSource {
    fn drop(&mut self) {
        self.close();
    }
}

pub fn open_image_source(
    path: &Path,
    width: u32,
    height: u32,
    terminal_count: u64,
) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(ImageFrameSource::new(path, width, height, terminal_count)?))
}

pub fn open_video_source(
    path: &Path,
    width: u32,
    height: u32,
    fps: u32,
    terminal_count: u64,
) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(VideoFrameSource::open(path, width, height, fps, terminal_count)?))
}

pub fn validate_clip_paths(paths: &[PathBuf]) -> Result<()> {
    if paths.is_empty() || paths.len() > 5 {
        return Err(Error::input(format!(
            "expected 1..5 video clips, got {}",
            paths.len()
        )));
    }
    for p in paths {
        if !p.exists() {
            return Err(Error::input(format!("video path does not exist: '{}'", p.display())));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_png(dir: &Path, w: u32, h: u32) -> PathBuf {
        let path = dir.join("cover.png");
        let img = image::RgbImage::from_pixel(w, h, image::Rgb([10, 20, 30]));
        img.save(&path).unwrap();
        path
    }

    #[test]
    fn image_source_repeats_frame_until_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let path = solid_png(dir.path(), 64, 48);
        let mut src = ImageFrameSource::new(&path, 64, 48, 3).unwrap();

        let f1 = src.pull().unwrap();
        let f2 = src.pull().unwrap();
        assert_eq!(f1, f2);
        assert_eq!(f1.data.len(), Frame::byte_len(64, 48));
        assert_eq!(src.frames_remaining(), 1);
        src.pull().unwrap();
        assert_eq!(src.frames_remaining(), 0);
    }

    #[test]
    fn validate_clip_paths_rejects_empty_and_too_many() {
        assert!(validate_clip_paths(&[]).is_err());
        let many: Vec<PathBuf> = (0..6).map(|i| PathBuf::from(format!("/tmp/clip{i}.mp4"))).collect();
        assert!(validate_clip_paths(&many).is_err());
    }

    #[test]
    fn validate_clip_paths_rejects_missing_file() {
        let err = validate_clip_paths(&[PathBuf::from("/no/such/clip.mp4")]).unwrap_err();
        assert!(matches!(err, Error::Input(_)));
    }

    #[test]
    fn video_source_pads_with_last_frame_on_eof() {
        if !media::is_ffmpeg_on_path() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let clip = dir.path().join("clip.mp4");
        // One second of synthetic video, encoded with ffmpeg itself.
        let status = std::process::Command::new("ffmpeg")
            .args([
                "-v", "error", "-f", "lavfi", "-i", "color=c=red:s=32x32:d=1:r=10", "-y",
            ])
            .arg(&clip)
            .status();
        let Ok(status) = status else { return };
        if !status.success() {
            return;
        }

        let mut src = VideoFrameSource::open(&clip, 32, 32, 10, 40).unwrap();
        let mut last = None;
        for _ in 0..40 {
            last = Some(src.pull().unwrap());
        }
        assert_eq!(src.frames_remaining(), 0);
        // Requesting exactly the scheduled count must succeed even though the source only
        // had ~10 real frames; the tail is last-frame padding (§8 EOF padding).
        assert!(last.is_some());
    }
}
