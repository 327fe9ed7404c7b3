use std::path::Path;

use crate::error::{Error, Result};

#[derive(Clone, Debug)]
pub struct VideoProbe {
    pub width: u32,
    pub height: u32,
    pub duration_sec: f64,
}

pub fn is_ffmpeg_on_path() -> bool {
    std::process::Command::new("ffmpeg")
        .arg("-version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

pub fn is_ffprobe_on_path() -> bool {
    std::process::Command::new("ffprobe")
        .arg("-version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Probe a video file's dimensions and duration via `ffprobe`, failing fast with
/// `Error::Decode` before any GPU resource is allocated for it.
pub fn probe_video(source_path: &Path) -> Result<VideoProbe> {
    #[derive(serde::Deserialize)]
    struct ProbeStream {
        codec_type: Option<String>,
        width: Option<u32>,
        height: Option<u32>,
    }
    #[derive(serde::Deserialize)]
    struct ProbeFormat {
        duration: Option<String>,
    }
    #[derive(serde::Deserialize)]
    struct ProbeOut {
        streams: Vec<ProbeStream>,
        format: Option<ProbeFormat>,
    }

    let span = tracing::debug_span!("ffprobe", path = %source_path.display());
    let _enter = span.enter();

    let out = std::process::Command::new("ffprobe")
        .args(["-v", "error", "-print_format", "json", "-show_streams", "-show_format"])
        .arg(source_path)
        .output()
        .map_err(|e| Error::decode(format!("failed to run ffprobe: {e}")))?;

    if !out.status.success() {
        return Err(Error::decode(format!(
            "ffprobe failed for '{}': {}",
            source_path.display(),
            String::from_utf8_lossy(&out.stderr).trim()
        )));
    }

    let parsed: ProbeOut = serde_json::from_slice(&out.stdout)
        .map_err(|e| Error::decode(format!("ffprobe json parse failed: {e}")))?;
    let video_stream = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| Error::decode("no video stream found"))?;
    let width = video_stream
        .width
        .ok_or_else(|| Error::decode("missing video width from ffprobe"))?;
    let height = video_stream
        .height
        .ok_or_else(|| Error::decode("missing video height from ffprobe"))?;
    let duration_sec = parsed
        .format
        .as_ref()
        .and_then(|f| f.duration.as_ref())
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0);

    tracing::debug!(width, height, duration_sec, "probed video source");

    Ok(VideoProbe { width, height, duration_sec })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_missing_file_is_decode_error() {
        if !is_ffprobe_on_path() {
            return;
        }
        let err = probe_video(Path::new("/no/such/video.mp4")).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }
}
