use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Error, Result};

/// Concatenates elementary-stream segments and muxes in a background audio track (§4.9).
pub struct Muxer;

impl Muxer {
    /// Stream-copy concat of Annex-B segments produced by the same encoder configuration,
    /// writing a video-only muxed file. No re-encode ever happens here.
    pub fn concat(segments: &[PathBuf], out_path: &Path) -> Result<PathBuf> {
        if segments.is_empty() {
            return Err(Error::mux("cannot concat an empty segment list"));
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let dir = out_path.parent().unwrap_or_else(|| Path::new("."));
        let manifest_path = dir.join(format!(
            "{}.concat.txt",
            out_path.file_stem().and_then(|s| s.to_str()).unwrap_or("manifest")
        ));
        let manifest = segments
            .iter()
            .map(|p| format!("file '{}'", p.display()))
            .collect::<Vec<_>>()
            .join("\n");
        std::fs::write(&manifest_path, manifest)?;

        let span = tracing::debug_span!("ffmpeg_concat", segments = segments.len());
        let _enter = span.enter();

        let output = Command::new("ffmpeg")
            .args(["-v", "error", "-y", "-f", "concat", "-safe", "0"])
            .arg("-i")
            .arg(&manifest_path)
            .args(["-c", "copy"])
            .arg(out_path)
            .output()
            .map_err(|e| Error::mux(format!("failed to spawn ffmpeg concat: {e}")))?;

        let _ = std::fs::remove_file(&manifest_path);

        if !output.status.success() {
            return Err(Error::mux(format!(
                "concat failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        tracing::debug!(status = ?output.status, "concat succeeded");
        Ok(out_path.to_path_buf())
    }

    /// Attach `audio_path` to `video_path`, looping short audio and truncating long audio to
    /// the video's duration; AAC 44.1 kHz stereo output (§4.9).
    pub fn mux_audio(video_path: &Path, audio_path: &Path, out_path: &Path) -> Result<PathBuf> {
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let span = tracing::debug_span!("ffmpeg_mux_audio", video = %video_path.display(), audio = %audio_path.display());
        let _enter = span.enter();

        let output = Command::new("ffmpeg")
            .args(["-v", "error", "-y"])
            .arg("-i")
            .arg(video_path)
            .args(["-stream_loop", "-1"])
            .arg("-i")
            .arg(audio_path)
            .args(["-map", "0:v:0", "-map", "1:a:0"])
            .args(["-c:v", "copy"])
            .args(["-c:a", "aac", "-ar", "44100", "-ac", "2"])
            .args(["-shortest"])
            .arg(out_path)
            .output()
            .map_err(|e| Error::mux(format!("failed to spawn ffmpeg audio mux: {e}")))?;

        if !output.status.success() {
            return Err(Error::mux(format!(
                "audio mux failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        tracing::debug!(status = ?output.status, "audio mux succeeded");
        Ok(out_path.to_path_buf())
    }

    /// Concat then mux audio in one call, as `finalize_session`/`render_once` need.
    pub fn finalize(segments: &[PathBuf], audio_path: &Path, out_path: &Path) -> Result<PathBuf> {
        let tmp_video = out_path.with_extension("concat.mp4");
        Self::concat(segments, &tmp_video)?;
        let result = Self::mux_audio(&tmp_video, audio_path, out_path);
        let _ = std::fs::remove_file(&tmp_video);
        result
    }
}
