use std::path::Path;

use crate::error::{Error, Result};

/// Process-wide render parameters, loaded once from a single YAML file.
#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct GlobalConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub image_duration: f64,
    pub video_duration: f64,
    pub transition_duration: f64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct GlobalConfigFile {
    global: GlobalConfig,
}

impl GlobalConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("failed to read global config '{}': {e}", path.display()))
        })?;
        let file: GlobalConfigFile = serde_yaml::from_str(&text)
            .map_err(|e| Error::config(format!("failed to parse global config: {e}")))?;
        file.global.validate()?;
        Ok(file.global)
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::config("global width/height must be non-zero"));
        }
        if !self.width.is_multiple_of(2) || !self.height.is_multiple_of(2) {
            return Err(Error::config(
                "global width/height must be even (required for yuv420p output)",
            ));
        }
        if self.fps == 0 {
            return Err(Error::config("global fps must be non-zero"));
        }
        if self.image_duration <= 0.0 || self.video_duration <= 0.0 {
            return Err(Error::config("image_duration/video_duration must be positive"));
        }
        if self.transition_duration < 0.0 {
            return Err(Error::config("transition_duration must be non-negative"));
        }
        let vid_frames = self.video_frames();
        let trans_frames = self.transition_frames();
        if trans_frames >= vid_frames {
            return Err(Error::config(
                "transition_duration must be shorter than video_duration",
            ));
        }
        Ok(())
    }

    pub fn image_frames(&self) -> u64 {
        round_frames(self.image_duration, self.fps)
    }

    pub fn video_frames(&self) -> u64 {
        round_frames(self.video_duration, self.fps)
    }

    pub fn transition_frames(&self) -> u64 {
        round_frames(self.transition_duration, self.fps)
    }

    pub fn solo_frames(&self) -> u64 {
        self.video_frames() - self.transition_frames()
    }

    /// Total output frames for a one-shot render of `n` clips following §4.6/§8 frame-count
    /// identity: `IMG_FRAMES` alone when `n == 0`, else `IMG_FRAMES + n*(VID_FRAMES-TRANS_FRAMES)
    /// + TRANS_FRAMES`.
    pub fn total_frames(&self, clip_count: usize) -> u64 {
        if clip_count == 0 {
            return self.image_frames();
        }
        let n = clip_count as u64;
        self.image_frames() + n * self.solo_frames() + self.transition_frames()
    }
}

fn round_frames(duration_sec: f64, fps: u32) -> u64 {
    (duration_sec * f64::from(fps)).round() as u64
}
