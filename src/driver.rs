use std::path::{Path, PathBuf};

use crate::compositor::{BorderPhase, Compositor};
use crate::config::GlobalConfig;
use crate::encoder::{EncodeConfig, EncoderSink, FrameSink};
use crate::error::{Error, Result};
use crate::frame_source::{self, Frame};
use crate::template::{render_subtitle_text, Template};

/// Orchestrates one render schedule against a single `EncoderSink`, per §4.6.
pub struct RenderDriver<'a> {
    config: &'a GlobalConfig,
    template: &'a Template,
}

/// The date substituted into the subtitle's `{year}`/`{month}`/`{day}` placeholders.
#[derive(Clone, Copy, Debug)]
pub struct SubtitleDate {
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

impl<'a> RenderDriver<'a> {
    pub fn new(config: &'a GlobalConfig, template: &'a Template) -> Self {
        Self { config, template }
    }

    /// One-shot schedule for a cover image plus `video_paths.len()` clips (1..5), writing
    /// directly to `out_path` as a muxed `.mp4` (§4.6 one-shot schedule).
    pub fn render_once(
        &self,
        image_path: &Path,
        video_paths: &[PathBuf],
        date: SubtitleDate,
        out_path: &Path,
    ) -> Result<PathBuf> {
        if !video_paths.is_empty() {
            frame_source::validate_clip_paths(video_paths)?;
        }

        let cfg = self.config;
        let mut compositor = Compositor::new(cfg.width, cfg.height, self.template)?;
        let subtitle_text = render_subtitle_text(&self.template.subtitle_template, date.year, date.month, date.day);

        let encode_cfg = EncodeConfig {
            width: cfg.width,
            height: cfg.height,
            fps: cfg.fps,
            out_path: out_path.with_extension("video.mp4"),
            elementary_stream: false,
        };
        let mut encoder = EncoderSink::new(encode_cfg)?;
        encoder.begin()?;

        let mut global_frame = 0u64;
        let mut image_source =
            frame_source::open_image_source(image_path, cfg.width, cfg.height, cfg.image_frames())?;

        // Image phase: the cover image is its own "from" and "to", drawn via the blit path.
        // The raw (uncomposited) frame is kept as the transition's "from" source for the first
        // video clip; `composite` applies border/subtitle fresh on every call, so the cached
        // frame must stay uncomposited.
        let mut previous_last_frame = None;
        for _ in 0..cfg.image_frames() {
            let frame = image_source.pull()?;
            let out = self.draw_solo(&mut compositor, &frame, BorderPhase::Image, &subtitle_text, global_frame)?;
            encoder.push_frame(&out)?;
            previous_last_frame = Some(frame);
            global_frame += 1;
        }
        image_source.close();
        let mut previous_last_frame =
            previous_last_frame.ok_or_else(|| Error::input("image_duration produced zero frames"))?;

        for (k, video_path) in video_paths.iter().enumerate() {
            // Every clip transitions in from the preceding segment's last frame (the cover
            // image for k=0), using the rotating cursor (§8 property 2, S3's "indices 0,1,2").
            // Only the first clip gets its full nominal duration on top of that: a one-shot
            // render is a single continuous stream, so an interior clip-to-clip boundary
            // doesn't add net new timeline length the way a segment concat would (that's what
            // the incremental schedule does instead, in `render_append_segment` below) — each
            // interior clip's solo phase is shortened by `TRANS_FRAMES` to keep the total at
            // IMG_FRAMES + N*SOLO_FRAMES + TRANS_FRAMES (§8 property 1).
            let solo_frames = if k == 0 { cfg.solo_frames() } else { cfg.solo_frames() - cfg.transition_frames() };
            let decode_frames = cfg.transition_frames() + solo_frames;
            let mut video_source = frame_source::open_video_source(
                video_path,
                cfg.width,
                cfg.height,
                cfg.fps,
                decode_frames,
            )?;

            let effect = self.template.transition_paths[k % self.template.transition_paths.len()].clone();
            for f in 0..cfg.transition_frames() {
                let progress = (f + 1) as f32 / cfg.transition_frames() as f32;
                let to = video_source.pull()?;
                let out = compositor.composite(
                    &previous_last_frame,
                    &to,
                    Some(&effect),
                    progress,
                    BorderPhase::Video,
                    &subtitle_text,
                    global_frame,
                    self.template.typewriter_speed,
                    self.template.subtitle_duration,
                    cfg.fps,
                    self.template.font_size as f32,
                    self.template.text_color,
                    self.template.outline_color,
                    self.template.outline_width,
                )?;
                encoder.push_frame(&out)?;
                previous_last_frame = to;
                global_frame += 1;
            }

            for _ in 0..solo_frames {
                let frame = video_source.pull()?;
                let out = self.draw_solo(&mut compositor, &frame, BorderPhase::Video, &subtitle_text, global_frame)?;
                previous_last_frame = frame;
                encoder.push_frame(&out)?;
                global_frame += 1;
            }
            video_source.close();
        }

        let muxed_video = encoder.end()?;
        let final_path = out_path.to_path_buf();
        let result = crate::mux::Muxer::mux_audio(&muxed_video, &self.template.bgm_path, &final_path);
        let _ = std::fs::remove_file(&muxed_video);
        result
    }

    fn draw_solo(
        &self,
        compositor: &mut Compositor,
        frame: &Frame,
        border_phase: BorderPhase,
        subtitle_text: &str,
        global_frame: u64,
    ) -> Result<Frame> {
        compositor.composite(
            frame,
            frame,
            None,
            0.0,
            border_phase,
            subtitle_text,
            global_frame,
            self.template.typewriter_speed,
            self.template.subtitle_duration,
            self.config.fps,
            self.template.font_size as f32,
            self.template.text_color,
            self.template.outline_color,
            self.template.outline_width,
        )
    }

    /// Transition effect used at the `k`-th append (1-indexed), per §8 property 2.
    pub fn transition_for_append(template: &Template, append_index: usize) -> &Path {
        let len = template.transition_paths.len();
        &template.transition_paths[(append_index - 1) % len]
    }
}

/// Renders a single incremental segment (`init` or `append`), returning the encoded segment
/// path and the final composited frame to cache for the next append (§4.6 incremental
/// schedule).
pub struct SegmentRenderer<'a> {
    config: &'a GlobalConfig,
    template: &'a Template,
}

impl<'a> SegmentRenderer<'a> {
    pub fn new(config: &'a GlobalConfig, template: &'a Template) -> Self {
        Self { config, template }
    }

    /// Segment 0: image phase only.
    pub fn render_init_segment(
        &self,
        image_path: &Path,
        subtitle_text: &str,
        segment_path: &Path,
    ) -> Result<Frame> {
        let cfg = self.config;
        let mut compositor = Compositor::new(cfg.width, cfg.height, self.template)?;
        let mut source = frame_source::open_image_source(image_path, cfg.width, cfg.height, cfg.image_frames())?;

        let encode_cfg = EncodeConfig {
            width: cfg.width,
            height: cfg.height,
            fps: cfg.fps,
            out_path: segment_path.to_path_buf(),
            elementary_stream: true,
        };
        let mut encoder = EncoderSink::new(encode_cfg)?;
        encoder.begin()?;

        let mut last = None;
        for f in 0..cfg.image_frames() {
            let frame = source.pull()?;
            let out = compositor.composite(
                &frame, &frame, None, 0.0, BorderPhase::Image, subtitle_text, f,
                self.template.typewriter_speed, self.template.subtitle_duration, cfg.fps,
                self.template.font_size as f32, self.template.text_color, self.template.outline_color,
                self.template.outline_width,
            )?;
            encoder.push_frame(&out)?;
            last = Some(out);
        }
        source.close();
        encoder.end()?;
        last.ok_or_else(|| Error::session("image phase produced no frames"))
    }

    /// Segment N: transition from `previous_last_frame` into `video_path`, then solo play.
    pub fn render_append_segment(
        &self,
        previous_last_frame: &Frame,
        video_path: &Path,
        transition_effect: &Path,
        subtitle_text: &str,
        global_frame_offset: u64,
        segment_path: &Path,
    ) -> Result<Frame> {
        let cfg = self.config;
        let mut compositor = Compositor::new(cfg.width, cfg.height, self.template)?;
        let mut video_source =
            frame_source::open_video_source(video_path, cfg.width, cfg.height, cfg.fps, cfg.video_frames())?;

        let encode_cfg = EncodeConfig {
            width: cfg.width,
            height: cfg.height,
            fps: cfg.fps,
            out_path: segment_path.to_path_buf(),
            elementary_stream: true,
        };
        let mut encoder = EncoderSink::new(encode_cfg)?;
        encoder.begin()?;

        let mut last = previous_last_frame.clone();
        for f in 0..cfg.transition_frames() {
            let progress = (f + 1) as f32 / cfg.transition_frames() as f32;
            let to = video_source.pull()?;
            let out = compositor.composite(
                &last, &to, Some(transition_effect), progress, BorderPhase::Video, subtitle_text,
                global_frame_offset + f,
                self.template.typewriter_speed, self.template.subtitle_duration, cfg.fps,
                self.template.font_size as f32, self.template.text_color, self.template.outline_color,
                self.template.outline_width,
            )?;
            encoder.push_frame(&out)?;
            last = to;
        }

        let mut final_frame = last.clone();
        for f in 0..cfg.solo_frames() {
            let frame = video_source.pull()?;
            let out = compositor.composite(
                &frame, &frame, None, 0.0, BorderPhase::Video, subtitle_text,
                global_frame_offset + cfg.transition_frames() + f,
                self.template.typewriter_speed, self.template.subtitle_duration, cfg.fps,
                self.template.font_size as f32, self.template.text_color, self.template.outline_color,
                self.template.outline_width,
            )?;
            encoder.push_frame(&out)?;
            final_frame = frame;
        }
        video_source.close();
        encoder.end()?;
        Ok(final_frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_for_append_rotates_through_list() {
        let dir = tempfile::tempdir().unwrap();
        let paths: Vec<PathBuf> = (0..3).map(|i| dir.path().join(format!("t{i}.glsl"))).collect();
        for p in &paths {
            std::fs::write(p, "vec4 transition(vec2 uv){return vec4(0.0);}").unwrap();
        }
        let template = Template {
            name: "t".into(),
            description: "t".into(),
            border_image_path: dir.path().join("b.png"),
            border_video_path: dir.path().join("b.png"),
            bgm_path: dir.path().join("bgm.mp3"),
            transition_paths: paths.clone(),
            font_path: dir.path().join("f.ttf"),
            font_size: 24,
            text_color: [255, 255, 255, 255],
            outline_color: [0, 0, 0, 255],
            outline_width: 2,
            subtitle_template: String::new(),
            typewriter_speed: 3,
            subtitle_duration: 5.0,
        };
        assert_eq!(RenderDriver::transition_for_append(&template, 1), &paths[0]);
        assert_eq!(RenderDriver::transition_for_append(&template, 2), &paths[1]);
        assert_eq!(RenderDriver::transition_for_append(&template, 4), &paths[0]);
    }
}
