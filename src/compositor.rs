use std::path::Path;

use glow::HasContext;

use crate::error::Result;
use crate::frame_source::Frame;
use crate::gpu::context::GpuContext;
use crate::gpu::shaders::ShaderRegistry;
use crate::subtitle::{visible_prefix, SubtitleLayer, SubtitleRasterizer};
use crate::template::Template;

/// Which of the template's two border variants a frame is drawn with (§3 Template: "border
/// image path (image-variant), optional second border image (video-variant, falls back to the
/// first)").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BorderPhase {
    Image,
    Video,
}

/// Single-pass compositing pipeline (§4.4): blend `from`/`to` via the active transition effect
/// (or a plain blit during a solo phase), then alpha-composite the border and subtitle layers,
/// then read the result back to a packed RGB `Frame`.
pub struct Compositor {
    gpu: GpuContext,
    shaders: ShaderRegistry,
    subtitles: SubtitleRasterizer,
    border_image_rgba: Vec<u8>,
    border_video_rgba: Vec<u8>,
    border_uploaded: Option<BorderPhase>,
}

impl Compositor {
    pub fn new(width: u32, height: u32, template: &Template) -> Result<Self> {
        let gpu = GpuContext::new(width, height)?;
        let shaders = ShaderRegistry::new(&gpu.gl)?;
        let subtitles = SubtitleRasterizer::load(&template.font_path, width, height)?;
        let border_image_rgba = load_rgba(&template.border_image_path, width, height)?;
        let border_video_rgba = if template.border_video_path == template.border_image_path {
            border_image_rgba.clone()
        } else {
            load_rgba(&template.border_video_path, width, height)?
        };
        Ok(Self { gpu, shaders, subtitles, border_image_rgba, border_video_rgba, border_uploaded: None })
    }

    fn ensure_border_uploaded(&mut self, phase: BorderPhase) {
        if self.border_uploaded == Some(phase) {
            return;
        }
        let rgba = match phase {
            BorderPhase::Image => &self.border_image_rgba,
            BorderPhase::Video => &self.border_video_rgba,
        };
        self.gpu.upload_rgba(self.gpu.border_tex, self.gpu.width, self.gpu.height, rgba);
        self.border_uploaded = Some(phase);
    }

    /// Render one output frame: a solo phase has `to == from` and `progress` is ignored, a
    /// transition phase blends the two via `effect_path` at `progress` (§4.2/§4.4).
    pub fn composite(
        &mut self,
        from: &Frame,
        to: &Frame,
        effect_path: Option<&Path>,
        progress: f32,
        border_phase: BorderPhase,
        subtitle_text: &str,
        subtitle_frame: u64,
        typewriter_speed: u32,
        subtitle_duration: f64,
        fps: u32,
        font_size: f32,
        text_color: [u8; 4],
        outline_color: [u8; 4],
        outline_width: u32,
    ) -> Result<Frame> {
        self.ensure_border_uploaded(border_phase);

        self.gpu.upload_rgb(self.gpu.from_tex, self.gpu.width, self.gpu.height, &from.data);
        self.gpu.upload_rgb(self.gpu.to_tex, self.gpu.width, self.gpu.height, &to.data);

        let gl = &self.gpu.gl;
        unsafe {
            gl.bind_framebuffer(glow::FRAMEBUFFER, Some(self.gpu.output_fbo));
            gl.viewport(0, 0, self.gpu.width as i32, self.gpu.height as i32);
            gl.disable(glow::DEPTH_TEST);
        }

        match effect_path {
            Some(path) => {
                let program = self.shaders.transition_program(gl, path)?;
                unsafe {
                    gl.use_program(Some(program));
                    gl.active_texture(glow::TEXTURE0);
                    gl.bind_texture(glow::TEXTURE_2D, Some(self.gpu.from_tex));
                    gl.active_texture(glow::TEXTURE1);
                    gl.bind_texture(glow::TEXTURE_2D, Some(self.gpu.to_tex));
                    set_uniform_tex(gl, program, "u_from", 0);
                    set_uniform_tex(gl, program, "u_to", 1);
                    if let Some(loc) = gl.get_uniform_location(program, "progress") {
                        gl.uniform_1_f32(Some(&loc), progress);
                    }
                    if let Some(loc) = gl.get_uniform_location(program, "ratio") {
                        gl.uniform_1_f32(Some(&loc), self.gpu.width as f32 / self.gpu.height as f32);
                    }
                    gl.draw_arrays(glow::TRIANGLES, 0, 3);
                }
            }
            None => unsafe {
                gl.use_program(Some(self.shaders.blit));
                gl.active_texture(glow::TEXTURE0);
                gl.bind_texture(glow::TEXTURE_2D, Some(self.gpu.from_tex));
                set_uniform_tex(gl, self.shaders.blit, "u_tex", 0);
                gl.draw_arrays(glow::TRIANGLES, 0, 3);
            },
        }

        self.draw_overlay(self.gpu.border_tex);

        let visible = visible_prefix(subtitle_text, subtitle_frame, typewriter_speed, subtitle_duration, fps);
        let layer = self.subtitles.render(&visible, font_size, text_color, outline_color, outline_width);
        self.draw_subtitle_layer(&layer);

        let data = self.gpu.read_output_rgb();
        Ok(Frame { width: self.gpu.width, height: self.gpu.height, data })
    }

    fn draw_overlay(&self, tex: glow::Texture) {
        let gl = &self.gpu.gl;
        unsafe {
            gl.enable(glow::BLEND);
            gl.blend_func(glow::SRC_ALPHA, glow::ONE_MINUS_SRC_ALPHA);
            gl.use_program(Some(self.shaders.overlay));
            gl.active_texture(glow::TEXTURE0);
            gl.bind_texture(glow::TEXTURE_2D, Some(tex));
            set_uniform_tex(gl, self.shaders.overlay, "u_tex", 0);
            gl.draw_arrays(glow::TRIANGLES, 0, 3);
            gl.disable(glow::BLEND);
        }
    }

    fn draw_subtitle_layer(&self, layer: &SubtitleLayer) {
        self.gpu.upload_rgba(self.gpu.subtitle_tex, self.gpu.width, self.gpu.height, &layer.rgba);
        self.draw_overlay(self.gpu.subtitle_tex);
    }
}

unsafe fn set_uniform_tex(gl: &glow::Context, program: glow::Program, name: &str, unit: i32) {
    unsafe {
        if let Some(loc) = gl.get_uniform_location(program, name) {
            gl.uniform_1_i32(Some(&loc), unit);
        }
    }
}

fn load_rgba(path: &Path, width: u32, height: u32) -> Result<Vec<u8>> {
    let img = image::open(path)
        .map_err(|e| crate::error::Error::config(format!("failed to load border image '{}': {e}", path.display())))?;
    Ok(img.resize_exact(width, height, image::imageops::FilterType::Lanczos3).to_rgba8().into_raw())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::context::gpu_available;

    fn solid_frame(w: u32, h: u32, color: [u8; 3]) -> Frame {
        let mut data = Vec::with_capacity(w as usize * h as usize * 3);
        for _ in 0..(w * h) {
            data.extend_from_slice(&color);
        }
        Frame { width: w, height: h, data }
    }

    #[test]
    fn solo_blit_round_trips_source_color() {
        if !gpu_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let border = dir.path().join("border.png");
        image::RgbaImage::new(16, 16).save(&border).unwrap();
        let font = dir.path().join("font.ttf");
        let Some(font_bytes) = find_system_font() else { return };
        std::fs::write(&font, font_bytes).unwrap();

        let template = Template {
            name: "t".into(),
            description: "t".into(),
            border_image_path: border.clone(),
            border_video_path: border,
            bgm_path: dir.path().join("bgm.mp3"),
            transition_paths: vec![],
            font_path: font,
            font_size: 24,
            text_color: [255, 255, 255, 255],
            outline_color: [0, 0, 0, 255],
            outline_width: 2,
            subtitle_template: String::new(),
            typewriter_speed: 3,
            subtitle_duration: 5.0,
        };

        let mut compositor = Compositor::new(16, 16, &template).unwrap();
        let from = solid_frame(16, 16, [10, 20, 30]);
        let to = from.clone();
        let out = compositor
            .composite(&from, &to, None, 0.0, BorderPhase::Image, "", 0, 3, 5.0, 25, 24.0, [255, 255, 255, 255], [0, 0, 0, 255], 2)
            .unwrap();
        assert_eq!(out.width, 16);
        assert_eq!(out.height, 16);
        assert_eq!(out.data.len(), Frame::byte_len(16, 16));
    }

    fn find_system_font() -> Option<Vec<u8>> {
        for candidate in [
            "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
            "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
        ] {
            if let Ok(bytes) = std::fs::read(candidate) {
                return Some(bytes);
            }
        }
        None
    }
}
