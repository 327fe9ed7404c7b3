use ab_glyph::{Font, FontArc, Glyph, Point, PxScale, ScaleFont};

use crate::error::{Error, Result};

/// An RGBA raster the same size as the output frame, composited over the render by the
/// `u_tex` overlay program (§4.3).
#[derive(Clone)]
pub struct SubtitleLayer {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl SubtitleLayer {
    fn blank(width: u32, height: u32) -> Self {
        Self { width, height, rgba: vec![0u8; width as usize * height as usize * 4] }
    }
}

/// Rasterizes subtitle text with an outline, memoizing the last-rendered string so repeated
/// frames of the same typewriter prefix don't re-rasterize (§4.3).
pub struct SubtitleRasterizer {
    font: FontArc,
    width: u32,
    height: u32,
    last_text: Option<String>,
    last_layer: Option<SubtitleLayer>,
}

impl SubtitleRasterizer {
    pub fn load(font_path: &std::path::Path, width: u32, height: u32) -> Result<Self> {
        let bytes = std::fs::read(font_path)
            .map_err(|e| Error::gpu(format!("failed to read font '{}': {e}", font_path.display())))?;
        let font = FontArc::try_from_vec(bytes)
            .map_err(|e| Error::gpu(format!("failed to parse font '{}': {e}", font_path.display())))?;
        Ok(Self { font, width, height, last_text: None, last_layer: None })
    }

    /// Render `text` at `scale` with a stroked outline, positioned in the lower third of the
    /// frame. Returns a cached layer if `text` matches the previous call.
    pub fn render(
        &mut self,
        text: &str,
        scale: f32,
        color: [u8; 4],
        outline_color: [u8; 4],
        outline_width: u32,
    ) -> SubtitleLayer {
        if self.last_text.as_deref() == Some(text)
            && let Some(layer) = &self.last_layer
        {
            return layer.clone();
        }

        let layer = self.rasterize(text, scale, color, outline_color, outline_width);
        self.last_text = Some(text.to_string());
        self.last_layer = Some(layer.clone());
        layer
    }

    fn rasterize(
        &self,
        text: &str,
        scale: f32,
        color: [u8; 4],
        outline_color: [u8; 4],
        outline_width: u32,
    ) -> SubtitleLayer {
        let mut layer = SubtitleLayer::blank(self.width, self.height);
        if text.is_empty() {
            return layer;
        }

        let scaled = self.font.as_scaled(PxScale::from(scale));
        let glyphs = layout_glyphs(&scaled, text);

        let total_width: f32 = glyphs.last().map(|(g, _)| g.position.x).unwrap_or(0.0);
        let baseline_x = (self.width as f32 - total_width) / 2.0;
        let baseline_y = self.height as f32 * 2.0 / 3.0;

        // Outline pass first (8 directional offsets), then the fill pass on top, so the fill
        // always wins where the two overlap.
        let offsets = outline_offsets(outline_width);
        if outline_width > 0 {
            for (dx, dy) in &offsets {
                for (glyph, _ch) in &glyphs {
                    let mut g = glyph.clone();
                    g.position.x += baseline_x + *dx as f32;
                    g.position.y += baseline_y + *dy as f32;
                    draw_glyph(&scaled, g, outline_color, &mut layer);
                }
            }
        }
        for (glyph, _ch) in &glyphs {
            let mut g = glyph.clone();
            g.position.x += baseline_x;
            g.position.y += baseline_y;
            draw_glyph(&scaled, g, color, &mut layer);
        }

        layer
    }
}

fn layout_glyphs<F: Font>(scaled: &impl ScaleFont<F>, text: &str) -> Vec<(Glyph, char)> {
    let mut caret = 0.0f32;
    let mut out = Vec::with_capacity(text.chars().count());
    let mut prev: Option<ab_glyph::GlyphId> = None;
    for ch in text.chars() {
        let id = scaled.glyph_id(ch);
        if let Some(prev_id) = prev {
            caret += scaled.kern(prev_id, id);
        }
        let glyph = id.with_scale_and_position(scaled.scale(), Point { x: caret, y: 0.0 });
        caret += scaled.h_advance(id);
        out.push((glyph, ch));
        prev = Some(id);
    }
    out
}

fn outline_offsets(width: u32) -> Vec<(i32, i32)> {
    if width == 0 {
        return Vec::new();
    }
    let w = width as i32;
    vec![
        (-w, -w), (0, -w), (w, -w),
        (-w, 0), (w, 0),
        (-w, w), (0, w), (w, w),
    ]
}

fn draw_glyph<F: Font>(scaled: &impl ScaleFont<F>, glyph: Glyph, color: [u8; 4], layer: &mut SubtitleLayer) {
    let Some(outline) = scaled.outline_glyph(glyph) else {
        return;
    };
    let bounds = outline.px_bounds();
    outline.draw(|gx, gy, coverage| {
        if coverage <= 0.0 {
            return;
        }
        let x = bounds.min.x as i32 + gx as i32;
        let y = bounds.min.y as i32 + gy as i32;
        if x < 0 || y < 0 || x as u32 >= layer.width || y as u32 >= layer.height {
            return;
        }
        let idx = (y as usize * layer.width as usize + x as usize) * 4;
        let alpha = (coverage.clamp(0.0, 1.0) * color[3] as f32) as u8;
        if alpha > layer.rgba[idx + 3] {
            layer.rgba[idx] = color[0];
            layer.rgba[idx + 1] = color[1];
            layer.rgba[idx + 2] = color[2];
            layer.rgba[idx + 3] = alpha;
        }
    });
}

/// `min(floor(frame / typewriter_speed), len(text))` characters of `text` are visible, and
/// the whole subtitle disappears once `frame >= subtitle_duration * fps` (§4.3).
pub fn visible_prefix(text: &str, frame: u64, typewriter_speed: u32, duration_sec: f64, fps: u32) -> String {
    let vanish_frame = (duration_sec * f64::from(fps)).round() as u64;
    if frame >= vanish_frame {
        return String::new();
    }
    let speed = typewriter_speed.max(1) as u64;
    let visible_chars = (frame / speed) as usize;
    text.chars().take(visible_chars.min(text.chars().count())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visible_prefix_grows_with_typewriter_speed() {
        assert_eq!(visible_prefix("hello", 0, 3, 5.0, 25), "");
        assert_eq!(visible_prefix("hello", 3, 3, 5.0, 25), "h");
        assert_eq!(visible_prefix("hello", 12, 3, 5.0, 25), "hell");
        assert_eq!(visible_prefix("hello", 100, 3, 5.0, 25), "hello");
    }

    #[test]
    fn subtitle_vanishes_at_duration() {
        let text = visible_prefix("hello", 125, 1, 5.0, 25);
        assert_eq!(text, "");
    }

    fn test_font_path() -> std::path::PathBuf {
        // A system font is assumed present on the sandbox; skip the rasterization tests if not.
        for candidate in [
            "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
            "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
        ] {
            let p = std::path::PathBuf::from(candidate);
            if p.exists() {
                return p;
            }
        }
        std::path::PathBuf::new()
    }

    #[test]
    fn rasterizes_nonempty_text_to_nonzero_alpha() {
        let font_path = test_font_path();
        if font_path.as_os_str().is_empty() {
            return;
        }
        let mut r = SubtitleRasterizer::load(&font_path, 200, 100).unwrap();
        let layer = r.render("Hi", 32.0, [255, 255, 255, 255], [0, 0, 0, 255], 2);
        assert!(layer.rgba.iter().any(|&b| b != 0));
    }

    #[test]
    fn memoizes_identical_text() {
        let font_path = test_font_path();
        if font_path.as_os_str().is_empty() {
            return;
        }
        let mut r = SubtitleRasterizer::load(&font_path, 200, 100).unwrap();
        let a = r.render("same", 32.0, [255, 255, 255, 255], [0, 0, 0, 255], 2);
        let b = r.render("same", 32.0, [255, 255, 255, 255], [0, 0, 0, 255], 2);
        assert_eq!(a.rgba, b.rgba);
    }
}
