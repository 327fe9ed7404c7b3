use std::ffi::c_void;

use glow::HasContext;
use khronos_egl as egl;

use crate::error::{Error, Result};

/// Mesa's surfaceless EGL platform: a headless GL context with no window, no display
/// server, and no DRM device node. All rendering here happens into an offscreen
/// framebuffer object, so no on-screen surface is ever needed (§2 GpuContext).
const EGL_PLATFORM_SURFACELESS_MESA: egl::Enum = 0x31DD;

/// Owns the offscreen rendering surface, a single framebuffer object matching output
/// dimensions, and the input textures (§4.4 Compositor reads from `from_tex`/`to_tex`,
/// writes into `output_fbo`).
pub struct GpuContext {
    egl: egl::Instance<egl::Static>,
    display: egl::Display,
    context: egl::Context,
    pub gl: glow::Context,
    pub width: u32,
    pub height: u32,
    pub output_fbo: glow::Framebuffer,
    pub output_tex: glow::Texture,
    pub from_tex: glow::Texture,
    pub to_tex: glow::Texture,
    pub border_tex: glow::Texture,
    pub subtitle_tex: glow::Texture,
}

impl GpuContext {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        let egl_lib = egl::Instance::new(egl::Static);

        let display = unsafe {
            egl_lib.get_platform_display(EGL_PLATFORM_SURFACELESS_MESA, egl::DEFAULT_DISPLAY, &[egl::ATTRIB_NONE])
        }
        .map_err(|e| Error::gpu(format!("failed to open surfaceless EGL display: {e}")))?;

        egl_lib
            .initialize(display)
            .map_err(|e| Error::gpu(format!("failed to initialize EGL display: {e}")))?;

        egl_lib
            .bind_api(egl::OPENGL_API)
            .map_err(|e| Error::gpu(format!("failed to bind OpenGL API: {e}")))?;

        let config_attribs = [
            egl::SURFACE_TYPE,
            egl::PBUFFER_BIT,
            egl::RED_SIZE,
            8,
            egl::GREEN_SIZE,
            8,
            egl::BLUE_SIZE,
            8,
            egl::RENDERABLE_TYPE,
            egl::OPENGL_BIT,
            egl::NONE,
        ];
        let config = egl_lib
            .choose_first_config(display, &config_attribs)
            .map_err(|e| Error::gpu(format!("failed to choose EGL config: {e}")))?
            .ok_or_else(|| Error::gpu("no suitable EGL config found"))?;

        let context_attribs = [
            egl::CONTEXT_MAJOR_VERSION,
            3,
            egl::CONTEXT_MINOR_VERSION,
            3,
            egl::NONE,
        ];
        let context = egl_lib
            .create_context(display, config, None, &context_attribs)
            .map_err(|e| Error::gpu(format!("failed to create GL context: {e}")))?;

        egl_lib
            .make_current(display, None, None, Some(context))
            .map_err(|e| Error::gpu(format!("failed to make GL context current: {e}")))?;

        let gl = unsafe {
            glow::Context::from_loader_function(|name| {
                egl_lib
                    .get_proc_address(name)
                    .map(|p| p as *const c_void)
                    .unwrap_or(std::ptr::null()) as *const _
            })
        };

        let (output_fbo, output_tex) = unsafe { make_color_fbo(&gl, width, height)? };
        let from_tex = unsafe { make_empty_texture(&gl, width, height) };
        let to_tex = unsafe { make_empty_texture(&gl, width, height) };
        let border_tex = unsafe { make_empty_texture(&gl, width, height) };
        let subtitle_tex = unsafe { make_empty_texture(&gl, width, height) };

        Ok(Self {
            egl: egl_lib,
            display,
            context,
            gl,
            width,
            height,
            output_fbo,
            output_tex,
            from_tex,
            to_tex,
            border_tex,
            subtitle_tex,
        })
    }

    /// Read the output framebuffer back as packed RGB24, matching the `Frame` contract
    /// (§3).
    pub fn read_output_rgb(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.width as usize * self.height as usize * 3];
        unsafe {
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, Some(self.output_fbo));
            self.gl.read_pixels(
                0,
                0,
                self.width as i32,
                self.height as i32,
                glow::RGB,
                glow::UNSIGNED_BYTE,
                glow::PixelPackData::Slice(Some(&mut buf)),
            );
        }
        buf
    }

    pub fn upload_rgb(&self, tex: glow::Texture, width: u32, height: u32, rgb: &[u8]) {
        unsafe {
            self.gl.bind_texture(glow::TEXTURE_2D, Some(tex));
            self.gl.tex_image_2d(
                glow::TEXTURE_2D,
                0,
                glow::RGB8 as i32,
                width as i32,
                height as i32,
                0,
                glow::RGB,
                glow::UNSIGNED_BYTE,
                glow::PixelUnpackData::Slice(Some(rgb)),
            );
        }
    }

    pub fn upload_rgba(&self, tex: glow::Texture, width: u32, height: u32, rgba: &[u8]) {
        unsafe {
            self.gl.bind_texture(glow::TEXTURE_2D, Some(tex));
            self.gl.tex_image_2d(
                glow::TEXTURE_2D,
                0,
                glow::RGBA8 as i32,
                width as i32,
                height as i32,
                0,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                glow::PixelUnpackData::Slice(Some(rgba)),
            );
        }
    }
}

unsafe fn make_color_fbo(
    gl: &glow::Context,
    width: u32,
    height: u32,
) -> Result<(glow::Framebuffer, glow::Texture)> {
    unsafe {
        let tex = make_empty_texture(gl, width, height);
        let fbo = gl
            .create_framebuffer()
            .map_err(|e| Error::gpu(format!("failed to create framebuffer: {e}")))?;
        gl.bind_framebuffer(glow::FRAMEBUFFER, Some(fbo));
        gl.framebuffer_texture_2d(glow::FRAMEBUFFER, glow::COLOR_ATTACHMENT0, glow::TEXTURE_2D, Some(tex), 0);
        let status = gl.check_framebuffer_status(glow::FRAMEBUFFER);
        if status != glow::FRAMEBUFFER_COMPLETE {
            return Err(Error::gpu(format!("output framebuffer incomplete: 0x{status:x}")));
        }
        Ok((fbo, tex))
    }
}

unsafe fn make_empty_texture(gl: &glow::Context, width: u32, height: u32) -> glow::Texture {
    unsafe {
        let tex = gl.create_texture().expect("create_texture");
        gl.bind_texture(glow::TEXTURE_2D, Some(tex));
        gl.tex_image_2d(
            glow::TEXTURE_2D,
            0,
            glow::RGBA8 as i32,
            width as i32,
            height as i32,
            0,
            glow::RGBA,
            glow::UNSIGNED_BYTE,
            glow::PixelUnpackData::Slice(None),
        );
        gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MIN_FILTER, glow::LINEAR as i32);
        gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAG_FILTER, glow::LINEAR as i32);
        gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_S, glow::CLAMP_TO_EDGE as i32);
        gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_T, glow::CLAMP_TO_EDGE as i32);
        tex
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            self.gl.delete_framebuffer(self.output_fbo);
            self.gl.delete_texture(self.output_tex);
            self.gl.delete_texture(self.from_tex);
            self.gl.delete_texture(self.to_tex);
            self.gl.delete_texture(self.border_tex);
            self.gl.delete_texture(self.subtitle_tex);
        }
        let _ = self.egl.destroy_context(self.display, self.context);
        let _ = self.egl.terminate(self.display);
    }
}

/// Returns `true` if an offscreen GL context can be created in this environment. Tests
/// that need a live GPU guard on this rather than failing outright, mirroring how the
/// example corpus skips hardware-dependent tests when ffmpeg/ffprobe aren't on `PATH`.
pub fn gpu_available() -> bool {
    GpuContext::new(4, 4).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_complete_output_framebuffer() {
        if !gpu_available() {
            return;
        }
        let ctx = GpuContext::new(16, 16).unwrap();
        assert_eq!(ctx.width, 16);
        assert_eq!(ctx.height, 16);
    }

    #[test]
    fn clears_and_reads_back_expected_color() {
        if !gpu_available() {
            return;
        }
        let ctx = GpuContext::new(4, 4).unwrap();
        unsafe {
            ctx.gl.bind_framebuffer(glow::FRAMEBUFFER, Some(ctx.output_fbo));
            ctx.gl.clear_color(0.2, 0.4, 0.6, 1.0);
            ctx.gl.clear(glow::COLOR_BUFFER_BIT);
        }
        let rgb = ctx.read_output_rgb();
        assert_eq!(rgb.len(), 4 * 4 * 3);
        assert_eq!(rgb[0], (0.2_f32 * 255.0).round() as u8);
        assert_eq!(rgb[1], (0.4_f32 * 255.0).round() as u8);
        assert_eq!(rgb[2], (0.6_f32 * 255.0).round() as u8);
    }
}
