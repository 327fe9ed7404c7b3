use std::collections::HashMap;
use std::path::Path;

use glow::HasContext;
use regex::Regex;

use crate::error::{Error, Result};

/// Vertex shader shared by every program: a fullscreen triangle, no vertex buffer needed.
const FULLSCREEN_VS: &str = r#"#version 330 core
out vec2 v_uv;
void main() {
    vec2 pos = vec2((gl_VertexID << 1) & 2, gl_VertexID & 2);
    v_uv = pos;
    gl_Position = vec4(pos * 2.0 - 1.0, 0.0, 1.0);
}
"#;

const BLIT_FS: &str = r#"#version 330 core
in vec2 v_uv;
out vec4 frag;
uniform sampler2D u_tex;
void main() {
    frag = texture(u_tex, vec2(v_uv.x, 1.0 - v_uv.y));
}
"#;

/// Alpha-composites `u_tex` (straight alpha) over whatever is already in the framebuffer.
const OVERLAY_FS: &str = r#"#version 330 core
in vec2 v_uv;
out vec4 frag;
uniform sampler2D u_tex;
void main() {
    frag = texture(u_tex, vec2(v_uv.x, 1.0 - v_uv.y));
}
"#;

/// Scaffold every transition effect is spliced into. Declares the two inputs and the two
/// sampling helpers the gl-transitions.com convention expects (§4.2); effect source supplies
/// only the `transition(vec2 uv)` function body.
const TRANSITION_SCAFFOLD_HEADER: &str = r#"#version 330 core
in vec2 v_uv;
out vec4 frag;
uniform sampler2D u_from;
uniform sampler2D u_to;
uniform float progress;
uniform float ratio;
"#;

const TRANSITION_SCAFFOLD_HELPERS: &str = r#"
vec4 getFromColor(vec2 uv) { return texture(u_from, vec2(uv.x, 1.0 - uv.y)); }
vec4 getToColor(vec2 uv) { return texture(u_to, vec2(uv.x, 1.0 - uv.y)); }
"#;

const TRANSITION_SCAFFOLD_FOOTER: &str = r#"
void main() {
    frag = transition(v_uv);
}
"#;

/// Splice an effect's `transition()` source into the fixed scaffold, suppressing the helper
/// definitions the scaffold already provides if the effect source redefines them (§9 Shader
/// helper deduplication).
pub fn build_transition_source(effect_glsl: &str) -> String {
    let helper_re = Regex::new(r"(?m)^\s*vec4\s+(getFromColor|getToColor)\s*\(").unwrap();
    let helpers = if helper_re.is_match(effect_glsl) {
        ""
    } else {
        TRANSITION_SCAFFOLD_HELPERS
    };
    format!("{TRANSITION_SCAFFOLD_HEADER}{helpers}{effect_glsl}{TRANSITION_SCAFFOLD_FOOTER}")
}

/// Compiled GL programs the compositor draws with: a plain blit, an alpha-composite overlay,
/// and one transition program per effect, keyed by the effect's source path (§4.4).
pub struct ShaderRegistry {
    pub blit: glow::Program,
    pub overlay: glow::Program,
    transitions: HashMap<String, glow::Program>,
}

impl ShaderRegistry {
    pub fn new(gl: &glow::Context) -> Result<Self> {
        let blit = link_program(gl, FULLSCREEN_VS, BLIT_FS)?;
        let overlay = link_program(gl, FULLSCREEN_VS, OVERLAY_FS)?;
        Ok(Self { blit, overlay, transitions: HashMap::new() })
    }

    /// Compile (and cache) the transition program for one effect file, keyed by its path.
    pub fn transition_program(&mut self, gl: &glow::Context, effect_path: &Path) -> Result<glow::Program> {
        let key = effect_path.display().to_string();
        if let Some(p) = self.transitions.get(&key) {
            return Ok(*p);
        }
        let src = std::fs::read_to_string(effect_path)
            .map_err(|e| Error::gpu(format!("failed to read transition shader '{key}': {e}")))?;
        let fs_source = build_transition_source(&src);
        let program = link_program(gl, FULLSCREEN_VS, &fs_source)?;
        self.transitions.insert(key, program);
        Ok(program)
    }

    pub fn delete_all(&mut self, gl: &glow::Context) {
        unsafe {
            gl.delete_program(self.blit);
            gl.delete_program(self.overlay);
            for (_, p) in self.transitions.drain() {
                gl.delete_program(p);
            }
        }
    }
}

fn link_program(gl: &glow::Context, vs_source: &str, fs_source: &str) -> Result<glow::Program> {
    unsafe {
        let vs = compile_shader(gl, glow::VERTEX_SHADER, vs_source)?;
        let fs = compile_shader(gl, glow::FRAGMENT_SHADER, fs_source)?;
        let program = gl
            .create_program()
            .map_err(|e| Error::gpu(format!("failed to create program: {e}")))?;
        gl.attach_shader(program, vs);
        gl.attach_shader(program, fs);
        gl.link_program(program);
        let ok = gl.get_program_link_status(program);
        gl.detach_shader(program, vs);
        gl.detach_shader(program, fs);
        gl.delete_shader(vs);
        gl.delete_shader(fs);
        if !ok {
            let log = gl.get_program_info_log(program);
            gl.delete_program(program);
            return Err(Error::gpu(format!("shader link failed: {log}")));
        }
        Ok(program)
    }
}

unsafe fn compile_shader(gl: &glow::Context, kind: u32, source: &str) -> Result<glow::Shader> {
    unsafe {
        let shader = gl
            .create_shader(kind)
            .map_err(|e| Error::gpu(format!("failed to create shader: {e}")))?;
        gl.shader_source(shader, source);
        gl.compile_shader(shader);
        if !gl.get_shader_compile_status(shader) {
            let log = gl.get_shader_info_log(shader);
            gl.delete_shader(shader);
            return Err(Error::gpu(format!("shader compile failed: {log}\n--- source ---\n{source}")));
        }
        Ok(shader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::context::{gpu_available, GpuContext};

    #[test]
    fn splices_effect_without_helpers() {
        let src = build_transition_source("vec4 transition(vec2 uv) { return mix(getFromColor(uv), getToColor(uv), progress); }");
        assert!(src.contains("getFromColor"));
        assert_eq!(src.matches("vec4 getFromColor").count(), 1);
    }

    #[test]
    fn suppresses_helper_redefinition() {
        let effect = "vec4 getFromColor(vec2 uv) { return texture(u_from, uv); }\nvec4 transition(vec2 uv) { return getFromColor(uv); }";
        let src = build_transition_source(effect);
        assert_eq!(src.matches("vec4 getFromColor").count(), 1);
    }

    #[test]
    fn compiles_blit_and_overlay_programs() {
        if !gpu_available() {
            return;
        }
        let ctx = GpuContext::new(8, 8).unwrap();
        let registry = ShaderRegistry::new(&ctx.gl).unwrap();
        assert_ne!(registry.blit, registry.overlay);
    }

    #[test]
    fn compiles_a_real_transition_effect() {
        if !gpu_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fade.glsl");
        std::fs::write(&path, "vec4 transition(vec2 uv) { return mix(getFromColor(uv), getToColor(uv), progress); }").unwrap();

        let ctx = GpuContext::new(8, 8).unwrap();
        let mut registry = ShaderRegistry::new(&ctx.gl).unwrap();
        let p1 = registry.transition_program(&ctx.gl, &path).unwrap();
        let p2 = registry.transition_program(&ctx.gl, &path).unwrap();
        assert_eq!(p1, p2, "transition programs are cached by path");
    }
}
