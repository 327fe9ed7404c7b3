use std::path::{Path, PathBuf};

use crate::error::{path_must_exist, Error, Result};

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct BorderSpec {
    pub path: String,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct BgmSpec {
    pub path: String,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct FontSpec {
    pub path: String,
    pub size: u32,
    pub color: [u8; 4],
    pub outline_color: [u8; 4],
    pub outline_width: u32,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct SubtitleSpec {
    pub template: String,
    pub typewriter_speed: u32,
    pub duration: f64,
}

/// On-disk shape of a template YAML file (§6).
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct TemplateFile {
    pub name: String,
    pub description: String,
    pub border: BorderSpec,
    #[serde(default)]
    pub border_video: Option<BorderSpec>,
    pub bgm: BgmSpec,
    pub transitions: Vec<String>,
    pub font: FontSpec,
    pub subtitle: SubtitleSpec,
}

/// A fully resolved template: every path has been checked to exist and is absolute relative
/// to the template directory.
#[derive(Clone, Debug)]
pub struct Template {
    pub name: String,
    pub description: String,
    pub border_image_path: PathBuf,
    pub border_video_path: PathBuf,
    pub bgm_path: PathBuf,
    pub transition_paths: Vec<PathBuf>,
    pub font_path: PathBuf,
    pub font_size: u32,
    pub text_color: [u8; 4],
    pub outline_color: [u8; 4],
    pub outline_width: u32,
    pub subtitle_template: String,
    pub typewriter_speed: u32,
    pub subtitle_duration: f64,
}

#[derive(Clone, Debug)]
pub struct TemplateSummary {
    pub name: String,
    pub description: String,
}

/// Resolves named templates from YAML files under `root`, one file per template named
/// `<name>.yaml` or `<name>.yml`.
pub struct TemplateLoader {
    root: PathBuf,
}

impl TemplateLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn load(&self, name: &str) -> Result<Template> {
        let path = self.file_path(name)?;
        let text = std::fs::read_to_string(&path).map_err(|e| {
            Error::config(format!("failed to read template '{name}': {e}"))
        })?;
        let file: TemplateFile = serde_yaml::from_str(&text)
            .map_err(|e| Error::config(format!("failed to parse template '{name}': {e}")))?;
        self.resolve(file)
    }

    pub fn list(&self) -> Result<Vec<TemplateSummary>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        let entries = std::fs::read_dir(&self.root).map_err(|e| {
            Error::config(format!("failed to scan template directory: {e}"))
        })?;
        for entry in entries {
            let entry = entry.map_err(|e| Error::config(format!("failed to scan template directory: {e}")))?;
            let path = entry.path();
            let is_yaml = matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("yaml") | Some("yml")
            );
            if !is_yaml {
                continue;
            }
            match std::fs::read_to_string(&path)
                .ok()
                .and_then(|t| serde_yaml::from_str::<TemplateFile>(&t).ok())
            {
                Some(file) => out.push(TemplateSummary {
                    name: file.name,
                    description: file.description,
                }),
                None => {
                    tracing::warn!(path = %path.display(), "skipping malformed template file");
                }
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    fn file_path(&self, name: &str) -> Result<PathBuf> {
        for ext in ["yaml", "yml"] {
            let candidate = self.root.join(format!("{name}.{ext}"));
            if candidate.exists() {
                return Ok(candidate);
            }
        }
        Err(Error::config(format!("unknown template '{name}'")))
    }

    fn resolve(&self, file: TemplateFile) -> Result<Template> {
        if file.transitions.is_empty() {
            return Err(Error::config(format!(
                "template '{}' has an empty transitions list",
                file.name
            )));
        }

        let border_image_path = self.asset_path(&file.border.path, "border image")?;
        let border_video_path = match &file.border_video {
            Some(b) => self.asset_path(&b.path, "border video image")?,
            None => border_image_path.clone(),
        };
        let bgm_path = self.asset_path(&file.bgm.path, "background music")?;
        let font_path = self.asset_path(&file.font.path, "font")?;
        let transition_paths = file
            .transitions
            .iter()
            .map(|p| self.asset_path(p, "transition effect"))
            .collect::<Result<Vec<_>>>()?;

        check_border_dimensions(&border_image_path, &border_video_path)?;

        Ok(Template {
            name: file.name,
            description: file.description,
            border_image_path,
            border_video_path,
            bgm_path,
            transition_paths,
            font_path,
            font_size: file.font.size,
            text_color: file.font.color,
            outline_color: file.font.outline_color,
            outline_width: file.font.outline_width,
            subtitle_template: file.subtitle.template,
            typewriter_speed: file.subtitle.typewriter_speed,
            subtitle_duration: file.subtitle.duration,
        })
    }

    fn asset_path(&self, rel: &str, what: &str) -> Result<PathBuf> {
        path_must_exist(&self.root.join(rel), what)
    }
}

fn check_border_dimensions(image_border: &Path, video_border: &Path) -> Result<()> {
    if image_border == video_border {
        return Ok(());
    }
    let a = image::image_dimensions(image_border)
        .map_err(|e| Error::config(format!("failed to read border image dimensions: {e}")))?;
    let b = image::image_dimensions(video_border)
        .map_err(|e| Error::config(format!("failed to read border video dimensions: {e}")))?;
    if a != b {
        return Err(Error::config(format!(
            "border images must match dimensions: {a:?} vs {b:?}"
        )));
    }
    Ok(())
}

/// Expand `{year}`/`{month}`/`{day}` placeholders in a subtitle template against a date.
pub fn render_subtitle_text(template: &str, year: i32, month: u32, day: u32) -> String {
    template
        .replace("{year}", &year.to_string())
        .replace("{month}", &format!("{month:02}"))
        .replace("{day}", &format!("{day:02}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_png(path: &Path, w: u32, h: u32) {
        let img = image::RgbaImage::new(w, h);
        img.save(path).unwrap();
    }

    fn write_template(dir: &Path, name: &str, transitions: &[&str]) {
        for t in transitions {
            std::fs::write(dir.join(t), "vec4 transition(vec2 uv){return vec4(0.0);}").unwrap();
        }
        write_png(&dir.join("border.png"), 1920, 1080);
        std::fs::write(dir.join("bgm.mp3"), b"fake").unwrap();
        std::fs::write(dir.join("font.ttf"), b"fake").unwrap();

        let yaml = format!(
            "name: {name}\ndescription: a template\nborder: {{ path: border.png }}\nbgm: {{ path: bgm.mp3 }}\ntransitions: [{}]\nfont: {{ path: font.ttf, size: 48, color: [255,255,255,255], outline_color: [0,0,0,255], outline_width: 3 }}\nsubtitle: {{ template: \"{{year}}-{{month}}-{{day}}\", typewriter_speed: 3, duration: 5.0 }}\n",
            transitions
                .iter()
                .map(|t| format!("\"{t}\""))
                .collect::<Vec<_>>()
                .join(", ")
        );
        std::fs::write(dir.join(format!("{name}.yaml")), yaml).unwrap();
    }

    #[test]
    fn loads_and_resolves_asset_paths() {
        let dir = tempfile::tempdir().unwrap();
        write_template(dir.path(), "classic", &["fade.glsl", "wipe.glsl"]);

        let loader = TemplateLoader::new(dir.path());
        let tpl = loader.load("classic").unwrap();
        assert_eq!(tpl.transition_paths.len(), 2);
        assert_eq!(tpl.border_video_path, tpl.border_image_path);
    }

    #[test]
    fn empty_transitions_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        write_template(dir.path(), "broken", &[]);
        let loader = TemplateLoader::new(dir.path());
        let err = loader.load("broken").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn unknown_template_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let loader = TemplateLoader::new(dir.path());
        assert!(loader.load("nope").is_err());
    }

    #[test]
    fn missing_asset_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("classic.yaml"),
            "name: classic\ndescription: x\nborder: { path: missing.png }\nbgm: { path: bgm.mp3 }\ntransitions: [\"fade.glsl\"]\nfont: { path: font.ttf, size: 48, color: [255,255,255,255], outline_color: [0,0,0,255], outline_width: 3 }\nsubtitle: { template: \"x\", typewriter_speed: 3, duration: 5.0 }\n",
        )
        .unwrap();
        let loader = TemplateLoader::new(dir.path());
        let err = loader.load("classic").unwrap_err();
        assert!(err.to_string().contains("missing border image"));
    }

    #[test]
    fn list_skips_malformed_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        write_template(dir.path(), "zeta", &["fade.glsl"]);
        write_template(dir.path(), "alpha", &["fade.glsl"]);
        std::fs::write(dir.path().join("broken.yaml"), "not: [valid").unwrap();

        let loader = TemplateLoader::new(dir.path());
        let list = loader.list().unwrap();
        let names: Vec<_> = list.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn subtitle_placeholders_expand() {
        let text = render_subtitle_text("{year}年{month}月{day}日", 2026, 7, 31);
        assert_eq!(text, "2026年07月31日");
    }
}
