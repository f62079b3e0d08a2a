// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tessera_math::Mesh;
use tessera_platform::WindowDesc;
use tessera_render::RenderSettings;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// TOML config file; a missing file means built-in defaults
    #[arg(long, default_value = "tessera.toml")]
    pub config: PathBuf,

    /// Geometry to draw: quad | sphere
    #[arg(long, value_enum)]
    pub mesh: Option<MeshKind>,

    /// Enable the Khronos validation layer (true | false)
    #[arg(long)]
    pub validation: Option<bool>,

    #[arg(long)]
    pub width: Option<u32>,

    #[arg(long)]
    pub height: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub window: WindowCfg,
    pub render: RenderCfg,
    pub mesh: MeshCfg,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowCfg {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
}

impl Default for WindowCfg {
    fn default() -> Self {
        let d = WindowDesc::default();
        Self {
            title: d.title,
            width: d.width,
            height: d.height,
            resizable: d.resizable,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RenderCfg {
    pub clear_color: [f32; 4],
    pub validation: bool,
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
}

impl Default for RenderCfg {
    fn default() -> Self {
        let d = RenderSettings::default();
        Self {
            clear_color: d.clear_color,
            validation: d.validation,
            vertex_shader: d.vertex_shader,
            fragment_shader: d.fragment_shader,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum MeshKind {
    #[default]
    Quad,
    Sphere,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MeshCfg {
    pub kind: MeshKind,
    pub radius: f32,
    pub slices: u16,
    pub stacks: u16,
}

impl Default for MeshCfg {
    fn default() -> Self {
        Self {
            kind: MeshKind::Quad,
            radius: 0.8,
            slices: 24,
            stacks: 16,
        }
    }
}

impl MeshCfg {
    pub fn build(&self) -> Result<Mesh> {
        Ok(match self.kind {
            MeshKind::Quad => tessera_math::quad(),
            MeshKind::Sphere => tessera_math::sphere(self.radius, self.slices, self.stacks)
                .context("invalid [mesh] sphere parameters")?,
        })
    }
}

impl AppConfig {
    /// Reads `path`. Only a missing file falls back to defaults; unreadable
    /// or malformed files are errors.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::parse(&text).with_context(|| format!("malformed config {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("no config at {}; using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e).with_context(|| format!("failed to read config {}", path.display())),
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Flags given on the command line win over file values.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(kind) = cli.mesh {
            self.mesh.kind = kind;
        }
        if let Some(v) = cli.validation {
            self.render.validation = v;
        }
        if let Some(w) = cli.width {
            self.window.width = w;
        }
        if let Some(h) = cli.height {
            self.window.height = h;
        }
    }

    pub fn window_desc(&self) -> WindowDesc {
        WindowDesc {
            title: self.window.title.clone(),
            width: self.window.width,
            height: self.window.height,
            resizable: self.window.resizable,
        }
    }

    pub fn render_settings(&self) -> RenderSettings {
        RenderSettings {
            clear_color: self.render.clear_color,
            validation: self.render.validation,
            vertex_shader: self.render.vertex_shader.clone(),
            fragment_shader: self.render.fragment_shader.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let cfg = AppConfig::parse("").unwrap();
        assert_eq!(cfg.window.title, "Engine");
        assert_eq!((cfg.window.width, cfg.window.height), (800, 600));
        assert!(cfg.window.resizable);
        assert_eq!(cfg.render.clear_color, [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(cfg.render.vertex_shader, PathBuf::from("shaders/vert.spv"));
        assert_eq!(cfg.mesh.kind, MeshKind::Quad);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg = AppConfig::parse(
            r#"
            [window]
            width = 1280

            [mesh]
            kind = "sphere"
            slices = 8
            "#,
        )
        .unwrap();
        assert_eq!((cfg.window.width, cfg.window.height), (1280, 600));
        assert_eq!(cfg.mesh.kind, MeshKind::Sphere);
        assert_eq!((cfg.mesh.slices, cfg.mesh.stacks), (8, 16));
        assert_eq!(cfg.mesh.radius, 0.8);
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(AppConfig::parse("[window\nwidth = 3").is_err());
        assert!(AppConfig::parse("[mesh]\nkind = \"cube\"").is_err());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = AppConfig::load(Path::new("no/such/dir/tessera.toml")).unwrap();
        assert_eq!(cfg.window.width, 800);
    }

    #[test]
    fn cli_overrides_file_values() {
        let mut cfg = AppConfig::parse("[render]\nvalidation = true\n[window]\nheight = 900").unwrap();
        let cli = Cli::try_parse_from([
            "tessera",
            "--mesh",
            "sphere",
            "--validation",
            "false",
            "--width",
            "640",
        ])
        .unwrap();
        cfg.apply_cli(&cli);
        assert_eq!(cfg.mesh.kind, MeshKind::Sphere);
        assert!(!cfg.render.validation);
        assert_eq!((cfg.window.width, cfg.window.height), (640, 900));
    }

    #[test]
    fn absent_flags_leave_config_alone() {
        let mut cfg = AppConfig::parse("[render]\nvalidation = true").unwrap();
        let cli = Cli::try_parse_from(["tessera"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("tessera.toml"));
        cfg.apply_cli(&cli);
        assert!(cfg.render.validation);
        assert_eq!(cfg.mesh.kind, MeshKind::Quad);
    }

    #[test]
    fn mesh_config_builds_geometry() {
        let quad = MeshCfg::default().build().unwrap();
        assert_eq!(quad.index_count(), 6);

        let sphere = MeshCfg {
            kind: MeshKind::Sphere,
            ..MeshCfg::default()
        };
        assert!(sphere.build().unwrap().index_count() > 6);

        let bad = MeshCfg {
            kind: MeshKind::Sphere,
            slices: 1,
            ..MeshCfg::default()
        };
        assert!(bad.build().is_err());
    }
}
