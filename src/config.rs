//! Renderer and application settings.
//!
//! Every setting has a built-in default. Two optional TOML files in the
//! config directory override them field by field:
//!
//! ```toml
//! # renderer.toml
//! shadows_enabled = true
//! shadow_width = 2048
//! shader_vert = "scene.vert.wgsl"
//!
//! [shadow_ortho]
//! far = 200.0
//! ```
//!
//! Fields a file leaves out keep their default and unknown keys are ignored.

use std::{io, path::Path};

use cgmath::{Matrix4, Point3, vec3};
use serde::{Deserialize, de::DeserializeOwned};
use thiserror::Error;

use crate::resources::AssetRoots;

pub const APP_CONFIG_FILE: &str = "app.toml";
pub const RENDERER_CONFIG_FILE: &str = "renderer.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unable to read {path}: {source}")]
    Io { path: String, source: io::Error },
    #[error("Unable to parse {path}: {source}")]
    Parse { path: String, source: toml::de::Error },
}

/// Deserialize `path`, or the defaults when the file does not exist.
pub fn read_toml<T: DeserializeOwned + Default>(path: &Path) -> Result<T, ConfigError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            log::warn!("Unable to load {}, using defaults", path.display());
            return Ok(T::default());
        }
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.display().to_string(),
                source,
            });
        }
    };
    let value = toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })?;
    log::info!("loaded {}", path.display());
    Ok(value)
}

/// The light's orthographic shadow frustum.
#[derive(Copy, Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct OrthoBounds {
    pub left: f32,
    pub right: f32,
    pub bottom: f32,
    pub top: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for OrthoBounds {
    fn default() -> Self {
        Self {
            left: -100.0,
            right: 100.0,
            bottom: -100.0,
            top: 100.0,
            near: 0.6,
            far: 120.0,
        }
    }
}

impl OrthoBounds {
    pub fn matrix(&self) -> Matrix4<f32> {
        cgmath::ortho(self.left, self.right, self.bottom, self.top, self.near, self.far)
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub shadows_enabled: bool,
    pub shadow_width: u32,
    pub shadow_height: u32,
    pub shadow_ortho: OrthoBounds,
    /// The light sits at the camera position plus this offset and looks at the origin.
    pub light_offset: [f32; 3],
    pub shader_depth_vert: String,
    pub shader_depth_frag: String,
    pub shader_vert: String,
    pub shader_frag: String,
    /// Write the binary cache after a fresh import.
    pub create_cache: bool,
    pub verbose: bool,
    pub clear_colour: [f64; 4],
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            shadows_enabled: true,
            shadow_width: 2048,
            shadow_height: 2048,
            shadow_ortho: OrthoBounds::default(),
            light_offset: [10.0, 50.0, 0.0],
            shader_depth_vert: "depth.vert.wgsl".to_owned(),
            shader_depth_frag: "depth.frag.wgsl".to_owned(),
            shader_vert: "scene.vert.wgsl".to_owned(),
            shader_frag: "scene.frag.wgsl".to_owned(),
            create_cache: true,
            verbose: false,
            clear_colour: [1.0, 0.8, 0.8, 1.0],
        }
    }
}

impl RendererConfig {
    /// The light position for a camera at `eye`.
    pub fn light_position(&self, eye: Point3<f32>) -> Point3<f32> {
        eye + vec3(self.light_offset[0], self.light_offset[1], self.light_offset[2])
    }
}

/// Settings of the host application.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub use_cache: bool,
    pub roots: AssetRoots,
    /// World units per second.
    pub camera_speed: f32,
    /// Radians per pixel of mouse motion.
    pub mouse_speed: f32,
    pub camera_position: [f32; 3],
    /// The camera never sinks below this height.
    pub ground_level: Option<f32>,
    /// Quit as soon as the scene has been uploaded. Useful to only build the cache.
    pub close_on_load: bool,
    pub window_title: String,
    pub window_width: u32,
    pub window_height: u32,
    /// Translation applied to every imported segment.
    pub model_offset: [f32; 3],
    /// Read from its own file.
    #[serde(skip)]
    pub renderer: RendererConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            use_cache: true,
            roots: AssetRoots::default(),
            camera_speed: 20.0,
            mouse_speed: 0.002,
            camera_position: [0.0, 1.0, 0.0],
            ground_level: None,
            close_on_load: false,
            window_title: "scene-ngin".to_owned(),
            window_width: 1280,
            window_height: 720,
            model_offset: [100.0, 0.0, 100.0],
            renderer: RendererConfig::default(),
        }
    }
}

impl AppConfig {
    /// Read `app.toml` and `renderer.toml` from `dir`. Missing files leave the defaults in place.
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        let mut config: Self = read_toml(&dir.join(APP_CONFIG_FILE))?;
        config.renderer = read_toml(&dir.join(RENDERER_CONFIG_FILE))?;
        log::debug!("{config:#?}");
        Ok(config)
    }

    pub fn camera_position(&self) -> Point3<f32> {
        Point3::from(self.camera_position)
    }

    /// The transform handed to the importer.
    pub fn model_transform(&self) -> Matrix4<f32> {
        Matrix4::from_translation(self.model_offset.into())
    }
}
