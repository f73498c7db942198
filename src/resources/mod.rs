use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

/**
 * This module contains all logic for loading meshes, textures, shaders and cached scenes from external files.
 */
pub mod cache;
pub mod mesh;
pub mod texture;

/// Directories the viewer reads from and writes to.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AssetRoots {
    pub models: PathBuf,
    pub textures: PathBuf,
    pub shaders: PathBuf,
    pub cache: PathBuf,
}

impl Default for AssetRoots {
    fn default() -> Self {
        Self::under("./")
    }
}

impl AssetRoots {
    /// The standard layout below `base`: `assets/{models,textures,shaders}` and `cache`.
    pub fn under(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        let assets = base.join("assets");
        Self {
            models: assets.join("models"),
            textures: assets.join("textures"),
            shaders: assets.join("shaders"),
            cache: base.join("cache"),
        }
    }

    pub fn model(&self, file_name: &str) -> PathBuf {
        self.models.join(file_name)
    }

    pub fn shader(&self, file_name: &str) -> PathBuf {
        self.shaders.join(file_name)
    }

    /// The cache file for mesh `file_name`: `<cache>/<file_name>.bin`.
    pub fn cache_file(&self, file_name: &str) -> PathBuf {
        self.cache.join(format!("{file_name}.bin"))
    }
}

pub fn load_string(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Unable to load {}", path.display()))
}
