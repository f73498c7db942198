#![allow(dead_code)]

use std::{collections::BTreeMap, path::PathBuf};

use anyhow::Context;
use scene_ngin::{
    data_structures::texture::{PixelMode, Texture},
    resources::{
        mesh::{RawMaterial, RawShape},
        texture::ImageLoader,
    },
    upload::ShaderSources,
};

/// Textures served from memory instead of the textures root.
pub struct Files(pub BTreeMap<String, Texture>);

impl Files {
    pub fn with(names: &[&str]) -> Self {
        Self(
            names
                .iter()
                .map(|name| (name.to_string(), Texture::new(2, 2, PixelMode::Rgba, vec![128; 16])))
                .collect(),
        )
    }
}

impl ImageLoader for Files {
    fn load(&self, file_name: &str) -> anyhow::Result<Texture> {
        self.0.get(file_name).cloned().context("no such file")
    }
}

/// Stage sources for the recording backend, which resolves any uniform
/// whose name appears in an attached stage.
pub fn recording_shaders() -> ShaderSources {
    let names = "lightSpaceMatrix model projection view lightPos viewPos diffuseTexture shadowMap shadows";
    ShaderSources {
        depth_vert: names.into(),
        depth_frag: names.into(),
        vert: names.into(),
        frag: names.into(),
    }
}

pub fn shader_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("assets").join("shaders")
}

/// The shipped WGSL stages.
pub fn shipped_shaders() -> ShaderSources {
    let read = |name: &str| std::fs::read_to_string(shader_dir().join(name)).unwrap();
    ShaderSources {
        depth_vert: read("depth.vert.wgsl"),
        depth_frag: read("depth.frag.wgsl"),
        vert: read("scene.vert.wgsl"),
        frag: read("scene.frag.wgsl"),
    }
}

pub fn material(name: &str, diffuse_texture: &str) -> RawMaterial {
    RawMaterial {
        name: name.into(),
        diffuse: [0.8; 3],
        diffuse_texture: diffuse_texture.into(),
        ..Default::default()
    }
}

/// A unit quad in the XY plane at depth `z`, as two triangles of material 0 and 1.
pub fn split_quad(name: &str, z: f32) -> RawShape {
    RawShape {
        name: name.into(),
        positions: vec![
            -1.0, -1.0, z, //
            1.0, -1.0, z, //
            1.0, 1.0, z, //
            -1.0, 1.0, z,
        ],
        normals: vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0],
        texcoords: vec![0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0],
        indices: vec![0, 1, 2, 0, 2, 3],
        material_ids: vec![0, 1],
    }
}

/// A single-material triangle of size `size` centred on `center`.
pub fn triangle_at(name: &str, center: [f32; 3], size: f32) -> RawShape {
    let [x, y, z] = center;
    RawShape {
        name: name.into(),
        positions: vec![
            x - size, y - size, z, //
            x + size, y - size, z, //
            x, y + size, z,
        ],
        indices: vec![0, 1, 2],
        ..Default::default()
    }
}

/// A fresh scratch directory under the system temp dir.
pub fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("scene-ngin-{name}-{}", std::process::id()));
    std::fs::remove_dir_all(&dir).ok();
    std::fs::create_dir_all(&dir).unwrap();
    dir
}
