//! Image decoding for segment textures and the shared blank fallback.

use std::{
    path::PathBuf,
    sync::OnceLock,
};

use anyhow::Context;

use crate::data_structures::texture::Texture;

/// Reserved filename of the fallback texture. It always resolves: when the
/// file is missing a built-in white pixel stands in.
pub const DEFAULT_BLANK_TEXTURE: &str = "DEFAULT_BLANK_TEXTURE.png";

/// Decodes image files into pixel buffers.
pub trait ImageLoader {
    fn load(&self, file_name: &str) -> anyhow::Result<Texture>;
}

/// Reads images from a directory with the `image` crate.
#[derive(Clone, Debug)]
pub struct FileImageLoader {
    root: PathBuf,
}

impl FileImageLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ImageLoader for FileImageLoader {
    fn load(&self, file_name: &str) -> anyhow::Result<Texture> {
        let path = self.root.join(file_name);
        let bytes = std::fs::read(&path).with_context(|| format!("Unable to load texture {}", path.display()))?;
        decode(&bytes).with_context(|| format!("Unable to decode texture {}", path.display()))
    }
}

pub fn decode(bytes: &[u8]) -> anyhow::Result<Texture> {
    let img = image::load_from_memory(bytes)?;
    Ok(Texture::from_image(&img))
}

/// The blank texture, from disk if it is there.
pub fn load_blank<L: ImageLoader + ?Sized>(loader: &L) -> Texture {
    match loader.load(DEFAULT_BLANK_TEXTURE) {
        Ok(texture) => texture,
        Err(e) => {
            log::warn!("Error loading default blank texture {DEFAULT_BLANK_TEXTURE}: {e:#}");
            Texture::blank()
        }
    }
}

static DEFAULT_BLANK: OnceLock<Texture> = OnceLock::new();

/// The blank texture, decoded at most once per process.
pub fn default_blank<L: ImageLoader + ?Sized>(loader: &L) -> Texture {
    DEFAULT_BLANK.get_or_init(|| load_blank(loader)).clone()
}
