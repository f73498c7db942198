//! The binary scene cache.
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! header    num_materials: u64, num_segments: u64, num_vertices: u64, num_textures: u64
//! materials [Material; num_materials]       in name order
//! segments  [SegmentRecord; num_segments]   in draw order
//! vertices  [Vertex; num_vertices]          the flattened global buffer
//! textures  num_textures times:
//!           name: [u8; 64], bpp: u32, mode: i32, width: u32, height: u32,
//!           pixels: [u8; width * height * bpp]
//! ```
//!
//! Records are written as their in-memory `repr(C)` bytes.

use std::{
    collections::BTreeMap,
    fs::File,
    io::{self, BufReader, BufWriter, Read, Write},
    path::Path,
};

use bytemuck::Zeroable;
use thiserror::Error;

use crate::data_structures::{
    model::{Material, Segment, SegmentRecord, Vertex},
    name::{FixedName, NAME_CAPACITY},
    scene::Scene,
    texture::{PixelMode, Texture},
};

/// Vertices are read in blocks of this many so a corrupt count cannot force a huge allocation up front.
const VERTEX_CHUNK: usize = 4096;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache file {path} cannot be opened: {source}")]
    Missing { path: String, source: io::Error },
    #[error("cache ends early while reading {0}")]
    Truncated(&'static str),
    #[error("Unable to load image size of 0: {0}")]
    ZeroSizedTexture(String),
    #[error("inconsistent cache: {0}")]
    Inconsistent(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Header {
    pub num_materials: u64,
    pub num_segments: u64,
    pub num_vertices: u64,
    pub num_textures: u64,
}

impl Header {
    pub const SIZE: usize = 32;

    pub fn of(scene: &Scene) -> Self {
        Self {
            num_materials: scene.materials.len() as u64,
            num_segments: scene.segments.len() as u64,
            num_vertices: scene.vertices.len() as u64,
            num_textures: scene.textures.len() as u64,
        }
    }

    fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut bytes = [0; Self::SIZE];
        let fields = [self.num_materials, self.num_segments, self.num_vertices, self.num_textures];
        for (chunk, value) in bytes.chunks_exact_mut(8).zip(fields) {
            chunk.copy_from_slice(&value.to_le_bytes());
        }
        bytes
    }

    fn from_bytes(bytes: [u8; Self::SIZE]) -> Self {
        let mut fields = bytes
            .chunks_exact(8)
            .map(|chunk| u64::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3], chunk[4], chunk[5], chunk[6], chunk[7]]));
        let mut next = || fields.next().unwrap_or_default();
        Self {
            num_materials: next(),
            num_segments: next(),
            num_vertices: next(),
            num_textures: next(),
        }
    }
}

fn read_exact_or<R: Read>(reader: &mut R, buf: &mut [u8], what: &'static str) -> Result<(), CacheError> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => CacheError::Truncated(what),
        _ => CacheError::Io(e),
    })
}

fn read_pod<R: Read, T: bytemuck::Pod>(reader: &mut R, what: &'static str) -> Result<T, CacheError> {
    let mut value = T::zeroed();
    read_exact_or(reader, bytemuck::bytes_of_mut(&mut value), what)?;
    Ok(value)
}

fn clean(name: FixedName) -> FixedName {
    FixedName::from_bytes(*name.as_bytes())
}

/// Serialise a built scene.
pub fn write_scene<W: Write>(scene: &Scene, writer: &mut W) -> Result<(), CacheError> {
    if let Some(segment) = scene.segments.iter().find(|s| s.vertices.is_some()) {
        return Err(CacheError::Inconsistent(format!(
            "segment {} has not been built",
            segment.name
        )));
    }

    writer.write_all(&Header::of(scene).to_bytes())?;
    for material in scene.materials.values() {
        writer.write_all(bytemuck::bytes_of(material))?;
    }
    for segment in &scene.segments {
        writer.write_all(bytemuck::bytes_of(&segment.to_record()))?;
    }
    writer.write_all(bytemuck::cast_slice(&scene.vertices))?;

    for (name, texture) in &scene.textures {
        if texture.pixels.len() != texture.byte_len() {
            return Err(CacheError::Inconsistent(format!(
                "texture {name} holds {} bytes, expected {}",
                texture.pixels.len(),
                texture.byte_len()
            )));
        }
        writer.write_all(FixedName::new(name).as_bytes())?;
        writer.write_all(&texture.bpp.to_le_bytes())?;
        writer.write_all(&(texture.mode as i32).to_le_bytes())?;
        writer.write_all(&texture.width.to_le_bytes())?;
        writer.write_all(&texture.height.to_le_bytes())?;
        writer.write_all(&texture.pixels)?;
    }
    writer.flush()?;
    Ok(())
}

/// Deserialise a scene. Segments come back with unbound texture handles and
/// the identity index buffer is regenerated.
pub fn read_scene<R: Read>(reader: &mut R) -> Result<Scene, CacheError> {
    let mut header_bytes = [0u8; Header::SIZE];
    read_exact_or(reader, &mut header_bytes, "header")?;
    let header = Header::from_bytes(header_bytes);

    let mut materials = BTreeMap::new();
    for _ in 0..header.num_materials {
        let mut material: Material = read_pod(reader, "materials")?;
        material.name = clean(material.name);
        material.ambient_texture = clean(material.ambient_texture);
        material.diffuse_texture = clean(material.diffuse_texture);
        material.specular_texture = clean(material.specular_texture);
        material.normal_texture = clean(material.normal_texture);
        materials.insert(material.name.as_str().to_owned(), material);
    }

    let mut segments = Vec::new();
    for index in 0..header.num_segments {
        let record: SegmentRecord = read_pod(reader, "segments")?;
        let Some(mut segment) = Segment::from_record(&record) else {
            return Err(CacheError::Inconsistent(format!(
                "segment {index} has unknown topology {}",
                record.topology
            )));
        };
        segment.name = clean(segment.name);
        segment.material = clean(segment.material);
        if segment.start > segment.end || segment.end as u64 > header.num_vertices {
            return Err(CacheError::Inconsistent(format!(
                "segment {index} ({}) covers [{}, {}) of {} vertices",
                segment.name, segment.start, segment.end, header.num_vertices
            )));
        }
        segments.push(segment);
    }

    let mut vertices: Vec<Vertex> = Vec::new();
    let mut remaining = header.num_vertices as usize;
    while remaining > 0 {
        let take = remaining.min(VERTEX_CHUNK);
        let mut chunk = vec![Vertex::zeroed(); take];
        read_exact_or(reader, bytemuck::cast_slice_mut(&mut chunk), "vertices")?;
        vertices.extend_from_slice(&chunk);
        remaining -= take;
    }

    let mut textures = BTreeMap::new();
    for _ in 0..header.num_textures {
        let mut name = [0u8; NAME_CAPACITY];
        read_exact_or(reader, &mut name, "texture name")?;
        let name = FixedName::from_bytes(name).as_str().to_owned();
        let mut fields = [0u8; 16];
        read_exact_or(reader, &mut fields, "texture header")?;
        let word = |i: usize| [fields[i], fields[i + 1], fields[i + 2], fields[i + 3]];
        let bpp = u32::from_le_bytes(word(0));
        let mode = i32::from_le_bytes(word(4));
        let width = u32::from_le_bytes(word(8));
        let height = u32::from_le_bytes(word(12));

        let size = width as u64 * height as u64 * bpp as u64;
        if size == 0 {
            return Err(CacheError::ZeroSizedTexture(name));
        }
        let Some(mode) = PixelMode::from_raw(mode) else {
            return Err(CacheError::Inconsistent(format!("texture {name} has unknown mode {mode}")));
        };
        if mode.bytes_per_pixel() != bpp {
            return Err(CacheError::Inconsistent(format!(
                "texture {name} is {mode:?} with {bpp} bytes per pixel"
            )));
        }

        let mut pixels = Vec::new();
        let read = reader.by_ref().take(size).read_to_end(&mut pixels)?;
        if (read as u64) < size {
            return Err(CacheError::Truncated("texture pixels"));
        }
        textures.insert(
            name,
            Texture {
                width,
                height,
                bpp,
                mode,
                pixels,
            },
        );
    }

    Ok(Scene::from_flattened(materials, segments, vertices, textures))
}

pub fn save(path: &Path, scene: &Scene) -> Result<(), CacheError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);
    write_scene(scene, &mut writer)
}

pub fn load(path: &Path) -> Result<Scene, CacheError> {
    let file = File::open(path).map_err(|source| CacheError::Missing {
        path: path.display().to_string(),
        source,
    })?;
    read_scene(&mut BufReader::new(file))
}
