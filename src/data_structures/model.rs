//! Scene data model: vertices, materials and segments.
//!
//! [`Vertex`] and [`Material`] are plain-old-data and are written to the
//! binary cache exactly as they sit in memory. A live [`Segment`] owns state
//! that means nothing outside this process (its private vertex run before the
//! scene is built, resolved GPU texture handles), so it goes through
//! [`SegmentRecord`] on its way to and from disk.

use std::mem;

use cgmath::{Matrix4, SquareMatrix};

use crate::data_structures::name::FixedName;
use crate::gpu::TextureId;

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub tex_coords: [f32; 2],
}

impl Vertex {
    /// Three separate attribute streams at fixed byte offsets within one interleaved buffer.
    pub const LAYOUT: VertexLayout = VertexLayout {
        stride: mem::size_of::<Vertex>() as u64,
        attributes: &[
            VertexAttribute {
                location: 0,
                components: 3,
                offset: 0,
            },
            VertexAttribute {
                location: 1,
                components: 3,
                offset: mem::size_of::<[f32; 3]>() as u64,
            },
            VertexAttribute {
                location: 2,
                components: 2,
                offset: mem::size_of::<[f32; 6]>() as u64,
            },
        ],
    };
}

/// A float vertex attribute stream inside an interleaved vertex buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct VertexAttribute {
    pub location: u32,
    pub components: u32,
    pub offset: u64,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct VertexLayout {
    pub stride: u64,
    pub attributes: &'static [VertexAttribute],
}

/// Surface description shared by every segment that names it.
///
/// The record is fixed-size so that the cache can store it verbatim; all
/// strings are [`FixedName`]s and truncate silently.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Material {
    pub name: FixedName,
    pub ambient: [f32; 3],
    pub diffuse: [f32; 3],
    pub specular: [f32; 3],
    pub transmittance: [f32; 3],
    pub emission: [f32; 3],
    pub shininess: f32,
    /// Index of refraction.
    pub ior: f32,
    /// 1 is opaque, 0 is fully transparent.
    pub dissolve: f32,
    pub illum: i32,
    pub ambient_texture: FixedName,
    pub diffuse_texture: FixedName,
    pub specular_texture: FixedName,
    pub normal_texture: FixedName,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: FixedName::EMPTY,
            ambient: [0.0; 3],
            diffuse: [0.0; 3],
            specular: [0.0; 3],
            transmittance: [0.0; 3],
            emission: [0.0; 3],
            shininess: 1.0,
            ior: 1.0,
            dissolve: 1.0,
            illum: 0,
            ambient_texture: FixedName::EMPTY,
            diffuse_texture: FixedName::EMPTY,
            specular_texture: FixedName::EMPTY,
            normal_texture: FixedName::EMPTY,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum PrimitiveTopology {
    #[default]
    TriangleList,
    TriangleStrip,
    LineList,
    LineStrip,
    PointList,
}

impl PrimitiveTopology {
    pub fn tag(self) -> u32 {
        match self {
            PrimitiveTopology::TriangleList => 0,
            PrimitiveTopology::TriangleStrip => 1,
            PrimitiveTopology::LineList => 2,
            PrimitiveTopology::LineStrip => 3,
            PrimitiveTopology::PointList => 4,
        }
    }

    pub fn from_tag(tag: u32) -> Option<Self> {
        Some(match tag {
            0 => PrimitiveTopology::TriangleList,
            1 => PrimitiveTopology::TriangleStrip,
            2 => PrimitiveTopology::LineList,
            3 => PrimitiveTopology::LineStrip,
            4 => PrimitiveTopology::PointList,
            _ => return None,
        })
    }
}

/// Culling volume in the segment's local space.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct BoundingSphere {
    pub center: [f32; 3],
    pub radius: f32,
}

/// GPU textures resolved for a segment. `None` means unbound.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TextureSlots {
    pub ambient: Option<TextureId>,
    pub diffuse: Option<TextureId>,
    pub specular: Option<TextureId>,
    pub normal: Option<TextureId>,
}

impl TextureSlots {
    fn to_raw(self) -> [u32; 4] {
        [self.ambient, self.diffuse, self.specular, self.normal].map(|slot| slot.map_or(0, |id| id.0))
    }
}

/// A maximal run of triangles that share one material; the unit of drawing and culling.
#[derive(Clone, Debug, PartialEq)]
pub struct Segment {
    pub name: FixedName,
    pub material: FixedName,
    /// Private copy of this segment's vertices. Only present until the scene is built.
    pub vertices: Option<Vec<Vertex>>,
    pub vertex_count: usize,
    pub model: Matrix4<f32>,
    pub start: u32,
    pub end: u32,
    pub topology: PrimitiveTopology,
    pub textures: TextureSlots,
    pub bounds: BoundingSphere,
}

impl Segment {
    /// A fresh triangle-list segment covering `[start, start + vertices.len())`.
    pub fn new(
        name: FixedName,
        material: FixedName,
        vertices: Vec<Vertex>,
        start: u32,
        model: Matrix4<f32>,
    ) -> Self {
        let vertex_count = vertices.len();
        Self {
            name,
            material,
            start,
            end: start + vertex_count as u32,
            vertices: Some(vertices),
            vertex_count,
            model,
            topology: PrimitiveTopology::TriangleList,
            textures: TextureSlots::default(),
            bounds: BoundingSphere::default(),
        }
    }

    pub fn index_count(&self) -> u32 {
        self.end - self.start
    }

    pub fn to_record(&self) -> SegmentRecord {
        let [lx, ly, lz] = self.bounds.center;
        SegmentRecord {
            name: self.name,
            material: self.material,
            vertex_data: 0,
            vertex_count: self.vertex_count as u64,
            model: self.model.into(),
            start: self.start,
            end: self.end,
            topology: self.topology.tag(),
            textures: self.textures.to_raw(),
            bounds: [lx, ly, lz, self.bounds.radius],
            _padding: 0,
        }
    }

    /// Rebuild a segment from disk. Texture handles always come back unbound:
    /// they belong to the process that wrote the record. Returns `None` for an
    /// unknown topology tag.
    pub fn from_record(record: &SegmentRecord) -> Option<Self> {
        let [lx, ly, lz, radius] = record.bounds;
        Some(Self {
            name: record.name,
            material: record.material,
            vertices: None,
            vertex_count: record.vertex_count as usize,
            model: Matrix4::from(record.model),
            start: record.start,
            end: record.end,
            topology: PrimitiveTopology::from_tag(record.topology)?,
            textures: TextureSlots::default(),
            bounds: BoundingSphere {
                center: [lx, ly, lz],
                radius,
            },
        })
    }
}

impl Default for Segment {
    fn default() -> Self {
        Self::new(
            FixedName::EMPTY,
            FixedName::EMPTY,
            Vec::new(),
            0,
            Matrix4::identity(),
        )
    }
}

/// On-disk form of a [`Segment`].
///
/// `vertex_data` stands in for the in-memory vertex pointer and is always
/// written as zero.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SegmentRecord {
    pub name: FixedName,
    pub material: FixedName,
    pub vertex_data: u64,
    pub vertex_count: u64,
    pub model: [[f32; 4]; 4],
    pub start: u32,
    pub end: u32,
    pub topology: u32,
    pub textures: [u32; 4],
    /// `lx, ly, lz, radius`
    pub bounds: [f32; 4],
    pub _padding: u32,
}
