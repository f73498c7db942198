//! The scene aggregate and the builder that flattens it.
//!
//! A [`Scene`] starts out as an ordered list of segments that each own a
//! private vertex run (from the importer). [`Scene::build`] folds those runs
//! into one global vertex buffer and an identity index buffer, computes each
//! segment's bounding sphere and frees the private runs. Scenes restored from
//! the binary cache arrive already flattened and go through
//! [`Scene::from_flattened`] instead.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::data_structures::{
    model::{BoundingSphere, Material, Segment, Vertex},
    texture::Texture,
};

/// Radius given to segments whose vertices all coincide.
pub const MIN_SPHERE_RADIUS: f32 = 0.1;

#[derive(Debug, Error, PartialEq)]
pub enum SceneError {
    #[error("building empty scene")]
    Empty,
    #[error("segment {index} ({name}) has no vertex data to build from")]
    MissingVertices { index: usize, name: String },
    #[error("segment {index} ({name}) claims [{start}, {end}) but its vertices start at {position}")]
    RangeMismatch {
        index: usize,
        name: String,
        start: u32,
        end: u32,
        position: usize,
    },
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Scene {
    pub materials: BTreeMap<String, Material>,
    pub segments: Vec<Segment>,
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub textures: BTreeMap<String, Texture>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a material under its own name, replacing any previous one.
    pub fn add_material(&mut self, material: Material) {
        self.materials.insert(material.name.as_str().to_owned(), material);
    }

    pub fn add_segment(&mut self, segment: Segment) {
        self.segments.push(segment);
    }

    /// Whether every segment's private vertex run has been folded into the global buffer.
    pub fn is_built(&self) -> bool {
        !self.segments.is_empty() && self.segments.iter().all(|s| s.vertices.is_none())
    }

    pub fn material_for(&self, segment: &Segment) -> Option<&Material> {
        self.materials.get(segment.material.as_str())
    }

    /// Flatten every segment into the global vertex and index buffers and compute bounds.
    ///
    /// The range each segment was created with has to match where its vertices land
    /// in the global buffer; a mismatch aborts the build before any segment loses
    /// its private vertex run.
    pub fn build(&mut self) -> Result<(), SceneError> {
        if self.segments.is_empty() {
            return Err(SceneError::Empty);
        }

        let mut position = self.vertices.len();
        for (index, segment) in self.segments.iter().enumerate() {
            let Some(vertices) = segment.vertices.as_ref() else {
                return Err(SceneError::MissingVertices {
                    index,
                    name: segment.name.to_string(),
                });
            };
            if segment.start as usize != position || segment.end as usize != position + vertices.len() {
                return Err(SceneError::RangeMismatch {
                    index,
                    name: segment.name.to_string(),
                    start: segment.start,
                    end: segment.end,
                    position,
                });
            }
            position += vertices.len();
        }

        self.vertices.reserve(position - self.vertices.len());
        self.indices.reserve(position - self.indices.len());
        for segment in self.segments.iter_mut() {
            if let Some(vertices) = segment.vertices.take() {
                segment.bounds = bounding_sphere(&vertices);
                segment.vertex_count = vertices.len();
                for vertex in vertices {
                    self.indices.push(self.vertices.len() as u32);
                    self.vertices.push(vertex);
                }
            }
        }
        Ok(())
    }

    /// Assemble a scene whose vertices are already flattened, regenerating the identity index buffer.
    pub fn from_flattened(
        materials: BTreeMap<String, Material>,
        segments: Vec<Segment>,
        vertices: Vec<Vertex>,
        textures: BTreeMap<String, Texture>,
    ) -> Self {
        let indices = (0..vertices.len() as u32).collect();
        Self {
            materials,
            segments,
            vertices,
            indices,
            textures,
        }
    }

    /// Vertices of one segment, addressed through its range into the global buffer.
    pub fn segment_vertices(&self, segment: &Segment) -> &[Vertex] {
        let start = (segment.start as usize).min(self.vertices.len());
        let end = (segment.end as usize).clamp(start, self.vertices.len());
        &self.vertices[start..end]
    }
}

/// Mean vertex position and the largest distance from it.
///
/// Sums are accumulated in `f64` so large segments far from the origin keep
/// their precision; the result is stored as `f32`.
pub fn bounding_sphere(vertices: &[Vertex]) -> BoundingSphere {
    if vertices.is_empty() {
        return BoundingSphere {
            center: [0.0; 3],
            radius: MIN_SPHERE_RADIUS,
        };
    }

    let mut sum = [0f64; 3];
    for v in vertices {
        for axis in 0..3 {
            sum[axis] += v.position[axis] as f64;
        }
    }
    let count = vertices.len() as f64;
    let center = sum.map(|s| s / count);

    let radius = vertices
        .iter()
        .map(|v| {
            let dx = v.position[0] as f64 - center[0];
            let dy = v.position[1] as f64 - center[1];
            let dz = v.position[2] as f64 - center[2];
            (dx * dx + dy * dy + dz * dz).sqrt()
        })
        .fold(0f64, f64::max) as f32;

    BoundingSphere {
        center: center.map(|c| c as f32),
        radius: if radius == 0.0 { MIN_SPHERE_RADIUS } else { radius },
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use cgmath::{Matrix4, SquareMatrix};

    use super::*;
    use crate::data_structures::name::FixedName;

    fn vertex(x: f32, y: f32, z: f32) -> Vertex {
        Vertex {
            position: [x, y, z],
            ..Default::default()
        }
    }

    fn segment(start: u32, vertices: Vec<Vertex>) -> Segment {
        Segment::new(
            FixedName::new("shape"),
            FixedName::new("mat"),
            vertices,
            start,
            Matrix4::identity(),
        )
    }

    #[test]
    fn empty_scene_does_not_build() {
        let mut scene = Scene::new();
        assert_eq!(scene.build(), Err(SceneError::Empty));
        assert!(scene.vertices.is_empty());
    }

    #[test]
    fn build_flattens_in_order_and_frees_runs() {
        let mut scene = Scene::new();
        scene.add_segment(segment(0, vec![vertex(0.0, 0.0, 0.0); 3]));
        scene.add_segment(segment(3, vec![vertex(1.0, 0.0, 0.0); 6]));

        scene.build().unwrap();

        assert_eq!(scene.vertices.len(), 9);
        assert_eq!(scene.indices, (0..9).collect::<Vec<u32>>());
        assert!(scene.is_built());
        assert_eq!(scene.segments[1].vertex_count, 6);
        assert_eq!(scene.segment_vertices(&scene.segments[1])[0].position, [1.0, 0.0, 0.0]);
    }

    #[test]
    fn mismatched_range_is_reported() {
        let mut scene = Scene::new();
        scene.add_segment(segment(0, vec![vertex(0.0, 0.0, 0.0); 3]));
        scene.add_segment(segment(4, vec![vertex(0.0, 0.0, 0.0); 3]));

        assert!(matches!(
            scene.build(),
            Err(SceneError::RangeMismatch { index: 1, position: 3, .. })
        ));
        // nothing was consumed
        assert!(scene.segments.iter().all(|s| s.vertices.is_some()));
        assert!(scene.vertices.is_empty());
    }

    #[test]
    fn sphere_covers_every_vertex() {
        let vertices = vec![
            vertex(-1.0, 0.0, 0.0),
            vertex(3.0, 0.0, 0.0),
            vertex(1.0, 2.0, 0.0),
        ];
        let sphere = bounding_sphere(&vertices);
        assert_relative_eq!(sphere.center[0], 1.0);
        assert_relative_eq!(sphere.center[1], 2.0 / 3.0, epsilon = 1e-6);
        for v in &vertices {
            let d = ((v.position[0] - sphere.center[0]).powi(2)
                + (v.position[1] - sphere.center[1]).powi(2)
                + (v.position[2] - sphere.center[2]).powi(2))
            .sqrt();
            assert!(d <= sphere.radius + 1e-5);
        }
    }

    #[test]
    fn degenerate_segment_gets_minimum_radius() {
        let sphere = bounding_sphere(&[vertex(5.0, 5.0, 5.0); 3]);
        assert_eq!(sphere.center, [5.0, 5.0, 5.0]);
        assert_eq!(sphere.radius, MIN_SPHERE_RADIUS);
    }
}
