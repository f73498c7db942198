//! Turns parsed OBJ shapes into scene segments.
//!
//! [`load_obj`] is the only place that knows about tobj; everything after it
//! works on [`RawShape`]/[`RawMaterial`], which is also what tests feed in.

use std::path::Path;

use anyhow::Context;
use cgmath::Matrix4;

use crate::data_structures::{
    model::{Material, Segment, Vertex},
    name::FixedName,
    scene::Scene,
};

/// One shape as the mesh parser hands it over.
///
/// `indices` address `positions`/`normals` in triples and `texcoords` in
/// pairs. `material_ids` holds one entry per triangle; an empty list means
/// every triangle uses material 0.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawShape {
    pub name: String,
    pub positions: Vec<f32>,
    pub normals: Vec<f32>,
    pub texcoords: Vec<f32>,
    pub indices: Vec<u32>,
    pub material_ids: Vec<usize>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RawMaterial {
    pub name: String,
    pub ambient: [f32; 3],
    pub diffuse: [f32; 3],
    pub specular: [f32; 3],
    pub transmittance: [f32; 3],
    pub emission: [f32; 3],
    pub shininess: f32,
    pub ior: f32,
    pub dissolve: f32,
    pub illum: i32,
    pub ambient_texture: String,
    pub diffuse_texture: String,
    pub specular_texture: String,
    pub normal_texture: String,
}

impl Default for RawMaterial {
    fn default() -> Self {
        Self {
            name: String::new(),
            ambient: [0.0; 3],
            diffuse: [0.0; 3],
            specular: [0.0; 3],
            transmittance: [0.0; 3],
            emission: [0.0; 3],
            shininess: 1.0,
            ior: 1.0,
            dissolve: 1.0,
            illum: 0,
            ambient_texture: String::new(),
            diffuse_texture: String::new(),
            specular_texture: String::new(),
            normal_texture: String::new(),
        }
    }
}

impl From<&RawMaterial> for Material {
    fn from(raw: &RawMaterial) -> Self {
        Material {
            name: FixedName::new(&raw.name),
            ambient: raw.ambient,
            diffuse: raw.diffuse,
            specular: raw.specular,
            transmittance: raw.transmittance,
            emission: raw.emission,
            shininess: raw.shininess,
            ior: raw.ior,
            dissolve: raw.dissolve,
            illum: raw.illum,
            ambient_texture: FixedName::new(&raw.ambient_texture),
            diffuse_texture: FixedName::new(&raw.diffuse_texture),
            specular_texture: FixedName::new(&raw.specular_texture),
            normal_texture: FixedName::new(&raw.normal_texture),
        }
    }
}

/// Splits shapes into per-material segments.
///
/// The index cursor only ever grows, across shapes and across files, so every
/// segment produced by one importer lands at a distinct range of the scene's
/// global buffer.
#[derive(Debug, Default)]
pub struct Importer {
    cursor: u32,
}

impl Importer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Where the next segment will start.
    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    /// Add every material and every shape's segments to `scene`.
    ///
    /// Returns the number of segments added.
    pub fn import(
        &mut self,
        scene: &mut Scene,
        shapes: &[RawShape],
        materials: &[RawMaterial],
        model: Matrix4<f32>,
    ) -> usize {
        for material in materials {
            scene.add_material(Material::from(material));
        }
        let before = scene.segments.len();
        for shape in shapes {
            self.import_shape(scene, shape, materials, model);
        }
        scene.segments.len() - before
    }

    fn import_shape(&mut self, scene: &mut Scene, shape: &RawShape, materials: &[RawMaterial], model: Matrix4<f32>) {
        if shape.indices.is_empty() {
            log::debug!("shape {} has no faces", shape.name);
            return;
        }
        if shape.indices.len() % 3 != 0 {
            log::warn!(
                "shape {} has {} indices, the last partial triangle is kept as is",
                shape.name,
                shape.indices.len()
            );
        }

        let material_of = |triangle: usize| shape.material_ids.get(triangle).copied().unwrap_or(0);
        let mut current = material_of(0);
        let mut run: Vec<Vertex> = Vec::with_capacity(shape.indices.len());
        let mut missing_normals = 0usize;

        for (j, &index) in shape.indices.iter().enumerate() {
            if j % 3 == 0 {
                let previous = current;
                current = material_of(j / 3);
                if current != previous && !run.is_empty() {
                    self.close_run(scene, shape, materials, previous, &mut run, model);
                }
            }

            let (vertex, has_normal) = assemble_vertex(shape, index as usize);
            if !has_normal {
                missing_normals += 1;
            }
            run.push(vertex);
        }
        self.close_run(scene, shape, materials, current, &mut run, model);

        if missing_normals > 0 {
            log::warn!(
                "Unable to put normal in {}: {missing_normals} vertices without one",
                shape.name
            );
        }
    }

    fn close_run(
        &mut self,
        scene: &mut Scene,
        shape: &RawShape,
        materials: &[RawMaterial],
        material_id: usize,
        run: &mut Vec<Vertex>,
        model: Matrix4<f32>,
    ) {
        let material = match materials.get(material_id) {
            Some(material) => FixedName::new(&material.name),
            None => {
                if !materials.is_empty() {
                    log::warn!("shape {} refers to missing material {material_id}", shape.name);
                }
                FixedName::EMPTY
            }
        };
        let vertices = std::mem::take(run);
        let count = vertices.len() as u32;
        scene.add_segment(Segment::new(FixedName::new(&shape.name), material, vertices, self.cursor, model));
        self.cursor += count;
    }
}

/// The vertex at `index`, and whether the source had a normal for it.
///
/// Missing texture coordinates become `(0, 0)`; present ones get V flipped.
fn assemble_vertex(shape: &RawShape, index: usize) -> (Vertex, bool) {
    let triple = |data: &[f32]| -> Option<[f32; 3]> {
        let slice = data.get(index * 3..index * 3 + 3)?;
        Some([slice[0], slice[1], slice[2]])
    };

    let position = triple(&shape.positions).unwrap_or_else(|| {
        log::warn!("shape {} indexes missing position {index}", shape.name);
        [0.0; 3]
    });
    let normal = triple(&shape.normals);
    let tex_coords = match shape.texcoords.get(index * 2..index * 2 + 2) {
        Some(uv) => [uv[0], 1.0 - uv[1]],
        None => [0.0, 0.0],
    };

    let vertex = Vertex {
        position,
        normal: normal.unwrap_or([0.0; 3]),
        tex_coords,
    };
    (vertex, normal.is_some())
}

/// A colour statement tobj does not model itself, such as `Tf` or `Ke`.
fn parse_colour(material: &tobj::Material, key: &str) -> Option<[f32; 3]> {
    let value = material.unknown_param.get(key)?;
    let mut parts = value.split_whitespace().map(str::parse::<f32>);
    let r = parts.next()?.ok()?;
    let g = parts.next().and_then(Result::ok).unwrap_or(r);
    let b = parts.next().and_then(Result::ok).unwrap_or(r);
    Some([r, g, b])
}

impl From<&tobj::Material> for RawMaterial {
    fn from(m: &tobj::Material) -> Self {
        let defaults = RawMaterial::default();
        RawMaterial {
            name: m.name.clone(),
            ambient: m.ambient.unwrap_or(defaults.ambient),
            diffuse: m.diffuse.unwrap_or(defaults.diffuse),
            specular: m.specular.unwrap_or(defaults.specular),
            transmittance: parse_colour(m, "Tf").unwrap_or(defaults.transmittance),
            emission: parse_colour(m, "Ke").unwrap_or(defaults.emission),
            shininess: m.shininess.unwrap_or(defaults.shininess),
            ior: m.optical_density.unwrap_or(defaults.ior),
            dissolve: m.dissolve.unwrap_or(defaults.dissolve),
            illum: m.illumination_model.map_or(defaults.illum, i32::from),
            ambient_texture: m.ambient_texture.clone().unwrap_or_default(),
            diffuse_texture: m.diffuse_texture.clone().unwrap_or_default(),
            specular_texture: m.specular_texture.clone().unwrap_or_default(),
            // map_Ns doubles as the normal map in the scenes this viewer was built for.
            normal_texture: m
                .shininess_texture
                .clone()
                .or_else(|| m.normal_texture.clone())
                .unwrap_or_default(),
        }
    }
}

impl From<&tobj::Model> for RawShape {
    fn from(model: &tobj::Model) -> Self {
        let mesh = &model.mesh;
        let triangles = mesh.indices.len() / 3;
        RawShape {
            name: model.name.clone(),
            positions: mesh.positions.clone(),
            normals: mesh.normals.clone(),
            texcoords: mesh.texcoords.clone(),
            indices: mesh.indices.clone(),
            material_ids: mesh.material_id.map_or_else(Vec::new, |id| vec![id; triangles]),
        }
    }
}

/// Parse an OBJ file and its material libraries.
///
/// Faces are triangulated and positions, normals and texture coordinates share
/// one index. A missing or broken material library is logged and the shapes are
/// still returned.
pub fn load_obj(path: &Path) -> anyhow::Result<(Vec<RawShape>, Vec<RawMaterial>)> {
    let (models, materials) = tobj::load_obj(
        path,
        &tobj::LoadOptions {
            triangulate: true,
            single_index: true,
            ..Default::default()
        },
    )
    .with_context(|| format!("Unable to load {}", path.display()))?;

    let materials = match materials {
        Ok(materials) => materials,
        Err(e) => {
            log::warn!("materials of {} could not be loaded: {e}", path.display());
            Vec::new()
        }
    };

    Ok((
        models.iter().map(RawShape::from).collect(),
        materials.iter().map(RawMaterial::from).collect(),
    ))
}

#[cfg(test)]
mod tests {
    use cgmath::SquareMatrix;

    use super::*;

    fn material(name: &str) -> RawMaterial {
        RawMaterial {
            name: name.to_owned(),
            ..Default::default()
        }
    }

    fn quad(material_ids: Vec<usize>) -> RawShape {
        RawShape {
            name: "quad".to_owned(),
            positions: vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 0.0],
            normals: vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0],
            texcoords: vec![0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0],
            indices: vec![0, 1, 2, 0, 2, 3],
            material_ids,
        }
    }

    #[test]
    fn splits_on_material_change() {
        let mut scene = Scene::new();
        let mut importer = Importer::new();
        let added = importer.import(
            &mut scene,
            &[quad(vec![0, 1])],
            &[material("red"), material("blue")],
            Matrix4::identity(),
        );

        assert_eq!(added, 2);
        let ranges: Vec<(u32, u32)> = scene.segments.iter().map(|s| (s.start, s.end)).collect();
        assert_eq!(ranges, vec![(0, 3), (3, 6)]);
        assert_eq!(scene.segments[0].material.as_str(), "red");
        assert_eq!(scene.segments[1].material.as_str(), "blue");
        assert_eq!(importer.cursor(), 6);
    }

    #[test]
    fn single_material_gives_one_segment() {
        let mut scene = Scene::new();
        let mut importer = Importer::new();
        importer.import(&mut scene, &[quad(vec![0, 0])], &[material("red")], Matrix4::identity());

        assert_eq!(scene.segments.len(), 1);
        assert_eq!(scene.segments[0].vertex_count, 6);
        assert_eq!(scene.segments[0].material.as_str(), "red");
    }

    #[test]
    fn cursor_carries_across_shapes() {
        let mut scene = Scene::new();
        let mut importer = Importer::new();
        let mut second = quad(vec![]);
        second.name = "second".to_owned();
        importer.import(&mut scene, &[quad(vec![0, 0]), second], &[material("m")], Matrix4::identity());

        assert_eq!(scene.segments[1].start, 6);
        assert_eq!(scene.segments[1].end, 12);
        assert_eq!(scene.segments[1].name.as_str(), "second");
    }

    #[test]
    fn flips_v_and_zero_fills_missing_data() {
        let mut shape = quad(vec![]);
        shape.texcoords = vec![0.25, 0.25];
        shape.normals.clear();

        let mut scene = Scene::new();
        Importer::new().import(&mut scene, &[shape], &[], Matrix4::identity());

        let vertices = scene.segments[0].vertices.as_ref().unwrap();
        assert_eq!(vertices[0].tex_coords, [0.25, 0.75]);
        assert_eq!(vertices[1].tex_coords, [0.0, 0.0]);
        assert!(vertices.iter().all(|v| v.normal == [0.0; 3]));
        assert_eq!(vertices[2].position, [1.0, 1.0, 0.0]);
    }

    #[test]
    fn unknown_material_id_leaves_name_empty() {
        let mut scene = Scene::new();
        Importer::new().import(&mut scene, &[quad(vec![3, 3])], &[material("only")], Matrix4::identity());
        assert!(scene.segments[0].material.is_empty());
    }

    #[test]
    fn shapes_without_faces_are_skipped() {
        let mut scene = Scene::new();
        let empty = RawShape {
            name: "empty".to_owned(),
            ..Default::default()
        };
        assert_eq!(Importer::new().import(&mut scene, &[empty], &[], Matrix4::identity()), 0);
        assert!(scene.segments.is_empty());
    }

    #[test]
    fn material_fields_are_copied() {
        let raw = RawMaterial {
            name: "brick".to_owned(),
            diffuse: [0.5, 0.25, 0.125],
            dissolve: 0.5,
            illum: 2,
            diffuse_texture: "brick.png".to_owned(),
            ..Default::default()
        };
        let material = Material::from(&raw);
        assert_eq!(material.name.as_str(), "brick");
        assert_eq!(material.diffuse, [0.5, 0.25, 0.125]);
        assert_eq!(material.dissolve, 0.5);
        assert_eq!(material.illum, 2);
        assert_eq!(material.diffuse_texture.as_str(), "brick.png");
        assert!(material.normal_texture.is_empty());
    }

    #[test]
    fn parses_obj_and_mtl_from_disk() {
        let dir = std::env::temp_dir().join(format!("scene-ngin-obj-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("two.mtl"),
            "newmtl red\nKd 1 0 0\nTf 0.5 0.5 0.5\nmap_Kd red.png\n\nnewmtl blue\nKd 0 0 1\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("two.obj"),
            "mtllib two.mtl\no quad\nv 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nusemtl red\nf 1 2 3\nusemtl blue\nf 1 3 4\n",
        )
        .unwrap();

        let (shapes, materials) = load_obj(&dir.join("two.obj")).unwrap();
        std::fs::remove_dir_all(&dir).ok();

        assert_eq!(materials.len(), 2);
        let red = materials.iter().find(|m| m.name == "red").unwrap();
        assert_eq!(red.diffuse, [1.0, 0.0, 0.0]);
        assert_eq!(red.transmittance, [0.5, 0.5, 0.5]);
        assert_eq!(red.diffuse_texture, "red.png");

        let triangles: usize = shapes.iter().map(|s| s.indices.len() / 3).sum();
        assert_eq!(triangles, 2);
        let mut scene = Scene::new();
        Importer::new().import(&mut scene, &shapes, &materials, Matrix4::identity());
        assert_eq!(scene.segments.len(), 2);
        assert_eq!(scene.segments.last().unwrap().end, 6);
    }
}
