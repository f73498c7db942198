use std::path::PathBuf;

use cgmath::{Matrix4, SquareMatrix, vec3};
use scene_ngin::{
    data_structures::{
        model::PrimitiveTopology,
        scene::Scene,
        texture::{PixelMode, Texture},
    },
    loader::{SceneRequest, import_scene, load_scene},
    resources::{cache, mesh::load_obj},
};

use crate::common::test_utils::{material, split_quad, temp_dir, triangle_at};

mod common;

fn courtyard() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("assets/models/courtyard.obj")
}

fn assert_partitioned(scene: &Scene, index_count: usize) {
    let mut cursor = 0;
    for segment in &scene.segments {
        assert_eq!(segment.start, cursor, "segment {} does not continue the last one", segment.name);
        assert!(segment.end > segment.start);
        assert_eq!((segment.end - segment.start) as usize, segment.vertex_count);
        cursor = segment.end;
    }
    assert_eq!(cursor as usize, index_count);
    assert_eq!(scene.vertices.len(), index_count);
    assert_eq!(scene.indices, (0..index_count as u32).collect::<Vec<_>>());
}

fn assert_bounded(scene: &Scene) {
    for segment in &scene.segments {
        let [cx, cy, cz] = segment.bounds.center;
        assert!(segment.bounds.radius > 0.0);
        for vertex in scene.segment_vertices(segment) {
            let [x, y, z] = vertex.position;
            let distance = ((x - cx).powi(2) + (y - cy).powi(2) + (z - cz).powi(2)).sqrt();
            assert!(
                distance <= segment.bounds.radius + 1e-3,
                "{distance} outside radius {} of {}",
                segment.bounds.radius,
                segment.name
            );
        }
    }
}

#[test]
fn quad_split_at_the_first_triangle() {
    let scene = import_scene(
        &[split_quad("quad", 0.0)],
        &[material("left", ""), material("right", "")],
        Matrix4::identity(),
        false,
    )
    .unwrap();

    assert_eq!(scene.segments.len(), 2);
    let ranges: Vec<_> = scene.segments.iter().map(|s| (s.start, s.end)).collect();
    assert_eq!(ranges, [(0, 3), (3, 6)]);
    assert_eq!(scene.segments[0].vertex_count, 3);
    assert_eq!(scene.segments[1].vertex_count, 3);
    assert_eq!(scene.segments[0].material.as_str(), "left");
    assert_eq!(scene.segments[1].material.as_str(), "right");
    assert!(scene.segments.iter().all(|s| s.vertices.is_none()));
}

#[test]
fn segments_partition_the_index_range() {
    let shapes = [
        split_quad("a", 0.0),
        triangle_at("b", [4.0, 0.0, 0.0], 2.0),
        split_quad("c", -3.0),
    ];
    let scene = import_scene(&shapes, &[material("m0", ""), material("m1", "")], Matrix4::identity(), false).unwrap();
    let index_count: usize = shapes.iter().map(|s| s.indices.len()).sum();
    assert_eq!(scene.segments.len(), 5);
    assert_partitioned(&scene, index_count);
    assert_bounded(&scene);
}

#[test]
fn sample_model_imports() {
    let (shapes, materials) = load_obj(&courtyard()).unwrap();
    assert_eq!(materials.len(), 2);
    assert_eq!(materials[0].diffuse_texture, "checker.png");

    let scene = import_scene(&shapes, &materials, Matrix4::identity(), true).unwrap();
    let index_count: usize = shapes.iter().map(|s| s.indices.len()).sum();
    // A quad floor and a six-sided block, triangulated.
    assert_eq!(index_count, 6 + 36);
    assert_partitioned(&scene, index_count);
    assert_bounded(&scene);
    assert!(scene.segments.iter().all(|s| scene.material_for(s).is_some()));
}

#[test]
fn model_transform_is_kept_per_segment() {
    let model = Matrix4::from_translation(vec3(100.0, 0.0, 100.0));
    let scene = import_scene(&[split_quad("quad", 0.0)], &[], model, false).unwrap();
    assert!(scene.segments.iter().all(|s| s.model == model));
    // Bounds stay in model space.
    assert!(scene.segments[0].bounds.center[0].abs() < 1.0);
}

#[test]
fn cache_round_trip_preserves_the_scene() {
    let dir = temp_dir("import-cache");
    let path = dir.join("quad.obj.bin");
    let mut scene = import_scene(
        &[split_quad("quad", 1.0), triangle_at("tri", [2.0, 2.0, 2.0], 0.5)],
        &[material("left", "l.png"), material("right", "r.png")],
        Matrix4::identity(),
        false,
    )
    .unwrap();
    scene.segments[1].topology = PrimitiveTopology::TriangleStrip;
    scene.textures.insert(
        "l.png".to_owned(),
        Texture::new(2, 1, PixelMode::Rgb, vec![255, 0, 0, 0, 255, 0]),
    );
    scene.textures.insert(
        "r.png".to_owned(),
        Texture::new(1, 2, PixelMode::Rgba, vec![1, 2, 3, 4, 5, 6, 7, 8]),
    );

    cache::save(&path, &scene).unwrap();
    let restored = cache::load(&path).unwrap();
    std::fs::remove_dir_all(&dir).ok();

    assert_eq!(restored.textures, scene.textures);
    assert_eq!(restored.textures["l.png"].bpp, 3);
    assert_eq!(restored.textures["r.png"].mode, PixelMode::Rgba);
    assert_eq!(restored.vertices, scene.vertices);
    assert_eq!(restored.indices, scene.indices);
    assert_eq!(restored.materials, scene.materials);
    assert_eq!(restored.segments.len(), scene.segments.len());
    for (a, b) in restored.segments.iter().zip(&scene.segments) {
        assert_eq!((a.start, a.end, a.vertex_count), (b.start, b.end, b.vertex_count));
        assert_eq!(a.name, b.name);
        assert_eq!(a.material, b.material);
        assert_eq!(a.bounds, b.bounds);
        assert_eq!(a.model, b.model);
        assert_eq!(a.topology, b.topology);
    }
}

#[test]
fn broken_cache_falls_back_to_the_model() {
    let dir = temp_dir("import-broken-cache");
    let cache_path = dir.join("courtyard.obj.bin");
    std::fs::write(&cache_path, b"not a cache").unwrap();

    let loaded = load_scene(&SceneRequest {
        model_path: courtyard(),
        cache_path: Some(cache_path),
        model_transform: Matrix4::identity(),
        verbose: false,
    })
    .unwrap();
    std::fs::remove_dir_all(&dir).ok();

    assert!(!loaded.from_cache);
    assert!(!loaded.scene.segments.is_empty());
}

#[test]
fn missing_model_is_an_error() {
    let result = load_scene(&SceneRequest {
        model_path: PathBuf::from("/nonexistent/model.obj"),
        cache_path: None,
        model_transform: Matrix4::identity(),
        verbose: false,
    });
    assert!(result.is_err());
}
