use cgmath::{Matrix4, SquareMatrix};
use scene_ngin::{
    camera::Camera,
    config::RendererConfig,
    gpu::{
        Gpu, GpuFatal, UniformValue,
        recording::{GpuCall, RecordingGpu},
    },
    render::{FrameStats, RenderError, Renderer},
    resources::AssetRoots,
};

use crate::common::test_utils::{Files, material, recording_shaders, split_quad, temp_dir, triangle_at};

mod common;

fn quad_renderer() -> Renderer {
    let mut renderer = Renderer::new(RendererConfig::default(), AssetRoots::default())
        .with_loader(Files::with(&["a.png", "b.png"]));
    assert!(renderer.build_from_import(
        &[split_quad("quad", -10.0)],
        &[material("a", "a.png"), material("b", "b.png")],
        Matrix4::identity(),
    ));
    renderer
}

fn front_and_back_renderer() -> Renderer {
    let mut renderer = Renderer::new(RendererConfig::default(), AssetRoots::default());
    assert!(renderer.build_from_import(
        &[
            triangle_at("front", [0.0, 1.0, -10.0], 1.0),
            triangle_at("behind", [0.0, 1.0, 10.0], 1.0),
        ],
        &[],
        Matrix4::identity(),
    ));
    renderer
}

#[test]
fn shadow_pass_runs_before_the_lit_pass() {
    let mut gpu = RecordingGpu::new(800, 600);
    let camera = Camera::new(800, 600);
    let mut renderer = quad_renderer();
    renderer
        .upload_with_shaders(&mut gpu, &camera, true, &recording_shaders())
        .unwrap();
    let resources = renderer.gpu_scene().unwrap();
    let (depth_framebuffer, shadow_map) = (resources.depth_framebuffer, resources.shadow_map);
    let (shadow_program, main_program) = (resources.shadow_program.id(), resources.main_program.id());
    gpu.clear_calls();

    let stats = renderer.render(&mut gpu, &camera).unwrap();
    assert_eq!(
        stats,
        FrameStats {
            shadow_draws: 2,
            drawn: 2,
            culled: 0
        }
    );

    let clear = gpu
        .calls()
        .iter()
        .position(|c| *c == GpuCall::ClearDepth(Some(depth_framebuffer)))
        .unwrap();
    let first_draw = gpu.calls().iter().position(|c| matches!(c, GpuCall::Draw(_))).unwrap();
    assert!(clear < first_draw);

    let draws = gpu.draws();
    assert_eq!(draws.len(), 4);
    for shadow in &draws[..2] {
        assert_eq!(shadow.program, shadow_program);
        assert_eq!(shadow.framebuffer, Some(depth_framebuffer));
        assert_eq!((shadow.viewport.width, shadow.viewport.height), (2048, 2048));
    }
    for lit in &draws[2..] {
        assert_eq!(lit.program, main_program);
        assert_eq!(lit.framebuffer, None);
        assert_eq!((lit.viewport.width, lit.viewport.height), (800, 600));
        assert_eq!(lit.textures[1], Some(shadow_map));
        assert_eq!(lit.uniforms["shadows"], UniformValue::Int(1));
    }
    assert_eq!(draws[2].range, 0..3);
    assert_eq!(draws[3].range, 3..6);
    assert_ne!(draws[2].textures[0], draws[3].textures[0]);

    // The passes put every binding back.
    assert_eq!(gpu.current_framebuffer(), None);
    assert_eq!(gpu.current_program(), None);
    assert_eq!(gpu.current_vertex_array(), None);
    assert_eq!(gpu.viewport().width, 800);
    // Texture units keep whatever the last lit draw bound.
    assert_eq!(gpu.bound_texture(0), draws[3].textures[0]);
    assert_eq!(gpu.bound_texture(1), Some(shadow_map));
    assert!(gpu.poll_error().is_none());
}

#[test]
fn segments_behind_the_camera_are_culled_from_the_lit_pass_only() {
    let mut gpu = RecordingGpu::new(640, 480);
    let camera = Camera::new(640, 480);
    let mut renderer = front_and_back_renderer();
    renderer
        .upload_with_shaders(&mut gpu, &camera, true, &recording_shaders())
        .unwrap();

    assert_eq!(renderer.visible_segments(&camera), vec![0]);
    let stats = renderer.render(&mut gpu, &camera).unwrap();
    assert_eq!(
        stats,
        FrameStats {
            shadow_draws: 2,
            drawn: 1,
            culled: 1
        }
    );

    let mut turned = camera;
    turned.aim(std::f32::consts::PI, 0.0);
    turned.update();
    assert_eq!(renderer.visible_segments(&turned), vec![1]);
}

#[test]
fn culling_twice_gives_the_same_set() {
    let camera = Camera::at(cgmath::Point3::new(0.3, 1.0, 2.0), 640, 480);
    let renderer = front_and_back_renderer();
    assert_eq!(renderer.visible_segments(&camera), renderer.visible_segments(&camera));
}

#[test]
fn model_transform_moves_segments_out_of_view() {
    let camera = Camera::new(640, 480);
    let mut renderer = Renderer::new(RendererConfig::default(), AssetRoots::default());
    assert!(renderer.build_from_import(
        &[triangle_at("front", [0.0, 1.0, -10.0], 1.0)],
        &[],
        Matrix4::from_translation(cgmath::vec3(0.0, 0.0, 30.0)),
    ));
    assert!(renderer.visible_segments(&camera).is_empty());
}

#[test]
fn toggling_shadows_skips_the_depth_pass() {
    let mut gpu = RecordingGpu::new(64, 64);
    let camera = Camera::new(64, 64);
    let mut renderer = quad_renderer();
    renderer
        .upload_with_shaders(&mut gpu, &camera, true, &recording_shaders())
        .unwrap();

    renderer.disable_shadows();
    gpu.clear_calls();
    let stats = renderer.render(&mut gpu, &camera).unwrap();
    assert_eq!(stats.shadow_draws, 0);
    assert_eq!(stats.drawn, 2);
    assert!(gpu.draws().iter().all(|d| d.framebuffer.is_none()));
    assert!(gpu.draws().iter().all(|d| d.textures[1].is_none()));
    assert!(gpu.draws().iter().all(|d| d.uniforms["shadows"] == UniformValue::Int(0)));

    renderer.enable_shadows();
    gpu.clear_calls();
    let stats = renderer.render(&mut gpu, &camera).unwrap();
    assert_eq!(stats.shadow_draws, 2);
    let lit = gpu.draws().into_iter().filter(|d| d.framebuffer.is_none()).count();
    assert_eq!(lit, 2);
    assert!(gpu.draws().iter().all(|d| d.framebuffer.is_some() || d.uniforms["shadows"] == UniformValue::Int(1)));
}

#[test]
fn shadows_start_as_configured() {
    let mut gpu = RecordingGpu::new(64, 64);
    let camera = Camera::new(64, 64);
    let config = RendererConfig {
        shadows_enabled: false,
        ..Default::default()
    };
    let mut renderer = Renderer::new(config, AssetRoots::default());
    assert!(renderer.build_from_import(&[triangle_at("t", [0.0, 1.0, -5.0], 1.0)], &[], Matrix4::identity()));
    renderer
        .upload_with_shaders(&mut gpu, &camera, true, &recording_shaders())
        .unwrap();
    assert!(!renderer.shadows_enabled());
    assert_eq!(renderer.render(&mut gpu, &camera).unwrap().shadow_draws, 0);
}

#[test]
fn lit_draws_follow_the_camera() {
    let mut gpu = RecordingGpu::new(64, 64);
    let mut camera = Camera::new(64, 64);
    let mut renderer = quad_renderer();
    renderer
        .upload_with_shaders(&mut gpu, &camera, true, &recording_shaders())
        .unwrap();

    camera.move_right(0.5);
    camera.update();
    gpu.clear_calls();
    renderer.render(&mut gpu, &camera).unwrap();
    let lit = gpu.draws().into_iter().find(|d| d.framebuffer.is_none()).unwrap().clone();
    assert_eq!(lit.uniforms["view"], UniformValue::Mat4(camera.view()));
    assert_eq!(lit.uniforms["projection"], UniformValue::Mat4(camera.projection()));
    assert_eq!(
        lit.uniforms["viewPos"],
        UniformValue::Vec3(cgmath::vec3(camera.position.x, camera.position.y, camera.position.z))
    );
    let light = renderer.config().light_position(camera.position);
    assert_eq!(lit.uniforms["lightPos"], UniformValue::Vec3(cgmath::vec3(light.x, light.y, light.z)));
}

#[test]
fn render_needs_an_upload() {
    let mut gpu = RecordingGpu::new(8, 8);
    let mut renderer = quad_renderer();
    assert_eq!(renderer.render(&mut gpu, &Camera::new(8, 8)), Err(RenderError::NotUploaded));
}

#[test]
fn upload_needs_a_build() {
    let mut gpu = RecordingGpu::new(8, 8);
    let mut renderer = Renderer::new(RendererConfig::default(), AssetRoots::default());
    assert_eq!(
        renderer.upload_with_shaders(&mut gpu, &Camera::new(8, 8), false, &recording_shaders()),
        Err(RenderError::NotBuilt)
    );
    assert!(gpu.calls().is_empty());
}

#[test]
fn too_many_errors_fail_the_upload() {
    let mut gpu = RecordingGpu::new(8, 8);
    let camera = Camera::new(8, 8);
    let mut renderer = quad_renderer();
    for i in 0..12 {
        gpu.inject_error(scene_ngin::gpu::GpuError::InvalidValue(format!("injected {i}")));
    }
    assert_eq!(
        renderer.upload_with_shaders(&mut gpu, &camera, true, &recording_shaders()),
        Err(RenderError::Gpu(GpuFatal {
            site: "textures".to_owned(),
            count: 11
        }))
    );
    assert!(!renderer.is_uploaded());
    assert!(renderer.scene().is_some());
}

#[test]
fn broken_shadow_program_draws_nothing_without_failing_the_frame() {
    let mut gpu = RecordingGpu::new(640, 480);
    gpu.fail_link("shadow");
    let camera = Camera::new(640, 480);
    let shapes: Vec<_> = (0..12)
        .map(|i| triangle_at(&format!("tri{i}"), [i as f32 - 5.5, 1.0, -20.0], 0.3))
        .collect();
    let mut renderer = Renderer::new(RendererConfig::default(), AssetRoots::default());
    assert!(renderer.build_from_import(&shapes, &[], Matrix4::identity()));
    renderer
        .upload_with_shaders(&mut gpu, &camera, true, &recording_shaders())
        .unwrap();
    let main_program = renderer.gpu_scene().unwrap().main_program.id();
    while gpu.poll_error().is_some() {}

    for _ in 0..3 {
        let stats = renderer.render(&mut gpu, &camera).unwrap();
        assert_eq!(stats.drawn, 12);
    }
    let draws = gpu.draws();
    assert_eq!(draws.len(), 36);
    assert!(draws.iter().all(|draw| draw.program == main_program));
    assert_eq!(gpu.poll_error(), None);
}

#[test]
fn teardown_releases_everything_once() {
    let mut gpu = RecordingGpu::new(32, 32);
    let camera = Camera::new(32, 32);
    let mut renderer = Renderer::new(RendererConfig::default(), AssetRoots::default())
        .with_loader(Files::with(&["shared.png"]));
    assert!(renderer.build_from_import(
        &[split_quad("left", -5.0), split_quad("right", -6.0)],
        &[material("a", "shared.png"), material("b", "missing.png")],
        Matrix4::identity(),
    ));
    renderer
        .upload_with_shaders(&mut gpu, &camera, true, &recording_shaders())
        .unwrap();
    renderer.render(&mut gpu, &camera).unwrap();
    // shared.png, the blank fallback for missing.png, and the shadow map.
    assert_eq!(gpu.live_textures(), 3);

    renderer.teardown(&mut gpu);
    assert_eq!(gpu.live_textures(), 0);
    assert_eq!(gpu.live_buffers(), 0);
    assert_eq!(gpu.live_vertex_arrays(), 0);
    assert_eq!(gpu.live_framebuffers(), 0);
    assert_eq!(gpu.live_programs(), 0);
    assert_eq!(gpu.live_shaders(), 0);
    assert!(gpu.poll_error().is_none());
}

#[test]
fn teardown_before_upload_touches_nothing() {
    let mut gpu = RecordingGpu::new(8, 8);
    quad_renderer().teardown(&mut gpu);
    assert!(gpu.calls().is_empty());
}

#[test]
fn fresh_import_is_cached_after_upload() {
    let dir = temp_dir("render-cache");
    let cache_path = dir.join("cache").join("quad.obj.bin");
    let camera = Camera::new(32, 32);

    let mut gpu = RecordingGpu::new(32, 32);
    let mut renderer = quad_renderer();
    renderer.set_cache_path(&cache_path);
    renderer
        .upload_with_shaders(&mut gpu, &camera, false, &recording_shaders())
        .unwrap();
    let drawn = renderer.render(&mut gpu, &camera).unwrap().drawn;
    renderer.teardown(&mut gpu);
    assert!(cache_path.is_file());

    // The cached textures are used without touching the loader.
    let mut gpu = RecordingGpu::new(32, 32);
    let mut cached = Renderer::new(RendererConfig::default(), AssetRoots::default()).with_loader(Files::with(&[]));
    assert!(cached.build_from_cache(&cache_path));
    assert!(cached.loaded_from_cache());
    cached
        .upload_with_shaders(&mut gpu, &camera, true, &recording_shaders())
        .unwrap();
    assert_eq!(cached.gpu_scene().unwrap().textures.len(), 2);
    assert_eq!(cached.render(&mut gpu, &camera).unwrap().drawn, drawn);
    cached.teardown(&mut gpu);
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn cache_loaded_scenes_are_not_rewritten() {
    let dir = temp_dir("render-no-rewrite");
    let cache_path = dir.join("quad.obj.bin");
    let mut gpu = RecordingGpu::new(32, 32);
    let mut renderer = quad_renderer();
    renderer.set_cache_path(&cache_path);
    renderer
        .upload_with_shaders(&mut gpu, &Camera::new(32, 32), true, &recording_shaders())
        .unwrap();
    renderer.teardown(&mut gpu);
    assert!(!cache_path.exists());
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn caching_can_be_switched_off() {
    let dir = temp_dir("render-cache-off");
    let cache_path = dir.join("quad.obj.bin");
    let config = RendererConfig {
        create_cache: false,
        ..Default::default()
    };
    let mut gpu = RecordingGpu::new(32, 32);
    let mut renderer = Renderer::new(config, AssetRoots::default()).with_loader(Files::with(&[]));
    assert!(renderer.build_from_import(&[split_quad("quad", -3.0)], &[], Matrix4::identity()));
    renderer.set_cache_path(&cache_path);
    renderer
        .upload_with_shaders(&mut gpu, &Camera::new(32, 32), false, &recording_shaders())
        .unwrap();
    renderer.teardown(&mut gpu);
    assert!(!cache_path.exists());
    std::fs::remove_dir_all(&dir).ok();
}
