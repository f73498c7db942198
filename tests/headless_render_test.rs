/// Draws the sample model on a real adapter into an offscreen target.
#[test]
#[cfg(feature = "integration-tests")]
fn renders_the_sample_model_offscreen() {
    use cgmath::{Matrix4, Point3, SquareMatrix};
    use scene_ngin::{
        camera::Camera,
        config::RendererConfig,
        gpu::{Gpu, wgpu_backend::WgpuGpu},
        loader::{SceneRequest, load_scene},
        render::Renderer,
        resources::AssetRoots,
    };

    const SIZE: u32 = 256;
    const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;

    let _ = env_logger::try_init();
    let root = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let roots = AssetRoots::under(&root);

    let (device, queue) = futures::executor::block_on(async {
        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions::default())
            .await
            .expect("no adapter");
        adapter
            .request_device(&wgpu::DeviceDescriptor::default())
            .await
            .expect("no device")
    });
    let target = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("offscreen"),
        size: wgpu::Extent3d {
            width: SIZE,
            height: SIZE,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    let view = target.create_view(&wgpu::TextureViewDescriptor::default());
    let mut gpu = WgpuGpu::new(device, queue, FORMAT, SIZE, SIZE);

    let loaded = load_scene(&SceneRequest {
        model_path: roots.model("courtyard.obj"),
        cache_path: None,
        model_transform: Matrix4::identity(),
        verbose: true,
    })
    .unwrap();
    let camera = Camera::at(Point3::new(0.0, 3.0, 15.0), SIZE, SIZE);
    let mut renderer = Renderer::new(RendererConfig::default(), roots);
    renderer.install(loaded.scene, false);
    renderer.upload_to_gpu(&mut gpu, &camera, true).unwrap();

    for _ in 0..2 {
        gpu.begin_frame();
        let stats = renderer.render(&mut gpu, &camera).unwrap();
        assert_eq!(stats.drawn, 2);
        gpu.end_frame(&view);
    }
    assert!(gpu.poll_error().is_none());
    renderer.teardown(&mut gpu);
    assert!(gpu.poll_error().is_none());
}
