//! The render loop.
//!
//! A [`Renderer`] goes through three stages: nothing built, a scene built on
//! the CPU, and that scene uploaded to the GPU. Once uploaded every frame is
//! a [`ShadowPass`] followed by a [`LitPass`]. The shadow pass can only be
//! turned into a lit pass, so the order cannot be swapped by accident.
//!
//! ```ignore
//! renderer.build_from_import(&shapes, &materials, transform);
//! renderer.upload_to_gpu(&mut gpu, &camera, false)?;
//! loop {
//!     renderer.render(&mut gpu, &camera)?;
//! }
//! ```

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    sync::Arc,
};

use cgmath::{EuclideanSpace, InnerSpace, Matrix4, Point3, Transform};
use thiserror::Error;

use crate::{
    camera::Camera,
    config::RendererConfig,
    data_structures::{
        model::Segment,
        scene::{Scene, SceneError},
    },
    frustum::{Classification, Frustum},
    gpu::{Gpu, GpuFatal, TextureId, Viewport, check_errors, with_framebuffer, with_program, with_vertex_array, with_viewport},
    loader::{CacheWriter, cached_scene, import_scene},
    resources::{
        AssetRoots,
        mesh::{RawMaterial, RawShape},
        texture::{FileImageLoader, ImageLoader},
    },
    upload::{GpuScene, ShaderSources, light_space_matrix, upload},
};

#[derive(Debug, Error, PartialEq)]
pub enum RenderError {
    #[error("rendering an empty scene")]
    EmptyScene,
    #[error("no scene has been built yet")]
    NotBuilt,
    #[error("the scene has not been uploaded to the GPU")]
    NotUploaded,
    #[error(transparent)]
    Gpu(#[from] GpuFatal),
}

/// What one frame did.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub shadow_draws: usize,
    pub drawn: usize,
    pub culled: usize,
}

enum Stage {
    Unbuilt,
    /// A build ran and produced no segments.
    Empty,
    Built(Scene),
    Uploaded { scene: Arc<Scene>, resources: GpuScene },
}

/// Culling test of a segment's bounding sphere, moved into world space by its model matrix.
pub fn classify_segment(frustum: &Frustum, segment: &Segment) -> Classification {
    let [x, y, z] = segment.bounds.center;
    let center = segment.model.transform_point(Point3::new(x, y, z));
    frustum.classify_sphere(
        center.x,
        center.y,
        center.z,
        segment.bounds.radius * max_scale(&segment.model),
    )
}

fn max_scale(model: &Matrix4<f32>) -> f32 {
    [model.x, model.y, model.z]
        .iter()
        .map(|column| column.truncate().magnitude())
        .fold(0.0, f32::max)
}

/// Renders depth from the light into the shadow map.
pub struct ShadowPass<'r> {
    scene: &'r Scene,
    resources: &'r mut GpuScene,
}

impl<'r> ShadowPass<'r> {
    fn new(scene: &'r Scene, resources: &'r mut GpuScene) -> Self {
        Self { scene, resources }
    }

    /// Draw every segment into the depth framebuffer. Nothing is culled: the
    /// light sees other segments than the camera does.
    pub fn run<G: Gpu + ?Sized>(self, gpu: &mut G) -> LitPass<'r> {
        let resources = self.resources;
        let (width, height) = resources.shadow_size;
        let mut draws = 0;
        {
            let mut viewport = with_viewport(gpu, Viewport::new(width, height));
            let mut target = with_framebuffer(&mut *viewport, resources.depth_framebuffer);
            target.clear_depth();
            let mut active = with_program(&mut *target, resources.shadow_program.id());
            let mut bound = with_vertex_array(&mut *active, resources.vertex_array);

            for segment in &self.scene.segments {
                resources.shadow_program.uniforms.set("model", segment.model);
                resources.shadow_program.load(&mut *bound);
                bound.draw_range(segment.topology, segment.start..segment.end);
                draws += 1;
            }
        }
        LitPass {
            scene: self.scene,
            shadow_map: Some(resources.shadow_map),
            resources,
            shadow_draws: draws,
        }
    }

    /// Go straight to the lit pass without a shadow map.
    pub fn skip(self) -> LitPass<'r> {
        LitPass {
            scene: self.scene,
            resources: self.resources,
            shadow_map: None,
            shadow_draws: 0,
        }
    }
}

/// Draws the visible segments to the screen.
pub struct LitPass<'r> {
    scene: &'r Scene,
    resources: &'r mut GpuScene,
    shadow_map: Option<TextureId>,
    shadow_draws: usize,
}

impl LitPass<'_> {
    pub fn run<G: Gpu + ?Sized>(self, gpu: &mut G, camera: &Camera) -> FrameStats {
        let frustum = Frustum::from_matrices(&camera.view(), &camera.projection());
        let program = &mut self.resources.main_program;
        program.uniforms.set("projection", camera.projection());

        let mut stats = FrameStats {
            shadow_draws: self.shadow_draws,
            ..Default::default()
        };
        let mut active = with_program(gpu, program.id());
        let mut bound = with_vertex_array(&mut *active, self.resources.vertex_array);

        for segment in &self.scene.segments {
            if classify_segment(&frustum, segment) == Classification::Outside {
                stats.culled += 1;
                continue;
            }
            bound.bind_texture(0, segment.textures.diffuse);
            if let Some(shadow_map) = self.shadow_map {
                bound.bind_texture(1, Some(shadow_map));
            }
            program.uniforms.set("view", camera.view());
            program.uniforms.set("viewPos", camera.position.to_vec());
            program.uniforms.set("model", segment.model);
            program.load(&mut *bound);
            bound.draw_range(segment.topology, segment.start..segment.end);
            stats.drawn += 1;
        }
        stats
    }
}

/// Owns the scene and its GPU resources and draws it each frame.
pub struct Renderer {
    config: RendererConfig,
    roots: AssetRoots,
    loader: Box<dyn ImageLoader + Send>,
    stage: Stage,
    from_cache: bool,
    shadows_enabled: bool,
    cache_path: Option<PathBuf>,
    cache_writer: Option<CacheWriter>,
}

impl Renderer {
    /// Textures are read from `roots.textures`, shaders from `roots.shaders`.
    pub fn new(config: RendererConfig, roots: AssetRoots) -> Self {
        Self {
            shadows_enabled: config.shadows_enabled,
            loader: Box::new(FileImageLoader::new(roots.textures.clone())),
            config,
            roots,
            stage: Stage::Unbuilt,
            from_cache: false,
            cache_path: None,
            cache_writer: None,
        }
    }

    pub fn with_loader(mut self, loader: impl ImageLoader + Send + 'static) -> Self {
        self.loader = Box::new(loader);
        self
    }

    /// Where a freshly imported scene is cached after upload.
    pub fn set_cache_path(&mut self, path: impl Into<PathBuf>) {
        self.cache_path = Some(path.into());
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Import parsed shapes and build the scene. `false` when nothing could be built.
    pub fn build_from_import(&mut self, shapes: &[RawShape], materials: &[RawMaterial], model: Matrix4<f32>) -> bool {
        match import_scene(shapes, materials, model, self.config.verbose) {
            Ok(scene) => {
                self.install(scene, false);
                true
            }
            Err(SceneError::Empty) => {
                log::error!("{}", SceneError::Empty);
                // An earlier scene stays usable.
                if matches!(self.stage, Stage::Unbuilt) {
                    self.stage = Stage::Empty;
                }
                false
            }
            Err(e) => {
                log::error!("Unable to build scene: {e}");
                false
            }
        }
    }

    /// Restore the scene from a cache file. `false` sends the caller back to importing.
    pub fn build_from_cache(&mut self, path: &Path) -> bool {
        match cached_scene(path, self.config.verbose) {
            Ok(scene) => {
                self.install(scene, true);
                true
            }
            Err(e) => {
                log::warn!("Unable to use cache {}: {e}", path.display());
                false
            }
        }
    }

    /// Take a scene built elsewhere, e.g. by [`SceneLoad`](crate::loader::SceneLoad).
    pub fn install(&mut self, scene: Scene, from_cache: bool) {
        if self.is_uploaded() {
            log::error!("a scene is already on the GPU, ignoring the new one");
            return;
        }
        if scene.segments.is_empty() {
            log::error!("{}", SceneError::Empty);
            if matches!(self.stage, Stage::Unbuilt) {
                self.stage = Stage::Empty;
            }
            return;
        }
        self.from_cache = from_cache;
        self.stage = Stage::Built(scene);
    }

    pub fn scene(&self) -> Option<&Scene> {
        match &self.stage {
            Stage::Built(scene) => Some(scene),
            Stage::Uploaded { scene, .. } => Some(scene),
            Stage::Unbuilt | Stage::Empty => None,
        }
    }

    pub fn loaded_from_cache(&self) -> bool {
        self.from_cache
    }

    pub fn is_uploaded(&self) -> bool {
        matches!(self.stage, Stage::Uploaded { .. })
    }

    pub fn gpu_scene(&self) -> Option<&GpuScene> {
        match &self.stage {
            Stage::Uploaded { resources, .. } => Some(resources),
            _ => None,
        }
    }

    /// Read the configured shaders and upload the scene. Call once, after a build.
    pub fn upload_to_gpu<G: Gpu + ?Sized>(
        &mut self,
        gpu: &mut G,
        camera: &Camera,
        was_cache_loaded: bool,
    ) -> anyhow::Result<()> {
        let shaders = ShaderSources::load(&self.roots, &self.config)?;
        self.upload_with_shaders(gpu, camera, was_cache_loaded, &shaders)?;
        Ok(())
    }

    /// Upload with shader text supplied by the caller.
    ///
    /// Unless the scene came from the cache, a cache writer is started
    /// afterwards when caching is enabled and a cache path is set.
    pub fn upload_with_shaders<G: Gpu + ?Sized>(
        &mut self,
        gpu: &mut G,
        camera: &Camera,
        was_cache_loaded: bool,
        shaders: &ShaderSources,
    ) -> Result<(), RenderError> {
        let mut scene = match std::mem::replace(&mut self.stage, Stage::Unbuilt) {
            Stage::Built(scene) => scene,
            Stage::Unbuilt => return Err(RenderError::NotBuilt),
            Stage::Empty => {
                self.stage = Stage::Empty;
                return Err(RenderError::EmptyScene);
            }
            uploaded @ Stage::Uploaded { .. } => {
                log::warn!("scene is already on the GPU");
                self.stage = uploaded;
                return Ok(());
            }
        };

        let resources = match upload(
            gpu,
            &mut scene,
            camera,
            shaders,
            &*self.loader,
            &self.config,
            self.shadows_enabled,
        ) {
            Ok(resources) => resources,
            Err(fatal) => {
                self.stage = Stage::Built(scene);
                return Err(fatal.into());
            }
        };

        let scene = Arc::new(scene);
        if !was_cache_loaded && self.config.create_cache {
            match &self.cache_path {
                Some(path) => match CacheWriter::spawn(Arc::clone(&scene), path.clone()) {
                    Ok(writer) => self.cache_writer = Some(writer),
                    Err(e) => log::warn!("{e:#}"),
                },
                None => log::debug!("no cache path set, not writing a cache"),
            }
        }
        self.stage = Stage::Uploaded { scene, resources };
        Ok(())
    }

    pub fn shadows_enabled(&self) -> bool {
        self.shadows_enabled
    }

    pub fn enable_shadows(&mut self) {
        self.set_shadows(true);
    }

    pub fn disable_shadows(&mut self) {
        self.set_shadows(false);
    }

    fn set_shadows(&mut self, enabled: bool) {
        self.shadows_enabled = enabled;
        if let Stage::Uploaded { resources, .. } = &mut self.stage {
            resources.main_program.uniforms.set("shadows", i32::from(enabled));
        }
    }

    /// Indices of the segments the lit pass would draw for `camera`.
    pub fn visible_segments(&self, camera: &Camera) -> Vec<usize> {
        let Some(scene) = self.scene() else {
            return Vec::new();
        };
        let frustum = Frustum::from_matrices(&camera.view(), &camera.projection());
        scene
            .segments
            .iter()
            .enumerate()
            .filter(|(_, segment)| classify_segment(&frustum, segment).is_visible())
            .map(|(index, _)| index)
            .collect()
    }

    /// Draw one frame: the shadow pass when shadows are on, then the lit pass.
    pub fn render<G: Gpu + ?Sized>(&mut self, gpu: &mut G, camera: &Camera) -> Result<FrameStats, RenderError> {
        let (scene, resources) = match &mut self.stage {
            Stage::Uploaded { scene, resources } => (&**scene, resources),
            Stage::Empty => return Err(RenderError::EmptyScene),
            Stage::Unbuilt | Stage::Built(_) => return Err(RenderError::NotUploaded),
        };
        if scene.segments.is_empty() {
            return Err(RenderError::EmptyScene);
        }

        let light = self.config.light_position(camera.position);
        let light_space = light_space_matrix(&self.config.shadow_ortho, light);
        resources.shadow_program.uniforms.set("lightSpaceMatrix", light_space);
        resources.main_program.uniforms.set("lightSpaceMatrix", light_space);
        resources.main_program.uniforms.set("lightPos", light.to_vec());

        let shadow = ShadowPass::new(scene, resources);
        let lit = if self.shadows_enabled {
            let lit = shadow.run(gpu);
            if cfg!(debug_assertions) {
                check_errors(gpu, "shadow pass")?;
            }
            lit
        } else {
            shadow.skip()
        };
        let stats = lit.run(gpu, camera);
        if cfg!(debug_assertions) {
            check_errors(gpu, "lit pass")?;
        }
        Ok(stats)
    }

    /// Wait for the cache writer and release every GPU resource, each exactly once.
    pub fn teardown<G: Gpu + ?Sized>(self, gpu: &mut G) {
        let Self {
            stage, cache_writer, ..
        } = self;

        if let Some(writer) = cache_writer {
            let path = writer.path().to_owned();
            match writer.join() {
                Ok(()) => log::debug!("cache writer for {} finished", path.display()),
                Err(e) => log::warn!("{e:#}"),
            }
        }

        let Stage::Uploaded { resources, .. } = stage else {
            return;
        };
        let textures: BTreeSet<TextureId> = resources.textures.values().copied().collect();
        for texture in textures {
            gpu.delete_texture(texture);
        }
        gpu.delete_vertex_array(resources.vertex_array);
        gpu.delete_buffer(resources.vertex_buffer);
        gpu.delete_buffer(resources.index_buffer);
        gpu.delete_framebuffer(resources.depth_framebuffer);
        gpu.delete_texture(resources.shadow_map);
        resources.shadow_program.delete(gpu);
        resources.main_program.delete(gpu);
    }
}
