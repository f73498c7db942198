//! Moves a built [`Scene`] onto the GPU.
//!
//! The steps run in a fixed order and each one feeds the next: diffuse
//! textures, the vertex buffer, the index buffer and vertex array, the two
//! programs, the shadow framebuffer and finally the uniforms of both
//! programs. Every step is followed by an error sweep.

use std::collections::BTreeMap;

use cgmath::{EuclideanSpace, Matrix4, Point3, SquareMatrix};

use crate::{
    camera::Camera,
    config::{OrthoBounds, RendererConfig},
    data_structures::{model::Vertex, scene::Scene},
    gpu::{
        BufferId, BufferKind, FramebufferId, Gpu, GpuFatal, Program, Shader, ShaderStage, TextureId,
        VertexArrayId, check_errors,
    },
    resources::{
        AssetRoots, load_string,
        texture::{DEFAULT_BLANK_TEXTURE, ImageLoader, default_blank},
    },
};

/// Source text of the four shader stages.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderSources {
    pub depth_vert: String,
    pub depth_frag: String,
    pub vert: String,
    pub frag: String,
}

impl ShaderSources {
    /// Read the configured shader files from the shaders root.
    pub fn load(roots: &AssetRoots, config: &RendererConfig) -> anyhow::Result<Self> {
        Ok(Self {
            depth_vert: load_string(&roots.shader(&config.shader_depth_vert))?,
            depth_frag: load_string(&roots.shader(&config.shader_depth_frag))?,
            vert: load_string(&roots.shader(&config.shader_vert))?,
            frag: load_string(&roots.shader(&config.shader_frag))?,
        })
    }
}

/// Everything [`upload`] created. The renderer owns it until teardown.
#[derive(Debug)]
pub struct GpuScene {
    pub vertex_buffer: BufferId,
    pub index_buffer: BufferId,
    pub vertex_array: VertexArrayId,
    pub shadow_program: Program,
    pub main_program: Program,
    pub depth_framebuffer: FramebufferId,
    pub shadow_map: TextureId,
    pub shadow_size: (u32, u32),
    /// Uploaded textures by filename. Names that fell back to the blank texture share its id.
    pub textures: BTreeMap<String, TextureId>,
}

/// Light view and projection for a light at `light`, looking at the origin.
pub fn light_space_matrix(bounds: &OrthoBounds, light: Point3<f32>) -> Matrix4<f32> {
    bounds.matrix() * Matrix4::look_at_rh(light, Point3::origin(), cgmath::Vector3::unit_y())
}

/// Upload `scene` and set up both programs for `camera`.
///
/// Writes the resolved diffuse texture handle into every segment and records
/// decoded textures in the scene's texture map. A missing texture or a shader
/// that fails to link is logged and rendering continues without it; only an
/// excessive error sweep fails the upload.
pub fn upload<G: Gpu + ?Sized, L: ImageLoader + ?Sized>(
    gpu: &mut G,
    scene: &mut Scene,
    camera: &Camera,
    shaders: &ShaderSources,
    loader: &L,
    config: &RendererConfig,
    shadows_enabled: bool,
) -> Result<GpuScene, GpuFatal> {
    progress!(config.verbose, "Buffering to GPU");

    let textures = upload_textures(gpu, scene, loader);
    check_errors(gpu, "textures")?;
    progress!(config.verbose, "buffered {} textures", textures.len());

    let vertex_buffer = gpu.create_buffer(BufferKind::Vertex, "vertices", bytemuck::cast_slice(&scene.vertices));
    check_errors(gpu, "vertex buffer")?;
    let index_buffer = gpu.create_buffer(BufferKind::Index, "indices", bytemuck::cast_slice(&scene.indices));
    let vertex_array = gpu.create_vertex_array(vertex_buffer, index_buffer, &Vertex::LAYOUT);
    check_errors(gpu, "index buffer")?;
    progress!(
        config.verbose,
        "buffered geometry: {} vertices, {} indices",
        scene.vertices.len(),
        scene.indices.len()
    );

    let mut shadow_program = build_program(gpu, "shadow", &shaders.depth_vert, &shaders.depth_frag);
    let mut main_program = build_program(gpu, "main", &shaders.vert, &shaders.frag);
    check_errors(gpu, "programs")?;

    let shadow_size = (config.shadow_width.max(1), config.shadow_height.max(1));
    let (depth_framebuffer, shadow_map) = gpu.create_depth_framebuffer(shadow_size.0, shadow_size.1);
    check_errors(gpu, "depth framebuffer")?;

    let light = config.light_position(camera.position);
    let light_space = light_space_matrix(&config.shadow_ortho, light);
    let identity = Matrix4::<f32>::identity();

    shadow_program.add_uniform(gpu, "lightSpaceMatrix", light_space);
    shadow_program.add_uniform(gpu, "model", identity);

    main_program.add_uniform(gpu, "projection", camera.projection());
    main_program.add_uniform(gpu, "view", camera.view());
    main_program.add_uniform(gpu, "model", identity);
    main_program.add_uniform(gpu, "lightSpaceMatrix", light_space);
    main_program.add_uniform(gpu, "lightPos", light.to_vec());
    main_program.add_uniform(gpu, "viewPos", camera.position.to_vec());
    main_program.add_uniform(gpu, "diffuseTexture", 0);
    main_program.add_uniform(gpu, "shadowMap", 1);
    main_program.add_uniform(gpu, "shadows", i32::from(shadows_enabled));
    check_errors(gpu, "uniforms")?;

    Ok(GpuScene {
        vertex_buffer,
        index_buffer,
        vertex_array,
        shadow_program,
        main_program,
        depth_framebuffer,
        shadow_map,
        shadow_size,
        textures,
    })
}

/// Compile both stages and link. Failures are logged; the program is returned either way.
fn build_program<G: Gpu + ?Sized>(gpu: &mut G, label: &str, vert: &str, frag: &str) -> Program {
    let mut program = Program::new(gpu, label);
    for (stage, source, suffix) in [
        (ShaderStage::Vertex, vert, "vert"),
        (ShaderStage::Fragment, frag, "frag"),
    ] {
        match Shader::compile(gpu, stage, &format!("{label}.{suffix}"), source) {
            Ok(shader) => program.attach(gpu, &shader),
            Err(e) => log::error!("{e:#}"),
        }
    }
    // Link failures are already logged by the program.
    let _ = program.link(gpu);
    program
}

/// Resolve and upload the diffuse texture of every segment, each file once.
fn upload_textures<G: Gpu + ?Sized, L: ImageLoader + ?Sized>(
    gpu: &mut G,
    scene: &mut Scene,
    loader: &L,
) -> BTreeMap<String, TextureId> {
    let mut uploaded: BTreeMap<String, TextureId> = BTreeMap::new();

    for index in 0..scene.segments.len() {
        let segment = &scene.segments[index];
        let Some(material) = scene.material_for(segment) else {
            log::warn!("Material {} was not loaded", segment.material);
            continue;
        };
        if material.diffuse_texture.is_empty() {
            log::warn!("Material {} has no diffuse texture", material.name);
            continue;
        }
        let name = material.diffuse_texture.as_str().to_owned();

        let id = match uploaded.get(&name) {
            Some(&id) => id,
            None => {
                let id = upload_texture(gpu, scene, &mut uploaded, &name, loader);
                uploaded.insert(name, id);
                id
            }
        };
        scene.segments[index].textures.diffuse = Some(id);
    }
    uploaded
}

/// Upload one texture by filename, decoding it first when the scene does not hold it yet.
fn upload_texture<G: Gpu + ?Sized, L: ImageLoader + ?Sized>(
    gpu: &mut G,
    scene: &mut Scene,
    uploaded: &mut BTreeMap<String, TextureId>,
    name: &str,
    loader: &L,
) -> TextureId {
    if let Some(texture) = scene.textures.get(name) {
        return gpu.create_texture(name, texture);
    }
    match loader.load(name) {
        Ok(texture) => {
            let id = gpu.create_texture(name, &texture);
            scene.textures.insert(name.to_owned(), texture);
            id
        }
        Err(e) => {
            log::warn!("{e:#}, using {DEFAULT_BLANK_TEXTURE}");
            let blank = scene
                .textures
                .get(DEFAULT_BLANK_TEXTURE)
                .cloned()
                .unwrap_or_else(|| default_blank(loader));
            scene.textures.insert(name.to_owned(), blank.clone());
            let id = match uploaded.get(DEFAULT_BLANK_TEXTURE) {
                Some(&id) => id,
                None => {
                    let id = gpu.create_texture(DEFAULT_BLANK_TEXTURE, &blank);
                    uploaded.insert(DEFAULT_BLANK_TEXTURE.to_owned(), id);
                    id
                }
            };
            scene.textures.insert(DEFAULT_BLANK_TEXTURE.to_owned(), blank);
            id
        }
    }
}
