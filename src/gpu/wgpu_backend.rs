//! [`Gpu`] on top of wgpu.
//!
//! wgpu has no global binding state and no uniforms-by-name, so this backend
//! emulates both:
//!
//! - Shaders are WGSL, one module per stage (`vs_main` / `fs_main`). Each
//!   stage may declare one uniform struct at `@group(0) @binding(0)`; naga
//!   reflects its members and a member's index is its uniform location.
//! - `set_uniform` writes into a CPU staging block per program. Every draw
//!   snapshots the block into the frame's uniform arena and binds it with a
//!   dynamic offset, so each draw sees the values current at the time it was
//!   issued.
//! - Binds, clears and draws are recorded into passes (a new pass whenever the
//!   target framebuffer changes) and encoded in [`WgpuGpu::end_frame`].
//! - Texture unit 0 is bind group 1 (colour), unit 1 is bind group 2 (depth,
//!   compared). Empty units fall back to a white texture and a cleared depth
//!   texture.

use std::collections::{HashMap, HashSet, VecDeque};
use std::ops::Range;

use wgpu::util::DeviceExt;

use crate::data_structures::{
    model::{PrimitiveTopology, VertexLayout},
    texture::{GpuTexture, Texture},
};
use crate::gpu::{
    BufferId, BufferKind, FramebufferId, Gpu, GpuError, ProgramId, ShaderId, ShaderStage, TextureId,
    UniformValue, VertexArrayId, Viewport,
};
use crate::pipelines::{self, Layouts};

/// Uniform blocks are padded up to this so that every program binds something.
const MIN_BLOCK_SIZE: u64 = 16;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UniformMember {
    pub name: String,
    pub offset: u32,
    pub size: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UniformBlock {
    pub members: Vec<UniformMember>,
    pub size: u64,
}

/// Parse and validate a WGSL stage and reflect its uniform block.
///
/// The error string is the compile log.
pub fn compile_wgsl(stage: ShaderStage, source: &str) -> Result<UniformBlock, String> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| e.emit_to_string(source))?;
    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|e| e.to_string())?;

    let (entry, naga_stage) = match stage {
        ShaderStage::Vertex => ("vs_main", naga::ShaderStage::Vertex),
        ShaderStage::Fragment => ("fs_main", naga::ShaderStage::Fragment),
    };
    if !module
        .entry_points
        .iter()
        .any(|ep| ep.name == entry && ep.stage == naga_stage)
    {
        return Err(format!("missing {stage:?} entry point {entry}"));
    }

    Ok(reflect_uniform_block(&module))
}

fn reflect_uniform_block(module: &naga::Module) -> UniformBlock {
    let block = module.global_variables.iter().find_map(|(_, var)| {
        let binding = var.binding.as_ref()?;
        (var.space == naga::AddressSpace::Uniform && binding.group == 0 && binding.binding == 0)
            .then_some(var.ty)
    });
    let Some(ty) = block else {
        return UniformBlock::default();
    };
    let naga::TypeInner::Struct { members, span } = &module.types[ty].inner else {
        return UniformBlock::default();
    };

    let members = members
        .iter()
        .enumerate()
        .map(|(i, member)| {
            let end = members.get(i + 1).map_or(*span, |next| next.offset);
            UniformMember {
                name: member.name.clone().unwrap_or_default(),
                offset: member.offset,
                size: end - member.offset,
            }
        })
        .collect();
    UniformBlock {
        members,
        size: *span as u64,
    }
}

struct CompiledShader {
    stage: ShaderStage,
    module: wgpu::ShaderModule,
    block: UniformBlock,
}

struct LinkedProgram {
    vertex: wgpu::ShaderModule,
    fragment: Option<wgpu::ShaderModule>,
    members: Vec<UniformMember>,
    staging: Vec<u8>,
}

struct ProgramState {
    label: String,
    shaders: Vec<ShaderId>,
    linked: Option<LinkedProgram>,
}

struct VertexArray {
    vertices: BufferId,
    indices: BufferId,
    layout: VertexLayout,
}

struct BoundTexture {
    texture: GpuTexture,
    bind_group: wgpu::BindGroup,
    depth: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
struct PipelineKey {
    program: ProgramId,
    vertex_array: VertexArrayId,
    depth_only: bool,
    topology: PrimitiveTopology,
}

struct DrawCommand {
    key: PipelineKey,
    range: Range<u32>,
    uniform_offset: u32,
    colour: Option<TextureId>,
    shadow: Option<TextureId>,
    viewport: Viewport,
}

struct Pass {
    target: Option<FramebufferId>,
    clear_depth: bool,
    draws: Vec<DrawCommand>,
}

pub struct WgpuGpu {
    device: wgpu::Device,
    queue: wgpu::Queue,
    color_format: wgpu::TextureFormat,
    layouts: Layouts,
    uniform_alignment: u64,
    clear_colour: wgpu::Color,
    next_id: u32,
    buffers: HashMap<BufferId, (BufferKind, wgpu::Buffer)>,
    vertex_arrays: HashMap<VertexArrayId, VertexArray>,
    textures: HashMap<TextureId, BoundTexture>,
    framebuffers: HashMap<FramebufferId, TextureId>,
    shaders: HashMap<ShaderId, CompiledShader>,
    programs: HashMap<ProgramId, ProgramState>,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
    fallback_colour: wgpu::BindGroup,
    fallback_depth: wgpu::BindGroup,
    screen_depth: GpuTexture,
    program: Option<ProgramId>,
    vertex_array: Option<VertexArrayId>,
    framebuffer: Option<FramebufferId>,
    viewport: Viewport,
    units: [Option<TextureId>; 2],
    passes: Vec<Pass>,
    arena: Vec<u8>,
    errors: VecDeque<GpuError>,
    unlinked_draws: HashSet<ProgramId>,
}

impl WgpuGpu {
    /// A backend drawing into `color_format` targets of `width` by `height` pixels.
    pub fn new(
        device: wgpu::Device,
        queue: wgpu::Queue,
        color_format: wgpu::TextureFormat,
        width: u32,
        height: u32,
    ) -> Self {
        let layouts = Layouts::new(&device);
        let uniform_alignment = device.limits().min_uniform_buffer_offset_alignment as u64;

        let white = GpuTexture::from_texture(&device, &queue, &Texture::blank(), "fallback colour");
        let fallback_colour =
            pipelines::texture_bind_group(&device, &layouts.colour, &white, "fallback colour");
        // Never rendered into, so it is never cleared; sampling it only happens
        // while shadows are disabled and the shader ignores the result.
        let depth = GpuTexture::create_depth_texture(&device, [1, 1], "fallback depth");
        let fallback_depth = pipelines::texture_bind_group(&device, &layouts.shadow, &depth, "fallback depth");
        let screen_depth = GpuTexture::create_depth_texture(&device, [width, height], "depth_texture");

        Self {
            device,
            queue,
            color_format,
            layouts,
            uniform_alignment: uniform_alignment.max(1),
            clear_colour: wgpu::Color::BLACK,
            next_id: 1,
            buffers: HashMap::new(),
            vertex_arrays: HashMap::new(),
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            shaders: HashMap::new(),
            programs: HashMap::new(),
            pipelines: HashMap::new(),
            fallback_colour,
            fallback_depth,
            screen_depth,
            program: None,
            vertex_array: None,
            framebuffer: None,
            viewport: Viewport::new(width, height),
            units: [None; 2],
            passes: Vec::new(),
            arena: Vec::new(),
            errors: VecDeque::new(),
            unlinked_draws: HashSet::new(),
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn set_clear_colour(&mut self, colour: [f64; 4]) {
        self.clear_colour = wgpu::Color {
            r: colour[0],
            g: colour[1],
            b: colour[2],
            a: colour[3],
        };
    }

    /// Resize the screen depth buffer and reset the viewport to the new size.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.screen_depth = GpuTexture::create_depth_texture(&self.device, [width, height], "depth_texture");
        self.viewport = Viewport::new(width.max(1), height.max(1));
    }

    /// Drop anything recorded since the last [`end_frame`](Self::end_frame).
    pub fn begin_frame(&mut self) {
        if !self.passes.is_empty() {
            log::debug!("discarding {} unsubmitted passes", self.passes.len());
        }
        self.passes.clear();
        self.arena.clear();
    }

    fn next(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn error(&mut self, error: GpuError) {
        self.errors.push_back(error);
    }

    /// The pass for the current framebuffer, opening a new one on a target switch.
    fn current_pass(&mut self) -> &mut Pass {
        let target = self.framebuffer;
        if self.passes.last().is_none_or(|pass| pass.target != target) {
            self.passes.push(Pass {
                target,
                clear_depth: false,
                draws: Vec::new(),
            });
        }
        let last = self.passes.len() - 1;
        &mut self.passes[last]
    }

    fn snapshot_uniforms(&mut self, program: ProgramId) -> Option<u32> {
        let linked = self.programs.get(&program)?.linked.as_ref()?;
        let align = self.uniform_alignment as usize;
        let offset = self.arena.len().div_ceil(align) * align;
        self.arena.resize(offset, 0);
        self.arena.extend_from_slice(&linked.staging);
        u32::try_from(offset).ok()
    }

    fn target_size(&self, target: Option<FramebufferId>) -> (u32, u32) {
        let texture = target
            .and_then(|fb| self.framebuffers.get(&fb))
            .and_then(|texture| self.textures.get(texture));
        match texture {
            Some(bound) => (bound.texture.width, bound.texture.height),
            None => (self.screen_depth.width, self.screen_depth.height),
        }
    }

    fn build_missing_pipelines(&mut self) {
        for pass in &self.passes {
            for draw in &pass.draws {
                if self.pipelines.contains_key(&draw.key) {
                    continue;
                }
                let linked = self
                    .programs
                    .get(&draw.key.program)
                    .and_then(|p| p.linked.as_ref());
                let vertex_array = self.vertex_arrays.get(&draw.key.vertex_array);
                let (Some(linked), Some(vertex_array)) = (linked, vertex_array) else {
                    continue;
                };
                let pipeline = pipelines::mk_render_pipeline(
                    &self.device,
                    &self.layouts.pipeline,
                    &linked.vertex,
                    linked.fragment.as_ref(),
                    (!draw.key.depth_only).then_some(self.color_format),
                    &vertex_array.layout,
                    draw.key.topology,
                );
                self.pipelines.insert(draw.key, pipeline);
            }
        }
    }

    /// Encode and submit everything recorded this frame, drawing the screen passes into `view`.
    ///
    /// The first screen pass clears colour and depth. A frame that never touched
    /// the screen still clears it.
    pub fn end_frame(&mut self, view: &wgpu::TextureView) {
        if !self.passes.iter().any(|p| p.target.is_none()) {
            self.passes.push(Pass {
                target: None,
                clear_depth: true,
                draws: Vec::new(),
            });
        }
        self.build_missing_pipelines();

        let passes = std::mem::take(&mut self.passes);
        let mut arena = std::mem::take(&mut self.arena);
        // The largest binding has to fit behind the last offset.
        let tail = self
            .programs
            .values()
            .filter_map(|p| p.linked.as_ref())
            .map(|l| l.staging.len())
            .max()
            .unwrap_or(MIN_BLOCK_SIZE as usize);
        arena.resize(arena.len() + tail, 0);

        let arena_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Uniform Arena"),
            contents: &arena,
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let mut uniform_groups: HashMap<ProgramId, wgpu::BindGroup> = HashMap::new();
        for draw in passes.iter().flat_map(|p| p.draws.iter()) {
            let program = draw.key.program;
            if uniform_groups.contains_key(&program) {
                continue;
            }
            let Some(linked) = self.programs.get(&program).and_then(|p| p.linked.as_ref()) else {
                continue;
            };
            let group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                layout: &self.layouts.uniforms,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &arena_buffer,
                        offset: 0,
                        size: wgpu::BufferSize::new(linked.staging.len() as u64),
                    }),
                }],
                label: Some("uniform_block"),
            });
            uniform_groups.insert(program, group);
        }

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Scene Encoder"),
        });
        let mut screen_cleared = false;
        for pass in &passes {
            let (width, height) = self.target_size(pass.target);
            let attachment = pass
                .target
                .and_then(|fb| self.framebuffers.get(&fb))
                .and_then(|texture| self.textures.get(texture));
            let colour_load = if screen_cleared {
                wgpu::LoadOp::Load
            } else {
                wgpu::LoadOp::Clear(self.clear_colour)
            };
            let depth_load = if pass.clear_depth || (pass.target.is_none() && !screen_cleared) {
                wgpu::LoadOp::Clear(1.0)
            } else {
                wgpu::LoadOp::Load
            };

            let depth_view = match (pass.target, attachment) {
                (None, _) => &self.screen_depth.view,
                (Some(_), Some(bound)) => &bound.texture.view,
                (Some(fb), None) => {
                    self.errors.push_back(GpuError::InvalidFramebuffer(format!(
                        "{fb:?} was deleted before its pass ran"
                    )));
                    continue;
                }
            };
            let screen_colour = [Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: colour_load,
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })];
            let color_attachments: &[Option<wgpu::RenderPassColorAttachment>] = if pass.target.is_none() {
                screen_cleared = true;
                &screen_colour
            } else {
                &[]
            };

            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(if pass.target.is_some() { "Depth Pass" } else { "Screen Pass" }),
                color_attachments,
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: depth_load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                ..Default::default()
            });

            let own_depth = pass.target.and_then(|fb| self.framebuffers.get(&fb)).copied();
            for draw in &pass.draws {
                let Some(pipeline) = self.pipelines.get(&draw.key) else {
                    continue;
                };
                let Some(uniforms) = uniform_groups.get(&draw.key.program) else {
                    continue;
                };
                let Some(vertex_array) = self.vertex_arrays.get(&draw.key.vertex_array) else {
                    continue;
                };
                let (Some((_, vertices)), Some((_, indices))) = (
                    self.buffers.get(&vertex_array.vertices),
                    self.buffers.get(&vertex_array.indices),
                ) else {
                    continue;
                };

                let x = draw.viewport.x.min(width);
                let y = draw.viewport.y.min(height);
                let w = draw.viewport.width.min(width - x);
                let h = draw.viewport.height.min(height - y);
                if w == 0 || h == 0 {
                    continue;
                }

                let colour = draw
                    .colour
                    .and_then(|t| self.textures.get(&t))
                    .filter(|t| !t.depth)
                    .map_or(&self.fallback_colour, |t| &t.bind_group);
                let shadow = draw
                    .shadow
                    .filter(|t| Some(*t) != own_depth)
                    .and_then(|t| self.textures.get(&t))
                    .filter(|t| t.depth)
                    .map_or(&self.fallback_depth, |t| &t.bind_group);

                render_pass.set_pipeline(pipeline);
                render_pass.set_viewport(x as f32, y as f32, w as f32, h as f32, 0.0, 1.0);
                render_pass.set_bind_group(0, uniforms, &[draw.uniform_offset]);
                render_pass.set_bind_group(1, colour, &[]);
                render_pass.set_bind_group(2, shadow, &[]);
                render_pass.set_vertex_buffer(0, vertices.slice(..));
                render_pass.set_index_buffer(indices.slice(..), wgpu::IndexFormat::Uint32);
                render_pass.draw_indexed(draw.range.clone(), 0, 0..1);
            }
        }

        self.queue.submit(std::iter::once(encoder.finish()));
    }
}

impl Gpu for WgpuGpu {
    fn create_buffer(&mut self, kind: BufferKind, label: &str, contents: &[u8]) -> BufferId {
        let id = BufferId(self.next());
        let usage = match kind {
            BufferKind::Vertex => wgpu::BufferUsages::VERTEX,
            BufferKind::Index => wgpu::BufferUsages::INDEX,
        };
        let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents,
            usage,
        });
        self.buffers.insert(id, (kind, buffer));
        id
    }

    fn create_vertex_array(&mut self, vertices: BufferId, indices: BufferId, layout: &VertexLayout) -> VertexArrayId {
        let id = VertexArrayId(self.next());
        let kinds = (
            self.buffers.get(&vertices).map(|(kind, _)| *kind),
            self.buffers.get(&indices).map(|(kind, _)| *kind),
        );
        if kinds != (Some(BufferKind::Vertex), Some(BufferKind::Index)) {
            self.error(GpuError::InvalidValue(format!(
                "vertex array {id:?} needs a vertex and an index buffer"
            )));
        }
        self.vertex_arrays.insert(
            id,
            VertexArray {
                vertices,
                indices,
                layout: *layout,
            },
        );
        id
    }

    fn create_texture(&mut self, label: &str, texture: &Texture) -> TextureId {
        let id = TextureId(self.next());
        if texture.pixels.len() < texture.byte_len() {
            self.error(GpuError::InvalidValue(format!(
                "{label}: {} pixel bytes for {}x{}x{}",
                texture.pixels.len(),
                texture.width,
                texture.height,
                texture.bpp
            )));
        }
        let gpu_texture = GpuTexture::from_texture(&self.device, &self.queue, texture, label);
        let bind_group = pipelines::texture_bind_group(&self.device, &self.layouts.colour, &gpu_texture, label);
        self.textures.insert(
            id,
            BoundTexture {
                texture: gpu_texture,
                bind_group,
                depth: false,
            },
        );
        id
    }

    fn create_depth_framebuffer(&mut self, width: u32, height: u32) -> (FramebufferId, TextureId) {
        let id = FramebufferId(self.next());
        let texture = TextureId(self.next());
        let depth = GpuTexture::create_depth_texture(&self.device, [width, height], "shadow map");
        let bind_group = pipelines::texture_bind_group(&self.device, &self.layouts.shadow, &depth, "shadow map");
        self.textures.insert(
            texture,
            BoundTexture {
                texture: depth,
                bind_group,
                depth: true,
            },
        );
        self.framebuffers.insert(id, texture);
        (id, texture)
    }

    fn create_shader(&mut self, stage: ShaderStage, label: &str, source: &str) -> Result<ShaderId, String> {
        let block = compile_wgsl(stage, source)?;
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        let id = ShaderId(self.next());
        self.shaders.insert(id, CompiledShader { stage, module, block });
        Ok(id)
    }

    fn create_program(&mut self, label: &str) -> ProgramId {
        let id = ProgramId(self.next());
        self.programs.insert(
            id,
            ProgramState {
                label: label.to_owned(),
                shaders: Vec::new(),
                linked: None,
            },
        );
        id
    }

    fn attach_shader(&mut self, program: ProgramId, shader: ShaderId) {
        if !self.shaders.contains_key(&shader) {
            self.error(GpuError::InvalidValue(format!("attach of unknown shader {shader:?}")));
            return;
        }
        match self.programs.get_mut(&program) {
            Some(state) => state.shaders.push(shader),
            None => self.error(GpuError::InvalidValue(format!("attach to unknown program {program:?}"))),
        }
    }

    fn link_program(&mut self, program: ProgramId) -> Result<(), String> {
        let Some(state) = self.programs.get(&program) else {
            return Err(format!("unknown program {program:?}"));
        };
        let stages: Vec<&CompiledShader> = state.shaders.iter().filter_map(|s| self.shaders.get(s)).collect();
        let vertex: Vec<&&CompiledShader> = stages.iter().filter(|s| s.stage == ShaderStage::Vertex).collect();
        let fragment: Vec<&&CompiledShader> = stages.iter().filter(|s| s.stage == ShaderStage::Fragment).collect();

        let result = match (vertex.as_slice(), fragment.as_slice()) {
            ([], _) => Err(format!("{}: no vertex shader attached", state.label)),
            ([_, _, ..], _) | (_, [_, _, ..]) => Err(format!("{}: more than one shader per stage", state.label)),
            ([vertex], fragment) => {
                let fragment = fragment.first();
                let mut members = vertex.block.members.clone();
                let mut size = vertex.block.size;
                let mut conflict = None;
                if let Some(fragment) = fragment {
                    size = size.max(fragment.block.size);
                    for member in &fragment.block.members {
                        match members.iter().find(|m| m.name == member.name) {
                            Some(existing) if existing.offset != member.offset => {
                                conflict = Some(member.name.clone());
                            }
                            Some(_) => {}
                            None => members.push(member.clone()),
                        }
                    }
                }
                match conflict {
                    Some(name) => Err(format!(
                        "{}: uniform {name} sits at different offsets in the vertex and fragment stage",
                        state.label
                    )),
                    None => Ok(LinkedProgram {
                        vertex: vertex.module.clone(),
                        fragment: fragment.map(|f| f.module.clone()),
                        members,
                        staging: vec![0; size.max(MIN_BLOCK_SIZE) as usize],
                    }),
                }
            }
        };

        // A relink invalidates pipelines built from the previous modules.
        self.pipelines.retain(|key, _| key.program != program);
        let Some(state) = self.programs.get_mut(&program) else {
            return Err(format!("unknown program {program:?}"));
        };
        match result {
            Ok(linked) => {
                state.linked = Some(linked);
                Ok(())
            }
            Err(info_log) => {
                state.linked = None;
                Err(info_log)
            }
        }
    }

    fn uniform_location(&mut self, program: ProgramId, name: &str) -> i32 {
        self.programs
            .get(&program)
            .and_then(|p| p.linked.as_ref())
            .and_then(|linked| linked.members.iter().position(|m| m.name == name))
            .map_or(-1, |index| index as i32)
    }

    fn set_uniform(&mut self, program: ProgramId, location: i32, value: &UniformValue) {
        if location < 0 {
            return;
        }
        let Some(linked) = self.programs.get_mut(&program).and_then(|p| p.linked.as_mut()) else {
            self.error(GpuError::InvalidOperation(format!(
                "uniform upload to unlinked program {program:?}"
            )));
            return;
        };
        let Some(member) = linked.members.get(location as usize) else {
            self.error(GpuError::InvalidValue(format!("uniform location {location}")));
            return;
        };
        let bytes = value.to_bytes();
        if bytes.len() > member.size as usize {
            let message = format!("uniform {} does not hold a {value:?}", member.name);
            self.error(GpuError::InvalidOperation(message));
            return;
        }
        let start = member.offset as usize;
        linked.staging[start..start + bytes.len()].copy_from_slice(&bytes);
    }

    fn use_program(&mut self, program: Option<ProgramId>) {
        self.program = program;
    }

    fn current_program(&self) -> Option<ProgramId> {
        self.program
    }

    fn bind_vertex_array(&mut self, vertex_array: Option<VertexArrayId>) {
        self.vertex_array = vertex_array;
    }

    fn current_vertex_array(&self) -> Option<VertexArrayId> {
        self.vertex_array
    }

    fn bind_texture(&mut self, unit: u32, texture: Option<TextureId>) {
        match self.units.get_mut(unit as usize) {
            Some(slot) => *slot = texture,
            None => self.error(GpuError::InvalidValue(format!("texture unit {unit}"))),
        }
    }

    fn bound_texture(&self, unit: u32) -> Option<TextureId> {
        self.units.get(unit as usize).copied().flatten()
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>) {
        if let Some(fb) = framebuffer
            && !self.framebuffers.contains_key(&fb)
        {
            self.error(GpuError::InvalidFramebuffer(format!("{fb:?} does not exist")));
            return;
        }
        self.framebuffer = framebuffer;
    }

    fn current_framebuffer(&self) -> Option<FramebufferId> {
        self.framebuffer
    }

    fn viewport(&self) -> Viewport {
        self.viewport
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    fn clear_depth(&mut self) {
        let pass = self.current_pass();
        if pass.draws.is_empty() {
            pass.clear_depth = true;
        } else {
            let target = pass.target;
            self.passes.push(Pass {
                target,
                clear_depth: true,
                draws: Vec::new(),
            });
        }
    }

    fn draw_range(&mut self, topology: PrimitiveTopology, range: Range<u32>) {
        let (Some(program), Some(vertex_array)) = (self.program, self.vertex_array) else {
            self.error(GpuError::InvalidOperation(
                "draw without a program and vertex array".to_owned(),
            ));
            return;
        };
        let index_count = self
            .vertex_arrays
            .get(&vertex_array)
            .and_then(|va| self.buffers.get(&va.indices))
            .map(|(_, buffer)| buffer.size() / std::mem::size_of::<u32>() as u64);
        match index_count {
            Some(count) if range.start <= range.end && range.end as u64 <= count => {}
            _ => {
                self.error(GpuError::InvalidValue(format!(
                    "draw range {range:?} outside the index buffer"
                )));
                return;
            }
        }
        let Some(state) = self.programs.get(&program) else {
            self.error(GpuError::InvalidValue(format!("draw with unknown program {program:?}")));
            return;
        };
        // A failed link was already reported; its draws render nothing.
        if state.linked.is_none() {
            if self.unlinked_draws.insert(program) {
                log::warn!("skipping draws with unlinked program {program:?}");
            }
            return;
        }
        let Some(uniform_offset) = self.snapshot_uniforms(program) else {
            self.error(GpuError::OutOfMemory(format!(
                "uniform arena for program {program:?} overflows"
            )));
            return;
        };

        let draw = DrawCommand {
            key: PipelineKey {
                program,
                vertex_array,
                depth_only: self.framebuffer.is_some(),
                topology,
            },
            range,
            uniform_offset,
            colour: self.units[0],
            shadow: self.units[1],
            viewport: self.viewport,
        };
        self.current_pass().draws.push(draw);
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        match self.buffers.remove(&buffer) {
            Some((_, buffer)) => buffer.destroy(),
            None => self.error(GpuError::InvalidValue(format!("delete of unknown buffer {buffer:?}"))),
        }
    }

    fn delete_vertex_array(&mut self, vertex_array: VertexArrayId) {
        if self.vertex_arrays.remove(&vertex_array).is_none() {
            self.error(GpuError::InvalidValue(format!(
                "delete of unknown vertex array {vertex_array:?}"
            )));
        }
        self.pipelines.retain(|key, _| key.vertex_array != vertex_array);
        if self.vertex_array == Some(vertex_array) {
            self.vertex_array = None;
        }
    }

    fn delete_texture(&mut self, texture: TextureId) {
        if self.textures.remove(&texture).is_none() {
            self.error(GpuError::InvalidValue(format!("delete of unknown texture {texture:?}")));
        }
        for unit in self.units.iter_mut() {
            if *unit == Some(texture) {
                *unit = None;
            }
        }
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        if self.framebuffers.remove(&framebuffer).is_none() {
            self.error(GpuError::InvalidValue(format!(
                "delete of unknown framebuffer {framebuffer:?}"
            )));
        }
        if self.framebuffer == Some(framebuffer) {
            self.framebuffer = None;
        }
    }

    fn delete_shader(&mut self, shader: ShaderId) {
        if self.shaders.remove(&shader).is_none() {
            self.error(GpuError::InvalidValue(format!("delete of unknown shader {shader:?}")));
        }
    }

    fn delete_program(&mut self, program: ProgramId) {
        if self.programs.remove(&program).is_none() {
            self.error(GpuError::InvalidValue(format!("delete of unknown program {program:?}")));
        }
        self.pipelines.retain(|key, _| key.program != program);
        if self.program == Some(program) {
            self.program = None;
        }
    }

    fn poll_error(&mut self) -> Option<GpuError> {
        self.errors.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK: &str = r#"
struct Uniforms {
    model: mat4x4<f32>,
    tint: vec3<f32>,
    flag: i32,
    scale: f32,
}
@group(0) @binding(0) var<uniform> u: Uniforms;

@vertex
fn vs_main(@location(0) position: vec3<f32>) -> @builtin(position) vec4<f32> {
    return u.model * vec4<f32>(position * u.scale, 1.0);
}
"#;

    #[test]
    fn reflects_member_offsets_and_sizes() {
        let block = compile_wgsl(ShaderStage::Vertex, BLOCK).unwrap();
        let names: Vec<&str> = block.members.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["model", "tint", "flag", "scale"]);
        assert_eq!((block.members[0].offset, block.members[0].size), (0, 64));
        assert_eq!((block.members[1].offset, block.members[1].size), (64, 12));
        assert_eq!(block.members[2].offset, 76);
        assert_eq!(block.members[3].offset, 80);
        assert_eq!(block.size, 96);
    }

    #[test]
    fn missing_entry_point_fails_compile() {
        let err = compile_wgsl(ShaderStage::Fragment, BLOCK).unwrap_err();
        assert!(err.contains("fs_main"));
    }

    #[test]
    fn syntax_errors_carry_the_log() {
        let err = compile_wgsl(ShaderStage::Vertex, "fn vs_main( {").unwrap_err();
        assert!(!err.is_empty());
    }

    #[test]
    fn stage_without_uniforms_has_empty_block() {
        let source = "@fragment fn fs_main() {}";
        let block = compile_wgsl(ShaderStage::Fragment, source).unwrap();
        assert!(block.members.is_empty());
        assert_eq!(block.size, 0);
    }
}
