//! An in-memory [`Gpu`] that records every call.
//!
//! Resources are bookkept but nothing is rendered. Misuse that a real driver
//! would flag (drawing with nothing bound, deleting a handle twice, setting a
//! uniform on an unlinked program) is queued as a [`GpuError`] so that
//! [`check_errors`](super::check_errors) sees it. Draws with a program whose
//! link failed are dropped without an error, as the wgpu backend does.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::ops::Range;

use crate::data_structures::{
    model::{PrimitiveTopology, VertexLayout},
    texture::Texture,
};
use crate::gpu::{
    BufferId, BufferKind, FramebufferId, Gpu, GpuError, ProgramId, ShaderId, ShaderStage, TextureId,
    UniformValue, VertexArrayId, Viewport,
};

#[derive(Clone, Debug, PartialEq)]
pub struct DrawCall {
    pub program: ProgramId,
    pub vertex_array: VertexArrayId,
    pub framebuffer: Option<FramebufferId>,
    pub viewport: Viewport,
    pub topology: PrimitiveTopology,
    pub range: Range<u32>,
    /// Units 0 and 1.
    pub textures: [Option<TextureId>; 2],
    /// Every uniform value the program held when the draw was issued.
    pub uniforms: BTreeMap<String, UniformValue>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum GpuCall {
    CreateBuffer { id: BufferId, kind: BufferKind, len: usize },
    CreateVertexArray { id: VertexArrayId, vertices: BufferId, indices: BufferId },
    CreateTexture { id: TextureId, label: String, width: u32, height: u32 },
    CreateDepthFramebuffer { id: FramebufferId, texture: TextureId, width: u32, height: u32 },
    CreateShader { id: ShaderId, stage: ShaderStage, label: String },
    CreateProgram { id: ProgramId, label: String },
    AttachShader { program: ProgramId, shader: ShaderId },
    LinkProgram { program: ProgramId, ok: bool },
    SetUniform { program: ProgramId, location: i32, value: UniformValue },
    UseProgram(Option<ProgramId>),
    BindVertexArray(Option<VertexArrayId>),
    BindTexture { unit: u32, texture: Option<TextureId> },
    BindFramebuffer(Option<FramebufferId>),
    SetViewport(Viewport),
    ClearDepth(Option<FramebufferId>),
    Draw(DrawCall),
    DeleteBuffer(BufferId),
    DeleteVertexArray(VertexArrayId),
    DeleteTexture(TextureId),
    DeleteFramebuffer(FramebufferId),
    DeleteShader(ShaderId),
    DeleteProgram(ProgramId),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedTexture {
    pub label: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Debug, Default)]
struct RecordedProgram {
    label: String,
    shaders: Vec<ShaderId>,
    linked: bool,
    /// Location is the index.
    locations: Vec<String>,
    values: HashMap<i32, UniformValue>,
}

#[derive(Clone, Debug)]
struct RecordedShader {
    stage: ShaderStage,
    source: String,
}

#[derive(Debug)]
pub struct RecordingGpu {
    next_id: u32,
    calls: Vec<GpuCall>,
    buffers: HashMap<BufferId, (BufferKind, Vec<u8>)>,
    vertex_arrays: HashMap<VertexArrayId, (BufferId, BufferId)>,
    textures: HashMap<TextureId, RecordedTexture>,
    framebuffers: HashMap<FramebufferId, TextureId>,
    shaders: HashMap<ShaderId, RecordedShader>,
    programs: HashMap<ProgramId, RecordedProgram>,
    program: Option<ProgramId>,
    vertex_array: Option<VertexArrayId>,
    framebuffer: Option<FramebufferId>,
    viewport: Viewport,
    units: [Option<TextureId>; 2],
    errors: VecDeque<GpuError>,
    failing_links: HashSet<String>,
    unlinked_draws: HashSet<ProgramId>,
}

impl RecordingGpu {
    /// A device whose screen viewport is `width` by `height`.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            next_id: 1,
            calls: Vec::new(),
            buffers: HashMap::new(),
            vertex_arrays: HashMap::new(),
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            shaders: HashMap::new(),
            programs: HashMap::new(),
            program: None,
            vertex_array: None,
            framebuffer: None,
            viewport: Viewport::new(width, height),
            units: [None; 2],
            errors: VecDeque::new(),
            failing_links: HashSet::new(),
            unlinked_draws: HashSet::new(),
        }
    }

    fn next(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn inject_error(&mut self, error: GpuError) {
        self.errors.push_back(error);
    }

    /// Make every later link of a program with this label fail.
    pub fn fail_link(&mut self, label: &str) {
        self.failing_links.insert(label.to_owned());
    }

    pub fn calls(&self) -> &[GpuCall] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    pub fn draws(&self) -> Vec<&DrawCall> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                GpuCall::Draw(draw) => Some(draw),
                _ => None,
            })
            .collect()
    }

    pub fn buffer_contents(&self, buffer: BufferId) -> Option<&[u8]> {
        self.buffers.get(&buffer).map(|(_, bytes)| bytes.as_slice())
    }

    pub fn texture(&self, texture: TextureId) -> Option<&RecordedTexture> {
        self.textures.get(&texture)
    }

    pub fn uniform_value(&self, program: ProgramId, name: &str) -> Option<UniformValue> {
        let program = self.programs.get(&program)?;
        let location = program.locations.iter().position(|n| n == name)? as i32;
        program.values.get(&location).copied()
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_vertex_arrays(&self) -> usize {
        self.vertex_arrays.len()
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn live_framebuffers(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn live_shaders(&self) -> usize {
        self.shaders.len()
    }

    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    fn invalid_value(&mut self, what: String) {
        self.errors.push_back(GpuError::InvalidValue(what));
    }

    fn invalid_operation(&mut self, what: String) {
        self.errors.push_back(GpuError::InvalidOperation(what));
    }

    fn snapshot_uniforms(&self, program: ProgramId) -> BTreeMap<String, UniformValue> {
        let Some(recorded) = self.programs.get(&program) else {
            return BTreeMap::new();
        };
        recorded
            .values
            .iter()
            .filter_map(|(location, value)| {
                let name = recorded.locations.get(*location as usize)?;
                Some((name.clone(), *value))
            })
            .collect()
    }
}

fn declares(source: &str, name: &str) -> bool {
    source
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .any(|token| token == name)
}

impl Gpu for RecordingGpu {
    fn create_buffer(&mut self, kind: BufferKind, _label: &str, contents: &[u8]) -> BufferId {
        let id = BufferId(self.next());
        self.buffers.insert(id, (kind, contents.to_vec()));
        self.calls.push(GpuCall::CreateBuffer {
            id,
            kind,
            len: contents.len(),
        });
        id
    }

    fn create_vertex_array(&mut self, vertices: BufferId, indices: BufferId, _layout: &VertexLayout) -> VertexArrayId {
        let id = VertexArrayId(self.next());
        if !self.buffers.contains_key(&vertices) || !self.buffers.contains_key(&indices) {
            self.invalid_value(format!("vertex array {id:?} references a missing buffer"));
        }
        self.vertex_arrays.insert(id, (vertices, indices));
        self.calls.push(GpuCall::CreateVertexArray { id, vertices, indices });
        id
    }

    fn create_texture(&mut self, label: &str, texture: &Texture) -> TextureId {
        let id = TextureId(self.next());
        self.textures.insert(
            id,
            RecordedTexture {
                label: label.to_owned(),
                width: texture.width,
                height: texture.height,
            },
        );
        self.calls.push(GpuCall::CreateTexture {
            id,
            label: label.to_owned(),
            width: texture.width,
            height: texture.height,
        });
        id
    }

    fn create_depth_framebuffer(&mut self, width: u32, height: u32) -> (FramebufferId, TextureId) {
        let id = FramebufferId(self.next());
        let texture = TextureId(self.next());
        self.textures.insert(
            texture,
            RecordedTexture {
                label: "depth".to_owned(),
                width,
                height,
            },
        );
        self.framebuffers.insert(id, texture);
        self.calls.push(GpuCall::CreateDepthFramebuffer {
            id,
            texture,
            width,
            height,
        });
        (id, texture)
    }

    fn create_shader(&mut self, stage: ShaderStage, label: &str, source: &str) -> Result<ShaderId, String> {
        if source.trim().is_empty() {
            return Err(format!("{label}: empty shader source"));
        }
        let id = ShaderId(self.next());
        self.shaders.insert(
            id,
            RecordedShader {
                stage,
                source: source.to_owned(),
            },
        );
        self.calls.push(GpuCall::CreateShader {
            id,
            stage,
            label: label.to_owned(),
        });
        Ok(id)
    }

    fn create_program(&mut self, label: &str) -> ProgramId {
        let id = ProgramId(self.next());
        self.programs.insert(
            id,
            RecordedProgram {
                label: label.to_owned(),
                ..Default::default()
            },
        );
        self.calls.push(GpuCall::CreateProgram {
            id,
            label: label.to_owned(),
        });
        id
    }

    fn attach_shader(&mut self, program: ProgramId, shader: ShaderId) {
        if !self.shaders.contains_key(&shader) {
            self.invalid_value(format!("attach of unknown shader {shader:?}"));
        }
        match self.programs.get_mut(&program) {
            Some(recorded) => recorded.shaders.push(shader),
            None => self.invalid_value(format!("attach to unknown program {program:?}")),
        }
        self.calls.push(GpuCall::AttachShader { program, shader });
    }

    fn link_program(&mut self, program: ProgramId) -> Result<(), String> {
        let Some(recorded) = self.programs.get(&program) else {
            self.invalid_value(format!("link of unknown program {program:?}"));
            return Err(format!("unknown program {program:?}"));
        };
        let has_vertex = recorded
            .shaders
            .iter()
            .filter_map(|s| self.shaders.get(s))
            .any(|s| s.stage == ShaderStage::Vertex);
        let result = if self.failing_links.contains(&recorded.label) {
            Err(format!("{}: link failed", recorded.label))
        } else if !has_vertex {
            Err(format!("{}: no vertex shader attached", recorded.label))
        } else {
            Ok(())
        };
        if let Some(recorded) = self.programs.get_mut(&program) {
            recorded.linked = result.is_ok();
        }
        self.calls.push(GpuCall::LinkProgram {
            program,
            ok: result.is_ok(),
        });
        result
    }

    fn uniform_location(&mut self, program: ProgramId, name: &str) -> i32 {
        let Some(recorded) = self.programs.get(&program) else {
            return -1;
        };
        if !recorded.linked {
            return -1;
        }
        let declared = recorded
            .shaders
            .iter()
            .filter_map(|s| self.shaders.get(s))
            .any(|s| declares(&s.source, name));
        if !declared {
            return -1;
        }
        let Some(recorded) = self.programs.get_mut(&program) else {
            return -1;
        };
        match recorded.locations.iter().position(|n| n == name) {
            Some(location) => location as i32,
            None => {
                recorded.locations.push(name.to_owned());
                recorded.locations.len() as i32 - 1
            }
        }
    }

    fn set_uniform(&mut self, program: ProgramId, location: i32, value: &UniformValue) {
        if location < 0 {
            return;
        }
        match self.programs.get_mut(&program) {
            Some(recorded) if recorded.linked => {
                recorded.values.insert(location, *value);
            }
            _ => self.invalid_operation(format!("uniform upload to unlinked program {program:?}")),
        }
        self.calls.push(GpuCall::SetUniform {
            program,
            location,
            value: *value,
        });
    }

    fn use_program(&mut self, program: Option<ProgramId>) {
        self.program = program;
        self.calls.push(GpuCall::UseProgram(program));
    }

    fn current_program(&self) -> Option<ProgramId> {
        self.program
    }

    fn bind_vertex_array(&mut self, vertex_array: Option<VertexArrayId>) {
        self.vertex_array = vertex_array;
        self.calls.push(GpuCall::BindVertexArray(vertex_array));
    }

    fn current_vertex_array(&self) -> Option<VertexArrayId> {
        self.vertex_array
    }

    fn bind_texture(&mut self, unit: u32, texture: Option<TextureId>) {
        match self.units.get_mut(unit as usize) {
            Some(slot) => *slot = texture,
            None => self.invalid_value(format!("texture unit {unit}")),
        }
        self.calls.push(GpuCall::BindTexture { unit, texture });
    }

    fn bound_texture(&self, unit: u32) -> Option<TextureId> {
        self.units.get(unit as usize).copied().flatten()
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>) {
        self.framebuffer = framebuffer;
        self.calls.push(GpuCall::BindFramebuffer(framebuffer));
    }

    fn current_framebuffer(&self) -> Option<FramebufferId> {
        self.framebuffer
    }

    fn viewport(&self) -> Viewport {
        self.viewport
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
        self.calls.push(GpuCall::SetViewport(viewport));
    }

    fn clear_depth(&mut self) {
        self.calls.push(GpuCall::ClearDepth(self.framebuffer));
    }

    fn draw_range(&mut self, topology: PrimitiveTopology, range: Range<u32>) {
        let (Some(program), Some(vertex_array)) = (self.program, self.vertex_array) else {
            self.invalid_operation("draw without a program and vertex array".to_owned());
            return;
        };
        let index_len = self
            .vertex_arrays
            .get(&vertex_array)
            .and_then(|(_, indices)| self.buffers.get(indices))
            .map(|(_, bytes)| bytes.len() / std::mem::size_of::<u32>());
        match index_len {
            Some(len) if range.start <= range.end && range.end as usize <= len => {}
            _ => self.invalid_value(format!("draw range {range:?} outside the index buffer")),
        }
        if self.programs.get(&program).is_some_and(|p| !p.linked) {
            if self.unlinked_draws.insert(program) {
                log::warn!("skipping draws with unlinked program {program:?}");
            }
            return;
        }
        let uniforms = self.snapshot_uniforms(program);
        self.calls.push(GpuCall::Draw(DrawCall {
            program,
            vertex_array,
            framebuffer: self.framebuffer,
            viewport: self.viewport,
            topology,
            range,
            textures: self.units,
            uniforms,
        }));
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        if self.buffers.remove(&buffer).is_none() {
            self.invalid_value(format!("delete of unknown buffer {buffer:?}"));
        }
        self.calls.push(GpuCall::DeleteBuffer(buffer));
    }

    fn delete_vertex_array(&mut self, vertex_array: VertexArrayId) {
        if self.vertex_arrays.remove(&vertex_array).is_none() {
            self.invalid_value(format!("delete of unknown vertex array {vertex_array:?}"));
        }
        if self.vertex_array == Some(vertex_array) {
            self.vertex_array = None;
        }
        self.calls.push(GpuCall::DeleteVertexArray(vertex_array));
    }

    fn delete_texture(&mut self, texture: TextureId) {
        if self.textures.remove(&texture).is_none() {
            self.invalid_value(format!("delete of unknown texture {texture:?}"));
        }
        for unit in self.units.iter_mut() {
            if *unit == Some(texture) {
                *unit = None;
            }
        }
        self.calls.push(GpuCall::DeleteTexture(texture));
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        if self.framebuffers.remove(&framebuffer).is_none() {
            self.invalid_value(format!("delete of unknown framebuffer {framebuffer:?}"));
        }
        if self.framebuffer == Some(framebuffer) {
            self.framebuffer = None;
        }
        self.calls.push(GpuCall::DeleteFramebuffer(framebuffer));
    }

    fn delete_shader(&mut self, shader: ShaderId) {
        if self.shaders.remove(&shader).is_none() {
            self.invalid_value(format!("delete of unknown shader {shader:?}"));
        }
        self.calls.push(GpuCall::DeleteShader(shader));
    }

    fn delete_program(&mut self, program: ProgramId) {
        if self.programs.remove(&program).is_none() {
            self.invalid_value(format!("delete of unknown program {program:?}"));
        }
        if self.program == Some(program) {
            self.program = None;
        }
        self.calls.push(GpuCall::DeleteProgram(program));
    }

    fn poll_error(&mut self) -> Option<GpuError> {
        self.errors.pop_front()
    }
}
