//! The GPU resource interface.
//!
//! Everything that touches the graphics device goes through [`Gpu`]. The
//! trait makes the device's binding state explicit: a program, a vertex
//! array, a framebuffer, a viewport and two texture units are "current", and
//! draws read from whatever is current. [`Scoped`] guards bind something for
//! the length of a scope and put the previous binding back when dropped, so
//! a pass cannot leak its bindings into the next one.
//!
//! [`recording::RecordingGpu`] is an in-memory implementation used in tests,
//! [`wgpu_backend::WgpuGpu`] draws for real.

use std::ops::{Deref, DerefMut, Range};

use thiserror::Error;

use crate::data_structures::{
    model::{PrimitiveTopology, VertexLayout},
    texture::Texture,
};

pub mod program;
pub mod recording;
pub mod wgpu_backend;

pub use program::{Program, Shader, Uniform, UniformBinder, UniformValue};

/// More driver errors than this in one sweep ends the process.
pub const MAX_ERRORS_PER_SWEEP: usize = 10;

macro_rules! gpu_id {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub u32);
        )*
    };
}

gpu_id!(
    BufferId,
    VertexArrayId,
    /// Never zero; zero means "unbound" in the binary cache.
    TextureId,
    FramebufferId,
    ShaderId,
    ProgramId,
);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BufferKind {
    Vertex,
    Index,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum GpuError {
    #[error("INVALID_OPERATION: {0}")]
    InvalidOperation(String),
    #[error("INVALID_VALUE: {0}")]
    InvalidValue(String),
    #[error("INVALID_FRAMEBUFFER_OPERATION: {0}")]
    InvalidFramebuffer(String),
    #[error("OUT_OF_MEMORY: {0}")]
    OutOfMemory(String),
    #[error("VALIDATION: {0}")]
    Validation(String),
}

/// Too many driver errors in a single sweep; continuing would render garbage.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{count} graphics errors at {site}, giving up")]
pub struct GpuFatal {
    pub site: String,
    pub count: usize,
}

/// A graphics device with explicit binding state.
///
/// Resource handles are plain ids; the implementation owns the resources and
/// releases them through the `delete_*` calls. Ids are never reused.
pub trait Gpu {
    fn create_buffer(&mut self, kind: BufferKind, label: &str, contents: &[u8]) -> BufferId;
    fn create_vertex_array(
        &mut self,
        vertices: BufferId,
        indices: BufferId,
        layout: &VertexLayout,
    ) -> VertexArrayId;
    fn create_texture(&mut self, label: &str, texture: &Texture) -> TextureId;
    /// A depth-only render target and the depth texture it renders into. Colour writes are disabled.
    fn create_depth_framebuffer(&mut self, width: u32, height: u32) -> (FramebufferId, TextureId);
    /// `Err` carries the compile log.
    fn create_shader(&mut self, stage: ShaderStage, label: &str, source: &str) -> Result<ShaderId, String>;
    fn create_program(&mut self, label: &str) -> ProgramId;
    fn attach_shader(&mut self, program: ProgramId, shader: ShaderId);
    /// `Err` carries the link info log.
    fn link_program(&mut self, program: ProgramId) -> Result<(), String>;

    /// Location of a uniform in a linked program, or -1 if it is not active.
    fn uniform_location(&mut self, program: ProgramId, name: &str) -> i32;
    /// Store a uniform value. Location -1 is ignored.
    fn set_uniform(&mut self, program: ProgramId, location: i32, value: &UniformValue);

    fn use_program(&mut self, program: Option<ProgramId>);
    fn current_program(&self) -> Option<ProgramId>;
    fn bind_vertex_array(&mut self, vertex_array: Option<VertexArrayId>);
    fn current_vertex_array(&self) -> Option<VertexArrayId>;
    fn bind_texture(&mut self, unit: u32, texture: Option<TextureId>);
    fn bound_texture(&self, unit: u32) -> Option<TextureId>;
    /// `None` is the screen.
    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>);
    fn current_framebuffer(&self) -> Option<FramebufferId>;
    fn viewport(&self) -> Viewport;
    fn set_viewport(&mut self, viewport: Viewport);

    /// Clear the depth attachment of the current framebuffer.
    fn clear_depth(&mut self);
    /// Draw `range` of the bound vertex array's index buffer with the current program.
    fn draw_range(&mut self, topology: PrimitiveTopology, range: Range<u32>);

    fn delete_buffer(&mut self, buffer: BufferId);
    fn delete_vertex_array(&mut self, vertex_array: VertexArrayId);
    fn delete_texture(&mut self, texture: TextureId);
    fn delete_framebuffer(&mut self, framebuffer: FramebufferId);
    fn delete_shader(&mut self, shader: ShaderId);
    fn delete_program(&mut self, program: ProgramId);

    /// Pop the oldest queued driver error.
    fn poll_error(&mut self) -> Option<GpuError>;
}

/// Drain the error queue, logging every error against `site`.
///
/// Returns how many errors were drained, or [`GpuFatal`] as soon as one sweep
/// has seen more than [`MAX_ERRORS_PER_SWEEP`].
pub fn check_errors<G: Gpu + ?Sized>(gpu: &mut G, site: &str) -> Result<usize, GpuFatal> {
    let mut count = 0;
    while let Some(error) = gpu.poll_error() {
        count += 1;
        log::error!("GL_{error} - {site}");
        if count > MAX_ERRORS_PER_SWEEP {
            log::error!("more than {MAX_ERRORS_PER_SWEEP} graphics errors at {site}");
            return Err(GpuFatal {
                site: site.to_owned(),
                count,
            });
        }
    }
    Ok(count)
}

#[derive(Copy, Clone, Debug)]
enum Restore {
    Program(Option<ProgramId>),
    VertexArray(Option<VertexArrayId>),
    Framebuffer(Option<FramebufferId>),
    Viewport(Viewport),
}

/// A binding that lasts until the guard is dropped.
///
/// The guard dereferences to the device so that work inside the scope goes
/// through it, and guards nest.
pub struct Scoped<'a, G: Gpu + ?Sized> {
    gpu: &'a mut G,
    restore: Restore,
}

impl<G: Gpu + ?Sized> Deref for Scoped<'_, G> {
    type Target = G;

    fn deref(&self) -> &G {
        self.gpu
    }
}

impl<G: Gpu + ?Sized> DerefMut for Scoped<'_, G> {
    fn deref_mut(&mut self) -> &mut G {
        self.gpu
    }
}

impl<G: Gpu + ?Sized> Drop for Scoped<'_, G> {
    fn drop(&mut self) {
        match self.restore {
            Restore::Program(prior) => self.gpu.use_program(prior),
            Restore::VertexArray(prior) => self.gpu.bind_vertex_array(prior),
            Restore::Framebuffer(prior) => self.gpu.bind_framebuffer(prior),
            Restore::Viewport(prior) => self.gpu.set_viewport(prior),
        }
    }
}

pub fn with_program<G: Gpu + ?Sized>(gpu: &mut G, program: ProgramId) -> Scoped<'_, G> {
    let prior = gpu.current_program();
    gpu.use_program(Some(program));
    Scoped {
        gpu,
        restore: Restore::Program(prior),
    }
}

pub fn with_vertex_array<G: Gpu + ?Sized>(gpu: &mut G, vertex_array: VertexArrayId) -> Scoped<'_, G> {
    let prior = gpu.current_vertex_array();
    gpu.bind_vertex_array(Some(vertex_array));
    Scoped {
        gpu,
        restore: Restore::VertexArray(prior),
    }
}

pub fn with_framebuffer<G: Gpu + ?Sized>(gpu: &mut G, framebuffer: FramebufferId) -> Scoped<'_, G> {
    let prior = gpu.current_framebuffer();
    gpu.bind_framebuffer(Some(framebuffer));
    Scoped {
        gpu,
        restore: Restore::Framebuffer(prior),
    }
}

pub fn with_viewport<G: Gpu + ?Sized>(gpu: &mut G, viewport: Viewport) -> Scoped<'_, G> {
    let prior = gpu.viewport();
    gpu.set_viewport(viewport);
    Scoped {
        gpu,
        restore: Restore::Viewport(prior),
    }
}

#[cfg(test)]
mod tests {
    use super::recording::RecordingGpu;
    use super::*;

    #[test]
    fn guards_restore_in_reverse_order() {
        let mut gpu = RecordingGpu::new(800, 600);
        let (fb, _) = gpu.create_depth_framebuffer(64, 64);
        let program = gpu.create_program("p");
        {
            let mut target = with_framebuffer(&mut gpu, fb);
            let mut viewport = with_viewport(&mut *target, Viewport::new(64, 64));
            let active = with_program(&mut *viewport, program);
            assert_eq!(active.current_framebuffer(), Some(fb));
            assert_eq!(active.viewport(), Viewport::new(64, 64));
            assert_eq!(active.current_program(), Some(program));
        }
        assert_eq!(gpu.current_framebuffer(), None);
        assert_eq!(gpu.viewport(), Viewport::new(800, 600));
        assert_eq!(gpu.current_program(), None);
    }

    #[test]
    fn sweep_counts_and_gives_up() {
        let mut gpu = RecordingGpu::new(1, 1);
        gpu.inject_error(GpuError::InvalidValue("a".into()));
        gpu.inject_error(GpuError::InvalidOperation("b".into()));
        assert_eq!(check_errors(&mut gpu, "test"), Ok(2));
        assert_eq!(check_errors(&mut gpu, "test"), Ok(0));

        for i in 0..=MAX_ERRORS_PER_SWEEP {
            gpu.inject_error(GpuError::InvalidValue(i.to_string()));
        }
        let fatal = check_errors(&mut gpu, "upload").unwrap_err();
        assert_eq!(fatal.count, MAX_ERRORS_PER_SWEEP + 1);
        assert_eq!(fatal.site, "upload");
    }

    #[test]
    fn exactly_the_limit_is_survivable() {
        let mut gpu = RecordingGpu::new(1, 1);
        for i in 0..MAX_ERRORS_PER_SWEEP {
            gpu.inject_error(GpuError::InvalidValue(i.to_string()));
        }
        assert_eq!(check_errors(&mut gpu, "frame"), Ok(MAX_ERRORS_PER_SWEEP));
    }
}
