//! scene-ngin
//!
//! A viewer for large static OBJ scenes. Meshes are imported into one flat
//! vertex/index store, optionally persisted to a binary cache, uploaded to the
//! GPU once and drawn every frame with view-frustum culling and a single
//! directional shadow map.
//!
//! High-level modules
//! - `camera`: free-flying first-person camera
//! - `config`: typed renderer and application settings, read from TOML files
//! - `context`: window surface and wgpu device for the host
//! - `data_structures`: scene, segments, materials, vertices and textures
//! - `flow`: the winit application driving load, upload and the frame loop
//! - `frustum`: view-frustum planes and sphere classification
//! - `gpu`: the GPU device abstraction, a recording fake and the wgpu backend
//! - `loader`: background scene loading and cache writing
//! - `pipelines`: wgpu render pipelines and bind group layouts
//! - `render`: the renderer state machine and its two-pass frame
//! - `resources`: mesh import, texture decoding and the binary cache
//! - `upload`: moving a built scene into GPU objects

/// Log at info level when `$verbose` is set, at debug level otherwise.
macro_rules! progress {
    ($verbose:expr, $($arg:tt)+) => {
        if $verbose {
            log::info!($($arg)+)
        } else {
            log::debug!($($arg)+)
        }
    };
}

pub mod camera;
pub mod config;
pub mod context;
pub mod data_structures;
pub mod flow;
pub mod frustum;
pub mod gpu;
pub mod loader;
pub mod pipelines;
pub mod render;
pub mod resources;
pub mod upload;

pub use camera::Camera;
pub use config::{AppConfig, RendererConfig};
pub use data_structures::scene::Scene;
pub use flow::run;
pub use render::{FrameStats, RenderError, Renderer};
