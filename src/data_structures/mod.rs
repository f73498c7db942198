//! Scene data structures: names, models, textures and the scene aggregate.
//!
//! - `name` holds the fixed-capacity strings every on-disk record uses
//! - `model` contains vertices, materials and segments
//! - `texture` contains decoded pixel buffers and the GPU texture wrapper
//! - `scene` is the aggregate the renderer owns, and the builder that flattens it

pub mod model;
pub mod name;
pub mod scene;
pub mod texture;
