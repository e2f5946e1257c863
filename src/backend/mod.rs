//! Backend abstraction layer
//!
//! Provides the trait every backend implements, the wgpu backend that draws to a
//! window, and a recording backend that captures commands without a GPU.

pub mod recording;
pub mod traits;
pub mod types;
pub mod wgpu_backend;

pub use traits::*;
pub use types::*;
