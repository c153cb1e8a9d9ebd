//! Core types: math re-exports, Transform, Camera, scene objects and errors.

pub use glam::{EulerRot, Mat4, Quat, Vec3, vec3};

pub mod camera;
pub mod order;
pub mod scene;
pub mod transform;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Unknown {what}: '{value}'")]
    Parse { what: &'static str, value: String },
}
