//! Asset loading (shaders, textures).
//! Shaders are GLSL pairs and may be memoized by path; textures are
//! decoded fresh on every call.

pub mod error;
pub mod shader;
pub mod texture;

pub use error::{AssetError, AssetResult};
pub use shader::{CachePolicy, Shader, ShaderLoader, load_shader};
pub use texture::{Filter, Rect, Texture, TextureFormat, load_texture, load_texture_from_reader};
