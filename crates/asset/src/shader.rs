//! GLSL shader pairs (`<base>.vert` + `<base>.frag`) and the shader loader.

use std::{
    collections::HashMap,
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::Mutex;

use crate::error::{AssetError, AssetResult};

pub const VERTEX_SUFFIX: &str = ".vert";
pub const FRAGMENT_SUFFIX: &str = ".frag";

/// Named vertex/fragment source pair. Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Shader {
    name: String,
    vertex: Vec<u8>,
    fragment: Vec<u8>,
}

impl Shader {
    pub fn new(name: impl Into<String>, vertex: Vec<u8>, fragment: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            vertex,
            fragment,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vertex_source(&self) -> &[u8] {
        &self.vertex
    }

    pub fn fragment_source(&self) -> &[u8] {
        &self.fragment
    }

    /// Vertex source as text, lossy on invalid UTF-8.
    pub fn vertex_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.vertex)
    }

    /// Fragment source as text, lossy on invalid UTF-8.
    pub fn fragment_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.fragment)
    }
}

/// `base` with `suffix` appended to the whole string. Unlike
/// `Path::with_extension` this keeps dots already present in the base.
fn suffixed(base: &Path, suffix: &str) -> PathBuf {
    let mut s = OsString::from(base.as_os_str());
    s.push(suffix);
    PathBuf::from(s)
}

fn read(path: PathBuf) -> AssetResult<Vec<u8>> {
    fs::read(&path).map_err(|e| AssetError::io(path, e))
}

/// Read `<base>.vert` and `<base>.frag` into a new shader named after the
/// last component of `base`.
pub fn load_shader(base: impl AsRef<Path>) -> AssetResult<Shader> {
    let base = base.as_ref();
    log::info!("Loading shader {:?}", base);

    let vertex = read(suffixed(base, VERTEX_SUFFIX))?;
    let fragment = read(suffixed(base, FRAGMENT_SUFFIX))?;

    let name = base
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| base.to_string_lossy().into_owned());

    log::debug!(
        "Loaded shader '{}' ({} + {} bytes)",
        name,
        vertex.len(),
        fragment.len()
    );
    Ok(Shader::new(name, vertex, fragment))
}

/// Whether a [`ShaderLoader`] keeps what it loads.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CachePolicy {
    /// Every call reads from disk and returns a new shader.
    Uncached,
    /// First successful load per base path is kept for the loader's lifetime.
    #[default]
    Memoize,
}

/// Shader loader with an optional memo table keyed by the exact base-path
/// string. Entries are never evicted; failures are never stored.
///
/// The table lock is not held across file reads. When two threads miss on
/// the same key at once both read the files, the first insert wins and
/// both get that shader back.
#[derive(Debug, Default)]
pub struct ShaderLoader {
    policy: CachePolicy,
    entries: Mutex<HashMap<String, Arc<Shader>>>,
}

impl ShaderLoader {
    pub fn new(policy: CachePolicy) -> Self {
        Self {
            policy,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn cached() -> Self {
        Self::new(CachePolicy::Memoize)
    }

    pub fn uncached() -> Self {
        Self::new(CachePolicy::Uncached)
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    pub fn load(&self, base: &str) -> AssetResult<Arc<Shader>> {
        if self.policy == CachePolicy::Uncached {
            return load_shader(base).map(Arc::new);
        }

        if let Some(hit) = self.entries.lock().get(base) {
            log::debug!("Shader cache hit: {}", base);
            return Ok(Arc::clone(hit));
        }

        let shader = Arc::new(load_shader(base)?);
        let mut entries = self.entries.lock();
        let entry = entries.entry(base.to_owned()).or_insert(shader);
        Ok(Arc::clone(entry))
    }

    /// Cached shader for `base`, without touching the disk.
    pub fn get(&self, base: &str) -> Option<Arc<Shader>> {
        self.entries.lock().get(base).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
