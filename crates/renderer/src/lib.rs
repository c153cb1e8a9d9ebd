//! Renderer: draw-order sorting, the GL device adapter and its wgpu host
//! context.

pub mod coherence;
pub mod device;
pub mod gl;
pub mod sort;

pub use coherence::{Sequence, insertion_sort, is_sorted};
pub use device::{
    Bounds, Completion, DebugSink, Device, DeviceConfig, DeviceError, DeviceResult, ExecState,
    Executor, FrameEvent, HostContext, Pass,
};
pub use gl::{DrawItem, GlContext, MAX_DRAWS};
pub use corelib::order::DepthOrder;
pub use sort::{ByDist, ByState, heap_sort};
