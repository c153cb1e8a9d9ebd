//! Platform layer: window, event loop, and a demo scene rendered through
//! the GL device.
//!
//! - Native: the GL context lives on the device thread; this thread only
//!   sorts and submits.
//! - Browser (wasm32): the WebGL2 context is bound to the page's thread,
//!   so the device is attached and its executor is pumped after every
//!   submission.
//! - One frame in flight: a new frame is submitted once the previous one
//!   has run.
//! - The draw list keeps last frame's order so re-sorting is cheap.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
#[cfg(target_arch = "wasm32")]
use std::{cell::RefCell, rc::Rc};

use instant::Instant;

use anyhow::{Context, Result, anyhow};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

use asset::{Shader, Texture};
use corelib::{
    Mat4, Vec3,
    camera::Camera,
    order::DrawOrder,
    scene::{GraphicsState, Scene, SharedNode},
    transform::Transform,
    vec3,
};
use renderer::{
    Bounds, ByDist, ByState, Completion, Device, DeviceConfig, DrawItem, FrameEvent, GlContext,
    insertion_sort,
};
#[cfg(target_arch = "wasm32")]
use renderer::{ExecState, Executor};
#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;

/// Demo settings, filled from the command line by `app`.
#[derive(Clone, Debug)]
pub struct DemoOptions {
    pub width: u32,
    pub height: u32,
    pub objects: usize,
    pub order: DrawOrder,
    /// Shader base path, without `.vert` / `.frag`.
    pub shader: String,
    /// Image decoded at startup; a checkerboard when absent.
    pub texture: Option<PathBuf>,
    pub queue_capacity: Option<usize>,
}

impl Default for DemoOptions {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            objects: 64,
            order: DrawOrder::BackToFront,
            shader: "assets/shaders/basic".to_string(),
            texture: None,
            queue_capacity: Some(4),
        }
    }
}

const PALETTE: [[f32; 4]; 4] = [
    [1.0, 0.45, 0.4, 0.65],
    [0.4, 0.9, 0.5, 0.65],
    [0.4, 0.6, 1.0, 0.65],
    [1.0, 0.9, 0.4, 0.65],
];

fn material_tint(material: u32) -> [f32; 4] {
    PALETTE[material as usize % PALETTE.len()]
}

/// Ring of small cubes; every third one hangs off a raised parent so the
/// sorters see non-trivial world positions.
pub fn build_scene(objects: usize) -> Scene {
    let mut scene = Scene::new();
    let parent = Mat4::from_translation(vec3(0.0, 1.5, 0.0));
    for i in 0..objects {
        let angle = i as f32 / objects.max(1) as f32 * std::f32::consts::TAU;
        let radius = 2.0 + (i % 4) as f32 * 0.75;
        let mut transform = Transform::from_trs(
            vec3(radius * angle.cos(), 0.0, radius * angle.sin()),
            Vec3::ZERO,
            Vec3::splat(0.25),
        );
        if i % 3 == 0 {
            transform = transform.with_parent(parent);
        }
        let state = GraphicsState::new(0, (i % 3) as u32, (i % PALETTE.len()) as u32);
        scene.spawn(transform, state);
    }
    scene
}

/// Re-sort `list` in place for this frame. Returns the swap count.
pub fn sort_draw_list(list: &mut [SharedNode], order: DrawOrder, eye: Vec3) -> usize {
    match order.depth() {
        Some(depth) => insertion_sort(&mut ByDist::new(list, eye).with_order(depth)),
        None => insertion_sort(&mut ByState::new(list)),
    }
}

/// Copy what the GPU needs out of each node, one read lock per node.
pub fn draw_items(list: &[SharedNode]) -> Vec<DrawItem> {
    list.iter()
        .map(|node| {
            let node = node.read();
            DrawItem {
                model: node.transform.world_matrix(),
                tint: material_tint(node.state.material),
            }
        })
        .collect()
}

const FALLBACK_TEXTURE_SIZE: u32 = 64;

/// Decode `path`, or build the checkerboard placeholder.
pub fn demo_texture(path: Option<&Path>) -> Result<Texture> {
    let texture = match path {
        Some(path) => asset::load_texture(path)?,
        None => Texture::checkerboard(FALLBACK_TEXTURE_SIZE),
    };
    log::info!(
        "Texture {}: {}x{}, min {:?}, mag {:?}, format {:?}",
        path.map_or_else(|| "<checkerboard>".into(), |p| p.display().to_string()),
        texture.width(),
        texture.height(),
        texture.min_filter,
        texture.mag_filter,
        texture.format
    );
    Ok(texture)
}

#[cfg(not(target_arch = "wasm32"))]
fn demo_shader(options: &DemoOptions) -> Result<Arc<Shader>> {
    asset::ShaderLoader::cached()
        .load(&options.shader)
        .with_context(|| format!("Failed to load shader '{}'", options.shader))
}

/// No filesystem in the browser: the default pair is compiled in.
#[cfg(target_arch = "wasm32")]
fn demo_shader(_options: &DemoOptions) -> Result<Arc<Shader>> {
    Ok(Arc::new(Shader::new(
        "basic",
        include_bytes!("../../../assets/shaders/basic.vert").to_vec(),
        include_bytes!("../../../assets/shaders/basic.frag").to_vec(),
    )))
}

/// Open a window and render the demo scene until it is closed.
#[cfg(not(target_arch = "wasm32"))]
pub fn run_demo(options: DemoOptions) -> Result<()> {
    let shader = demo_shader(&options)?;
    demo_texture(options.texture.as_deref())?;

    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    event_loop.set_control_flow(ControlFlow::Wait);

    let mut app = DemoApp::new(options, shader);
    event_loop
        .run_app(&mut app)
        .context("Event loop error")?;

    match app.error.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Hand the demo to the browser's event loop. Returns immediately; later
/// failures are logged.
#[cfg(target_arch = "wasm32")]
pub fn run_demo(options: DemoOptions) -> Result<()> {
    use winit::platform::web::EventLoopExtWebSys;

    let shader = demo_shader(&options)?;
    demo_texture(options.texture.as_deref())?;

    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    event_loop.set_control_flow(ControlFlow::Wait);
    event_loop.spawn_app(DemoApp::new(options, shader));
    Ok(())
}

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen(start)]
pub fn start() -> Result<(), JsValue> {
    std::panic::set_hook(Box::new(console_error_panic_hook::hook));
    console_log::init_with_level(log::Level::Info)
        .map_err(|e| JsValue::from_str(&e.to_string()))?;
    log::info!("Starting Svarog3D - WebAssembly");

    run_demo(DemoOptions::default()).map_err(|e| JsValue::from_str(&format!("{e:#}")))
}

struct DemoApp {
    options: DemoOptions,
    shader: Arc<Shader>,
    window: Option<Arc<Window>>,
    device: Option<Device<GlContext>>,
    #[cfg(target_arch = "wasm32")]
    executor: Option<Executor<GlContext>>,
    /// Context created asynchronously, waiting to be attached.
    #[cfg(target_arch = "wasm32")]
    ready: Rc<RefCell<Option<Result<GlContext>>>>,
    in_flight: Option<Completion>,
    scene: Scene,
    draw_list: Vec<SharedNode>,
    camera: Camera,
    start: Instant,
    last_frame: Instant,
    error: Option<anyhow::Error>,
}

impl DemoApp {
    fn new(options: DemoOptions, shader: Arc<Shader>) -> Self {
        let scene = build_scene(options.objects);
        let draw_list = scene.draw_list();
        let aspect = options.width.max(1) as f32 / options.height.max(1) as f32;
        let now = Instant::now();
        log::info!(
            "Demo scene: {} objects, order={}",
            scene.len(),
            options.order
        );
        Self {
            options,
            shader,
            window: None,
            device: None,
            #[cfg(target_arch = "wasm32")]
            executor: None,
            #[cfg(target_arch = "wasm32")]
            ready: Rc::new(RefCell::new(None)),
            in_flight: None,
            scene,
            draw_list,
            camera: Camera::orbiting(Vec3::ZERO, 9.0, 3.0, 0.0, aspect),
            start: now,
            last_frame: now,
            error: None,
        }
    }

    fn device_config(&self) -> DeviceConfig {
        DeviceConfig {
            queue_capacity: self.options.queue_capacity,
            ..DeviceConfig::default()
        }
    }

    fn open(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attrs = Window::default_attributes()
            .with_title("Svarog3D")
            .with_inner_size(PhysicalSize::new(self.options.width, self.options.height));
        #[cfg(target_arch = "wasm32")]
        let attrs = {
            use winit::platform::web::WindowAttributesExtWebSys;
            attrs.with_append(true)
        };
        let window = Arc::new(
            event_loop
                .create_window(attrs)
                .map_err(|e| anyhow!("Failed to create window: {e}"))?,
        );
        let size = window.inner_size();
        log::info!("Window created: {}x{}", size.width, size.height);

        self.start_device(&window)?;

        self.camera.set_viewport(size.width, size.height);
        window.request_redraw();
        self.window = Some(window);
        Ok(())
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn start_device(&mut self, window: &Arc<Window>) -> Result<()> {
        let shader = Arc::clone(&self.shader);
        let target = Arc::clone(window);
        let device = Device::spawn(&self.device_config(), move || {
            pollster::block_on(GlContext::new(target, &shader))
        })?;
        device.set_debug_output(Some(Box::new(std::io::stderr())))?;
        self.device = Some(device);
        Ok(())
    }

    #[cfg(target_arch = "wasm32")]
    fn start_device(&mut self, window: &Arc<Window>) -> Result<()> {
        let shader = Arc::clone(&self.shader);
        let target = Arc::clone(window);
        let ready = Rc::clone(&self.ready);
        wasm_bindgen_futures::spawn_local(async move {
            let context = GlContext::new(target, &shader).await;
            *ready.borrow_mut() = Some(context);
        });
        Ok(())
    }

    /// Attach the context once its async construction finished.
    #[cfg(target_arch = "wasm32")]
    fn attach_ready_context(&mut self) -> Result<()> {
        if self.device.is_some() {
            return Ok(());
        }
        let Some(context) = self.ready.borrow_mut().take() else {
            return Ok(());
        };
        let (device, executor) = Device::attached(context?, &self.device_config());
        log::info!("WebGL device attached");
        self.device = Some(device);
        self.executor = Some(executor);
        Ok(())
    }

    /// Run what was just submitted. The device thread does this natively.
    fn pump(&mut self) {
        #[cfg(target_arch = "wasm32")]
        if let Some(executor) = self.executor.as_mut() {
            if executor.run_pending() == ExecState::Finished {
                log::info!("WebGL device finished");
                self.executor = None;
            }
        }
    }

    fn frame(&mut self) -> Result<()> {
        #[cfg(target_arch = "wasm32")]
        self.attach_ready_context()?;

        let Some(device) = self.device.as_ref() else {
            return Ok(());
        };

        for event in device.events().try_iter() {
            let FrameEvent::Presented { frame } = event;
            if frame % 600 == 0 {
                log::info!("{frame} frames presented");
            }
        }

        if let Some(previous) = self.in_flight.take() {
            if previous.try_result()?.is_none() {
                self.in_flight = Some(previous);
                return Ok(());
            }
        }

        let now = Instant::now();
        let dt = (now - self.last_frame).as_secs_f32();
        self.last_frame = now;

        self.scene.system_rotate_all(dt, [0.3, 0.7, 0.0]);
        self.camera
            .set_orbit_angle(self.start.elapsed().as_secs_f32() * 0.2);

        let swaps = sort_draw_list(&mut self.draw_list, self.options.order, self.camera.position());
        log::trace!("Draw list re-sorted with {swaps} swaps");

        let draws = draw_items(&self.draw_list);
        let view_proj = self.camera.proj_view();
        let completion = device.exec(move |ctx: &mut GlContext| ctx.render(view_proj, &draws))?;
        self.in_flight = Some(completion);
        self.pump();
        Ok(())
    }

    fn resize(&mut self, size: PhysicalSize<u32>) -> Result<()> {
        log::info!("Resized: {}x{}", size.width, size.height);
        self.camera.set_viewport(size.width, size.height);
        if let Some(device) = &self.device {
            device.update_bounds(Bounds::from_size(size.width, size.height))?;
        }
        self.pump();
        Ok(())
    }

    fn shutdown(&mut self) {
        self.in_flight = None;
        if let Some(device) = self.device.take() {
            if let Err(e) = device.destroy() {
                log::error!("Device shutdown failed: {e}");
            }
        }
        self.pump();
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        log::error!("{err:#}");
        self.error.get_or_insert(err);
        self.shutdown();
        event_loop.exit();
    }
}

impl ApplicationHandler for DemoApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        if let Err(e) = self.open(event_loop) {
            self.fail(event_loop, e);
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let result = match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested. Exiting event loop.");
                self.shutdown();
                event_loop.exit();
                Ok(())
            }
            WindowEvent::Resized(size) => self.resize(size),
            WindowEvent::RedrawRequested => self.frame(),
            _ => Ok(()),
        };
        if let Err(e) = result {
            self.fail(event_loop, e);
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scene_has_requested_size_and_parents() {
        let scene = build_scene(9);
        assert_eq!(scene.len(), 9);
        let raised = scene
            .nodes()
            .iter()
            .filter(|n| n.read().transform.world_position().y > 1.0)
            .count();
        assert_eq!(raised, 3);
    }

    #[test]
    fn second_sort_of_a_still_scene_is_free() {
        let scene = build_scene(32);
        let mut list = scene.draw_list();
        let eye = vec3(9.0, 3.0, 0.0);
        for order in [DrawOrder::BackToFront, DrawOrder::FrontToBack, DrawOrder::State] {
            sort_draw_list(&mut list, order, eye);
            assert_eq!(sort_draw_list(&mut list, order, eye), 0, "{order}");
        }
    }

    #[test]
    fn back_to_front_draw_items_get_nearer() {
        let scene = build_scene(16);
        let mut list = scene.draw_list();
        let eye = vec3(0.0, 0.0, 12.0);
        sort_draw_list(&mut list, DrawOrder::BackToFront, eye);

        let items = draw_items(&list);
        let dists: Vec<f32> = items
            .iter()
            .map(|item| item.model.transform_point3(Vec3::ZERO).distance_squared(eye))
            .collect();
        assert!(dists.windows(2).all(|w| w[0] >= w[1] - 1e-4));
    }

    #[test]
    fn missing_texture_falls_back_to_checkerboard() {
        let texture = demo_texture(None).unwrap();
        assert_eq!(texture.width(), FALLBACK_TEXTURE_SIZE);
        assert_eq!(texture.height(), FALLBACK_TEXTURE_SIZE);
        assert!(texture.is_valid());

        assert!(demo_texture(Some(Path::new("no/such/texture.png"))).is_err());
    }

    #[test]
    fn tint_follows_material() {
        let scene = build_scene(4);
        let items = draw_items(scene.nodes());
        for (i, item) in items.iter().enumerate() {
            assert_eq!(item.tint, PALETTE[i % PALETTE.len()]);
        }
    }
}
