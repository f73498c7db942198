//! The viewer application and its event loop.
//!
//! Each frame the loop:
//! 1. moves and aims the camera from the held keys and mouse motion
//! 2. polls the background scene load and uploads the scene once it is there
//! 3. renders the shadow and lit passes
//! 4. presents the frame
//!
//! `W`/`S`/`A`/`D` and the arrow keys move, dragging with the right mouse
//! button looks around, `1` and `2` turn shadows on and off, `Escape` quits.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::Arc,
};

use instant::Instant;
use winit::{
    application::ApplicationHandler,
    event::{DeviceEvent, DeviceId, ElementState, MouseButton, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

use crate::{
    camera::Camera,
    config::AppConfig,
    context::Context,
    loader::{SceneLoad, SceneRequest},
    render::Renderer,
};

/// What a held key does to the camera.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Movement {
    Forward,
    Backward,
    Left,
    Right,
}

fn movement(key: KeyCode) -> Option<Movement> {
    match key {
        KeyCode::KeyW | KeyCode::ArrowUp => Some(Movement::Forward),
        KeyCode::KeyS | KeyCode::ArrowDown => Some(Movement::Backward),
        KeyCode::KeyA | KeyCode::ArrowLeft => Some(Movement::Left),
        KeyCode::KeyD | KeyCode::ArrowRight => Some(Movement::Right),
        _ => None,
    }
}

/// Move by `distance` for every held movement key, then keep the camera above `ground`.
fn move_camera(camera: &mut Camera, held: &HashSet<KeyCode>, distance: f32, ground: Option<f32>) {
    for key in held {
        match movement(*key) {
            Some(Movement::Forward) => camera.move_forward(distance),
            Some(Movement::Backward) => camera.move_backward(distance),
            Some(Movement::Left) => camera.move_left(distance),
            Some(Movement::Right) => camera.move_right(distance),
            None => {}
        }
    }
    if let Some(ground) = ground
        && camera.position.y < ground
    {
        camera.position.y = ground;
    }
    camera.update();
}

struct AppState {
    ctx: Context,
    renderer: Renderer,
    load: Option<SceneLoad>,
}

pub struct App {
    config: AppConfig,
    model_file: String,
    state: Option<AppState>,
    camera: Camera,
    held: HashSet<KeyCode>,
    aiming: bool,
    last_time: Instant,
    failure: Option<anyhow::Error>,
}

impl App {
    pub fn new(config: AppConfig, model_file: impl Into<String>) -> Self {
        let camera = Camera::at(config.camera_position(), config.window_width, config.window_height);
        Self {
            config,
            model_file: model_file.into(),
            state: None,
            camera,
            held: HashSet::new(),
            aiming: false,
            last_time: Instant::now(),
            failure: None,
        }
    }

    fn scene_request(&self) -> SceneRequest {
        SceneRequest {
            model_path: self.config.roots.model(&self.model_file),
            cache_path: self
                .config
                .use_cache
                .then(|| self.config.roots.cache_file(&self.model_file)),
            model_transform: self.config.model_transform(),
            verbose: self.config.renderer.verbose,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("{error:#}");
        self.failure = Some(error);
        event_loop.exit();
    }

    fn start(&mut self, event_loop: &ActiveEventLoop) -> anyhow::Result<AppState> {
        let window_attributes = Window::default_attributes()
            .with_title("Loading")
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window_width,
                self.config.window_height,
            ));
        let window = Arc::new(event_loop.create_window(window_attributes)?);
        let ctx = futures::executor::block_on(Context::new(window, self.config.renderer.clear_colour))?;

        let mut renderer = Renderer::new(self.config.renderer.clone(), self.config.roots.clone());
        renderer.set_cache_path(self.config.roots.cache_file(&self.model_file));
        let load = SceneLoad::spawn(self.scene_request())?;

        let size = ctx.window.inner_size();
        self.camera.resize(size.width, size.height);
        Ok(AppState {
            ctx,
            renderer,
            load: Some(load),
        })
    }

    /// Upload the scene as soon as the loader hands it over.
    fn poll_load(&mut self, event_loop: &ActiveEventLoop) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        let Some(result) = state.load.as_mut().and_then(SceneLoad::poll) else {
            return;
        };
        state.load = None;

        let loaded = match result {
            Ok(loaded) => loaded,
            Err(e) => return self.fail(event_loop, e.context("Unable to load scene")),
        };
        let from_cache = loaded.from_cache;
        state.renderer.install(loaded.scene, from_cache);
        if let Err(e) = state.renderer.upload_to_gpu(&mut state.ctx.gpu, &self.camera, from_cache) {
            return self.fail(event_loop, e);
        }
        state.ctx.window.set_title(&self.config.window_title);
        if self.config.close_on_load {
            log::info!("scene loaded, closing");
            event_loop.exit();
        }
    }

    fn frame(&mut self, event_loop: &ActiveEventLoop) {
        let dt = self.last_time.elapsed().as_secs_f32();
        self.last_time = Instant::now();
        move_camera(
            &mut self.camera,
            &self.held,
            dt * self.config.camera_speed,
            self.config.ground_level,
        );

        self.poll_load(event_loop);

        let Some(state) = self.state.as_mut() else {
            return;
        };
        state.ctx.gpu.begin_frame();
        if state.renderer.is_uploaded() {
            match state.renderer.render(&mut state.ctx.gpu, &self.camera) {
                Ok(stats) => log::trace!("{stats:?}"),
                Err(e) => return self.fail(event_loop, e.into()),
            }
        }

        match state.ctx.present() {
            Ok(()) => {}
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                let size = state.ctx.window.inner_size();
                state.ctx.resize(size.width, size.height);
            }
            Err(e) => log::error!("Unable to render {e}"),
        }
    }

    fn key(&mut self, event_loop: &ActiveEventLoop, code: KeyCode, pressed: bool) {
        if !pressed {
            self.held.remove(&code);
            return;
        }
        match code {
            KeyCode::Escape => event_loop.exit(),
            KeyCode::Digit1 => {
                if let Some(state) = self.state.as_mut() {
                    state.renderer.enable_shadows();
                }
            }
            KeyCode::Digit2 => {
                if let Some(state) = self.state.as_mut() {
                    state.renderer.disable_shadows();
                }
            }
            code if movement(code).is_some() => {
                self.held.insert(code);
            }
            _ => {}
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }
        match self.start(event_loop) {
            Ok(state) => {
                state.ctx.window.request_redraw();
                self.state = Some(state);
            }
            Err(e) => self.fail(event_loop, e.context("App initialization failed")),
        }
    }

    fn device_event(&mut self, _event_loop: &ActiveEventLoop, _device_id: DeviceId, event: DeviceEvent) {
        if let DeviceEvent::MouseMotion { delta: (dx, dy) } = event
            && self.aiming
        {
            let speed = self.config.mouse_speed as f64;
            self.camera.aim((-dx * speed) as f32, (-dy * speed) as f32);
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(size) => {
                if let Some(state) = self.state.as_mut()
                    && state.ctx.resize(size.width, size.height)
                {
                    self.camera.resize(size.width, size.height);
                    if let Some(resources) = state.renderer.gpu_scene() {
                        log::debug!("resized with {} textures on the GPU", resources.textures.len());
                    }
                }
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(code) = event.physical_key
                    && !event.repeat
                {
                    self.key(event_loop, code, event.state == ElementState::Pressed);
                }
            }
            WindowEvent::MouseInput {
                state: button_state,
                button: MouseButton::Right,
                ..
            } => self.aiming = button_state.is_pressed(),
            WindowEvent::RedrawRequested => self.frame(event_loop),
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            state.ctx.window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        let Some(mut state) = self.state.take() else {
            return;
        };
        state.ctx.window.set_visible(false);
        if let Some(load) = state.load.take()
            && let Some(Err(e)) = load.join()
        {
            log::warn!("Scene loader finished with {e:#}");
        }
        state.renderer.teardown(&mut state.ctx.gpu);
        log::info!("closed application");
    }
}

/// Open a window and show `model_file` from the models root, with settings read from `config_dir`.
pub fn run(model_file: &str, config_dir: &Path) -> anyhow::Result<()> {
    if let Err(e) = env_logger::try_init() {
        println!("Warning: Could not initialize logger: {}", e);
    };

    let config = AppConfig::load(config_dir)?;
    let model_path: PathBuf = config.roots.model(model_file);
    if !model_path.is_file() {
        anyhow::bail!("Unable to load {}", model_path.display());
    }
    log::info!("Loading {model_file}");

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config, model_file);
    event_loop.run_app(&mut app)?;

    match app.failure.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
