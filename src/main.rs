// =============================================================================
// FRAME LIFECYCLE - Vulkan sample runner
// =============================================================================
//
// Opens a window, hands it to a `FrameLifecycleController` and runs one of
// the sample render graphs on it.
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  winit App (events, input state, config hot reload)             │
// │    └── FrameLifecycleController                                 │
// │          ├── VulkanDevice + VulkanSurface (swapchain)           │
// │          ├── Per-image slots (command buffer, fence, semaphores)│
// │          └── RenderGraph (sample passes + swapchain targets)    │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. RedrawRequested -> controller.render_frame(record sample)
// 2. Resized         -> controller.on_surface_resized(width, height)
// 3. Stale swapchain -> resize to the current window size
//
// =============================================================================

use anyhow::{Context, Result};
use frame_lifecycle::backend::{SurfacePreferences, VulkanDevice, VulkanSurface};
use frame_lifecycle::config::{Config, ConfigWatcher, CONFIG_FILE};
use frame_lifecycle::frame::{ControllerDesc, Extent2D, FrameError};
use frame_lifecycle::input::InputState;
use frame_lifecycle::samples::{self, FrameParams, RenderGraph, SampleController, SampleSettings};
use glam::Vec4;
use parking_lot::Mutex;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::{ElementState, MouseButton, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Fullscreen, Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Missing or broken config.toml falls back to defaults
    let config = Config::load();

    // Initialize logging
    init_logging(&config)?;
    log::info!("Starting frame lifecycle runner");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );
    log::info!(
        "Sample: {}, present mode: {}",
        config.get_sample().name(),
        config.graphics.present_mode
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    Ok(())
}

/// Initialize logging, optionally into the configured log file
fn init_logging(config: &Config) -> Result<()> {
    use env_logger::{Builder, Target};
    use log::LevelFilter;

    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Info);
    // RUST_LOG wins over the default level
    builder.parse_default_env();

    if config.debug.log_to_file {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&config.debug.log_file)
            .with_context(|| format!("Failed to open log file {}", config.debug.log_file))?;

        writeln!(file, "=== Frame Lifecycle Log ===")?;
        writeln!(file, "Started: {:?}", std::time::SystemTime::now())?;
        writeln!(file)?;

        builder.target(Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Main application struct.
///
/// IMPORTANT: the controller must be shut down before the device it shares
/// is dropped; `Drop` and `shutdown` take it out first.
struct App {
    // ─────────────────────────────────────────────────────────────────────────
    // CONFIGURATION
    // ─────────────────────────────────────────────────────────────────────────
    config: Config,
    watcher: Option<ConfigWatcher>,
    /// Read by the render graph whenever targets are rebuilt
    settings: Arc<Mutex<SampleSettings>>,
    fullscreen_key: Option<KeyCode>,
    quit_key: Option<KeyCode>,

    // ─────────────────────────────────────────────────────────────────────────
    // WINDOW & INPUT
    // ─────────────────────────────────────────────────────────────────────────
    window: Option<Arc<Window>>,
    input: InputState,

    // ─────────────────────────────────────────────────────────────────────────
    // VULKAN
    // ─────────────────────────────────────────────────────────────────────────
    controller: Option<SampleController>,
    device: Option<Arc<VulkanDevice>>,

    // ─────────────────────────────────────────────────────────────────────────
    // FPS TRACKING
    // ─────────────────────────────────────────────────────────────────────────
    started: Instant,
    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        let now = Instant::now();
        let watcher = ConfigWatcher::new(CONFIG_FILE)
            .map_err(|e| log::warn!("Config hot reload disabled: {:#}", e))
            .ok();

        Self {
            settings: Arc::new(Mutex::new(SampleSettings {
                mosaic_block: config.sample.mosaic_block,
            })),
            fullscreen_key: config.fullscreen_key(),
            quit_key: config.quit_key(),
            input: InputState::new(config.window.fullscreen),
            config,
            watcher,
            window: None,
            controller: None,
            device: None,
            started: now,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    fn surface_preferences(&self) -> SurfacePreferences {
        SurfacePreferences {
            present_mode: self.config.get_present_mode(),
            format: self.config.get_surface_format(),
        }
    }

    // =========================================================================
    // INITIALIZATION
    // =========================================================================

    /// Create the device, the surface and the controller for `window`.
    ///
    /// The controller builds the first set of sample targets itself, or
    /// defers it if the window starts out minimized.
    fn init_vulkan(&mut self, window: &Window) -> Result<()> {
        log::info!("Initializing Vulkan...");

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Device + window surface
        // ─────────────────────────────────────────────────────────────────────
        let (device, surface) = VulkanDevice::new(
            &self.config.window.title,
            self.config.debug.validation_layers,
            window,
        )?;
        let surface = VulkanSurface::new(Arc::clone(&device), surface, self.surface_preferences());

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Controller with the sample's rebuild callback
        // ─────────────────────────────────────────────────────────────────────
        let size = window.inner_size();
        let desc = ControllerDesc::new(Extent2D::new(size.width, size.height))
            .with_image_count(self.config.graphics.image_count)
            .with_fence_timeout(self.config.fence_timeout_ns());

        let mut graph = RenderGraph::new(
            self.config.get_sample(),
            Arc::clone(&device),
            Arc::clone(&self.settings),
        );

        let controller = SampleController::initialize(surface, Arc::clone(&device), desc, move |ctx| {
            graph.rebuild(ctx)
        })
        .context("Failed to initialize frame lifecycle")?;

        self.controller = Some(controller);
        self.device = Some(device);

        log::info!("Vulkan initialized successfully!");
        Ok(())
    }

    // =========================================================================
    // RENDER LOOP
    // =========================================================================

    /// Render a single frame. Returns whether anything was submitted.
    fn render_frame(&mut self) -> Result<bool, FrameError> {
        let (Some(controller), Some(device)) = (self.controller.as_mut(), self.device.as_ref()) else {
            return Ok(false);
        };

        let params = FrameParams {
            clear_color: Vec4::from_array(self.config.graphics.clear_color),
            time: self.started.elapsed().as_secs_f32(),
            pan: self.input.pan(),
            cursor: self.input.cursor(),
        };

        let outcome = controller.render_frame(|frame| samples::record(device, frame, &params))?;

        // Suboptimal or out of date: rebuild at whatever size the window has now
        if outcome.wants_rebuild() || controller.needs_rebuild() {
            if let Some(window) = &self.window {
                let size = window.inner_size();
                controller.on_surface_resized(size.width, size.height)?;
            }
        }

        Ok(outcome.rendered())
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<(), FrameError> {
        match self.controller.as_mut() {
            Some(controller) => controller.on_surface_resized(width, height).map(|_| ()),
            None => Ok(()),
        }
    }

    // =========================================================================
    // FULLSCREEN TOGGLE
    // =========================================================================

    fn toggle_fullscreen(&mut self) {
        if let Some(ref window) = self.window {
            if self.input.toggle_fullscreen() {
                // Borderless, current monitor
                window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                log::info!("Entered fullscreen mode");
            } else {
                window.set_fullscreen(None);
                log::info!("Exited fullscreen mode");
            }
            // The resulting Resized event rebuilds the swapchain
        }
    }

    // =========================================================================
    // CONFIG HOT RELOAD
    // =========================================================================

    fn poll_config(&mut self, event_loop: &ActiveEventLoop) {
        let changed = self.watcher.as_ref().is_some_and(ConfigWatcher::poll_changed);
        if !changed {
            return;
        }

        let config = match Config::load_from_path(CONFIG_FILE) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("Ignoring config change: {:#}", e);
                return;
            }
        };
        log::info!("Config reloaded");

        // Live: read every frame
        self.config.graphics.clear_color = config.graphics.clear_color;
        self.config.debug.show_fps = config.debug.show_fps;
        self.fullscreen_key = config.fullscreen_key();
        self.quit_key = config.quit_key();

        // Swapchain-shaping: applied by the next rebuild
        let block_changed = {
            let mut settings = self.settings.lock();
            let changed = settings.mosaic_block != config.sample.mosaic_block;
            settings.mosaic_block = config.sample.mosaic_block;
            changed
        };

        self.config.graphics.present_mode = config.graphics.present_mode.clone();
        self.config.graphics.surface_format = config.graphics.surface_format.clone();
        if let Some(controller) = &self.controller {
            controller.surface().set_preferences(self.surface_preferences());
        }

        if config.sample.name != self.config.sample.name
            || config.graphics.image_count != self.config.graphics.image_count
            || config.graphics.fence_timeout_ms != self.config.graphics.fence_timeout_ms
        {
            log::info!("Sample, image count and fence timeout changes apply after a restart");
        }

        if block_changed {
            log::info!("Mosaic block is now {}", config.sample.mosaic_block);
            if let Some(size) = self.window.as_ref().map(|w| w.inner_size()) {
                if let Err(e) = self.resize(size.width, size.height) {
                    self.fatal(event_loop, e);
                }
            }
        }
    }

    // =========================================================================
    // FPS TRACKING
    // =========================================================================

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.frame_count += 1;

        // Title refresh once per second
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;

            if let Some(ref window) = self.window {
                let mode = if self.input.is_fullscreen() { "fullscreen" } else { "windowed" };
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms) [{}]",
                    self.config.window.title,
                    fps,
                    frame_time * 1000.0,
                    mode
                ));
            }

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }

    // =========================================================================
    // SHUTDOWN
    // =========================================================================

    fn shutdown(&mut self) {
        if let Some(controller) = self.controller.take() {
            if let Err(e) = controller.shutdown() {
                log::warn!("Shutdown: {}", e);
            }
        }
        // Last reference: destroys the device
        self.device = None;
    }

    fn fatal(&mut self, event_loop: &ActiveEventLoop, error: FrameError) {
        log::error!("Fatal error during {}: {}", error.stage(), error);
        let mut source = std::error::Error::source(&error);
        while let Some(cause) = source {
            log::error!("  caused by: {}", cause);
            source = std::error::Error::source(cause);
        }
        self.shutdown();
        event_loop.exit();
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        // Window size and mode come from [window]
        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        // Borderless on the current monitor
        if self.config.window.fullscreen {
            window_attributes = window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                event_loop.exit();
                return;
            }
        };

        if let Err(e) = self.init_vulkan(&window) {
            log::error!("Failed to initialize Vulkan: {:#}", e);
            event_loop.exit();
            return;
        }

        self.window = Some(window);
    }

    /// Handle window events.
    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            // ─────────────────────────────────────────────────────────────────
            // CLOSE REQUEST
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.shutdown();
                event_loop.exit();
            }

            // ─────────────────────────────────────────────────────────────────
            // WINDOW RESIZED (zero size = minimized)
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                if let Err(e) = self.resize(size.width, size.height) {
                    self.fatal(event_loop, e);
                }
            }

            // ─────────────────────────────────────────────────────────────────
            // REDRAW REQUESTED
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::RedrawRequested => match self.render_frame() {
                Ok(true) => self.update_fps(),
                Ok(false) => {}
                Err(e) => self.fatal(event_loop, e),
            },

            // ─────────────────────────────────────────────────────────────────
            // MOUSE
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::CursorMoved { position, .. } => {
                self.input.cursor_moved(position.x, position.y);
            }
            WindowEvent::CursorLeft { .. } => {
                self.input.cursor_left();
            }
            WindowEvent::MouseInput {
                state,
                button: MouseButton::Left,
                ..
            } => {
                self.input.set_dragging(state == ElementState::Pressed);
            }

            // ─────────────────────────────────────────────────────────────────
            // KEYBOARD INPUT
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::KeyboardInput { event, .. } => {
                if event.state.is_pressed() && !event.repeat {
                    if let PhysicalKey::Code(key) = event.physical_key {
                        if Some(key) == self.quit_key {
                            log::info!("{:?} pressed, exiting...", key);
                            self.shutdown();
                            event_loop.exit();
                        } else if Some(key) == self.fullscreen_key {
                            self.toggle_fullscreen();
                        }
                    }
                }
            }

            _ => {}
        }
    }

    /// Called when the event loop is about to block waiting for events.
    /// We use this to request continuous redraws.
    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        self.poll_config(event_loop);

        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

// =============================================================================
// CLEANUP
// =============================================================================

impl Drop for App {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");
        self.shutdown();
        log::info!("Cleanup complete");
    }
}
