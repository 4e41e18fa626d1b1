// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// This module handles loading and parsing configuration from config.toml.
// Provides sensible defaults if config file is missing or has errors.
// `ConfigWatcher` reports edits so live-tunable values can be reapplied.

use anyhow::{Context, Result};
use ash::vk;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use winit::keyboard::KeyCode;

use crate::frame::INFINITE_TIMEOUT;
use crate::samples::SampleKind;

pub const CONFIG_FILE: &str = "config.toml";

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
    pub controls: ControlsConfig,
    pub sample: SampleConfig,
}

/// Window settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Frame Lifecycle".to_string(),
            width: 1280,
            height: 720,
            fullscreen: false,
        }
    }
}

/// Graphics settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub present_mode: String,
    /// srgb | unorm | hdr10
    pub surface_format: String,
    pub clear_color: [f32; 4],
    /// Requested swapchain images (at least 2 are always used)
    pub image_count: u32,
    /// Per-frame fence wait bound; 0 waits forever
    pub fence_timeout_ms: u64,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "fifo".to_string(),
            surface_format: "srgb".to_string(),
            clear_color: [0.1, 0.2, 0.8, 1.0],
            image_count: 3,
            fence_timeout_ms: 0,
        }
    }
}

/// Debug settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_to_file: bool,
    pub log_file: String,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: cfg!(debug_assertions),
            log_to_file: false,
            log_file: "frame_lifecycle.log".to_string(),
            show_fps: true,
        }
    }
}

/// Control key bindings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControlsConfig {
    pub fullscreen_key: String,
    pub quit_key: String,
}

impl Default for ControlsConfig {
    fn default() -> Self {
        Self {
            fullscreen_key: "F11".to_string(),
            quit_key: "Escape".to_string(),
        }
    }
}

/// Which render graph to run
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SampleConfig {
    /// clear | post_effect | secondary
    pub name: String,
    /// Mosaic cell size in pixels for post_effect
    pub mosaic_block: u32,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            name: "clear".to_string(),
            mosaic_block: 8,
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path(CONFIG_FILE).unwrap_or_else(|e| {
            log::warn!("Failed to load {}: {:#}. Using defaults.", CONFIG_FILE, e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Get present mode as Vulkan enum
    pub fn get_present_mode(&self) -> vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => vk::PresentModeKHR::MAILBOX,
            "fifo" => vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to FIFO",
                    self.graphics.present_mode
                );
                vk::PresentModeKHR::FIFO
            }
        }
    }

    /// Desired swapchain format and color space
    pub fn get_surface_format(&self) -> vk::SurfaceFormatKHR {
        let (format, color_space) = match self.graphics.surface_format.to_lowercase().as_str() {
            "srgb" => (vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            "unorm" => (vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            "hdr10" => (
                vk::Format::A2B10G10R10_UNORM_PACK32,
                vk::ColorSpaceKHR::HDR10_ST2084_EXT,
            ),
            _ => {
                log::warn!(
                    "Unknown surface format '{}', defaulting to srgb",
                    self.graphics.surface_format
                );
                (vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR)
            }
        };
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    pub fn fence_timeout_ns(&self) -> u64 {
        match self.graphics.fence_timeout_ms {
            0 => INFINITE_TIMEOUT,
            ms => ms.saturating_mul(1_000_000),
        }
    }

    pub fn get_sample(&self) -> SampleKind {
        SampleKind::from_name(&self.sample.name).unwrap_or_else(|| {
            log::warn!("Unknown sample '{}', defaulting to clear", self.sample.name);
            SampleKind::Clear
        })
    }

    pub fn fullscreen_key(&self) -> Option<KeyCode> {
        parse_key(&self.controls.fullscreen_key)
    }

    pub fn quit_key(&self) -> Option<KeyCode> {
        parse_key(&self.controls.quit_key)
    }
}

/// Map a key name from the config file ("F11", "Escape", "Q") to a key code
pub fn parse_key(name: &str) -> Option<KeyCode> {
    let name = name.trim();
    let key = match name.to_ascii_lowercase().as_str() {
        "escape" | "esc" => KeyCode::Escape,
        "space" => KeyCode::Space,
        "enter" | "return" => KeyCode::Enter,
        "tab" => KeyCode::Tab,
        "f1" => KeyCode::F1,
        "f2" => KeyCode::F2,
        "f3" => KeyCode::F3,
        "f4" => KeyCode::F4,
        "f5" => KeyCode::F5,
        "f6" => KeyCode::F6,
        "f7" => KeyCode::F7,
        "f8" => KeyCode::F8,
        "f9" => KeyCode::F9,
        "f10" => KeyCode::F10,
        "f11" => KeyCode::F11,
        "f12" => KeyCode::F12,
        other => {
            let mut chars = other.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => letter_key(c)?,
                _ => {
                    log::warn!("Unknown key name '{}'", name);
                    return None;
                }
            }
        }
    };
    Some(key)
}

fn letter_key(c: char) -> Option<KeyCode> {
    const LETTERS: [KeyCode; 26] = [
        KeyCode::KeyA,
        KeyCode::KeyB,
        KeyCode::KeyC,
        KeyCode::KeyD,
        KeyCode::KeyE,
        KeyCode::KeyF,
        KeyCode::KeyG,
        KeyCode::KeyH,
        KeyCode::KeyI,
        KeyCode::KeyJ,
        KeyCode::KeyK,
        KeyCode::KeyL,
        KeyCode::KeyM,
        KeyCode::KeyN,
        KeyCode::KeyO,
        KeyCode::KeyP,
        KeyCode::KeyQ,
        KeyCode::KeyR,
        KeyCode::KeyS,
        KeyCode::KeyT,
        KeyCode::KeyU,
        KeyCode::KeyV,
        KeyCode::KeyW,
        KeyCode::KeyX,
        KeyCode::KeyY,
        KeyCode::KeyZ,
    ];

    if c.is_ascii_lowercase() {
        Some(LETTERS[(c as u8 - b'a') as usize])
    } else {
        None
    }
}

// =============================================================================
// HOT RELOAD
// =============================================================================

/// Watches the config file and reports when it was written
pub struct ConfigWatcher {
    /// The underlying file watcher (kept alive)
    _watcher: RecommendedWatcher,
    event_rx: mpsc::Receiver<notify::Event>,
    path: PathBuf,
}

impl ConfigWatcher {
    /// Watch `path`. The parent directory is watched so editors that replace
    /// the file instead of writing it in place are still seen.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = std::env::current_dir()
            .context("Failed to resolve working directory")?
            .join(path.as_ref());
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .context("Config path has no parent directory")?;

        let (tx, rx) = mpsc::channel::<notify::Event>();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = tx.send(event);
            }
        })
        .context("Failed to create file watcher")?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {:?}", dir))?;

        log::info!("Watching {:?} for changes", path);

        Ok(Self {
            _watcher: watcher,
            event_rx: rx,
            path,
        })
    }

    /// Drain pending events; true if the config file was created or modified
    pub fn poll_changed(&self) -> bool {
        let mut changed = false;
        while let Ok(event) = self.event_rx.try_recv() {
            if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                continue;
            }
            if event.paths.iter().any(|p| self.is_config_path(p)) {
                changed = true;
            }
        }
        changed
    }

    fn is_config_path(&self, path: &Path) -> bool {
        path == self.path || path.file_name() == self.path.file_name()
    }
}
