// Input state threaded through the window event handlers
//
// Holds what the samples react to between frames: the cursor, an active
// left-button drag and the window mode. Nothing here touches the GPU.

use glam::Vec2;

#[derive(Debug, Default)]
pub struct InputState {
    cursor: Option<Vec2>,
    dragging: bool,
    /// Accumulated drag offset in pixels
    pan: Vec2,
    fullscreen: bool,
}

impl InputState {
    pub fn new(fullscreen: bool) -> Self {
        Self {
            fullscreen,
            ..Default::default()
        }
    }

    /// Record a cursor move; while dragging the delta is added to the pan
    pub fn cursor_moved(&mut self, x: f64, y: f64) {
        let position = Vec2::new(x as f32, y as f32);
        if self.dragging {
            if let Some(last) = self.cursor {
                self.pan += position - last;
            }
        }
        self.cursor = Some(position);
    }

    pub fn cursor_left(&mut self) {
        self.cursor = None;
        self.dragging = false;
    }

    pub fn set_dragging(&mut self, pressed: bool) {
        self.dragging = pressed;
    }

    pub fn cursor(&self) -> Option<Vec2> {
        self.cursor
    }

    pub fn pan(&self) -> Vec2 {
        self.pan
    }

    /// Flip the window mode and return the new one
    pub fn toggle_fullscreen(&mut self) -> bool {
        self.fullscreen = !self.fullscreen;
        self.fullscreen
    }

    pub fn is_fullscreen(&self) -> bool {
        self.fullscreen
    }
}
