use std::collections::HashSet;

use glam::Vec2;
use winit::event::{ElementState, MouseButton, WindowEvent};
use winit::keyboard::{KeyCode, PhysicalKey};

/// 当前帧的键鼠状态
#[derive(Debug, Default)]
pub struct InputState {
    pressed_keys: HashSet<KeyCode>,
    right_button: bool,
    cursor: Option<Vec2>,
    /// 自上一次 `end_frame` 以来累计的鼠标位移
    mouse_delta: Vec2,
}
// getters
impl InputState {
    #[inline]
    pub fn is_key_pressed(&self, key: KeyCode) -> bool {
        self.pressed_keys.contains(&key)
    }

    #[inline]
    pub fn is_right_button_pressed(&self) -> bool {
        self.right_button
    }

    #[inline]
    pub fn mouse_delta(&self) -> Vec2 {
        self.mouse_delta
    }
}
// update
impl InputState {
    pub fn set_key(&mut self, key: KeyCode, pressed: bool) {
        if pressed {
            self.pressed_keys.insert(key);
        } else {
            self.pressed_keys.remove(&key);
        }
    }

    pub fn handle_window_event(&mut self, event: &WindowEvent) {
        match event {
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(key) = event.physical_key {
                    self.set_key(key, event.state == ElementState::Pressed);
                }
            }
            WindowEvent::MouseInput {
                state,
                button: MouseButton::Right,
                ..
            } => {
                self.right_button = *state == ElementState::Pressed;
            }
            WindowEvent::CursorMoved { position, .. } => {
                let cursor = Vec2::new(position.x as f32, position.y as f32);
                if let Some(last) = self.cursor {
                    self.mouse_delta += cursor - last;
                }
                self.cursor = Some(cursor);
            }
            WindowEvent::CursorLeft { .. } => self.cursor = None,
            WindowEvent::Focused(false) => {
                self.pressed_keys.clear();
                self.right_button = false;
            }
            _ => {}
        }
    }

    /// 每帧结束时调用，清空累计的位移
    pub fn end_frame(&mut self) {
        self.mouse_delta = Vec2::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_state() {
        let mut input = InputState::default();
        input.set_key(KeyCode::KeyA, true);
        assert!(input.is_key_pressed(KeyCode::KeyA));
        input.set_key(KeyCode::KeyA, false);
        assert!(!input.is_key_pressed(KeyCode::KeyA));
    }

    #[test]
    fn test_focus_lost_releases_keys() {
        let mut input = InputState::default();
        input.set_key(KeyCode::KeyW, true);
        input.handle_window_event(&WindowEvent::Focused(false));
        assert!(!input.is_key_pressed(KeyCode::KeyW));
    }

    #[test]
    fn test_end_frame_resets_delta() {
        let mut input = InputState {
            mouse_delta: Vec2::new(3.0, 4.0),
            ..Default::default()
        };
        input.end_frame();
        assert_eq!(input.mouse_delta(), Vec2::ZERO);
    }
}
