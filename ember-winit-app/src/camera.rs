use std::time::Duration;

use glam::{Mat4, Vec2, Vec3};
use winit::keyboard::KeyCode;

use crate::input::InputState;

/// 第一人称相机，右手系，看向 -Z
#[derive(Debug, Clone)]
pub struct Camera {
    pub position: Vec3,

    pub euler_yaw_deg: f32,
    pub euler_pitch_deg: f32,

    pub fov_y_deg: f32,
    pub aspect_ratio: f32,
    pub near: f32,
    pub far: f32,
}
impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 1.0, 5.0),
            euler_yaw_deg: 0.0,
            euler_pitch_deg: 0.0,
            fov_y_deg: 60.0,
            aspect_ratio: 16.0 / 9.0,
            near: 0.1,
            far: 500.0,
        }
    }
}
impl Camera {
    const CAMERA_UP: Vec3 = Vec3::Y;

    /// YXZ 表示 Y(yaw)-X(Pitch)-Z(Roll) 的旋转顺序
    const CAMERA_EULER: glam::EulerRot = glam::EulerRot::YXZ;

    const CAMERA_FORWARD: Vec3 = Vec3::NEG_Z;
    const CAMERA_RIGHT: Vec3 = Vec3::X;

    const K_PITCH: f32 = 89.5;

    fn rotation(&self) -> Mat4 {
        Mat4::from_euler(
            Self::CAMERA_EULER,
            self.euler_yaw_deg.to_radians(),
            self.euler_pitch_deg.to_radians(),
            0.0,
        )
    }

    pub fn forward(&self) -> Vec3 {
        self.rotation().transform_vector3(Self::CAMERA_FORWARD)
    }

    pub fn right(&self) -> Vec3 {
        self.rotation().transform_vector3(Self::CAMERA_RIGHT)
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_to_rh(self.position, self.forward(), Self::CAMERA_UP)
    }

    /// 深度范围为 [0, 1]，并且翻转了 Y 以匹配 Vulkan 的 NDC
    pub fn projection_matrix(&self) -> Mat4 {
        let mut proj = Mat4::perspective_rh(self.fov_y_deg.to_radians(), self.aspect_ratio, self.near, self.far);
        proj.y_axis.y *= -1.0;
        proj
    }

    /// 让相机看向 `target`
    pub fn look_at(&mut self, target: Vec3) {
        let dir = (target - self.position).normalize_or_zero();
        if dir == Vec3::ZERO {
            return;
        }
        self.euler_pitch_deg = dir.y.asin().to_degrees().clamp(-Self::K_PITCH, Self::K_PITCH);
        self.euler_yaw_deg = (-dir.x).atan2(-dir.z).to_degrees();
    }

    pub fn move_forward(&mut self, length: f32) {
        self.position += self.forward() * length;
    }

    pub fn move_right(&mut self, length: f32) {
        self.position += self.right() * length;
    }

    /// 沿世界的 Up 移动
    pub fn move_up(&mut self, length: f32) {
        self.position += Self::CAMERA_UP * length;
    }

    pub fn rotate_yaw(&mut self, angle: f32) {
        self.euler_yaw_deg = (self.euler_yaw_deg + angle).rem_euclid(360.0);
    }

    pub fn rotate_pitch(&mut self, angle: f32) {
        self.euler_pitch_deg = (self.euler_pitch_deg + angle).clamp(-Self::K_PITCH, Self::K_PITCH);
    }
}

/// 右键拖动旋转，WASDQE 移动
pub struct CameraController {
    camera: Camera,
    pub move_speed: f32,
    /// 每个像素对应的角度
    pub rotate_speed: f32,
}
impl Default for CameraController {
    fn default() -> Self {
        Self {
            camera: Camera::default(),
            move_speed: 5.0,
            rotate_speed: 1.0 / 7.0,
        }
    }
}
impl CameraController {
    #[inline]
    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    #[inline]
    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    pub fn update(&mut self, input: &InputState, viewport_size: Vec2, delta_time: Duration) {
        if viewport_size.y > 0.0 {
            self.camera.aspect_ratio = viewport_size.x / viewport_size.y;
        }

        if input.is_right_button_pressed() {
            let delta = input.mouse_delta();
            self.camera.rotate_yaw(-delta.x * self.rotate_speed);
            self.camera.rotate_pitch(-delta.y * self.rotate_speed);
        }

        let step = delta_time.as_secs_f32() * self.move_speed;
        let axis = |positive: KeyCode, negative: KeyCode| {
            input.is_key_pressed(positive) as i32 as f32 - input.is_key_pressed(negative) as i32 as f32
        };
        self.camera.move_forward(axis(KeyCode::KeyW, KeyCode::KeyS) * step);
        self.camera.move_right(axis(KeyCode::KeyD, KeyCode::KeyA) * step);
        self.camera.move_up(axis(KeyCode::KeyE, KeyCode::KeyQ) * step);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_looks_down_negative_z() {
        let camera = Camera::default();
        assert!(camera.forward().abs_diff_eq(Vec3::NEG_Z, 1e-6));
        assert!(camera.right().abs_diff_eq(Vec3::X, 1e-6));
    }

    #[test]
    fn test_pitch_is_clamped() {
        let mut camera = Camera::default();
        camera.rotate_pitch(200.0);
        assert_eq!(camera.euler_pitch_deg, 89.5);
        camera.rotate_pitch(-500.0);
        assert_eq!(camera.euler_pitch_deg, -89.5);
    }

    #[test]
    fn test_yaw_wraps() {
        let mut camera = Camera::default();
        camera.rotate_yaw(-30.0);
        assert!((camera.euler_yaw_deg - 330.0).abs() < 1e-4);
    }

    #[test]
    fn test_look_at() {
        let mut camera = Camera {
            position: Vec3::new(3.0, 0.0, 0.0),
            ..Default::default()
        };
        camera.look_at(Vec3::ZERO);
        assert!(camera.forward().abs_diff_eq(Vec3::NEG_X, 1e-5));
    }

    #[test]
    fn test_projection_flips_y() {
        let camera = Camera::default();
        let clip = camera.projection_matrix() * camera.view_matrix() * (camera.position + Vec3::new(0.0, 1.0, -5.0)).extend(1.0);
        // 世界上方的点在 Vulkan NDC 中 y 为负
        assert!(clip.y / clip.w < 0.0);
        let depth = clip.z / clip.w;
        assert!((0.0..=1.0).contains(&depth));
    }

    #[test]
    fn test_controller_moves_forward() {
        let mut controller = CameraController::default();
        let mut input = InputState::default();
        input.set_key(KeyCode::KeyW, true);
        let before = controller.camera().position;
        controller.update(&input, Vec2::new(800.0, 600.0), Duration::from_secs(1));
        let moved = controller.camera().position - before;
        assert!(moved.abs_diff_eq(Vec3::NEG_Z * 5.0, 1e-4));
        assert!((controller.camera().aspect_ratio - 800.0 / 600.0).abs() < 1e-6);
    }
}
