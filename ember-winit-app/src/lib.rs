//! winit 窗口外壳
//!
//! [`app::WinitApp`] 负责窗口、输入以及相机，把具体的场景交给 [`app::Scene`]。

pub mod app;
pub mod camera;
pub mod input;
