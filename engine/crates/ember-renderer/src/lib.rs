//! deferred 渲染管线
//!
//! [`renderer::Renderer`] 驱动每一帧：等待 fence、acquire、更新 GPU 数据、录制各个 pass、
//! 提交并 present。swapchain 失效或者窗口尺寸变化时会在帧边界重建 swapchain 以及 attachments。

pub mod attachments;
pub mod overlay;
pub mod passes;
pub mod pipeline_context;
pub mod present;
pub mod renderer;
pub mod renderer_config;
