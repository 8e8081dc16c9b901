//! Vulkan 抽象层
//!
//! 提供对 Vulkan API 的封装，包括设备管理、命令缓冲、描述符、管线、交换链等。
//! 所有 Vulkan 资源通过 [`gfx::Gfx`] 单例访问设备和分配器，简化生命周期和借用关系。
//!
//! 所有持有 Vulkan 句柄的类型都需要显式调用 `destroy`，`Drop` 只负责检查。

pub mod basic;
pub mod commands;
pub mod descriptors;
pub mod foundation;
pub mod gfx;
pub mod gfx_core;
pub mod pipelines;
pub mod resources;
pub mod swapchain;
