//! GPU 的边界
//!
//! 渲染器需要的所有 GPU 可见状态都由这里的管理器持有：
//! 顶点 / 索引 arena、实例数据、材质、纹理、光源以及 shadow map。
//! 管理器由 renderer 创建并显式传递，按依赖的逆序销毁。

pub mod bindless;
pub mod cmd_allocator;
pub mod frame_counter;
pub mod gpu_data;
pub mod handles;
pub mod light_manager;
pub mod material_manager;
pub mod mesh_manager;
pub mod retire_queue;
pub mod texture_manager;
