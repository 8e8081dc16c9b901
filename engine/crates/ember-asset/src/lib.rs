//! 资源加载的边界
//!
//! 渲染器只依赖 [`raw`] 中的原始数据以及 [`loader`] 中的 trait，
//! 默认提供基于 `tobj` 的 obj 加载器和基于 `image` 的图片加载器。

pub mod asset_path;
pub mod image_loader;
pub mod loader;
pub mod obj_loader;
pub mod raw;
