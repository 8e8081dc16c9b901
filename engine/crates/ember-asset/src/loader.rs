use std::path::Path;

use crate::raw::{RawImage, RawModel};

/// 将模型文件解析为 [`RawModel`]
///
/// 返回的 submesh 和 material 顺序需要稳定，渲染器按下标引用它们
pub trait ModelLoader {
    fn load_model(&self, path: &Path) -> anyhow::Result<RawModel>;
}

/// 将图片文件解码为 [`RawImage`]
pub trait ImageLoader {
    fn load_image(&self, path: &Path) -> anyhow::Result<RawImage>;

    /// 内嵌在模型文件中的已编码图片
    fn decode_image(&self, bytes: &[u8]) -> anyhow::Result<RawImage>;
}
