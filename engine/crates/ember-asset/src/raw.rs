use std::borrow::Cow;
use std::path::PathBuf;

/// 交错存放的顶点，布局与 shader 中的顶点输入一致
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct RawVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
    /// w 表示 bitangent 的方向
    pub tangent: [f32; 4],
}

/// 一个 submesh 对应 index buffer 中的一段连续区域
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawSubMesh {
    pub index_count: u32,
    /// 相对于 RawModel::indices 的起点
    pub first_index: u32,
    /// 相对于 RawModel::vertices 的起点，index 是相对于该值的局部索引
    pub vertex_offset: i32,
    /// RawModel::materials 的下标
    pub material_index: Option<usize>,
}

/// 材质引用的一张贴图，内嵌图片优先于路径
#[derive(Clone, Debug, Default)]
pub struct RawTextureRef {
    pub embedded: Option<RawImage>,
    pub path: Option<PathBuf>,
}
impl RawTextureRef {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            embedded: None,
            path: Some(path.into()),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.embedded.is_none() && self.path.is_none()
    }
}

#[derive(Clone, Debug)]
pub struct RawMaterial {
    /// 去重用的 key，需要在整个程序内唯一
    pub name: String,
    pub base_color_factor: [f32; 4],
    pub metallic_factor: f32,
    pub roughness_factor: f32,

    pub albedo: RawTextureRef,
    pub normal: RawTextureRef,
    pub metallic_roughness: RawTextureRef,
}
impl RawMaterial {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_color_factor: [1.0; 4],
            metallic_factor: 0.0,
            roughness_factor: 1.0,
            albedo: RawTextureRef::default(),
            normal: RawTextureRef::default(),
            metallic_roughness: RawTextureRef::default(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct RawModel {
    pub vertices: Vec<RawVertex>,
    pub indices: Vec<u32>,
    pub submeshes: Vec<RawSubMesh>,
    pub materials: Vec<RawMaterial>,
}
impl RawModel {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty() || self.submeshes.is_empty()
    }
}

/// 解码之后的图片
///
/// 像素数据可以借用静态数据（例如内置的占位贴图），也可以由加载器持有
#[derive(Clone, Debug)]
pub struct RawImage {
    pub width: u32,
    pub height: u32,
    /// 每个像素的 u8 通道数，1..=4
    pub channels: u32,
    pub pixels: Cow<'static, [u8]>,
}
impl RawImage {
    pub fn new_owned(width: u32, height: u32, channels: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            channels,
            pixels: Cow::Owned(pixels),
        }
    }

    pub fn new_static(width: u32, height: u32, channels: u32, pixels: &'static [u8]) -> Self {
        Self {
            width,
            height,
            channels,
            pixels: Cow::Borrowed(pixels),
        }
    }

    #[inline]
    pub fn owned(&self) -> bool {
        matches!(self.pixels, Cow::Owned(_))
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.width > 0
            && self.height > 0
            && (1..=4).contains(&self.channels)
            && Self::byte_len(self.width, self.height, self.channels) == Some(self.pixels.len())
    }

    /// 在 usize 上计算，超出范围时返回 None
    fn byte_len(width: u32, height: u32, channels: u32) -> Option<usize> {
        (width as usize).checked_mul(height as usize)?.checked_mul(channels as usize)
    }

    /// 扩展为 RGBA8；单通道视为灰度，双通道视为灰度 + alpha
    pub fn to_rgba8(&self) -> Cow<'_, [u8]> {
        if self.channels == 4 {
            return Cow::Borrowed(&self.pixels);
        }

        let pixel_count = self.pixels.len() / self.channels.max(1) as usize;
        let mut rgba = Vec::with_capacity(pixel_count * 4);
        for pixel in self.pixels.chunks_exact(self.channels as usize) {
            match *pixel {
                [l] => rgba.extend_from_slice(&[l, l, l, 255]),
                [l, a] => rgba.extend_from_slice(&[l, l, l, a]),
                [r, g, b] => rgba.extend_from_slice(&[r, g, b, 255]),
                _ => rgba.extend_from_slice(&[0, 0, 0, 255]),
            }
        }
        Cow::Owned(rgba)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgba8_passthrough() {
        let image = RawImage::new_static(1, 1, 4, &[1, 2, 3, 4]);
        assert!(!image.owned());
        assert!(matches!(image.to_rgba8(), Cow::Borrowed(_)));
    }

    #[test]
    fn test_rgb_and_gray_expand() {
        let rgb = RawImage::new_owned(2, 1, 3, vec![10, 20, 30, 40, 50, 60]);
        assert!(rgb.owned());
        assert_eq!(rgb.to_rgba8().as_ref(), &[10, 20, 30, 255, 40, 50, 60, 255]);

        let gray_alpha = RawImage::new_owned(1, 1, 2, vec![7, 128]);
        assert_eq!(gray_alpha.to_rgba8().as_ref(), &[7, 7, 7, 128]);
    }

    #[test]
    fn test_image_validity() {
        assert!(RawImage::new_owned(2, 2, 1, vec![0; 4]).is_valid());
        assert!(!RawImage::new_owned(2, 2, 4, vec![0; 4]).is_valid());
        assert!(!RawImage::new_owned(0, 2, 4, vec![]).is_valid());
    }

    #[test]
    fn test_large_dimensions_do_not_overflow() {
        // 65536 * 65536 * 4 超出 u32
        assert!(!RawImage::new_owned(65536, 65536, 4, vec![0; 16]).is_valid());
        #[cfg(target_pointer_width = "64")]
        assert_eq!(RawImage::byte_len(65536, 65536, 4), Some(1 << 34));
    }

    #[test]
    fn test_vertex_layout() {
        assert_eq!(std::mem::size_of::<RawVertex>(), 48);
    }
}
