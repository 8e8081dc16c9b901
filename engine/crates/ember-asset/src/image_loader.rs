use std::path::Path;

use anyhow::Context;

use crate::loader::ImageLoader;
use crate::raw::RawImage;

/// 使用 `image` crate 解码，统一转换为 RGBA8
#[derive(Default)]
pub struct FileImageLoader;

impl ImageLoader for FileImageLoader {
    fn load_image(&self, path: &Path) -> anyhow::Result<RawImage> {
        let _span = tracy_client::span!("FileImageLoader::load_image");
        log::info!("Loading image: {}", path.display());

        let img = image::open(path).with_context(|| format!("asset: decode image {}", path.display()))?;
        Ok(Self::into_raw(img))
    }

    fn decode_image(&self, bytes: &[u8]) -> anyhow::Result<RawImage> {
        let _span = tracy_client::span!("FileImageLoader::decode_image");
        let img = image::load_from_memory(bytes).context("asset: decode embedded image")?;
        Ok(Self::into_raw(img))
    }
}
impl FileImageLoader {
    fn into_raw(img: image::DynamicImage) -> RawImage {
        let img = img.into_rgba8();
        let (width, height) = img.dimensions();
        RawImage::new_owned(width, height, 4, img.into_raw())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_png_from_memory() {
        let mut bytes = Vec::new();
        let img = image::RgbImage::from_pixel(2, 3, image::Rgb([10, 20, 30]));
        img.write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png).unwrap();

        let raw = FileImageLoader.decode_image(&bytes).unwrap();
        assert_eq!((raw.width, raw.height, raw.channels), (2, 3, 4));
        assert!(raw.is_valid());
        assert_eq!(&raw.pixels[0..4], &[10, 20, 30, 255]);
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(FileImageLoader.load_image(Path::new("not/exist.png")).is_err());
    }
}
