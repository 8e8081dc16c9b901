use std::hash::Hasher;
use std::path::Path;

use ember_crate_tools::resource::EmberPath;
use rustc_hash::FxHasher;

/// 文件资源的去重 key：规范化之后的路径
#[inline]
pub fn path_key(path: impl AsRef<Path>) -> String {
    EmberPath::normalize(path)
}

/// 内嵌图片没有路径，使用像素内容的 hash 作为 key
pub fn content_hash_key(width: u32, height: u32, pixels: &[u8]) -> String {
    let mut hasher = FxHasher::default();
    hasher.write_u32(width);
    hasher.write_u32(height);
    hasher.write(pixels);
    format!("hash:{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equivalent_paths_share_key() {
        assert_eq!(path_key("a/b/../c.png"), path_key("a\\c.png"));
    }

    #[test]
    fn test_content_hash_key() {
        let a = content_hash_key(1, 1, &[255, 0, 0, 255]);
        let b = content_hash_key(1, 1, &[255, 0, 0, 255]);
        let c = content_hash_key(1, 1, &[0, 255, 0, 255]);
        assert!(a.starts_with("hash:"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        // 尺寸也参与 hash
        assert_ne!(content_hash_key(2, 2, &[0; 16]), content_hash_key(4, 1, &[0; 16]));
    }
}
