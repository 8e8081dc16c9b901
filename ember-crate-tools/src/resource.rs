use std::{
    env,
    path::{Component, Path, PathBuf},
};

/// 统一资源路径管理
///
/// 所有路径基于工作区根目录（通过 `CARGO_MANIFEST_DIR` 推导）。
///
/// # 使用示例
/// ```ignore
/// let model = EmberPath::assets_path("sponza/sponza.obj");          // assets/sponza/sponza.obj
/// let shader = EmberPath::shader_build_path_str("gbuffer.vert");   // engine/shader/.build/gbuffer.vert.spv
/// ```
pub struct EmberPath {}
// 核心路径
impl EmberPath {
    /// 获取工作区根目录
    ///
    /// 设置了 `EMBER_WORKSPACE` 环境变量时以它为准，便于脱离 cargo 运行
    pub fn workspace_path() -> PathBuf {
        if let Ok(dir) = env::var("EMBER_WORKSPACE") {
            return PathBuf::from(dir);
        }
        let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
        manifest_dir.parent().unwrap_or(manifest_dir).to_path_buf()
    }

    pub fn engine_path() -> PathBuf {
        Self::workspace_path().join("engine")
    }

    /// 获取 `assets/` 目录下的文件路径
    pub fn assets_path(filename: &str) -> PathBuf {
        Self::workspace_path().join("assets").join(filename)
    }

    /// 工作区根目录下的配置文件
    pub fn config_path(filename: &str) -> PathBuf {
        Self::workspace_path().join(filename)
    }
}
// engine 目录下
impl EmberPath {
    pub fn shader_root_path() -> PathBuf {
        Self::engine_path().join("shader")
    }

    /// 获取 `shader/.build/` 目录下的着色器路径（编译后的 SPIR-V）
    pub fn shader_build_path_str(filename: &str) -> String {
        let shader_path = Self::shader_root_path().join(".build").join(format!("{filename}.spv"));
        shader_path.to_string_lossy().into_owned()
    }
}
// tools
impl EmberPath {
    /// 将路径统一为 `/` 分隔，并消去 `.` 和 `..`
    ///
    /// 不访问文件系统，用作资源缓存的 key
    pub fn normalize(path: impl AsRef<Path>) -> String {
        let path_str = path.as_ref().to_string_lossy().replace('\\', "/");
        let mut parts: Vec<String> = Vec::new();
        let mut is_absolute = false;
        for component in Path::new(&path_str).components() {
            match component {
                Component::RootDir => is_absolute = true,
                Component::Prefix(prefix) => parts.push(prefix.as_os_str().to_string_lossy().into_owned()),
                Component::CurDir => {}
                Component::ParentDir => {
                    if parts.last().is_some_and(|p| p != "..") {
                        parts.pop();
                    } else if !is_absolute {
                        parts.push("..".to_string());
                    }
                }
                Component::Normal(name) => parts.push(name.to_string_lossy().into_owned()),
            }
        }

        let joined = parts.join("/");
        if is_absolute { format!("/{joined}") } else { joined }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_collapses_dots() {
        assert_eq!(EmberPath::normalize("assets/./models/../models/cube.obj"), "assets/models/cube.obj");
        assert_eq!(EmberPath::normalize("/data/a/b/../c.obj"), "/data/a/c.obj");
    }

    #[test]
    fn test_normalize_separators() {
        assert_eq!(EmberPath::normalize("assets\\models\\cube.obj"), "assets/models/cube.obj");
    }

    #[test]
    fn test_normalize_keeps_leading_parent() {
        assert_eq!(EmberPath::normalize("../assets/cube.obj"), "../assets/cube.obj");
        assert_eq!(EmberPath::normalize("/../cube.obj"), "/cube.obj");
    }

    #[test]
    fn test_shader_build_path() {
        let path = EmberPath::shader_build_path_str("gbuffer.vert");
        assert!(path.ends_with("gbuffer.vert.spv"));
        assert!(path.contains(".build"));
    }
}
