use std::path::{Path, PathBuf};

use ember_crate_tools::resource::EmberPath;

/// Shader 的执行阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}
impl ShaderStage {
    /// 根据文件扩展名解析
    pub fn from_file_name(name: &str) -> Option<Self> {
        let ext = Path::new(name).extension()?.to_str()?;
        match ext {
            "vert" => Some(Self::Vertex),
            "frag" => Some(Self::Fragment),
            "comp" => Some(Self::Compute),
            _ => None,
        }
    }

    pub fn glslc_name(self) -> &'static str {
        match self {
            Self::Vertex => "vert",
            Self::Fragment => "frag",
            Self::Compute => "comp",
        }
    }
}

pub struct ShaderPaths {
    pub src_root: PathBuf,
    pub build_root: PathBuf,
    /// `#include "include/xxx.glsl"` 相对于这个目录
    pub include_root: PathBuf,
}
impl ShaderPaths {
    pub fn from_workspace() -> Self {
        let root = EmberPath::shader_root_path();
        Self {
            src_root: root.join("src"),
            build_root: root.join(".build"),
            include_root: root,
        }
    }
}

/// 一个具体的编译任务
#[derive(Debug)]
pub struct ShaderCompileTask {
    pub shader_path: PathBuf,
    pub output_path: PathBuf,
    pub stage: ShaderStage,
}
impl ShaderCompileTask {
    /// 不是 shader 或者不在 src 目录下时返回 None
    ///
    /// `src/gbuffer.frag` 输出为 `.build/gbuffer.frag.spv`
    pub fn new(shader_path: &Path, paths: &ShaderPaths) -> Option<Self> {
        let relative_path = shader_path.strip_prefix(&paths.src_root).ok()?;
        let stage = ShaderStage::from_file_name(shader_path.file_name()?.to_str()?)?;

        let mut output_path = paths.build_root.join(relative_path);
        let mut file_name = output_path.file_name()?.to_os_string();
        file_name.push(".spv");
        output_path.set_file_name(file_name);

        Some(Self {
            shader_path: shader_path.to_path_buf(),
            output_path,
            stage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths() -> ShaderPaths {
        ShaderPaths {
            src_root: PathBuf::from("/ws/engine/shader/src"),
            build_root: PathBuf::from("/ws/engine/shader/.build"),
            include_root: PathBuf::from("/ws/engine/shader"),
        }
    }

    #[test]
    fn test_stage_from_extension() {
        assert_eq!(ShaderStage::from_file_name("gbuffer.vert"), Some(ShaderStage::Vertex));
        assert_eq!(ShaderStage::from_file_name("lighting.frag"), Some(ShaderStage::Fragment));
        assert_eq!(ShaderStage::from_file_name("bindless.glsl"), None);
    }

    #[test]
    fn test_output_path_keeps_stage_suffix() {
        let task = ShaderCompileTask::new(Path::new("/ws/engine/shader/src/gbuffer.frag"), &paths()).unwrap();
        assert_eq!(task.output_path, PathBuf::from("/ws/engine/shader/.build/gbuffer.frag.spv"));
        assert_eq!(task.stage, ShaderStage::Fragment);
    }

    #[test]
    fn test_file_outside_src_is_skipped() {
        assert!(ShaderCompileTask::new(Path::new("/ws/engine/shader/include/bindless.glsl"), &paths()).is_none());
        assert!(ShaderCompileTask::new(Path::new("/ws/engine/shader/include/x.vert"), &paths()).is_none());
    }

    /// 这两个 pass 以 EQUAL 比较深度，clip 坐标必须逐位一致
    #[test]
    fn test_equal_depth_passes_share_invariant_position() {
        let paths = ShaderPaths::from_workspace();
        for name in ["depth_prepass.vert", "gbuffer.vert"] {
            let source = std::fs::read_to_string(paths.src_root.join(name)).unwrap();
            assert!(source.contains("invariant gl_Position;"), "{name}");
            assert!(source.contains("gl_Position = mesh_clip_position("), "{name}");
        }
        let include = std::fs::read_to_string(paths.include_root.join("include/mesh_vertex.glsl")).unwrap();
        assert!(include.contains("vec4 mesh_clip_position(mat4 model)"));
    }
}
