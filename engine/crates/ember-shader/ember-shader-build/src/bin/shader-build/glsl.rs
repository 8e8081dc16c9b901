//! 使用 glslc (来自 Vulkan SDK) 将 GLSL 编译为 SPIR-V

use anyhow::Context;

use crate::task::{ShaderCompileTask, ShaderPaths};

pub fn compile(task: &ShaderCompileTask, paths: &ShaderPaths) -> anyhow::Result<()> {
    if let Some(parent) = task.output_path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("create dir {:?}", parent))?;
    }

    let output = std::process::Command::new("glslc")
        .arg(format!("-I{}", paths.include_root.display()))
        .args(["-g", "--target-env=vulkan1.3", "-fshader-stage"])
        .arg(task.stage.glslc_name())
        .arg("-o")
        .arg(&task.output_path)
        .arg(&task.shader_path)
        .output()
        .context("failed to execute glslc")?;

    if !output.stdout.is_empty() {
        log::info!("stdout: {}", String::from_utf8_lossy(&output.stdout));
    }
    if !output.status.success() {
        anyhow::bail!("glslc: {}", String::from_utf8_lossy(&output.stderr));
    }
    Ok(())
}
