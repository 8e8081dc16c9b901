//! Shader 编译工具
//!
//! 将 `engine/shader/src` 下的所有 GLSL 文件编译为 SPIR-V，输出到 `engine/shader/.build`

mod glsl;
mod task;

use ember_crate_tools::init_log::init_log;
use rayon::prelude::*;
use task::{ShaderCompileTask, ShaderPaths};

fn main() -> anyhow::Result<()> {
    init_log();

    let paths = ShaderPaths::from_workspace();
    log::info!("Shader include path: {:?}", paths.include_root);
    log::info!("Shader entry path: {:?}", paths.src_root);
    log::info!("Shader output path: {:?}", paths.build_root);

    let tasks = walkdir::WalkDir::new(&paths.src_root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| ShaderCompileTask::new(entry.path(), &paths))
        .collect::<Vec<_>>();

    let failed = tasks
        .par_iter()
        .filter(|task| {
            log::info!("Compiling shader: {:?}", task.shader_path);
            match glsl::compile(task, &paths) {
                Ok(()) => false,
                Err(e) => {
                    log::error!("{:?}: {:#}", task.shader_path, e);
                    true
                }
            }
        })
        .count();

    anyhow::ensure!(failed == 0, "{} of {} shaders failed to compile", failed, tasks.len());
    log::info!("Shader compilation completed: {} shaders.", tasks.len());
    Ok(())
}
