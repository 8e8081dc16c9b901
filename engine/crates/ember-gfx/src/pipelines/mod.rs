pub mod graphics_pipeline;
pub mod rendering_info;
pub mod shader;
