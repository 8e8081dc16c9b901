//! CPU 与 shader 共享的数据布局
//!
//! 所有结构体都是 `#[repr(C)]` + `Pod`，按照 std430 对齐，需要与 shader 中的声明保持一致

use ash::vk;
use glam::{Mat4, Vec4};

pub use ember_asset::raw::RawVertex as Vertex;

/// bindless texture 数组的容量
pub const MAX_TEXTURES: u32 = 1024;
pub const MAX_MATERIALS: u32 = 1024;
pub const MAX_LIGHTS: u32 = 256;
pub const MAX_SHADOW_MAPS: u32 = 16;
/// 每帧最多的实例数量
pub const MAX_INSTANCES: u32 = 16 * 1024;
/// G-buffer 的 albedo / normal / metal-rough，lighting 结果，depth
pub const ATTACHMENT_INPUT_COUNT: u32 = 5;

pub const SHADOW_MAP_SIZE: u32 = 2048;

/// 顶点 arena 的容量（顶点个数）
pub const VERTEX_ARENA_CAPACITY: u64 = 1024 * 1024;
/// 索引 arena 的容量（索引个数）
pub const INDEX_ARENA_CAPACITY: u64 = 4 * 1024 * 1024;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuPerFrameData {
    pub view: Mat4,
    pub projection: Mat4,
    pub view_proj: Mat4,
    pub inv_view_proj: Mat4,
    /// w 未使用
    pub camera_pos: Vec4,
    pub screen_size: [f32; 2],
    pub light_count: u32,
    pub frame_id: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuMaterial {
    pub base_color_factor: Vec4,
    pub albedo_tex: u32,
    pub normal_tex: u32,
    pub metal_rough_tex: u32,
    pub metallic_factor: f32,
    pub roughness_factor: f32,
    pub _padding: [u32; 3],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum GpuLightType {
    Directional = 0,
    Point = 1,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuLight {
    pub shadow_view_proj: Mat4,
    /// 平行光为方向，点光源为位置；w 未使用
    pub direction_or_position: Vec4,
    /// rgb 为颜色，a 为强度
    pub color_intensity: Vec4,
    /// 见 [`GpuLightType`]
    pub light_type: u32,
    /// 不投射阴影时为 `NO_SHADOW_MAP`
    pub shadow_map_index: u32,
    pub casts_shadow: u32,
    pub _padding: u32,
}
impl GpuLight {
    pub const NO_SHADOW_MAP: u32 = u32::MAX;
}

/// 每个 draw 请求、每个 submesh 生成一个
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MeshInstanceData {
    pub model: Mat4,
    pub submesh_id: u32,
    pub material_id: u32,
    pub flags: u32,
    pub object_id: u32,
}

/// 与 `VkDrawIndexedIndirectCommand` 的布局一致
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DrawCommand {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub vertex_offset: i32,
    pub first_instance: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DebugLineVertex {
    pub position: [f32; 3],
    pub color: [f32; 4],
}

/// 所有 stage 可见的 push constants
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuPushConstants {
    pub light_index: u32,
    pub debug_flags: u32,
    pub _reserved: [u32; 2],
}
impl GpuPushConstants {
    pub fn range() -> vk::PushConstantRange {
        vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::ALL_GRAPHICS,
            offset: 0,
            size: size_of::<Self>() as u32,
        }
    }
}

/// 顶点输入的 binding 和 attribute 描述
pub struct VertexLayout;
impl VertexLayout {
    pub fn mesh_bindings() -> Vec<vk::VertexInputBindingDescription> {
        vec![vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }]
    }

    pub fn mesh_attributes() -> Vec<vk::VertexInputAttributeDescription> {
        vec![
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: std::mem::offset_of!(Vertex, position) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: std::mem::offset_of!(Vertex, normal) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 2,
                binding: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: std::mem::offset_of!(Vertex, uv) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 3,
                binding: 0,
                format: vk::Format::R32G32B32A32_SFLOAT,
                offset: std::mem::offset_of!(Vertex, tangent) as u32,
            },
        ]
    }

    pub fn debug_line_bindings() -> Vec<vk::VertexInputBindingDescription> {
        vec![vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<DebugLineVertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }]
    }

    pub fn debug_line_attributes() -> Vec<vk::VertexInputAttributeDescription> {
        vec![
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: std::mem::offset_of!(DebugLineVertex, position) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32B32A32_SFLOAT,
                offset: std::mem::offset_of!(DebugLineVertex, color) as u32,
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_std430_sizes() {
        assert_eq!(size_of::<GpuPerFrameData>(), 288);
        assert_eq!(size_of::<GpuMaterial>(), 48);
        assert_eq!(size_of::<GpuLight>(), 112);
        assert_eq!(size_of::<MeshInstanceData>(), 80);
        assert_eq!(size_of::<GpuPushConstants>(), 16);
    }

    #[test]
    fn test_draw_command_matches_vk_layout() {
        assert_eq!(size_of::<DrawCommand>(), size_of::<vk::DrawIndexedIndirectCommand>());
        assert_eq!(std::mem::offset_of!(DrawCommand, vertex_offset), 12);
    }

    #[test]
    fn test_vertex_attributes_in_bounds() {
        let stride = VertexLayout::mesh_bindings()[0].stride;
        assert!(VertexLayout::mesh_attributes().iter().all(|a| a.offset < stride));
        assert_eq!(VertexLayout::mesh_attributes()[3].offset, 32);
    }
}
