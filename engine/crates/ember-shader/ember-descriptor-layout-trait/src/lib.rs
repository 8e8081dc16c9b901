//! 描述符绑定布局 trait
//!
//! 配合 `ember-descriptor-layout-macro`，通过 `#[derive(DescriptorBinding)]` 自动生成 Vulkan 描述符集布局。
//!
//! # 使用示例
//! ```ignore
//! #[derive(DescriptorBinding)]
//! struct MyLayout {
//!     #[binding = 0]
//!     #[descriptor_type = "UNIFORM_BUFFER"]
//!     _per_frame: (),
//!
//!     #[binding = 1]
//!     #[descriptor_type = "COMBINED_IMAGE_SAMPLER"]
//!     #[count = 1024]
//!     #[flags = "PARTIALLY_BOUND | UPDATE_AFTER_BIND"]
//!     _textures: (),
//! }
//! ```

use ash::vk;

// 让派生宏生成的路径在本 crate 内部同样可用
extern crate self as ember_descriptor_layout_trait;

/// 描述符绑定的详细信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorBindingItem {
    pub name: &'static str,
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub stage_flags: vk::ShaderStageFlags,
    pub count: u32,
    pub flags: vk::DescriptorBindingFlags,
}

/// 着色器绑定布局 trait
///
/// 描述着色器需要的所有资源绑定，由派生宏实现。
pub trait DescriptorBindingLayout {
    /// 获取所有绑定的详细信息
    fn get_shader_bindings() -> Vec<DescriptorBindingItem>;

    /// 获取 Vulkan 描述符集布局绑定
    ///
    /// 不应被覆盖，使用 `get_shader_bindings()` 生成 Vulkan 所需的绑定信息。
    fn get_vk_bindings() -> (Vec<vk::DescriptorSetLayoutBinding<'static>>, Vec<vk::DescriptorBindingFlags>) {
        let bindings = Self::get_shader_bindings();
        let layout_bindings = bindings
            .iter()
            .map(|item| vk::DescriptorSetLayoutBinding {
                binding: item.binding,
                descriptor_type: item.descriptor_type,
                descriptor_count: item.count,
                stage_flags: item.stage_flags,
                ..Default::default()
            })
            .collect();

        let binding_flags = bindings.iter().map(|item| item.flags).collect();

        (layout_bindings, binding_flags)
    }

    /// 按类型汇总 descriptor 数量，用于创建 descriptor pool
    ///
    /// `set_count` 是会从 pool 中分配的 set 数量
    fn get_pool_sizes(set_count: u32) -> Vec<vk::DescriptorPoolSize> {
        let mut sizes: Vec<vk::DescriptorPoolSize> = Vec::new();
        for item in Self::get_shader_bindings() {
            match sizes.iter_mut().find(|size| size.ty == item.descriptor_type) {
                Some(size) => size.descriptor_count += item.count * set_count,
                None => sizes.push(vk::DescriptorPoolSize {
                    ty: item.descriptor_type,
                    descriptor_count: item.count * set_count,
                }),
            }
        }
        sizes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_descriptor_layout_macro::DescriptorBinding;

    const TEXTURE_CNT: u32 = 64;

    #[allow(dead_code)]
    #[derive(DescriptorBinding)]
    struct TestLayout {
        #[binding = 0]
        #[descriptor_type = "UNIFORM_BUFFER"]
        #[stage = "VERTEX | FRAGMENT"]
        _per_frame: (),

        #[binding = 1]
        #[descriptor_type = "COMBINED_IMAGE_SAMPLER"]
        #[stage = "FRAGMENT"]
        #[count = TEXTURE_CNT]
        #[flags = "PARTIALLY_BOUND | UPDATE_AFTER_BIND"]
        _textures: (),

        #[binding = 2]
        #[descriptor_type = "COMBINED_IMAGE_SAMPLER"]
        #[count = 4]
        _shadow_maps: (),

        _not_a_binding: (),
    }

    #[test]
    fn test_derive_collects_bindings() {
        let bindings = TestLayout::get_shader_bindings();
        assert_eq!(bindings.len(), 3);
        assert_eq!(bindings[1].name, "textures");
        assert_eq!(bindings[1].count, TEXTURE_CNT);
        assert_eq!(
            bindings[1].flags,
            vk::DescriptorBindingFlags::PARTIALLY_BOUND | vk::DescriptorBindingFlags::UPDATE_AFTER_BIND
        );
        assert_eq!(bindings[0].stage_flags, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT);
    }

    #[test]
    fn test_static_getter() {
        let item = TestLayout::textures();
        assert_eq!(item.binding, 1);
        assert_eq!(item.descriptor_type, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
        assert_eq!(TestLayout::per_frame().descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
    }

    #[test]
    fn test_vk_bindings_and_flags_align() {
        let (bindings, flags) = TestLayout::get_vk_bindings();
        assert_eq!(bindings.len(), flags.len());
        assert_eq!(bindings[2].descriptor_count, 4);
        assert_eq!(flags[2], vk::DescriptorBindingFlags::empty());
    }

    #[test]
    fn test_pool_sizes_merge_same_type() {
        let sizes = TestLayout::get_pool_sizes(2);
        assert_eq!(sizes.len(), 2);
        let samplers = sizes.iter().find(|s| s.ty == vk::DescriptorType::COMBINED_IMAGE_SAMPLER).unwrap();
        assert_eq!(samplers.descriptor_count, (TEXTURE_CNT + 4) * 2);
        let ubo = sizes.iter().find(|s| s.ty == vk::DescriptorType::UNIFORM_BUFFER).unwrap();
        assert_eq!(ubo.descriptor_count, 2);
    }
}
