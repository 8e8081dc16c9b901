use anyhow::Context;
use ash::vk;
use ember_descriptor_layout_trait::DescriptorBindingLayout;

use crate::{descriptors::descriptor_pool::GfxDescriptorPool, foundation::debug_messenger::DebugType, gfx::Gfx};

/// 描述符集布局
///
/// 使用泛型参数 T 来关联具体的绑定布局类型，绑定信息由 T 在编译期确定。
///
/// # 泛型参数
/// - T: 实现了 DescriptorBindingLayout trait 的类型，定义了具体的绑定布局
pub struct GfxDescriptorSetLayout<T: DescriptorBindingLayout> {
    /// Vulkan 描述符集布局句柄
    layout: vk::DescriptorSetLayout,
    /// 用于在编译时关联泛型参数 T
    phantom_data: std::marker::PhantomData<T>,
}
impl<T: DescriptorBindingLayout> GfxDescriptorSetLayout<T> {
    /// 创建新的描述符集布局
    ///
    /// 每个 binding 的 flags 来自 T，通过 DescriptorSetLayoutBindingFlagsCreateInfo 传入
    pub fn new(flags: vk::DescriptorSetLayoutCreateFlags, debug_name: impl AsRef<str>) -> anyhow::Result<Self> {
        let (bindings, binding_flags) = T::get_vk_bindings();
        let mut bind_flags_ci = vk::DescriptorSetLayoutBindingFlagsCreateInfo::default().binding_flags(&binding_flags);

        let create_info =
            vk::DescriptorSetLayoutCreateInfo::default().flags(flags).bindings(&bindings).push_next(&mut bind_flags_ci);

        let gfx_device = Gfx::get().gfx_device();
        let layout = unsafe { gfx_device.create_descriptor_set_layout(&create_info, None) }
            .with_context(|| format!("gfx: create descriptor set layout {}", debug_name.as_ref()))?;
        let layout = Self {
            layout,
            phantom_data: std::marker::PhantomData,
        };
        gfx_device.set_debug_name(&layout, debug_name);
        Ok(layout)
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    pub fn destroy(self) {
        unsafe {
            Gfx::get().gfx_device().destroy_descriptor_set_layout(self.layout, None);
        }
    }
}
impl<T: DescriptorBindingLayout> DebugType for GfxDescriptorSetLayout<T> {
    fn debug_type_name() -> &'static str {
        "GfxDescriptorSetLayout"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.layout
    }
}

/// 描述符集
///
/// # Destroy
///
/// 跟随 descriptor pool 一起销毁
pub struct GfxDescriptorSet<T: DescriptorBindingLayout> {
    /// Vulkan 描述符集句柄
    handle: vk::DescriptorSet,
    /// 用于在编译时关联泛型参数 T
    phantom_data: std::marker::PhantomData<T>,
}
impl<T: DescriptorBindingLayout> GfxDescriptorSet<T> {
    pub fn new(
        descriptor_pool: &GfxDescriptorPool,
        layout: &GfxDescriptorSetLayout<T>,
        debug_name: impl AsRef<str>,
    ) -> anyhow::Result<Self> {
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(descriptor_pool.handle())
            .set_layouts(std::slice::from_ref(&layout.layout));
        let gfx_device = Gfx::get().gfx_device();
        let descriptor_sets = unsafe { gfx_device.allocate_descriptor_sets(&alloc_info) }
            .with_context(|| format!("gfx: allocate descriptor set {}", debug_name.as_ref()))?;
        let set = Self {
            handle: descriptor_sets[0],
            phantom_data: std::marker::PhantomData,
        };
        gfx_device.set_debug_name(&set, debug_name);
        Ok(set)
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorSet {
        self.handle
    }
}
impl<T: DescriptorBindingLayout> DebugType for GfxDescriptorSet<T> {
    fn debug_type_name() -> &'static str {
        "GfxDescriptorSet"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}
