use ash::vk;
use ember_descriptor_layout_trait::DescriptorBindingItem;
use itertools::Itertools;

/// 对 vk::WriteDescriptorSet 的封装，自身持有 buffer/image info 的内存
#[derive(Clone, Debug)]
pub struct GfxWriteDescriptorSet {
    pub dst_set: vk::DescriptorSet,
    pub dst_binding: u32,
    pub dst_array_element: u32,
    pub descriptor_type: vk::DescriptorType,

    pub buffer_infos: Vec<vk::DescriptorBufferInfo>,
    pub image_infos: Vec<vk::DescriptorImageInfo>,
}
impl GfxWriteDescriptorSet {
    /// buffer_infos 和 image_infos 有且只有一个非空
    pub fn to_vk_type(&self) -> vk::WriteDescriptorSet<'_> {
        debug_assert!(
            self.buffer_infos.is_empty() != self.image_infos.is_empty(),
            "exactly one of buffer_infos and image_infos should be set"
        );
        let descriptor_count = self.buffer_infos.len().max(self.image_infos.len());

        vk::WriteDescriptorSet {
            dst_set: self.dst_set,
            dst_binding: self.dst_binding,
            dst_array_element: self.dst_array_element,
            descriptor_count: descriptor_count as u32,
            descriptor_type: self.descriptor_type,
            // 选择 buffer ptr 还是 image ptr，是由 descriptor type 控制的
            p_buffer_info: self.buffer_infos.as_ptr(),
            p_image_info: self.image_infos.as_ptr(),
            ..Default::default()
        }
    }

    pub fn with_writes(writes: &[Self], cbk: impl FnOnce(&[vk::WriteDescriptorSet])) {
        let writes = writes.iter().map(|w| w.to_vk_type()).collect_vec();
        cbk(&writes);
    }
}

/// 用于通过 DescriptorBindingItem 来操作对应 descriptor set 的对应 binding
pub trait GfxDescriptorCursor {
    fn get_binding(&self) -> &DescriptorBindingItem;

    /// 确保当前 descriptor 是 buffer
    fn write_buffer(
        &self,
        dst_set: vk::DescriptorSet,
        start_array: u32,
        buffers: Vec<vk::DescriptorBufferInfo>,
    ) -> GfxWriteDescriptorSet {
        let item = self.get_binding();
        debug_assert!(start_array as usize + buffers.len() <= item.count as usize);
        GfxWriteDescriptorSet {
            dst_set,
            dst_binding: item.binding,
            dst_array_element: start_array,
            buffer_infos: buffers,
            descriptor_type: item.descriptor_type,
            image_infos: vec![],
        }
    }

    /// 确保当前 descriptor 是 image
    fn write_image(
        &self,
        dst_set: vk::DescriptorSet,
        start_array: u32,
        images: Vec<vk::DescriptorImageInfo>,
    ) -> GfxWriteDescriptorSet {
        let item = self.get_binding();
        debug_assert!(start_array as usize + images.len() <= item.count as usize);
        GfxWriteDescriptorSet {
            dst_set,
            dst_binding: item.binding,
            dst_array_element: start_array,
            descriptor_type: item.descriptor_type,
            buffer_infos: vec![],
            image_infos: images,
        }
    }
}

impl GfxDescriptorCursor for DescriptorBindingItem {
    fn get_binding(&self) -> &DescriptorBindingItem {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEXTURES: DescriptorBindingItem = DescriptorBindingItem {
        name: "textures",
        binding: 1,
        descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        stage_flags: vk::ShaderStageFlags::FRAGMENT,
        count: 8,
        flags: vk::DescriptorBindingFlags::PARTIALLY_BOUND,
    };

    #[test]
    fn test_write_image_uses_binding_info() {
        let write = TEXTURES.write_image(vk::DescriptorSet::null(), 3, vec![vk::DescriptorImageInfo::default(); 2]);
        assert_eq!(write.dst_binding, 1);
        assert_eq!(write.dst_array_element, 3);
        assert_eq!(write.descriptor_type, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);

        let raw = write.to_vk_type();
        assert_eq!(raw.descriptor_count, 2);
    }

    #[test]
    fn test_with_writes_keeps_order() {
        let writes = vec![
            TEXTURES.write_image(vk::DescriptorSet::null(), 0, vec![vk::DescriptorImageInfo::default()]),
            TEXTURES.write_image(vk::DescriptorSet::null(), 5, vec![vk::DescriptorImageInfo::default()]),
        ];
        let mut elements = vec![];
        GfxWriteDescriptorSet::with_writes(&writes, |raw| {
            elements = raw.iter().map(|w| w.dst_array_element).collect();
        });
        assert_eq!(elements, vec![0, 5]);
    }
}
