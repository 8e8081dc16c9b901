use std::collections::BTreeMap;

use ash::vk;
use ember_descriptor_layout_macro::DescriptorBinding;
use ember_descriptor_layout_trait::{DescriptorBindingItem, DescriptorBindingLayout};
use ember_gfx::descriptors::descriptor::{GfxDescriptorSet, GfxDescriptorSetLayout};
use ember_gfx::descriptors::descriptor_cursor::GfxDescriptorCursor;
use ember_gfx::descriptors::descriptor_pool::{GfxDescriptorPool, GfxDescriptorPoolCreateInfo};
use ember_gfx::gfx::Gfx;
use itertools::Itertools;

use crate::frame_counter::{FrameCounter, FrameLabel};
use crate::gpu_data::{ATTACHMENT_INPUT_COUNT, MAX_SHADOW_MAPS, MAX_TEXTURES};

#[derive(DescriptorBinding)]
pub struct BindlessDescriptorBinding {
    #[binding = 0]
    #[descriptor_type = "UNIFORM_BUFFER"]
    #[stage = "VERTEX | FRAGMENT"]
    #[flags = "UPDATE_AFTER_BIND"]
    _per_frame: (),

    #[binding = 1]
    #[descriptor_type = "COMBINED_IMAGE_SAMPLER"]
    #[stage = "FRAGMENT"]
    #[count = MAX_TEXTURES]
    #[flags = "PARTIALLY_BOUND | UPDATE_AFTER_BIND"]
    _textures: (),

    #[binding = 2]
    #[descriptor_type = "STORAGE_BUFFER"]
    #[stage = "VERTEX | FRAGMENT"]
    #[flags = "UPDATE_AFTER_BIND"]
    _materials: (),

    #[binding = 3]
    #[descriptor_type = "STORAGE_BUFFER"]
    #[stage = "VERTEX | FRAGMENT"]
    #[flags = "UPDATE_AFTER_BIND"]
    _instances: (),

    #[binding = 4]
    #[descriptor_type = "STORAGE_BUFFER"]
    #[stage = "VERTEX | FRAGMENT"]
    #[flags = "UPDATE_AFTER_BIND"]
    _lights: (),

    #[binding = 5]
    #[descriptor_type = "COMBINED_IMAGE_SAMPLER"]
    #[stage = "FRAGMENT"]
    #[count = MAX_SHADOW_MAPS]
    #[flags = "PARTIALLY_BOUND | UPDATE_AFTER_BIND"]
    _shadow_maps: (),

    #[binding = 6]
    #[descriptor_type = "COMBINED_IMAGE_SAMPLER"]
    #[stage = "FRAGMENT"]
    #[count = ATTACHMENT_INPUT_COUNT]
    #[flags = "PARTIALLY_BOUND | UPDATE_AFTER_BIND"]
    _attachments: (),
}

/// attachment inputs 数组中的下标
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum AttachmentInput {
    Albedo = 0,
    Normal = 1,
    MetalRough = 2,
    LightingColor = 3,
    Depth = 4,
}

/// 一次待写入的 descriptor
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DescriptorUpdate {
    Image {
        view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
    },
    Buffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    },
}

/// 按 frame slot 缓存的 descriptor 写入请求
///
/// 同一个 (binding, array element) 多次写入时只保留最后一次。
/// 每个 slot 只在自己那一帧被 drain，因此不会修改 GPU 正在使用的 descriptor set
pub struct DescriptorUpdateQueue<const N: usize> {
    pending: [BTreeMap<(u32, u32), DescriptorUpdate>; N],
}
impl<const N: usize> Default for DescriptorUpdateQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}
impl<const N: usize> DescriptorUpdateQueue<N> {
    pub fn new() -> Self {
        Self {
            pending: std::array::from_fn(|_| BTreeMap::new()),
        }
    }

    /// 写入所有 frame slot 的 descriptor set
    pub fn queue_all(&mut self, binding: u32, array_element: u32, update: DescriptorUpdate) {
        for slot in self.pending.iter_mut() {
            slot.insert((binding, array_element), update);
        }
    }

    /// 只写入某个 frame slot，用于每帧各自持有的资源
    pub fn queue_frame(&mut self, frame_index: usize, binding: u32, array_element: u32, update: DescriptorUpdate) {
        self.pending[frame_index].insert((binding, array_element), update);
    }

    /// 取出某个 slot 的所有请求，按 (binding, array element) 排序
    pub fn drain_frame(&mut self, frame_index: usize) -> Vec<(u32, u32, DescriptorUpdate)> {
        std::mem::take(&mut self.pending[frame_index])
            .into_iter()
            .map(|((binding, element), update)| (binding, element, update))
            .collect()
    }

    #[inline]
    pub fn pending_count(&self, frame_index: usize) -> usize {
        self.pending[frame_index].len()
    }
}

/// set 0：每个 frame in flight 一份的 bindless descriptor set
pub struct BindlessTable {
    layout: GfxDescriptorSetLayout<BindlessDescriptorBinding>,
    sets: [GfxDescriptorSet<BindlessDescriptorBinding>; FrameCounter::fif_count()],
    pool: GfxDescriptorPool,

    queue: DescriptorUpdateQueue<{ FrameCounter::fif_count() }>,
}
// new & init
impl BindlessTable {
    pub fn new() -> anyhow::Result<Self> {
        let set_count = FrameCounter::fif_count() as u32;
        let pool_ci = GfxDescriptorPoolCreateInfo::new(
            vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND,
            set_count,
            BindlessDescriptorBinding::get_pool_sizes(set_count),
        );
        let pool = GfxDescriptorPool::new(&pool_ci, "bindless")?;

        let layout = GfxDescriptorSetLayout::<BindlessDescriptorBinding>::new(
            vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL,
            "bindless-layout",
        )?;

        let mut sets = Vec::with_capacity(FrameCounter::fif_count());
        for frame_label in FrameCounter::frame_labels() {
            sets.push(GfxDescriptorSet::new(&pool, &layout, format!("bindless-descriptor-set-{frame_label}"))?);
        }
        let sets = sets
            .try_into()
            .map_err(|_| anyhow::anyhow!("bindless: descriptor set count mismatch"))?;

        Ok(Self {
            layout,
            sets,
            pool,
            queue: DescriptorUpdateQueue::new(),
        })
    }
}
// getters
impl BindlessTable {
    #[inline]
    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout.handle()
    }

    #[inline]
    pub fn current_set(&self, frame_label: FrameLabel) -> vk::DescriptorSet {
        self.sets[*frame_label].handle()
    }
}
// update
impl BindlessTable {
    pub fn queue_image_all(&mut self, item: &DescriptorBindingItem, index: u32, view: vk::ImageView, sampler: vk::Sampler) {
        debug_assert!(index < item.count, "{} index {} out of range", item.name, index);
        self.queue.queue_all(
            item.binding,
            index,
            DescriptorUpdate::Image {
                view,
                sampler,
                layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            },
        );
    }

    pub fn queue_image_frame(
        &mut self,
        frame_label: FrameLabel,
        item: &DescriptorBindingItem,
        index: u32,
        view: vk::ImageView,
        sampler: vk::Sampler,
    ) {
        debug_assert!(index < item.count, "{} index {} out of range", item.name, index);
        self.queue.queue_frame(
            *frame_label,
            item.binding,
            index,
            DescriptorUpdate::Image {
                view,
                sampler,
                layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            },
        );
    }

    /// 整个 buffer 绑定到某个 frame slot
    pub fn queue_buffer_frame(&mut self, frame_label: FrameLabel, item: &DescriptorBindingItem, buffer: vk::Buffer) {
        self.queue.queue_frame(
            *frame_label,
            item.binding,
            0,
            DescriptorUpdate::Buffer {
                buffer,
                offset: 0,
                range: vk::WHOLE_SIZE,
            },
        );
    }

    /// # Phase: Update
    ///
    /// 在录制之前，将当前 slot 缓存的写入请求应用到当前 slot 的 descriptor set
    pub fn apply_updates(&mut self, frame_label: FrameLabel) {
        let _span = tracy_client::span!("BindlessTable::apply_updates");

        let dst_set = self.current_set(frame_label);
        let items = BindlessDescriptorBinding::get_shader_bindings();
        let writes = self
            .queue
            .drain_frame(*frame_label)
            .into_iter()
            .filter_map(|(binding, element, update)| {
                let Some(item) = items.iter().find(|item| item.binding == binding) else {
                    log::error!("bindless: unknown binding {}", binding);
                    return None;
                };
                Some(match update {
                    DescriptorUpdate::Image { view, sampler, layout } => item.write_image(
                        dst_set,
                        element,
                        vec![vk::DescriptorImageInfo::default().image_view(view).sampler(sampler).image_layout(layout)],
                    ),
                    DescriptorUpdate::Buffer { buffer, offset, range } => item.write_buffer(
                        dst_set,
                        element,
                        vec![vk::DescriptorBufferInfo::default().buffer(buffer).offset(offset).range(range)],
                    ),
                })
            })
            .collect_vec();

        if writes.is_empty() {
            return;
        }
        log::debug!("bindless: apply {} descriptor writes to frame {}", writes.len(), frame_label);
        Gfx::get().gfx_device().write_descriptor_sets(&writes);
    }
}
// destroy
impl BindlessTable {
    pub fn destroy(self) {
        // descriptor sets 跟随 pool 一起销毁
        self.pool.destroy();
        self.layout.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn image(raw: u64) -> DescriptorUpdate {
        DescriptorUpdate::Image {
            view: vk::ImageView::from_raw(raw),
            sampler: vk::Sampler::null(),
            layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }

    #[test]
    fn test_queue_all_reaches_every_slot() {
        let mut queue = DescriptorUpdateQueue::<2>::new();
        queue.queue_all(1, 7, image(1));
        assert_eq!(queue.pending_count(0), 1);
        assert_eq!(queue.pending_count(1), 1);

        assert_eq!(queue.drain_frame(0), vec![(1, 7, image(1))]);
        assert_eq!(queue.pending_count(0), 0);
        // 另一个 slot 不受影响
        assert_eq!(queue.drain_frame(1), vec![(1, 7, image(1))]);
    }

    #[test]
    fn test_last_write_wins() {
        let mut queue = DescriptorUpdateQueue::<2>::new();
        queue.queue_all(1, 7, image(1));
        queue.queue_all(1, 7, image(2));
        queue.queue_all(1, 8, image(3));
        assert_eq!(queue.drain_frame(0), vec![(1, 7, image(2)), (1, 8, image(3))]);
    }

    #[test]
    fn test_queue_frame_only_touches_one_slot() {
        let mut queue = DescriptorUpdateQueue::<2>::new();
        queue.queue_frame(1, 3, 0, image(9));
        assert_eq!(queue.pending_count(0), 0);
        assert_eq!(queue.drain_frame(1).len(), 1);
    }

    #[test]
    fn test_binding_layout() {
        let bindings = BindlessDescriptorBinding::get_shader_bindings();
        assert_eq!(bindings.len(), 7);
        assert_eq!(BindlessDescriptorBinding::textures().count, MAX_TEXTURES);
        assert_eq!(BindlessDescriptorBinding::shadow_maps().binding, 5);
        assert_eq!(BindlessDescriptorBinding::attachments().count, ATTACHMENT_INPUT_COUNT);
        assert!(
            BindlessDescriptorBinding::textures()
                .flags
                .contains(vk::DescriptorBindingFlags::PARTIALLY_BOUND)
        );
    }
}
