use std::collections::VecDeque;
use std::path::Path;

use ash::vk;
use ember_asset::asset_path::{content_hash_key, path_key};
use ember_asset::loader::ImageLoader;
use ember_asset::raw::RawImage;
use ember_gfx::descriptors::sampler::{GfxSampler, GfxSamplerCreateInfo};
use ember_gfx::gfx::Gfx;
use ember_gfx::resources::image::GfxImage;
use ember_gfx::resources::image_view::{GfxImageView, GfxImageViewDesc};
use rustc_hash::FxHashMap;

use crate::bindless::{BindlessDescriptorBinding, BindlessTable};
use crate::gpu_data::MAX_TEXTURES;
use crate::handles::TextureId;
use crate::retire_queue::RetireQueue;

/// 贴图数据的颜色空间，决定 image 的 format
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureColorSpace {
    /// albedo
    Srgb,
    /// normal、metal-rough 等数据贴图
    Linear,
}
impl TextureColorSpace {
    #[inline]
    pub fn format(self) -> vk::Format {
        match self {
            Self::Srgb => vk::Format::R8G8B8A8_SRGB,
            Self::Linear => vk::Format::R8G8B8A8_UNORM,
        }
    }
}

/// 6 个常驻的占位贴图，下标即为 slot
static PLACEHOLDERS: [(&str, [u8; 4], TextureColorSpace); TextureId::PLACEHOLDER_COUNT as usize] = [
    ("white", [255, 255, 255, 255], TextureColorSpace::Srgb),
    ("gray", [128, 128, 128, 255], TextureColorSpace::Srgb),
    ("normal", [128, 128, 255, 255], TextureColorSpace::Linear),
    ("black", [0, 0, 0, 255], TextureColorSpace::Srgb),
    // g 为 roughness，b 为 metallic
    ("metalness", [0, 255, 0, 255], TextureColorSpace::Linear),
    ("invalid", [255, 0, 255, 255], TextureColorSpace::Srgb),
];

struct TextureSlot {
    key: String,
    ref_count: u32,
}

#[derive(Debug, PartialEq, Eq)]
pub enum TextureRelease {
    /// 占位贴图不参与引用计数
    Placeholder,
    StillUsed,
    Freed,
    Unknown,
}

/// texture slot 的分配和引用计数，不涉及 GPU
///
/// 前 6 个 slot 永远属于占位贴图；释放的 slot 进入 FIFO 队列，先释放的先复用
pub struct TextureTable {
    capacity: u32,
    slots: Vec<Option<TextureSlot>>,
    key_to_id: FxHashMap<String, TextureId>,
    free_slots: VecDeque<TextureId>,
}
impl TextureTable {
    pub fn new(capacity: u32) -> Self {
        debug_assert!(capacity >= TextureId::PLACEHOLDER_COUNT);
        let slots = PLACEHOLDERS
            .iter()
            .map(|(name, _, _)| {
                Some(TextureSlot {
                    key: format!("placeholder:{name}"),
                    ref_count: 1,
                })
            })
            .collect();
        Self {
            capacity,
            slots,
            key_to_id: FxHashMap::default(),
            free_slots: VecDeque::new(),
        }
    }

    /// 已加载的 key 引用计数加一
    pub fn retain_by_key(&mut self, key: &str) -> Option<TextureId> {
        let id = *self.key_to_id.get(key)?;
        if let Some(slot) = self.slots[id.index()].as_mut() {
            slot.ref_count += 1;
        }
        Some(id)
    }

    /// 为新的 key 分配 slot，表满时返回 None
    pub fn insert(&mut self, key: &str) -> Option<TextureId> {
        let id = match self.free_slots.pop_front() {
            Some(id) => id,
            None if (self.slots.len() as u32) < self.capacity => {
                self.slots.push(None);
                TextureId(self.slots.len() as u32 - 1)
            }
            None => return None,
        };
        debug_assert!(!id.is_placeholder());

        self.slots[id.index()] = Some(TextureSlot {
            key: key.to_string(),
            ref_count: 1,
        });
        self.key_to_id.insert(key.to_string(), id);
        Some(id)
    }

    pub fn release(&mut self, id: TextureId) -> TextureRelease {
        if id.is_placeholder() {
            return TextureRelease::Placeholder;
        }
        let Some(slot) = self.slots.get_mut(id.index()).and_then(|s| s.as_mut()) else {
            debug_assert!(false, "unload unknown texture {}", id);
            log::error!("unload unknown texture {}", id);
            return TextureRelease::Unknown;
        };

        slot.ref_count -= 1;
        if slot.ref_count > 0 {
            return TextureRelease::StillUsed;
        }

        if let Some(slot) = self.slots[id.index()].take() {
            self.key_to_id.remove(&slot.key);
        }
        self.free_slots.push_back(id);
        TextureRelease::Freed
    }

    #[inline]
    pub fn ref_count(&self, id: TextureId) -> Option<u32> {
        self.slots.get(id.index()).and_then(|s| s.as_ref()).map(|s| s.ref_count)
    }

    #[inline]
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

struct GpuTexture {
    image: GfxImage,
    view: GfxImageView,
}
impl GpuTexture {
    fn new(image: &RawImage, color_space: TextureColorSpace, name: &str) -> anyhow::Result<Self> {
        anyhow::ensure!(image.is_valid(), "texture: invalid image data for {}", name);

        let format = color_space.format();
        let rgba = image.to_rgba8();
        let gfx_image = GfxImage::from_rgba8_with_mips(image.width, image.height, format, &rgba, name)?;
        let view = GfxImageView::new(
            gfx_image.handle(),
            GfxImageViewDesc::new_2d(format, vk::ImageAspectFlags::COLOR).mip_levels(gfx_image.mip_levels()),
            format!("{name}-view"),
        );
        match view {
            Ok(view) => Ok(Self { image: gfx_image, view }),
            Err(e) => {
                gfx_image.destroy();
                Err(e)
            }
        }
    }

    fn destroy(self) {
        self.view.destroy();
        self.image.destroy();
    }
}

/// bindless texture 数组（binding 1）的持有者
pub struct TextureManager {
    table: TextureTable,
    /// 下标为 TextureId
    textures: Vec<Option<GpuTexture>>,
    sampler: GfxSampler,

    retired: RetireQueue<GpuTexture>,
}
// new & init
impl TextureManager {
    pub fn new(bindless: &mut BindlessTable) -> anyhow::Result<Self> {
        let _span = tracy_client::span!("TextureManager::new");

        let sampler = GfxSampler::new(
            &GfxSamplerCreateInfo::new_material(Gfx::get().max_sampler_anisotropy()),
            "material-sampler",
        )?;

        let mut textures = Vec::with_capacity(PLACEHOLDERS.len());
        for (name, pixel, color_space) in PLACEHOLDERS.iter() {
            let raw = RawImage::new_static(1, 1, 4, pixel);
            let texture = GpuTexture::new(&raw, *color_space, &format!("placeholder-{name}"))?;
            bindless.queue_image_all(
                BindlessDescriptorBinding::textures(),
                textures.len() as u32,
                texture.view.handle(),
                sampler.handle(),
            );
            textures.push(Some(texture));
        }

        Ok(Self {
            table: TextureTable::new(MAX_TEXTURES),
            textures,
            sampler,
            retired: RetireQueue::new(),
        })
    }
}
// getters
impl TextureManager {
    #[inline]
    pub fn sampler(&self) -> vk::Sampler {
        self.sampler.handle()
    }

    #[inline]
    pub fn table(&self) -> &TextureTable {
        &self.table
    }

    #[inline]
    pub fn view(&self, id: TextureId) -> Option<vk::ImageView> {
        self.textures.get(id.index()).and_then(|t| t.as_ref()).map(|t| t.view.handle())
    }
}
// tools
impl TextureManager {
    /// 从文件加载，key 为规范化之后的路径
    pub fn load_or_get_texture(
        &mut self,
        path: &Path,
        color_space: TextureColorSpace,
        loader: &dyn ImageLoader,
        bindless: &mut BindlessTable,
    ) -> TextureId {
        let _span = tracy_client::span!("TextureManager::load_or_get_texture");
        let key = path_key(path);
        if let Some(id) = self.table.retain_by_key(&key) {
            return id;
        }

        match loader.load_image(path) {
            Ok(image) => self.create_texture(key, &image, color_space, bindless),
            Err(e) => {
                log::warn!("texture: failed to load {}: {:#}", key, e);
                TextureId::INVALID
            }
        }
    }

    /// 模型内嵌的图片，key 为像素内容的 hash
    pub fn load_or_get_embedded(
        &mut self,
        image: &RawImage,
        color_space: TextureColorSpace,
        bindless: &mut BindlessTable,
    ) -> TextureId {
        let key = content_hash_key(image.width, image.height, &image.pixels);
        if let Some(id) = self.table.retain_by_key(&key) {
            return id;
        }
        self.create_texture(key, image, color_space, bindless)
    }

    fn create_texture(
        &mut self,
        key: String,
        image: &RawImage,
        color_space: TextureColorSpace,
        bindless: &mut BindlessTable,
    ) -> TextureId {
        let Some(id) = self.table.insert(&key) else {
            log::error!("texture table full ({}), {} uses the invalid placeholder", MAX_TEXTURES, key);
            return TextureId::INVALID;
        };

        let texture = match GpuTexture::new(image, color_space, &key) {
            Ok(texture) => texture,
            Err(e) => {
                log::warn!("texture: failed to create {}: {:#}", key, e);
                self.table.release(id);
                return TextureId::INVALID;
            }
        };

        bindless.queue_image_all(BindlessDescriptorBinding::textures(), id.0, texture.view.handle(), self.sampler.handle());
        if self.textures.len() <= id.index() {
            self.textures.resize_with(id.index() + 1, || None);
        }
        self.textures[id.index()] = Some(texture);
        log::info!("texture {} loaded: {} ({}x{})", id, key, image.width, image.height);
        id
    }

    /// 引用计数归零时，slot 重新指向 invalid 占位贴图，image 等到所有 frame 都不再使用之后销毁
    pub fn unload_texture(&mut self, id: TextureId, frame_id: u64, bindless: &mut BindlessTable) {
        if self.table.release(id) != TextureRelease::Freed {
            return;
        }
        let Some(texture) = self.textures[id.index()].take() else {
            return;
        };
        if let Some(invalid) = self.view(TextureId::INVALID) {
            bindless.queue_image_all(BindlessDescriptorBinding::textures(), id.0, invalid, self.sampler.handle());
        }
        self.retired.retire(frame_id, texture);
    }

    /// # Phase: Begin Frame
    ///
    /// 销毁已经完成的 frame 不再引用的 image
    pub fn retire_completed(&mut self, completed_frame_id: Option<u64>) {
        for texture in self.retired.take_completed(completed_frame_id) {
            texture.destroy();
        }
    }
}
// destroy
impl TextureManager {
    pub fn destroy(mut self) {
        for texture in self.retired.take_all() {
            texture.destroy();
        }
        for texture in self.textures.drain(..).flatten() {
            texture.destroy();
        }
        self.sampler.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refcount_two_to_one_keeps_slot() {
        let mut table = TextureTable::new(16);
        let id = table.insert("a.png").unwrap();
        assert_eq!(table.retain_by_key("a.png"), Some(id));
        assert_eq!(table.ref_count(id), Some(2));

        assert_eq!(table.release(id), TextureRelease::StillUsed);
        assert_eq!(table.ref_count(id), Some(1));
        assert_eq!(table.retain_by_key("a.png"), Some(id));
    }

    #[test]
    fn test_first_slot_after_placeholders() {
        let mut table = TextureTable::new(16);
        assert_eq!(table.insert("a.png"), Some(TextureId(TextureId::PLACEHOLDER_COUNT)));
    }

    #[test]
    fn test_placeholders_never_reassigned() {
        let mut table = TextureTable::new(8);
        for id in 0..TextureId::PLACEHOLDER_COUNT {
            assert_eq!(table.release(TextureId(id)), TextureRelease::Placeholder);
        }
        for round in 0..10 {
            let a = table.insert(&format!("a{round}")).unwrap();
            let b = table.insert(&format!("b{round}")).unwrap();
            assert!(!a.is_placeholder() && !b.is_placeholder());
            table.release(a);
            table.release(b);
        }
        assert_eq!(table.live_count(), TextureId::PLACEHOLDER_COUNT as usize);
    }

    #[test]
    fn test_free_slots_fifo() {
        let mut table = TextureTable::new(16);
        let a = table.insert("a").unwrap();
        let b = table.insert("b").unwrap();
        table.release(a);
        table.release(b);
        assert_eq!(table.insert("c"), Some(a));
        assert_eq!(table.insert("d"), Some(b));
    }

    #[test]
    fn test_full_table() {
        let mut table = TextureTable::new(TextureId::PLACEHOLDER_COUNT + 1);
        assert!(table.insert("a").is_some());
        assert_eq!(table.insert("b"), None);
        assert_eq!(table.retain_by_key("b"), None);
    }

    #[test]
    fn test_freed_key_forgotten() {
        let mut table = TextureTable::new(16);
        let id = table.insert("a").unwrap();
        assert_eq!(table.release(id), TextureRelease::Freed);
        assert_eq!(table.retain_by_key("a"), None);
    }
}
