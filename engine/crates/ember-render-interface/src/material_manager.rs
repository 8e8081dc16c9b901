use std::collections::{BTreeSet, VecDeque};

use ember_asset::loader::ImageLoader;
use ember_asset::raw::{RawMaterial, RawTextureRef};
use ember_gfx::resources::structured_buffer::GfxStructuredBuffer;
use glam::Vec4;
use itertools::Itertools;
use rustc_hash::FxHashMap;

use crate::bindless::{BindlessDescriptorBinding, BindlessTable};
use crate::frame_counter::{FrameCounter, FrameLabel};
use crate::gpu_data::{GpuMaterial, MAX_MATERIALS};
use crate::handles::{MaterialId, TextureId};
use crate::texture_manager::{TextureColorSpace, TextureManager};

/// material 引用的贴图：albedo、normal、metal-rough
pub type MaterialTextures = [TextureId; 3];

struct MaterialSlot {
    name: String,
    ref_count: u32,
    gpu: GpuMaterial,
    textures: MaterialTextures,
}

#[derive(Debug, PartialEq, Eq)]
pub enum MaterialRelease {
    /// 默认材质常驻
    Default,
    StillUsed,
    Freed { textures: MaterialTextures },
    Unknown,
}

fn default_gpu_material() -> GpuMaterial {
    GpuMaterial {
        base_color_factor: Vec4::ONE,
        albedo_tex: TextureId::WHITE.0,
        normal_tex: TextureId::NORMAL.0,
        metal_rough_tex: TextureId::METALNESS.0,
        metallic_factor: 0.0,
        roughness_factor: 1.0,
        _padding: [0; 3],
    }
}

/// material slot 的分配、按名字去重以及每个 frame slot 的脏标记
pub struct MaterialTable {
    capacity: u32,
    slots: Vec<Option<MaterialSlot>>,
    name_to_id: FxHashMap<String, MaterialId>,
    free_slots: VecDeque<MaterialId>,

    /// 每个 frame slot 各自持有一份 GPU 数据，需要分别写入
    dirty: [BTreeSet<MaterialId>; FrameCounter::fif_count()],
}
impl MaterialTable {
    pub fn new(capacity: u32) -> Self {
        let mut table = Self {
            capacity,
            slots: vec![Some(MaterialSlot {
                name: "default".to_string(),
                ref_count: 1,
                gpu: default_gpu_material(),
                textures: [TextureId::WHITE, TextureId::NORMAL, TextureId::METALNESS],
            })],
            name_to_id: FxHashMap::default(),
            free_slots: VecDeque::new(),
            dirty: std::array::from_fn(|_| BTreeSet::new()),
        };
        table.mark_dirty(MaterialId::DEFAULT);
        table
    }

    pub fn retain_by_name(&mut self, name: &str) -> Option<MaterialId> {
        let id = *self.name_to_id.get(name)?;
        if let Some(slot) = self.slots[id.index()].as_mut() {
            slot.ref_count += 1;
        }
        Some(id)
    }

    /// 表满时返回 None
    pub fn insert(&mut self, name: &str, gpu: GpuMaterial, textures: MaterialTextures) -> Option<MaterialId> {
        let id = match self.free_slots.pop_front() {
            Some(id) => id,
            None if (self.slots.len() as u32) < self.capacity => {
                self.slots.push(None);
                MaterialId(self.slots.len() as u32 - 1)
            }
            None => return None,
        };

        self.slots[id.index()] = Some(MaterialSlot {
            name: name.to_string(),
            ref_count: 1,
            gpu,
            textures,
        });
        self.name_to_id.insert(name.to_string(), id);
        self.mark_dirty(id);
        Some(id)
    }

    /// 插入失败时把已经解析出的贴图引用交还给 `release_texture`，占位贴图除外
    pub fn insert_or_release(
        &mut self,
        name: &str,
        gpu: GpuMaterial,
        textures: MaterialTextures,
        mut release_texture: impl FnMut(TextureId),
    ) -> Option<MaterialId> {
        let id = self.insert(name, gpu, textures);
        if id.is_none() {
            textures
                .into_iter()
                .filter(|texture| !texture.is_placeholder())
                .for_each(&mut release_texture);
        }
        id
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.free_slots.is_empty() && self.slots.len() as u32 >= self.capacity
    }

    pub fn release(&mut self, id: MaterialId) -> MaterialRelease {
        if id == MaterialId::DEFAULT {
            return MaterialRelease::Default;
        }
        let Some(slot) = self.slots.get_mut(id.index()).and_then(|s| s.as_mut()) else {
            debug_assert!(false, "unload unknown material {}", id);
            log::error!("unload unknown material {}", id);
            return MaterialRelease::Unknown;
        };

        slot.ref_count -= 1;
        if slot.ref_count > 0 {
            return MaterialRelease::StillUsed;
        }

        let Some(slot) = self.slots[id.index()].take() else {
            return MaterialRelease::Unknown;
        };
        self.name_to_id.remove(&slot.name);
        self.free_slots.push_back(id);
        // 已经释放的 slot 不再需要上传
        for dirty in self.dirty.iter_mut() {
            dirty.remove(&id);
        }
        MaterialRelease::Freed { textures: slot.textures }
    }

    fn mark_dirty(&mut self, id: MaterialId) {
        for dirty in self.dirty.iter_mut() {
            dirty.insert(id);
        }
    }

    /// 取出某个 frame slot 需要写入的材质，按 id 排序
    pub fn take_dirty(&mut self, frame_index: usize) -> Vec<(MaterialId, GpuMaterial)> {
        std::mem::take(&mut self.dirty[frame_index])
            .into_iter()
            .filter_map(|id| self.slots[id.index()].as_ref().map(|slot| (id, slot.gpu)))
            .collect()
    }

    #[inline]
    pub fn dirty_count(&self, frame_index: usize) -> usize {
        self.dirty[frame_index].len()
    }

    #[inline]
    pub fn ref_count(&self, id: MaterialId) -> Option<u32> {
        self.slots.get(id.index()).and_then(|s| s.as_ref()).map(|s| s.ref_count)
    }
}

/// 材质数组（binding 2），每个 frame in flight 一份
pub struct MaterialManager {
    table: MaterialTable,
    buffers: [GfxStructuredBuffer<GpuMaterial>; FrameCounter::fif_count()],
}
// new & init
impl MaterialManager {
    pub fn new(bindless: &mut BindlessTable) -> anyhow::Result<Self> {
        let mut buffers = Vec::with_capacity(FrameCounter::fif_count());
        for frame_label in FrameCounter::frame_labels() {
            let buffer = GfxStructuredBuffer::<GpuMaterial>::new_ssbo(
                MAX_MATERIALS as usize,
                format!("material-buffer-{frame_label}"),
            )?;
            bindless.queue_buffer_frame(frame_label, BindlessDescriptorBinding::materials(), buffer.vk_buffer());
            buffers.push(buffer);
        }
        let buffers = buffers
            .try_into()
            .map_err(|_| anyhow::anyhow!("material: buffer count mismatch"))?;

        Ok(Self {
            table: MaterialTable::new(MAX_MATERIALS),
            buffers,
        })
    }
}
// getters
impl MaterialManager {
    #[inline]
    pub fn table(&self) -> &MaterialTable {
        &self.table
    }
}
// tools
impl MaterialManager {
    /// 按名字去重；表满时返回 `MaterialId::INVALID`，绘制时使用默认材质
    pub fn load_or_get_material(
        &mut self,
        material: &RawMaterial,
        textures: &mut TextureManager,
        image_loader: &dyn ImageLoader,
        frame_id: u64,
        bindless: &mut BindlessTable,
    ) -> MaterialId {
        let _span = tracy_client::span!("MaterialManager::load_or_get_material");
        if let Some(id) = self.table.retain_by_name(&material.name) {
            return id;
        }
        if self.table.is_full() {
            log::error!("material table full ({}), {} uses the default material", MAX_MATERIALS, material.name);
            return MaterialId::INVALID;
        }

        let mut resolve = |texture: &RawTextureRef, color_space, placeholder| {
            Self::resolve_texture(texture, color_space, placeholder, textures, image_loader, bindless)
        };
        let texture_ids = [
            resolve(&material.albedo, TextureColorSpace::Srgb, TextureId::WHITE),
            resolve(&material.normal, TextureColorSpace::Linear, TextureId::NORMAL),
            resolve(&material.metallic_roughness, TextureColorSpace::Linear, TextureId::METALNESS),
        ];

        let gpu = GpuMaterial {
            base_color_factor: Vec4::from_array(material.base_color_factor),
            albedo_tex: texture_ids[0].0,
            normal_tex: texture_ids[1].0,
            metal_rough_tex: texture_ids[2].0,
            metallic_factor: material.metallic_factor,
            roughness_factor: material.roughness_factor,
            _padding: [0; 3],
        };

        let inserted = self.table.insert_or_release(&material.name, gpu, texture_ids, |texture| {
            textures.unload_texture(texture, frame_id, bindless)
        });
        match inserted {
            Some(id) => {
                log::debug!("material {} loaded: {}", id, material.name);
                id
            }
            None => {
                log::error!("material table full ({}), {} uses the default material", MAX_MATERIALS, material.name);
                MaterialId::INVALID
            }
        }
    }

    /// 内嵌图片优先，其次是路径，都没有时使用该通道的占位贴图
    fn resolve_texture(
        texture: &RawTextureRef,
        color_space: TextureColorSpace,
        placeholder: TextureId,
        textures: &mut TextureManager,
        image_loader: &dyn ImageLoader,
        bindless: &mut BindlessTable,
    ) -> TextureId {
        if let Some(image) = &texture.embedded {
            textures.load_or_get_embedded(image, color_space, bindless)
        } else if let Some(path) = &texture.path {
            textures.load_or_get_texture(path, color_space, image_loader, bindless)
        } else {
            placeholder
        }
    }

    /// 引用计数归零时释放其引用的贴图
    pub fn unload_material(
        &mut self,
        id: MaterialId,
        textures: &mut TextureManager,
        frame_id: u64,
        bindless: &mut BindlessTable,
    ) {
        if !id.is_valid() {
            return;
        }
        if let MaterialRelease::Freed { textures: texture_ids } = self.table.release(id) {
            for texture in texture_ids {
                textures.unload_texture(texture, frame_id, bindless);
            }
        }
    }

    /// # Phase: Update
    ///
    /// 只写入当前 frame slot 的脏材质，flush 每一段连续的范围
    pub fn pre_draw(&mut self, frame_label: FrameLabel) -> anyhow::Result<()> {
        let _span = tracy_client::span!("MaterialManager::pre_draw");
        let dirty = self.table.take_dirty(*frame_label);
        if dirty.is_empty() {
            return Ok(());
        }

        let buffer = &mut self.buffers[*frame_label];
        let mapped = buffer.mapped_slice();
        for (id, gpu) in dirty.iter() {
            mapped[id.index()] = *gpu;
        }

        let runs = dirty.iter().enumerate().group_by(|(i, (id, _))| id.index() - i);
        for (_, run) in &runs {
            let run = run.collect_vec();
            let first = run[0].1.0.index();
            buffer.flush_range(first, run.len())?;
        }
        Ok(())
    }
}
// destroy
impl MaterialManager {
    pub fn destroy(self) {
        for buffer in self.buffers {
            buffer.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::texture_manager::TextureTable;

    #[test]
    fn test_default_material_is_slot_zero() {
        let mut table = MaterialTable::new(8);
        assert_eq!(table.release(MaterialId::DEFAULT), MaterialRelease::Default);
        assert_eq!(table.take_dirty(0).len(), 1);
        let id = table.insert("m", default_gpu_material(), [TextureId::WHITE; 3]).unwrap();
        assert_eq!(id, MaterialId(1));
    }

    #[test]
    fn test_dedup_by_name() {
        let mut table = MaterialTable::new(8);
        let id = table.insert("m", default_gpu_material(), [TextureId::WHITE; 3]).unwrap();
        assert_eq!(table.retain_by_name("m"), Some(id));
        assert_eq!(table.ref_count(id), Some(2));
        assert_eq!(table.release(id), MaterialRelease::StillUsed);
        assert_eq!(table.release(id), MaterialRelease::Freed {
            textures: [TextureId::WHITE; 3]
        });
        assert_eq!(table.retain_by_name("m"), None);
    }

    #[test]
    fn test_dirty_tracked_per_frame_slot() {
        let mut table = MaterialTable::new(8);
        table.take_dirty(0);
        table.take_dirty(1);

        let id = table.insert("m", default_gpu_material(), [TextureId::WHITE; 3]).unwrap();
        assert_eq!(table.take_dirty(0).iter().map(|(id, _)| *id).collect_vec(), vec![id]);
        assert_eq!(table.dirty_count(0), 0);
        // 另一个 slot 仍然需要写入
        assert_eq!(table.dirty_count(1), 1);
        assert_eq!(table.take_dirty(1).len(), 1);
    }

    #[test]
    fn test_full_table() {
        let mut table = MaterialTable::new(2);
        assert!(table.insert("a", default_gpu_material(), [TextureId::WHITE; 3]).is_some());
        assert!(table.insert("b", default_gpu_material(), [TextureId::WHITE; 3]).is_none());
    }

    #[test]
    fn test_full_table_returns_texture_refs() {
        let mut textures = TextureTable::new(16);
        let shared = textures.insert("shared.png").unwrap();

        let mut table = MaterialTable::new(MAX_MATERIALS);
        for i in 1..MAX_MATERIALS {
            assert!(table.insert(&format!("m{i}"), default_gpu_material(), [TextureId::WHITE; 3]).is_some());
        }
        assert!(table.is_full());

        // 模拟一次解析：albedo 新加载，normal 复用已有贴图，metal-rough 使用占位贴图
        let albedo = textures.insert("albedo.png").unwrap();
        assert_eq!(textures.retain_by_key("shared.png"), Some(shared));
        let texture_ids = [albedo, shared, TextureId::METALNESS];

        let inserted = table.insert_or_release("overflow", default_gpu_material(), texture_ids, |texture| {
            textures.release(texture);
        });
        assert_eq!(inserted, None);
        assert_eq!(textures.ref_count(albedo), None);
        assert_eq!(textures.ref_count(shared), Some(1));
        assert_eq!(textures.ref_count(TextureId::METALNESS), Some(1));
        assert_eq!(table.retain_by_name("overflow"), None);
    }

    #[test]
    fn test_insert_keeps_texture_refs() {
        let mut textures = TextureTable::new(16);
        let albedo = textures.insert("albedo.png").unwrap();
        let mut table = MaterialTable::new(8);
        let texture_ids = [albedo, TextureId::NORMAL, TextureId::METALNESS];
        let id = table.insert_or_release("m", default_gpu_material(), texture_ids, |texture| {
            textures.release(texture);
        });
        assert!(id.is_some());
        assert!(!table.is_full());
        assert_eq!(textures.ref_count(albedo), Some(1));
    }

    #[test]
    fn test_freed_slot_not_uploaded() {
        let mut table = MaterialTable::new(8);
        let id = table.insert("m", default_gpu_material(), [TextureId::WHITE; 3]).unwrap();
        table.release(id);
        assert!(table.take_dirty(0).iter().all(|(dirty, _)| *dirty != id));
    }
}
