//! 全局的顶点 / 索引 arena，以及按 submesh 合并的 indirect draw
//!
//! 所有 mesh 共享同一对 vertex / index buffer，每个 frame in flight 各持有一份；
//! 新加载的数据在之后的 N 帧内分别写入每一份 buffer。

pub mod draw_batcher;
pub mod free_list;
pub mod mesh_store;

use std::path::Path;

use anyhow::Context;
use ash::vk;
use ember_asset::asset_path::path_key;
use ember_asset::loader::{ImageLoader, ModelLoader};
use ember_gfx::commands::command_buffer::GfxCommandBuffer;
use ember_gfx::resources::structured_buffer::GfxStructuredBuffer;
use glam::Mat4;

use crate::bindless::{BindlessDescriptorBinding, BindlessTable};
use crate::frame_counter::{FrameCounter, FrameLabel};
use crate::gpu_data::{
    DrawCommand, INDEX_ARENA_CAPACITY, MAX_INSTANCES, MeshInstanceData, VERTEX_ARENA_CAPACITY, Vertex,
};
use crate::handles::{MaterialId, MeshId};
use crate::material_manager::MaterialManager;
use crate::mesh_manager::draw_batcher::DrawBatcher;
use crate::mesh_manager::mesh_store::{MeshGeometry, MeshRelease, MeshStore};
use crate::texture_manager::TextureManager;

/// submesh 引用的材质；没有材质或者下标越界时使用默认材质
fn submesh_material(materials: &[MaterialId], material_index: Option<usize>) -> MaterialId {
    material_index.and_then(|idx| materials.get(idx).copied()).unwrap_or(MaterialId::DEFAULT)
}

/// 每个 frame in flight 一份的 GPU buffer
struct MeshFrameBuffers {
    vertices: GfxStructuredBuffer<Vertex>,
    indices: GfxStructuredBuffer<u32>,
    instances: GfxStructuredBuffer<MeshInstanceData>,
    commands: GfxStructuredBuffer<DrawCommand>,
}
impl MeshFrameBuffers {
    fn new(frame_label: FrameLabel) -> anyhow::Result<Self> {
        Ok(Self {
            vertices: GfxStructuredBuffer::new(
                VERTEX_ARENA_CAPACITY as usize,
                vk::BufferUsageFlags::VERTEX_BUFFER,
                format!("vertex-arena-{frame_label}"),
            )?,
            indices: GfxStructuredBuffer::new(
                INDEX_ARENA_CAPACITY as usize,
                vk::BufferUsageFlags::INDEX_BUFFER,
                format!("index-arena-{frame_label}"),
            )?,
            instances: GfxStructuredBuffer::new_ssbo(MAX_INSTANCES as usize, format!("instance-buffer-{frame_label}"))?,
            commands: GfxStructuredBuffer::new(
                MAX_INSTANCES as usize,
                vk::BufferUsageFlags::INDIRECT_BUFFER,
                format!("indirect-buffer-{frame_label}"),
            )?,
        })
    }

    fn destroy(self) {
        self.vertices.destroy();
        self.indices.destroy();
        self.instances.destroy();
        self.commands.destroy();
    }
}

pub struct MeshManager {
    store: MeshStore,
    batcher: DrawBatcher,
    frame_buffers: [MeshFrameBuffers; FrameCounter::fif_count()],
    /// 本帧写入 indirect buffer 的 command 数量
    command_count: u32,
}
// new & init
impl MeshManager {
    pub fn new(bindless: &mut BindlessTable) -> anyhow::Result<Self> {
        let _span = tracy_client::span!("MeshManager::new");
        let mut frame_buffers = Vec::with_capacity(FrameCounter::fif_count());
        for frame_label in FrameCounter::frame_labels() {
            let buffers = MeshFrameBuffers::new(frame_label)?;
            bindless.queue_buffer_frame(frame_label, BindlessDescriptorBinding::instances(), buffers.instances.vk_buffer());
            frame_buffers.push(buffers);
        }
        let frame_buffers = frame_buffers
            .try_into()
            .map_err(|_| anyhow::anyhow!("mesh: frame buffer count mismatch"))?;

        Ok(Self {
            store: MeshStore::new(VERTEX_ARENA_CAPACITY, INDEX_ARENA_CAPACITY),
            batcher: DrawBatcher::default(),
            frame_buffers,
            command_count: 0,
        })
    }
}
// getters
impl MeshManager {
    #[inline]
    pub fn store(&self) -> &MeshStore {
        &self.store
    }

    #[inline]
    pub fn batcher(&self) -> &DrawBatcher {
        &self.batcher
    }
}
// tools
impl MeshManager {
    /// 按规范化之后的路径去重；再次加载同一个路径只增加引用计数
    ///
    /// 返回 mesh 以及它的第一个材质；arena 容量不足时返回 `MeshId::INVALID`
    #[allow(clippy::too_many_arguments)]
    pub fn load_or_get_mesh(
        &mut self,
        path: &Path,
        model_loader: &dyn ModelLoader,
        image_loader: &dyn ImageLoader,
        materials: &mut MaterialManager,
        textures: &mut TextureManager,
        bindless: &mut BindlessTable,
        frame_id: u64,
    ) -> anyhow::Result<(MeshId, MaterialId)> {
        let _span = tracy_client::span!("MeshManager::load_or_get_mesh");
        let key = path_key(path);
        if let Some(id) = self.store.retain_by_key(&key) {
            let material = self
                .store
                .mesh(id)
                .and_then(|record| record.materials.first().copied())
                .unwrap_or(MaterialId::DEFAULT);
            return Ok((id, material));
        }

        let model = model_loader.load_model(path).with_context(|| format!("mesh: load {}", key))?;
        anyhow::ensure!(!model.is_empty(), "mesh: {} has no geometry", key);

        let material_ids = model
            .materials
            .iter()
            .map(|material| {
                materials.load_or_get_material(material, textures, image_loader, frame_id, bindless)
            })
            .collect::<Vec<_>>();

        let geometry = MeshGeometry {
            submeshes: model
                .submeshes
                .iter()
                .map(|submesh| {
                    (
                        submesh.index_count,
                        submesh.first_index,
                        submesh.vertex_offset,
                        submesh_material(&material_ids, submesh.material_index),
                    )
                })
                .collect(),
            vertices: model.vertices,
            indices: model.indices,
        };
        let first_material = material_ids.first().copied().unwrap_or(MaterialId::DEFAULT);

        let id = self.store.insert(&key, geometry, material_ids.clone());
        if !id.is_valid() {
            for material in material_ids {
                materials.unload_material(material, textures, frame_id, bindless);
            }
            return Ok((MeshId::INVALID, MaterialId::INVALID));
        }

        log::info!("mesh {} loaded: {}", id, key);
        Ok((id, first_material))
    }

    /// 引用计数归零时释放 arena 以及它获取的材质
    pub fn unload_mesh(
        &mut self,
        id: MeshId,
        materials: &mut MaterialManager,
        textures: &mut TextureManager,
        frame_id: u64,
        bindless: &mut BindlessTable,
    ) {
        if let MeshRelease::Freed { materials: material_ids } = self.store.release(id) {
            log::info!("mesh {} unloaded", id);
            for material in material_ids {
                materials.unload_material(material, textures, frame_id, bindless);
            }
        }
    }

    /// 每个 submesh 追加一个 instance；`material` 有效时覆盖 submesh 自身的材质
    pub fn queue_draw(&mut self, transform: Mat4, mesh: MeshId, material: MaterialId) {
        let Some(record) = self.store.mesh(mesh) else {
            // 加载失败时调用者拿到的是 INVALID，静默跳过
            debug_assert!(!mesh.is_valid(), "draw unknown mesh {}", mesh);
            if mesh.is_valid() {
                log::error!("draw unknown mesh {}", mesh);
            }
            return;
        };
        for &submesh_id in record.submeshes.iter() {
            if let Some(submesh) = self.store.submesh(submesh_id) {
                self.batcher.push(transform, submesh_id, submesh, material);
            }
        }
        self.batcher.next_object();
    }

    /// # Phase: Update
    ///
    /// 写入当前 frame slot 的待上传数据、instance 以及 indirect command
    pub fn pre_draw(&mut self, frame_label: FrameLabel) -> anyhow::Result<()> {
        let _span = tracy_client::span!("MeshManager::pre_draw");
        let buffers = &mut self.frame_buffers[*frame_label];

        let uploaded = self.store.flush_uploads(*frame_label, |upload| {
            let vertex_offset = upload.vertex_offset as usize;
            buffers.vertices.mapped_slice()[vertex_offset..vertex_offset + upload.vertices.len()]
                .copy_from_slice(&upload.vertices);
            buffers.vertices.flush_range(vertex_offset, upload.vertices.len())?;

            let index_offset = upload.index_offset as usize;
            buffers.indices.mapped_slice()[index_offset..index_offset + upload.indices.len()]
                .copy_from_slice(&upload.indices);
            buffers.indices.flush_range(index_offset, upload.indices.len())
        })?;
        if uploaded > 0 {
            log::debug!("mesh: {} uploads written to frame {}", uploaded, frame_label);
        }

        self.batcher.finalize();
        buffers.instances.transfer_data_by_mmap(self.batcher.instances())?;
        buffers.commands.transfer_data_by_mmap(self.batcher.commands())?;
        self.command_count = self.batcher.commands().len() as u32;
        Ok(())
    }

    /// 绑定 arena 并录制本帧所有的 indirect draw，pipeline 和 descriptor set 由调用者绑定
    pub fn cmd_draw(&self, cmd: &GfxCommandBuffer, frame_label: FrameLabel) {
        if self.command_count == 0 {
            return;
        }
        let buffers = &self.frame_buffers[*frame_label];
        cmd.cmd_bind_vertex_buffers(0, &[buffers.vertices.vk_buffer()], &[0]);
        cmd.cmd_bind_index_buffer(buffers.indices.buffer(), 0, vk::IndexType::UINT32);
        cmd.cmd_draw_indexed_indirect(
            buffers.commands.buffer(),
            0,
            self.command_count,
            size_of::<DrawCommand>() as u32,
        );
    }

    /// # Phase: After Render
    pub fn post_draw(&mut self) {
        self.batcher.clear();
        self.command_count = 0;
    }
}
// destroy
impl MeshManager {
    pub fn destroy(self) {
        for buffers in self.frame_buffers {
            buffers.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submesh_material_falls_back_to_default() {
        let materials = [MaterialId(3), MaterialId(4)];
        assert_eq!(submesh_material(&materials, Some(1)), MaterialId(4));
        assert_eq!(submesh_material(&materials, Some(7)), MaterialId::DEFAULT);
        assert_eq!(submesh_material(&materials, None), MaterialId::DEFAULT);
    }
}
