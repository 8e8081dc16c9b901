use rustc_hash::FxHashMap;

use crate::frame_counter::FrameCounter;
use crate::gpu_data::Vertex;
use crate::handles::{MaterialId, MeshId, SubMeshId};
use crate::mesh_manager::free_list::FreeListAllocator;

/// submesh 在全局 arena 中的位置
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubMeshRecord {
    pub index_count: u32,
    /// 全局 index arena 中的起点
    pub first_index: u32,
    /// 全局 vertex arena 中的起点
    pub vertex_offset: i32,
    pub material: MaterialId,
}

#[derive(Clone, Debug)]
pub struct MeshRecord {
    pub key: String,
    pub use_count: u32,
    pub vertex_offset: u64,
    pub vertex_count: u64,
    pub index_offset: u64,
    pub index_count: u64,
    pub submeshes: Vec<SubMeshId>,
    /// 加载时获取的材质引用，卸载时归还
    pub materials: Vec<MaterialId>,
}

/// 等待写入 GPU 的顶点和索引数据
///
/// 每个 frame slot 持有一份 GPU 数据，因此需要在 N 个 slot 都写入之后才能丢弃
pub struct PendingUpload {
    pub mesh: MeshId,
    pub vertex_offset: u64,
    pub vertices: Vec<Vertex>,
    pub index_offset: u64,
    pub indices: Vec<u32>,
    written: [bool; FrameCounter::fif_count()],
}
impl PendingUpload {
    #[inline]
    fn is_done(&self) -> bool {
        self.written.iter().all(|w| *w)
    }
}

/// 新 mesh 的几何数据，submesh 中的 offset 相对于本 mesh
pub struct MeshGeometry {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    /// (index_count, first_index, vertex_offset, material)
    pub submeshes: Vec<(u32, u32, i32, MaterialId)>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum MeshRelease {
    /// 仍然有其他使用者
    StillUsed,
    /// 已经释放，需要归还这些材质
    Freed { materials: Vec<MaterialId> },
    Unknown,
}

/// mesh 相关的 CPU 侧记录：arena 分配、路径去重、submesh 编号以及待上传的数据
pub struct MeshStore {
    vertex_alloc: FreeListAllocator,
    index_alloc: FreeListAllocator,

    meshes: FxHashMap<MeshId, MeshRecord>,
    key_to_mesh: FxHashMap<String, MeshId>,
    next_mesh_id: u32,

    /// 下标为 SubMeshId
    submeshes: Vec<Option<SubMeshRecord>>,
    free_submesh_ids: Vec<SubMeshId>,

    pending_uploads: Vec<PendingUpload>,
}
// new & init
impl MeshStore {
    pub fn new(vertex_capacity: u64, index_capacity: u64) -> Self {
        Self {
            vertex_alloc: FreeListAllocator::new(vertex_capacity),
            index_alloc: FreeListAllocator::new(index_capacity),
            meshes: FxHashMap::default(),
            key_to_mesh: FxHashMap::default(),
            next_mesh_id: 0,
            submeshes: Vec::new(),
            free_submesh_ids: Vec::new(),
            pending_uploads: Vec::new(),
        }
    }
}
// getters
impl MeshStore {
    #[inline]
    pub fn mesh(&self, id: MeshId) -> Option<&MeshRecord> {
        self.meshes.get(&id)
    }

    #[inline]
    pub fn submesh(&self, id: SubMeshId) -> Option<&SubMeshRecord> {
        self.submeshes.get(id.index()).and_then(|s| s.as_ref())
    }

    /// submesh 编号的上界，用于 draw command 查找表
    #[inline]
    pub fn submesh_id_bound(&self) -> usize {
        self.submeshes.len()
    }

    #[inline]
    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    #[inline]
    pub fn pending_upload_count(&self) -> usize {
        self.pending_uploads.len()
    }

    #[inline]
    pub fn vertex_alloc(&self) -> &FreeListAllocator {
        &self.vertex_alloc
    }

    #[inline]
    pub fn index_alloc(&self) -> &FreeListAllocator {
        &self.index_alloc
    }
}
// tools
impl MeshStore {
    /// 已经加载过的 key 增加引用计数并返回，不会触碰任何 GPU 状态
    pub fn retain_by_key(&mut self, key: &str) -> Option<MeshId> {
        let id = *self.key_to_mesh.get(key)?;
        let record = self.meshes.get_mut(&id)?;
        record.use_count += 1;
        Some(id)
    }

    /// 分配 arena 并登记一个新的 mesh，容量不足时返回 `MeshId::INVALID`
    ///
    /// `materials` 是为该 mesh 获取的材质引用，mesh 释放时原样返回
    pub fn insert(&mut self, key: &str, geometry: MeshGeometry, materials: Vec<MaterialId>) -> MeshId {
        let vertex_count = geometry.vertices.len() as u64;
        let index_count = geometry.indices.len() as u64;

        let Some(vertex_offset) = self.vertex_alloc.allocate(vertex_count) else {
            log::error!("vertex arena exhausted when loading {} ({} vertices)", key, vertex_count);
            return MeshId::INVALID;
        };
        let Some(index_offset) = self.index_alloc.allocate(index_count) else {
            self.vertex_alloc.free(vertex_offset, vertex_count);
            log::error!("index arena exhausted when loading {} ({} indices)", key, index_count);
            return MeshId::INVALID;
        };

        let id = MeshId(self.next_mesh_id);
        self.next_mesh_id += 1;

        let submeshes = geometry
            .submeshes
            .iter()
            .map(|&(count, first, base_vertex, material)| {
                self.alloc_submesh(SubMeshRecord {
                    index_count: count,
                    first_index: index_offset as u32 + first,
                    vertex_offset: vertex_offset as i32 + base_vertex,
                    material,
                })
            })
            .collect();

        self.meshes.insert(
            id,
            MeshRecord {
                key: key.to_string(),
                use_count: 1,
                vertex_offset,
                vertex_count,
                index_offset,
                index_count,
                submeshes,
                materials,
            },
        );
        self.key_to_mesh.insert(key.to_string(), id);

        self.pending_uploads.push(PendingUpload {
            mesh: id,
            vertex_offset,
            vertices: geometry.vertices,
            index_offset,
            indices: geometry.indices,
            written: [false; FrameCounter::fif_count()],
        });

        id
    }

    /// 引用计数减一，归零时释放 arena、submesh 编号以及路径映射
    pub fn release(&mut self, id: MeshId) -> MeshRelease {
        let Some(record) = self.meshes.get_mut(&id) else {
            debug_assert!(false, "unload unknown mesh {}", id);
            log::error!("unload unknown mesh {}", id);
            return MeshRelease::Unknown;
        };

        record.use_count -= 1;
        if record.use_count > 0 {
            return MeshRelease::StillUsed;
        }

        let Some(record) = self.meshes.remove(&id) else {
            return MeshRelease::Unknown;
        };
        self.vertex_alloc.free(record.vertex_offset, record.vertex_count);
        self.index_alloc.free(record.index_offset, record.index_count);
        for submesh in record.submeshes {
            self.submeshes[submesh.index()] = None;
            self.free_submesh_ids.push(submesh);
        }
        self.key_to_mesh.remove(&record.key);
        // 还没写完的数据不再需要
        self.pending_uploads.retain(|upload| upload.mesh != id);

        MeshRelease::Freed {
            materials: record.materials,
        }
    }

    /// 将当前 frame slot 还没有写入的数据交给 `write`，N 个 slot 都写入之后丢弃 CPU 数据
    pub fn flush_uploads(
        &mut self,
        frame_index: usize,
        mut write: impl FnMut(&PendingUpload) -> anyhow::Result<()>,
    ) -> anyhow::Result<usize> {
        let mut written = 0;
        for upload in self.pending_uploads.iter_mut().filter(|upload| !upload.written[frame_index]) {
            write(upload)?;
            upload.written[frame_index] = true;
            written += 1;
        }
        self.pending_uploads.retain(|upload| !upload.is_done());
        Ok(written)
    }

    fn alloc_submesh(&mut self, record: SubMeshRecord) -> SubMeshId {
        if let Some(id) = self.free_submesh_ids.pop() {
            self.submeshes[id.index()] = Some(record);
            id
        } else {
            self.submeshes.push(Some(record));
            SubMeshId(self.submeshes.len() as u32 - 1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry(vertex_count: usize, index_count: usize, submesh_count: u32) -> MeshGeometry {
        let per_submesh = index_count as u32 / submesh_count;
        MeshGeometry {
            vertices: vec![Vertex::default(); vertex_count],
            indices: vec![0; index_count],
            submeshes: (0..submesh_count).map(|i| (per_submesh, i * per_submesh, 0, MaterialId(i))).collect(),
        }
    }

    #[test]
    fn test_insert_places_submeshes_in_arena() {
        let mut store = MeshStore::new(1000, 1000);
        let first = store.insert("a.obj", geometry(10, 30, 1), vec![]);
        let second = store.insert("b.obj", geometry(4, 12, 2), vec![MaterialId(3)]);

        let record = store.mesh(second).unwrap();
        assert_eq!((record.vertex_offset, record.index_offset), (10, 30));
        let sub1 = store.submesh(record.submeshes[1]).unwrap();
        assert_eq!(sub1.first_index, 36);
        assert_eq!(sub1.vertex_offset, 10);
        assert_ne!(first, second);
    }

    #[test]
    fn test_retain_by_key_is_idempotent() {
        let mut store = MeshStore::new(1000, 1000);
        let id = store.insert("a.obj", geometry(3, 3, 1), vec![]);
        assert_eq!(store.retain_by_key("a.obj"), Some(id));
        assert_eq!(store.mesh(id).unwrap().use_count, 2);
        assert_eq!(store.mesh_count(), 1);
        assert_eq!(store.retain_by_key("b.obj"), None);
    }

    #[test]
    fn test_release_frees_at_zero() {
        let mut store = MeshStore::new(1000, 1000);
        let id = store.insert("a.obj", geometry(3, 3, 1), vec![MaterialId(7)]);
        store.retain_by_key("a.obj");

        assert_eq!(store.release(id), MeshRelease::StillUsed);
        assert_eq!(store.release(id), MeshRelease::Freed {
            materials: vec![MaterialId(7)]
        });
        assert!(store.mesh(id).is_none());
        assert_eq!(store.vertex_alloc().end(), 0);
        assert_eq!(store.retain_by_key("a.obj"), None);
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "unload unknown mesh"))]
    fn test_double_release() {
        let mut store = MeshStore::new(1000, 1000);
        let id = store.insert("a.obj", geometry(3, 3, 1), vec![]);
        assert!(matches!(store.release(id), MeshRelease::Freed { .. }));
        assert_eq!(store.release(id), MeshRelease::Unknown);
    }

    #[test]
    fn test_capacity_exhaustion_returns_invalid() {
        let mut store = MeshStore::new(10, 10);
        assert!(store.insert("a.obj", geometry(8, 3, 1), vec![]).is_valid());
        assert_eq!(store.insert("b.obj", geometry(8, 3, 1), vec![]), MeshId::INVALID);
        // 失败时不泄漏 index arena
        assert_eq!(store.index_alloc().end(), 3);
        assert_eq!(store.vertex_alloc().end(), 8);
    }

    #[test]
    fn test_freed_range_reused() {
        let mut store = MeshStore::new(1000, 1000);
        let a = store.insert("a.obj", geometry(10, 10, 1), vec![]);
        let _b = store.insert("b.obj", geometry(10, 10, 1), vec![]);
        store.release(a);
        let c = store.insert("c.obj", geometry(5, 5, 1), vec![]);
        assert_eq!(store.mesh(c).unwrap().vertex_offset, 0);
    }

    #[test]
    fn test_submesh_ids_recycled() {
        let mut store = MeshStore::new(1000, 1000);
        let a = store.insert("a.obj", geometry(3, 6, 2), vec![]);
        let old_ids = store.mesh(a).unwrap().submeshes.clone();
        store.release(a);
        let b = store.insert("b.obj", geometry(3, 6, 2), vec![]);
        let mut new_ids = store.mesh(b).unwrap().submeshes.clone();
        new_ids.sort();
        let mut old_ids = old_ids;
        old_ids.sort();
        assert_eq!(new_ids, old_ids);
        assert_eq!(store.submesh_id_bound(), 2);
    }

    #[test]
    fn test_upload_retained_for_each_frame_slot() {
        let mut store = MeshStore::new(1000, 1000);
        store.insert("a.obj", geometry(3, 3, 1), vec![]);

        assert_eq!(store.flush_uploads(0, |_| Ok(())).unwrap(), 1);
        assert_eq!(store.pending_upload_count(), 1);
        // 同一个 slot 不会重复写入
        assert_eq!(store.flush_uploads(0, |_| Ok(())).unwrap(), 0);
        assert_eq!(store.flush_uploads(1, |_| Ok(())).unwrap(), 1);
        assert_eq!(store.pending_upload_count(), 0);
    }

    #[test]
    fn test_unload_drops_pending_upload() {
        let mut store = MeshStore::new(1000, 1000);
        let id = store.insert("a.obj", geometry(3, 3, 1), vec![]);
        store.flush_uploads(0, |_| Ok(())).unwrap();
        store.release(id);
        assert_eq!(store.pending_upload_count(), 0);
    }

    #[test]
    fn test_failed_write_keeps_upload() {
        let mut store = MeshStore::new(1000, 1000);
        store.insert("a.obj", geometry(3, 3, 1), vec![]);
        assert!(store.flush_uploads(0, |_| anyhow::bail!("device lost")).is_err());
        assert_eq!(store.flush_uploads(0, |_| Ok(())).unwrap(), 1);
    }
}
