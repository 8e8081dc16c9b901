use glam::Mat4;

use crate::gpu_data::{DrawCommand, MAX_INSTANCES, MeshInstanceData};
use crate::handles::{MaterialId, SubMeshId};
use crate::mesh_manager::mesh_store::SubMeshRecord;

/// 一帧内的 draw 请求，按 submesh 合并为 indirect draw command
///
/// 同一个 submesh 的多次绘制只产生一个 command，`instance_count` 累加
#[derive(Default)]
pub struct DrawBatcher {
    /// 按提交顺序
    instances: Vec<MeshInstanceData>,
    /// 每个 instance 所属的 command 下标
    instance_command: Vec<u32>,
    commands: Vec<DrawCommand>,
    /// 下标为 SubMeshId，值为本帧的 command 下标
    submesh_to_command: Vec<Option<u32>>,
    next_object_id: u32,
}
// getters
impl DrawBatcher {
    #[inline]
    pub fn instances(&self) -> &[MeshInstanceData] {
        &self.instances
    }

    #[inline]
    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
// tools
impl DrawBatcher {
    /// 为一个 submesh 追加一个 instance，超过 `MAX_INSTANCES` 时丢弃并返回 false
    pub fn push(
        &mut self,
        transform: Mat4,
        submesh_id: SubMeshId,
        submesh: &SubMeshRecord,
        material_override: MaterialId,
    ) -> bool {
        if self.instances.len() >= MAX_INSTANCES as usize {
            log::error!("instance buffer full ({}), draw of {} dropped", MAX_INSTANCES, submesh_id);
            return false;
        }

        let material = if material_override.is_valid() { material_override } else { submesh.material.or_default() };

        if self.submesh_to_command.len() <= submesh_id.index() {
            self.submesh_to_command.resize(submesh_id.index() + 1, None);
        }
        let command_index = match self.submesh_to_command[submesh_id.index()] {
            Some(idx) => {
                self.commands[idx as usize].instance_count += 1;
                idx
            }
            None => {
                let idx = self.commands.len() as u32;
                self.commands.push(DrawCommand {
                    index_count: submesh.index_count,
                    instance_count: 1,
                    first_index: submesh.first_index,
                    vertex_offset: submesh.vertex_offset,
                    first_instance: 0,
                });
                self.submesh_to_command[submesh_id.index()] = Some(idx);
                idx
            }
        };

        self.instances.push(MeshInstanceData {
            model: transform,
            submesh_id: submesh_id.0,
            material_id: material.0,
            flags: 0,
            object_id: self.next_object_id,
        });
        self.instance_command.push(command_index);
        true
    }

    /// 同一次 `queue_draw` 的所有 submesh 共享一个 object id
    pub fn next_object(&mut self) {
        self.next_object_id += 1;
    }

    /// 让每个 command 的 instance 连续排列，并通过前缀和计算 `first_instance`
    ///
    /// 同一个 command 内部保持提交顺序
    pub fn finalize(&mut self) {
        if self.commands.is_empty() {
            return;
        }

        let mut first_instance = 0;
        for command in self.commands.iter_mut() {
            command.first_instance = first_instance;
            first_instance += command.instance_count;
        }

        let mut cursor = self.commands.iter().map(|c| c.first_instance as usize).collect::<Vec<_>>();
        let mut sorted = vec![MeshInstanceData::default(); self.instances.len()];
        for (instance, &command_index) in self.instances.iter().zip(self.instance_command.iter()) {
            let slot = &mut cursor[command_index as usize];
            sorted[*slot] = *instance;
            *slot += 1;
        }
        self.instances = sorted;

        // 已经排好序，重新对应 command 下标
        self.instance_command.clear();
        for (idx, command) in self.commands.iter().enumerate() {
            self.instance_command.extend(std::iter::repeat_n(idx as u32, command.instance_count as usize));
        }
    }

    pub fn clear(&mut self) {
        self.instances.clear();
        self.instance_command.clear();
        self.commands.clear();
        self.submesh_to_command.fill(None);
        self.next_object_id = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submesh(first_index: u32) -> SubMeshRecord {
        SubMeshRecord {
            index_count: 3,
            first_index,
            vertex_offset: 0,
            material: MaterialId(2),
        }
    }

    #[test]
    fn test_repeated_draws_share_one_command() {
        let mut batcher = DrawBatcher::default();
        for i in 0..3 {
            batcher.push(Mat4::from_translation(glam::vec3(i as f32, 0.0, 0.0)), SubMeshId(0), &submesh(0), MaterialId::INVALID);
            batcher.next_object();
        }
        assert_eq!(batcher.commands().len(), 1);
        assert_eq!(batcher.commands()[0].instance_count, 3);
        assert_eq!(batcher.instances().len(), 3);
    }

    #[test]
    fn test_finalize_makes_instances_contiguous() {
        let mut batcher = DrawBatcher::default();
        // 交错提交：A B A B A
        for i in 0..5u32 {
            let id = SubMeshId(i % 2);
            batcher.push(Mat4::from_translation(glam::vec3(i as f32, 0.0, 0.0)), id, &submesh(i % 2 * 3), MaterialId::INVALID);
            batcher.next_object();
        }
        batcher.finalize();

        let commands = batcher.commands();
        assert_eq!((commands[0].first_instance, commands[0].instance_count), (0, 3));
        assert_eq!((commands[1].first_instance, commands[1].instance_count), (3, 2));

        let order = batcher.instances().iter().map(|inst| (inst.submesh_id, inst.object_id)).collect::<Vec<_>>();
        assert_eq!(order, vec![(0, 0), (0, 2), (0, 4), (1, 1), (1, 3)]);
    }

    #[test]
    fn test_material_override() {
        let mut batcher = DrawBatcher::default();
        batcher.push(Mat4::IDENTITY, SubMeshId(0), &submesh(0), MaterialId::INVALID);
        batcher.push(Mat4::IDENTITY, SubMeshId(0), &submesh(0), MaterialId(9));
        let mut orphan = submesh(0);
        orphan.material = MaterialId::INVALID;
        batcher.push(Mat4::IDENTITY, SubMeshId(1), &orphan, MaterialId::INVALID);

        let materials = batcher.instances().iter().map(|inst| inst.material_id).collect::<Vec<_>>();
        assert_eq!(materials, vec![2, 9, MaterialId::DEFAULT.0]);
    }

    #[test]
    fn test_clear_resets_lookup() {
        let mut batcher = DrawBatcher::default();
        batcher.push(Mat4::IDENTITY, SubMeshId(4), &submesh(0), MaterialId::INVALID);
        batcher.clear();
        assert!(batcher.is_empty());
        assert!(batcher.instances().is_empty());

        batcher.push(Mat4::IDENTITY, SubMeshId(4), &submesh(0), MaterialId::INVALID);
        assert_eq!(batcher.commands().len(), 1);
        assert_eq!(batcher.commands()[0].instance_count, 1);
    }
}
