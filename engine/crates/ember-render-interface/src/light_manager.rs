use ash::vk;
use ember_gfx::descriptors::sampler::{GfxSampler, GfxSamplerCreateInfo};
use ember_gfx::gfx::Gfx;
use ember_gfx::resources::image::GfxImage;
use ember_gfx::resources::image_state::{GfxImageState, GfxTrackedImage};
use ember_gfx::resources::image_view::{GfxImageView, GfxImageViewDesc};
use ember_gfx::resources::structured_buffer::GfxStructuredBuffer;
use glam::{Mat4, Vec3, Vec4};
use rustc_hash::FxHashMap;

use crate::bindless::{BindlessDescriptorBinding, BindlessTable};
use crate::frame_counter::{FrameCounter, FrameLabel};
use crate::gpu_data::{GpuLight, GpuLightType, MAX_LIGHTS, MAX_SHADOW_MAPS, SHADOW_MAP_SIZE};
use crate::handles::LightId;
use crate::retire_queue::RetireQueue;

pub const SHADOW_MAP_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LightKind {
    Directional,
    Point,
}

/// 场景每帧提交的光源
#[derive(Clone, Copy, Debug)]
pub struct LightComponent {
    pub light_id: LightId,
    pub kind: LightKind,
    pub enabled: bool,
    /// 只对平行光生效
    pub casts_shadow: bool,
    pub color: Vec3,
    /// 平行光为光线方向，点光源为位置
    pub direction_or_position: Vec3,
    pub intensity: f32,
}

/// 平行光 shadow map 的正交投影范围
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShadowSettings {
    /// 正交投影在 x、y 方向上的半宽
    pub half_extent: f32,
    pub near: f32,
    pub far: f32,
    /// 光源相机到 focus 的距离
    pub distance: f32,
    pub focus: Vec3,
}
impl Default for ShadowSettings {
    fn default() -> Self {
        Self {
            half_extent: 20.0,
            near: 0.1,
            far: 100.0,
            distance: 50.0,
            focus: Vec3::ZERO,
        }
    }
}
impl ShadowSettings {
    /// 沿着光线方向看向 focus 的正交 view-projection
    pub fn directional_view_proj(&self, direction: Vec3) -> Mat4 {
        let dir = direction.try_normalize().unwrap_or(Vec3::NEG_Y);
        let eye = self.focus - dir * self.distance;
        // 光线接近竖直时换一个 up
        let up = if dir.y.abs() > 0.99 { Vec3::Z } else { Vec3::Y };
        let view = Mat4::look_at_rh(eye, self.focus, up);
        let h = self.half_extent;
        let proj = Mat4::orthographic_rh(-h, h, -h, h, self.near, self.far);
        proj * view
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShadowSlot {
    /// 之前已经分配过
    Existing(u32),
    /// 第一次见到这个光源，需要创建 shadow map
    New(u32),
    Full,
}

/// shadow map slot 按光源身份分配，跨帧保持不变
pub struct ShadowSlotTable {
    capacity: u32,
    by_light: FxHashMap<LightId, u32>,
    free_slots: Vec<u32>,
    next_slot: u32,
}
impl ShadowSlotTable {
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            by_light: FxHashMap::default(),
            free_slots: Vec::new(),
            next_slot: 0,
        }
    }

    pub fn acquire(&mut self, light: LightId) -> ShadowSlot {
        if let Some(&slot) = self.by_light.get(&light) {
            return ShadowSlot::Existing(slot);
        }
        let slot = match self.free_slots.pop() {
            Some(slot) => slot,
            None if self.next_slot < self.capacity => {
                self.next_slot += 1;
                self.next_slot - 1
            }
            None => return ShadowSlot::Full,
        };
        self.by_light.insert(light, slot);
        ShadowSlot::New(slot)
    }

    pub fn release(&mut self, light: LightId) -> Option<u32> {
        let slot = self.by_light.remove(&light)?;
        self.free_slots.push(slot);
        Some(slot)
    }

    #[inline]
    pub fn slot_of(&self, light: LightId) -> Option<u32> {
        self.by_light.get(&light).copied()
    }
}

/// 本帧需要渲染 shadow map 的光源
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShadowCaster {
    /// 在 light 数组中的下标，作为 push constant 传给 shadow pass
    pub light_index: u32,
    pub shadow_slot: u32,
}

/// 一帧内的光源数组以及 shadow slot 分配，不涉及 GPU
pub struct LightQueue {
    slots: ShadowSlotTable,
    lights: Vec<GpuLight>,
    casters: Vec<ShadowCaster>,
}
impl LightQueue {
    pub fn new(shadow_capacity: u32) -> Self {
        Self {
            slots: ShadowSlotTable::new(shadow_capacity),
            lights: Vec::new(),
            casters: Vec::new(),
        }
    }

    #[inline]
    pub fn lights(&self) -> &[GpuLight] {
        &self.lights
    }

    #[inline]
    pub fn casters(&self) -> &[ShadowCaster] {
        &self.casters
    }

    #[inline]
    pub fn slots_mut(&mut self) -> &mut ShadowSlotTable {
        &mut self.slots
    }

    /// 返回光源在数组中的下标；禁用或数组已满时返回 None
    ///
    /// 新分配的 slot 通过 `create_shadow_map` 创建资源，创建失败时光源不投射阴影
    pub fn queue(
        &mut self,
        light: &LightComponent,
        settings: &ShadowSettings,
        mut create_shadow_map: impl FnMut(u32) -> bool,
    ) -> Option<u32> {
        if !light.enabled {
            return None;
        }
        if self.lights.len() >= MAX_LIGHTS as usize {
            log::error!("light array full ({}), {} dropped", MAX_LIGHTS, light.light_id);
            return None;
        }

        let wants_shadow = light.casts_shadow && light.kind == LightKind::Directional;
        let shadow_slot = if wants_shadow {
            match self.slots.acquire(light.light_id) {
                ShadowSlot::Existing(slot) => Some(slot),
                ShadowSlot::New(slot) => {
                    if create_shadow_map(slot) {
                        Some(slot)
                    } else {
                        self.slots.release(light.light_id);
                        None
                    }
                }
                ShadowSlot::Full => {
                    log::warn!("shadow map slots full ({}), {} has no shadow", self.slots.capacity, light.light_id);
                    None
                }
            }
        } else {
            None
        };

        let light_index = self.lights.len() as u32;
        self.lights.push(gpu_light(light, shadow_slot, settings));
        if let Some(shadow_slot) = shadow_slot {
            self.casters.push(ShadowCaster {
                light_index,
                shadow_slot,
            });
        }
        Some(light_index)
    }

    /// 只清空本帧的光源，shadow slot 保留
    pub fn clear(&mut self) {
        self.lights.clear();
        self.casters.clear();
    }
}

fn gpu_light(light: &LightComponent, shadow_slot: Option<u32>, settings: &ShadowSettings) -> GpuLight {
    let (light_type, direction_or_position, shadow_view_proj) = match light.kind {
        LightKind::Directional => (
            GpuLightType::Directional,
            light.direction_or_position.normalize_or_zero().extend(0.0),
            settings.directional_view_proj(light.direction_or_position),
        ),
        LightKind::Point => (GpuLightType::Point, light.direction_or_position.extend(1.0), Mat4::IDENTITY),
    };
    GpuLight {
        shadow_view_proj,
        direction_or_position,
        color_intensity: light.color.extend(light.intensity),
        light_type: light_type as u32,
        shadow_map_index: shadow_slot.unwrap_or(GpuLight::NO_SHADOW_MAP),
        casts_shadow: shadow_slot.is_some() as u32,
        _padding: 0,
    }
}

/// 一张 shadow map，空闲时处于 SHADER_READ
pub struct ShadowMap {
    image: GfxImage,
    view: GfxImageView,
    tracked: GfxTrackedImage,
}
impl ShadowMap {
    fn new(slot: u32) -> anyhow::Result<Self> {
        let name = format!("shadow-map-{slot}");
        let extent = vk::Extent2D {
            width: SHADOW_MAP_SIZE,
            height: SHADOW_MAP_SIZE,
        };
        let image = GfxImage::new_2d_device(
            extent,
            SHADOW_MAP_FORMAT,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
            &name,
        )?;
        let view = match GfxImageView::new(
            image.handle(),
            GfxImageViewDesc::new_2d(SHADOW_MAP_FORMAT, vk::ImageAspectFlags::DEPTH),
            format!("{name}-view"),
        ) {
            Ok(view) => view,
            Err(e) => {
                image.destroy();
                return Err(e);
            }
        };

        let mut shadow_map = Self {
            tracked: GfxTrackedImage::new(image.handle(), vk::ImageAspectFlags::DEPTH, GfxImageState::UNDEFINED),
            image,
            view,
        };
        let init = Gfx::get().one_time_exec(
            |cmd| shadow_map.tracked.transition(cmd, GfxImageState::UNDEFINED, GfxImageState::SHADER_READ),
            &name,
        );
        if let Err(e) = init {
            shadow_map.destroy();
            return Err(e);
        }
        Ok(shadow_map)
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view.handle()
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.image.extent_2d()
    }

    #[inline]
    pub fn tracked_mut(&mut self) -> &mut GfxTrackedImage {
        &mut self.tracked
    }

    fn destroy(self) {
        self.view.destroy();
        self.image.destroy();
    }
}

/// 光源数组（binding 4）与 shadow map 数组（binding 5）
pub struct LightManager {
    next_light_id: u32,
    queue: LightQueue,
    settings: ShadowSettings,

    /// 下标为 shadow slot
    shadow_maps: Vec<Option<ShadowMap>>,
    shadow_sampler: GfxSampler,
    retired: RetireQueue<ShadowMap>,

    buffers: [GfxStructuredBuffer<GpuLight>; FrameCounter::fif_count()],
}
// new & init
impl LightManager {
    pub fn new(settings: ShadowSettings, bindless: &mut BindlessTable) -> anyhow::Result<Self> {
        let mut buffers = Vec::with_capacity(FrameCounter::fif_count());
        for frame_label in FrameCounter::frame_labels() {
            let buffer = GfxStructuredBuffer::<GpuLight>::new_ssbo(MAX_LIGHTS as usize, format!("light-buffer-{frame_label}"))?;
            bindless.queue_buffer_frame(frame_label, BindlessDescriptorBinding::lights(), buffer.vk_buffer());
            buffers.push(buffer);
        }
        let buffers = buffers
            .try_into()
            .map_err(|_| anyhow::anyhow!("light: buffer count mismatch"))?;

        Ok(Self {
            next_light_id: 1,
            queue: LightQueue::new(MAX_SHADOW_MAPS),
            settings,
            shadow_maps: Vec::new(),
            shadow_sampler: GfxSampler::new(&GfxSamplerCreateInfo::new_attachment(), "shadow-sampler")?,
            retired: RetireQueue::new(),
            buffers,
        })
    }
}
// getters
impl LightManager {
    #[inline]
    pub fn light_count(&self) -> u32 {
        self.queue.lights().len() as u32
    }

    #[inline]
    pub fn shadow_casters(&self) -> &[ShadowCaster] {
        self.queue.casters()
    }

    #[inline]
    pub fn shadow_map_mut(&mut self, slot: u32) -> Option<&mut ShadowMap> {
        self.shadow_maps.get_mut(slot as usize).and_then(|s| s.as_mut())
    }

    #[inline]
    pub fn settings(&self) -> &ShadowSettings {
        &self.settings
    }

    #[inline]
    pub fn set_settings(&mut self, settings: ShadowSettings) {
        self.settings = settings;
    }
}
// tools
impl LightManager {
    /// 光源 id 从 1 开始单调递增
    pub fn create_light(&mut self) -> LightId {
        let id = LightId(self.next_light_id);
        self.next_light_id += 1;
        id
    }

    pub fn queue_light(&mut self, light: &LightComponent, bindless: &mut BindlessTable) {
        let _span = tracy_client::span!("LightManager::queue_light");
        let Self {
            queue,
            settings,
            shadow_maps,
            shadow_sampler,
            ..
        } = self;

        queue.queue(light, settings, |slot| match ShadowMap::new(slot) {
            Ok(shadow_map) => {
                bindless.queue_image_all(
                    BindlessDescriptorBinding::shadow_maps(),
                    slot,
                    shadow_map.view(),
                    shadow_sampler.handle(),
                );
                if shadow_maps.len() <= slot as usize {
                    shadow_maps.resize_with(slot as usize + 1, || None);
                }
                shadow_maps[slot as usize] = Some(shadow_map);
                log::info!("shadow map {} created for {}", slot, light.light_id);
                true
            }
            Err(e) => {
                log::error!("failed to create shadow map for {}: {:#}", light.light_id, e);
                false
            }
        });
    }

    /// 光源不再使用时归还它的 shadow map
    pub fn release_light(&mut self, light_id: LightId, frame_id: u64) {
        let Some(slot) = self.queue.slots_mut().release(light_id) else {
            return;
        };
        if let Some(shadow_map) = self.shadow_maps.get_mut(slot as usize).and_then(|s| s.take()) {
            self.retired.retire(frame_id, shadow_map);
        }
    }

    /// # Phase: Update
    pub fn pre_draw(&mut self, frame_label: FrameLabel) -> anyhow::Result<()> {
        let _span = tracy_client::span!("LightManager::pre_draw");
        self.buffers[*frame_label].transfer_data_by_mmap(self.queue.lights())
    }

    /// # Phase: After Render
    pub fn post_draw(&mut self) {
        self.queue.clear();
    }

    pub fn retire_completed(&mut self, completed_frame_id: Option<u64>) {
        for shadow_map in self.retired.take_completed(completed_frame_id) {
            shadow_map.destroy();
        }
    }
}
// destroy
impl LightManager {
    pub fn destroy(mut self) {
        for shadow_map in self.retired.take_all() {
            shadow_map.destroy();
        }
        for shadow_map in self.shadow_maps.drain(..).flatten() {
            shadow_map.destroy();
        }
        self.shadow_sampler.destroy();
        for buffer in self.buffers {
            buffer.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directional(id: u32) -> LightComponent {
        LightComponent {
            light_id: LightId(id),
            kind: LightKind::Directional,
            enabled: true,
            casts_shadow: true,
            color: Vec3::ONE,
            direction_or_position: Vec3::new(-1.0, -1.0, 0.0),
            intensity: 2.0,
        }
    }

    #[test]
    fn test_shadow_slot_reused_across_frames() {
        let mut queue = LightQueue::new(4);
        let settings = ShadowSettings::default();
        let mut created = 0;

        for _ in 0..3 {
            queue.queue(&directional(1), &settings, |_| {
                created += 1;
                true
            });
            assert_eq!(queue.casters(), &[ShadowCaster {
                light_index: 0,
                shadow_slot: 0
            }]);
            queue.clear();
        }
        assert_eq!(created, 1);
    }

    #[test]
    fn test_disabled_light_skipped() {
        let mut queue = LightQueue::new(4);
        let mut light = directional(1);
        light.enabled = false;
        assert_eq!(queue.queue(&light, &ShadowSettings::default(), |_| panic!("no shadow map expected")), None);
        assert!(queue.lights().is_empty());
        assert_eq!(queue.slots_mut().slot_of(LightId(1)), None);
    }

    #[test]
    fn test_full_slot_table_queues_without_shadow() {
        let mut queue = LightQueue::new(1);
        let settings = ShadowSettings::default();
        queue.queue(&directional(1), &settings, |_| true);
        let index = queue.queue(&directional(2), &settings, |_| true).unwrap();

        let light = queue.lights()[index as usize];
        assert_eq!(light.shadow_map_index, GpuLight::NO_SHADOW_MAP);
        assert_eq!(light.casts_shadow, 0);
        assert_eq!(queue.casters().len(), 1);
    }

    #[test]
    fn test_failed_shadow_map_releases_slot() {
        let mut queue = LightQueue::new(1);
        let settings = ShadowSettings::default();
        queue.queue(&directional(1), &settings, |_| false);
        assert!(queue.casters().is_empty());
        assert_eq!(queue.slots_mut().slot_of(LightId(1)), None);
    }

    #[test]
    fn test_point_light_has_no_shadow() {
        let mut queue = LightQueue::new(4);
        let mut light = directional(1);
        light.kind = LightKind::Point;
        light.direction_or_position = Vec3::new(1.0, 2.0, 3.0);
        queue.queue(&light, &ShadowSettings::default(), |_| panic!("no shadow map expected"));

        let gpu = queue.lights()[0];
        assert_eq!(gpu.light_type, GpuLightType::Point as u32);
        assert_eq!(gpu.direction_or_position, Vec4::new(1.0, 2.0, 3.0, 1.0));
    }

    #[test]
    fn test_released_slot_reused() {
        let mut table = ShadowSlotTable::new(2);
        assert_eq!(table.acquire(LightId(1)), ShadowSlot::New(0));
        assert_eq!(table.acquire(LightId(2)), ShadowSlot::New(1));
        assert_eq!(table.acquire(LightId(3)), ShadowSlot::Full);
        assert_eq!(table.release(LightId(1)), Some(0));
        assert_eq!(table.acquire(LightId(3)), ShadowSlot::New(0));
        assert_eq!(table.acquire(LightId(2)), ShadowSlot::Existing(1));
    }

    #[test]
    fn test_directional_view_proj_maps_focus_inside_clip() {
        let settings = ShadowSettings::default();
        let clip = settings.directional_view_proj(Vec3::new(0.0, -1.0, 0.0)) * settings.focus.extend(1.0);
        let ndc = clip.truncate() / clip.w;
        assert!(ndc.x.abs() < 1e-4 && ndc.y.abs() < 1e-4);
        assert!((0.0..=1.0).contains(&ndc.z));
    }
}
