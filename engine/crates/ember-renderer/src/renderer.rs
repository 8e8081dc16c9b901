use std::ffi::CStr;
use std::path::Path;
use std::rc::Rc;

use ash::vk;
use ember_asset::image_loader::FileImageLoader;
use ember_asset::loader::{ImageLoader, ModelLoader};
use ember_asset::obj_loader::ObjModelLoader;
use ember_crate_tools::trace::TraceRecorder;
use ember_gfx::commands::command_buffer::GfxCommandBuffer;
use ember_gfx::commands::fence::GfxFence;
use ember_gfx::commands::submit_info::GfxSubmitInfo;
use ember_gfx::gfx::Gfx;
use ember_gfx::resources::structured_buffer::GfxStructuredBuffer;
use ember_render_interface::bindless::{BindlessDescriptorBinding, BindlessTable};
use ember_render_interface::cmd_allocator::CmdAllocator;
use ember_render_interface::frame_counter::{FrameCounter, FrameLabel};
use ember_render_interface::gpu_data::GpuPerFrameData;
use ember_render_interface::handles::{LightId, MaterialId, MeshId, TextureId};
use ember_render_interface::light_manager::{LightComponent, LightManager, ShadowSettings};
use ember_render_interface::material_manager::MaterialManager;
use ember_render_interface::mesh_manager::MeshManager;
use ember_render_interface::texture_manager::{TextureColorSpace, TextureManager};
use glam::{Mat4, Vec2, Vec3, Vec4};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::attachments::RenderAttachments;
use crate::overlay::OverlayHook;
use crate::passes::PassContext;
use crate::passes::debug_line_pass::DebugLinePass;
use crate::passes::depth_prepass::DepthPrepass;
use crate::passes::gbuffer_pass::GBufferPass;
use crate::passes::lighting_pass::LightingPass;
use crate::passes::shadow_pass::ShadowPass;
use crate::passes::tonemap_pass::TonemapPass;
use crate::pipeline_context::PipelineContext;
use crate::present::{RecreateFlags, RenderPresent, is_minimized};
use crate::renderer_config::RendererConfig;

/// 一次 `render` 调用的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    /// 窗口最小化，整帧跳过
    Skipped,
    /// acquire 时 swapchain 失效，重建之后放弃本帧
    Abandoned,
}

/// 根据相机矩阵生成本帧的 uniform 数据
pub fn per_frame_data(view: Mat4, projection: Mat4, screen_size: Vec2, light_count: u32, frame_id: u64) -> GpuPerFrameData {
    let view_proj = projection * view;
    let camera_pos = view.inverse().w_axis.truncate();
    GpuPerFrameData {
        view,
        projection,
        view_proj,
        inv_view_proj: view_proj.inverse(),
        camera_pos: camera_pos.extend(1.0),
        screen_size: screen_size.to_array(),
        light_count,
        frame_id: frame_id as u32,
    }
}

/// frame slot 的 in-flight fence
trait SubmitFence {
    fn reset(&self) -> anyhow::Result<()>;
}
impl SubmitFence for GfxFence {
    #[inline]
    fn reset(&self) -> anyhow::Result<()> {
        GfxFence::reset(self)
    }
}

/// reset 之后紧跟 submit
///
/// update 或者 record 失败时 fence 仍然是 signaled，下一次等待同一个 slot 不会阻塞
fn reset_and_submit<F: SubmitFence>(fence: &F, submit: impl FnOnce(&F) -> anyhow::Result<()>) -> anyhow::Result<()> {
    fence.reset()?;
    submit(fence)
}

/// 每个 frame in flight 一份的同步对象以及 command buffer
struct FrameSync {
    cmd: GfxCommandBuffer,
    /// 创建时处于 signaled，第一次等待直接返回
    fence: GfxFence,
    per_frame_buffer: GfxStructuredBuffer<GpuPerFrameData>,
}
impl FrameSync {
    fn new(frame_label: FrameLabel, cmd_allocator: &mut CmdAllocator, bindless: &mut BindlessTable) -> anyhow::Result<Self> {
        let cmd = cmd_allocator.alloc_command_buffer(frame_label, "frame")?;
        let fence = GfxFence::new(true, &format!("frame-fence-{frame_label}"))?;
        let per_frame_buffer = match GfxStructuredBuffer::new_ubo(1, format!("per-frame-data-{frame_label}")) {
            Ok(buffer) => buffer,
            Err(e) => {
                fence.destroy();
                return Err(e);
            }
        };
        bindless.queue_buffer_frame(frame_label, BindlessDescriptorBinding::per_frame(), per_frame_buffer.vk_buffer());
        Ok(Self {
            cmd,
            fence,
            per_frame_buffer,
        })
    }

    fn destroy(self) {
        self.fence.destroy();
        self.per_frame_buffer.destroy();
    }
}

/// deferred 渲染器
///
/// 持有所有的 GPU 资源管理器，并按照固定的顺序驱动每一帧：
/// ```ignore
/// wait -> acquire -> update -> record -> submit -> present -> advance
/// ```
/// 录制顺序为 depth pre-pass、shadow、G-buffer、lighting、tone-map、debug line、overlay
pub struct Renderer {
    config: RendererConfig,
    frame_counter: FrameCounter,
    trace: Rc<TraceRecorder>,

    window_extent: vk::Extent2D,
    recreate: RecreateFlags,

    bindless: BindlessTable,
    cmd_allocator: CmdAllocator,
    frames: Vec<FrameSync>,

    textures: TextureManager,
    materials: MaterialManager,
    meshes: MeshManager,
    lights: LightManager,

    present: RenderPresent,
    attachments: RenderAttachments,
    pipelines: PipelineContext,
    debug_lines: DebugLinePass,
    overlay: Option<Box<dyn OverlayHook>>,

    model_loader: Box<dyn ModelLoader>,
    image_loader: Box<dyn ImageLoader>,
}
// new & init
impl Renderer {
    /// 初始化 Vulkan 以及所有管理器，任何一步失败都是致命错误
    ///
    /// `instance_extensions` 为创建 surface 所需的实例扩展
    pub fn init(
        instance_extensions: &[&'static CStr],
        raw_display_handle: RawDisplayHandle,
        raw_window_handle: RawWindowHandle,
        window_extent: vk::Extent2D,
        config: RendererConfig,
    ) -> anyhow::Result<Self> {
        let _span = tracy_client::span!("Renderer::init");
        let trace = Rc::new(TraceRecorder::new(config.trace.enabled));
        let _trace = trace.scope("init", "Renderer::init");

        Gfx::init(&config.window.title, instance_extensions)?;

        let mut bindless = BindlessTable::new()?;
        let mut cmd_allocator = CmdAllocator::new()?;
        let frames = FrameCounter::frame_labels()
            .into_iter()
            .map(|frame_label| FrameSync::new(frame_label, &mut cmd_allocator, &mut bindless))
            .collect::<anyhow::Result<Vec<_>>>()?;

        let textures = TextureManager::new(&mut bindless)?;
        let materials = MaterialManager::new(&mut bindless)?;
        let meshes = MeshManager::new(&mut bindless)?;
        let lights = LightManager::new(config.shadow.settings(), &mut bindless)?;

        let present = RenderPresent::new(
            raw_display_handle,
            raw_window_handle,
            config.present_mode.vk_present_mode(),
            window_extent,
        )?;
        let attachments = RenderAttachments::new(present.extent(), &mut bindless)?;
        let pipelines = PipelineContext::new(bindless.layout(), present.color_format())?;
        let debug_lines = DebugLinePass::new()?;

        log::info!(
            "renderer initialized: {}x{}, {:?}",
            present.extent().width,
            present.extent().height,
            config.present_mode
        );
        drop(_trace);

        Ok(Self {
            config,
            frame_counter: FrameCounter::default(),
            trace,
            window_extent,
            recreate: RecreateFlags::default(),
            bindless,
            cmd_allocator,
            frames,
            textures,
            materials,
            meshes,
            lights,
            present,
            attachments,
            pipelines,
            debug_lines,
            overlay: None,
            model_loader: Box::new(ObjModelLoader),
            image_loader: Box::new(FileImageLoader),
        })
    }
}
// getters
impl Renderer {
    #[inline]
    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    #[inline]
    pub fn frame_counter(&self) -> &FrameCounter {
        &self.frame_counter
    }

    #[inline]
    pub fn swapchain_extent(&self) -> vk::Extent2D {
        self.present.extent()
    }

    #[inline]
    pub fn meshes(&self) -> &MeshManager {
        &self.meshes
    }

    #[inline]
    pub fn textures(&self) -> &TextureManager {
        &self.textures
    }
}
// resources
impl Renderer {
    /// 替换默认的 OBJ 加载器
    pub fn set_model_loader(&mut self, loader: Box<dyn ModelLoader>) {
        self.model_loader = loader;
    }

    pub fn set_image_loader(&mut self, loader: Box<dyn ImageLoader>) {
        self.image_loader = loader;
    }

    /// 同一个路径只加载一次；arena 容量不足时返回 `MeshId::INVALID`
    pub fn load_or_get_mesh_data(&mut self, path: impl AsRef<Path>) -> anyhow::Result<(MeshId, MaterialId)> {
        let _trace = self.trace.scope("resource", "load_or_get_mesh_data");
        self.meshes.load_or_get_mesh(
            path.as_ref(),
            self.model_loader.as_ref(),
            self.image_loader.as_ref(),
            &mut self.materials,
            &mut self.textures,
            &mut self.bindless,
            self.frame_counter.frame_id(),
        )
    }

    pub fn unload_mesh(&mut self, mesh: MeshId) {
        self.meshes.unload_mesh(
            mesh,
            &mut self.materials,
            &mut self.textures,
            self.frame_counter.frame_id(),
            &mut self.bindless,
        );
    }

    /// 解码失败时返回 `TextureId::INVALID`，对应品红色的占位纹理
    pub fn load_or_get_texture(&mut self, path: impl AsRef<Path>, color_space: TextureColorSpace) -> TextureId {
        let _trace = self.trace.scope("resource", "load_or_get_texture");
        self.textures
            .load_or_get_texture(path.as_ref(), color_space, self.image_loader.as_ref(), &mut self.bindless)
    }

    pub fn unload_texture(&mut self, texture: TextureId) {
        self.textures.unload_texture(texture, self.frame_counter.frame_id(), &mut self.bindless);
    }

    #[inline]
    pub fn create_light(&mut self) -> LightId {
        self.lights.create_light()
    }

    /// 光源不再使用时调用，归还它的 shadow map
    pub fn release_light(&mut self, light: LightId) {
        self.lights.release_light(light, self.frame_counter.frame_id());
    }

    /// 下一次 `queue_light` 起生效
    pub fn set_shadow_settings(&mut self, settings: ShadowSettings) {
        self.lights.set_settings(settings);
    }

    pub fn set_overlay(&mut self, overlay: Option<Box<dyn OverlayHook>>) {
        if let Some(old) = std::mem::replace(&mut self.overlay, overlay) {
            Gfx::get().wait_idle();
            old.destroy();
        }
    }
}
// per-frame requests
impl Renderer {
    /// `material` 有效时覆盖 mesh 自身的材质
    #[inline]
    pub fn queue_draw(&mut self, transform: Mat4, mesh: MeshId, material: MaterialId) {
        self.meshes.queue_draw(transform, mesh, material);
    }

    #[inline]
    pub fn queue_light(&mut self, light: &LightComponent) {
        self.lights.queue_light(light, &mut self.bindless);
    }

    #[inline]
    pub fn queue_debug_line(&mut self, from: Vec3, to: Vec3, color: Vec4) {
        if self.config.debug_lines {
            self.debug_lines.queue_line(from, to, color);
        }
    }

    /// 窗口的 physical size 变化，在下一帧开始时重建 swapchain
    pub fn resize_window(&mut self, window_extent: vk::Extent2D) {
        if window_extent == self.window_extent {
            return;
        }
        log::info!("window resized: {}x{}", window_extent.width, window_extent.height);
        self.window_extent = window_extent;
        self.recreate.mark_resized();
    }
}
// frame
impl Renderer {
    /// 渲染并呈现一帧
    ///
    /// 本帧通过 `queue_*` 提交的请求在返回之前全部清空，不会泄漏到下一帧
    pub fn render(&mut self, view: Mat4, projection: Mat4, screen_size: Vec2) -> anyhow::Result<FrameOutcome> {
        let _span = tracy_client::span!("Renderer::render");
        let frame_name = self.frame_counter.frame_name();
        let trace = Rc::clone(&self.trace);
        let _trace = trace.scope("frame", "render");

        if is_minimized(self.window_extent) {
            self.discard_requests();
            return Ok(FrameOutcome::Skipped);
        }
        if self.recreate.take() || !self.present.has_swapchain() {
            self.recreate_swapchain()?;
            if !self.present.has_swapchain() {
                self.discard_requests();
                return Ok(FrameOutcome::Skipped);
            }
        }

        let frame_label = self.frame_counter.frame_label();

        // 1. wait
        {
            let _span = tracy_client::span!("wait fence");
            let _trace = trace.scope("frame", "wait");
            self.frames[*frame_label].fence.wait()?;
            let completed = self.frame_counter.completed_frame_id();
            self.textures.retire_completed(completed);
            self.lights.retire_completed(completed);
        }

        // 2. acquire
        let acquired = {
            let _trace = trace.scope("frame", "acquire");
            self.present.acquire_image(frame_label)?
        };
        let Some(acquired) = acquired else {
            // fence 没有 reset，下次等待同一个 slot 时直接返回
            self.recreate.mark_stale();
            self.recreate_swapchain()?;
            self.discard_requests();
            return Ok(FrameOutcome::Abandoned);
        };
        if acquired.suboptimal {
            self.recreate.mark_stale();
        }
        self.cmd_allocator.reset_frame_commands(frame_label)?;

        // 3. update
        {
            let _trace = trace.scope("frame", "update");
            self.update(frame_label, view, projection, screen_size)?;
        }

        // 4. record
        {
            let _trace = trace.scope("frame", "record");
            self.record(frame_label, acquired.image_index, &frame_name)?;
        }

        // 5. submit
        {
            let _span = tracy_client::span!("submit");
            let _trace = trace.scope("frame", "submit");
            let render_complete = self
                .present
                .render_complete_semaphore(acquired.image_index)
                .ok_or_else(|| anyhow::anyhow!("renderer: no semaphore for image {}", acquired.image_index))?;
            let frame = &self.frames[*frame_label];
            let submit_info = GfxSubmitInfo::new(std::slice::from_ref(&frame.cmd))
                .wait(
                    self.present.acquire_semaphore(frame_label),
                    vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
                    None,
                )
                .signal(render_complete, vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT, None);
            reset_and_submit(&frame.fence, |fence| Gfx::get().gfx_queue().submit(vec![submit_info], Some(fence)))?;
        }

        // 6. present
        {
            let _trace = trace.scope("frame", "present");
            if self.present.present_image(acquired.image_index)? {
                self.recreate.mark_stale();
            }
        }

        // 7. advance
        self.discard_requests();
        self.frame_counter.next_frame();
        tracy_client::frame_mark();

        if self.recreate.take() {
            self.recreate_swapchain()?;
        }
        Ok(FrameOutcome::Presented)
    }

    /// # Phase: Update
    fn update(&mut self, frame_label: FrameLabel, view: Mat4, projection: Mat4, screen_size: Vec2) -> anyhow::Result<()> {
        let _span = tracy_client::span!("Renderer::update");

        let data = per_frame_data(
            view,
            projection,
            screen_size,
            self.lights.light_count(),
            self.frame_counter.frame_id(),
        );
        self.frames[*frame_label].per_frame_buffer.transfer_data_by_mmap(std::slice::from_ref(&data))?;

        self.meshes.pre_draw(frame_label)?;
        self.materials.pre_draw(frame_label)?;
        self.lights.pre_draw(frame_label)?;
        if self.config.debug_lines {
            self.debug_lines.pre_draw(frame_label)?;
        }

        self.bindless.apply_updates(frame_label);
        Ok(())
    }

    /// # Phase: Record
    fn record(&mut self, frame_label: FrameLabel, image_index: usize, frame_name: &str) -> anyhow::Result<()> {
        let _span = tracy_client::span!("Renderer::record");
        let swapchain_view = self
            .present
            .image_view(image_index)
            .ok_or_else(|| anyhow::anyhow!("renderer: no view for swapchain image {}", image_index))?;
        let frame = self
            .attachments
            .frame_mut(frame_label)
            .ok_or_else(|| anyhow::anyhow!("renderer: attachments of {} are missing", frame_label))?;

        let cmd = self.frames[*frame_label].cmd.clone();
        cmd.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT, frame_name)?;

        let ctx = PassContext {
            cmd: &cmd,
            pipelines: &self.pipelines,
            bindless_set: self.bindless.current_set(frame_label),
            frame_label,
            extent: self.present.extent(),
        };

        DepthPrepass::draw(&ctx, &mut frame.depth, &self.meshes);
        ShadowPass::draw(&ctx, &mut self.lights, &self.meshes);
        GBufferPass::draw(&ctx, frame, &self.meshes);
        LightingPass::draw(&ctx, &mut frame.lighting, self.lights.light_count(), self.config.clear_color);

        self.present.begin_image(&cmd, image_index);
        TonemapPass::draw(&ctx, swapchain_view, self.config.exposure);
        if self.config.debug_lines {
            self.debug_lines.draw(&ctx, swapchain_view);
        }
        if let Some(overlay) = self.overlay.as_mut() {
            overlay.record(&cmd, swapchain_view, ctx.extent, frame_label);
        }
        self.present.end_image(&cmd, image_index);

        cmd.end()
    }

    /// # Phase: After Render
    ///
    /// 清空本帧排队的 draw、light 以及 debug line
    fn discard_requests(&mut self) {
        self.meshes.post_draw();
        self.lights.post_draw();
        self.debug_lines.post_draw();
    }

    fn recreate_swapchain(&mut self) -> anyhow::Result<()> {
        let _span = tracy_client::span!("Renderer::recreate_swapchain");
        let _trace = self.trace.scope("frame", "recreate_swapchain");
        self.present.recreate(self.window_extent)?;
        if !self.present.has_swapchain() {
            return Ok(());
        }
        self.pipelines.on_swapchain_format(self.present.color_format())?;
        self.attachments.rebuild(self.present.extent(), &mut self.bindless)?;
        Ok(())
    }
}
// destroy
impl Renderer {
    /// 等待 GPU 空闲，按照依赖的逆序销毁所有资源，最后销毁 Vulkan
    pub fn destroy(mut self) {
        let _span = tracy_client::span!("Renderer::destroy");
        Gfx::get().wait_idle();

        if let Some(overlay) = self.overlay.take() {
            overlay.destroy();
        }
        self.debug_lines.destroy();
        self.pipelines.destroy();
        self.attachments.destroy();
        self.present.destroy();

        self.lights.destroy();
        self.meshes.destroy();
        self.materials.destroy();
        self.textures.destroy();

        for frame in self.frames {
            frame.destroy();
        }
        self.cmd_allocator.destroy();
        self.bindless.destroy();

        if self.config.trace.enabled {
            let path = self.config.trace_output_path();
            if let Err(e) = self.trace.write_json(&path) {
                log::error!("failed to write trace {:?}: {:#}", path, e);
            }
        }

        Gfx::destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_frame_data_camera_position() {
        let eye = Vec3::new(1.0, 2.0, 3.0);
        let view = Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y);
        let projection = Mat4::perspective_rh(60f32.to_radians(), 16.0 / 9.0, 0.1, 100.0);
        let data = per_frame_data(view, projection, Vec2::new(1280.0, 720.0), 3, 42);

        assert!(data.camera_pos.truncate().abs_diff_eq(eye, 1e-4));
        assert!((data.view_proj * data.inv_view_proj).abs_diff_eq(Mat4::IDENTITY, 1e-3));
        assert_eq!(data.screen_size, [1280.0, 720.0]);
        assert_eq!(data.light_count, 3);
        assert_eq!(data.frame_id, 42);
    }

    #[derive(Default)]
    struct FakeFence {
        events: std::cell::RefCell<Vec<&'static str>>,
    }
    impl SubmitFence for FakeFence {
        fn reset(&self) -> anyhow::Result<()> {
            self.events.borrow_mut().push("reset");
            Ok(())
        }
    }

    /// 与 `Renderer::render` 的 update -> record -> submit 顺序一致
    fn run_frame(fence: &FakeFence, record_ok: bool) -> anyhow::Result<()> {
        anyhow::ensure!(record_ok, "record failed");
        reset_and_submit(fence, |fence| {
            fence.events.borrow_mut().push("submit");
            Ok(())
        })
    }

    #[test]
    fn test_fence_reset_right_before_submit() {
        let fence = FakeFence::default();
        run_frame(&fence, true).unwrap();
        assert_eq!(*fence.events.borrow(), vec!["reset", "submit"]);
    }

    #[test]
    fn test_failed_record_keeps_fence_signaled() {
        let fence = FakeFence::default();
        assert!(run_frame(&fence, false).is_err());
        assert!(fence.events.borrow().is_empty());
    }

    #[test]
    fn test_view_proj_order() {
        let view = Mat4::from_translation(Vec3::new(0.0, 0.0, -5.0));
        let projection = Mat4::from_scale(Vec3::splat(2.0));
        let data = per_frame_data(view, projection, Vec2::ONE, 0, 0);
        let p = data.view_proj.transform_point3(Vec3::ZERO);
        assert!(p.abs_diff_eq(Vec3::new(0.0, 0.0, -10.0), 1e-5));
    }
}
