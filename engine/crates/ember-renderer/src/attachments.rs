use ash::vk;
use ember_gfx::descriptors::sampler::{GfxSampler, GfxSamplerCreateInfo};
use ember_gfx::resources::image::GfxImage;
use ember_gfx::resources::image_state::{GfxImageState, GfxTrackedImage};
use ember_gfx::resources::image_view::{GfxImageView, GfxImageViewDesc};
use ember_render_interface::bindless::{AttachmentInput, BindlessDescriptorBinding, BindlessTable};
use ember_render_interface::frame_counter::{FrameCounter, FrameLabel};

/// G-buffer 以及中间结果的格式
pub struct AttachmentFormats;
impl AttachmentFormats {
    pub const ALBEDO: vk::Format = vk::Format::R8G8B8A8_UNORM;
    pub const NORMAL: vk::Format = vk::Format::R16G16B16A16_SFLOAT;
    /// g: roughness, b: metallic
    pub const METAL_ROUGH: vk::Format = vk::Format::R8G8B8A8_UNORM;
    pub const LIGHTING: vk::Format = vk::Format::R16G16B16A16_SFLOAT;
    pub const DEPTH: vk::Format = vk::Format::D32_SFLOAT;

    /// G-buffer pass 的 color attachments，顺序和 shader 的输出一致
    pub const GBUFFER: [vk::Format; 3] = [Self::ALBEDO, Self::NORMAL, Self::METAL_ROUGH];

    pub fn of(input: AttachmentInput) -> vk::Format {
        match input {
            AttachmentInput::Albedo => Self::ALBEDO,
            AttachmentInput::Normal => Self::NORMAL,
            AttachmentInput::MetalRough => Self::METAL_ROUGH,
            AttachmentInput::LightingColor => Self::LIGHTING,
            AttachmentInput::Depth => Self::DEPTH,
        }
    }
}

const ALL_INPUTS: [AttachmentInput; 5] = [
    AttachmentInput::Albedo,
    AttachmentInput::Normal,
    AttachmentInput::MetalRough,
    AttachmentInput::LightingColor,
    AttachmentInput::Depth,
];

/// 一张 attachment：image + view + 状态
pub struct Attachment {
    image: GfxImage,
    view: GfxImageView,
    tracked: GfxTrackedImage,
}
impl Attachment {
    fn new(input: AttachmentInput, extent: vk::Extent2D, frame_label: FrameLabel) -> anyhow::Result<Self> {
        let format = AttachmentFormats::of(input);
        let (usage, aspect) = if input == AttachmentInput::Depth {
            (vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT, vk::ImageAspectFlags::DEPTH)
        } else {
            (vk::ImageUsageFlags::COLOR_ATTACHMENT, vk::ImageAspectFlags::COLOR)
        };
        let name = format!("{:?}-{}", input, frame_label).to_lowercase();

        let image = GfxImage::new_2d_device(extent, format, usage | vk::ImageUsageFlags::SAMPLED, &name)?;
        let view = match GfxImageView::new(image.handle(), GfxImageViewDesc::new_2d(format, aspect), &name) {
            Ok(view) => view,
            Err(e) => {
                image.destroy();
                return Err(e);
            }
        };
        Ok(Self {
            tracked: GfxTrackedImage::new(image.handle(), aspect, GfxImageState::UNDEFINED),
            image,
            view,
        })
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view.handle()
    }

    #[inline]
    pub fn image(&self) -> vk::Image {
        self.image.handle()
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

/// 某个 frame slot 的所有 attachment
pub struct FrameAttachments {
    pub albedo: Attachment,
    pub normal: Attachment,
    pub metal_rough: Attachment,
    pub lighting: Attachment,
    pub depth: Attachment,
}
impl FrameAttachments {
    fn new(extent: vk::Extent2D, frame_label: FrameLabel) -> anyhow::Result<Self> {
        let mut created = Vec::with_capacity(ALL_INPUTS.len());
        for input in ALL_INPUTS {
            match Attachment::new(input, extent, frame_label) {
                Ok(attachment) => created.push(attachment),
                Err(e) => {
                    created.into_iter().for_each(Attachment::destroy);
                    return Err(e);
                }
            }
        }
        let [albedo, normal, metal_rough, lighting, depth]: [Attachment; 5] =
            created.try_into().map_err(|_| anyhow::anyhow!("attachments: attachment count mismatch"))?;
        Ok(Self {
            albedo,
            normal,
            metal_rough,
            lighting,
            depth,
        })
    }

    pub fn get(&self, input: AttachmentInput) -> &Attachment {
        match input {
            AttachmentInput::Albedo => &self.albedo,
            AttachmentInput::Normal => &self.normal,
            AttachmentInput::MetalRough => &self.metal_rough,
            AttachmentInput::LightingColor => &self.lighting,
            AttachmentInput::Depth => &self.depth,
        }
    }

    /// G-buffer 的三张 color attachment
    pub fn gbuffer_mut(&mut self) -> [&mut Attachment; 3] {
        [&mut self.albedo, &mut self.normal, &mut self.metal_rough]
    }

    fn destroy(self) {
        self.albedo.destroy();
        self.normal.destroy();
        self.metal_rough.destroy();
        self.lighting.destroy();
        self.depth.destroy();
    }
}

/// 每个 frame in flight 一份的 G-buffer、lighting color 以及 depth，尺寸和 swapchain 一致
///
/// 写入 bindless 的 binding 6；尺寸变化时整体重建
pub struct RenderAttachments {
    extent: vk::Extent2D,
    frames: Vec<FrameAttachments>,
    sampler: GfxSampler,
}
// new & init
impl RenderAttachments {
    pub fn new(extent: vk::Extent2D, bindless: &mut BindlessTable) -> anyhow::Result<Self> {
        let sampler = GfxSampler::new(&GfxSamplerCreateInfo::new_attachment(), "attachment")?;
        let mut attachments = Self {
            extent: vk::Extent2D::default(),
            frames: Vec::new(),
            sampler,
        };
        if let Err(e) = attachments.rebuild(extent, bindless) {
            attachments.destroy();
            return Err(e);
        }
        Ok(attachments)
    }
}
// getters
impl RenderAttachments {
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn frame(&self, frame_label: FrameLabel) -> Option<&FrameAttachments> {
        self.frames.get(*frame_label)
    }

    #[inline]
    pub fn frame_mut(&mut self, frame_label: FrameLabel) -> Option<&mut FrameAttachments> {
        self.frames.get_mut(*frame_label)
    }
}
// update
impl RenderAttachments {
    /// 调用者需要保证 GPU 不再使用旧的 attachment
    pub fn rebuild(&mut self, extent: vk::Extent2D, bindless: &mut BindlessTable) -> anyhow::Result<()> {
        let _span = tracy_client::span!("RenderAttachments::rebuild");
        for frame in self.frames.drain(..) {
            frame.destroy();
        }
        self.extent = extent;
        if extent.width == 0 || extent.height == 0 {
            return Ok(());
        }

        for frame_label in FrameCounter::frame_labels() {
            let frame = FrameAttachments::new(extent, frame_label)?;
            for input in ALL_INPUTS {
                bindless.queue_image_frame(
                    frame_label,
                    BindlessDescriptorBinding::attachments(),
                    input as u32,
                    frame.get(input).view(),
                    self.sampler.handle(),
                );
            }
            self.frames.push(frame);
        }
        log::info!("attachments rebuilt: {}x{}", extent.width, extent.height);
        Ok(())
    }
}
// destroy
impl RenderAttachments {
    pub fn destroy(mut self) {
        for frame in self.frames.drain(..) {
            frame.destroy();
        }
        self.sampler.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inputs_match_descriptor_indices() {
        for (idx, input) in ALL_INPUTS.iter().enumerate() {
            assert_eq!(*input as usize, idx);
        }
        assert_eq!(ALL_INPUTS.len() as u32, ember_render_interface::gpu_data::ATTACHMENT_INPUT_COUNT);
    }

    #[test]
    fn test_depth_format_only_for_depth_input() {
        for input in ALL_INPUTS {
            let is_depth = matches!(AttachmentFormats::of(input), vk::Format::D32_SFLOAT);
            assert_eq!(is_depth, input == AttachmentInput::Depth);
        }
    }
}
