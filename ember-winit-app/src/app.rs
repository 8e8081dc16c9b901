use std::ffi::CStr;
use std::time::{Duration, Instant};

use ash::vk;
use ember_renderer::renderer::Renderer;
use ember_renderer::renderer_config::RendererConfig;
use glam::Vec2;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::window::{Window, WindowId};

use crate::camera::{Camera, CameraController};
use crate::input::InputState;

/// 由具体的程序实现，描述场景里有什么
pub trait Scene {
    /// renderer 创建之后调用一次，在这里加载资源
    fn init(&mut self, renderer: &mut Renderer, camera: &mut Camera) -> anyhow::Result<()>;

    /// 每帧在 `Renderer::render` 之前调用，在这里提交 draw 以及光源
    fn update(&mut self, renderer: &mut Renderer, elapsed: Duration);

    /// renderer 销毁之前调用
    fn destroy(&mut self, _renderer: &mut Renderer) {}
}

pub struct WinitApp {
    config: RendererConfig,
    scene: Box<dyn Scene>,
    camera_controller: CameraController,
    input: InputState,

    window: Option<Window>,
    renderer: Option<Renderer>,

    start_time: Instant,
    last_frame: Instant,
    /// 事件回调里出现的致命错误，退出循环之后返回
    error: Option<anyhow::Error>,
}
// 总的 main 函数
impl WinitApp {
    /// 整个程序的入口
    pub fn run(scene: Box<dyn Scene>) -> anyhow::Result<()> {
        ember_crate_tools::init_log::init_log();
        let config = RendererConfig::load_or_default()?;

        let event_loop = EventLoop::new()?;
        let now = Instant::now();
        let mut app = Self {
            config,
            scene,
            camera_controller: CameraController::default(),
            input: InputState::default(),
            window: None,
            renderer: None,
            start_time: now,
            last_frame: now,
            error: None,
        };

        event_loop.run_app(&mut app)?;
        log::info!("end run.");

        app.destroy();
        match app.error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
// new & init
impl WinitApp {
    /// 在 window 创建之后调用，初始化 Renderer 以及场景
    fn init_after_window(&mut self, event_loop: &ActiveEventLoop) -> anyhow::Result<()> {
        let _span = tracy_client::span!("WinitApp::init_after_window");
        let window_attr = Window::default_attributes()
            .with_title(self.config.window.title.clone())
            .with_inner_size(winit::dpi::LogicalSize::new(
                self.config.window.width as f64,
                self.config.window.height as f64,
            ));
        let window = event_loop.create_window(window_attr)?;

        let raw_display_handle = window.display_handle()?.as_raw();
        let raw_window_handle = window.window_handle()?.as_raw();
        // 追加 window system 需要的 extension，例如 khr::Surface
        let instance_extensions = ash_window::enumerate_required_extensions(raw_display_handle)?
            .iter()
            .map(|ext| unsafe { CStr::from_ptr(*ext) })
            .collect::<Vec<_>>();

        let size = window.inner_size();
        let mut renderer = Renderer::init(
            &instance_extensions,
            raw_display_handle,
            raw_window_handle,
            vk::Extent2D {
                width: size.width,
                height: size.height,
            },
            self.config.clone(),
        )?;

        {
            let _span = tracy_client::span!("Scene::init");
            self.scene.init(&mut renderer, self.camera_controller.camera_mut())?;
        }

        self.renderer = Some(renderer);
        self.window = Some(window);
        Ok(())
    }
}
// update
impl WinitApp {
    fn redraw(&mut self) -> anyhow::Result<()> {
        let (Some(renderer), Some(window)) = (self.renderer.as_mut(), self.window.as_ref()) else {
            return Ok(());
        };
        let now = Instant::now();
        let delta_time = now - self.last_frame;
        self.last_frame = now;

        let size = window.inner_size();
        let screen_size = Vec2::new(size.width as f32, size.height as f32);
        self.camera_controller.update(&self.input, screen_size, delta_time);
        self.input.end_frame();

        self.scene.update(renderer, now - self.start_time);

        let camera = self.camera_controller.camera();
        renderer.render(camera.view_matrix(), camera.projection_matrix(), screen_size)?;
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("fatal: {:#}", error);
        self.error.get_or_insert(error);
        event_loop.exit();
    }
}
// destroy
impl WinitApp {
    fn destroy(&mut self) {
        if let Some(mut renderer) = self.renderer.take() {
            self.scene.destroy(&mut renderer);
            renderer.destroy();
        }
        self.window = None;
    }
}
// 各种 winit 的事件处理
impl ApplicationHandler for WinitApp {
    // 建议在这里创建 window 和 Renderer
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        log::info!("winit event: resumed");
        if let Err(e) = self.init_after_window(event_loop) {
            self.fail(event_loop, e);
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        self.input.handle_window_event(&event);

        match event {
            WindowEvent::CloseRequested => {
                event_loop.exit();
            }
            WindowEvent::Resized(physical_size) => {
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.resize_window(vk::Extent2D {
                        width: physical_size.width,
                        height: physical_size.height,
                    });
                }
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.redraw() {
                    self.fail(event_loop, e);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = self.window.as_ref() {
            window.request_redraw();
        }
    }

    fn suspended(&mut self, _event_loop: &ActiveEventLoop) {
        log::warn!("winit event: suspended");
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        log::info!("loop exiting");
    }
}
