use std::path::PathBuf;
use std::time::Duration;

use ember_crate_tools::resource::EmberPath;
use ember_render_interface::handles::{LightId, MaterialId, MeshId};
use ember_render_interface::light_manager::{LightComponent, LightKind};
use ember_renderer::renderer::Renderer;
use ember_winit_app::app::{Scene, WinitApp};
use ember_winit_app::camera::Camera;
use glam::{Mat4, Vec3, Vec4};

/// 加载一个 obj 模型，一盏带阴影的平行光，一盏绕模型旋转的点光源
struct ViewerScene {
    model_path: PathBuf,
    mesh: MeshId,
    sun: LightId,
    lamp: LightId,
}
impl ViewerScene {
    fn new(model_path: PathBuf) -> Self {
        Self {
            model_path,
            mesh: MeshId::INVALID,
            sun: LightId::INVALID,
            lamp: LightId::INVALID,
        }
    }

    fn queue_axes(renderer: &mut Renderer) {
        let axes = [
            (Vec3::X, Vec4::new(1.0, 0.0, 0.0, 1.0)),
            (Vec3::Y, Vec4::new(0.0, 1.0, 0.0, 1.0)),
            (Vec3::Z, Vec4::new(0.0, 0.0, 1.0, 1.0)),
        ];
        for (axis, color) in axes {
            renderer.queue_debug_line(Vec3::ZERO, axis, color);
        }
    }
}
impl Scene for ViewerScene {
    fn init(&mut self, renderer: &mut Renderer, camera: &mut Camera) -> anyhow::Result<()> {
        let (mesh, _) = renderer.load_or_get_mesh_data(&self.model_path)?;
        if !mesh.is_valid() {
            log::warn!("mesh arena is full, {:?} is not drawn", self.model_path);
        }
        self.mesh = mesh;
        self.sun = renderer.create_light();
        self.lamp = renderer.create_light();

        camera.position = Vec3::new(0.0, 2.0, 6.0);
        camera.look_at(Vec3::ZERO);
        Ok(())
    }

    fn update(&mut self, renderer: &mut Renderer, elapsed: Duration) {
        renderer.queue_draw(Mat4::IDENTITY, self.mesh, MaterialId::INVALID);

        renderer.queue_light(&LightComponent {
            light_id: self.sun,
            kind: LightKind::Directional,
            enabled: true,
            casts_shadow: true,
            color: Vec3::ONE,
            direction_or_position: Vec3::new(-0.4, -1.0, -0.3),
            intensity: 3.0,
        });

        let t = elapsed.as_secs_f32();
        renderer.queue_light(&LightComponent {
            light_id: self.lamp,
            kind: LightKind::Point,
            enabled: true,
            casts_shadow: false,
            color: Vec3::new(1.0, 0.6, 0.3),
            direction_or_position: Vec3::new(t.cos() * 3.0, 1.5, t.sin() * 3.0),
            intensity: 20.0,
        });

        Self::queue_axes(renderer);
    }

    fn destroy(&mut self, renderer: &mut Renderer) {
        if self.mesh.is_valid() {
            renderer.unload_mesh(self.mesh);
        }
        renderer.release_light(self.sun);
        renderer.release_light(self.lamp);
    }
}

fn main() -> anyhow::Result<()> {
    let model_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| EmberPath::assets_path("models/cube.obj"));
    WinitApp::run(Box::new(ViewerScene::new(model_path)))
}
