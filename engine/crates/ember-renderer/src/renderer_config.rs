use std::fs;
use std::path::Path;

use anyhow::Context;
use ash::vk;
use ember_crate_tools::resource::EmberPath;
use ember_render_interface::light_manager::ShadowSettings;
use serde::{Deserialize, Serialize};

/// 配置文件名，位于工作区根目录
pub const CONFIG_FILE_NAME: &str = "ember.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresentModeConfig {
    Mailbox,
    Fifo,
    Immediate,
}
impl PresentModeConfig {
    pub fn vk_present_mode(self) -> vk::PresentModeKHR {
        match self {
            Self::Mailbox => vk::PresentModeKHR::MAILBOX,
            Self::Fifo => vk::PresentModeKHR::FIFO,
            Self::Immediate => vk::PresentModeKHR::IMMEDIATE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}
impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Ember".to_string(),
            width: 1280,
            height: 720,
        }
    }
}

/// 平行光 shadow map 的投影范围
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowConfig {
    pub half_extent: f32,
    pub near: f32,
    pub far: f32,
    pub distance: f32,
    pub focus: [f32; 3],
}
impl Default for ShadowConfig {
    fn default() -> Self {
        let settings = ShadowSettings::default();
        Self {
            half_extent: settings.half_extent,
            near: settings.near,
            far: settings.far,
            distance: settings.distance,
            focus: settings.focus.to_array(),
        }
    }
}
impl ShadowConfig {
    pub fn settings(&self) -> ShadowSettings {
        ShadowSettings {
            half_extent: self.half_extent,
            near: self.near,
            far: self.far,
            distance: self.distance,
            focus: glam::Vec3::from_array(self.focus),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    pub enabled: bool,
    /// 相对于工作区根目录
    pub output: String,
}

/// 渲染器的所有可配置项，缺失的字段使用默认值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub window: WindowConfig,
    pub present_mode: PresentModeConfig,
    pub shadow: ShadowConfig,
    pub clear_color: [f32; 4],
    /// tone-map 之前乘上的曝光
    pub exposure: f32,
    pub debug_lines: bool,
    pub trace: TraceConfig,
}
impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            window: WindowConfig::default(),
            present_mode: PresentModeConfig::Mailbox,
            shadow: ShadowConfig::default(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            exposure: 1.0,
            debug_lines: true,
            trace: TraceConfig {
                enabled: false,
                output: "trace/ember-trace.json".to_string(),
            },
        }
    }
}
impl RendererConfig {
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        toml::from_str(content).context("config: parse toml")
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).with_context(|| format!("config: read {:?}", path))?;
        Self::from_toml_str(&content).with_context(|| format!("config: load {:?}", path))
    }

    /// 工作区根目录下存在 `ember.toml` 时读取，否则使用默认配置
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = EmberPath::config_path(CONFIG_FILE_NAME);
        if !path.exists() {
            log::info!("config: {:?} not found, use default config", path);
            return Ok(Self::default());
        }
        let config = Self::from_file(&path)?;
        log::info!("config: loaded {:?}", path);
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        toml::to_string_pretty(self).context("config: serialize toml")
    }

    #[inline]
    pub fn trace_output_path(&self) -> std::path::PathBuf {
        EmberPath::workspace_path().join(&self.trace.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        assert_eq!(RendererConfig::from_toml_str("").unwrap(), RendererConfig::default());
    }

    #[test]
    fn test_partial_sections() {
        let config = RendererConfig::from_toml_str(
            r#"
            present_mode = "fifo"
            exposure = 2.5

            [window]
            width = 800

            [shadow]
            half_extent = 40.0
            focus = [1.0, 0.0, -2.0]
            "#,
        )
        .unwrap();

        assert_eq!(config.present_mode, PresentModeConfig::Fifo);
        assert_eq!(config.exposure, 2.5);
        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.height, WindowConfig::default().height);
        assert_eq!(config.shadow.settings().half_extent, 40.0);
        assert_eq!(config.shadow.settings().focus, glam::vec3(1.0, 0.0, -2.0));
        assert_eq!(config.shadow.near, ShadowConfig::default().near);
    }

    #[test]
    fn test_unknown_present_mode_is_error() {
        assert!(RendererConfig::from_toml_str(r#"present_mode = "vsync""#).is_err());
    }

    #[test]
    fn test_round_trip_through_toml() {
        let mut config = RendererConfig::default();
        config.trace.enabled = true;
        let text = config.to_toml_string().unwrap();
        assert_eq!(RendererConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_present_mode_mapping() {
        assert_eq!(PresentModeConfig::Mailbox.vk_present_mode(), vk::PresentModeKHR::MAILBOX);
        assert_eq!(PresentModeConfig::Immediate.vk_present_mode(), vk::PresentModeKHR::IMMEDIATE);
    }
}
