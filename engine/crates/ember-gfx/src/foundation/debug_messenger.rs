use std::ffi::CStr;

use anyhow::Context;
use ash::vk;

pub struct GfxDebugMsger {
    pub vk_debug_utils_instance: ash::ext::debug_utils::Instance,
    pub vk_debug_utils_messenger: vk::DebugUtilsMessengerEXT,
}

impl GfxDebugMsger {
    pub fn new(vk_pf: &ash::Entry, instance: &ash::Instance) -> anyhow::Result<Self> {
        let loader = ash::ext::debug_utils::Instance::new(vk_pf, instance);

        let create_info = Self::debug_utils_messenger_ci();
        let debug_messenger = unsafe { loader.create_debug_utils_messenger(&create_info, None) }
            .context("gfx: create debug utils messenger")?;

        Ok(Self {
            vk_debug_utils_instance: loader,
            vk_debug_utils_messenger: debug_messenger,
        })
    }

    pub fn destroy(self) {
        log::info!("destroying GfxDebugMsger");
        unsafe {
            self.vk_debug_utils_instance.destroy_debug_utils_messenger(self.vk_debug_utils_messenger, None);
        }
    }
}

/// 将 validation layer 的消息整理成易读的形式
///
/// 消息体是 json 时，把 MainMessage 字段单独拿出来，其余字段格式化输出
fn format_validation_message(message_type: vk::DebugUtilsMessageTypeFlagsEXT, msg: &str) -> String {
    let mut json_value = serde_json::from_str::<serde_json::Value>(msg);
    let mut json_obj = json_value.as_mut().ok().and_then(|v| v.as_object_mut());
    let main_msg_value = json_obj.as_mut().and_then(|obj| obj.remove("MainMessage"));
    let main_msg_str = main_msg_value.as_ref().and_then(|value| value.as_str()).unwrap_or_default();
    let total_msg_str =
        json_obj.and_then(|obj| serde_json::to_string_pretty(&obj).ok()).unwrap_or_else(|| msg.to_string());

    format!("[{:?}]\n{}\n{}\n", message_type, total_msg_str, main_msg_str)
}

/// debug messenger 的回调函数
/// # Safety
/// 由 validation layer 调用，p_callback_data 在回调期间有效
unsafe extern "system" fn vk_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    let callback_data = unsafe { *p_callback_data };

    let msg = if callback_data.p_message.is_null() {
        std::borrow::Cow::from("")
    } else {
        unsafe { CStr::from_ptr(callback_data.p_message).to_string_lossy() }
    };

    let format_msg = format_validation_message(message_type, msg.as_ref());

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::error!("{}", format_msg),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => log::warn!("{}", format_msg),
        _ => log::info!("{}", format_msg),
    };

    // 只有 layer developer 才需要返回 True
    vk::FALSE
}

// 构造过程辅助函数
impl GfxDebugMsger {
    pub const fn debug_msg_type() -> vk::DebugUtilsMessageTypeFlagsEXT {
        vk::DebugUtilsMessageTypeFlagsEXT::from_raw(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL.as_raw()
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION.as_raw()
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE.as_raw(),
        )
    }

    pub const fn debug_msg_severity() -> vk::DebugUtilsMessageSeverityFlagsEXT {
        vk::DebugUtilsMessageSeverityFlagsEXT::from_raw(
            vk::DebugUtilsMessageSeverityFlagsEXT::WARNING.as_raw()
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR.as_raw(),
        )
    }

    /// 用于创建 debug messenger 的结构体
    pub fn debug_utils_messenger_ci() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
        vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(Self::debug_msg_severity())
            .message_type(Self::debug_msg_type())
            .pfn_user_callback(Some(vk_debug_callback))
    }
}

pub trait DebugType {
    fn debug_type_name() -> &'static str;
    fn vk_handle(&self) -> impl vk::Handle;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_plain_message() {
        let msg = format_validation_message(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION, "plain text");
        assert!(msg.contains("plain text"));
        assert!(msg.contains("VALIDATION"));
    }

    #[test]
    fn test_format_json_message_extracts_main_message() {
        let raw = r#"{"MainMessage":"line1\nline2","MessageID":42}"#;
        let msg = format_validation_message(vk::DebugUtilsMessageTypeFlagsEXT::GENERAL, raw);
        assert!(msg.ends_with("line1\nline2\n"));
        assert!(msg.contains("\"MessageID\": 42"));
        assert!(!msg.contains("MainMessage"));
    }
}
