//! Ember 工具集
//!
//! 提供日志初始化、资源路径管理、trace 记录等通用工具。
//!
//! # EmberPath
//! 基于工作区根目录的统一路径管理，避免硬编码相对路径。
//!
//! # TraceRecorder
//! 以 JSON 数组的形式记录耗时事件，可以直接拖入 chrome://tracing 或 Perfetto 查看。

pub mod init_log;
pub mod resource;
pub mod trace;
