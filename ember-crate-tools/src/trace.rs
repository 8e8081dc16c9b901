use std::{
    cell::RefCell,
    path::Path,
    sync::atomic::{AtomicU64, Ordering},
    time::Instant,
};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// chrome trace 格式中的一个 complete event（`ph = "X"`）
///
/// 时间单位均为微秒
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub cat: String,
    pub dur: u64,
    pub name: String,
    pub ph: String,
    pub pid: u32,
    pub tid: u64,
    pub ts: u64,
}

/// 每个线程分配一个递增的 id，比 `ThreadId` 更适合写进 json
fn current_thread_id() -> u64 {
    static NEXT_ID: AtomicU64 = AtomicU64::new(1);
    thread_local! {
        static THREAD_ID: u64 = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    }
    THREAD_ID.with(|id| *id)
}

/// 记录耗时事件，最终输出为 JSON 数组
///
/// 关闭时 `scope` 不做任何记录，开销只有一次分支判断
pub struct TraceRecorder {
    enabled: bool,
    origin: Instant,
    events: RefCell<Vec<TraceEvent>>,
}
// new & init
impl TraceRecorder {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            origin: Instant::now(),
            events: RefCell::new(Vec::new()),
        }
    }
}
// getters
impl TraceRecorder {
    #[inline]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    #[inline]
    pub fn event_count(&self) -> usize {
        self.events.borrow().len()
    }
}
// tools
impl TraceRecorder {
    /// 开始一个作用域，离开作用域时记录一条事件
    pub fn scope(&self, cat: &'static str, name: impl Into<String>) -> TraceScope<'_> {
        TraceScope {
            recorder: self,
            inner: self.enabled.then(|| (cat, name.into(), Instant::now())),
        }
    }

    /// 直接记录一条事件
    pub fn record(&self, cat: &str, name: &str, start: Instant, end: Instant) {
        if !self.enabled {
            return;
        }
        let ts = start.saturating_duration_since(self.origin).as_micros() as u64;
        let dur = end.saturating_duration_since(start).as_micros() as u64;
        self.events.borrow_mut().push(TraceEvent {
            cat: cat.to_string(),
            dur,
            name: name.to_string(),
            ph: "X".to_string(),
            pid: std::process::id(),
            tid: current_thread_id(),
            ts,
        });
    }

    pub fn to_json_string(&self) -> anyhow::Result<String> {
        serde_json::to_string(&*self.events.borrow()).context("trace: serialize events")
    }

    /// 写出到文件，并清空已记录的事件
    pub fn write_json(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let json = self.to_json_string()?;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).with_context(|| format!("trace: create dir {:?}", dir))?;
        }
        std::fs::write(path, json).with_context(|| format!("trace: write {:?}", path))?;
        log::info!("trace written to {:?} ({} events)", path, self.event_count());
        self.events.borrow_mut().clear();
        Ok(())
    }
}

pub struct TraceScope<'a> {
    recorder: &'a TraceRecorder,
    inner: Option<(&'static str, String, Instant)>,
}
impl Drop for TraceScope<'_> {
    fn drop(&mut self) {
        if let Some((cat, name, start)) = self.inner.take() {
            self.recorder.record(cat, &name, start, Instant::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_recorder_records_nothing() {
        let recorder = TraceRecorder::new(false);
        {
            let _scope = recorder.scope("frame", "render");
        }
        assert_eq!(recorder.event_count(), 0);
        assert_eq!(recorder.to_json_string().unwrap(), "[]");
    }

    #[test]
    fn test_scope_records_event() {
        let recorder = TraceRecorder::new(true);
        {
            let _outer = recorder.scope("frame", "render");
            let _inner = recorder.scope("pass", "gbuffer");
        }
        assert_eq!(recorder.event_count(), 2);

        let json = recorder.to_json_string().unwrap();
        let events: Vec<TraceEvent> = serde_json::from_str(&json).unwrap();
        // inner 先 drop
        assert_eq!(events[0].name, "gbuffer");
        assert_eq!(events[0].cat, "pass");
        assert_eq!(events[1].name, "render");
        assert!(events.iter().all(|e| e.ph == "X"));
        assert!(events[1].ts <= events[0].ts);
    }

    #[test]
    fn test_json_field_names() {
        let recorder = TraceRecorder::new(true);
        let now = Instant::now();
        recorder.record("upload", "mesh", now, now);

        let value: serde_json::Value = serde_json::from_str(&recorder.to_json_string().unwrap()).unwrap();
        let event = &value.as_array().unwrap()[0];
        for key in ["cat", "dur", "name", "tid", "ts"] {
            assert!(event.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn test_write_json_clears_events() {
        let recorder = TraceRecorder::new(true);
        let now = Instant::now();
        recorder.record("frame", "present", now, now);

        let path = std::env::temp_dir().join(format!("ember-trace-test-{}.json", std::process::id()));
        recorder.write_json(&path).unwrap();
        assert_eq!(recorder.event_count(), 0);

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with('['));
        std::fs::remove_file(&path).ok();
    }
}
