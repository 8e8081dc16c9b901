use std::{fmt::Display, ops::Deref};

/// 帧标签（A/B）
///
/// 表示当前处于 Frames in Flight 的哪一帧。
/// 通过 `Deref` 转换为索引 0/1。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameLabel {
    A,
    B,
}
impl Deref for FrameLabel {
    type Target = usize;
    #[inline]
    fn deref(&self) -> &Self::Target {
        match self {
            Self::A => &Self::INDEX[0],
            Self::B => &Self::INDEX[1],
        }
    }
}
impl Display for FrameLabel {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::A => write!(f, "A"),
            Self::B => write!(f, "B"),
        }
    }
}
impl FrameLabel {
    const INDEX: [usize; FrameCounter::fif_count()] = [0, 1];

    #[inline]
    pub fn from_usize(idx: usize) -> Self {
        match idx {
            0 => Self::A,
            1 => Self::B,
            _ => panic!("Invalid frame index: {idx}"),
        }
    }
}

pub struct FrameCounter {
    /// 当前的帧序号，一直累加
    frame_id: u64,
}
// new & init
impl FrameCounter {
    pub fn new(init_frame_id: u64) -> Self {
        Self {
            frame_id: init_frame_id,
        }
    }
}
impl Default for FrameCounter {
    fn default() -> Self {
        Self::new(0)
    }
}
// update
impl FrameCounter {
    #[inline]
    pub fn next_frame(&mut self) {
        self.frame_id = self.frame_id.wrapping_add(1);
    }
}
// getters
impl FrameCounter {
    const FIF_COUNT: usize = 2;

    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }
    #[inline]
    pub const fn fif_count() -> usize {
        Self::FIF_COUNT
    }
    #[inline]
    pub const fn frame_labels() -> [FrameLabel; Self::FIF_COUNT] {
        [FrameLabel::A, FrameLabel::B]
    }
    #[inline]
    pub fn frame_label(&self) -> FrameLabel {
        FrameLabel::from_usize(self.frame_id as usize % Self::fif_count())
    }
    #[inline]
    pub fn frame_name(&self) -> String {
        format!("[F{}{}]", self.frame_id, self.frame_label())
    }

    /// 在当前帧等待完 fence 之后，序号不大于该值的帧都已经在 GPU 上执行完毕
    #[inline]
    pub fn completed_frame_id(&self) -> Option<u64> {
        self.frame_id.checked_sub(Self::FIF_COUNT as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_label_sequence() {
        let mut counter = FrameCounter::default();
        let mut labels = Vec::new();
        for _ in 0..3 {
            labels.push(*counter.frame_label());
            counter.next_frame();
        }
        assert_eq!(labels, vec![0, 1, 0]);
    }

    #[test]
    fn test_frame_name() {
        let counter = FrameCounter::new(5);
        assert_eq!(counter.frame_name(), "[F5B]");
    }

    #[test]
    fn test_completed_frame_id() {
        assert_eq!(FrameCounter::new(1).completed_frame_id(), None);
        assert_eq!(FrameCounter::new(2).completed_frame_id(), Some(0));
        assert_eq!(FrameCounter::new(10).completed_frame_id(), Some(8));
    }

    #[test]
    fn test_labels_cover_all_slots() {
        let labels = FrameCounter::frame_labels();
        assert_eq!(labels.len(), FrameCounter::fif_count());
        assert_eq!(labels.iter().map(|l| **l).collect::<Vec<_>>(), vec![0, 1]);
    }
}
