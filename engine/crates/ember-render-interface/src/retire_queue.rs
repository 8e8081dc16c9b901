/// 延迟销毁队列
///
/// 资源在帧 `retired_at` 中被释放后，GPU 上可能仍有 frame in flight 在引用它。
/// 只有当 `retired_at` 之前（含）的帧都执行完毕，资源才会被真正交给销毁函数
pub struct RetireQueue<T> {
    entries: Vec<(u64, T)>,
}
impl<T> Default for RetireQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
impl<T> RetireQueue<T> {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    #[inline]
    pub fn retire(&mut self, retired_at: u64, resource: T) {
        self.entries.push((retired_at, resource));
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 取出所有在 `completed_frame_id` 及之前被释放的资源
    pub fn take_completed(&mut self, completed_frame_id: Option<u64>) -> Vec<T> {
        let Some(completed) = completed_frame_id else {
            return Vec::new();
        };
        let (done, pending): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.entries).into_iter().partition(|(retired_at, _)| *retired_at <= completed);
        self.entries = pending;
        done.into_iter().map(|(_, resource)| resource).collect()
    }

    /// 销毁时不再等待，全部取出
    pub fn take_all(&mut self) -> Vec<T> {
        std::mem::take(&mut self.entries).into_iter().map(|(_, resource)| resource).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retired_resource_waits_for_frames_in_flight() {
        let mut queue = RetireQueue::new();
        queue.retire(10, "tex");

        assert!(queue.take_completed(None).is_empty());
        assert!(queue.take_completed(Some(9)).is_empty());
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.take_completed(Some(10)), vec!["tex"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_partial_take() {
        let mut queue = RetireQueue::new();
        queue.retire(1, 1);
        queue.retire(5, 5);
        queue.retire(3, 3);
        assert_eq!(queue.take_completed(Some(3)), vec![1, 3]);
        assert_eq!(queue.take_all(), vec![5]);
    }
}
