/// arena 中一段空闲的区域，单位由使用者决定（顶点个数或者索引个数）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FreeRange {
    pub offset: u64,
    pub size: u64,
}
impl FreeRange {
    #[inline]
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// 固定容量 arena 的 first-fit 分配器
///
/// - 空闲区间按 offset 有序，相邻的区间总是合并
/// - 没有合适的空闲区间时，从 arena 的末尾 bump 分配
/// - 释放的区间贴着末尾时，末尾直接回退
pub struct FreeListAllocator {
    capacity: u64,
    /// bump 分配的位置，[0, end) 之外的区域从未被使用
    end: u64,
    free_ranges: Vec<FreeRange>,
}
// new & init
impl FreeListAllocator {
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            end: 0,
            free_ranges: Vec::new(),
        }
    }
}
// getters
impl FreeListAllocator {
    #[inline]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    #[inline]
    pub fn end(&self) -> u64 {
        self.end
    }

    #[inline]
    pub fn free_ranges(&self) -> &[FreeRange] {
        &self.free_ranges
    }

    /// 已经分配出去的总量
    pub fn used(&self) -> u64 {
        self.end - self.free_ranges.iter().map(|r| r.size).sum::<u64>()
    }
}
// tools
impl FreeListAllocator {
    /// 返回分配区域的 offset，容量不足时返回 None
    pub fn allocate(&mut self, size: u64) -> Option<u64> {
        if size == 0 {
            return None;
        }

        if let Some(idx) = self.free_ranges.iter().position(|r| r.size >= size) {
            let range = &mut self.free_ranges[idx];
            let offset = range.offset;
            if range.size == size {
                self.free_ranges.remove(idx);
            } else {
                range.offset += size;
                range.size -= size;
            }
            return Some(offset);
        }

        if self.capacity - self.end < size {
            return None;
        }
        let offset = self.end;
        self.end += size;
        Some(offset)
    }

    /// 归还一段区域
    ///
    /// 越界或者与空闲区间重叠（重复释放）属于调用错误，debug 下断言，release 下记录日志并忽略
    pub fn free(&mut self, offset: u64, size: u64) {
        if size == 0 {
            return;
        }
        let freed = FreeRange { offset, size };

        if freed.end() > self.end {
            debug_assert!(false, "free range {:?} beyond arena end {}", freed, self.end);
            log::error!("free range {:?} beyond arena end {}", freed, self.end);
            return;
        }

        let idx = self.free_ranges.partition_point(|r| r.offset < offset);
        let overlaps_prev = idx > 0 && self.free_ranges[idx - 1].end() > offset;
        let overlaps_next = idx < self.free_ranges.len() && self.free_ranges[idx].offset < freed.end();
        if overlaps_prev || overlaps_next {
            debug_assert!(false, "double free of range {:?}", freed);
            log::error!("double free of range {:?}", freed);
            return;
        }

        let merge_prev = idx > 0 && self.free_ranges[idx - 1].end() == offset;
        let merge_next = idx < self.free_ranges.len() && self.free_ranges[idx].offset == freed.end();
        match (merge_prev, merge_next) {
            (true, true) => {
                let next = self.free_ranges.remove(idx);
                self.free_ranges[idx - 1].size += size + next.size;
            }
            (true, false) => self.free_ranges[idx - 1].size += size,
            (false, true) => {
                let next = &mut self.free_ranges[idx];
                next.offset = offset;
                next.size += size;
            }
            (false, false) => self.free_ranges.insert(idx, freed),
        }

        // 最后一个空闲区间贴着末尾时，回退末尾
        if let Some(last) = self.free_ranges.last()
            && last.end() == self.end
        {
            self.end = last.offset;
            self.free_ranges.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bump_then_capacity() {
        let mut alloc = FreeListAllocator::new(100);
        assert_eq!(alloc.allocate(60), Some(0));
        assert_eq!(alloc.allocate(40), Some(60));
        assert_eq!(alloc.allocate(1), None);
        assert_eq!(alloc.allocate(0), None);
    }

    #[test]
    fn test_reuse_freed_range_first_fit() {
        let mut alloc = FreeListAllocator::new(1000);
        let a = alloc.allocate(100).unwrap();
        let _b = alloc.allocate(100).unwrap();
        alloc.free(a, 100);
        assert_eq!(alloc.free_ranges(), &[FreeRange { offset: 0, size: 100 }]);

        // 剩余部分被切分出来
        assert_eq!(alloc.allocate(30), Some(0));
        assert_eq!(alloc.free_ranges(), &[FreeRange { offset: 30, size: 70 }]);
        // 空闲区间放不下时 bump
        assert_eq!(alloc.allocate(80), Some(200));
        assert_eq!(alloc.allocate(70), Some(30));
        assert!(alloc.free_ranges().is_empty());
    }

    #[test]
    fn test_merge_adjacent() {
        let mut alloc = FreeListAllocator::new(1000);
        let a = alloc.allocate(10).unwrap();
        let b = alloc.allocate(10).unwrap();
        let c = alloc.allocate(10).unwrap();
        let _d = alloc.allocate(10).unwrap();

        alloc.free(a, 10);
        alloc.free(c, 10);
        assert_eq!(alloc.free_ranges().len(), 2);
        alloc.free(b, 10);
        assert_eq!(alloc.free_ranges(), &[FreeRange { offset: 0, size: 30 }]);
        assert_eq!(alloc.used(), 10);
    }

    #[test]
    fn test_end_shrinks_when_tail_freed() {
        let mut alloc = FreeListAllocator::new(1000);
        let a = alloc.allocate(10).unwrap();
        let b = alloc.allocate(10).unwrap();
        alloc.free(a, 10);
        alloc.free(b, 10);
        assert_eq!(alloc.end(), 0);
        assert!(alloc.free_ranges().is_empty());
    }

    #[test]
    fn test_live_ranges_never_overlap() {
        let mut alloc = FreeListAllocator::new(10_000);
        let mut live: Vec<(u64, u64)> = Vec::new();
        for round in 0..50u64 {
            let size = 1 + (round * 37) % 90;
            if let Some(offset) = alloc.allocate(size) {
                live.push((offset, size));
            }
            if round % 3 == 0 && !live.is_empty() {
                let (offset, size) = live.remove((round as usize * 7) % live.len());
                alloc.free(offset, size);
            }
        }
        live.sort();
        for pair in live.windows(2) {
            assert!(pair[0].0 + pair[0].1 <= pair[1].0, "{:?} overlaps {:?}", pair[0], pair[1]);
        }
        for range in alloc.free_ranges() {
            assert!(live.iter().all(|&(o, s)| o + s <= range.offset || range.end() <= o));
        }
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "double free"))]
    fn test_double_free_detected() {
        let mut alloc = FreeListAllocator::new(100);
        let a = alloc.allocate(10).unwrap();
        let _b = alloc.allocate(10).unwrap();
        alloc.free(a, 10);
        alloc.free(a, 10);
    }
}
