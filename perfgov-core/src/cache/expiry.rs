//! # Expiry Index
//!
//! 按截止时间排序的最小堆，所有条目共享一个索引，由后台任务周期性清扫。
//!
//! 覆盖写入不会删除旧的堆项；每一项带有写入时的 generation，清扫时只有
//! generation 与当前条目一致且确已过期的项才会真正删除条目，其余为空操作。

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct ExpiryItem {
    deadline: Instant,
    generation: u64,
    key: String,
}

/// Min-heap of `(deadline, generation, key)`
#[derive(Debug, Default)]
pub(crate) struct ExpiryIndex {
    heap: BinaryHeap<Reverse<ExpiryItem>>,
}

impl ExpiryIndex {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn schedule(&mut self, key: String, generation: u64, deadline: Instant) {
        self.heap.push(Reverse(ExpiryItem {
            deadline,
            generation,
            key,
        }));
    }

    /// Pop every item whose deadline lies strictly before `now`
    pub(crate) fn pop_due(&mut self, now: Instant) -> Vec<(String, u64)> {
        let mut due = Vec::new();
        while let Some(Reverse(item)) = self.heap.peek() {
            if item.deadline >= now {
                break;
            }
            if let Some(Reverse(item)) = self.heap.pop() {
                due.push((item.key, item.generation));
            }
        }
        due
    }

    /// Rebuild from the live `(key, generation, deadline)` set, dropping
    /// superseded items
    pub(crate) fn rebuild<I>(&mut self, live: I)
    where
        I: IntoIterator<Item = (String, u64, Instant)>,
    {
        self.heap = live
            .into_iter()
            .map(|(key, generation, deadline)| {
                Reverse(ExpiryItem {
                    deadline,
                    generation,
                    key,
                })
            })
            .collect();
    }

    pub(crate) fn clear(&mut self) {
        self.heap.clear();
    }

    pub(crate) fn shrink_to_fit(&mut self) {
        self.heap.shrink_to_fit();
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_pop_due_in_deadline_order() {
        let now = Instant::now();
        let mut index = ExpiryIndex::new();
        index.schedule("late".into(), 1, now + Duration::from_secs(30));
        index.schedule("early".into(), 2, now + Duration::from_secs(10));
        index.schedule("middle".into(), 3, now + Duration::from_secs(20));

        let due = index.pop_due(now + Duration::from_secs(25));
        assert_eq!(
            due,
            vec![("early".to_string(), 2), ("middle".to_string(), 3)]
        );
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_deadline_equal_to_now_is_not_due() {
        let now = Instant::now();
        let mut index = ExpiryIndex::new();
        index.schedule("k".into(), 1, now);
        assert!(index.pop_due(now).is_empty());
        assert_eq!(index.pop_due(now + Duration::from_millis(1)).len(), 1);
    }

    #[test]
    fn test_rebuild_drops_stale_items() {
        let now = Instant::now();
        let mut index = ExpiryIndex::new();
        for generation in 0..10 {
            index.schedule("k".into(), generation, now + Duration::from_secs(1));
        }
        index.rebuild(vec![("k".to_string(), 9, now + Duration::from_secs(1))]);
        assert_eq!(index.len(), 1);
    }
}
