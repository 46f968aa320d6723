//! # Object Pools
//!
//! 按类型名分组的对象池，复用频繁分配的容器。
//!
//! - 每个类型名一个有界空闲列表 (默认上限 100)
//! - 对象归还时先 `reset`，取出时不会带有上一次使用的数据
//! - 池中对象类型擦除存储；类型不匹配时退回到 `create`

use std::any::Any;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::hash::{BuildHasher, Hash};

use parking_lot::Mutex;
use tracing::debug;

/// 可被对象池复用的对象
pub trait Poolable: Any + Send {
    /// 清空内容，保留已分配的容量
    fn reset(&mut self);
}

impl<T: Send + 'static> Poolable for Vec<T> {
    fn reset(&mut self) {
        self.clear();
    }
}

impl<T: Send + 'static> Poolable for VecDeque<T> {
    fn reset(&mut self) {
        self.clear();
    }
}

impl Poolable for String {
    fn reset(&mut self) {
        self.clear();
    }
}

impl<K, V, S> Poolable for HashMap<K, V, S>
where
    K: Send + Eq + Hash + 'static,
    V: Send + 'static,
    S: Send + BuildHasher + 'static,
{
    fn reset(&mut self) {
        self.clear();
    }
}

impl<K: Send + 'static, V: Send + 'static> Poolable for BTreeMap<K, V> {
    fn reset(&mut self) {
        self.clear();
    }
}

/// 按类型名分组的对象池
#[derive(Debug)]
pub struct ObjectPools {
    capacity: usize,
    pools: Mutex<HashMap<String, Vec<Box<dyn Any + Send>>>>,
}

impl ObjectPools {
    /// 创建对象池，每个类型最多保留 `capacity` 个空闲对象
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            pools: Mutex::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 从池中取出对象；池为空或类型不匹配时调用 `create`
    pub fn get<T, F>(&self, kind: &str, create: F) -> T
    where
        T: Poolable,
        F: FnOnce() -> T,
    {
        let pooled = self.pools.lock().get_mut(kind).and_then(Vec::pop);

        match pooled.map(|obj| obj.downcast::<T>()) {
            Some(Ok(obj)) => *obj,
            Some(Err(other)) => {
                debug!("Pooled object for '{}' has a different type, creating", kind);
                self.pools
                    .lock()
                    .entry(kind.to_string())
                    .or_default()
                    .push(other);
                create()
            }
            None => create(),
        }
    }

    /// 归还对象；池已满时丢弃并返回 `false`
    pub fn put<T: Poolable>(&self, kind: &str, mut obj: T) -> bool {
        obj.reset();
        let mut pools = self.pools.lock();
        let pool = pools.entry(kind.to_string()).or_default();
        if pool.len() >= self.capacity {
            return false;
        }
        pool.push(Box::new(obj));
        true
    }

    /// 每个池缩减到最多 `residual` 个对象，返回释放的对象数
    pub fn shrink_to(&self, residual: usize) -> usize {
        let mut pools = self.pools.lock();
        let mut freed = 0;
        for pool in pools.values_mut() {
            if pool.len() > residual {
                freed += pool.len() - residual;
                pool.truncate(residual);
            }
            pool.shrink_to_fit();
        }
        freed
    }

    /// 清空所有池，返回释放的对象数
    pub fn clear(&self) -> usize {
        let mut pools = self.pools.lock();
        let freed = pools.values().map(Vec::len).sum();
        pools.clear();
        freed
    }

    /// 各类型的空闲对象数
    pub fn sizes(&self) -> BTreeMap<String, usize> {
        self.pools
            .lock()
            .iter()
            .map(|(kind, pool)| (kind.clone(), pool.len()))
            .collect()
    }

    pub fn total(&self) -> usize {
        self.pools.lock().values().map(Vec::len).sum()
    }
}
