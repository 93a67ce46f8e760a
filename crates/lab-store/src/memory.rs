//! 进程内 KV 存储替身。
//!
//! 供单元与集成测试在无外部依赖的情况下驱动选举、快照与限流逻辑；也用于
//! 本地开发时的降级运行。TTL 以惰性方式生效：任何访问触达到期键时将其
//! 清除，语义与 Redis 的过期观测一致（读不到即视为不存在）。

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::StoreError;
use crate::kv::KeyValueStore;

#[derive(Clone, Debug)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// 进程内哈希表实现的 [`KeyValueStore`]。
///
/// # 教案式说明
/// - **意图 (Why)**：让选举、限流与快照逻辑的测试不依赖外部 Redis，并可在
///   毫秒级 TTL 下做确定性断言；
/// - **契约 (What)**：与生产实现等价的可观测语义——过期键读不到、`set_nx`
///   原子判断、`incr` 对非数值返回错误；
/// - **风险 (Trade-offs)**：惰性过期意味着 `keys_with_prefix` 之类的全表
///   操作也会顺带清理，但内存回收时机不保证。
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    /// 创建空存储。
    pub fn new() -> Self {
        Self::default()
    }

    fn purge_expired(entries: &mut HashMap<String, Entry>, now: Instant) {
        entries.retain(|_, entry| !entry.expired(now));
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut entries = self.entries.lock();
        Self::purge_expired(&mut entries, Instant::now());
        Ok(entries.get(key).map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut entries = self.entries.lock();
        entries.insert(
            key.to_owned(),
            Entry {
                value: value.to_owned(),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn set_nx(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        Self::purge_expired(&mut entries, now);
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(
            key.to_owned(),
            Entry {
                value: value.to_owned(),
                expires_at: ttl.map(|ttl| now + ttl),
            },
        );
        Ok(true)
    }

    async fn del(&self, keys: &[String]) -> Result<u64, StoreError> {
        let mut entries = self.entries.lock();
        let mut removed = 0;
        for key in keys {
            if entries.remove(key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut entries = self.entries.lock();
        Self::purge_expired(&mut entries, Instant::now());
        let mut keys: Vec<String> = entries
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        Self::purge_expired(&mut entries, now);
        match entries.get_mut(key) {
            Some(entry) => {
                let current: i64 =
                    entry
                        .value
                        .parse()
                        .map_err(|_| StoreError::UnexpectedValue {
                            key: key.to_owned(),
                            detail: format!("`{}` is not an integer", entry.value),
                        })?;
                let next = current + 1;
                entry.value = next.to_string();
                Ok(next)
            }
            None => {
                entries.insert(
                    key.to_owned(),
                    Entry {
                        value: "1".to_owned(),
                        expires_at: None,
                    },
                );
                Ok(1)
            }
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        Self::purge_expired(&mut entries, now);
        Ok(entries
            .get(key)
            .and_then(|entry| entry.expires_at)
            .map(|deadline| deadline.saturating_duration_since(now)))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
