//! # kv 模块说明
//!
//! ## 角色定位（Why）
//! - 快照提供者、选举器与限流器都只需要一小撮 KV 操作；以能力契约而非具体
//!   客户端为依赖，核心逻辑可以用进程内替身做确定性测试；
//! - 契约刻意保持与 Redis 命令一一对应（GET/SET/SET NX/DEL/SCAN/INCR/
//!   EXPIRE/TTL/PING），不引入高层抽象。
//!
//! ## 行为契约（What）
//! - `get` 以 `Ok(None)` 表达未命中，传输失败走 `Err`——两者绝不混淆；
//! - `set` 的 `ttl = None` 表示不过期；
//! - `set_nx` 原子地“不存在才写入”，返回是否获得写入权；
//! - 取消遵循 Rust Future 语义（drop 即取消）；每操作的拨号/读写超时由实现
//!   的客户端配置承担。

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;

/// 共享 KV 存储的能力契约。
///
/// # 教案式说明
/// - **契约 (What)**：实现必须满足 `Send + Sync + 'static`，以 `Arc<dyn _>`
///   形式注入各组件；
/// - **风险 (Trade-offs)**：契约按命令拆分而非按场景拆分，调用方需要自己
///   维持“INCR 后补 EXPIRE”之类的复合序列；这保持了实现的简单与可替换性。
#[async_trait]
pub trait KeyValueStore: Send + Sync + 'static {
    /// 读取键值；`Ok(None)` 表示未命中。
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// 写入键值；`ttl = None` 表示不过期。
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// 键不存在时才写入；返回是否成功取得写入权。
    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>)
    -> Result<bool, StoreError>;

    /// 删除一组键，返回实际删除数量。
    async fn del(&self, keys: &[String]) -> Result<u64, StoreError>;

    /// 枚举指定前缀下的全部键。
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// 原子自增并返回新值。
    async fn incr(&self, key: &str) -> Result<i64, StoreError>;

    /// 为既有键设置过期时间。
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;

    /// 读取剩余过期时间；键不存在或无过期时间返回 `Ok(None)`。
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError>;

    /// 存储可达性探测。
    async fn ping(&self) -> Result<(), StoreError>;
}
