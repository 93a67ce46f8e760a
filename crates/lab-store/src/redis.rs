//! # redis 模块说明
//!
//! ## 角色定位（Why）
//! - [`KeyValueStore`] 的生产实现：一个进程级 fred 连接池，启动时建立、
//!   关停时 `quit`；所有副本通过它共享快照、选举锁与限流计数；
//! - 拨号/命令超时收敛在客户端配置里，调用方不重复携带超时参数。
//!
//! ## 实现策略（How）
//! - 池内客户端轮转由 fred 的 `Pool` 自带；
//! - 断线重连采用指数退避策略，命令在重连窗口内由 fred 缓冲或按超时失败；
//! - `keys_with_prefix` 用 SCAN 游标分页而非 KEYS，避免在大键空间上阻塞
//!   存储。

use std::time::Duration;

use fred::prelude::*;
use fred::types::{Expiration, SetOptions};
use fred::types::scan::Scanner;
use futures::TryStreamExt;

use async_trait::async_trait;
use lab_core::config::StoreConfig;

use crate::error::StoreError;
use crate::kv::KeyValueStore;

/// 每次 SCAN 请求的批大小。
const SCAN_PAGE: u32 = 512;

/// 基于 fred 连接池的 Redis 存储实现。
///
/// # 教案式说明
/// - **契约 (What)**：[`RedisStore::connect`] 成功返回后，池内连接已建立并
///   完成首次握手；[`RedisStore::shutdown`] 发送 QUIT 并等待连接收尾；
/// - **风险 (Trade-offs)**：命令超时是全池统一值；个别慢操作（大 SCAN）与
///   快操作共享同一上限，必要时可拆分第二个池。
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
}

impl RedisStore {
    /// 按配置建立连接池并完成初始化握手。
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let redis_config = Config::from_url(&config.url)?;
        let pool = Builder::from_config(redis_config)
            .with_connection_config(|conn| {
                conn.connection_timeout = config.connect_timeout;
            })
            .with_performance_config(|perf| {
                perf.default_command_timeout = config.command_timeout;
            })
            .set_policy(ReconnectPolicy::new_exponential(0, 100, 10_000, 2))
            .build_pool(config.pool_size)?;
        // init 返回连接任务句柄；断线重连由重连策略接管，这里不保留句柄。
        let _ = pool.init().await?;
        Ok(Self { pool })
    }

    /// 优雅关停：通知服务端并等待池内连接退出。
    pub async fn shutdown(&self) -> Result<(), StoreError> {
        self.pool.quit().await?;
        Ok(())
    }
}

fn expiration_for(ttl: Duration) -> Expiration {
    if ttl.subsec_millis() == 0 {
        Expiration::EX(ttl.as_secs() as i64)
    } else {
        Expiration::PX(ttl.as_millis() as i64)
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value: Option<String> = self.pool.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let _: () = self
            .pool
            .set(key, value, ttl.map(expiration_for), None, false)
            .await?;
        Ok(())
    }

    async fn set_nx(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        // SET .. NX 在未取得写入权时返回 nil，因此以 Option 接收。
        let reply: Option<String> = self
            .pool
            .set(key, value, ttl.map(expiration_for), Some(SetOptions::NX), false)
            .await?;
        Ok(reply.is_some())
    }

    async fn del(&self, keys: &[String]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let removed: u64 = self.pool.del(keys.to_vec()).await?;
        Ok(removed)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let pattern = format!("{prefix}*");
        let mut keys = Vec::new();
        let mut scanner = self.pool.next().scan(pattern, Some(SCAN_PAGE), None);
        while let Some(mut page) = scanner.try_next().await? {
            if let Some(page_keys) = page.take_results() {
                for key in page_keys {
                    match key.as_str() {
                        Some(text) => keys.push(text.to_owned()),
                        None => {
                            return Err(StoreError::UnexpectedValue {
                                key: prefix.to_owned(),
                                detail: "scan returned a non-utf8 key".to_owned(),
                            });
                        }
                    }
                }
            }
            page.next();
        }
        Ok(keys)
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let value: i64 = self.pool.incr(key).await?;
        Ok(value)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let _: i64 = self
            .pool
            .expire(key, ttl.as_secs().max(1) as i64, None)
            .await?;
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let seconds: i64 = self.pool.ttl(key).await?;
        // Redis 约定：-2 键不存在，-1 无过期时间。
        if seconds < 0 {
            Ok(None)
        } else {
            Ok(Some(Duration::from_secs(seconds as u64)))
        }
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let _: String = self.pool.ping(None).await?;
        Ok(())
    }
}
