//! # leader 模块说明
//!
//! ## 角色定位（Why）
//! - 多副本部署下，上游抓取与快照发布必须收敛到单写者；选举构建在共享 KV
//!   的 `SET NX` + TTL 原子性之上，不引入额外的协调服务；
//! - 写者是幂等的（快照整体覆盖），因此网络分区期间的短暂双主窗口可以被
//!   容忍，契约只要求“正常情况下至多一个持锁者”。
//!
//! ## 状态机（What）
//! - `Follower → Leader`：`set_nx(lock_key, instance_id, lock_ttl)` 成功；
//! - `Leader → Follower`：续约时读到外来持有者，或读/写存储失败；
//! - `Leader → Follower（主动）`：[`LeaderElector::stop`] 在值仍等于自身
//!   实例号时删除锁键；
//! - 跟随者按 `retry_interval` 节奏探测，领导者按 `renew_interval` 续约；
//!   配置装载阶段已强制 `lock_ttl ≥ 3 × renew_interval`。
//!
//! ## 并发纪律（Trade-offs）
//! - `is_leader` 是热读，使用原子布尔；任何锁都不会跨越存储 IO 持有；
//! - 跟随期日志按“连续跟随段”去重，避免每个探测周期刷一行。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use lab_core::config::LeaderConfig;

use crate::kv::KeyValueStore;

/// 基于共享 KV 的单写者选举器。
///
/// # 教案式说明
/// - **契约 (What)**：
///   - [`LeaderElector::start`] 启动后台循环，可重复调用（幂等）；
///   - [`LeaderElector::is_leader`] 是无锁热读，任何组件在写存储前都应
///     先检查它；
///   - [`LeaderElector::stop`] 取消循环、等待退出，并在锁值仍属于本实例时
///     释放锁键；
/// - **风险 (Trade-offs)**：`stop` 的“读后删”不是原子操作；竞争窗口内锁已
///   易主时删除会被值比较挡下，满足契约要求的条件释放语义。
pub struct LeaderElector {
    inner: Arc<ElectorInner>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

struct ElectorInner {
    store: Arc<dyn KeyValueStore>,
    config: LeaderConfig,
    instance_id: String,
    is_leader: AtomicBool,
    shutdown: CancellationToken,
}

impl LeaderElector {
    /// 构造选举器；实例号为进程随机的 16 位十六进制串。
    pub fn new(store: Arc<dyn KeyValueStore>, config: LeaderConfig) -> Self {
        Self::with_instance_id(store, config, format!("{:016x}", rand::random::<u64>()))
    }

    /// 以显式实例号构造（测试注入用）。
    pub fn with_instance_id(
        store: Arc<dyn KeyValueStore>,
        config: LeaderConfig,
        instance_id: String,
    ) -> Self {
        Self {
            inner: Arc::new(ElectorInner {
                store,
                config,
                instance_id,
                is_leader: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
            }),
            handle: Mutex::new(None),
        }
    }

    /// 本进程实例号。
    pub fn instance_id(&self) -> &str {
        &self.inner.instance_id
    }

    /// 当前是否持有领导权（原子读，热路径安全）。
    pub fn is_leader(&self) -> bool {
        self.inner.is_leader.load(Ordering::Acquire)
    }

    /// 启动选举循环；重复调用为空操作。
    pub fn start(&self) {
        let mut guard = self.handle.lock();
        if guard.is_some() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        *guard = Some(tokio::spawn(async move {
            run_election(inner).await;
        }));
    }

    /// 停止循环并在锁仍属于本实例时主动让位。
    pub async fn stop(&self) {
        self.inner.shutdown.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        if self.inner.is_leader.swap(false, Ordering::AcqRel) {
            let key = &self.inner.config.lock_key;
            match self.inner.store.get(key).await {
                Ok(Some(holder)) if holder == self.inner.instance_id => {
                    if let Err(err) = self.inner.store.del(&[key.clone()]).await {
                        warn!(
                            target: "lab::store::leader",
                            error = %err,
                            "failed to release leader lock on stop"
                        );
                    } else {
                        info!(
                            target: "lab::store::leader",
                            instance = %self.inner.instance_id,
                            "released leader lock"
                        );
                    }
                }
                _ => {}
            }
        }
    }
}

async fn run_election(inner: Arc<ElectorInner>) {
    // 每个“连续跟随段”只输出一条日志，避免探测节奏刷屏。
    let mut follower_streak_logged = false;

    loop {
        if inner.is_leader.load(Ordering::Acquire) {
            renew_tick(&inner).await;
        } else {
            acquire_tick(&inner, &mut follower_streak_logged).await;
        }

        let pause = if inner.is_leader.load(Ordering::Acquire) {
            inner.config.renew_interval
        } else {
            inner.config.retry_interval
        };

        tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            _ = tokio::time::sleep(pause) => {}
        }
    }
}

async fn acquire_tick(inner: &ElectorInner, follower_streak_logged: &mut bool) {
    match inner
        .store
        .set_nx(
            &inner.config.lock_key,
            &inner.instance_id,
            Some(inner.config.lock_ttl),
        )
        .await
    {
        Ok(true) => {
            inner.is_leader.store(true, Ordering::Release);
            *follower_streak_logged = false;
            info!(
                target: "lab::store::leader",
                instance = %inner.instance_id,
                lock_key = %inner.config.lock_key,
                "acquired leadership"
            );
        }
        Ok(false) => {
            if !*follower_streak_logged {
                debug!(
                    target: "lab::store::leader",
                    instance = %inner.instance_id,
                    "lock held elsewhere; following"
                );
                *follower_streak_logged = true;
            }
        }
        Err(err) => {
            if !*follower_streak_logged {
                warn!(
                    target: "lab::store::leader",
                    instance = %inner.instance_id,
                    error = %err,
                    "leadership probe failed; staying follower"
                );
                *follower_streak_logged = true;
            }
        }
    }
}

async fn renew_tick(inner: &ElectorInner) {
    let demote = |reason: &str| {
        inner.is_leader.store(false, Ordering::Release);
        warn!(
            target: "lab::store::leader",
            instance = %inner.instance_id,
            reason,
            "lost leadership"
        );
    };

    match inner.store.get(&inner.config.lock_key).await {
        Ok(Some(holder)) if holder == inner.instance_id => {
            if let Err(err) = inner
                .store
                .set(
                    &inner.config.lock_key,
                    &inner.instance_id,
                    Some(inner.config.lock_ttl),
                )
                .await
            {
                warn!(
                    target: "lab::store::leader",
                    error = %err,
                    "leader lock renewal write failed"
                );
                demote("renew write failed");
            }
        }
        Ok(_) => demote("lock holder changed"),
        Err(err) => {
            warn!(
                target: "lab::store::leader",
                error = %err,
                "leader lock renewal read failed"
            );
            demote("renew read failed");
        }
    }
}
