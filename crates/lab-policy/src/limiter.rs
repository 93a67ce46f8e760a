//! # limiter 模块说明
//!
//! ## 角色定位（Why）
//! - 限流计数放在共享 KV 中：同一客户端打到任意副本都消耗同一配额；
//! - 采用“计数器 + 窗口 TTL”的滑动窗口近似：首次命中建立计数并设置
//!   TTL=窗口长，之后每次命中自增；计数在超限后**继续**自增，使计数器
//!   始终反映真实到达率。
//!
//! ## 决策流（What）
//! 1. 提取客户端 IP（由调用方完成）；豁免 CIDR 直接放行；
//! 2. 取首个路径正则命中的规则；无命中放行；
//! 3. `INCR rate_limit:{ip}:{rule}`；计数为 1 时设置 TTL=窗口；
//! 4. 读 TTL 计算 `reset_at` 与 `Retry-After`（TTL 不可得时回退窗口长）；
//! 5. 存储故障按配置 fail-open（放行且不带头）或 fail-closed（503 语义的
//!    429 拒绝）。

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use regex::Regex;
use tracing::warn;

use lab_core::config::{FailureMode, RateLimitConfig};
use lab_store::KeyValueStore;

use crate::error::PolicyError;
use crate::exempt::CidrMatcher;

struct CompiledRule {
    name: String,
    pattern: Regex,
    limit: u64,
    window: Duration,
}

/// 单次限流判定的计量结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitVerdict {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    /// 窗口重置的 unix 秒。
    pub reset_at: u64,
    /// 建议的重试等待秒数，落在 `[1, window]`。
    pub retry_after: u64,
}

/// 限流决策。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// 无规则命中 / 豁免 / 未启用：放行且不附带限流头。
    Unlimited,
    /// 规则命中：携带计量结果（allowed 可能为 false）。
    Limited(RateLimitVerdict),
    /// 存储故障且配置为 fail-open：放行，不附带限流头。
    FailedOpen,
    /// 存储故障且配置为 fail-closed：拒绝。
    FailedClosed,
}

/// 基于共享 KV 的滑动窗口限流器。
///
/// # 教案式说明
/// - **契约 (What)**：
///   - [`RateLimiter::check`] 不读请求体、不写响应——它只给出决策，头与
///     状态码由中间件层渲染；
///   - 计数键形如 `rate_limit:{ip}:{rule}`，TTL 在首次命中时设定为窗口长；
///   - 超限后计数继续自增（计数器反映真实到达率）；
/// - **风险 (Trade-offs)**：INCR 与 EXPIRE 非原子，进程在两者之间崩溃会
///   留下无 TTL 的计数键；下一窗口的首个请求不会重置它，该 IP 将持续被
///   限直到人工清键。按“计数为 1 才设 TTL”的约定，这一窗口极窄。
pub struct RateLimiter {
    store: Arc<dyn KeyValueStore>,
    rules: Vec<CompiledRule>,
    exempt: CidrMatcher,
    enabled: bool,
    failure_mode: FailureMode,
}

impl RateLimiter {
    /// 编译规则与豁免名单；任何一条非法配置都在启动阶段报错。
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        config: &RateLimitConfig,
    ) -> Result<Self, PolicyError> {
        let mut rules = Vec::with_capacity(config.rules.len());
        for rule in &config.rules {
            let pattern =
                Regex::new(&rule.path_pattern).map_err(|err| PolicyError::PatternCompile {
                    policy: rule.name.clone(),
                    detail: err.to_string(),
                })?;
            rules.push(CompiledRule {
                name: rule.name.clone(),
                pattern,
                limit: rule.limit,
                window: rule.window,
            });
        }

        Ok(Self {
            store,
            rules,
            exempt: CidrMatcher::new(&config.exempt_ips)?,
            enabled: config.enabled,
            failure_mode: config.failure_mode,
        })
    }

    /// 对一条请求做限流判定。
    pub async fn check(&self, ip: Option<IpAddr>, path: &str) -> RateLimitDecision {
        if !self.enabled {
            return RateLimitDecision::Unlimited;
        }

        let Some(ip) = ip else {
            // 连对端地址都没有的请求只会来自测试或本机管道，不参与限流。
            return RateLimitDecision::Unlimited;
        };
        if self.exempt.matches(ip) {
            return RateLimitDecision::Unlimited;
        }

        let Some(rule) = self.rules.iter().find(|rule| rule.pattern.is_match(path)) else {
            return RateLimitDecision::Unlimited;
        };

        let key = format!("rate_limit:{ip}:{}", rule.name);
        match self.count(&key, rule).await {
            Ok(verdict) => RateLimitDecision::Limited(verdict),
            Err(err) => {
                warn!(
                    target: "lab::policy::limiter",
                    rule = %rule.name,
                    error = %err,
                    "rate limit store operation failed"
                );
                match self.failure_mode {
                    FailureMode::FailOpen => RateLimitDecision::FailedOpen,
                    FailureMode::FailClosed => RateLimitDecision::FailedClosed,
                }
            }
        }
    }

    async fn count(
        &self,
        key: &str,
        rule: &CompiledRule,
    ) -> Result<RateLimitVerdict, lab_store::StoreError> {
        let count = self.store.incr(key).await?;
        if count == 1 {
            self.store.expire(key, rule.window).await?;
        }

        // TTL 读取失败或缺失时回退为整窗——宁可多报等待时间也不报 0。
        let ttl_secs = match self.store.ttl(key).await {
            Ok(Some(ttl)) if ttl > Duration::ZERO => ttl.as_secs().max(1),
            _ => rule.window.as_secs().max(1),
        };

        let count = u64::try_from(count).unwrap_or(u64::MAX);
        Ok(RateLimitVerdict {
            allowed: count <= rule.limit,
            limit: rule.limit,
            remaining: rule.limit.saturating_sub(count),
            reset_at: unix_now() + ttl_secs,
            retry_after: ttl_secs.min(rule.window.as_secs().max(1)),
        })
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lab_core::config::RateLimitRule;
    use lab_store::{MemoryStore, StoreError};

    fn config(limit: u64, window: Duration, failure_mode: FailureMode) -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            failure_mode,
            exempt_ips: vec!["192.168.0.0/16".to_owned()],
            rules: vec![RateLimitRule {
                name: "api".to_owned(),
                path_pattern: "^/api/".to_owned(),
                limit,
                window,
            }],
        }
    }

    fn ip(text: &str) -> Option<IpAddr> {
        Some(text.parse().expect("ip literal"))
    }

    #[tokio::test]
    async fn counts_through_the_window_and_rejects_past_the_limit() {
        let store = Arc::new(MemoryStore::new());
        let limiter = RateLimiter::new(
            store.clone(),
            &config(3, Duration::from_secs(60), FailureMode::FailOpen),
        )
        .expect("construct limiter");

        let mut verdicts = Vec::new();
        for _ in 0..5 {
            match limiter.check(ip("10.0.0.1"), "/api/v1/mainnet/fct_block").await {
                RateLimitDecision::Limited(verdict) => verdicts.push(verdict),
                other => panic!("expected Limited decision, got {other:?}"),
            }
        }

        // 前三次放行，remaining 依次 2,1,0；之后拒绝且 remaining 恒为 0。
        assert!(verdicts[0].allowed && verdicts[0].remaining == 2);
        assert!(verdicts[1].allowed && verdicts[1].remaining == 1);
        assert!(verdicts[2].allowed && verdicts[2].remaining == 0);
        assert!(!verdicts[3].allowed && verdicts[3].remaining == 0);
        assert!(!verdicts[4].allowed && verdicts[4].remaining == 0);

        for verdict in &verdicts {
            assert!((1..=60).contains(&verdict.retry_after));
            assert!(verdict.reset_at > unix_now() - 1);
        }

        // 计数器反映真实到达率：5 次调用 → 计数 5，TTL ∈ (0, 60]。
        assert_eq!(
            store.get("rate_limit:10.0.0.1:api").await.expect("get counter"),
            Some("5".to_owned())
        );
        let ttl = store
            .ttl("rate_limit:10.0.0.1:api")
            .await
            .expect("read ttl")
            .expect("counter has ttl");
        assert!(ttl > Duration::ZERO && ttl <= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn distinct_ips_consume_distinct_budgets() {
        let store = Arc::new(MemoryStore::new());
        let limiter = RateLimiter::new(
            store,
            &config(1, Duration::from_secs(60), FailureMode::FailOpen),
        )
        .expect("construct limiter");

        match limiter.check(ip("10.0.0.1"), "/api/v1/x").await {
            RateLimitDecision::Limited(verdict) => assert!(verdict.allowed),
            other => panic!("unexpected decision {other:?}"),
        }
        match limiter.check(ip("10.0.0.2"), "/api/v1/x").await {
            RateLimitDecision::Limited(verdict) => {
                assert!(verdict.allowed, "另一 IP 的首个请求不应受影响");
            }
            other => panic!("unexpected decision {other:?}"),
        }
    }

    #[tokio::test]
    async fn exempt_cidr_and_unmatched_paths_pass_through() {
        let store = Arc::new(MemoryStore::new());
        let limiter = RateLimiter::new(
            store,
            &config(1, Duration::from_secs(60), FailureMode::FailOpen),
        )
        .expect("construct limiter");

        assert_eq!(
            limiter.check(ip("192.168.1.50"), "/api/v1/x").await,
            RateLimitDecision::Unlimited
        );
        assert_eq!(
            limiter.check(ip("10.0.0.1"), "/health").await,
            RateLimitDecision::Unlimited
        );
    }

    #[tokio::test]
    async fn window_expiry_resets_the_budget() {
        let store = Arc::new(MemoryStore::new());
        let limiter = RateLimiter::new(
            store,
            &config(1, Duration::from_millis(50), FailureMode::FailOpen),
        )
        .expect("construct limiter");

        match limiter.check(ip("10.0.0.1"), "/api/v1/x").await {
            RateLimitDecision::Limited(verdict) => assert!(verdict.allowed),
            other => panic!("unexpected decision {other:?}"),
        }
        match limiter.check(ip("10.0.0.1"), "/api/v1/x").await {
            RateLimitDecision::Limited(verdict) => assert!(!verdict.allowed),
            other => panic!("unexpected decision {other:?}"),
        }

        tokio::time::sleep(Duration::from_millis(80)).await;
        match limiter.check(ip("10.0.0.1"), "/api/v1/x").await {
            RateLimitDecision::Limited(verdict) => {
                assert!(verdict.allowed, "窗口过期后配额重置");
            }
            other => panic!("unexpected decision {other:?}"),
        }
    }

    /// 永远失败的存储替身，驱动 fail-open / fail-closed 两条路径。
    struct BrokenStore;

    #[async_trait]
    impl KeyValueStore for BrokenStore {
        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            Err(broken(key))
        }
        async fn set(
            &self,
            key: &str,
            _value: &str,
            _ttl: Option<Duration>,
        ) -> Result<(), StoreError> {
            Err(broken(key))
        }
        async fn set_nx(
            &self,
            key: &str,
            _value: &str,
            _ttl: Option<Duration>,
        ) -> Result<bool, StoreError> {
            Err(broken(key))
        }
        async fn del(&self, _keys: &[String]) -> Result<u64, StoreError> {
            Err(broken("del"))
        }
        async fn keys_with_prefix(&self, key: &str) -> Result<Vec<String>, StoreError> {
            Err(broken(key))
        }
        async fn incr(&self, key: &str) -> Result<i64, StoreError> {
            Err(broken(key))
        }
        async fn expire(&self, key: &str, _ttl: Duration) -> Result<(), StoreError> {
            Err(broken(key))
        }
        async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
            Err(broken(key))
        }
        async fn ping(&self) -> Result<(), StoreError> {
            Err(broken("ping"))
        }
    }

    fn broken(key: &str) -> StoreError {
        StoreError::UnexpectedValue {
            key: key.to_owned(),
            detail: "store is down".to_owned(),
        }
    }

    #[tokio::test]
    async fn store_failure_honours_the_configured_mode() {
        let open = RateLimiter::new(
            Arc::new(BrokenStore),
            &config(1, Duration::from_secs(60), FailureMode::FailOpen),
        )
        .expect("construct limiter");
        assert_eq!(
            open.check(ip("10.0.0.1"), "/api/v1/x").await,
            RateLimitDecision::FailedOpen
        );

        let closed = RateLimiter::new(
            Arc::new(BrokenStore),
            &config(1, Duration::from_secs(60), FailureMode::FailClosed),
        )
        .expect("construct limiter");
        assert_eq!(
            closed.check(ip("10.0.0.1"), "/api/v1/x").await,
            RateLimitDecision::FailedClosed
        );
    }
}
