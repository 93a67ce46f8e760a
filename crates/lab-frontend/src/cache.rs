//! # cache 模块说明
//!
//! ## 角色定位（Why）
//! - 每条路由的首屏 HTML 在发布时一次性预热；请求路径上只剩一次哈希查表与
//!   一次 `Bytes` 克隆（引用计数），没有模板渲染；
//! - 快照更新经合并式通知触发整表重建：读者要么看到旧表、要么看到新表，
//!   绝不会看到半成品。
//!
//! ## 并发（How）
//! - 路由表放在 `ArcSwap` 中：读路径无锁 `load`，写路径构建完整新表后一次
//!   `store` 顶层替换——与路由热更新同款手法；
//! - 重建任务同时订阅目录与边界两个通知源，任一唤醒都做一次全量重建；
//!   两个快照的发布顺序不保证，重建总是读取“当下最新”状态。

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::DEFAULT_ROUTE;
use crate::assets::FrontendAssets;
use crate::error::FrontendError;
use crate::inject::inject_all;

/// 注入状态的来源：由装配层以快照提供者实现。
///
/// 以能力契约而非具体提供者为依赖，缓存层可用固定状态的替身做确定性测试。
#[async_trait]
pub trait StateSource: Send + Sync + 'static {
    /// `window.__CONFIG__` 的状态（`/api/v1/config` 同形）。
    async fn config_state(&self) -> Value;

    /// `window.__BOUNDS__` 的状态（网络 → 边界映射）。
    async fn bounds_state(&self) -> Value;
}

/// 按路由的预热 HTML 缓存。
///
/// # 教案式说明
/// - **契约 (What)**：
///   - [`RouteCache::rebuild`] 以给定状态整表重建（含 `_default`），原子
///     替换；任何路由注入失败都放弃本次重建，旧表保持可用；
///   - [`RouteCache::lookup`] 规范化路径（剥 `?`/`#`；空串、`/`、
///     `index.html` 合一为 `/`）后精确匹配，未命中回退 `_default`；
///   - [`RouteCache::spawn_refresh`] 订阅两路通知，任一唤醒即全量重建；
/// - **风险 (Trade-offs)**：重建在通知消费侧串行执行，突发多次发布被合并
///   语义自然折叠，不会堆积重建任务。
pub struct RouteCache {
    assets: FrontendAssets,
    version: Value,
    routes: ArcSwap<HashMap<String, Bytes>>,
    shutdown: CancellationToken,
    handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl RouteCache {
    /// 以资产与构建版本构造缓存，并立即用空状态完成首次预热。
    ///
    /// 首次预热保证 `_default` 键自构造起即存在：就绪门尚未放行时的请求
    /// 也能拿到结构完整（状态为空）的页面。
    pub fn new(assets: FrontendAssets, version: Value) -> Result<Arc<Self>, FrontendError> {
        let cache = Arc::new(Self {
            assets,
            version,
            routes: ArcSwap::from_pointee(HashMap::new()),
            shutdown: CancellationToken::new(),
            handle: parking_lot::Mutex::new(None),
        });
        cache.rebuild(&Value::Null, &Value::Null)?;
        Ok(cache)
    }

    /// 以给定状态整表重建并原子替换。
    pub fn rebuild(&self, config: &Value, bounds: &Value) -> Result<(), FrontendError> {
        let mut routes = HashMap::with_capacity(self.assets.heads.len() + 1);

        routes.insert(
            DEFAULT_ROUTE.to_owned(),
            inject_all(&self.assets.index_html, config, bounds, &self.version, "")?,
        );
        for (route, head) in &self.assets.heads {
            routes.insert(
                route.clone(),
                inject_all(
                    &self.assets.index_html,
                    config,
                    bounds,
                    &self.version,
                    &head.raw,
                )?,
            );
        }

        self.routes.store(Arc::new(routes));
        Ok(())
    }

    /// 查找路由对应的 HTML；未命中回退 `_default`。
    pub fn lookup(&self, path: &str) -> Bytes {
        let normalized = normalize_route(path);
        let routes = self.routes.load();
        routes
            .get(normalized)
            .or_else(|| routes.get(DEFAULT_ROUTE))
            .cloned()
            .unwrap_or_default()
    }

    /// 当前缓存的路由数（含 `_default`）。
    pub fn route_count(&self) -> usize {
        self.routes.load().len()
    }

    /// 启动后台重建任务：任一快照通知都会触发一次全量重建。
    pub fn spawn_refresh(
        self: &Arc<Self>,
        source: Arc<dyn StateSource>,
        mut topology_rx: mpsc::Receiver<()>,
        mut bounds_rx: mpsc::Receiver<()>,
    ) {
        let mut guard = self.handle.lock();
        if guard.is_some() {
            return;
        }
        let cache = Arc::clone(self);
        *guard = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cache.shutdown.cancelled() => break,
                    received = topology_rx.recv() => {
                        if received.is_none() {
                            break;
                        }
                    }
                    received = bounds_rx.recv() => {
                        if received.is_none() {
                            break;
                        }
                    }
                }

                let config = source.config_state().await;
                let bounds = source.bounds_state().await;
                match cache.rebuild(&config, &bounds) {
                    Ok(()) => debug!(
                        target: "lab::frontend::cache",
                        routes = cache.route_count(),
                        "route cache rebuilt"
                    ),
                    Err(err) => warn!(
                        target: "lab::frontend::cache",
                        error = %err,
                        "route cache rebuild failed; keeping previous snapshot"
                    ),
                }
            }
        }));
    }

    /// 停止后台重建任务。
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

/// 路由规范化：剥掉查询与片段，空串/`/`/`index.html` 合一为 `/`。
fn normalize_route(path: &str) -> &str {
    let mut trimmed = path;
    if let Some((head, _)) = trimmed.split_once('?') {
        trimmed = head;
    }
    if let Some((head, _)) = trimmed.split_once('#') {
        trimmed = head;
    }
    match trimmed {
        "" | "/" | "index.html" | "/index.html" => "/",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::RouteHead;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn assets() -> FrontendAssets {
        let mut heads = BTreeMap::new();
        heads.insert(
            "/experiments/block-production".to_owned(),
            RouteHead {
                raw: "<title>block production</title>".to_owned(),
            },
        );
        FrontendAssets {
            index_html: "<html><head></head><body></body></html>".to_owned(),
            heads,
        }
    }

    struct FixedSource;

    #[async_trait]
    impl StateSource for FixedSource {
        async fn config_state(&self) -> Value {
            json!({"networks": [{"name": "mainnet"}]})
        }

        async fn bounds_state(&self) -> Value {
            json!({"mainnet": {"tables": {}}})
        }
    }

    #[tokio::test]
    async fn default_route_exists_from_construction() {
        let cache = RouteCache::new(assets(), json!({"version": "test"})).expect("construct");
        assert_eq!(cache.route_count(), 2);
        let html = cache.lookup("/");
        assert!(!html.is_empty());
        assert!(String::from_utf8_lossy(&html).contains("window.__CONFIG__"));
    }

    #[tokio::test]
    async fn lookup_normalizes_and_falls_back_to_default() {
        let cache = RouteCache::new(assets(), json!({"version": "test"})).expect("construct");
        cache
            .rebuild(&json!({"networks": []}), &json!({}))
            .expect("rebuild");

        let exact = cache.lookup("/experiments/block-production");
        assert!(String::from_utf8_lossy(&exact).contains("<title>block production</title>"));

        let with_query = cache.lookup("/experiments/block-production?network=mainnet#top");
        assert_eq!(exact, with_query, "查询与片段不参与路由匹配");

        let fallback = cache.lookup("/unknown/route");
        assert!(!String::from_utf8_lossy(&fallback).contains("<title>block production</title>"));

        assert_eq!(cache.lookup(""), cache.lookup("/"));
        assert_eq!(cache.lookup("index.html"), cache.lookup("/"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn notification_triggers_rebuild_with_fresh_state() {
        let cache = RouteCache::new(assets(), json!({"version": "test"})).expect("construct");
        let before = cache.lookup("/");
        assert!(!String::from_utf8_lossy(&before).contains("mainnet"));

        let notifier = lab_core::notify::Notifier::new();
        let topology_rx = notifier.subscribe();
        let (_bounds_tx, bounds_rx) = mpsc::channel(1);
        cache.spawn_refresh(Arc::new(FixedSource), topology_rx, bounds_rx);

        notifier.notify();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let after = cache.lookup("/");
        assert!(
            String::from_utf8_lossy(&after).contains("mainnet"),
            "重建后的页面必须携带新状态"
        );
        cache.stop().await;
    }
}
