//! # bootstrap 模块说明
//!
//! ## 装配次序（How）
//! 1. 指标注册表与指标句柄；
//! 2. KV 存储连接 + 可达性探测（失败即退出）；
//! 3. 选举器启动；
//! 4. 拓扑/边界提供者启动 + 就绪门（30s 内未观测到发布则 fail-fast）；
//! 5. 反向代理初次对账 + 拓扑同步任务；
//! 6. RPC 端点池首轮探测；
//! 7. 前端资产装载、预热与重建任务；
//! 8. 服务循环，直至 SIGINT/SIGTERM；
//! 9. 逆序停机：先停服务面，再停后台任务，最后选举让位、断开存储。

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Context;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use lab_core::config::Config;
use lab_core::wallclock::WallclockRegistry;
use lab_frontend::{RouteCache, StateSource, load_assets};
use lab_policy::{HeaderPolicySet, RateLimiter};
use lab_proxy::{EndpointPool, NetworkProxy};
use lab_snapshot::{BoundsProvider, SnapshotMetrics, TopologyProvider};
use lab_store::{KeyValueStore, LeaderElector, RedisStore};

use crate::metrics::HttpMetrics;
use crate::server;
use crate::state::{AppState, ProviderStateSource};

/// 构建全部组件并运行网关直至收到停机信号。
pub async fn run(config: Config) -> anyhow::Result<()> {
    let config = Arc::new(config);

    let registry = prometheus::Registry::new();
    let http_metrics = HttpMetrics::register(&registry).context("register http metrics")?;
    let snapshot_metrics =
        SnapshotMetrics::register(&registry).context("register snapshot metrics")?;

    let redis = RedisStore::connect(&config.store)
        .await
        .context("connect key-value store")?;
    redis.ping().await.context("key-value store ping")?;
    let store: Arc<dyn KeyValueStore> = Arc::new(redis.clone());
    info!(target: "lab::gateway::bootstrap", "key-value store connected");

    let elector = Arc::new(LeaderElector::new(
        Arc::clone(&store),
        config.leader.clone(),
    ));
    elector.start();

    let topology = TopologyProvider::new(
        Arc::clone(&store),
        Arc::clone(&elector),
        config.topology.clone(),
        config.networks.clone(),
        snapshot_metrics.clone(),
    )
    .context("construct topology provider")?;
    topology.start();

    let bounds = BoundsProvider::new(
        Arc::clone(&store),
        Arc::clone(&elector),
        Arc::clone(&topology),
        config.bounds.clone(),
        config.networks.clone(),
        snapshot_metrics,
    )
    .context("construct bounds provider")?;
    bounds.start();

    topology
        .wait_ready()
        .await
        .context("topology snapshot readiness")?;
    bounds
        .wait_ready()
        .await
        .context("bounds snapshot readiness")?;
    info!(target: "lab::gateway::bootstrap", "snapshots ready");

    let wallclock = Arc::new(WallclockRegistry::new());
    let disabled: HashSet<String> = config
        .networks
        .iter()
        .filter(|overlay| !overlay.enabled)
        .map(|overlay| overlay.name.clone())
        .collect();
    let proxy = Arc::new(
        NetworkProxy::new(Arc::clone(&wallclock), disabled).context("construct proxy")?,
    );
    match topology.merged_networks().await {
        Ok(networks) => proxy.apply_topology(&networks),
        Err(err) => warn!(
            target: "lab::gateway::bootstrap",
            error = %err,
            "initial topology application failed; proxy starts empty"
        ),
    }

    let shutdown = CancellationToken::new();
    spawn_topology_sync(
        Arc::clone(&topology),
        Arc::clone(&proxy),
        shutdown.clone(),
    );

    let rpc_pool = EndpointPool::new(&config.gas_profiler).context("construct rpc pool")?;
    rpc_pool.start().await;

    let assets = load_assets(&config.frontend.asset_dir).context("load frontend assets")?;
    let route_cache = RouteCache::new(assets, version_record()).context("prewarm route cache")?;
    let source: Arc<dyn StateSource> = Arc::new(ProviderStateSource {
        topology: Arc::clone(&topology),
        bounds: Arc::clone(&bounds),
        features: config.features.clone(),
    });
    // 先以当前状态完成一次注入，再交给通知驱动的重建任务。
    let initial_config = source.config_state().await;
    let initial_bounds = source.bounds_state().await;
    route_cache
        .rebuild(&initial_config, &initial_bounds)
        .context("initial route cache build")?;
    route_cache.spawn_refresh(source, topology.subscribe(), bounds.subscribe());

    let header_policies =
        HeaderPolicySet::new(&config.headers.policies).context("compile header policies")?;
    let rate_limiter = RateLimiter::new(Arc::clone(&store), &config.rate_limit)
        .context("compile rate limit rules")?;

    let state = Arc::new(AppState {
        config: Arc::clone(&config),
        topology: Arc::clone(&topology),
        bounds: Arc::clone(&bounds),
        proxy,
        rpc_pool: Arc::clone(&rpc_pool),
        route_cache: Arc::clone(&route_cache),
        header_policies,
        rate_limiter,
        metrics: http_metrics,
        registry,
        store: Arc::clone(&store),
    });

    let listener = tokio::net::TcpListener::bind((config.server.host.as_str(), config.server.port))
        .await
        .with_context(|| format!("bind {}:{}", config.server.host, config.server.port))?;
    info!(
        target: "lab::gateway::bootstrap",
        host = %config.server.host,
        port = config.server.port,
        "gateway listening"
    );

    spawn_signal_handler(shutdown.clone());
    server::serve(state, listener, shutdown.clone())
        .await
        .context("serve loop")?;

    info!(target: "lab::gateway::bootstrap", "shutting down background jobs");
    route_cache.stop().await;
    rpc_pool.stop().await;
    bounds.stop().await;
    topology.stop().await;
    elector.stop().await;
    if let Err(err) = redis.shutdown().await {
        warn!(
            target: "lab::gateway::bootstrap",
            error = %err,
            "key-value store shutdown failed"
        );
    }
    info!(target: "lab::gateway::bootstrap", "gateway stopped");
    Ok(())
}

/// 拓扑通知 → 反向代理后端表对账。
fn spawn_topology_sync(
    topology: Arc<TopologyProvider>,
    proxy: Arc<NetworkProxy>,
    shutdown: CancellationToken,
) {
    let mut notifications = topology.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                received = notifications.recv() => {
                    if received.is_none() {
                        break;
                    }
                }
            }
            match topology.merged_networks().await {
                Ok(networks) => {
                    proxy.apply_topology(&networks);
                    info!(
                        target: "lab::gateway::bootstrap",
                        networks = networks.len(),
                        "proxy backend table reconciled"
                    );
                }
                Err(err) => warn!(
                    target: "lab::gateway::bootstrap",
                    error = %err,
                    "topology reconciliation failed"
                ),
            }
        }
    });
}

/// SIGINT / SIGTERM → 停机令牌。
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm = match tokio::signal::unix::signal(
                tokio::signal::unix::SignalKind::terminate(),
            ) {
                Ok(signal) => signal,
                Err(err) => {
                    warn!(
                        target: "lab::gateway::bootstrap",
                        error = %err,
                        "sigterm handler unavailable; ctrl-c only"
                    );
                    if ctrl_c.await.is_ok() {
                        shutdown.cancel();
                    }
                    return;
                }
            };
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }

        info!(target: "lab::gateway::bootstrap", "shutdown signal received");
        shutdown.cancel();
    });
}

/// 构建版本记录，注入 `window.__VERSION__`。
fn version_record() -> serde_json::Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "git_commit": option_env!("LAB_GIT_COMMIT"),
    })
}
