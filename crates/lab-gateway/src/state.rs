//! 进程级共享状态与前端状态源实现。

use std::sync::Arc;

use async_trait::async_trait;
use prometheus::Registry;
use serde_json::Value;
use tracing::warn;

use lab_core::config::Config;
use lab_frontend::{RouteCache, StateSource};
use lab_policy::{HeaderPolicySet, RateLimiter};
use lab_proxy::{EndpointPool, NetworkProxy};
use lab_snapshot::{BoundsProvider, TopologyProvider};

use crate::view::build_config_snapshot;

/// 请求处理所需的全部共享句柄。
///
/// 进程级单例（日志、指标注册表、KV 客户端、钟摆注册表）都在装配阶段实体
/// 化后经由本结构显式下发，组件之间没有环境全局量。
pub struct AppState {
    pub config: Arc<Config>,
    pub topology: Arc<TopologyProvider>,
    pub bounds: Arc<BoundsProvider>,
    pub proxy: Arc<NetworkProxy>,
    pub rpc_pool: Arc<EndpointPool>,
    pub route_cache: Arc<RouteCache>,
    pub header_policies: HeaderPolicySet,
    pub rate_limiter: RateLimiter,
    pub metrics: crate::metrics::HttpMetrics,
    pub registry: Registry,
    pub store: Arc<dyn lab_store::KeyValueStore>,
}

/// 以快照提供者实现的前端状态源。
pub struct ProviderStateSource {
    pub topology: Arc<TopologyProvider>,
    pub bounds: Arc<BoundsProvider>,
    pub features: Vec<lab_core::config::FeatureConfig>,
}

#[async_trait]
impl StateSource for ProviderStateSource {
    async fn config_state(&self) -> Value {
        match self.topology.merged_networks().await {
            Ok(networks) => {
                let snapshot = build_config_snapshot(&networks, &self.features);
                serde_json::to_value(&snapshot).unwrap_or(Value::Null)
            }
            Err(err) => {
                warn!(
                    target: "lab::gateway::state",
                    error = %err,
                    "config state unavailable for frontend injection"
                );
                Value::Null
            }
        }
    }

    async fn bounds_state(&self) -> Value {
        match self.bounds.all_bounds().await {
            Ok(all) => serde_json::to_value(&all).unwrap_or(Value::Null),
            Err(err) => {
                warn!(
                    target: "lab::gateway::state",
                    error = %err,
                    "bounds state unavailable for frontend injection"
                );
                Value::Null
            }
        }
    }
}
