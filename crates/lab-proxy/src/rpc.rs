//! # rpc 模块说明
//!
//! ## 角色定位（Why）
//! - gas-profiler 的上游是一组 JSON-RPC 执行层节点；同步中的节点会给出陈旧
//!   或错误的模拟结果，必须从选择集中摘除；
//! - 端点池自带后台健康轮询，请求路径只在健康者之间轮转，绝不现场探测。
//!
//! ## 健康判定（What）
//! - 以 5s 超时发送 `eth_syncing`；HTTP 200 且 `result` 为字面量 `false`
//!   视为健康，其余（同步对象、错误、超时）视为不健康；
//! - [`EndpointPool::start`] 的首轮探测同步完成，返回时每个端点都有已知
//!   状态；
//! - 健康状态翻转时各记录一条日志，稳定状态不刷屏。
//!
//! ## 并发（Trade-offs）
//! - 健康位是端点上的原子布尔：轮询器唯一写者，请求路径只读；
//! - 轮转计数是按网络的原子递增，相对于健康集合的瞬时大小取模——健康集合
//!   在两次选择之间收缩时可能出现相邻请求命中同一端点，属可接受偏差。

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use lab_core::GatewayError;
use lab_core::config::GasProfilerConfig;

/// 健康探测超时。
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// 单个 JSON-RPC 上游端点。
///
/// 生命周期：启动时由配置构造；`healthy` 仅由健康轮询器改写。
#[derive(Debug)]
pub struct RpcEndpoint {
    pub name: String,
    pub network: String,
    pub url: String,
    healthy: AtomicBool,
}

impl RpcEndpoint {
    fn new(name: String, network: String, url: String) -> Self {
        Self {
            name,
            network,
            url,
            healthy: AtomicBool::new(false),
        }
    }

    /// 当前健康状态（轮询器视角，可能滞后一个探测周期）。
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }
}

struct NetworkSlot {
    endpoints: Vec<Arc<RpcEndpoint>>,
    counter: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    #[serde(default)]
    #[allow(dead_code)]
    code: i64,
    message: String,
}

/// 健康门控的 JSON-RPC 端点池。
///
/// # 教案式说明
/// - **契约 (What)**：
///   - [`EndpointPool::select`]：未配置网络 → `NetworkUnknown`（404）；
///     无健康端点 → `NoHealthyBackend`（503）；否则在健康者中按网络计数器
///     轮转；
///   - [`EndpointPool::call`]：传输失败 → 502；HTTP 非 2xx → 502；响应体
///     解码失败 → 502；JSON-RPC `error` 字段 → 400 携带其 message；成功时
///     解包 `result`；
///   - [`EndpointPool::start`] 先同步跑完首轮探测再挂起后台轮询。
pub struct EndpointPool {
    networks: HashMap<String, NetworkSlot>,
    endpoints: Vec<Arc<RpcEndpoint>>,
    client: reqwest::Client,
    health_interval: Duration,
    shutdown: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl EndpointPool {
    /// 由配置构造端点池（不触发任何 IO）。
    pub fn new(config: &GasProfilerConfig) -> Result<Arc<Self>, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| GatewayError::UpstreamTransport {
                network: String::new(),
                detail: format!("rpc client construction failed: {err}"),
            })?;

        let mut endpoints = Vec::with_capacity(config.endpoints.len());
        let mut networks: HashMap<String, NetworkSlot> = HashMap::new();
        for endpoint_config in &config.endpoints {
            let endpoint = Arc::new(RpcEndpoint::new(
                endpoint_config.name.clone(),
                endpoint_config.network.clone(),
                endpoint_config.url.clone(),
            ));
            endpoints.push(Arc::clone(&endpoint));
            networks
                .entry(endpoint_config.network.clone())
                .or_insert_with(|| NetworkSlot {
                    endpoints: Vec::new(),
                    counter: AtomicU64::new(0),
                })
                .endpoints
                .push(endpoint);
        }

        Ok(Arc::new(Self {
            networks,
            endpoints,
            client,
            health_interval: config.effective_health_interval(),
            shutdown: CancellationToken::new(),
            handle: Mutex::new(None),
        }))
    }

    /// 首轮同步探测 + 启动后台健康轮询；重复调用为空操作。
    pub async fn start(self: &Arc<Self>) {
        {
            let guard = self.handle.lock();
            if guard.is_some() {
                return;
            }
        }

        // 首轮同步完成，保证返回时每个端点都有已知状态。
        self.poll_once().await;

        let pool = Arc::clone(self);
        let mut guard = self.handle.lock();
        if guard.is_none() {
            *guard = Some(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = pool.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(pool.health_interval) => {}
                    }
                    pool.poll_once().await;
                }
            }));
        }
    }

    /// 停止健康轮询并等待退出。
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// 是否配置了某网络的端点。
    pub fn is_configured(&self, network: &str) -> bool {
        self.networks.contains_key(network)
    }

    /// 端点健康快照：`(name, network, healthy)`，观测导出用。
    pub fn health_snapshot(&self) -> Vec<(String, String, bool)> {
        self.endpoints
            .iter()
            .map(|endpoint| {
                (
                    endpoint.name.clone(),
                    endpoint.network.clone(),
                    endpoint.is_healthy(),
                )
            })
            .collect()
    }

    /// 对全部端点执行一轮健康探测。
    pub async fn poll_once(&self) {
        let checks = self.endpoints.iter().map(|endpoint| {
            let client = self.client.clone();
            let endpoint = Arc::clone(endpoint);
            async move {
                let healthy = probe_endpoint(&client, &endpoint.url).await;
                let was = endpoint.healthy.swap(healthy, Ordering::AcqRel);
                if was != healthy {
                    info!(
                        target: "lab::proxy::rpc",
                        endpoint = %endpoint.name,
                        network = %endpoint.network,
                        healthy,
                        "rpc endpoint health changed"
                    );
                }
            }
        });
        futures::future::join_all(checks).await;
    }

    /// 在健康端点间轮转选择。
    pub fn select(&self, network: &str) -> Result<Arc<RpcEndpoint>, GatewayError> {
        let Some(slot) = self.networks.get(network) else {
            return Err(GatewayError::NetworkUnknown {
                network: network.to_owned(),
            });
        };

        let healthy: Vec<&Arc<RpcEndpoint>> = slot
            .endpoints
            .iter()
            .filter(|endpoint| endpoint.is_healthy())
            .collect();
        if healthy.is_empty() {
            return Err(GatewayError::NoHealthyBackend {
                network: network.to_owned(),
            });
        }

        let index = slot.counter.fetch_add(1, Ordering::Relaxed) as usize % healthy.len();
        Ok(Arc::clone(healthy[index]))
    }

    /// 发起一次 JSON-RPC 调用并解包 `result`。
    pub async fn call(
        &self,
        network: &str,
        method: &str,
        params: Value,
    ) -> Result<Value, GatewayError> {
        let endpoint = self.select(network)?;
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        debug!(
            target: "lab::proxy::rpc",
            network,
            method,
            endpoint = %endpoint.name,
            "dispatching json-rpc call"
        );

        let response = self
            .client
            .post(&endpoint.url)
            .json(&request)
            .send()
            .await
            .map_err(|err| {
                warn!(
                    target: "lab::proxy::rpc",
                    endpoint = %endpoint.name,
                    error = %err,
                    "rpc transport failure"
                );
                GatewayError::UpstreamTransport {
                    network: network.to_owned(),
                    detail: err.to_string(),
                }
            })?;

        if !response.status().is_success() {
            return Err(GatewayError::UpstreamBadStatus {
                status: response.status().as_u16(),
                context: format!("rpc call via `{}`", endpoint.name),
            });
        }

        let envelope: RpcEnvelope =
            response
                .json()
                .await
                .map_err(|err| GatewayError::UpstreamDecode {
                    context: format!("rpc response from `{}`", endpoint.name),
                    detail: err.to_string(),
                })?;

        if let Some(rpc_error) = envelope.error {
            return Err(GatewayError::RpcError {
                message: rpc_error.message,
            });
        }

        Ok(envelope.result.unwrap_or(Value::Null))
    }
}

/// 探测单个端点：`eth_syncing` 的 `result` 必须是字面量 `false`。
async fn probe_endpoint(client: &reqwest::Client, url: &str) -> bool {
    let request = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "eth_syncing",
        "params": [],
    });

    let response = match client
        .post(url)
        .timeout(PROBE_TIMEOUT)
        .json(&request)
        .send()
        .await
    {
        Ok(response) => response,
        Err(_) => return false,
    };
    if response.status().as_u16() != 200 {
        return false;
    }
    match response.json::<RpcEnvelope>().await {
        Ok(envelope) => matches!(envelope.result, Some(Value::Bool(false))),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lab_core::config::RpcEndpointConfig;

    fn pool_with(endpoints: Vec<RpcEndpointConfig>) -> Arc<EndpointPool> {
        EndpointPool::new(&GasProfilerConfig {
            endpoints,
            request_timeout: Duration::from_secs(1),
            health_interval: Duration::from_secs(30),
        })
        .expect("construct pool")
    }

    fn endpoint(name: &str, network: &str) -> RpcEndpointConfig {
        RpcEndpointConfig {
            name: name.to_owned(),
            network: network.to_owned(),
            url: format!("http://127.0.0.1:9/{name}"),
        }
    }

    #[tokio::test]
    async fn unconfigured_network_is_unknown() {
        let pool = pool_with(vec![endpoint("a", "mainnet")]);
        assert!(matches!(
            pool.select("atlantis"),
            Err(GatewayError::NetworkUnknown { .. })
        ));
    }

    #[tokio::test]
    async fn all_unhealthy_yields_no_healthy_backend() {
        let pool = pool_with(vec![endpoint("a", "mainnet"), endpoint("b", "mainnet")]);
        assert!(matches!(
            pool.select("mainnet"),
            Err(GatewayError::NoHealthyBackend { .. })
        ));
    }

    #[tokio::test]
    async fn round_robin_cycles_across_healthy_endpoints() {
        let pool = pool_with(vec![
            endpoint("a", "mainnet"),
            endpoint("b", "mainnet"),
            endpoint("c", "mainnet"),
        ]);
        for ep in &pool.endpoints {
            ep.healthy.store(true, Ordering::Release);
        }
        // 摘除 b：轮转只应在 a/c 间进行。
        pool.endpoints[1].healthy.store(false, Ordering::Release);

        let picks: Vec<String> = (0..4)
            .map(|_| pool.select("mainnet").expect("healthy endpoint").name.clone())
            .collect();
        assert_eq!(picks, vec!["a", "c", "a", "c"]);
    }
}
