//! # topology 模块说明
//!
//! ## 角色定位（Why）
//! - 网络目录是网关一切寻址决策的来源：反向代理的后端地址、钟摆注册、
//!   前端配置快照都由它驱动；
//! - 领导者副本周期性抓取上游目录、过滤不健康后端并发布到共享 KV；其余
//!   副本只读。读取端每次调用重新反序列化，保证“任何副本、任何时刻”都
//!   能应答而无需触达上游。
//!
//! ## 刷新周期（How）
//! 1. `GET source_url` 取回目录 JSON；
//! 2. 仅保留 `status == active` 的记录；
//! 3. 对每个候选并发探测 `{scheme://host}/health`（5s 超时，每网络一个
//!    任务，经有界通道汇合）；非 200 连同原因记录后剔除；
//! 4. 兜底展示名后整体序列化，按配置 TTL 写入 `lab:config:networks`；
//! 5. try-send 一次合并式通知。
//!
//! ## 失败语义（What）
//! - 上游抓取失败：记录后返回，下个周期重试；已发布的旧快照保持可读；
//! - 非领导者读到空键：返回空映射，绝不是错误；
//! - `wait_ready` 在 30s 内每 500ms 轮询一次非空发布，超时 fail-fast。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use lab_core::config::{NetworkOverride, TopologyConfig};
use lab_core::network::{Network, merge_networks};
use lab_core::notify::Notifier;
use lab_store::{KeyValueStore, LeaderElector};

use crate::error::SnapshotError;
use crate::metrics::SnapshotMetrics;
use crate::readiness::{READY_POLL, READY_TIMEOUT, wait_until};

/// 目录快照在共享 KV 中的键。
pub const TOPOLOGY_KEY: &str = "lab:config:networks";

/// 健康探测超时。
const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// 网络目录快照提供者。
///
/// # 教案式说明
/// - **契约 (What)**：
///   - 读取方法（[`TopologyProvider::networks`] 等）在任何副本上可用，
///     未发布时返回空映射；
///   - [`TopologyProvider::start`] 启动刷新循环；循环内串行执行周期，
///     下一周期在当前发布完成前不会开始；
///   - [`TopologyProvider::subscribe`] 返回合并式通知接收端；
/// - **所有权 (Trade-offs)**：提供者独占快照的发布权（经选举门），读者
///   拿到的是反序列化得到的独立副本，内部状态从不外借。
pub struct TopologyProvider {
    store: Arc<dyn KeyValueStore>,
    elector: Arc<LeaderElector>,
    config: TopologyConfig,
    overrides: Vec<NetworkOverride>,
    client: reqwest::Client,
    notifier: Notifier,
    metrics: SnapshotMetrics,
    shutdown: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TopologyProvider {
    /// 构造提供者；`overrides` 用于合并视图（[`TopologyProvider::merged_networks`]）。
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        elector: Arc<LeaderElector>,
        config: TopologyConfig,
        overrides: Vec<NetworkOverride>,
        metrics: SnapshotMetrics,
    ) -> Result<Arc<Self>, SnapshotError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| SnapshotError::Fetch {
                context: "topology client construction".to_owned(),
                detail: err.to_string(),
            })?;
        Ok(Arc::new(Self {
            store,
            elector,
            config,
            overrides,
            client,
            notifier: Notifier::new(),
            metrics,
            shutdown: CancellationToken::new(),
            handle: Mutex::new(None),
        }))
    }

    /// 订阅“目录已更新”通知。
    pub fn subscribe(&self) -> mpsc::Receiver<()> {
        self.notifier.subscribe()
    }

    /// 读取已发布的目录快照；未发布返回空映射。
    pub async fn networks(&self) -> Result<BTreeMap<String, Network>, SnapshotError> {
        match self.store.get(TOPOLOGY_KEY).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|err| SnapshotError::decode("topology snapshot", &err)),
            None => Ok(BTreeMap::new()),
        }
    }

    /// 仅返回可发布（active）的网络。
    pub async fn active_networks(&self) -> Result<BTreeMap<String, Network>, SnapshotError> {
        let mut networks = self.networks().await?;
        networks.retain(|_, network| network.is_active());
        Ok(networks)
    }

    /// 按名读取单个网络。
    pub async fn network(&self, name: &str) -> Result<Option<Network>, SnapshotError> {
        Ok(self.networks().await?.remove(name))
    }

    /// 上游目录与本地覆盖的合并视图（`enabled=false` 已剔除）。
    pub async fn merged_networks(&self) -> Result<BTreeMap<String, Network>, SnapshotError> {
        let upstream = self.networks().await?;
        Ok(merge_networks(&upstream, &self.overrides))
    }

    /// 启动领导者刷新循环；重复调用为空操作。
    pub fn start(self: &Arc<Self>) {
        let mut guard = self.handle.lock();
        if guard.is_some() {
            return;
        }
        let provider = Arc::clone(self);
        *guard = Some(tokio::spawn(async move {
            provider.run().await;
        }));
    }

    /// 停止刷新循环并等待退出。
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// 默认节奏（30s / 500ms）的就绪门。
    pub async fn wait_ready(&self) -> Result<(), SnapshotError> {
        self.wait_ready_with(READY_TIMEOUT, READY_POLL).await
    }

    /// 自定义节奏的就绪门（测试用）。
    pub async fn wait_ready_with(
        &self,
        timeout: Duration,
        poll: Duration,
    ) -> Result<(), SnapshotError> {
        wait_until("topology snapshot", timeout, poll, || async {
            matches!(self.networks().await, Ok(networks) if !networks.is_empty())
        })
        .await
    }

    async fn run(self: Arc<Self>) {
        loop {
            self.metrics.set_leader(self.elector.is_leader());
            if self.elector.is_leader() {
                match self.refresh_once().await {
                    Ok(published) => {
                        self.metrics.refresh_ok("topology");
                        debug!(
                            target: "lab::snapshot::topology",
                            published,
                            "topology snapshot refreshed"
                        );
                    }
                    Err(err) => {
                        self.metrics.refresh_error("topology");
                        warn!(
                            target: "lab::snapshot::topology",
                            error = %err,
                            "topology refresh failed; will retry next tick"
                        );
                    }
                }
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.refresh_interval) => {}
            }
        }
    }

    /// 执行一次完整的抓取-过滤-探测-发布周期。
    pub async fn refresh_once(&self) -> Result<usize, SnapshotError> {
        let fetched = self.fetch_catalog().await?;
        let candidates: Vec<Network> = fetched
            .into_iter()
            .map(|(name, mut network)| {
                if network.name.is_empty() {
                    network.name = name;
                }
                network
            })
            .filter(Network::is_active)
            .collect();

        let survivors = self.probe_candidates(candidates).await;
        let serialized = serde_json::to_string(&survivors)
            .map_err(|err| SnapshotError::decode("topology snapshot serialization", &err))?;
        self.store
            .set(TOPOLOGY_KEY, &serialized, self.config.ttl)
            .await?;
        self.notifier.notify();
        Ok(survivors.len())
    }

    async fn fetch_catalog(&self) -> Result<BTreeMap<String, Network>, SnapshotError> {
        let response = self
            .client
            .get(&self.config.source_url)
            .send()
            .await
            .map_err(|err| SnapshotError::fetch("topology fetch", &err))?;
        if !response.status().is_success() {
            return Err(SnapshotError::Fetch {
                context: "topology fetch".to_owned(),
                detail: format!("source returned status {}", response.status()),
            });
        }
        response
            .json::<BTreeMap<String, Network>>()
            .await
            .map_err(|err| SnapshotError::fetch("topology decode", &err))
    }

    /// 并发探测候选网络的后端健康；每网络一个任务，经有界通道汇合。
    async fn probe_candidates(&self, candidates: Vec<Network>) -> BTreeMap<String, Network> {
        if candidates.is_empty() {
            return BTreeMap::new();
        }

        let (tx, mut rx) = mpsc::channel::<(Network, Result<(), String>)>(candidates.len());
        for mut network in candidates {
            network.display_name = network.display_name_or_fallback();
            let client = self.client.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let verdict = probe_health(&client, &network.target_url).await;
                let _ = tx.send((network, verdict)).await;
            });
        }
        drop(tx);

        let mut survivors = BTreeMap::new();
        while let Some((network, verdict)) = rx.recv().await {
            match verdict {
                Ok(()) => {
                    survivors.insert(network.name.clone(), network);
                }
                Err(reason) => {
                    info!(
                        target: "lab::snapshot::topology",
                        network = %network.name,
                        reason = %reason,
                        "dropping network with unhealthy backend"
                    );
                }
            }
        }
        survivors
    }
}

/// 探测 `{scheme://host}/health`；200 视为健康，其余携原因淘汰。
async fn probe_health(client: &reqwest::Client, target_url: &str) -> Result<(), String> {
    let url = health_url(target_url)?;
    match client
        .get(url)
        .timeout(HEALTH_PROBE_TIMEOUT)
        .send()
        .await
    {
        Ok(response) if response.status().as_u16() == 200 => Ok(()),
        Ok(response) => Err(format!("health endpoint returned {}", response.status())),
        Err(err) => Err(err.to_string()),
    }
}

fn health_url(target_url: &str) -> Result<Url, String> {
    let mut url =
        Url::parse(target_url).map_err(|err| format!("invalid target url `{target_url}`: {err}"))?;
    url.set_path("/health");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}
