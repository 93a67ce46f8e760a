//! # bounds 模块说明
//!
//! ## 角色定位（Why）
//! - 每个网络的 CBT 后端按表汇报增量摄取记录；网关把它们折叠为
//!   “表 → {min,max}” 的边界快照发布到 `lab:bounds:{network}`，供前端与
//!   所有副本在不触达后端的情况下应答；
//! - 部分部署会对少数表提供本地覆盖源（例如回填集群），对列出的表以本地
//!   结果替换外部结果。
//!
//! ## 刷新周期（How）
//! 1. 取合并后的网络清单（上游目录 ⊎ 本地覆盖，禁用项已剔除）；
//! 2. 每网络一个任务并发抓取，经有界通道汇合；
//! 3. 单网络内分页拉取 `admin_cbt_incremental`，跟随 `next_page_token`
//!    直到为空；
//! 4. 有本地覆盖的网络再拉一次覆盖源并按表合并；
//! 5. 折叠 `min = min(position)`、`max = max(position + interval)`，逐网络
//!    序列化写入。
//!
//! ## 失败语义（What）
//! - 单网络失败记账并跳过，绝不中断整个周期；
//! - 空输入折叠为“存在但为空”的表映射，而非错误。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use lab_core::bounds::{BoundsData, TableBounds};
use lab_core::config::{BoundsConfig, LocalOverrides, NetworkOverride};
use lab_core::notify::Notifier;
use lab_store::{KeyValueStore, LeaderElector};

use crate::error::SnapshotError;
use crate::metrics::SnapshotMetrics;
use crate::readiness::{READY_POLL, READY_TIMEOUT, wait_until};
use crate::topology::TopologyProvider;

/// 边界快照键前缀。
pub const BOUNDS_KEY_PREFIX: &str = "lab:bounds:";

/// 指定网络的边界快照键。
pub fn bounds_key(network: &str) -> String {
    format!("{BOUNDS_KEY_PREFIX}{network}")
}

/// CBT 后端的单条增量摄取记录。
///
/// 同一张表允许出现多行；折叠时取 `min(position)` 与
/// `max(position + interval)`。
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct IncrementalRecord {
    #[serde(default)]
    pub database: String,
    pub table: String,
    pub position: i64,
    pub interval: i64,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// 将记录集折叠为表边界。
///
/// # 教案式说明
/// - **契约 (What)**：对输入中出现的每张表 `t`，输出满足
///   `min = min{r.position}`、`max = max{r.position + r.interval}`；空输入
///   产出空映射（而非错误）；
/// - **不变量**：表存在记录时恒有 `min ≤ max`（由 `interval ≥ 0` 的源契约
///   保证；负 interval 的脏数据也只会收窄 max，不会使折叠崩溃）。
pub fn calculate_bounds(records: &[IncrementalRecord]) -> BTreeMap<String, TableBounds> {
    let mut tables: BTreeMap<String, TableBounds> = BTreeMap::new();
    for record in records {
        let upper = record.position.saturating_add(record.interval);
        tables
            .entry(record.table.clone())
            .and_modify(|bounds| {
                bounds.min = bounds.min.min(record.position);
                bounds.max = bounds.max.max(upper);
            })
            .or_insert(TableBounds {
                min: record.position,
                max: upper,
            });
    }
    tables
}

/// 按本地覆盖规则合并外部与本地折叠结果。
///
/// - **契约 (What)**：以外部结果为基底；`tables` 中列出的表，若本地结果
///   含有该表则整体替换 `{min,max}`；列出但本地缺失的表保留外部值。
pub fn merge_table_bounds(
    external: BTreeMap<String, TableBounds>,
    local: BTreeMap<String, TableBounds>,
    tables: &[String],
) -> BTreeMap<String, TableBounds> {
    let mut merged = external;
    for table in tables {
        if let Some(bounds) = local.get(table) {
            merged.insert(table.clone(), *bounds);
        }
    }
    merged
}

#[derive(Debug, Deserialize)]
struct IncrementalPage {
    #[serde(default)]
    records: Vec<IncrementalRecord>,
    #[serde(default)]
    next_page_token: String,
}

/// 数据边界快照提供者。
///
/// # 教案式说明
/// - **契约 (What)**：
///   - 读取（[`BoundsProvider::bounds`]、[`BoundsProvider::all_bounds`]）
///     在任何副本可用，未命中返回 `None`/缺项；
///   - 刷新循环仅在持锁副本上抓取；周期串行，publish 完成前不开启下一轮；
///   - [`BoundsProvider::subscribe`] 的通知与拓扑通知相互独立，消费者不得
///     假设到达顺序；
/// - **风险 (Trade-offs)**：`all_bounds` 先 SCAN 再逐键 GET，两步之间的键
///   增删会反映为快照间的轻微不一致；消费者把每次读取视为独立快照即可。
pub struct BoundsProvider {
    store: Arc<dyn KeyValueStore>,
    elector: Arc<LeaderElector>,
    topology: Arc<TopologyProvider>,
    config: BoundsConfig,
    overrides: Vec<NetworkOverride>,
    client: reqwest::Client,
    notifier: Notifier,
    metrics: SnapshotMetrics,
    shutdown: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl BoundsProvider {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        elector: Arc<LeaderElector>,
        topology: Arc<TopologyProvider>,
        config: BoundsConfig,
        overrides: Vec<NetworkOverride>,
        metrics: SnapshotMetrics,
    ) -> Result<Arc<Self>, SnapshotError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| SnapshotError::Fetch {
                context: "bounds client construction".to_owned(),
                detail: err.to_string(),
            })?;
        Ok(Arc::new(Self {
            store,
            elector,
            topology,
            config,
            overrides,
            client,
            notifier: Notifier::new(),
            metrics,
            shutdown: CancellationToken::new(),
            handle: Mutex::new(None),
        }))
    }

    /// 订阅“边界已更新”通知。
    pub fn subscribe(&self) -> mpsc::Receiver<()> {
        self.notifier.subscribe()
    }

    /// 读取单网络边界；未发布返回 `None`。
    pub async fn bounds(&self, network: &str) -> Result<Option<BoundsData>, SnapshotError> {
        match self.store.get(&bounds_key(network)).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|err| SnapshotError::decode("bounds snapshot", &err)),
            None => Ok(None),
        }
    }

    /// 枚举全部已发布网络的边界。
    pub async fn all_bounds(&self) -> Result<BTreeMap<String, BoundsData>, SnapshotError> {
        let keys = self.store.keys_with_prefix(BOUNDS_KEY_PREFIX).await?;
        let mut all = BTreeMap::new();
        for key in keys {
            let network = key
                .strip_prefix(BOUNDS_KEY_PREFIX)
                .unwrap_or(key.as_str())
                .to_owned();
            if let Some(raw) = self.store.get(&key).await? {
                let data: BoundsData = serde_json::from_str(&raw)
                    .map_err(|err| SnapshotError::decode("bounds snapshot", &err))?;
                all.insert(network, data);
            }
        }
        Ok(all)
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

    /// 默认节奏（30s / 500ms）的就绪门：等待任意一个网络的边界发布。
    pub async fn wait_ready(&self) -> Result<(), SnapshotError> {
        self.wait_ready_with(READY_TIMEOUT, READY_POLL).await
    }

    /// 自定义节奏的就绪门（测试用）。
    pub async fn wait_ready_with(
        &self,
        timeout: Duration,
        poll: Duration,
    ) -> Result<(), SnapshotError> {
        wait_until("bounds snapshot", timeout, poll, || async {
            matches!(
                self.store.keys_with_prefix(BOUNDS_KEY_PREFIX).await,
                Ok(keys) if !keys.is_empty()
            )
        })
        .await
    }

    async fn run(self: Arc<Self>) {
        let interval = self.config.effective_refresh_interval();
        loop {
            if self.elector.is_leader() {
                match self.refresh_once().await {
                    Ok(count) => {
                        self.metrics.refresh_ok("bounds");
                        debug!(
                            target: "lab::snapshot::bounds",
                            networks = count,
                            "bounds snapshot refreshed"
                        );
                    }
                    Err(err) => {
                        self.metrics.refresh_error("bounds");
                        warn!(
                            target: "lab::snapshot::bounds",
                            error = %err,
                            "bounds refresh failed; will retry next tick"
                        );
                    }
                }
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    /// 执行一次完整的抓取-合并-折叠-发布周期，返回成功发布的网络数。
    pub async fn refresh_once(&self) -> Result<usize, SnapshotError> {
        let networks = self.topology.merged_networks().await?;
        if networks.is_empty() {
            return Ok(0);
        }

        let (tx, mut rx) =
            mpsc::channel::<(String, Result<BTreeMap<String, TableBounds>, SnapshotError>)>(
                networks.len(),
            );
        for (name, network) in networks {
            let client = self.client.clone();
            let page_size = self.config.page_size;
            let local = self
                .overrides
                .iter()
                .find(|overlay| overlay.name == name)
                .and_then(|overlay| overlay.local_overrides.clone());
            let tx = tx.clone();
            tokio::spawn(async move {
                let tables =
                    fetch_network_tables(&client, &name, &network.target_url, page_size, local)
                        .await;
                let _ = tx.send((name, tables)).await;
            });
        }
        drop(tx);

        let mut published = 0;
        while let Some((name, outcome)) = rx.recv().await {
            match outcome {
                Ok(tables) => {
                    let data = BoundsData::new(tables, unix_now());
                    let serialized = serde_json::to_string(&data)
                        .map_err(|err| SnapshotError::decode("bounds serialization", &err))?;
                    self.store
                        .set(&bounds_key(&name), &serialized, self.config.ttl)
                        .await?;
                    published += 1;
                }
                Err(err) => {
                    self.metrics.network_error(&name);
                    warn!(
                        target: "lab::snapshot::bounds",
                        network = %name,
                        error = %err,
                        "bounds fetch failed for network; cycle continues"
                    );
                }
            }
        }

        self.notifier.notify();
        Ok(published)
    }
}

/// 抓取并折叠单个网络的表边界，应用本地覆盖合并规则。
async fn fetch_network_tables(
    client: &reqwest::Client,
    network: &str,
    target_url: &str,
    page_size: u64,
    local: Option<LocalOverrides>,
) -> Result<BTreeMap<String, TableBounds>, SnapshotError> {
    let external = fetch_all_records(client, network, target_url, page_size).await;

    let Some(local_config) = local else {
        return external.map(|records| calculate_bounds(&records));
    };

    let local_records =
        fetch_all_records(client, network, &local_config.target_url, page_size).await;

    match (external, local_records) {
        (Ok(ext), Ok(loc)) => Ok(merge_table_bounds(
            calculate_bounds(&ext),
            calculate_bounds(&loc),
            &local_config.tables,
        )),
        (Ok(ext), Err(err)) => {
            warn!(
                target: "lab::snapshot::bounds",
                network,
                error = %err,
                "local override fetch failed; using external bounds only"
            );
            Ok(calculate_bounds(&ext))
        }
        (Err(err), Ok(loc)) => {
            warn!(
                target: "lab::snapshot::bounds",
                network,
                error = %err,
                "external fetch failed; using local override bounds only"
            );
            Ok(calculate_bounds(&loc))
        }
        (Err(external_err), Err(local_err)) => {
            warn!(
                target: "lab::snapshot::bounds",
                network,
                local_error = %local_err,
                "both external and local bounds fetches failed"
            );
            Err(external_err)
        }
    }
}

/// 分页拉取 `admin_cbt_incremental`，跟随 `next_page_token` 直到为空。
async fn fetch_all_records(
    client: &reqwest::Client,
    network: &str,
    target_url: &str,
    page_size: u64,
) -> Result<Vec<IncrementalRecord>, SnapshotError> {
    let base = target_url.trim_end_matches('/');
    let mut records = Vec::new();
    let mut page_token = String::new();

    loop {
        let mut url = format!(
            "{base}/admin_cbt_incremental?database_eq={network}&page_size={page_size}"
        );
        if !page_token.is_empty() {
            url.push_str("&page_token=");
            url.push_str(&page_token);
        }

        let response = client
            .get(&url)
            .send()
            .await
            .map_err(|err| SnapshotError::fetch(format!("bounds fetch for {network}"), &err))?;
        if !response.status().is_success() {
            return Err(SnapshotError::Fetch {
                context: format!("bounds fetch for {network}"),
                detail: format!("backend returned status {}", response.status()),
            });
        }
        let page: IncrementalPage = response
            .json()
            .await
            .map_err(|err| SnapshotError::fetch(format!("bounds decode for {network}"), &err))?;

        records.extend(page.records);
        if page.next_page_token.is_empty() {
            return Ok(records);
        }
        page_token = page.next_page_token;
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
    use proptest::prelude::*;

    fn record(table: &str, position: i64, interval: i64) -> IncrementalRecord {
        IncrementalRecord {
            database: "mainnet".to_owned(),
            table: table.to_owned(),
            position,
            interval,
            updated_at: None,
        }
    }

    #[test]
    fn folds_min_position_and_max_position_plus_interval() {
        let records = vec![record("x", 50, 5), record("x", 100, 10), record("y", 200, 20)];
        let tables = calculate_bounds(&records);
        assert_eq!(tables["x"], TableBounds { min: 50, max: 110 });
        assert_eq!(tables["y"], TableBounds { min: 200, max: 220 });
        assert_eq!(tables.len(), 2);
    }

    #[test]
    fn empty_input_folds_to_empty_map() {
        assert!(calculate_bounds(&[]).is_empty());
    }

    #[test]
    fn listed_table_takes_local_bounds_when_present() {
        let external = calculate_bounds(&[record("a", 0, 100), record("b", 0, 100)]);
        let local = calculate_bounds(&[record("a", 500, 50)]);
        let merged = merge_table_bounds(external, local, &["a".to_owned(), "c".to_owned()]);

        assert_eq!(merged["a"], TableBounds { min: 500, max: 550 });
        assert_eq!(merged["b"], TableBounds { min: 0, max: 100 });
        assert!(!merged.contains_key("c"), "listed-but-missing table stays external");
    }

    #[test]
    fn unlisted_tables_keep_external_bounds() {
        let external = calculate_bounds(&[record("a", 0, 10)]);
        let local = calculate_bounds(&[record("a", 999, 1)]);
        let merged = merge_table_bounds(external, local, &[]);
        assert_eq!(merged["a"], TableBounds { min: 0, max: 10 });
    }

    proptest! {
        /// 对任意记录集，折叠结果必须与逐表暴力扫描一致，且空表不出现。
        #[test]
        fn fold_matches_bruteforce(
            records in proptest::collection::vec(
                ("[a-d]", -1_000_000i64..1_000_000, 0i64..100_000),
                0..64,
            )
        ) {
            let records: Vec<IncrementalRecord> = records
                .into_iter()
                .map(|(table, position, interval)| record(&table, position, interval))
                .collect();
            let tables = calculate_bounds(&records);

            for (name, bounds) in &tables {
                let expected_min = records
                    .iter()
                    .filter(|r| &r.table == name)
                    .map(|r| r.position)
                    .min()
                    .expect("table present implies at least one record");
                let expected_max = records
                    .iter()
                    .filter(|r| &r.table == name)
                    .map(|r| r.position + r.interval)
                    .max()
                    .expect("table present implies at least one record");
                prop_assert_eq!(bounds.min, expected_min);
                prop_assert_eq!(bounds.max, expected_max);
                prop_assert!(bounds.min <= bounds.max);
            }

            for record in &records {
                prop_assert!(tables.contains_key(&record.table));
            }
        }
    }
}
