//! # network 模块说明
//!
//! ## 角色定位（Why）
//! - 定义网络目录（topology）快照的线上形状：上游目录服务发布的每个区块链
//!   网络记录，以及网关本地覆盖（overlay）与上游记录的合并规则；
//! - 该形状同时是 KV 键 `lab:config:networks` 的序列化格式与
//!   `/api/v1/config` 响应的数据源，字段名即对外契约。
//!
//! ## 行为契约（What）
//! - 只有 `status == active` 的记录可被发布；
//! - 本地覆盖中 `enabled: false` 的网络从发布集中剔除；
//! - 本地显式设置的字段覆盖上游同名字段；本地新增、上游不存在的名字被加入。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::NetworkOverride;

/// 网络记录的发布状态。
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NetworkStatus {
    /// 正常服务中，可发布。
    #[default]
    Active,
    /// 已下线或维护中，刷新时被过滤。
    Inactive,
}

/// 共识层分叉记录：以 epoch 定位，部分网络附带预估时间戳与客户端最低版本。
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ConsensusFork {
    pub epoch: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_client_versions: Option<BTreeMap<String, String>>,
}

/// 执行层分叉记录：以区块号定位。
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ExecutionFork {
    pub block: u64,
    pub timestamp: u64,
}

/// 分叉总表，按共识/执行两层分组。
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Forks {
    #[serde(default)]
    pub consensus: BTreeMap<String, ConsensusFork>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<BTreeMap<String, ExecutionFork>>,
}

/// Blob 调度表条目，按激活 epoch 有序排列。
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct BlobScheduleEntry {
    pub epoch: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    pub max_blobs_per_block: u64,
}

/// 单个区块链网络的目录记录。
///
/// # 教案式说明
/// - **意图 (Why)**：网关的每一条数据面决策（反向代理目标、槽位换算、边界
///   抓取）都从这条记录出发，集中建模避免各组件各自携带零散字段；
/// - **契约 (What)**：
///   - `name` 同时是目录映射的键与 URL 路径段，必须保持短名（`mainnet`、
///     `sepolia`…）；
///   - `target_url` 是 CBT 后端基地址，反向代理与边界抓取共用；
///   - 仅 `status == active` 的记录会进入发布集；
/// - **风险 (Trade-offs)**：记录为纯数据对象，读者在快照反序列化时天然获得
///   独立副本，不存在共享可变状态。
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Network {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub chain_id: i64,
    #[serde(default)]
    pub genesis_time: u64,
    #[serde(default)]
    pub genesis_delay: u64,
    #[serde(default)]
    pub forks: Forks,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob_schedule: Option<Vec<BlobScheduleEntry>>,
    #[serde(default)]
    pub service_urls: BTreeMap<String, String>,
    #[serde(default)]
    pub target_url: String,
    #[serde(default)]
    pub status: NetworkStatus,
    #[serde(default)]
    pub last_seen: u64,
}

impl Network {
    /// 展示名兜底：上游缺失元数据时取短名首字节大写。
    pub fn display_name_or_fallback(&self) -> String {
        if !self.display_name.is_empty() {
            return self.display_name.clone();
        }
        capitalize_first(&self.name)
    }

    /// 是否可发布。
    pub fn is_active(&self) -> bool {
        self.status == NetworkStatus::Active
    }
}

/// 将首字节大写，其余原样保留。
///
/// 目录服务偶尔缺失 `display_name`，兜底规则刻意保持朴素：只处理 ASCII 首
/// 字节，不做完整的 Unicode 标题化。
fn capitalize_first(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

/// 将上游目录与本地覆盖合并为发布集。
///
/// # 教案式说明
/// - **意图 (Why)**：部署方需要在不改动上游目录的前提下增删网络、替换字段，
///   合并规则是网关多租户语义的根基；
/// - **契约 (What)**：
///   - 本地显式设置的字段替换上游同名字段；
///   - 本地列出、上游不存在的名字被添加（字段取覆盖值，缺省补默认）；
///   - `enabled: false` 将该名字从结果中剔除；
///   - 输入映射不被修改，返回值是独立副本；
/// - **执行逻辑 (How)**：先复制上游记录，再按覆盖列表逐条应用；结果按名字
///   有序（`BTreeMap`），保证下游序列化稳定。
pub fn merge_networks(
    upstream: &BTreeMap<String, Network>,
    overrides: &[NetworkOverride],
) -> BTreeMap<String, Network> {
    let mut merged = upstream.clone();

    for overlay in overrides {
        if !overlay.enabled {
            merged.remove(&overlay.name);
            continue;
        }

        let entry = merged.entry(overlay.name.clone()).or_insert_with(|| Network {
            name: overlay.name.clone(),
            display_name: String::new(),
            chain_id: 0,
            genesis_time: 0,
            genesis_delay: 0,
            forks: Forks::default(),
            blob_schedule: None,
            service_urls: BTreeMap::new(),
            target_url: String::new(),
            status: NetworkStatus::Active,
            last_seen: 0,
        });

        if let Some(display_name) = &overlay.display_name {
            entry.display_name = display_name.clone();
        }
        if let Some(chain_id) = overlay.chain_id {
            entry.chain_id = chain_id;
        }
        if let Some(genesis_time) = overlay.genesis_time {
            entry.genesis_time = genesis_time;
        }
        if let Some(target_url) = &overlay.target_url {
            entry.target_url = target_url.clone();
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upstream_network(name: &str, target: &str) -> Network {
        Network {
            name: name.to_owned(),
            display_name: String::new(),
            chain_id: 1,
            genesis_time: 1_606_824_023,
            genesis_delay: 604_800,
            forks: Forks::default(),
            blob_schedule: None,
            service_urls: BTreeMap::new(),
            target_url: target.to_owned(),
            status: NetworkStatus::Active,
            last_seen: 0,
        }
    }

    #[test]
    fn overlay_fields_replace_upstream_ones() {
        let mut upstream = BTreeMap::new();
        upstream.insert(
            "mainnet".to_owned(),
            upstream_network("mainnet", "http://cbt-mainnet:8080"),
        );
        let overrides = vec![NetworkOverride {
            name: "mainnet".to_owned(),
            enabled: true,
            display_name: Some("Mainnet (patched)".to_owned()),
            chain_id: None,
            genesis_time: None,
            target_url: Some("http://cbt-internal:8080".to_owned()),
            local_overrides: None,
        }];

        let merged = merge_networks(&upstream, &overrides);
        let mainnet = merged.get("mainnet").expect("mainnet survives merge");
        assert_eq!(mainnet.display_name, "Mainnet (patched)");
        assert_eq!(mainnet.target_url, "http://cbt-internal:8080");
        assert_eq!(mainnet.chain_id, 1);
    }

    #[test]
    fn disabled_overlay_removes_network() {
        let mut upstream = BTreeMap::new();
        upstream.insert(
            "sepolia".to_owned(),
            upstream_network("sepolia", "http://cbt-sepolia:8080"),
        );
        let overrides = vec![NetworkOverride {
            name: "sepolia".to_owned(),
            enabled: false,
            display_name: None,
            chain_id: None,
            genesis_time: None,
            target_url: None,
            local_overrides: None,
        }];

        assert!(merge_networks(&upstream, &overrides).is_empty());
    }

    #[test]
    fn overlay_only_network_is_added() {
        let overrides = vec![NetworkOverride {
            name: "devnet-12".to_owned(),
            enabled: true,
            display_name: None,
            chain_id: Some(4242),
            genesis_time: Some(1_700_000_000),
            target_url: Some("http://cbt-devnet:8080".to_owned()),
            local_overrides: None,
        }];

        let merged = merge_networks(&BTreeMap::new(), &overrides);
        let devnet = merged.get("devnet-12").expect("overlay-only network added");
        assert_eq!(devnet.chain_id, 4242);
        assert!(devnet.is_active());
    }

    #[test]
    fn display_name_fallback_capitalizes_first_byte() {
        let net = upstream_network("holesky", "http://cbt:8080");
        assert_eq!(net.display_name_or_fallback(), "Holesky");
    }
}
