//! `/api/v1/config` 的发布形状。
//!
//! 字段名是对外契约：`networks` 按名字有序，`features` 按路径有序。前端
//! 首屏注入（`window.__CONFIG__`）与 API 响应共用同一构造函数，保证两个
//! 出口永远一致。

use std::collections::BTreeMap;

use serde::Serialize;

use lab_core::config::FeatureConfig;
use lab_core::network::{BlobScheduleEntry, Forks, Network};

/// 单个网络的发布视图。
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct NetworkView {
    pub name: String,
    pub display_name: String,
    pub chain_id: i64,
    pub genesis_time: u64,
    pub genesis_delay: u64,
    pub forks: Forks,
    pub service_urls: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob_schedule: Option<Vec<BlobScheduleEntry>>,
}

/// 单个特性开关的发布视图。
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct FeatureView {
    pub path: String,
    pub disabled_networks: Vec<String>,
}

/// 配置快照的发布形状。
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ConfigSnapshot {
    pub networks: Vec<NetworkView>,
    pub features: Vec<FeatureView>,
}

/// 由合并后的网络目录与特性配置构造发布快照。
///
/// - **契约 (What)**：`networks` 按名字升序（输入 `BTreeMap` 天然有序），
///   `features` 按路径升序；后端地址（`target_url`）是内部细节，不出现在
///   发布形状中。
pub fn build_config_snapshot(
    networks: &BTreeMap<String, Network>,
    features: &[FeatureConfig],
) -> ConfigSnapshot {
    let network_views = networks
        .values()
        .map(|network| NetworkView {
            name: network.name.clone(),
            display_name: network.display_name_or_fallback(),
            chain_id: network.chain_id,
            genesis_time: network.genesis_time,
            genesis_delay: network.genesis_delay,
            forks: network.forks.clone(),
            service_urls: network.service_urls.clone(),
            blob_schedule: network.blob_schedule.clone(),
        })
        .collect();

    let mut feature_views: Vec<FeatureView> = features
        .iter()
        .map(|feature| FeatureView {
            path: feature.path.clone(),
            disabled_networks: feature.disabled_networks.clone(),
        })
        .collect();
    feature_views.sort_by(|a, b| a.path.cmp(&b.path));

    ConfigSnapshot {
        networks: network_views,
        features: feature_views,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lab_core::network::NetworkStatus;

    fn network(name: &str) -> Network {
        Network {
            name: name.to_owned(),
            display_name: String::new(),
            chain_id: 1,
            genesis_time: 1_606_824_023,
            genesis_delay: 604_800,
            forks: Forks::default(),
            blob_schedule: None,
            service_urls: BTreeMap::new(),
            target_url: "http://internal:8080".to_owned(),
            status: NetworkStatus::Active,
            last_seen: 0,
        }
    }

    #[test]
    fn snapshot_is_sorted_and_omits_internal_fields() {
        let mut networks = BTreeMap::new();
        networks.insert("sepolia".to_owned(), network("sepolia"));
        networks.insert("mainnet".to_owned(), network("mainnet"));
        let features = vec![
            FeatureConfig {
                path: "/z-experiment".to_owned(),
                disabled_networks: vec!["sepolia".to_owned()],
            },
            FeatureConfig {
                path: "/a-experiment".to_owned(),
                disabled_networks: Vec::new(),
            },
        ];

        let snapshot = build_config_snapshot(&networks, &features);
        let names: Vec<&str> = snapshot.networks.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["mainnet", "sepolia"]);
        assert_eq!(snapshot.networks[0].display_name, "Mainnet");

        let paths: Vec<&str> = snapshot.features.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["/a-experiment", "/z-experiment"]);

        let json = serde_json::to_string(&snapshot).expect("serialize snapshot");
        assert!(!json.contains("target_url"), "后端地址不得外泄");
        assert!(json.contains(r#""genesis_delay":604800"#));
    }
}
