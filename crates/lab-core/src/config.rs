//! # config 模块说明
//!
//! ## 角色定位（Why）
//! - 网关的全部运行参数来自单个 YAML 文件；本模块给出其类型化模型、缺省值
//!   与启动期校验，使解析失败与非法组合在进程起步阶段立即失败；
//! - 配置对象在装配后只读共享（`Arc<Config>`），各组件只读取与自己相关的
//!   切片。
//!
//! ## 行为契约（What）
//! - 时长字段一律使用 humantime 语法（`7s`、`90s`、`5m`）；
//! - [`Config::validate`] 拒绝 `leader.lock_ttl < 3 × renew_interval`；
//! - 刷新/探测间隔的下限（bounds 5s、health 10s）在 effective 取值时收紧，
//!   并不视为致命错误。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// 配置装载与校验的错误域。
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 配置文件不可读。
    #[error("failed to read config file `{path}`: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML 解析失败。
    #[error("failed to parse config file `{path}`: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// 字段组合非法。
    #[error("invalid config field `{field}`: {message}")]
    Validation { field: &'static str, message: String },
}

/// 网关根配置。
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub store: StoreConfig,
    #[serde(default)]
    pub leader: LeaderConfig,
    #[serde(default)]
    pub networks: Vec<NetworkOverride>,
    #[serde(default)]
    pub features: Vec<FeatureConfig>,
    pub topology: TopologyConfig,
    #[serde(default)]
    pub bounds: BoundsConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub headers: HeadersConfig,
    #[serde(default)]
    pub gas_profiler: GasProfilerConfig,
    #[serde(default)]
    pub frontend: FrontendConfig,
}

impl Config {
    /// 从路径装载并校验配置。
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        let config: Config = serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// 启动期校验。
    ///
    /// # 教案式说明
    /// - **意图 (Why)**：锁 TTL 与续约间隔的不安全比值会造成领导权抖动甚至
    ///   双主窗口拉长，必须在装配前拒绝；
    /// - **契约 (What)**：`lock_ttl ≥ 3 × renew_interval`，否则返回
    ///   [`ConfigError::Validation`]；空 `store.url`、空 `topology.source_url`
    ///   同样拒绝。
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.url.is_empty() {
            return Err(ConfigError::Validation {
                field: "store.url",
                message: "store url must not be empty".to_owned(),
            });
        }
        if self.topology.source_url.is_empty() {
            return Err(ConfigError::Validation {
                field: "topology.source_url",
                message: "topology source url must not be empty".to_owned(),
            });
        }
        if self.leader.lock_ttl < self.leader.renew_interval.saturating_mul(3) {
            return Err(ConfigError::Validation {
                field: "leader.lock_ttl",
                message: format!(
                    "lock_ttl ({:?}) must be at least 3x renew_interval ({:?})",
                    self.leader.lock_ttl, self.leader.renew_interval
                ),
            });
        }
        for rule in &self.rate_limit.rules {
            if rule.limit == 0 {
                return Err(ConfigError::Validation {
                    field: "rate_limit.rules.limit",
                    message: format!("rule `{}` must allow at least one request", rule.name),
                });
            }
        }
        Ok(())
    }

    /// 按名字查找网络覆盖记录。
    pub fn network_override(&self, name: &str) -> Option<&NetworkOverride> {
        self.networks.iter().find(|overlay| overlay.name == name)
    }
}

/// HTTP 服务面配置。
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_shutdown_timeout", with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout: default_shutdown_timeout(),
            log_level: default_log_level(),
        }
    }
}

/// 共享 KV 存储（Redis 协议）配置。
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    pub url: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
    #[serde(default = "default_command_timeout", with = "humantime_serde")]
    pub command_timeout: Duration,
}

/// 领导者选举配置。
///
/// - **契约 (What)**：`lock_ttl ≥ 3 × renew_interval`（装载时强制）；
///   `retry_interval` 是跟随者探测节奏，允许比续约更慢。
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LeaderConfig {
    #[serde(default = "default_lock_key")]
    pub lock_key: String,
    #[serde(default = "default_lock_ttl", with = "humantime_serde")]
    pub lock_ttl: Duration,
    #[serde(default = "default_renew_interval", with = "humantime_serde")]
    pub renew_interval: Duration,
    #[serde(default = "default_retry_interval", with = "humantime_serde")]
    pub retry_interval: Duration,
}

impl Default for LeaderConfig {
    fn default() -> Self {
        Self {
            lock_key: default_lock_key(),
            lock_ttl: default_lock_ttl(),
            renew_interval: default_renew_interval(),
            retry_interval: default_retry_interval(),
        }
    }
}

/// 单个网络的本地覆盖记录。
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct NetworkOverride {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub chain_id: Option<i64>,
    #[serde(default)]
    pub genesis_time: Option<u64>,
    #[serde(default)]
    pub target_url: Option<String>,
    #[serde(default)]
    pub local_overrides: Option<LocalOverrides>,
}

/// 边界抓取的本地覆盖源：对列出的表，本地结果替换外部结果。
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LocalOverrides {
    pub target_url: String,
    #[serde(default)]
    pub tables: Vec<String>,
}

/// 前端特性开关：按路径列出禁用该特性的网络。
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FeatureConfig {
    pub path: String,
    #[serde(default)]
    pub disabled_networks: Vec<String>,
}

/// 上游目录服务（topology）配置。
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TopologyConfig {
    pub source_url: String,
    #[serde(default = "default_topology_refresh", with = "humantime_serde")]
    pub refresh_interval: Duration,
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
    /// 发布键的 TTL；缺省为不过期。
    #[serde(default, with = "humantime_serde::option")]
    pub ttl: Option<Duration>,
}

/// 边界快照刷新配置。
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BoundsConfig {
    #[serde(default = "default_bounds_refresh", with = "humantime_serde")]
    pub refresh_interval: Duration,
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
    #[serde(default, with = "humantime_serde::option")]
    pub ttl: Option<Duration>,
    #[serde(default = "default_page_size")]
    pub page_size: u64,
}

impl BoundsConfig {
    /// 生效的刷新间隔：低于 5 秒时收紧到下限。
    pub fn effective_refresh_interval(&self) -> Duration {
        self.refresh_interval.max(MIN_BOUNDS_REFRESH)
    }
}

impl Default for BoundsConfig {
    fn default() -> Self {
        Self {
            refresh_interval: default_bounds_refresh(),
            request_timeout: default_request_timeout(),
            ttl: None,
            page_size: default_page_size(),
        }
    }
}

/// 限流失败策略：KV 不可用时放行还是拒绝。
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    #[default]
    FailOpen,
    FailClosed,
}

/// 单条限流规则。
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RateLimitRule {
    pub name: String,
    pub path_pattern: String,
    pub limit: u64,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

/// 限流配置。
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub failure_mode: FailureMode,
    #[serde(default)]
    pub exempt_ips: Vec<String>,
    #[serde(default)]
    pub rules: Vec<RateLimitRule>,
}

/// 单条响应头策略。
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct HeaderPolicyConfig {
    pub name: String,
    pub path_pattern: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// 响应头策略配置。
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeadersConfig {
    #[serde(default)]
    pub policies: Vec<HeaderPolicyConfig>,
}

/// 单个 JSON-RPC 上游端点。
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RpcEndpointConfig {
    pub name: String,
    pub network: String,
    pub url: String,
}

/// gas-profiler RPC 代理配置。
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GasProfilerConfig {
    #[serde(default)]
    pub endpoints: Vec<RpcEndpointConfig>,
    #[serde(default = "default_rpc_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
    #[serde(default = "default_health_interval", with = "humantime_serde")]
    pub health_interval: Duration,
}

impl GasProfilerConfig {
    /// 生效的健康探测间隔：低于 10 秒时收紧到下限。
    pub fn effective_health_interval(&self) -> Duration {
        self.health_interval.max(MIN_HEALTH_INTERVAL)
    }
}

impl Default for GasProfilerConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            request_timeout: default_rpc_timeout(),
            health_interval: default_health_interval(),
        }
    }
}

/// 前端资产配置。
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FrontendConfig {
    #[serde(default = "default_asset_dir")]
    pub asset_dir: PathBuf,
}

impl Default for FrontendConfig {
    fn default() -> Self {
        Self {
            asset_dir: default_asset_dir(),
        }
    }
}

/// 边界刷新间隔下限。
pub const MIN_BOUNDS_REFRESH: Duration = Duration::from_secs(5);
/// 健康探测间隔下限。
pub const MIN_HEALTH_INTERVAL: Duration = Duration::from_secs(10);

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_owned()
}

fn default_port() -> u16 {
    8080
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_pool_size() -> usize {
    8
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_command_timeout() -> Duration {
    Duration::from_secs(3)
}

fn default_lock_key() -> String {
    "lab:leader:gateway".to_owned()
}

fn default_lock_ttl() -> Duration {
    Duration::from_secs(10)
}

fn default_renew_interval() -> Duration {
    Duration::from_secs(3)
}

fn default_retry_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_topology_refresh() -> Duration {
    Duration::from_secs(60)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_bounds_refresh() -> Duration {
    Duration::from_secs(7)
}

fn default_page_size() -> u64 {
    10_000
}

fn default_rpc_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_health_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_asset_dir() -> PathBuf {
    PathBuf::from("frontend/dist")
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
store:
  url: "redis://127.0.0.1:6379"
topology:
  source_url: "http://catalog.internal/networks.json"
"#;

    #[test]
    fn minimal_config_gets_defaults() {
        let config: Config = serde_yaml::from_str(MINIMAL).expect("parse minimal config");
        config.validate().expect("minimal config is valid");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.leader.lock_ttl, Duration::from_secs(10));
        assert_eq!(config.bounds.page_size, 10_000);
        assert_eq!(config.rate_limit.failure_mode, FailureMode::FailOpen);
    }

    #[test]
    fn unsafe_lock_ratio_is_rejected() {
        let raw = r#"
store:
  url: "redis://127.0.0.1:6379"
topology:
  source_url: "http://catalog.internal/networks.json"
leader:
  lock_ttl: 5s
  renew_interval: 3s
"#;
        let config: Config = serde_yaml::from_str(raw).expect("parse config");
        let err = config.validate().expect_err("ratio must be rejected");
        assert!(matches!(
            err,
            ConfigError::Validation {
                field: "leader.lock_ttl",
                ..
            }
        ));
    }

    #[test]
    fn bounds_refresh_floor_is_applied() {
        let raw = r#"
store:
  url: "redis://127.0.0.1:6379"
topology:
  source_url: "http://catalog.internal/networks.json"
bounds:
  refresh_interval: 1s
"#;
        let config: Config = serde_yaml::from_str(raw).expect("parse config");
        assert_eq!(
            config.bounds.effective_refresh_interval(),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn full_sections_deserialize() {
        let raw = r#"
server:
  host: "127.0.0.1"
  port: 9090
  log_level: debug
store:
  url: "redis://127.0.0.1:6379"
  pool_size: 4
leader:
  lock_key: "lab:leader:test"
  lock_ttl: 12s
  renew_interval: 4s
networks:
  - name: mainnet
    target_url: "http://cbt-mainnet:8080"
    local_overrides:
      target_url: "http://cbt-local:8080"
      tables: [fct_block, fct_attestation]
  - name: sepolia
    enabled: false
features:
  - path: "/experiments/block-production"
    disabled_networks: [sepolia]
topology:
  source_url: "http://catalog.internal/networks.json"
  refresh_interval: 30s
bounds:
  refresh_interval: 7s
  ttl: 60s
rate_limit:
  enabled: true
  failure_mode: fail_closed
  exempt_ips: ["10.0.0.0/8", "192.168.1.1"]
  rules:
    - name: api
      path_pattern: "^/api/"
      limit: 100
      window: 60s
headers:
  policies:
    - name: static-cache
      path_pattern: "\\.js$"
      headers:
        Cache-Control: "public, max-age=31536000"
gas_profiler:
  endpoints:
    - name: primary
      network: mainnet
      url: "http://rpc-1:8545"
  health_interval: 30s
frontend:
  asset_dir: "dist"
"#;
        let config: Config = serde_yaml::from_str(raw).expect("parse full config");
        config.validate().expect("full config is valid");
        assert_eq!(config.networks.len(), 2);
        assert!(!config.networks[1].enabled);
        let local = config.networks[0]
            .local_overrides
            .as_ref()
            .expect("mainnet has local overrides");
        assert_eq!(local.tables, vec!["fct_block", "fct_attestation"]);
        assert_eq!(config.rate_limit.failure_mode, FailureMode::FailClosed);
        assert_eq!(config.gas_profiler.endpoints.len(), 1);
    }
}
