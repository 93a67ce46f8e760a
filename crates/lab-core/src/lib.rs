#![deny(unsafe_code)]
#![doc = "lab-core: 多网络分析网关（lab gateway）的核心领域契约。"]
#![doc = ""]
#![doc = "本 crate 不包含任何 IO：它定义网络目录、数据边界、信标链钟摆等领域模型，"]
#![doc = "以及贯穿全部组件的错误域与 YAML 配置模型。所有带副作用的实现（KV 存储、"]
#![doc = "快照刷新、反向代理、HTTP 服务）分布在依赖本 crate 的兄弟 crate 中，"]
#![doc = "并只通过这里声明的类型交换数据。"]

/// 数据边界（bounds）快照的领域模型。
///
/// - **意图说明 (Why)**：每个网络的后端按表记录已摄取的 position 区间，网关把
///   该区间以快照形式发布给副本与前端；
/// - **契约定位 (What)**：`TableBounds` 与 [`bounds::BoundsData`] 是 KV 中
///   `lab:bounds:{network}` 键的序列化形状，字段名即线上格式，不可随意更名。
pub mod bounds;

/// YAML 配置文件的类型化模型与启动期校验。
pub mod config;

/// 网关统一错误域与对外 JSON 错误体。
pub mod error;

/// 网络目录（topology）的领域模型与本地覆盖合并规则。
pub mod network;

/// 合并式事件通知原语：单槽位、非阻塞、可丢弃。
pub mod notify;

/// 信标链钟摆：槽位与壁钟时间的互换。
pub mod wallclock;

pub use error::{ErrorBody, GatewayError};
