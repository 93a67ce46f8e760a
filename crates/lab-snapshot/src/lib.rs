#![deny(unsafe_code)]
#![doc = "lab-snapshot: 共享快照的领导者刷新与多副本读取。"]
#![doc = ""]
#![doc = "两类快照以 JSON 形式存放在共享 KV 中：网络目录（`lab:config:networks`）"]
#![doc = "与每网络的数据边界（`lab:bounds:{network}`）。持有选举锁的副本负责从"]
#![doc = "上游抓取并发布，其余副本只读 KV；消费者（前端 HTML 缓存）通过合并式"]
#![doc = "通知获悉“有新发布，请重建”。读取端每次调用都重新反序列化，绝不缓存，"]
#![doc = "因此任何副本都能在不触达上游的情况下应答请求。"]

mod bounds;
mod error;
mod metrics;
mod readiness;
mod topology;

pub use bounds::{
    BOUNDS_KEY_PREFIX, BoundsProvider, IncrementalRecord, bounds_key, calculate_bounds,
    merge_table_bounds,
};
pub use error::SnapshotError;
pub use metrics::SnapshotMetrics;
pub use topology::{TOPOLOGY_KEY, TopologyProvider};
