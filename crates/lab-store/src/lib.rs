#![deny(unsafe_code)]
#![doc = "lab-store: 共享键值存储的能力契约与实现。"]
#![doc = ""]
#![doc = "网关副本之间的全部协调（快照发布、领导者选举、限流计数）都走同一个"]
#![doc = "Redis 协议的 KV 存储。本 crate 把存储收敛为一个窄能力契约"]
#![doc = "[`KeyValueStore`]，生产实现基于 fred 连接池，测试替身为进程内"]
#![doc = "[`MemoryStore`]；领导者选举器 [`LeaderElector`] 构建在该契约之上，"]
#![doc = "保证同一时刻至多一个副本向存储写入快照。"]

mod error;
mod kv;
mod leader;
mod memory;
mod redis;

pub use error::StoreError;
pub use kv::KeyValueStore;
pub use leader::LeaderElector;
pub use memory::MemoryStore;
pub use redis::RedisStore;
