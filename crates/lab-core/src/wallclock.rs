//! # wallclock 模块说明
//!
//! ## 角色定位（Why）
//! - 信标链把时间切成固定长度的槽位（slot），反向代理需要把客户端的
//!   `slot_{op}` 过滤参数改写为时间戳过滤，这要求每个网络有一个可查询的
//!   槽位钟摆；
//! - 注册表是进程级单例：启动时从目录快照注入，随拓扑刷新补登新网络。
//!
//! ## 行为契约（What）
//! - `slot_start_time(network, slot) = genesis_time + slot × seconds_per_slot`；
//! - 未注册网络返回 0，调用方据此走 fail-open 路径（保留原参数）；
//! - 重复注册同一网络是幂等空操作；
//! - 每 epoch 固定 32 槽。

use std::collections::HashMap;

use parking_lot::RwLock;

/// 每个 epoch 的槽位数，对目标链是协议常量。
pub const SLOTS_PER_EPOCH: u64 = 32;

/// 默认槽长（秒）。
pub const DEFAULT_SECONDS_PER_SLOT: u64 = 12;

#[derive(Clone, Copy, Debug)]
struct SlotClock {
    genesis_time: u64,
    seconds_per_slot: u64,
}

/// 网络槽位钟摆注册表。
///
/// # 教案式说明
/// - **意图 (Why)**：把“槽位 ↔ 壁钟时间”的换算集中到一个只读热、写极冷的
///   注册表中，让代理改写逻辑保持纯函数形状；
/// - **契约 (What)**：
///   - `register` 幂等：已注册网络的再次注册是空操作；
///   - `slot_start_time` 对未注册网络返回 0（调用方负责 fail-open）；
/// - **并发 (Trade-offs)**：读多写少，采用 `parking_lot::RwLock`；读路径仅
///   拷贝两枚整数，不在锁内做任何 IO。
#[derive(Debug, Default)]
pub struct WallclockRegistry {
    clocks: RwLock<HashMap<String, SlotClock>>,
}

impl WallclockRegistry {
    /// 创建空注册表。
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册一个网络的钟摆参数；已存在时为空操作。
    pub fn register(&self, network: &str, genesis_time: u64, seconds_per_slot: u64) {
        let mut clocks = self.clocks.write();
        clocks.entry(network.to_owned()).or_insert(SlotClock {
            genesis_time,
            seconds_per_slot: if seconds_per_slot == 0 {
                DEFAULT_SECONDS_PER_SLOT
            } else {
                seconds_per_slot
            },
        });
    }

    /// 是否已注册某网络。
    pub fn contains(&self, network: &str) -> bool {
        self.clocks.read().contains_key(network)
    }

    /// 槽位起始的 unix 秒；未注册网络返回 0。
    pub fn slot_start_time(&self, network: &str, slot: u64) -> u64 {
        let clocks = self.clocks.read();
        match clocks.get(network) {
            Some(clock) => clock
                .genesis_time
                .saturating_add(slot.saturating_mul(clock.seconds_per_slot)),
            None => 0,
        }
    }

    /// 反向换算：给定 unix 秒返回其所属槽位；未注册或早于创世返回 0。
    pub fn slot_of(&self, network: &str, unix_time: u64) -> u64 {
        let clocks = self.clocks.read();
        match clocks.get(network) {
            Some(clock) if unix_time >= clock.genesis_time => {
                (unix_time - clock.genesis_time) / clock.seconds_per_slot
            }
            _ => 0,
        }
    }

    /// 槽位所属 epoch。
    pub fn epoch_of_slot(slot: u64) -> u64 {
        slot / SLOTS_PER_EPOCH
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_start_time_uses_genesis_plus_slot_times_seconds() {
        let registry = WallclockRegistry::new();
        registry.register("mainnet", 1_606_824_023, 12);
        assert_eq!(registry.slot_start_time("mainnet", 1000), 1_606_836_023);
        assert_eq!(registry.slot_start_time("mainnet", 0), 1_606_824_023);
    }

    #[test]
    fn unknown_network_yields_zero() {
        let registry = WallclockRegistry::new();
        assert_eq!(registry.slot_start_time("atlantis", 1000), 0);
        assert_eq!(registry.slot_of("atlantis", 1_700_000_000), 0);
    }

    #[test]
    fn register_is_idempotent() {
        let registry = WallclockRegistry::new();
        registry.register("sepolia", 1_655_733_600, 12);
        registry.register("sepolia", 9_999_999_999, 6);
        assert_eq!(registry.slot_start_time("sepolia", 1), 1_655_733_612);
    }

    #[test]
    fn slot_of_inverts_slot_start_time() {
        let registry = WallclockRegistry::new();
        registry.register("mainnet", 1_606_824_023, 12);
        let start = registry.slot_start_time("mainnet", 4321);
        assert_eq!(registry.slot_of("mainnet", start), 4321);
        assert_eq!(registry.slot_of("mainnet", start + 11), 4321);
        assert_eq!(registry.slot_of("mainnet", start + 12), 4322);
    }

    #[test]
    fn epoch_of_slot_is_fixed_32() {
        assert_eq!(WallclockRegistry::epoch_of_slot(0), 0);
        assert_eq!(WallclockRegistry::epoch_of_slot(31), 0);
        assert_eq!(WallclockRegistry::epoch_of_slot(32), 1);
    }
}
