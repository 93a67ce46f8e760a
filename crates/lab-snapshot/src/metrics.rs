//! 控制面刷新指标。
//!
//! 指标注册表由装配层注入（进程级单例、显式传递），本模块只负责声明与
//! 打点。标签基数刻意压低：`kind ∈ {topology, bounds}`，
//! `outcome ∈ {ok, error}`，`network` 仅出现在边界刷新错误计数上。

use prometheus::{IntCounterVec, IntGauge, Opts, Registry};

/// 快照刷新相关的指标句柄。
#[derive(Clone)]
pub struct SnapshotMetrics {
    refresh_total: IntCounterVec,
    network_errors: IntCounterVec,
    leader_state: IntGauge,
}

impl SnapshotMetrics {
    /// 在给定注册表中注册全部指标。
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let refresh_total = IntCounterVec::new(
            Opts::new(
                "lab_snapshot_refresh_total",
                "Snapshot refresh cycles by kind and outcome",
            ),
            &["kind", "outcome"],
        )?;
        let network_errors = IntCounterVec::new(
            Opts::new(
                "lab_snapshot_network_errors_total",
                "Per-network bounds refresh failures",
            ),
            &["network"],
        )?;
        let leader_state = IntGauge::new(
            "lab_leader_state",
            "1 when this replica currently holds the leader lock",
        )?;
        registry.register(Box::new(refresh_total.clone()))?;
        registry.register(Box::new(network_errors.clone()))?;
        registry.register(Box::new(leader_state.clone()))?;
        Ok(Self {
            refresh_total,
            network_errors,
            leader_state,
        })
    }

    /// 不接注册表的空壳（测试用；指标仍可打点，只是无人抓取）。
    pub fn unregistered() -> Self {
        Self {
            refresh_total: IntCounterVec::new(
                Opts::new("lab_snapshot_refresh_total", "unregistered"),
                &["kind", "outcome"],
            )
            .expect("static metric opts are valid"),
            network_errors: IntCounterVec::new(
                Opts::new("lab_snapshot_network_errors_total", "unregistered"),
                &["network"],
            )
            .expect("static metric opts are valid"),
            leader_state: IntGauge::new("lab_leader_state", "unregistered")
                .expect("static metric opts are valid"),
        }
    }

    pub fn refresh_ok(&self, kind: &str) {
        self.refresh_total.with_label_values(&[kind, "ok"]).inc();
    }

    pub fn refresh_error(&self, kind: &str) {
        self.refresh_total.with_label_values(&[kind, "error"]).inc();
    }

    pub fn network_error(&self, network: &str) {
        self.network_errors.with_label_values(&[network]).inc();
    }

    pub fn set_leader(&self, is_leader: bool) {
        self.leader_state.set(if is_leader { 1 } else { 0 });
    }
}
