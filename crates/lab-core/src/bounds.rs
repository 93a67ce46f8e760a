//! 数据边界（bounds）快照的线上形状。
//!
//! `lab:bounds:{network}` 键存放 [`BoundsData`] 的 JSON 序列化；字段名是对外
//! 契约，前端与其他副本按原样反序列化。折叠算法本身与抓取客户端一起放在
//! `lab-snapshot`，这里只保留数据形状。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// 单表的位置区间：`min` 为最低 position，`max` 为最高 `position + interval`。
///
/// - **不变量 (What)**：当表中存在记录时恒有 `min ≤ max`；空表不会出现在
///   映射中（空输入折叠为空映射，而非错误）。
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct TableBounds {
    pub min: i64,
    pub max: i64,
}

/// 一个网络的全部表边界与最近一次刷新的时间戳。
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct BoundsData {
    #[serde(default)]
    pub tables: BTreeMap<String, TableBounds>,
    #[serde(default)]
    pub last_updated: u64,
}

impl BoundsData {
    /// 以给定表映射与时间戳构造快照。
    pub fn new(tables: BTreeMap<String, TableBounds>, last_updated: u64) -> Self {
        Self {
            tables,
            last_updated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialized_shape_is_stable() {
        let mut tables = BTreeMap::new();
        tables.insert("fct_block".to_owned(), TableBounds { min: 50, max: 110 });
        let data = BoundsData::new(tables, 1_700_000_000);
        let json = serde_json::to_string(&data).expect("serialize bounds");
        assert_eq!(
            json,
            r#"{"tables":{"fct_block":{"min":50,"max":110}},"last_updated":1700000000}"#
        );
    }
}
