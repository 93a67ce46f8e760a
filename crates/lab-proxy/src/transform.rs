//! 槽位过滤参数 → 时间戳过滤参数的查询改写。
//!
//! CBT 后端只认识 `slot_start_date_time_{op}` 这类时间戳过滤，而前端以槽位
//! 表达查询。改写是纯文本操作：除命中的参数外，其余键值对一个字节都不动，
//! 保持上游看到的查询串与客户端原始编码一致。

use lab_core::wallclock::WallclockRegistry;

/// 受支持的比较算子集合。
const SLOT_OPS: [&str; 5] = ["eq", "gte", "lte", "gt", "lt"];

/// 改写查询串中的槽位过滤参数。
///
/// # 教案式说明
/// - **契约 (What)**：对形如 `slot_{op}=N` 的参数（`op ∈ {eq,gte,lte,gt,lt}`，
///   `N` 为无符号十进制整数），替换为
///   `slot_start_date_time_{op}={genesis + N × seconds_per_slot}`；其余参数
///   逐字节原样保留，包括顺序与重复键；
/// - **fail-open**：网络未注册钟摆或 `N` 非法时保留原参数——代理的职责是
///   尽力转发，而不是替后端做校验；
/// - **风险 (Trade-offs)**：不做百分号解码，意味着 `slot_eq=1%30` 这类编码
///   值不会命中改写（按原样转发），与“无法解析则原样转发”的兜底一致。
pub fn transform_query(query: &str, network: &str, wallclock: &WallclockRegistry) -> String {
    if query.is_empty() {
        return String::new();
    }

    let segments: Vec<String> = query
        .split('&')
        .map(|segment| transform_segment(segment, network, wallclock))
        .collect();
    segments.join("&")
}

fn transform_segment(segment: &str, network: &str, wallclock: &WallclockRegistry) -> String {
    let Some((key, value)) = segment.split_once('=') else {
        return segment.to_owned();
    };
    let Some(op) = key.strip_prefix("slot_") else {
        return segment.to_owned();
    };
    if !SLOT_OPS.contains(&op) {
        return segment.to_owned();
    }
    let Ok(slot) = value.parse::<u64>() else {
        return segment.to_owned();
    };
    if !wallclock.contains(network) {
        return segment.to_owned();
    }

    let timestamp = wallclock.slot_start_time(network, slot);
    format!("slot_start_date_time_{op}={timestamp}")
}
