//! # inject 模块说明
//!
//! ## 角色定位（Why）
//! - 把集群状态固化进 HTML 首屏：`<head>` 之后恰好一个 `<script>` 携带
//!   `window.__CONFIG__` / `window.__BOUNDS__` / `window.__VERSION__`，
//!   路由专属的原始片段插在 `</head>` 之前；
//! - JSON 中的 `</` 被转义为 `<\/`，防止载荷提前闭合 script 标签。
//!
//! ## 契约（What）
//! - 基底缺失 `<head>` 或 `</head>` 时返回类型化错误（启动期致命）；
//! - 输出对每个标记（`__CONFIG__` 等）恰好包含一次。

use bytes::Bytes;
use serde::Serialize;

use crate::error::FrontendError;

/// 将三份状态与路由片段注入基底 HTML。
///
/// # 教案式说明
/// - **输入 (What)**：`base` 为完整的 `index.html` 文本；`config`/`bounds`/
///   `version` 为可序列化状态；`raw_head` 为该路由在 `head.json` 中声明的
///   原始片段（可为空串）；
/// - **后置条件**：返回的字节串中 script 标记位于 `<head>` 之后、`raw_head`
///   位于 script 与 `</head>` 之间；
/// - **风险 (Trade-offs)**：`raw_head` 被视为可信的部署内资产，不做转义；
///   它的来源是构建产物而非用户输入。
pub fn inject_all(
    base: &str,
    config: &impl Serialize,
    bounds: &impl Serialize,
    version: &impl Serialize,
    raw_head: &str,
) -> Result<Bytes, FrontendError> {
    let head_open = base.find("<head>").ok_or(FrontendError::MissingHeadOpen)?;
    let head_close = base.find("</head>").ok_or(FrontendError::MissingHeadClose)?;

    let script = format!(
        "<script>window.__CONFIG__={};window.__BOUNDS__={};window.__VERSION__={};</script>",
        escaped_json(config)?,
        escaped_json(bounds)?,
        escaped_json(version)?,
    );

    let insert_after_head = head_open + "<head>".len();
    let mut output = String::with_capacity(base.len() + script.len() + raw_head.len());
    output.push_str(&base[..insert_after_head]);
    output.push_str(&script);
    output.push_str(&base[insert_after_head..head_close]);
    output.push_str(raw_head);
    output.push_str(&base[head_close..]);

    Ok(Bytes::from(output))
}

/// 序列化为 JSON 并转义 `</`，防止提前闭合 script。
fn escaped_json(value: &impl Serialize) -> Result<String, FrontendError> {
    let raw = serde_json::to_string(value)?;
    Ok(raw.replace("</", "<\\/"))
}
