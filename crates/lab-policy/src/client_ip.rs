//! 真实客户端 IP 的提取链。
//!
//! 网关前面可能有 CDN 与一层或多层反向代理，直连地址往往是内部跳板。
//! 提取顺序（高优先级在前）：`CF-Connecting-IP`、`X-Forwarded-For` 的首个
//! 元素、`X-Real-IP`、TCP 对端地址（去端口）。头里的值解析失败时继续向
//! 下回退，绝不因为一条畸形头而放弃识别。

use std::net::{IpAddr, SocketAddr};

use http::header::HeaderMap;

/// 依优先级提取客户端 IP。
pub fn extract_client_ip(headers: &HeaderMap, remote_addr: Option<SocketAddr>) -> Option<IpAddr> {
    if let Some(ip) = header_ip(headers, "cf-connecting-ip") {
        return Some(ip);
    }

    if let Some(value) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = value.split(',').next() {
            if let Ok(ip) = first.trim().parse() {
                return Some(ip);
            }
        }
    }

    if let Some(ip) = header_ip(headers, "x-real-ip") {
        return Some(ip);
    }

    remote_addr.map(|addr| addr.ip())
}

fn header_ip(headers: &HeaderMap, name: &str) -> Option<IpAddr> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}
