//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 为网关全部请求面与控制面组件提供集中定义的错误语义，确保每一种对外可见
//!   的失败都有稳定的错误码与确定的 HTTP 状态映射；
//! - 细粒度枚举支撑精确的告警与观测维度，避免“一切皆 500”。
//!
//! ## 设计要求（What）
//! - 所有错误类型实现 `thiserror::Error` 以兼容 `std::error::Error`；
//! - 请求期错误绝不越过 Handler 边界向上传播：路由层将其渲染为
//!   [`ErrorBody`] JSON 与状态码；
//! - 后台循环（快照刷新、健康探测）的错误在循环内记录并吞掉，不得终止兄弟
//!   任务。
//!
//! ## 扩展建议（How）
//! - 新增变体时同步补充 [`GatewayError::code`] 与 [`GatewayError::status`]，
//!   错误码遵循 `gateway.{组件}.{场景}` 的点分命名。

use serde::Serialize;
use thiserror::Error;

/// 网关核心错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：聚合路径解析、网络寻址、上游转发、限流与存储可用性等
///   关键路径的异常，为路由层统一渲染 JSON 错误体做准备；
/// - **契约 (What)**：
///   - 所有变体均为 `Send + Sync + 'static`，可安全跨任务传播；
///   - [`GatewayError::code`] 返回稳定错误码，[`GatewayError::status`] 返回
///     HTTP 状态码，两者一经发布即不可变更语义；
/// - **设计权衡 (Trade-offs)**：上下文使用 `String` 保存，牺牲少量堆分配换取
///   可读性；热路径上错误构造本身已意味着请求失败，分配成本可接受。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// 请求路径不满足 `/api/v1/{network}/...` 的形状。
    #[error("invalid request path: {message}")]
    PathInvalid { message: String },

    /// 路径中的网络名未出现在当前目录快照中。
    #[error("network `{network}` not found")]
    NetworkUnknown { network: String },

    /// 网络存在但被本地覆盖禁用。
    #[error("network `{network}` is disabled")]
    NetworkDisabled { network: String },

    /// RPC 端点池中没有健康端点可用。
    #[error("no healthy backend for network `{network}`")]
    NoHealthyBackend { network: String },

    /// 到上游后端的传输层失败（拨号、TLS、读超时等）。
    #[error("upstream transport failure for `{network}`: {detail}")]
    UpstreamTransport { network: String, detail: String },

    /// 上游返回无法接受的状态码（仅用于网关自身消费上游的场景）。
    #[error("upstream returned status {status}")]
    UpstreamBadStatus { status: u16, context: String },

    /// 上游响应体无法解码为预期形状。
    #[error("failed to decode upstream response during `{context}`: {detail}")]
    UpstreamDecode { context: String, detail: String },

    /// JSON-RPC 上游返回了业务错误对象。
    #[error("rpc error: {message}")]
    RpcError { message: String },

    /// 客户端触发滑动窗口限流。
    #[error("rate limit exceeded, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },

    /// 共享 KV 存储不可达或操作失败。
    #[error("key-value store unavailable: {detail}")]
    KvUnavailable { detail: String },

    /// 启动期就绪等待超时（快照迟迟未发布）。
    #[error("readiness timeout while waiting for {what}")]
    ReadinessTimeout { what: &'static str },

    /// HTML 状态注入失败（缺失 `<head>` 等结构性问题）。
    #[error("html injection failed: {detail}")]
    InjectionFailed { detail: String },

    /// 策略正则在构造期编译失败。
    #[error("pattern for policy `{policy}` failed to compile: {detail}")]
    PatternCompileFailed { policy: String, detail: String },
}

impl GatewayError {
    /// 稳定错误码，遵循 `gateway.{组件}.{场景}` 点分命名。
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::PathInvalid { .. } => "gateway.proxy.path_invalid",
            GatewayError::NetworkUnknown { .. } => "gateway.proxy.network_unknown",
            GatewayError::NetworkDisabled { .. } => "gateway.proxy.network_disabled",
            GatewayError::NoHealthyBackend { .. } => "gateway.rpc.no_healthy_backend",
            GatewayError::UpstreamTransport { .. } => "gateway.proxy.upstream_transport",
            GatewayError::UpstreamBadStatus { .. } => "gateway.upstream.bad_status",
            GatewayError::UpstreamDecode { .. } => "gateway.upstream.decode",
            GatewayError::RpcError { .. } => "gateway.rpc.upstream_error",
            GatewayError::RateLimited { .. } => "gateway.policy.rate_limited",
            GatewayError::KvUnavailable { .. } => "gateway.store.unavailable",
            GatewayError::ReadinessTimeout { .. } => "gateway.snapshot.readiness_timeout",
            GatewayError::InjectionFailed { .. } => "gateway.frontend.injection_failed",
            GatewayError::PatternCompileFailed { .. } => "gateway.policy.pattern_compile",
        }
    }

    /// 渲染给客户端的 HTTP 状态码。
    ///
    /// - **契约 (What)**：请求期错误一一对应一个状态码；启动期专用的变体
    ///   （就绪超时、注入失败、正则编译失败）按内部错误处理，正常部署下它们
    ///   不会到达请求路径。
    pub fn status(&self) -> u16 {
        match self {
            GatewayError::PathInvalid { .. } => 400,
            GatewayError::NetworkUnknown { .. } => 404,
            GatewayError::NetworkDisabled { .. } => 503,
            GatewayError::NoHealthyBackend { .. } => 503,
            GatewayError::UpstreamTransport { .. } => 502,
            GatewayError::UpstreamBadStatus { .. } => 502,
            GatewayError::UpstreamDecode { .. } => 502,
            GatewayError::RpcError { .. } => 400,
            GatewayError::RateLimited { .. } => 429,
            GatewayError::KvUnavailable { .. } => 503,
            GatewayError::ReadinessTimeout { .. } => 503,
            GatewayError::InjectionFailed { .. } => 500,
            GatewayError::PatternCompileFailed { .. } => 500,
        }
    }

    /// 错误关联的网络名（若有），用于 JSON 错误体的 `network` 字段。
    pub fn network(&self) -> Option<&str> {
        match self {
            GatewayError::NetworkUnknown { network }
            | GatewayError::NetworkDisabled { network }
            | GatewayError::NoHealthyBackend { network }
            | GatewayError::UpstreamTransport { network, .. } => Some(network),
            _ => None,
        }
    }

    /// 渲染为对外 JSON 错误体。
    ///
    /// # 教案式说明
    /// - **意图 (Why)**：错误体字段名是对外契约（`error`、`status`、`network`、
    ///   `retry_after`），集中一处构造避免各 Handler 漂移；
    /// - **契约 (What)**：`error` 文案对部分变体是固定字符串（如 404 的
    ///   `network not found`、502 的 `backend unavailable`、429 的
    ///   `rate limit exceeded`），客户端依赖这些字面量做断言。
    pub fn to_body(&self) -> ErrorBody {
        match self {
            GatewayError::PathInvalid { message } => ErrorBody::new(message.clone()),
            GatewayError::NetworkUnknown { network } => {
                ErrorBody::new("network not found").with_network(network)
            }
            GatewayError::NetworkDisabled { network } => {
                ErrorBody::new("network is disabled").with_network(network)
            }
            GatewayError::NoHealthyBackend { .. } => {
                ErrorBody::new("all backends are currently syncing")
            }
            GatewayError::UpstreamTransport { network, .. } => {
                ErrorBody::new("backend unavailable").with_network(network)
            }
            GatewayError::UpstreamBadStatus { .. } | GatewayError::UpstreamDecode { .. } => {
                ErrorBody::new("bad gateway")
            }
            GatewayError::RpcError { message } => ErrorBody::new(message.clone()),
            GatewayError::RateLimited { retry_after } => ErrorBody::new("rate limit exceeded")
                .with_status(429)
                .with_retry_after(*retry_after),
            GatewayError::KvUnavailable { .. } => ErrorBody::new("service unavailable"),
            GatewayError::ReadinessTimeout { .. } => ErrorBody::new("service unavailable"),
            GatewayError::InjectionFailed { .. } | GatewayError::PatternCompileFailed { .. } => {
                ErrorBody::new("internal server error")
            }
        }
    }
}

/// 对外 JSON 错误体。
///
/// - **契约 (What)**：序列化形状为 `{error, status?, network?, retry_after?}`，
///   可选字段缺省时必须整体省略（而非输出 `null`），下游断言依赖这一点。
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ErrorBody {
    /// 以文案构造最小错误体。
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            status: None,
            network: None,
            retry_after: None,
        }
    }

    /// 附加显式状态码字段（仅限流等契约要求时使用）。
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// 附加网络名字段。
    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = Some(network.into());
        self
    }

    /// 附加重试等待秒数。
    pub fn with_retry_after(mut self, retry_after: u64) -> Self {
        self.retry_after = Some(retry_after);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_network_body_matches_wire_contract() {
        let err = GatewayError::NetworkUnknown {
            network: "atlantis".to_owned(),
        };
        let body = serde_json::to_string(&err.to_body()).expect("serialize error body");
        assert_eq!(body, r#"{"error":"network not found","network":"atlantis"}"#);
        assert_eq!(err.status(), 404);
    }

    #[test]
    fn rate_limited_body_carries_status_and_retry_after() {
        let err = GatewayError::RateLimited { retry_after: 42 };
        let body = err.to_body();
        assert_eq!(body.status, Some(429));
        assert_eq!(body.retry_after, Some(42));
        assert_eq!(body.error, "rate limit exceeded");
    }

    #[test]
    fn codes_are_stable_and_dot_separated() {
        let err = GatewayError::KvUnavailable {
            detail: "connection refused".to_owned(),
        };
        assert_eq!(err.code(), "gateway.store.unavailable");
        assert!(err.code().starts_with("gateway."));
    }
}
