use lab_core::GatewayError;
use lab_store::StoreError;
use thiserror::Error;

/// 快照层错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：区分“存储不可用”“上游抓取失败”“载荷解码失败”“就绪
///   等待超时”四类失败，它们的处置完全不同：前两者由下个周期重试，解码
///   失败指向上游契约漂移，就绪超时让进程 fail-fast；
/// - **契约 (What)**：后台循环内的错误记录后吞掉；读取路径的错误转换为
///   [`GatewayError`] 后由路由层渲染 503。
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// 共享 KV 操作失败。
    #[error("store operation failed: {0}")]
    Store(#[from] StoreError),

    /// 上游 HTTP 抓取失败（拨号、超时、非 2xx）。
    #[error("upstream fetch failed during `{context}`: {detail}")]
    Fetch { context: String, detail: String },

    /// 载荷无法解码为预期形状。
    #[error("failed to decode payload during `{context}`: {detail}")]
    Decode { context: String, detail: String },

    /// 启动就绪等待超时。
    #[error("readiness timeout while waiting for {what}")]
    Readiness { what: &'static str },
}

impl SnapshotError {
    pub(crate) fn fetch(context: impl Into<String>, err: &reqwest::Error) -> Self {
        SnapshotError::Fetch {
            context: context.into(),
            detail: err.to_string(),
        }
    }

    pub(crate) fn decode(context: impl Into<String>, err: &serde_json::Error) -> Self {
        SnapshotError::Decode {
            context: context.into(),
            detail: err.to_string(),
        }
    }
}

impl From<SnapshotError> for GatewayError {
    fn from(value: SnapshotError) -> Self {
        match value {
            SnapshotError::Store(err) => err.into(),
            SnapshotError::Fetch { context, detail } => GatewayError::UpstreamTransport {
                network: context,
                detail,
            },
            SnapshotError::Decode { context, detail } => {
                GatewayError::UpstreamDecode { context, detail }
            }
            SnapshotError::Readiness { what } => GatewayError::ReadinessTimeout { what },
        }
    }
}
