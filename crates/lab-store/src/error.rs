use lab_core::GatewayError;
use thiserror::Error;

/// 存储层错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：把 fred 的传输/协议错误与“取回的值形状不对”两类失败
///   分开，后者通常意味着键被外部写坏而非存储不可用；
/// - **契约 (What)**：所有变体 `Send + Sync + 'static`；通过 `From` 转换为
///   [`GatewayError::KvUnavailable`]，请求路径可直接 `?` 传播。
#[derive(Debug, Error)]
pub enum StoreError {
    /// 底层客户端命令失败（拨号、超时、协议错误）。
    #[error("store command failed: {0}")]
    Command(#[from] fred::error::Error),

    /// 键存在但值无法按预期解释。
    #[error("unexpected value at `{key}`: {detail}")]
    UnexpectedValue { key: String, detail: String },
}

impl From<StoreError> for GatewayError {
    fn from(value: StoreError) -> Self {
        GatewayError::KvUnavailable {
            detail: value.to_string(),
        }
    }
}
