use lab_core::GatewayError;
use thiserror::Error;

/// 策略构造期错误域（仅在启动阶段出现）。
#[derive(Debug, Error)]
pub enum PolicyError {
    /// 策略的路径正则编译失败。
    #[error("pattern for policy `{policy}` failed to compile: {detail}")]
    PatternCompile { policy: String, detail: String },

    /// 策略声明了非法的响应头名或值。
    #[error("policy `{policy}` declares an invalid header: {detail}")]
    InvalidHeader { policy: String, detail: String },

    /// 豁免名单中的条目无法解析为地址或 CIDR。
    #[error("exempt entry `{entry}` is neither an ip address nor a cidr block")]
    InvalidCidr { entry: String },
}

impl From<PolicyError> for GatewayError {
    fn from(value: PolicyError) -> Self {
        match value {
            PolicyError::PatternCompile { policy, detail } => {
                GatewayError::PatternCompileFailed { policy, detail }
            }
            PolicyError::InvalidHeader { policy, detail } => {
                GatewayError::PatternCompileFailed { policy, detail }
            }
            PolicyError::InvalidCidr { entry } => GatewayError::PatternCompileFailed {
                policy: "rate_limit.exempt_ips".to_owned(),
                detail: format!("invalid entry `{entry}`"),
            },
        }
    }
}
