use std::path::PathBuf;

use lab_core::GatewayError;
use thiserror::Error;

/// 前端缓存层错误域。
#[derive(Debug, Error)]
pub enum FrontendError {
    /// 资产文件不可读。
    #[error("failed to read frontend asset `{path}`: {source}")]
    Asset {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `head.json` 解析失败。
    #[error("failed to parse head.json: {0}")]
    HeadJson(#[from] serde_json::Error),

    /// 基底 HTML 缺失 `<head>` 标签。
    #[error("index.html has no <head> tag to inject after")]
    MissingHeadOpen,

    /// 基底 HTML 缺失 `</head>` 标签。
    #[error("index.html has no </head> tag to inject before")]
    MissingHeadClose,
}

impl From<FrontendError> for GatewayError {
    fn from(value: FrontendError) -> Self {
        GatewayError::InjectionFailed {
            detail: value.to_string(),
        }
    }
}
