//! `/api/v1/{network}/{rest...}` 的路径解析。

use lab_core::GatewayError;

/// API 路径的解析结果：网络段与剩余路径（不含前导斜杠）。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ApiPath<'a> {
    pub network: &'a str,
    pub rest: &'a str,
}

/// 解析 API 路径。
///
/// # 教案式说明
/// - **契约 (What)**：
///   - 输入必须以 `/api/v1/` 开头且网络段非空，否则返回
///     [`GatewayError::PathInvalid`]（映射 400）；
///   - `rest` 为网络段之后的剩余路径，允许为空（`/api/v1/mainnet`）；
///   - 不做任何百分号解码：网络名是短 ASCII 名，剩余路径按原样转发。
pub fn parse_api_path(path: &str) -> Result<ApiPath<'_>, GatewayError> {
    let Some(tail) = path.strip_prefix("/api/v1/") else {
        return Err(GatewayError::PathInvalid {
            message: "path must start with /api/v1/".to_owned(),
        });
    };

    let (network, rest) = match tail.split_once('/') {
        Some((network, rest)) => (network, rest),
        None => (tail, ""),
    };

    if network.is_empty() {
        return Err(GatewayError::PathInvalid {
            message: "network segment is required".to_owned(),
        });
    }

    Ok(ApiPath { network, rest })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_network_and_rest() {
        let parsed = parse_api_path("/api/v1/mainnet/fct_block/head").expect("parse");
        assert_eq!(parsed.network, "mainnet");
        assert_eq!(parsed.rest, "fct_block/head");
    }

    #[test]
    fn network_without_rest_is_accepted() {
        let parsed = parse_api_path("/api/v1/sepolia").expect("parse");
        assert_eq!(parsed.network, "sepolia");
        assert_eq!(parsed.rest, "");
    }

    #[test]
    fn missing_network_is_invalid() {
        assert!(parse_api_path("/api/v1/").is_err());
        assert!(parse_api_path("/api/v1//fct_block").is_err());
        assert!(parse_api_path("/api/v2/mainnet/x").is_err());
        assert!(parse_api_path("/health").is_err());
    }
}
