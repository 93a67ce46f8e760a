//! # gas 模块说明
//!
//! ## 角色定位（Why）
//! - 把 `/api/v1/gas-profiler/{network}/{action}` 的 REST 形状翻译为上游的
//!   JSON-RPC 方法与参数，REST 客户端无需理解 JSON-RPC 封皮；
//! - 成功时解包 `result` 直接作为响应体；失败按 §错误契约映射状态码。
//!
//! ## 动作映射（What）
//!
//! | action | method | params |
//! |---|---|---|
//! | simulate-block (POST) | `xatu_simulateBlockGas` | `[{blockNumber, gasSchedule, maxGasLimit?}]` |
//! | simulate-transaction (POST) | `xatu_simulateTransactionGas` | `[{transactionHash, blockNumber?, gasSchedule, maxGasLimit?}]` |
//! | gas-schedule (GET `?block=N`) | `xatu_getGasSchedule` | `[blockNumber]` |

use bytes::Bytes;
use http::{Method, Request, Response, StatusCode};
use http_body_util::BodyExt;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use lab_core::ErrorBody;

use crate::body::{BoxError, GatewayBody, error_response, json_response};
use crate::rpc::EndpointPool;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SimulateBlockRequest {
    block_number: u64,
    #[serde(default)]
    gas_schedule: Value,
    #[serde(default)]
    max_gas_limit: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SimulateTransactionRequest {
    transaction_hash: String,
    #[serde(default)]
    block_number: Option<u64>,
    #[serde(default)]
    gas_schedule: Value,
    #[serde(default)]
    max_gas_limit: Option<u64>,
}

/// 处理一条 gas-profiler 请求。
///
/// # 教案式说明
/// - **契约 (What)**：
///   - 未知 action → 404；方法不匹配 → 405；
///   - 请求体/查询参数非法 → 400，文案携带失败原因；
///   - 上游失败的状态映射由 [`EndpointPool::call`] 给出（502/400/503/404）。
pub async fn handle_gas_profiler<B>(
    pool: &EndpointPool,
    req: Request<B>,
    network: &str,
    action: &str,
) -> Response<GatewayBody>
where
    B: http_body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    match action {
        "simulate-block" => {
            if req.method() != Method::POST {
                return method_not_allowed();
            }
            let body = match read_body(req).await {
                Ok(body) => body,
                Err(response) => return *response,
            };
            let parsed: SimulateBlockRequest = match serde_json::from_slice(&body) {
                Ok(parsed) => parsed,
                Err(err) => return bad_request(&format!("invalid request body: {err}")),
            };

            let mut params = Map::new();
            params.insert("blockNumber".to_owned(), json!(parsed.block_number));
            params.insert("gasSchedule".to_owned(), parsed.gas_schedule);
            if let Some(limit) = parsed.max_gas_limit {
                params.insert("maxGasLimit".to_owned(), json!(limit));
            }

            dispatch(pool, network, "xatu_simulateBlockGas", json!([params])).await
        }
        "simulate-transaction" => {
            if req.method() != Method::POST {
                return method_not_allowed();
            }
            let body = match read_body(req).await {
                Ok(body) => body,
                Err(response) => return *response,
            };
            let parsed: SimulateTransactionRequest = match serde_json::from_slice(&body) {
                Ok(parsed) => parsed,
                Err(err) => return bad_request(&format!("invalid request body: {err}")),
            };

            let mut params = Map::new();
            params.insert(
                "transactionHash".to_owned(),
                json!(parsed.transaction_hash),
            );
            if let Some(block) = parsed.block_number {
                params.insert("blockNumber".to_owned(), json!(block));
            }
            params.insert("gasSchedule".to_owned(), parsed.gas_schedule);
            if let Some(limit) = parsed.max_gas_limit {
                params.insert("maxGasLimit".to_owned(), json!(limit));
            }

            dispatch(pool, network, "xatu_simulateTransactionGas", json!([params])).await
        }
        "gas-schedule" => {
            if req.method() != Method::GET {
                return method_not_allowed();
            }
            let Some(block) = block_query_param(req.uri().query()) else {
                return bad_request("missing or invalid `block` query parameter");
            };
            dispatch(pool, network, "xatu_getGasSchedule", json!([block])).await
        }
        _ => json_response(
            StatusCode::NOT_FOUND,
            &ErrorBody::new("unknown gas profiler action"),
        ),
    }
}

async fn dispatch(
    pool: &EndpointPool,
    network: &str,
    method: &str,
    params: Value,
) -> Response<GatewayBody> {
    match pool.call(network, method, params).await {
        Ok(result) => json_response(StatusCode::OK, &result),
        Err(err) => error_response(&err),
    }
}

async fn read_body<B>(req: Request<B>) -> Result<Bytes, Box<Response<GatewayBody>>>
where
    B: http_body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    match req.into_body().collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(_) => Err(Box::new(bad_request("failed to read request body"))),
    }
}

fn bad_request(message: &str) -> Response<GatewayBody> {
    json_response(StatusCode::BAD_REQUEST, &ErrorBody::new(message))
}

fn method_not_allowed() -> Response<GatewayBody> {
    json_response(
        StatusCode::METHOD_NOT_ALLOWED,
        &ErrorBody::new("method not allowed"),
    )
}

/// 从查询串中提取 `block=N`。
fn block_query_param(query: Option<&str>) -> Option<u64> {
    query?
        .split('&')
        .find_map(|segment| segment.strip_prefix("block="))
        .and_then(|value| value.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_param_parses_only_valid_unsigned_values() {
        assert_eq!(block_query_param(Some("block=123")), Some(123));
        assert_eq!(block_query_param(Some("other=1&block=9")), Some(9));
        assert_eq!(block_query_param(Some("block=abc")), None);
        assert_eq!(block_query_param(Some("limit=5")), None);
        assert_eq!(block_query_param(None), None);
    }
}
