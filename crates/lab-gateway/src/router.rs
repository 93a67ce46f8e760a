//! # router 模块说明
//!
//! ## 分发表（What）
//! - `/health`、`/metrics`：固定 Handler；
//! - `/api/v1/config`（GET）：合并目录 + 特性开关的发布快照；
//! - `/api/v1/gas-profiler/{network}/{action}`：健康门控 RPC 代理；
//! - `/api/v1/{network}/bounds`（GET）：边界快照读取；
//! - `/api/v1/{network}/...`：反向代理；
//! - 其余路径：按路由预热的前端 HTML。
//!
//! 分发次序从精确前缀到模式：gas-profiler 在通配的网络代理之前，bounds
//! 在代理转发之前拦截。

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{Method, Request, Response, StatusCode};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;

use lab_core::{ErrorBody, GatewayError};
use lab_proxy::body::{BoxError, GatewayBody, error_response, full_body, json_response};
use lab_proxy::{gas, parse_api_path};

use crate::state::AppState;

/// 把请求分发到对应 Handler。
pub async fn dispatch<B>(
    state: &Arc<AppState>,
    req: Request<B>,
    remote_addr: SocketAddr,
) -> Response<GatewayBody>
where
    B: http_body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError> + Send,
{
    let path = req.uri().path().to_owned();

    match path.as_str() {
        "/health" => health(state).await,
        "/metrics" => metrics(state),
        "/api/v1/config" => {
            if req.method() != Method::GET {
                return method_not_allowed();
            }
            config_snapshot(state).await
        }
        _ if path.starts_with("/api/v1/gas-profiler/") => {
            let tail = &path["/api/v1/gas-profiler/".len()..];
            let Some((network, action)) = tail.split_once('/') else {
                return json_response(
                    StatusCode::NOT_FOUND,
                    &ErrorBody::new("unknown gas profiler action"),
                );
            };
            let network = network.to_owned();
            let action = action.to_owned();
            gas::handle_gas_profiler(&state.rpc_pool, req, &network, &action).await
        }
        _ if path.starts_with("/api/v1/") => {
            if let Ok(parsed) = parse_api_path(&path) {
                if parsed.rest == "bounds" && req.method() == Method::GET {
                    let network = parsed.network.to_owned();
                    return network_bounds(state, &network).await;
                }
            }
            state.proxy.handle(req, Some(remote_addr)).await
        }
        _ => frontend(state, req.method(), &path),
    }
}

/// 存活探测：进程在即 200，附带存储可达性。
async fn health(state: &Arc<AppState>) -> Response<GatewayBody> {
    let store = match state.store.ping().await {
        Ok(()) => "up",
        Err(_) => "down",
    };
    json_response(StatusCode::OK, &json!({"status": "ok", "store": store}))
}

/// prometheus 文本导出。
fn metrics(state: &Arc<AppState>) -> Response<GatewayBody> {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if encoder
        .encode(&state.registry.gather(), &mut buffer)
        .is_err()
    {
        let mut response = Response::new(full_body(Bytes::new()));
        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        return response;
    }

    let mut response = Response::new(full_body(buffer));
    if let Ok(content_type) = encoder.format_type().parse() {
        response.headers_mut().insert(CONTENT_TYPE, content_type);
    }
    response
}

/// `/api/v1/config`：合并目录 + 特性开关。
async fn config_snapshot(state: &Arc<AppState>) -> Response<GatewayBody> {
    match state.topology.merged_networks().await {
        Ok(networks) => {
            let snapshot =
                crate::view::build_config_snapshot(&networks, &state.config.features);
            json_response(StatusCode::OK, &snapshot)
        }
        Err(err) => error_response(&GatewayError::from(err)),
    }
}

/// `/api/v1/{network}/bounds`：边界快照读取。
async fn network_bounds(state: &Arc<AppState>, network: &str) -> Response<GatewayBody> {
    match state.bounds.bounds(network).await {
        Ok(Some(data)) => json_response(StatusCode::OK, &data.tables),
        Ok(None) => {
            // 区分“网络不存在”与“快照尚未发布”。
            match state.topology.merged_networks().await {
                Ok(networks) if !networks.contains_key(network) => {
                    error_response(&GatewayError::NetworkUnknown {
                        network: network.to_owned(),
                    })
                }
                _ => json_response(
                    StatusCode::SERVICE_UNAVAILABLE,
                    &ErrorBody::new("bounds not yet available").with_network(network),
                ),
            }
        }
        Err(err) => error_response(&GatewayError::from(err)),
    }
}

/// 其余路径：预热的前端 HTML。
fn frontend(state: &Arc<AppState>, method: &Method, path: &str) -> Response<GatewayBody> {
    if method != Method::GET {
        return method_not_allowed();
    }
    let html = state.route_cache.lookup(path);
    let mut response = Response::new(full_body(html));
    response.headers_mut().insert(
        CONTENT_TYPE,
        http::HeaderValue::from_static("text/html; charset=utf-8"),
    );
    response
}

fn method_not_allowed() -> Response<GatewayBody> {
    json_response(
        StatusCode::METHOD_NOT_ALLOWED,
        &ErrorBody::new("method not allowed"),
    )
}
