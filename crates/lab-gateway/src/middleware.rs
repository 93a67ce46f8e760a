//! # middleware 模块说明
//!
//! ## 链序（What，外 → 内）
//! 1. **恢复**：Handler panic 折叠为 500，绝不撕掉连接；
//! 2. **请求日志**：方法、路径、状态、耗时、字节数、对端地址、UA；
//! 3. **指标**：计数器 + 时延直方图 + 响应体积直方图；
//! 4. **CORS**：仅作用于 `/api/*`，OPTIONS 预检短路 204；
//! 5. **响应头策略**：首个命中模式的头写入响应（Handler 自己设置的同名头
//!    优先——策略头只补缺不覆盖）；
//! 6. **限流**：滑动窗口判定；命中规则的每条响应都携带
//!    `X-RateLimit-{Limit,Remaining,Reset}`；
//! 7. **Handler**：路由分发（见 `router`）。

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use futures::FutureExt;
use http::header::{HeaderName, HeaderValue, RETRY_AFTER, USER_AGENT};
use http::{Method, Request, Response, StatusCode};
use http_body::Body as _;
use tracing::{error, info};

use lab_core::{ErrorBody, GatewayError};
use lab_policy::{RateLimitDecision, RateLimitVerdict, extract_client_ip};
use lab_proxy::body::{BoxError, GatewayBody, empty_body, error_response, json_response};

use crate::metrics::route_label;
use crate::router;
use crate::state::AppState;

const HEADER_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const HEADER_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const HEADER_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// 完整中间件链的入口：hyper 服务闭包直接调用它。
pub async fn handle_request<B>(
    state: Arc<AppState>,
    req: Request<B>,
    remote_addr: SocketAddr,
) -> Response<GatewayBody>
where
    B: http_body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError> + Send,
{
    let started = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let route = route_label(&path);
    let user_agent = req
        .headers()
        .get(USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("-")
        .to_owned();

    // 恢复层：任何 Handler panic 都折叠为 500。
    let response = match std::panic::AssertUnwindSafe(process(&state, req, remote_addr))
        .catch_unwind()
        .await
    {
        Ok(response) => response,
        Err(panic) => {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_owned())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_owned());
            error!(
                target: "lab::gateway::http",
                %method,
                path = %path,
                panic = %detail,
                "handler panicked"
            );
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &ErrorBody::new("internal server error"),
            )
        }
    };

    let status = response.status().as_u16();
    let elapsed = started.elapsed();
    let bytes = response.body().size_hint().exact().unwrap_or(0);
    info!(
        target: "lab::gateway::http",
        method = %method,
        path = %path,
        status,
        duration_ms = elapsed.as_millis() as u64,
        bytes,
        remote = %remote_addr,
        user_agent = %user_agent,
        "request completed"
    );
    state.metrics.observe(&method, route, status, elapsed, bytes);

    response
}

async fn process<B>(
    state: &Arc<AppState>,
    req: Request<B>,
    remote_addr: SocketAddr,
) -> Response<GatewayBody>
where
    B: http_body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError> + Send,
{
    let path = req.uri().path().to_owned();
    let is_api = path.starts_with("/api/");

    // CORS 预检短路：不进入策略与分发。
    if is_api && req.method() == Method::OPTIONS {
        let mut response = Response::new(empty_body());
        *response.status_mut() = StatusCode::NO_CONTENT;
        apply_cors(&mut response);
        return response;
    }

    // 响应头策略在 Handler 之前求值（头在响应侧落地，Handler 优先）。
    let policy_headers = state
        .header_policies
        .match_path(&path)
        .map(|(_, headers)| headers.clone());

    // 限流。
    let client_ip = extract_client_ip(req.headers(), Some(remote_addr));
    let verdict = match state.rate_limiter.check(client_ip, &path).await {
        RateLimitDecision::Unlimited | RateLimitDecision::FailedOpen => None,
        RateLimitDecision::FailedClosed => {
            let mut response = json_response(
                StatusCode::TOO_MANY_REQUESTS,
                &ErrorBody::new("service unavailable"),
            );
            if is_api {
                apply_cors(&mut response);
            }
            return response;
        }
        RateLimitDecision::Limited(verdict) => {
            if !verdict.allowed {
                let mut response = error_response(&GatewayError::RateLimited {
                    retry_after: verdict.retry_after,
                });
                apply_rate_limit_headers(&mut response, &verdict);
                if let Ok(value) = HeaderValue::from_str(&verdict.retry_after.to_string()) {
                    response.headers_mut().insert(RETRY_AFTER, value);
                }
                if is_api {
                    apply_cors(&mut response);
                }
                return response;
            }
            Some(verdict)
        }
    };

    let mut response = router::dispatch(state, req, remote_addr).await;

    if let Some(verdict) = verdict {
        apply_rate_limit_headers(&mut response, &verdict);
    }
    if let Some(headers) = policy_headers {
        for (name, value) in &headers {
            // 策略头只补缺：Handler（或上游）已设置的同名头优先。
            if !response.headers().contains_key(name) {
                response.headers_mut().insert(name.clone(), value.clone());
            }
        }
    }
    if is_api {
        apply_cors(&mut response);
    }

    response
}

fn apply_rate_limit_headers(response: &mut Response<GatewayBody>, verdict: &RateLimitVerdict) {
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&verdict.limit.to_string()) {
        headers.insert(HEADER_LIMIT, value);
    }
    if let Ok(value) = HeaderValue::from_str(&verdict.remaining.to_string()) {
        headers.insert(HEADER_REMAINING, value);
    }
    if let Ok(value) = HeaderValue::from_str(&verdict.reset_at.to_string()) {
        headers.insert(HEADER_RESET, value);
    }
}

fn apply_cors(response: &mut Response<GatewayBody>) {
    let headers = response.headers_mut();
    headers.insert(
        "access-control-allow-origin",
        HeaderValue::from_static("*"),
    );
    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        "access-control-allow-headers",
        HeaderValue::from_static("Content-Type, Authorization"),
    );
}
