//! HTTP 响应体与 JSON 渲染的公共工具。
//!
//! 网关内部统一使用 [`GatewayBody`]（未同步装箱体）：静态 JSON、前端 HTML
//! 与上游流式转发共用一个类型，路由层无需为不同来源的响应做泛型分发。

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{Response, StatusCode};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full};
use serde::Serialize;

use lab_core::GatewayError;

/// 装箱错误类型：跨组件传递时不关心具体错误形状。
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// 网关统一响应体。
pub type GatewayBody = UnsyncBoxBody<Bytes, BoxError>;

/// 空响应体。
pub fn empty_body() -> GatewayBody {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed_unsync()
}

/// 由完整字节构造响应体。
pub fn full_body(bytes: impl Into<Bytes>) -> GatewayBody {
    Full::new(bytes.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

/// 渲染 JSON 响应；序列化失败时退化为 500 空体（静态类型下不应发生）。
pub fn json_response(status: StatusCode, payload: &impl Serialize) -> Response<GatewayBody> {
    let bytes = match serde_json::to_vec(payload) {
        Ok(bytes) => bytes,
        Err(_) => {
            let mut response = Response::new(empty_body());
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            return response;
        }
    };
    let mut response = Response::new(full_body(bytes));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        http::HeaderValue::from_static("application/json; charset=utf-8"),
    );
    response
}

/// 将网关错误渲染为响应（状态码 + JSON 错误体）。
pub fn error_response(err: &GatewayError) -> Response<GatewayBody> {
    let status =
        StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    json_response(status, &err.to_body())
}
