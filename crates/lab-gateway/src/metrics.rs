//! 请求面指标。
//!
//! 路由标签取固定的低基数桶（`proxy`、`bounds`、`config`、`gas-profiler`、
//! `health`、`metrics`、`frontend`），绝不把原始路径当标签——网络名与表名
//! 会把时间序列基数炸开。

use std::time::Duration;

use http::Method;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};

/// HTTP 服务面的指标句柄。
#[derive(Clone)]
pub struct HttpMetrics {
    requests: IntCounterVec,
    duration: HistogramVec,
    response_bytes: HistogramVec,
}

impl HttpMetrics {
    /// 在给定注册表中注册全部指标。
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let requests = IntCounterVec::new(
            Opts::new("lab_http_requests_total", "HTTP requests by method, route and status"),
            &["method", "route", "status"],
        )?;
        let duration = HistogramVec::new(
            HistogramOpts::new(
                "lab_http_request_duration_seconds",
                "HTTP request latency by route",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ]),
            &["route"],
        )?;
        let response_bytes = HistogramVec::new(
            HistogramOpts::new("lab_http_response_bytes", "HTTP response sizes by route")
                .buckets(prometheus::exponential_buckets(64.0, 4.0, 10)?),
            &["route"],
        )?;
        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(duration.clone()))?;
        registry.register(Box::new(response_bytes.clone()))?;
        Ok(Self {
            requests,
            duration,
            response_bytes,
        })
    }

    /// 记录一条已完成请求。
    pub fn observe(
        &self,
        method: &Method,
        route: &'static str,
        status: u16,
        elapsed: Duration,
        bytes: u64,
    ) {
        self.requests
            .with_label_values(&[method.as_str(), route, &status.to_string()])
            .inc();
        self.duration
            .with_label_values(&[route])
            .observe(elapsed.as_secs_f64());
        self.response_bytes
            .with_label_values(&[route])
            .observe(bytes as f64);
    }
}

/// 把请求路径折叠为低基数路由标签。
pub fn route_label(path: &str) -> &'static str {
    match path {
        "/health" => "health",
        "/metrics" => "metrics",
        "/api/v1/config" => "config",
        _ if path.starts_with("/api/v1/gas-profiler/") => "gas-profiler",
        _ if path.starts_with("/api/v1/") => {
            if path.ends_with("/bounds") {
                "bounds"
            } else {
                "proxy"
            }
        }
        _ => "frontend",
    }
}
