//! 反向代理转发的端到端回归：真实上游、完整改写链路。

mod support;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use http::{Request, StatusCode};
use http_body_util::{BodyExt, Full};
use parking_lot::Mutex;

use lab_core::wallclock::WallclockRegistry;
use lab_proxy::NetworkProxy;
use support::{Handler, json_body, spawn_upstream};

fn mainnet_wallclock() -> Arc<WallclockRegistry> {
    let registry = Arc::new(WallclockRegistry::new());
    registry.register("mainnet", 1_606_824_023, 12);
    registry
}

#[tokio::test(flavor = "multi_thread")]
async fn slot_filter_is_rewritten_before_reaching_the_backend() {
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_in_handler = Arc::clone(&seen);
    let handler: Handler = Arc::new(move |req| {
        let seen = Arc::clone(&seen_in_handler);
        Box::pin(async move {
            let path_and_query = req
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str().to_owned())
                .unwrap_or_default();
            seen.lock().push(path_and_query);
            json_body(StatusCode::OK, r#"{"rows":[]}"#.to_owned())
        })
    });
    let upstream = spawn_upstream(handler).await;

    let proxy = NetworkProxy::new(mainnet_wallclock(), HashSet::new()).expect("construct proxy");
    proxy.add_network("mainnet", &format!("http://{upstream}"));

    let request = Request::builder()
        .uri("/api/v1/mainnet/fct_block?slot_eq=1000")
        .body(Full::new(Bytes::new()))
        .expect("build request");
    let response = proxy.handle(request, None).await;

    assert_eq!(response.status(), StatusCode::OK);
    let observed = seen.lock().clone();
    assert_eq!(
        observed,
        vec!["/api/v1/fct_block?slot_start_date_time_eq=1606836023".to_owned()],
        "网络段剥除 + 槽位过滤改写必须在上游可见"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn non_2xx_upstream_responses_pass_through_unchanged() {
    let handler: Handler = Arc::new(|_req| {
        Box::pin(async move {
            json_body(
                StatusCode::UNPROCESSABLE_ENTITY,
                r#"{"error":"bad filter"}"#.to_owned(),
            )
        })
    });
    let upstream = spawn_upstream(handler).await;

    let proxy = NetworkProxy::new(mainnet_wallclock(), HashSet::new()).expect("construct proxy");
    proxy.add_network("mainnet", &format!("http://{upstream}"));

    let request = Request::builder()
        .uri("/api/v1/mainnet/fct_block")
        .body(Full::new(Bytes::new()))
        .expect("build request");
    let response = proxy.handle(request, None).await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = response
        .into_body()
        .collect()
        .await
        .expect("collect body")
        .to_bytes();
    assert_eq!(body.as_ref(), br#"{"error":"bad filter"}"#);
}

#[tokio::test(flavor = "multi_thread")]
async fn forwarded_headers_reach_the_backend() {
    let hits = Arc::new(AtomicUsize::new(0));
    let seen: Arc<Mutex<Vec<(Option<String>, Option<String>)>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_in_handler = Arc::clone(&seen);
    let hits_in_handler = Arc::clone(&hits);
    let handler: Handler = Arc::new(move |req| {
        let seen = Arc::clone(&seen_in_handler);
        let hits = Arc::clone(&hits_in_handler);
        Box::pin(async move {
            hits.fetch_add(1, Ordering::SeqCst);
            let forwarded_for = req
                .headers()
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            let forwarded_proto = req
                .headers()
                .get("x-forwarded-proto")
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            seen.lock().push((forwarded_for, forwarded_proto));
            json_body(StatusCode::OK, "{}".to_owned())
        })
    });
    let upstream = spawn_upstream(handler).await;

    let proxy = NetworkProxy::new(mainnet_wallclock(), HashSet::new()).expect("construct proxy");
    proxy.add_network("mainnet", &format!("http://{upstream}"));

    let request = Request::builder()
        .uri("/api/v1/mainnet/fct_block")
        .body(Full::new(Bytes::new()))
        .expect("build request");
    let remote = "203.0.113.7:41000".parse().expect("socket addr");
    let response = proxy.handle(request, Some(remote)).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    let observed = seen.lock().clone();
    assert_eq!(
        observed,
        vec![(Some("203.0.113.7".to_owned()), Some("http".to_owned()))]
    );
}
