//! hyper 服务循环与连接级优雅停机。
//!
//! 接受循环在停机令牌触发后立即停止派发新连接；在飞连接由各自的任务继续
//! 处理，装配层在上限时间内等待计数归零，超时则直接退出（连接随进程终止）。

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::middleware::handle_request;
use crate::state::AppState;

/// 服务循环：接受连接直至令牌取消。
pub async fn serve(
    state: Arc<AppState>,
    listener: TcpListener,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let active = Arc::new(AtomicUsize::new(0));

    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        let (stream, remote_addr) = match accepted {
            Ok(pair) => pair,
            Err(err) => {
                warn!(
                    target: "lab::gateway::server",
                    error = %err,
                    "accept failed; continuing"
                );
                continue;
            }
        };

        let state = Arc::clone(&state);
        let active = Arc::clone(&active);
        active.fetch_add(1, Ordering::AcqRel);
        tokio::spawn(async move {
            serve_connection(state, stream, remote_addr).await;
            active.fetch_sub(1, Ordering::AcqRel);
        });
    }

    drain(&active, state.config.server.shutdown_timeout).await;
    Ok(())
}

async fn serve_connection(state: Arc<AppState>, stream: tokio::net::TcpStream, remote: SocketAddr) {
    let io = TokioIo::new(stream);
    let service = service_fn(move |req| {
        let state = Arc::clone(&state);
        async move { Ok::<_, Infallible>(handle_request(state, req, remote).await) }
    });

    if let Err(err) = auto::Builder::new(TokioExecutor::new())
        .serve_connection(io, service)
        .await
    {
        debug!(
            target: "lab::gateway::server",
            remote = %remote,
            error = %err,
            "connection terminated with error"
        );
    }
}

/// 等待在飞连接收尾，最长等待 `timeout`。
async fn drain(active: &AtomicUsize, timeout: Duration) {
    info!(
        target: "lab::gateway::server",
        in_flight = active.load(Ordering::Acquire),
        "draining connections"
    );
    let started = tokio::time::Instant::now();
    while active.load(Ordering::Acquire) > 0 {
        if started.elapsed() >= timeout {
            warn!(
                target: "lab::gateway::server",
                remaining = active.load(Ordering::Acquire),
                "drain timeout exceeded; abandoning remaining connections"
            );
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
