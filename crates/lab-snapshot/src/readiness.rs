//! 启动就绪门。
//!
//! 副本在开始对外服务前必须观测到一次非空发布（自己是领导者时由自己发布，
//! 否则等待现任领导者）。门的节奏是协议常量：每 500ms 轮询一次，最多 30s，
//! 超时让进程 fail-fast 而不是带着空状态上线。

use std::future::Future;
use std::time::Duration;

use crate::error::SnapshotError;

/// 默认就绪等待上限。
pub(crate) const READY_TIMEOUT: Duration = Duration::from_secs(30);
/// 就绪轮询间隔。
pub(crate) const READY_POLL: Duration = Duration::from_millis(500);

/// 以固定节奏轮询 `probe`，直到其返回 `true` 或超时。
pub(crate) async fn wait_until<F, Fut>(
    what: &'static str,
    timeout: Duration,
    poll: Duration,
    mut probe: F,
) -> Result<(), SnapshotError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let started = tokio::time::Instant::now();
    loop {
        if probe().await {
            return Ok(());
        }
        if started.elapsed() >= timeout {
            return Err(SnapshotError::Readiness { what });
        }
        tokio::time::sleep(poll).await;
    }
}
