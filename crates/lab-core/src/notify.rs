//! 合并式事件通知原语。
//!
//! 快照提供者（拓扑、边界）每次发布后唤醒订阅者重建派生状态。事件不携带
//! 载荷：消费者把每次唤醒当作“从当前状态整体重建”，因此通道只需单个槽位，
//! 发布端 try-send 失败（前一事件尚未被消费）时直接丢弃即可，效果等价于
//! 事件合并。

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// 单槽位、非阻塞、可丢弃的事件通知器。
///
/// # 教案式说明
/// - **意图 (Why)**：发布端绝不能被慢消费者拖住，也不需要让消费者看到每一次
///   发布——下一次重建读取的总是最新状态；
/// - **契约 (What)**：
///   - [`Notifier::subscribe`] 返回容量为 1 的接收端；
///   - [`Notifier::notify`] 对每个订阅者执行一次 `try_send`，通道满或已关闭
///     时静默跳过；
///   - 订阅者被 drop 后，其发送端在下一次 `notify` 时被回收；
/// - **风险 (Trade-offs)**：事件可能少于发布次数（合并语义，符合契约）；
///   通知器不保证跨订阅者的事件顺序。
#[derive(Debug, Default)]
pub struct Notifier {
    senders: Mutex<Vec<mpsc::Sender<()>>>,
}

impl Notifier {
    /// 创建无订阅者的通知器。
    pub fn new() -> Self {
        Self::default()
    }

    /// 订阅后续事件；返回的接收端每次收到 `()` 代表“状态已更新，请重建”。
    pub fn subscribe(&self) -> mpsc::Receiver<()> {
        let (tx, rx) = mpsc::channel(1);
        self.senders.lock().push(tx);
        rx
    }

    /// 向所有订阅者发布一次事件；挂起事件未消费或订阅者已离场时跳过。
    pub fn notify(&self) {
        let mut senders = self.senders.lock();
        senders.retain(|tx| !tx.is_closed());
        for tx in senders.iter() {
            let _ = tx.try_send(());
        }
    }

    /// 当前存活的订阅者数量（测试与观测用）。
    pub fn subscriber_count(&self) -> usize {
        let mut senders = self.senders.lock();
        senders.retain(|tx| !tx.is_closed());
        senders.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pending_event_coalesces_instead_of_blocking() {
        let notifier = Notifier::new();
        let mut rx = notifier.subscribe();

        notifier.notify();
        notifier.notify();
        notifier.notify();

        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err(), "再次读取应为空：事件已被合并");
    }

    #[tokio::test]
    async fn dropped_subscriber_is_pruned() {
        let notifier = Notifier::new();
        let rx = notifier.subscribe();
        drop(rx);
        notifier.notify();
        assert_eq!(notifier.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn each_subscriber_receives_its_own_wakeup() {
        let notifier = Notifier::new();
        let mut first = notifier.subscribe();
        let mut second = notifier.subscribe();

        notifier.notify();

        assert!(first.recv().await.is_some());
        assert!(second.recv().await.is_some());
    }
}
