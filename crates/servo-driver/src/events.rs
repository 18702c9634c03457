//! 驱动事件广播
//!
//! 驱动内部线程（TX 写线程、设备监听线程）发生需要让所有客户端知道的情况时，
//! 通过 [`EventHub`] 把 [`DriverEvent`] 推送给每个订阅者。
//!
//! 订阅者使用无界 channel，发布方从不阻塞；订阅者被丢弃后下一次发布时自动移除。
//!
//! # 使用示例
//!
//! ```rust
//! use servo_driver::events::{DriverEvent, EventHub};
//!
//! let hub = EventHub::new();
//! let rx = hub.subscribe();
//!
//! hub.publish(DriverEvent::Degraded { reason: "Device disconnected".into() });
//! assert!(matches!(rx.try_recv(), Ok(DriverEvent::Degraded { .. })));
//! ```

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use std::path::PathBuf;

/// 驱动事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEvent {
    /// 串口通道不可用（写入或读取出现致命错误），正在进行的回放已停止
    Degraded { reason: String },

    /// 设备上报的录制无法持久化（内存中的序列库已更新）
    StorageFailed { path: PathBuf, reason: String },
}

/// 事件广播中心
#[derive(Default)]
pub struct EventHub {
    subscribers: Mutex<Vec<Sender<DriverEvent>>>,
}

impl EventHub {
    /// 创建空的广播中心
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// 订阅事件
    pub fn subscribe(&self) -> Receiver<DriverEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// 向所有订阅者发布事件
    pub fn publish(&self, event: DriverEvent) {
        self.subscribers
            .lock()
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    /// 当前订阅者数量
    pub fn len(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// 是否没有订阅者
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
