//! 内存 Mock 适配器（`mock` feature）
//!
//! - [`MockTx`]：逐字节写入共享缓冲区，模拟慢速串口，便于检测命令交错
//! - [`MockRx`]：从 channel 读取"设备上报"的行
//!
//! # 示例
//!
//! ```rust
//! use servo_serial::mock::{mock_rx, mock_tx};
//! use servo_serial::{RxAdapter, TxAdapter};
//! use std::time::Duration;
//!
//! let (mut tx, handle) = mock_tx();
//! tx.send("1,90,5\n").unwrap();
//! assert_eq!(handle.lines(), vec!["1,90,5".to_string()]);
//!
//! let (mut rx, feeder) = mock_rx(Duration::from_millis(10));
//! feeder.send("SEQUENCE_START".to_string()).unwrap();
//! assert_eq!(rx.receive().unwrap(), "SEQUENCE_START");
//! ```

use crate::{RxAdapter, SerialError, TxAdapter};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Default)]
struct TxShared {
    /// 原始字节流（逐字节追加）
    bytes: Mutex<Vec<u8>>,
    /// 为 true 时所有写入返回断开错误
    failing: AtomicBool,
}

/// Mock 发送端
pub struct MockTx {
    shared: Arc<TxShared>,
    byte_delay: Duration,
}

impl MockTx {
    /// 每写一个字节后等待 `delay`（模拟低波特率）
    pub fn with_byte_delay(mut self, delay: Duration) -> Self {
        self.byte_delay = delay;
        self
    }
}

impl TxAdapter for MockTx {
    fn send(&mut self, command: &str) -> Result<(), SerialError> {
        if self.shared.failing.load(Ordering::Acquire) {
            return Err(SerialError::Disconnected);
        }

        for &b in command.as_bytes() {
            self.shared.bytes.lock().push(b);
            if self.byte_delay.is_zero() {
                std::thread::yield_now();
            } else {
                std::thread::sleep(self.byte_delay);
            }
        }
        Ok(())
    }
}

/// Mock 发送端的观察句柄（测试侧持有）
#[derive(Clone)]
pub struct MockTxHandle {
    shared: Arc<TxShared>,
}

impl MockTxHandle {
    /// 已写入的原始字节流
    pub fn raw(&self) -> String {
        String::from_utf8_lossy(&self.shared.bytes.lock()).into_owned()
    }

    /// 已写入的完整行（不含 `\n`）
    pub fn lines(&self) -> Vec<String> {
        self.raw().lines().map(str::to_string).collect()
    }

    /// 已写入的完整行数
    pub fn line_count(&self) -> usize {
        self.shared.bytes.lock().iter().filter(|&&b| b == b'\n').count()
    }

    /// 模拟串口断开（之后的写入全部失败）
    pub fn set_failing(&self, failing: bool) {
        self.shared.failing.store(failing, Ordering::Release);
    }
}

/// 创建 Mock 发送端及其观察句柄
pub fn mock_tx() -> (MockTx, MockTxHandle) {
    let shared = Arc::new(TxShared::default());
    (
        MockTx {
            shared: shared.clone(),
            byte_delay: Duration::ZERO,
        },
        MockTxHandle { shared },
    )
}

/// Mock 接收端
pub struct MockRx {
    lines: Receiver<String>,
    timeout: Duration,
}

impl RxAdapter for MockRx {
    fn receive(&mut self) -> Result<String, SerialError> {
        match self.lines.recv_timeout(self.timeout) {
            Ok(line) => Ok(line),
            Err(RecvTimeoutError::Timeout) => Err(SerialError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(SerialError::Disconnected),
        }
    }
}

/// 创建 Mock 接收端及其"设备"输入端
///
/// 丢弃返回的 `Sender` 等价于拔掉设备（接收端返回 `Disconnected`）。
pub fn mock_rx(timeout: Duration) -> (MockRx, Sender<String>) {
    let (tx, rx) = unbounded();
    (MockRx { lines: rx, timeout }, tx)
}
