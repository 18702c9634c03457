//! IO 线程主循环
//!
//! - [`tx_loop`]：唯一的串口写线程。所有写入（客户端单步、回放步骤）都经由同一个
//!   FIFO 队列，逐条完整写出，不会在字节层面交错。
//! - [`rx_loop`]：设备监听线程。读取设备上报的行，驱动序列库的录制流程。

use crate::error::DriverError;
use crate::events::{DriverEvent, EventHub};
use crate::store::SequenceStore;
use crossbeam_channel::{Receiver, Sender, bounded};
use servo_protocol::{DeviceLine, Step, encode_step};
use servo_serial::{RxAdapter, SerialError, TxAdapter};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// 写请求：一行完整命令及其完成回执
pub(crate) struct WriteRequest {
    pub command: String,
    pub reply: Sender<Result<(), String>>,
}

/// 写队列的发送句柄（可克隆）
///
/// [`send_step`](Self::send_step) 会阻塞到该行被完整写出（或失败），
/// 调用方据此保证"写完之后才开始计时"。
#[derive(Clone)]
pub(crate) struct CommandSender {
    requests: Sender<WriteRequest>,
    healthy: Arc<AtomicBool>,
}

impl CommandSender {
    pub fn new(requests: Sender<WriteRequest>, healthy: Arc<AtomicBool>) -> Self {
        Self { requests, healthy }
    }

    /// 编码并写出一步，等待写入完成
    pub fn send_step(&self, step: &Step) -> Result<(), DriverError> {
        if !self.healthy.load(Ordering::Acquire) {
            return Err(DriverError::Degraded);
        }

        let (reply_tx, reply_rx) = bounded(1);
        self.requests
            .send(WriteRequest {
                command: encode_step(step),
                reply: reply_tx,
            })
            .map_err(|_| self.closed_error())?;

        match reply_rx.recv() {
            Ok(result) => result.map_err(DriverError::ChannelWrite),
            Err(_) => Err(self.closed_error()),
        }
    }

    fn closed_error(&self) -> DriverError {
        if self.healthy.load(Ordering::Acquire) {
            DriverError::ChannelClosed
        } else {
            DriverError::Degraded
        }
    }
}

/// TX 线程主循环
///
/// 按到达顺序逐条写出命令。出现致命写入错误时：
/// 1. 当前请求收到错误回执
/// 2. `healthy` 置为 false，后续写入直接返回 [`DriverError::Degraded`]
/// 3. 广播 [`DriverEvent::Degraded`]，线程退出
///
/// # 参数
/// - `tx`: TX 适配器（只写）
/// - `requests`: 写请求队列
/// - `healthy`: 通道健康标志
/// - `is_running`: 运行标志（用于生命周期联动）
/// - `events`: 事件广播中心
pub(crate) fn tx_loop(
    mut tx: impl TxAdapter,
    requests: Receiver<WriteRequest>,
    healthy: Arc<AtomicBool>,
    is_running: Arc<AtomicBool>,
    events: Arc<EventHub>,
) {
    loop {
        if !is_running.load(Ordering::Acquire) {
            trace!("TX thread: is_running flag is false, exiting");
            break;
        }

        let request = match requests.recv_timeout(Duration::from_millis(100)) {
            Ok(request) => request,
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                trace!("TX thread: command channel disconnected");
                break;
            },
        };

        debug!("Sending: {}", request.command.trim_end());
        match tx.send(&request.command) {
            Ok(()) => {
                // 调用方可能已放弃等待
                let _ = request.reply.send(Ok(()));
            },
            Err(e) => {
                error!("TX thread: Failed to write command: {}", e);
                let _ = request.reply.send(Err(e.to_string()));

                if e.is_fatal() {
                    error!("TX thread: Fatal error detected, serial channel degraded");
                    healthy.store(false, Ordering::Release);
                    events.publish(DriverEvent::Degraded {
                        reason: e.to_string(),
                    });
                    break;
                }
            },
        }
    }

    // 拒绝队列中剩余的请求
    let healthy_now = healthy.load(Ordering::Acquire);
    while let Ok(request) = requests.try_recv() {
        let reason = if healthy_now {
            "driver shutting down".to_string()
        } else {
            "serial channel degraded".to_string()
        };
        let _ = request.reply.send(Err(reason));
    }
}

/// RX 线程主循环（设备监听）
///
/// 读取超时是正常情况；非致命错误记录后继续；
/// 致命错误（设备断开）将通道标记为不健康并广播降级事件后退出。
pub(crate) fn rx_loop(
    mut rx: impl RxAdapter,
    store: Arc<SequenceStore>,
    healthy: Arc<AtomicBool>,
    is_running: Arc<AtomicBool>,
    events: Arc<EventHub>,
) {
    loop {
        if !is_running.load(Ordering::Acquire) {
            trace!("RX thread: is_running flag is false, exiting");
            break;
        }

        let line = match rx.receive() {
            Ok(line) => line,
            Err(SerialError::Timeout) => continue,
            Err(e) if !e.is_fatal() => {
                warn!("RX thread: Serial read error: {}", e);
                continue;
            },
            Err(e) => {
                // 关闭过程中串口被释放属于正常退出
                if !is_running.load(Ordering::Acquire) {
                    break;
                }
                error!("RX thread: Fatal error detected: {}", e);
                healthy.store(false, Ordering::Release);
                events.publish(DriverEvent::Degraded {
                    reason: e.to_string(),
                });
                break;
            },
        };

        handle_device_line(&line, &store, &events);
    }
}

/// 处理设备上报的一行
pub(crate) fn handle_device_line(line: &str, store: &SequenceStore, events: &EventHub) {
    match DeviceLine::parse(line) {
        DeviceLine::SequenceStart => {
            info!("Device started a sequence capture");
            store.begin_capture();
        },
        DeviceLine::SequenceStep(Ok(step)) => {
            debug!("Captured step {}", step);
            store.append_captured_step(step);
        },
        DeviceLine::SequenceStep(Err(e)) => {
            warn!("Ignoring malformed sequence line {:?}: {}", line, e);
        },
        DeviceLine::SequenceEnd => match store.end_capture() {
            Ok(path) => info!("Device sequence captured and saved to {}", path.display()),
            Err(e) => {
                error!("Failed to persist captured sequence: {}", e);
                events.publish(DriverEvent::StorageFailed {
                    path: store.paths().store_file.clone(),
                    reason: e.to_string(),
                });
            },
        },
        DeviceLine::Info(text) if text.trim().is_empty() => {},
        DeviceLine::Info(text) => info!(target: "device", "{}", text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StorePaths;
    use crossbeam_channel::unbounded;
    use servo_serial::mock::{mock_rx, mock_tx};
    use std::thread;
    use std::time::Instant;
    use tempfile::tempdir;

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_tx_loop_writes_in_order() {
        let (tx, handle) = mock_tx();
        let (req_tx, req_rx) = unbounded();
        let healthy = Arc::new(AtomicBool::new(true));
        let is_running = Arc::new(AtomicBool::new(true));
        let events = Arc::new(EventHub::new());

        let thread = {
            let healthy = healthy.clone();
            let is_running = is_running.clone();
            thread::spawn(move || tx_loop(tx, req_rx, healthy, is_running, events))
        };

        let sender = CommandSender::new(req_tx, healthy);
        sender.send_step(&Step::new(1, 30, 5)).unwrap();
        sender.send_step(&Step::new(2, 60, 10)).unwrap();
        assert_eq!(handle.lines(), vec!["1,30,5", "2,60,10"]);

        is_running.store(false, Ordering::Release);
        thread.join().unwrap();
    }

    #[test]
    fn test_tx_loop_fatal_error_degrades_channel() {
        let (tx, handle) = mock_tx();
        let (req_tx, req_rx) = unbounded();
        let healthy = Arc::new(AtomicBool::new(true));
        let is_running = Arc::new(AtomicBool::new(true));
        let events = Arc::new(EventHub::new());
        let subscriber = events.subscribe();

        let thread = {
            let healthy = healthy.clone();
            thread::spawn(move || tx_loop(tx, req_rx, healthy, is_running, events))
        };

        handle.set_failing(true);
        let sender = CommandSender::new(req_tx, healthy.clone());
        assert!(matches!(
            sender.send_step(&Step::new(1, 30, 5)),
            Err(DriverError::ChannelWrite(_))
        ));

        thread.join().unwrap();
        assert!(!healthy.load(Ordering::Acquire));
        assert!(matches!(
            subscriber.try_recv(),
            Ok(DriverEvent::Degraded { .. })
        ));

        // 后续写入快速失败
        assert!(matches!(
            sender.send_step(&Step::new(1, 30, 5)),
            Err(DriverError::Degraded)
        ));
    }

    #[test]
    fn test_device_capture_flow() {
        let dir = tempdir().unwrap();
        let store = SequenceStore::new(StorePaths::in_dir(dir.path()));
        let events = EventHub::new();

        for line in [
            "SEQUENCE_START",
            "SEQUENCE,1,30,5",
            "SEQUENCE,oops",
            "SEQUENCE,2,60,10",
            "Servo 1 ready",
            "SEQUENCE_END",
        ] {
            handle_device_line(line, &store, &events);
        }

        let groups = store.snapshot();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].to_vec(), vec![Step::new(1, 30, 5)]);
        assert_eq!(groups[1].to_vec(), vec![Step::new(2, 60, 10)]);
        assert!(store.paths().store_file.exists());
    }

    #[test]
    fn test_device_capture_storage_failure_broadcasts() {
        let dir = tempdir().unwrap();
        let store = SequenceStore::new(StorePaths::in_dir(dir.path().join("missing")));
        let events = EventHub::new();
        let subscriber = events.subscribe();

        handle_device_line("SEQUENCE_START", &store, &events);
        handle_device_line("SEQUENCE,1,30,5", &store, &events);
        handle_device_line("SEQUENCE_END", &store, &events);

        assert!(matches!(
            subscriber.try_recv(),
            Ok(DriverEvent::StorageFailed { .. })
        ));
        // 内存中的录制仍然有效
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_rx_loop_drives_store() {
        let dir = tempdir().unwrap();
        let store = Arc::new(SequenceStore::new(StorePaths::in_dir(dir.path())));
        let (rx, feeder) = mock_rx(Duration::from_millis(10));
        let healthy = Arc::new(AtomicBool::new(true));
        let is_running = Arc::new(AtomicBool::new(true));
        let events = Arc::new(EventHub::new());
        let subscriber = events.subscribe();

        let thread = {
            let store = store.clone();
            let healthy = healthy.clone();
            thread::spawn(move || rx_loop(rx, store, healthy, is_running, events))
        };

        for line in ["SEQUENCE_START", "SEQUENCE,4,120,3", "SEQUENCE_END"] {
            feeder.send(line.to_string()).unwrap();
        }
        let store_file = store.paths().store_file.clone();
        assert!(wait_until(|| store_file.exists()));
        assert_eq!(store.snapshot()[0][0], Step::new(4, 120, 3));

        // 设备断开
        drop(feeder);
        thread.join().unwrap();
        assert!(!healthy.load(Ordering::Acquire));
        assert!(matches!(
            subscriber.try_recv(),
            Ok(DriverEvent::Degraded { .. })
        ));
    }
}
