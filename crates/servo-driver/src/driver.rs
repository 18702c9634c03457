//! 舵机控制器对外接口
//!
//! [`ServoDriver`] 持有三个后台线程：
//! - TX 线程：串行化所有串口写入
//! - RX 线程：监听设备上报的录制
//! - 回放调度线程
//!
//! 客户端的每个操作都对应一个方法，可以从任意线程并发调用。

use crate::cancellation::{CancelToken, Pacer, RealtimePacer};
use crate::error::DriverError;
use crate::events::{DriverEvent, EventHub};
use crate::pipeline::{CommandSender, WriteRequest, rx_loop, tx_loop};
use crate::player::{PlayOutcome, PlaybackConfig, SequencePlayer};
use crate::state::PlayerState;
use crate::store::SequenceStore;
use crossbeam_channel::{Receiver, unbounded};
use servo_protocol::{Group, Step};
use servo_serial::{RxAdapter, SplittableAdapter, TxAdapter};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{JoinHandle, spawn};
use std::time::Duration;
use tracing::error;

/// Extension trait for timeout-capable thread joins
trait JoinTimeout {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()>;
}

impl<T: Send + 'static> JoinTimeout for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()> {
        let (tx, rx) = crossbeam_channel::bounded(1);

        spawn(move || {
            let result = self.join();
            // 接收端可能已超时
            let _ = tx.send(result);
        });

        match rx.recv_timeout(timeout) {
            Ok(join_result) => join_result.map(|_| ()),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => Err(Box::new(
                std::io::Error::new(std::io::ErrorKind::TimedOut, "Thread join timeout"),
            )),
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                Err(Box::new(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "Thread panicked during join",
                )))
            },
        }
    }
}

/// 六舵机控制器
pub struct ServoDriver {
    writer: CommandSender,
    store: Arc<SequenceStore>,
    player: SequencePlayer,
    events: Arc<EventHub>,
    /// 串口健康标志（写入或读取出现致命错误后为 false）
    healthy: Arc<AtomicBool>,
    /// 运行标志（用于线程生命周期联动）
    is_running: Arc<AtomicBool>,
    rx_thread: Option<JoinHandle<()>>,
    tx_thread: Option<JoinHandle<()>>,
}

impl ServoDriver {
    /// 使用已拆分的收发适配器创建控制器（实时节拍）
    pub fn new<R, T>(rx: R, tx: T, store: SequenceStore, config: PlaybackConfig) -> Self
    where
        R: RxAdapter + Send + 'static,
        T: TxAdapter + Send + 'static,
    {
        Self::with_pacer(rx, tx, store, config, RealtimePacer)
    }

    /// 使用自定义节拍器创建控制器
    pub fn with_pacer<R, T, P>(
        rx: R,
        tx: T,
        store: SequenceStore,
        config: PlaybackConfig,
        pacer: P,
    ) -> Self
    where
        R: RxAdapter + Send + 'static,
        T: TxAdapter + Send + 'static,
        P: Pacer + 'static,
    {
        let store = Arc::new(store);
        let events = Arc::new(EventHub::new());
        let healthy = Arc::new(AtomicBool::new(true));
        let is_running = Arc::new(AtomicBool::new(true));
        let (req_tx, req_rx) = unbounded::<WriteRequest>();

        let tx_thread = {
            let healthy = healthy.clone();
            let is_running = is_running.clone();
            let events = events.clone();
            spawn(move || tx_loop(tx, req_rx, healthy, is_running, events))
        };

        let rx_thread = {
            let store = store.clone();
            let healthy = healthy.clone();
            let is_running = is_running.clone();
            let events = events.clone();
            spawn(move || rx_loop(rx, store, healthy, is_running, events))
        };

        let writer = CommandSender::new(req_tx, healthy.clone());
        let player = SequencePlayer::spawn(
            writer.clone(),
            Box::new(pacer),
            config,
            CancelToken::new(),
        );

        Self {
            writer,
            store,
            player,
            events,
            healthy,
            is_running,
            rx_thread: Some(rx_thread),
            tx_thread: Some(tx_thread),
        }
    }

    /// 从可拆分的串口适配器创建控制器
    pub fn from_adapter<A>(
        adapter: A,
        store: SequenceStore,
        config: PlaybackConfig,
    ) -> Result<Self, DriverError>
    where
        A: SplittableAdapter,
        A::RxAdapter: Send + 'static,
        A::TxAdapter: Send + 'static,
    {
        let (rx, tx) = adapter.split()?;
        Ok(Self::new(rx, tx, store, config))
    }

    /// 立即写出一步（排在正在进行的写入之后）
    pub fn move_step(&self, step: Step) -> Result<(), DriverError> {
        self.writer.send_step(&step)
    }

    /// 把客户端提交的序列保存为一个新组
    pub fn save_sequence(&self, group: Group) -> Result<PathBuf, DriverError> {
        self.store.record_sequence(group)
    }

    /// 当前序列库快照
    pub fn sequences(&self) -> Vec<Group> {
        self.store.snapshot()
    }

    /// 回放序列库
    pub fn play_stored(&self) -> Result<PlayOutcome, DriverError> {
        self.player.play_stored(&self.store)
    }

    /// 导出序列库为文本文件
    pub fn export_text(&self) -> Result<PathBuf, DriverError> {
        self.store.export_text()
    }

    /// 导入文本：写入暂存文件后按文件回放
    ///
    /// 有回放进行中时直接拒绝，不覆盖暂存文件。
    pub fn import_and_play(&self, text: &str) -> Result<PlayOutcome, DriverError> {
        self.player.play_import(text, &self.store.paths().import_file)
    }

    /// 订阅驱动事件
    pub fn subscribe(&self) -> Receiver<DriverEvent> {
        self.events.subscribe()
    }

    /// 当前回放状态
    pub fn player_state(&self) -> PlayerState {
        self.player.state()
    }

    /// 串口通道是否可用
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// 序列库
    pub fn store(&self) -> &SequenceStore {
        &self.store
    }
}

impl Drop for ServoDriver {
    fn drop(&mut self) {
        let join_timeout = Duration::from_secs(2);

        // 先停回放（正在进行的写入仍能完成），再停 IO 线程
        if let Some(handle) = self.player.shutdown()
            && let Err(_e) = handle.join_timeout(join_timeout)
        {
            error!(
                "Playback thread panicked or failed to shut down within {:?}",
                join_timeout
            );
        }

        // Release: 所有之前的写入对其他线程可见
        self.is_running.store(false, Ordering::Release);

        if let Some(handle) = self.rx_thread.take()
            && let Err(_e) = handle.join_timeout(join_timeout)
        {
            error!(
                "RX thread panicked or failed to shut down within {:?}",
                join_timeout
            );
        }

        if let Some(handle) = self.tx_thread.take()
            && let Err(_e) = handle.join_timeout(join_timeout)
        {
            error!(
                "TX thread panicked or failed to shut down within {:?}",
                join_timeout
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StorePaths;
    use servo_serial::mock::{mock_rx, mock_tx};
    use smallvec::smallvec;
    use tempfile::tempdir;

    #[test]
    fn test_move_step_writes_line() {
        let dir = tempdir().unwrap();
        let (rx, _feeder) = mock_rx(Duration::from_millis(10));
        let (tx, handle) = mock_tx();
        let driver = ServoDriver::new(
            rx,
            tx,
            SequenceStore::new(StorePaths::in_dir(dir.path())),
            PlaybackConfig::default(),
        );

        driver.move_step(Step::new(3, 45, 2)).unwrap();
        assert_eq!(handle.lines(), vec!["3,45,2"]);
        assert!(driver.is_healthy());
        assert_eq!(driver.player_state(), PlayerState::Idle);
    }

    #[test]
    fn test_save_and_list_sequences() {
        let dir = tempdir().unwrap();
        let (rx, _feeder) = mock_rx(Duration::from_millis(10));
        let (tx, _handle) = mock_tx();
        let driver = ServoDriver::new(
            rx,
            tx,
            SequenceStore::new(StorePaths::in_dir(dir.path())),
            PlaybackConfig::default(),
        );

        let path = driver
            .save_sequence(smallvec![Step::new(1, 30, 5)])
            .unwrap();
        assert!(path.ends_with("sequences.json"));
        assert_eq!(driver.sequences().len(), 1);
    }

    #[test]
    fn test_play_empty_store_is_noop() {
        let dir = tempdir().unwrap();
        let (rx, _feeder) = mock_rx(Duration::from_millis(10));
        let (tx, handle) = mock_tx();
        let driver = ServoDriver::new(
            rx,
            tx,
            SequenceStore::new(StorePaths::in_dir(dir.path())),
            PlaybackConfig::default(),
        );

        assert_eq!(driver.play_stored().unwrap(), PlayOutcome::EmptyStore);
        assert_eq!(driver.player_state(), PlayerState::Idle);
        assert_eq!(handle.line_count(), 0);
    }

    #[test]
    fn test_drop_while_playing_returns_promptly() {
        let dir = tempdir().unwrap();
        let (rx, _feeder) = mock_rx(Duration::from_millis(10));
        let (tx, _handle) = mock_tx();
        let driver = ServoDriver::new(
            rx,
            tx,
            SequenceStore::new(StorePaths::in_dir(dir.path())),
            PlaybackConfig::default(),
        );
        driver
            .save_sequence(smallvec![Step::new(1, 30, 100)])
            .unwrap();
        driver.play_stored().unwrap();

        let start = std::time::Instant::now();
        drop(driver);
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
