//! Builder 模式实现
//!
//! 提供链式构造 `ServoDriver` 实例的便捷方式。

use crate::driver::ServoDriver;
use crate::error::DriverError;
use crate::player::PlaybackConfig;
use crate::store::{SequenceStore, StorePaths};
use servo_protocol::DEFAULT_BAUD_RATE;
use servo_serial::{SerialPortAdapter, discover_port};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// 串口读取超时（RX 线程借此检查运行标志）
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 100;

/// ServoDriver Builder（链式构造）
///
/// # Example
///
/// ```no_run
/// use servo_driver::{DriverBuilder, PlaybackConfig};
///
/// // 自动发现串口，使用默认配置
/// let driver = DriverBuilder::new().build().unwrap();
///
/// // 指定串口和数据目录，启动时恢复序列库
/// let driver = DriverBuilder::new()
///     .port("/dev/ttyACM0")
///     .baud_rate(9600)
///     .data_dir("/var/lib/servo")
///     .restore(true)
///     .playback_config(PlaybackConfig::default())
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct DriverBuilder {
    /// 串口路径（None 表示自动发现）
    port: Option<String>,
    baud_rate: u32,
    read_timeout: Duration,
    paths: StorePaths,
    playback: PlaybackConfig,
    /// 启动时是否从序列库文件恢复
    restore: bool,
}

impl Default for DriverBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DriverBuilder {
    pub fn new() -> Self {
        Self {
            port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
            paths: StorePaths::default(),
            playback: PlaybackConfig::default(),
            restore: false,
        }
    }

    /// 指定串口路径（可选，默认自动发现）
    pub fn port(mut self, port: impl Into<String>) -> Self {
        self.port = Some(port.into());
        self
    }

    /// 设置波特率（默认 9600）
    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// 在指定目录下存放序列库、导出和导入文件
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.paths = StorePaths::in_dir(dir.into());
        self
    }

    /// 分别指定各文件路径
    pub fn store_paths(mut self, paths: StorePaths) -> Self {
        self.paths = paths;
        self
    }

    pub fn playback_config(mut self, config: PlaybackConfig) -> Self {
        self.playback = config;
        self
    }

    /// 启动时从序列库文件恢复（默认关闭，每次启动都是空库）
    pub fn restore(mut self, restore: bool) -> Self {
        self.restore = restore;
        self
    }

    /// 构建 ServoDriver 实例
    ///
    /// 找不到串口设备时返回 [`DriverError::Serial`]（`DeviceUnavailable`），
    /// 由调用方决定是否退出进程。
    pub fn build(self) -> Result<ServoDriver, DriverError> {
        let store = self.build_store()?;

        let port = match self.port {
            Some(port) => port,
            None => discover_port()?,
        };
        let adapter = SerialPortAdapter::open(&port, self.baud_rate, self.read_timeout)?;

        info!("Serial port {} ready at {} baud", port, self.baud_rate);
        ServoDriver::from_adapter(adapter, store, self.playback)
    }

    fn build_store(&self) -> Result<SequenceStore, DriverError> {
        if self.restore {
            SequenceStore::load(self.paths.clone())
        } else {
            Ok(SequenceStore::new(self.paths.clone()))
        }
    }
}
