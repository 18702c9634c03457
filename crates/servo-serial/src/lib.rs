//! # Servo Serial Adapter Layer
//!
//! 串口硬件抽象层，提供统一的"按行收发"接口。
//!
//! - 发送端（[`TxAdapter`]）：一次写入一条完整命令，不会被其他写入打断
//! - 接收端（[`RxAdapter`]）：按 `\n` 分帧，带超时，便于线程检查退出标志
//!
//! 真实设备使用 [`SerialPortAdapter`]（基于 `serialport`），测试使用
//! `mock` feature 提供的内存适配器。

use thiserror::Error;

pub mod discovery;
pub mod port;

#[cfg(feature = "mock")]
pub mod mock;

pub use discovery::{discover_port, pick_port};
pub use port::{SerialPortAdapter, SerialRx, SerialTx};

/// 串口适配层统一错误类型
#[derive(Error, Debug)]
pub enum SerialError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serial port error: {0}")]
    Port(#[from] serialport::Error),
    #[error("Read timeout")]
    Timeout,
    #[error("No serial device available: {0}")]
    DeviceUnavailable(String),
    #[error("Serial device disconnected")]
    Disconnected,
}

impl SerialError {
    /// 是否为致命错误（继续读写没有意义）
    ///
    /// 超时、被信号中断等属于正常情况，其余均视为通道已损坏。
    pub fn is_fatal(&self) -> bool {
        match self {
            SerialError::Timeout => false,
            SerialError::Io(e) => !matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
            ),
            _ => true,
        }
    }
}

/// 接收端：按行读取设备上报数据
pub trait RxAdapter {
    /// 读取一行（不含行尾 `\r\n`）
    ///
    /// 在读取超时内没有完整的行时返回 [`SerialError::Timeout`]，
    /// 已读到的半行数据保留到下一次调用。
    fn receive(&mut self) -> Result<String, SerialError>;
}

/// 发送端：写入完整命令
pub trait TxAdapter {
    /// 写入一条命令（调用方负责附带结尾的 `\n`）
    ///
    /// 返回前整条命令已写入，不会出现半条命令。
    fn send(&mut self, command: &str) -> Result<(), SerialError>;
}

/// 可拆分为独立收发端的适配器
pub trait SplittableAdapter {
    type RxAdapter: RxAdapter;
    type TxAdapter: TxAdapter;
    fn split(self) -> Result<(Self::RxAdapter, Self::TxAdapter), SerialError>;
}
