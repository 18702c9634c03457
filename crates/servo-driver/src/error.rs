//! 驱动层错误类型定义

use crate::state::PlayerState;
use servo_protocol::ProtocolError;
use servo_serial::SerialError;
use std::path::PathBuf;
use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// 串口错误（包括启动时找不到设备）
    #[error("Serial error: {0}")]
    Serial(#[from] SerialError),

    /// 协议解析错误
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 文件读写失败（内存中的序列库不受影响）
    #[error("Storage error at {}: {source}", .path.display())]
    Storage {
        path: PathBuf,
        source: std::io::Error,
    },

    /// 序列库序列化/反序列化失败
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// 写入串口失败
    #[error("Channel write failed: {0}")]
    ChannelWrite(String),

    /// 串口已降级（此前发生过致命写入错误），拒绝新的写入
    #[error("Serial channel degraded, writes are disabled")]
    Degraded,

    /// 命令通道已关闭（TX 线程退出）
    #[error("Command channel closed")]
    ChannelClosed,

    /// 已有回放在进行中
    #[error("Playback already active (state: {0:?})")]
    PlaybackActive(PlayerState),

    /// 回放被取消（进程关闭）
    #[error("Playback cancelled")]
    Cancelled,

    /// 无效输入（如空序列）
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl DriverError {
    /// 是否为启动时找不到串口设备
    pub fn is_device_unavailable(&self) -> bool {
        matches!(self, DriverError::Serial(SerialError::DeviceUnavailable(_)))
    }

    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DriverError::Storage {
            path: path.into(),
            source,
        }
    }
}
