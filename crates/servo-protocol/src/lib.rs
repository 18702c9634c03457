//! # Servo Protocol
//!
//! 六舵机机械臂串口文本协议定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `step`: 单个舵机指令 `Step` 与同步执行的指令组 `Group`
//! - `codec`: 指令行与文本文件的编码/解码
//! - `device`: 设备主动上报行的解析（序列录制协议）
//! - `constants`: 协议常量定义
//!
//! ## 线路格式
//!
//! ```text
//! 主机 → 设备:  <servo>,<angle>,<speed>\n
//! 设备 → 主机:  SEQUENCE_START
//!               SEQUENCE,<servo>,<angle>,<speed>
//!               SEQUENCE_END
//!               <其他任意信息行>
//! ```

pub mod codec;
pub mod constants;
pub mod device;
pub mod step;

// 重新导出常用类型
pub use codec::*;
pub use constants::*;
pub use device::DeviceLine;
pub use step::{Group, Step};

use thiserror::Error;

/// 协议解析错误类型
///
/// 解析失败的行在上层总是被跳过（记录警告），不会作为失败返回给客户端。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Empty line")]
    EmptyLine,

    #[error("Invalid field count: expected 3, got {actual}")]
    FieldCount { actual: usize },

    #[error("Invalid value for field {field}: {value:?}")]
    InvalidField { field: &'static str, value: String },
}
