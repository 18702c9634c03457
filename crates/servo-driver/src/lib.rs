//! 驱动层模块
//!
//! 本模块提供六舵机机械臂的序列管理与回放功能，包括：
//! - 序列库（设备录制、客户端保存、JSON 持久化、文本导出）
//! - 串行化的串口写入（单步命令与回放步骤不会交错）
//! - 设备监听（`SEQUENCE_START` / `SEQUENCE,...` / `SEQUENCE_END`）
//! - 回放调度（归位 + 按速度计时的组回放、按行计时的文件回放）
//! - 事件广播（通道降级、录制持久化失败）
//!
//! # 快速开始
//!
//! ```no_run
//! use servo_driver::DriverBuilder;
//! use servo_protocol::Step;
//!
//! let driver = DriverBuilder::new().data_dir(".").build().unwrap();
//! driver.move_step(Step::new(1, 90, 5)).unwrap();
//! driver.play_stored().unwrap();
//! ```

mod builder;
pub mod cancellation;
mod driver;
mod error;
pub mod events;
mod pipeline;
pub mod player;
pub mod state;
pub mod store;

pub use builder::{DEFAULT_READ_TIMEOUT_MS, DriverBuilder};
pub use cancellation::{CancelToken, Pacer, RealtimePacer};
pub use driver::ServoDriver;
pub use error::DriverError;
pub use events::{DriverEvent, EventHub};
pub use player::{PlayOutcome, PlaybackConfig};
pub use state::{AtomicPlayerState, PlayerState};
pub use store::{SequenceStore, StorePaths};
