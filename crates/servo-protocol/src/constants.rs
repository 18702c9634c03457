//! 协议常量定义
//!
//! 集中定义所有协议相关的常量，避免在代码中散落"魔法数"。

/// 舵机数量（ID 从 1 开始连续编号）
pub const SERVO_COUNT: i32 = 6;

/// 归位姿态的角度（度）
pub const HOME_ANGLE: i32 = 90;

/// 归位时使用的速度
pub const HOME_SPEED: i32 = 5;

/// 串口默认波特率
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// 设备开始上报录制序列
pub const SEQUENCE_START: &str = "SEQUENCE_START";

/// 设备结束上报录制序列
pub const SEQUENCE_END: &str = "SEQUENCE_END";

/// 设备上报的单个录制步骤前缀（后接 `servo,angle,speed`）
pub const SEQUENCE_STEP_PREFIX: &str = "SEQUENCE,";

/// 字段分隔符
pub const FIELD_SEPARATOR: char = ',';
