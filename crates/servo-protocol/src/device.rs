//! 设备上报行解析
//!
//! 设备可以主动发起一次序列录制：
//!
//! ```text
//! SEQUENCE_START
//! SEQUENCE,1,30,5
//! SEQUENCE,2,60,10
//! SEQUENCE_END
//! ```
//!
//! 其余任何行都是设备的调试/状态输出，原样透传。

use crate::ProtocolError;
use crate::codec::decode_line;
use crate::constants::{SEQUENCE_END, SEQUENCE_START, SEQUENCE_STEP_PREFIX};
use crate::step::Step;

/// 一行设备上报数据的解析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceLine<'a> {
    /// 开始录制（清空序列库）
    SequenceStart,
    /// 结束录制（持久化序列库）
    SequenceEnd,
    /// 录制的一个步骤；解码失败时携带错误，由调用方决定丢弃
    SequenceStep(Result<Step, ProtocolError>),
    /// 非协议行（信息输出）
    Info(&'a str),
}

impl<'a> DeviceLine<'a> {
    /// 解析一行（行尾的 `\r`/`\n` 会被去除）
    ///
    /// 起止标记按前缀匹配，与设备固件的输出习惯保持一致。
    pub fn parse(line: &'a str) -> Self {
        let line = line.trim_end_matches(['\r', '\n']);

        if line.starts_with(SEQUENCE_START) {
            DeviceLine::SequenceStart
        } else if line.starts_with(SEQUENCE_END) {
            DeviceLine::SequenceEnd
        } else if let Some(payload) = line.strip_prefix(SEQUENCE_STEP_PREFIX) {
            DeviceLine::SequenceStep(decode_line(payload))
        } else {
            DeviceLine::Info(line)
        }
    }
}
