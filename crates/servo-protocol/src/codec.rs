//! 指令编解码
//!
//! 纯函数，不持有任何状态：
//! - 单条指令 ↔ 串口文本行（`servo,angle,speed\n`）
//! - 整个序列 ↔ 文本文件
//!
//! ## 文本文件中的组边界
//!
//! 导出时组内指令逐行排列，组与组之间用一个空行分隔：
//!
//! ```text
//! 1,30,5
//! 2,60,5
//!
//! 3,90,10
//! ```
//!
//! 导入时空行被忽略，每个非空行解码为一个单指令组。因此只有"扁平"序列
//! （每组恰好一条指令）在 导出 → 导入 后保持不变。

use crate::constants::FIELD_SEPARATOR;
use crate::step::{Group, Step};
use crate::ProtocolError;
use smallvec::smallvec;

/// 编码单条指令为串口命令行（带结尾换行）
///
/// # Example
///
/// ```
/// use servo_protocol::{Step, encode_step};
///
/// assert_eq!(encode_step(&Step::new(1, 90, 5)), "1,90,5\n");
/// ```
pub fn encode_step(step: &Step) -> String {
    format!("{}\n", step)
}

/// 解码一行 `servo,angle,speed`
///
/// 每个字段去除首尾空白（兼容 `\r\n` 行尾），必须恰好有三个字段，
/// 且每个字段都是十进制整数。空行返回 [`ProtocolError::EmptyLine`]，
/// 调用方应在解码前过滤空行。
pub fn decode_line(line: &str) -> Result<Step, ProtocolError> {
    if line.trim().is_empty() {
        return Err(ProtocolError::EmptyLine);
    }

    let fields: Vec<&str> = line.split(FIELD_SEPARATOR).map(str::trim).collect();
    if fields.len() != 3 {
        return Err(ProtocolError::FieldCount {
            actual: fields.len(),
        });
    }

    Ok(Step {
        servo: parse_field("servo", fields[0])?,
        angle: parse_field("angle", fields[1])?,
        speed: parse_field("speed", fields[2])?,
    })
}

fn parse_field(field: &'static str, value: &str) -> Result<i32, ProtocolError> {
    value.parse::<i32>().map_err(|_| ProtocolError::InvalidField {
        field,
        value: value.to_string(),
    })
}

/// 编码整个序列为文本
///
/// 组内指令用 `\n` 连接，组之间用 `\n\n` 连接，末尾不带换行。
pub fn encode_sequence_text(groups: &[Group]) -> String {
    groups
        .iter()
        .map(|group| group.iter().map(Step::to_string).collect::<Vec<_>>().join("\n"))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// 迭代文本中的非空行
pub fn non_blank_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines().filter(|line| !line.trim().is_empty())
}

/// 逐行解码文本（跳过空行，保留每行的解码结果）
///
/// 文件回放需要知道每个非空行的位置（解码失败的行也占用一个时间片），
/// 所以这里不丢弃错误。
pub fn decode_text(text: &str) -> Vec<Result<Step, ProtocolError>> {
    non_blank_lines(text).map(decode_line).collect()
}

/// 将文本解码为扁平序列（每组一条指令，无效行被丢弃）
pub fn decode_flat_sequence(text: &str) -> Vec<Group> {
    decode_text(text)
        .into_iter()
        .filter_map(Result::ok)
        .map(|step| -> Group { smallvec![step] })
        .collect()
}
