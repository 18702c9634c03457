//! 客户端线协议
//!
//! 每条消息是一行 JSON 对象：`{"event": <名称>, "data": <负载>}`。
//!
//! 客户端 → 守护进程：
//!
//! | event | data |
//! |---|---|
//! | `move` | `{"servo":1,"angle":90,"speed":5}` |
//! | `saveSequence` | `[{"servo":..}, ...]` |
//! | `getSequences` | 无 |
//! | `playSequence` | 无 |
//! | `downloadTxt` | 无 |
//! | `importTxt` | 文本内容（字符串） |
//!
//! 守护进程 → 客户端：`sequencesList`、`txtReady`、`notice`、`degraded`。

use serde::{Deserialize, Serialize};
use serde_json::Value;
use servo_protocol::{Group, Step};

/// 客户端提交的步骤
///
/// 字段可以是数字或数字字符串；缺失或无法转换的字段使整个步骤无效。
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct WireStep {
    pub servo: Value,
    pub angle: Value,
    pub speed: Value,
}

impl WireStep {
    /// 转换为 [`Step`]，无效时返回 None
    pub fn to_step(&self) -> Option<Step> {
        Some(Step::new(
            coerce_int(&self.servo)?,
            coerce_int(&self.angle)?,
            coerce_int(&self.speed)?,
        ))
    }
}

fn coerce_int(value: &Value) -> Option<i32> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i32::try_from(i).ok()
            } else {
                // 3.0 这样的整数值浮点数也接受
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && *f >= i32::MIN as f64 && *f <= i32::MAX as f64)
                    .map(|f| f as i32)
            }
        },
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// 客户端请求
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientRequest {
    Move(WireStep),
    SaveSequence(Vec<WireStep>),
    GetSequences,
    PlaySequence,
    DownloadTxt,
    ImportTxt(String),
}

/// 服务端事件
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// 序列库快照
    SequencesList(Vec<Group>),
    /// 导出完成，携带文件位置
    TxtReady(String),
    /// 非致命提示（存储失败、回放忙、空序列库等）
    Notice(String),
    /// 串口通道不可用
    Degraded(String),
}

impl ServerEvent {
    /// 编码为一行 JSON（带结尾换行）
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}
