//! 舵机指令类型定义

use crate::ProtocolError;
use crate::constants::{HOME_ANGLE, HOME_SPEED, SERVO_COUNT};
use smallvec::SmallVec;
use std::fmt;
use std::str::FromStr;

/// 单个舵机指令
///
/// 三个字段在构造时即保证是合法整数；非数字或缺失字段的输入在解码阶段
/// 就被拒绝，因此 `Step` 总是可以直接写入串口。
///
/// 协议层不做范围校验（角度、速度、舵机 ID 均原样透传）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Step {
    /// 舵机 ID（1..=6）
    pub servo: i32,
    /// 目标角度（度）
    pub angle: i32,
    /// 速度；回放时同时决定该组之后的等待时间
    pub speed: i32,
}

impl Step {
    /// 创建新的指令
    pub const fn new(servo: i32, angle: i32, speed: i32) -> Self {
        Self {
            servo,
            angle,
            speed,
        }
    }

    /// 归位姿态：舵机 1..=6 依次转到 90°，速度 5
    ///
    /// 顺序即写入顺序（舵机 ID 升序）。
    pub fn homing_pose() -> [Step; SERVO_COUNT as usize] {
        std::array::from_fn(|i| Step::new(i as i32 + 1, HOME_ANGLE, HOME_SPEED))
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.servo, self.angle, self.speed)
    }
}

impl FromStr for Step {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        crate::codec::decode_line(s)
    }
}

/// 指令组
///
/// 组内的指令"同时"执行：回放时连续写入，中间没有延迟。
///
/// 使用 SmallVec 在栈上预留 6 个位置，恰好覆盖一次驱动全部 6 个舵机的情况。
pub type Group = SmallVec<[Step; 6]>;

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    #[test]
    fn test_step_display() {
        let step = Step::new(1, 30, 5);
        assert_eq!(step.to_string(), "1,30,5");

        let negative = Step::new(2, -15, 0);
        assert_eq!(negative.to_string(), "2,-15,0");
    }

    #[test]
    fn test_step_from_str() {
        let step: Step = "3,120,7".parse().unwrap();
        assert_eq!(step, Step::new(3, 120, 7));

        assert!("3,abc,7".parse::<Step>().is_err());
    }

    #[test]
    fn test_homing_pose_order() {
        let pose = Step::homing_pose();
        assert_eq!(pose.len(), 6);
        for (i, step) in pose.iter().enumerate() {
            assert_eq!(step.servo, i as i32 + 1);
            assert_eq!(step.angle, 90);
            assert_eq!(step.speed, 5);
        }
    }

    #[test]
    fn test_group_keeps_order() {
        let group: Group = smallvec![Step::new(4, 10, 1), Step::new(1, 20, 2)];
        assert_eq!(group[0].servo, 4);
        assert_eq!(group[1].servo, 1);
        assert!(!group.spilled());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_step_json_shape() {
        let step = Step::new(1, 30, 5);
        let json = serde_json::to_string(&step).unwrap();
        assert_eq!(json, r#"{"servo":1,"angle":30,"speed":5}"#);
    }
}
