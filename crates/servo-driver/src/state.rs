//! 回放状态机定义
//!
//! ```text
//! Idle ──play_stored──▶ Homing ──settle──▶ Playing ──last group──▶ Idle
//! Idle ──play_import──▶ ImportPlaying ─────────────last line───▶ Idle
//! ```
//!
//! 同一时间只允许一个回放会话：只有 `Idle` 才能切换到其他状态
//! （见 [`AtomicPlayerState::compare_exchange`]）。

use std::sync::atomic::{AtomicU8, Ordering};

/// 回放器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum PlayerState {
    /// 空闲（默认）
    #[default]
    Idle = 0,

    /// 归位中：舵机 1..=6 转到 90°，等待稳定
    Homing = 1,

    /// 正在回放序列库
    Playing = 2,

    /// 正在回放导入的文本文件
    ImportPlaying = 3,
}

impl PlayerState {
    /// 转换为 u8
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// 从 u8 转换（无效值返回 Idle）
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Homing,
            2 => Self::Playing,
            3 => Self::ImportPlaying,
            _ => Self::Idle,
        }
    }

    /// 是否空闲
    pub fn is_idle(self) -> bool {
        self == Self::Idle
    }
}

/// 回放器状态（原子版本，用于线程间共享）
///
/// 调度线程推进状态，客户端线程读取状态并通过 CAS 抢占 `Idle`。
#[derive(Debug, Default)]
pub struct AtomicPlayerState {
    inner: AtomicU8,
}

impl AtomicPlayerState {
    /// 创建新的原子状态
    pub fn new(state: PlayerState) -> Self {
        Self {
            inner: AtomicU8::new(state.as_u8()),
        }
    }

    /// 获取当前状态
    pub fn get(&self, ordering: Ordering) -> PlayerState {
        PlayerState::from_u8(self.inner.load(ordering))
    }

    /// 设置状态
    pub fn set(&self, state: PlayerState, ordering: Ordering) {
        self.inner.store(state.as_u8(), ordering);
    }

    /// 比较并交换
    ///
    /// 成功返回 `Ok(())`，失败返回实际的当前状态。
    pub fn compare_exchange(
        &self,
        current: PlayerState,
        new: PlayerState,
        success: Ordering,
        failure: Ordering,
    ) -> Result<(), PlayerState> {
        self.inner
            .compare_exchange(current.as_u8(), new.as_u8(), success, failure)
            .map(|_| ())
            .map_err(PlayerState::from_u8)
    }
}
