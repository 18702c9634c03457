//! 取消令牌与可中断等待
//!
//! 回放中的所有等待（归位稳定、组间延迟、行间延迟）都通过 [`Pacer`] 完成，
//! 等待期间调度线程可以被 [`CancelToken`] 立即唤醒。目前只有进程关闭会触发取消，
//! 以后增加"停止回放"命令只需在调用方触发同一个令牌。

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: Mutex<bool>,
    cond: Condvar,
}

/// 取消令牌（可克隆，所有克隆共享同一状态）
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

impl CancelToken {
    /// 创建未取消的令牌
    pub fn new() -> Self {
        Self::default()
    }

    /// 触发取消，唤醒所有等待者
    pub fn cancel(&self) {
        let mut cancelled = self.inner.cancelled.lock();
        *cancelled = true;
        self.inner.cond.notify_all();
    }

    /// 是否已取消
    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancelled.lock()
    }

    /// 等待 `timeout`，期间被取消则提前返回
    ///
    /// 返回 `true` 表示已取消。
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut cancelled = self.inner.cancelled.lock();
        while !*cancelled {
            if self.inner.cond.wait_until(&mut cancelled, deadline).timed_out() {
                break;
            }
        }
        *cancelled
    }
}

/// 回放节拍器
///
/// 抽象"暂停一段时间"，生产环境使用 [`RealtimePacer`]，测试中可以替换为
/// 只记录延迟、不真正睡眠的实现。
pub trait Pacer: Send {
    /// 暂停 `delay`
    ///
    /// 返回 `false` 表示等待期间被取消，调用方应停止回放。
    fn pause(&mut self, delay: Duration, cancel: &CancelToken) -> bool;
}

/// 真实时间节拍器（基于条件变量，不忙等）
#[derive(Debug, Default, Clone, Copy)]
pub struct RealtimePacer;

impl Pacer for RealtimePacer {
    fn pause(&mut self, delay: Duration, cancel: &CancelToken) -> bool {
        !cancel.wait_for(delay)
    }
}
