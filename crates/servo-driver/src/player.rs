//! 序列回放
//!
//! 回放在独立的调度线程中执行，客户端请求只负责抢占状态并提交任务，不会被阻塞。
//!
//! 两种回放方式：
//! - **序列库回放**：先归位（舵机 1..=6 → 90°，速度 5），等待稳定后逐组写出，
//!   组间延迟由该组第一步的速度决定
//! - **文件回放**：逐行写出，固定行间延迟，无效行跳过但仍占用一个时间片，不归位
//!
//! 任一写入失败立即停止本次回放，回到 `Idle`。

use crate::cancellation::{CancelToken, Pacer};
use crate::error::DriverError;
use crate::pipeline::CommandSender;
use crate::state::{AtomicPlayerState, PlayerState};
use crate::store::SequenceStore;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use serde::Deserialize;
use servo_protocol::{Group, ProtocolError, Step, decode_text};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// 归位后等待舵机稳定的时间（毫秒）
pub const HOMING_SETTLE_MS: u64 = 2000;
/// 每单位速度对应的组间延迟（毫秒）
pub const DELAY_PER_SPEED_UNIT_MS: u64 = 50;
/// 文件回放的行间延迟（毫秒）
pub const IMPORT_LINE_DELAY_MS: u64 = 1000;
/// 组间延迟下限（毫秒），速度为 0 或负数时生效
pub const MIN_GROUP_DELAY_MS: u64 = 50;

/// 回放时序配置
///
/// POD 数据，可直接从配置文件反序列化。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub homing_settle_ms: u64,
    pub delay_per_speed_unit_ms: u64,
    pub import_line_delay_ms: u64,
    pub min_group_delay_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            homing_settle_ms: HOMING_SETTLE_MS,
            delay_per_speed_unit_ms: DELAY_PER_SPEED_UNIT_MS,
            import_line_delay_ms: IMPORT_LINE_DELAY_MS,
            min_group_delay_ms: MIN_GROUP_DELAY_MS,
        }
    }
}

impl PlaybackConfig {
    pub fn homing_settle(&self) -> Duration {
        Duration::from_millis(self.homing_settle_ms)
    }

    pub fn import_line_delay(&self) -> Duration {
        Duration::from_millis(self.import_line_delay_ms)
    }

    /// 一组写完后的等待时间：`首步速度 × 每单位延迟`，不低于下限
    pub fn group_delay(&self, group: &[Step]) -> Duration {
        let speed = group.first().map_or(0, |step| step.speed);
        let ms = u64::try_from(speed)
            .unwrap_or(0)
            .saturating_mul(self.delay_per_speed_unit_ms);
        Duration::from_millis(ms.max(self.min_group_delay_ms))
    }
}

/// 回放请求的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayOutcome {
    /// 已开始回放
    Started,
    /// 序列库为空，什么也不做
    EmptyStore,
}

enum PlaybackJob {
    Stored(Vec<Group>),
    File(Vec<Result<Step, ProtocolError>>),
}

struct Scheduler {
    writer: CommandSender,
    pacer: Box<dyn Pacer>,
    config: PlaybackConfig,
    state: Arc<AtomicPlayerState>,
    cancel: CancelToken,
}

/// 回放器
///
/// 持有调度线程；同一时间最多一个回放会话。
pub struct SequencePlayer {
    jobs: Option<Sender<PlaybackJob>>,
    state: Arc<AtomicPlayerState>,
    cancel: CancelToken,
    thread: Option<JoinHandle<()>>,
}

impl SequencePlayer {
    pub(crate) fn spawn(
        writer: CommandSender,
        pacer: Box<dyn Pacer>,
        config: PlaybackConfig,
        cancel: CancelToken,
    ) -> Self {
        let (jobs_tx, jobs_rx) = unbounded();
        let state = Arc::new(AtomicPlayerState::new(PlayerState::Idle));

        let mut scheduler = Scheduler {
            writer,
            pacer,
            config,
            state: state.clone(),
            cancel: cancel.clone(),
        };
        let thread = std::thread::Builder::new()
            .name("servo-player".into())
            .spawn(move || scheduler.run(jobs_rx))
            .ok();
        if thread.is_none() {
            error!("Failed to spawn playback scheduler thread");
        }

        Self {
            jobs: Some(jobs_tx),
            state,
            cancel,
            thread,
        }
    }

    /// 当前状态
    pub fn state(&self) -> PlayerState {
        self.state.get(Ordering::Acquire)
    }

    /// 回放序列库（使用调用时刻的快照）
    pub fn play_stored(&self, store: &SequenceStore) -> Result<PlayOutcome, DriverError> {
        let groups = store.snapshot();
        if groups.is_empty() {
            info!("No stored sequences to play");
            return Ok(PlayOutcome::EmptyStore);
        }

        self.begin(PlayerState::Homing)?;
        self.submit(PlaybackJob::Stored(groups))?;
        Ok(PlayOutcome::Started)
    }

    /// 回放导入的文本
    ///
    /// 先抢占 `ImportPlaying`，再写入暂存文件并读回回放。抢占失败时不触碰暂存文件；
    /// 写入或读回失败时释放状态并把错误返回给调用方。
    pub fn play_import(&self, text: &str, staging: &Path) -> Result<PlayOutcome, DriverError> {
        self.begin(PlayerState::ImportPlaying)?;

        let lines = match stage_import(text, staging) {
            Ok(lines) => lines,
            Err(e) => {
                self.state.set(PlayerState::Idle, Ordering::Release);
                return Err(e);
            },
        };

        info!("Playing {} lines from {}", lines.len(), staging.display());
        self.submit(PlaybackJob::File(lines))?;
        Ok(PlayOutcome::Started)
    }

    fn begin(&self, next: PlayerState) -> Result<(), DriverError> {
        self.state
            .compare_exchange(PlayerState::Idle, next, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|current| {
                warn!("Rejecting playback request, player is {:?}", current);
                DriverError::PlaybackActive(current)
            })
    }

    fn submit(&self, job: PlaybackJob) -> Result<(), DriverError> {
        let sent = match &self.jobs {
            Some(jobs) if self.thread.is_some() => jobs.send(job).is_ok(),
            _ => false,
        };
        if !sent {
            self.state.set(PlayerState::Idle, Ordering::Release);
            return Err(DriverError::ChannelClosed);
        }
        Ok(())
    }

    /// 取消当前回放并等待调度线程退出
    pub(crate) fn shutdown(&mut self) -> Option<JoinHandle<()>> {
        self.cancel.cancel();
        self.jobs.take();
        self.thread.take()
    }
}

fn stage_import(
    text: &str,
    path: &Path,
) -> Result<Vec<Result<Step, ProtocolError>>, DriverError> {
    std::fs::write(path, text).map_err(|e| DriverError::storage(path, e))?;
    info!("Imported text saved to {}", path.display());

    let staged = std::fs::read_to_string(path).map_err(|e| DriverError::storage(path, e))?;
    Ok(decode_text(&staged))
}

impl Scheduler {
    fn run(&mut self, jobs: Receiver<PlaybackJob>) {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let job = match jobs.recv_timeout(Duration::from_millis(100)) {
                Ok(job) => job,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };

            let result = match job {
                PlaybackJob::Stored(groups) => self.play_groups(&groups),
                PlaybackJob::File(lines) => self.play_lines(&lines),
            };

            match result {
                Ok(()) => info!("Playback finished"),
                Err(DriverError::Cancelled) => info!("Playback cancelled"),
                Err(e) => error!("Playback halted: {}", e),
            }
            self.state.set(PlayerState::Idle, Ordering::Release);
        }
    }

    fn pause(&mut self, delay: Duration) -> Result<(), DriverError> {
        if self.pacer.pause(delay, &self.cancel) {
            Ok(())
        } else {
            Err(DriverError::Cancelled)
        }
    }

    fn play_groups(&mut self, groups: &[Group]) -> Result<(), DriverError> {
        info!("Homing servos before playback");
        let homing_started = Instant::now();
        for step in Step::homing_pose() {
            self.writer.send_step(&step)?;
        }
        let settle = self
            .config
            .homing_settle()
            .saturating_sub(homing_started.elapsed());
        self.pause(settle)?;

        self.state.set(PlayerState::Playing, Ordering::Release);
        info!("Playing {} stored groups", groups.len());

        for group in groups {
            for step in group {
                self.writer.send_step(step)?;
            }
            let delay = self.config.group_delay(group);
            self.pause(delay)?;
        }
        Ok(())
    }

    fn play_lines(&mut self, lines: &[Result<Step, ProtocolError>]) -> Result<(), DriverError> {
        let delay = self.config.import_line_delay();
        for (index, line) in lines.iter().enumerate() {
            match line {
                Ok(step) => self.writer.send_step(step)?,
                Err(e) => warn!("Skipping invalid line {}: {}", index + 1, e),
            }
            self.pause(delay)?;
        }
        Ok(())
    }
}
