//! 连接存活监督
//!
//! 每连接一个状态机，由该连接的读循环驱动：
//!
//! ```text
//! ACTIVE --(读空闲超过reader_idle)--> AWAITING_HEARTBEAT --(收到任何读)--> ACTIVE
//! AWAITING_HEARTBEAT --(距上次读超过combined_idle)--> DEAD --> 关闭连接
//! ```
//!
//! 独立的写空闲阈值触发服务端心跳探测而不是关闭。
//! 成本为每个连接事件O(1)，没有全局轮询。

use std::time::{Duration, Instant};

use config::TimeoutConfig;

/// 空闲阈值配置
#[derive(Debug, Clone, Copy)]
pub struct IdleThresholds {
    pub reader_idle: Duration,
    pub writer_idle: Duration,
    pub combined_idle: Duration,
}

impl IdleThresholds {
    pub fn new(reader_idle: Duration, writer_idle: Duration, combined_idle: Duration) -> Self {
        Self {
            reader_idle,
            writer_idle,
            combined_idle,
        }
    }
}

impl From<&TimeoutConfig> for IdleThresholds {
    fn from(config: &TimeoutConfig) -> Self {
        Self::new(
            Duration::from_secs(config.reader_idle_secs),
            Duration::from_secs(config.writer_idle_secs),
            Duration::from_secs(config.combined_idle_secs),
        )
    }
}

/// 连接存活状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessState {
    Active,
    AwaitingHeartbeat,
    Dead,
}

/// 到达截止时刻后要求读循环执行的动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleAction {
    /// 无事可做，继续等待
    Wait,
    /// 进入等待心跳状态（仅记录，不发探测）
    AwaitHeartbeat,
    /// 写空闲：发送服务端心跳探测
    SendProbe,
    /// 综合空闲超限：关闭连接
    Close,
}

/// 每连接的空闲监督器
#[derive(Debug)]
pub struct IdleSupervisor {
    thresholds: IdleThresholds,
    state: LivenessState,
    last_read: Instant,
    last_write: Instant,
}

impl IdleSupervisor {
    pub fn new(thresholds: IdleThresholds, now: Instant) -> Self {
        Self {
            thresholds,
            state: LivenessState::Active,
            last_read: now,
            last_write: now,
        }
    }

    /// 任何入站帧都算读活动，包括心跳
    pub fn on_read(&mut self, now: Instant) {
        self.last_read = now;
        if self.state == LivenessState::AwaitingHeartbeat {
            self.state = LivenessState::Active;
        }
    }

    /// 任何出站帧都算写活动
    pub fn on_write(&mut self, now: Instant) {
        self.last_write = now;
    }

    pub fn state(&self) -> LivenessState {
        self.state
    }

    pub fn is_dead(&self) -> bool {
        self.state == LivenessState::Dead
    }

    /// 下一个需要被唤醒检查的时刻
    pub fn next_deadline(&self) -> Instant {
        let read_deadline = match self.state {
            LivenessState::Active => self.last_read + self.thresholds.reader_idle,
            _ => self.last_read + self.thresholds.combined_idle,
        };
        let write_deadline = self.last_write + self.thresholds.writer_idle;
        read_deadline.min(write_deadline)
    }

    /// 截止时刻到达后评估。按严重程度给出动作：关闭 > 状态转移 > 探测。
    pub fn poll(&mut self, now: Instant) -> IdleAction {
        if self.state == LivenessState::Dead {
            return IdleAction::Close;
        }

        if now.duration_since(self.last_read) >= self.thresholds.combined_idle {
            self.state = LivenessState::Dead;
            return IdleAction::Close;
        }

        if self.state == LivenessState::Active
            && now.duration_since(self.last_read) >= self.thresholds.reader_idle
        {
            self.state = LivenessState::AwaitingHeartbeat;
            return IdleAction::AwaitHeartbeat;
        }

        if now.duration_since(self.last_write) >= self.thresholds.writer_idle {
            // 调用方发出探测后会调用on_write，推进写截止时刻
            return IdleAction::SendProbe;
        }

        IdleAction::Wait
    }
}
