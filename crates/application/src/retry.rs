//! 有界投递重试窗口
//!
//! 接收方本地在线但连接恰好处于关闭竞态时，帧会短暂停泊在这里，
//! 在该用户下一次绑定时冲刷。容量与存活时间都有上限，
//! 溢出与过期都按最旧优先丢弃。容量0表示关闭该机制。

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use domain::{Frame, UserId};
use tracing::debug;

pub struct RetryWindow {
    capacity: usize,
    ttl: Duration,
    parked: Mutex<HashMap<UserId, VecDeque<(Instant, Frame)>>>,
}

impl RetryWindow {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl,
            parked: Mutex::new(HashMap::new()),
        }
    }

    pub fn disabled() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// 停泊一帧待重试。窗口已满时丢弃最旧的一帧。
    pub fn park(&self, user_id: UserId, frame: Frame) {
        if self.capacity == 0 {
            return;
        }
        let mut parked = self.parked.lock().unwrap();
        let queue = parked.entry(user_id).or_default();
        Self::expire(queue, self.ttl);
        if queue.len() >= self.capacity {
            queue.pop_front();
            debug!(user_id = %user_id, "重试窗口已满，丢弃最旧帧");
        }
        queue.push_back((Instant::now(), frame));
    }

    /// 取出某用户所有未过期的停泊帧（用户重新绑定时调用）
    pub fn drain(&self, user_id: UserId) -> Vec<Frame> {
        let mut parked = self.parked.lock().unwrap();
        let Some(mut queue) = parked.remove(&user_id) else {
            return Vec::new();
        };
        Self::expire(&mut queue, self.ttl);
        queue.into_iter().map(|(_, frame)| frame).collect()
    }

    fn expire(queue: &mut VecDeque<(Instant, Frame)>, ttl: Duration) {
        let now = Instant::now();
        while let Some((parked_at, _)) = queue.front() {
            if now.duration_since(*parked_at) >= ttl {
                queue.pop_front();
            } else {
                break;
            }
        }
    }
}
