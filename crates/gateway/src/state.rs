//! 网关共享状态

use std::sync::Arc;

use application::{Dispatcher, IdleThresholds, TokenVerifier};

/// 两个传输入口共享的状态
#[derive(Clone)]
pub struct GatewayState {
    pub dispatcher: Arc<Dispatcher>,
    /// WebSocket握手阶段的令牌校验（原生通道在带内认证，走分发器）
    pub verifier: Arc<dyn TokenVerifier>,
    pub thresholds: IdleThresholds,
    pub max_frame_bytes: usize,
}
