//! 应用层：会话注册表、存活监督、消息分发
//!
//! 定义外部协作方（在线状态存储、消息持久化、好友查询、凭证校验）的接口，
//! 并提供仅依赖内存的测试实现。

pub mod collaborators;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod liveness;
pub mod presence;
pub mod retry;
pub mod session;

pub use collaborators::{ChatRecord, FriendDirectory, GroupRecord, MessageSink, TokenVerifier};
pub use connection::{CloseReason, ConnectionHandle, Outbound, SendRefused, TransportKind};
pub use dispatcher::{Delivery, Dispatcher, DispatcherDependencies};
pub use error::ApplicationError;
pub use liveness::{IdleAction, IdleSupervisor, IdleThresholds, LivenessState};
pub use presence::PresenceStore;
pub use retry::RetryWindow;
pub use session::SessionRegistry;
