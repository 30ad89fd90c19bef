//! 传输网关
//!
//! 同一套会话与分发逻辑暴露两个入口：原生二进制协议的TCP端口，
//! 以及浏览器使用的WebSocket端口。

pub mod codec;
pub mod state;
pub mod tcp;
pub mod ws;

pub use codec::{CodecError, FrameCodec};
pub use state::GatewayState;
pub use ws::{router, WsEnvelope};
