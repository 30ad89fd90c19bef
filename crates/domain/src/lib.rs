//! IM传输层核心领域模型
//!
//! 包含二进制协议帧、指令模型、标识类型，以及相关的协议规则。
//! 本crate不做任何I/O。

pub mod command;
pub mod errors;
pub mod protocol;
pub mod value_objects;

// 重新导出常用类型
pub use command::*;
pub use errors::*;
pub use protocol::*;
pub use value_objects::*;
