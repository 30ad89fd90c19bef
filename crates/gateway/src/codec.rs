//! 二进制帧编解码器
//!
//! 解码分两步：先凑齐20字节头部并校验魔数和声明长度，再等完整帧
//! 到齐后一次性消费。魔数错误和超长帧是致命错误（读取位置已不可
//! 信），未知的指令/状态字节对应的帧被整帧丢弃后继续解下一帧，
//! 不向流上报错误，连接保持存活。

use bytes::{Buf, BufMut, BytesMut};
use domain::{
    Frame, MessageType, ProtocolError, SerializerTag, Status, HEADER_LEN, LENGTH_FIELD_OFFSET,
    MAGIC_NUMBER, VERSION,
};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct FrameCodec {
    max_frame_bytes: usize,
}

impl FrameCodec {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self { max_frame_bytes }
    }
}

/// 解析一个已完整消费的帧体（魔数之后的部分）
fn parse_frame(mut body: BytesMut) -> Result<Frame, ProtocolError> {
    body.advance(4);
    let version = body.get_u8();
    if version != VERSION {
        // 版本不匹配按当前版本尽力解析
        warn!(version, expected = VERSION, "协议版本不匹配");
    }
    let serializer = SerializerTag::try_from(body.get_u8())?;
    let message_type = MessageType::try_from(body.get_u8())?;
    let status = Status::try_from(body.get_u8())?;
    let message_id = body.get_u64();
    body.advance(4); // 长度字段已用

    Ok(Frame {
        serializer,
        message_type,
        status,
        message_id,
        payload: body.to_vec(),
    })
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, CodecError> {
        loop {
            if src.len() < HEADER_LEN {
                src.reserve(HEADER_LEN - src.len());
                return Ok(None);
            }

            let magic = u32::from_be_bytes([src[0], src[1], src[2], src[3]]);
            if magic != MAGIC_NUMBER {
                return Err(ProtocolError::InvalidMagic { found: magic }.into());
            }

            let payload_len = u32::from_be_bytes([
                src[LENGTH_FIELD_OFFSET],
                src[LENGTH_FIELD_OFFSET + 1],
                src[LENGTH_FIELD_OFFSET + 2],
                src[LENGTH_FIELD_OFFSET + 3],
            ]) as usize;
            if payload_len > self.max_frame_bytes {
                return Err(ProtocolError::FrameTooLarge {
                    declared: payload_len,
                    max: self.max_frame_bytes,
                }
                .into());
            }

            let total = HEADER_LEN + payload_len;
            if src.len() < total {
                src.reserve(total - src.len());
                return Ok(None);
            }

            // 帧已完整，先整帧消费再解析：解析失败时读取位置仍然对齐。
            // 报错会导致上层Framed熔断整条流，因此无法识别的帧在这里
            // 丢弃并继续解下一帧，不向流上报错误。
            match parse_frame(src.split_to(total)) {
                Ok(frame) => return Ok(Some(frame)),
                Err(err) => {
                    warn!(error = %err, "丢弃无法识别的帧");
                }
            }
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), CodecError> {
        dst.reserve(frame.encoded_len());
        dst.put_u32(MAGIC_NUMBER);
        dst.put_u8(VERSION);
        dst.put_u8(frame.serializer.as_byte());
        dst.put_u8(frame.message_type.as_byte());
        dst.put_u8(frame.status.as_byte());
        dst.put_u64(frame.message_id);
        dst.put_u32(frame.payload.len() as u32);
        dst.put_slice(&frame.payload);
        Ok(())
    }
}
