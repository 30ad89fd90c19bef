//! 原生二进制协议的TCP入口
//!
//! 每个连接两个任务：读循环（本函数内）负责解码、空闲监督和指令
//! 分发，写任务消费连接句柄的出站通道。关闭总是先走句柄，保证
//! 解绑和下线扇出只发生一次。

use std::net::SocketAddr;
use std::time::Instant;

use application::{CloseReason, ConnectionHandle, IdleAction, IdleSupervisor, Outbound, TransportKind};
use domain::{Command, Frame, UserId};
use futures_util::stream::{SplitSink, StreamExt};
use futures_util::SinkExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::codec::FrameCodec;
use crate::state::GatewayState;

/// 接受循环。监听socket由调用方绑定，便于测试时使用随机端口。
pub async fn serve(listener: TcpListener, state: GatewayState) -> std::io::Result<()> {
    info!(addr = %listener.local_addr()?, "TCP网关开始监听");
    loop {
        let (stream, peer) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(handle_connection(stream, peer, state));
    }
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, state: GatewayState) {
    let _ = stream.set_nodelay(true);
    let framed = Framed::new(stream, FrameCodec::new(state.max_frame_bytes));
    let (sink, mut frames) = framed.split();
    let (handle, outbound) = ConnectionHandle::new(TransportKind::Tcp);
    debug!(connection_id = %handle.id, %peer, "TCP连接建立");

    tokio::spawn(write_loop(sink, outbound));

    let mut supervisor = IdleSupervisor::new(state.thresholds, Instant::now());
    let mut identity: Option<UserId> = None;

    loop {
        let deadline = tokio::time::Instant::from_std(supervisor.next_deadline());
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                let now = Instant::now();
                match supervisor.poll(now) {
                    IdleAction::Wait => {}
                    IdleAction::AwaitHeartbeat => {
                        debug!(connection_id = %handle.id, "读空闲，等待客户端心跳");
                    }
                    IdleAction::SendProbe => {
                        if handle.send(Frame::heartbeat_probe()).is_ok() {
                            supervisor.on_write(now);
                        }
                    }
                    IdleAction::Close => {
                        info!(connection_id = %handle.id, user_id = ?identity, "心跳超时，关闭连接");
                        handle.close(CloseReason::IdleTimeout);
                        break;
                    }
                }
            }
            incoming = frames.next() => match incoming {
                Some(Ok(frame)) => {
                    supervisor.on_read(Instant::now());
                    handle.touch();
                    match Command::from_frame(&frame) {
                        Ok(command) => {
                            if let Err(err) =
                                state.dispatcher.handle(&handle, &mut identity, command).await
                            {
                                warn!(connection_id = %handle.id, error = %err, "指令处理失败");
                            }
                        }
                        Err(err) => {
                            // 服务端方向的指令出现在入站中同样视为可疑，丢帧但不断连
                            warn!(connection_id = %handle.id, error = %err, "丢弃无法识别的帧");
                        }
                    }
                }
                // 解码器只对魔数错误和超长帧报错，无法识别的帧在解码器内丢弃
                Some(Err(err)) => {
                    warn!(connection_id = %handle.id, error = %err, "协议违规，关闭连接");
                    handle.close(CloseReason::ProtocolViolation);
                    break;
                }
                None => {
                    debug!(connection_id = %handle.id, "对端关闭连接");
                    handle.close(CloseReason::ClientClosed);
                    break;
                }
            }
        }

        // 被新登录顶替时句柄由分发器关闭，读循环在下一次唤醒时退出
        if handle.is_closed() {
            break;
        }
    }

    state.dispatcher.connection_closed(&handle).await;
    debug!(connection_id = %handle.id, "TCP连接结束");
}

/// 出站写任务。收到关闭事件后按需下发关闭通知帧，然后关掉写侧。
async fn write_loop(
    mut sink: SplitSink<Framed<TcpStream, FrameCodec>, Frame>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(event) = outbound.recv().await {
        match event {
            Outbound::Frame(frame) => {
                if sink.send(frame).await.is_err() {
                    break;
                }
            }
            Outbound::Close(reason) => {
                if reason.notifies_peer() {
                    let _ = sink.send(Outbound::close_frame(reason)).await;
                }
                break;
            }
        }
    }
    let _ = sink.close().await;
}
