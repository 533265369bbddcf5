use application::RealtimeSession;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use domain::{ClientEvent, ServerEvent};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::state::AppState;

/// 单个 WebSocket 连接
///
/// 发送任务独占 socket 的写端：既转发连接收到的 [`ServerEvent`]，
/// 也负责回复 pong。接收任务按到达顺序逐条处理客户端事件。
pub struct SocketConnection {
    socket: WebSocket,
    state: AppState,
    session: RealtimeSession,
    events: mpsc::UnboundedReceiver<ServerEvent>,
}

impl SocketConnection {
    pub fn new(
        socket: WebSocket,
        state: AppState,
        session: RealtimeSession,
        events: mpsc::UnboundedReceiver<ServerEvent>,
    ) -> Self {
        Self {
            socket,
            state,
            session,
            events,
        }
    }

    pub async fn run(self) {
        let Self {
            socket,
            state,
            session,
            mut events,
        } = self;
        let (mut sender, mut incoming) = socket.split();

        // 写命令通道，解耦对 sender 的访问
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<WsCommand>(32);

        let send_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(cmd) = cmd_rx.recv() => {
                        let WsCommand::SendPong(data) = cmd;
                        if sender.send(WsMessage::Pong(data.into())).await.is_err() {
                            tracing::warn!("failed to send pong frame");
                            break;
                        }
                    }
                    Some(event) = events.recv() => {
                        let payload = match serde_json::to_string(&event) {
                            Ok(json) => json,
                            Err(err) => {
                                tracing::warn!(error = %err, "failed to serialize server event");
                                continue;
                            }
                        };
                        if sender.send(WsMessage::Text(payload.into())).await.is_err() {
                            tracing::warn!("failed to send text frame");
                            break;
                        }
                    }
                    else => break,
                }
            }
        });

        let recv_state = state.clone();
        let recv_session = session.clone();
        let recv_task = tokio::spawn(async move {
            while let Some(Ok(message)) = incoming.next().await {
                if handle_incoming(&recv_state, &recv_session, message, &cmd_tx)
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        tokio::select! {
            _ = send_task => {
                tracing::debug!(connection_id = %session.connection_id, "socket send task finished");
            }
            _ = recv_task => {
                tracing::debug!(connection_id = %session.connection_id, "socket receive task finished");
            }
        }

        // 断开即终态：房间成员关系全部丢弃，服务端不重试
        state.realtime.disconnect(&session).await;
    }
}

async fn handle_incoming(
    state: &AppState,
    session: &RealtimeSession,
    message: WsMessage,
    cmd_tx: &mpsc::Sender<WsCommand>,
) -> Result<(), ()> {
    match message {
        WsMessage::Close(_) => {
            tracing::debug!(connection_id = %session.connection_id, "socket close frame received");
            return Err(());
        }
        WsMessage::Ping(data) => {
            if cmd_tx.send(WsCommand::SendPong(data.to_vec())).await.is_err() {
                tracing::warn!("failed to queue pong frame");
                return Err(());
            }
        }
        WsMessage::Pong(_) => {}
        WsMessage::Text(text) => match serde_json::from_str::<ClientEvent>(text.as_str()) {
            Ok(event) => state.realtime.handle_event(session, event).await,
            Err(err) => {
                tracing::warn!(connection_id = %session.connection_id, error = %err, "ignoring malformed client event");
            }
        },
        WsMessage::Binary(_) => {
            tracing::debug!(connection_id = %session.connection_id, "ignoring binary frame");
        }
    }
    Ok(())
}

#[derive(Debug)]
enum WsCommand {
    SendPong(Vec<u8>),
}
