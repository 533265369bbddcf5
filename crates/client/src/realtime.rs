//! WebSocket 实时通道客户端
//!
//! 连接由后台任务持有：写端消费 [`ClientEvent`] 队列，读端把解码后的
//! [`ServerEvent`] 投递给调用方。服务器不会恢复断开连接的房间成员关系，
//! 所以这里记录已加入的房间，[`RealtimeClient::reconnect`] 时逐个重新加入。

use std::collections::HashSet;

use domain::{ClientEvent, ConversationId, SendMessagePayload, ServerEvent};
use futures_util::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

use crate::error::{ClientError, ClientResult};
use crate::state::ConversationState;

pub struct RealtimeClient {
    url: String,
    outgoing: mpsc::UnboundedSender<ClientEvent>,
    incoming: mpsc::UnboundedReceiver<ServerEvent>,
    rooms: HashSet<ConversationId>,
    task: JoinHandle<()>,
}

struct Channel {
    outgoing: mpsc::UnboundedSender<ClientEvent>,
    incoming: mpsc::UnboundedReceiver<ServerEvent>,
    task: JoinHandle<()>,
}

impl RealtimeClient {
    /// `base_url` 形如 `ws://host:port`
    pub async fn connect(base_url: &str, token: &str) -> ClientResult<Self> {
        let url = format!("{}/socket?token={}", base_url.trim_end_matches('/'), token);
        let channel = open(&url).await?;
        tracing::info!("realtime channel connected");

        Ok(Self {
            url,
            outgoing: channel.outgoing,
            incoming: channel.incoming,
            rooms: HashSet::new(),
            task: channel.task,
        })
    }

    pub fn join(&mut self, conversation_id: ConversationId) -> ClientResult<()> {
        self.emit(ClientEvent::JoinConversation(conversation_id))?;
        self.rooms.insert(conversation_id);
        Ok(())
    }

    pub fn leave(&mut self, conversation_id: ConversationId) -> ClientResult<()> {
        self.rooms.remove(&conversation_id);
        self.emit(ClientEvent::LeaveConversation(conversation_id))
    }

    pub fn send(&self, payload: SendMessagePayload) -> ClientResult<()> {
        self.emit(ClientEvent::SendMessage(payload))
    }

    pub fn joined_rooms(&self) -> impl Iterator<Item = &ConversationId> {
        self.rooms.iter()
    }

    pub fn is_connected(&self) -> bool {
        !self.task.is_finished()
    }

    /// 下一个服务器事件；连接关闭后返回 `None`
    pub async fn next_event(&mut self) -> Option<ServerEvent> {
        self.incoming.recv().await
    }

    /// 读取一个事件并应用到本地状态，返回该事件
    pub async fn pump(&mut self, state: &mut ConversationState) -> ClientResult<ServerEvent> {
        let event = self.next_event().await.ok_or(ClientError::Closed)?;
        if let ServerEvent::JoinError(payload) = &event {
            self.rooms.remove(&payload.conversation_id);
        }
        state.apply(event.clone());
        Ok(event)
    }

    /// 建立新连接并重新加入之前的所有房间
    pub async fn reconnect(&mut self) -> ClientResult<()> {
        self.task.abort();
        let channel = open(&self.url).await?;
        self.outgoing = channel.outgoing;
        self.incoming = channel.incoming;
        self.task = channel.task;

        for conversation_id in &self.rooms {
            self.outgoing
                .send(ClientEvent::JoinConversation(*conversation_id))
                .map_err(|_| ClientError::Closed)?;
        }
        tracing::info!(rooms = self.rooms.len(), "realtime channel reconnected");
        Ok(())
    }

    fn emit(&self, event: ClientEvent) -> ClientResult<()> {
        self.outgoing.send(event).map_err(|_| ClientError::Closed)
    }
}

impl Drop for RealtimeClient {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn open(url: &str) -> ClientResult<Channel> {
    let (socket, _response) = connect_async(url).await?;
    let (mut sink, mut stream) = socket.split();

    let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<ClientEvent>();
    let (incoming_tx, incoming) = mpsc::unbounded_channel::<ServerEvent>();

    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        match serde_json::from_str::<ServerEvent>(text.as_str()) {
                            Ok(event) => {
                                if incoming_tx.send(event).is_err() {
                                    break;
                                }
                            }
                            Err(err) => {
                                tracing::warn!(error = %err, "ignoring undecodable server event");
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        tracing::debug!("realtime channel closed by server");
                        break;
                    }
                    Some(Err(err)) => {
                        tracing::warn!(error = %err, "realtime channel failed");
                        break;
                    }
                    Some(Ok(_)) => {}
                },
                Some(event) = outgoing_rx.recv() => {
                    let json = match serde_json::to_string(&event) {
                        Ok(json) => json,
                        Err(err) => {
                            tracing::warn!(error = %err, "failed to serialize client event");
                            continue;
                        }
                    };
                    if let Err(err) = sink.send(WsMessage::Text(json.into())).await {
                        tracing::warn!(error = %err, "failed to send client event");
                        break;
                    }
                }
            }
        }
    });

    Ok(Channel {
        outgoing,
        incoming,
        task,
    })
}
