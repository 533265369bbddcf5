//! REST 接口封装
//!
//! `POST /messages/send` 只用于重试：请求携带与实时发送相同的
//! `clientMessageId`，服务器对同一键只持久化一次。

use domain::{ConversationId, Message, UserId};
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};
use crate::state::{ChatEntry, ConversationState, ConversationSummary};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationHistory {
    pub conversation: ConversationSummary,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedConversation {
    pub conversation_id: ConversationId,
    #[serde(default)]
    pub last_message: Option<Message>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendBody<'a> {
    receiver_id: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_message_id: Option<domain::ClientMessageId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    conversation_id: Option<ConversationId>,
}

#[derive(Debug, Deserialize)]
struct MarkReadBody {
    updated: u64,
}

#[derive(Clone)]
pub struct HttpApi {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpApi {
    /// `base_url` 形如 `http://host:port`
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    pub async fn sync_user(&self) -> ClientResult<domain::User> {
        let request = self.client.post(self.url(&["auth", "sync-user"])?);
        self.execute(request).await
    }

    pub async fn conversations(&self) -> ClientResult<Vec<ConversationSummary>> {
        self.execute(self.client.get(self.url(&["conversations"])?)).await
    }

    pub async fn start_conversation(&self, other_user_id: &UserId) -> ClientResult<StartedConversation> {
        let request = self
            .client
            .post(self.url(&["messages", "start-conversation"])?)
            .json(&serde_json::json!({ "otherUserId": other_user_id.as_str() }));
        self.execute(request).await
    }

    pub async fn conversation_with(&self, peer: &UserId) -> ClientResult<ConversationHistory> {
        let url = self.url(&["messages", "conversation", peer.as_str()])?;
        self.execute(self.client.get(url)).await
    }

    pub async fn mark_read(&self, peer: &UserId) -> ClientResult<u64> {
        let url = self.url(&["messages", "conversation", peer.as_str(), "read"])?;
        let body: MarkReadBody = self.execute(self.client.post(url)).await?;
        Ok(body.updated)
    }

    /// 以同一幂等键重发一条待确认消息，返回服务器保存的记录
    pub async fn retry_send(&self, entry: &ChatEntry) -> ClientResult<Message> {
        let body = SendBody {
            receiver_id: entry.receiver_id.as_str(),
            text: &entry.text,
            client_message_id: entry.local_id,
            conversation_id: entry.conversation_id,
        };
        let request = self.client.post(self.url(&["messages", "send"])?).json(&body);
        self.execute(request).await
    }

    /// 重试所有待确认的发送并把结果并入状态，返回失败的次数
    pub async fn retry_pending(&self, state: &mut ConversationState) -> usize {
        let pending: Vec<ChatEntry> = state.pending().cloned().collect();
        let mut failed = 0;
        for entry in pending {
            match self.retry_send(&entry).await {
                Ok(message) => state.reconcile(message),
                Err(err) => {
                    tracing::warn!(receiver_id = %entry.receiver_id, error = %err, "retry failed");
                    failed += 1;
                }
            }
        }
        failed
    }

    /// 拉取与 `peer` 的会话历史并替换本地已确认部分
    pub async fn refresh_history(
        &self,
        state: &mut ConversationState,
        peer: &UserId,
    ) -> ClientResult<ConversationId> {
        let history = self.conversation_with(peer).await?;
        let conversation_id = history.conversation.id;
        state.load_history(peer, history.messages);
        Ok(conversation_id)
    }

    pub async fn refresh_conversations(&self, state: &mut ConversationState) -> ClientResult<()> {
        let summaries = self.conversations().await?;
        state.set_conversations(summaries);
        Ok(())
    }

    /// 按路径段拼接，段内的 `/`、`?`、`#` 等字符会被百分号编码
    fn url(&self, segments: &[&str]) -> ClientResult<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|err| ClientError::InvalidUrl(format!("{}: {err}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidUrl(format!("{} cannot be a base", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> ClientResult<T> {
        let response = request.bearer_auth(&self.token).send().await?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> ClientResult<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ClientError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response.json().await?)
}
