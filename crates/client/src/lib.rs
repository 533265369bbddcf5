//! 聊天客户端
//!
//! [`ConversationState`] 维护本地会话与消息视图（乐观写入、对账、回滚），
//! [`RealtimeClient`] 驱动 WebSocket 通道，[`HttpApi`] 封装 REST 接口。

pub mod error;
pub mod http;
pub mod realtime;
pub mod state;

pub use error::ClientError;
pub use http::HttpApi;
pub use realtime::RealtimeClient;
pub use state::{
    ChatEntry, ConversationState, ConversationSummary, EntryStatus, ParticipantSummary,
    SendFailure,
};
