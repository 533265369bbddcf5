use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{ConversationId, MessageId, Timestamp, UserId};

/// 无序的两人参与者集合。
///
/// 内部始终按字典序保存（`low < high`），因此 `{a, b}` 与 `{b, a}` 得到同一个值，
/// 存储层可以直接在 `(low, high)` 上建唯一约束。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "Vec<UserId>", try_from = "Vec<UserId>")]
pub struct ParticipantPair {
    low: UserId,
    high: UserId,
}

impl ParticipantPair {
    pub fn new(a: UserId, b: UserId) -> Result<Self, DomainError> {
        if a == b {
            return Err(DomainError::invalid_participants(
                "cannot start a conversation with yourself",
            ));
        }
        let (low, high) = if a < b { (a, b) } else { (b, a) };
        Ok(Self { low, high })
    }

    pub fn low(&self) -> &UserId {
        &self.low
    }

    pub fn high(&self) -> &UserId {
        &self.high
    }

    pub fn members(&self) -> [&UserId; 2] {
        [&self.low, &self.high]
    }

    pub fn contains(&self, user_id: &UserId) -> bool {
        &self.low == user_id || &self.high == user_id
    }

    /// 返回另一位参与者；`user_id` 不在会话中时返回 `None`
    pub fn other(&self, user_id: &UserId) -> Option<&UserId> {
        if &self.low == user_id {
            Some(&self.high)
        } else if &self.high == user_id {
            Some(&self.low)
        } else {
            None
        }
    }

    /// `{sender, receiver}` 是否恰好等于该参与者集合（顺序无关）
    pub fn matches(&self, sender: &UserId, receiver: &UserId) -> bool {
        sender != receiver && self.contains(sender) && self.contains(receiver)
    }
}

impl From<ParticipantPair> for Vec<UserId> {
    fn from(value: ParticipantPair) -> Self {
        vec![value.low, value.high]
    }
}

impl TryFrom<Vec<UserId>> for ParticipantPair {
    type Error = DomainError;

    fn try_from(value: Vec<UserId>) -> Result<Self, Self::Error> {
        let [a, b]: [UserId; 2] = value.try_into().map_err(|_| {
            DomainError::invalid_participants("a conversation has exactly two participants")
        })?;
        Self::new(a, b)
    }
}

/// 两位用户之间唯一的会话记录。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    pub participants: ParticipantPair,
    pub last_message: Option<MessageId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Conversation {
    pub fn new(id: ConversationId, participants: ParticipantPair, created_at: Timestamp) -> Self {
        Self {
            id,
            participants,
            last_message: None,
            created_at,
            updated_at: created_at,
        }
    }

    /// 移动 last_message 指针。更早的消息不会覆盖更新的指针。
    pub fn record_message(&mut self, message_id: MessageId, at: Timestamp) -> bool {
        if self.last_message.is_some() && at < self.updated_at {
            return false;
        }
        self.last_message = Some(message_id);
        self.updated_at = at;
        true
    }
}
