use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{Role, Workflow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatStatus {
    Active,
    Closed,
    Archived,
}

impl Workflow for ChatStatus {
    const ENTITY: &'static str = "Chat";

    fn successors(self) -> &'static [Self] {
        match self {
            ChatStatus::Active => &[ChatStatus::Closed],
            // reopening is the only way back
            ChatStatus::Closed => &[ChatStatus::Active, ChatStatus::Archived],
            ChatStatus::Archived => &[],
        }
    }
}

impl fmt::Display for ChatStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChatStatus::Active => "active",
            ChatStatus::Closed => "closed",
            ChatStatus::Archived => "archived",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user: String,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    #[serde(rename = "_id")]
    pub id: String,
    pub subject: Option<String>,
    pub participants: Vec<Participant>,
    pub status: ChatStatus,
    pub order: Option<String>,
    pub quote: Option<String>,
    pub closed_by: Option<String>,
    pub close_reason: Option<String>,
    pub closed_at: Option<DateTime<Utc>>,
    pub last_activity: DateTime<Utc>,
    #[serde(default)]
    pub message_count: u64,
    pub created_at: DateTime<Utc>,
}

impl Chat {
    pub fn participant(&self, user_id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.user == user_id)
    }

    pub fn is_participant(&self, user_id: &str) -> bool {
        self.participant(user_id).is_some()
    }

    /// Adds the user unless already present. Returns true if added.
    pub fn add_participant(&mut self, user_id: &str, role: Role, now: DateTime<Utc>) -> bool {
        if self.is_participant(user_id) {
            return false;
        }
        self.participants.push(Participant {
            user: user_id.to_string(),
            role,
            joined_at: now,
            last_seen: None,
        });
        true
    }

    pub fn mark_seen(&mut self, user_id: &str, at: DateTime<Utc>) {
        if let Some(p) = self.participants.iter_mut().find(|p| p.user == user_id) {
            p.last_seen = Some(at);
        }
    }

    /// Advances `last_activity` and returns the new value. The result is
    /// always later than the previous value, even when the clock has not
    /// moved.
    pub fn touch(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
        let floor = self.last_activity + Duration::milliseconds(1);
        self.last_activity = if now > self.last_activity { now } else { floor };
        self.last_activity
    }

    pub fn other_participants<'a>(&'a self, user_id: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.participants
            .iter()
            .map(|p| p.user.as_str())
            .filter(move |u| *u != user_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    File,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub user: String,
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(rename = "_id")]
    pub id: String,
    pub chat: String,
    pub sender: String,
    pub kind: MessageKind,
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<String>,
    #[serde(default)]
    pub read_by: Vec<ReadReceipt>,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Records a read receipt. A repeat read by the same user keeps the
    /// first receipt and returns false.
    pub fn mark_read(&mut self, user_id: &str, at: DateTime<Utc>) -> bool {
        if self.read_by.iter().any(|r| r.user == user_id) {
            return false;
        }
        self.read_by.push(ReadReceipt {
            user: user_id.to_string(),
            read_at: at,
        });
        true
    }
}
