use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{GroupId, InviteId, MessageId, UserId};

/// Content the backend substitutes into a reply preview whose referenced
/// message no longer exists.
pub const REPLY_UNAVAILABLE: &str = "Message unavailable";

/// Quoted-message context carried by a reply. The backend nulls `id` and
/// `from` and sets [`REPLY_UNAVAILABLE`] as the content when the referenced
/// message has been deleted; the field itself is never omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyPreview {
    #[serde(default)]
    pub id: Option<MessageId>,
    #[serde(default)]
    pub from: Option<String>,
    pub content: String,
}

impl ReplyPreview {
    pub fn is_unavailable(&self) -> bool {
        self.content == REPLY_UNAVAILABLE
    }
}

/// A delivered chat message, as it appears both in history snapshots and in
/// `direct`/`group` frames on the message channel. Ids are assigned by the
/// backend; the client never mints one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<GroupId>,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ReplyPreview>,
    /// Usernames of the group roster, when the backend attaches it to a
    /// group frame. Used only for notification gating.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group_members: Vec<String>,
}

/// Inbound frames on the message channel. Unrecognized discriminants decode
/// to `Unknown` so a new server event never disturbs the channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageFrame {
    Direct(ChatMessage),
    Group(ChatMessage),
    Delete {
        id: MessageId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chat_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group_id: Option<GroupId>,
    },
    ConversationDeleted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chat_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group_id: Option<GroupId>,
    },
    Typing {
        from_user_id: UserId,
        from_username: String,
    },
    StopTyping {
        from_user_id: UserId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from_username: Option<String>,
    },
    GroupTyping {
        group_id: GroupId,
        from_user_id: UserId,
        from_username: String,
    },
    GroupStopTyping {
        group_id: GroupId,
        from_user_id: UserId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from_username: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

/// Frames the client writes to the message channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Direct {
        to: UserId,
        content: String,
        timestamp: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        image_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_to: Option<ReplyPreview>,
    },
    Group {
        group: GroupId,
        content: String,
        timestamp: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        image_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_to: Option<ReplyPreview>,
    },
    Typing { to: UserId },
    StopTyping { to: UserId },
    GroupTyping { group: GroupId },
    GroupStopTyping { group: GroupId },
}

/// Inbound frames on the user channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserFrame {
    UserCreated {
        id: UserId,
        username: String,
    },
    InviteReceived {
        invite: PendingInvite,
    },
    ContactAdded {
        user: UserSummary,
    },
    UserOnline {
        user_id: UserId,
    },
    /// Full presence snapshot, pushed unprompted right after connecting.
    OnlineUsers {
        #[serde(default)]
        user_ids: Vec<UserId>,
    },
    UserOffline {
        user_id: UserId,
    },
    #[serde(other)]
    Unknown,
}

/// Inbound frames on the group channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GroupFrame {
    GroupCreated {
        id: GroupId,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        owner_id: Option<UserId>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        member_ids: Vec<UserId>,
    },
    GroupDeleted {
        id: GroupId,
    },
    GroupLeft {
        group_id: GroupId,
        user_id: UserId,
    },
    GroupJoined {
        group_id: GroupId,
        group_name: String,
        username: String,
    },
    GroupSentoff {
        group_id: GroupId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group_name: Option<String>,
        username: String,
    },
    MemberAdded {
        group_id: GroupId,
        username: String,
    },
    MemberRemoved {
        group_id: GroupId,
        username: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: UserId,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub id: GroupId,
    pub name: String,
}

/// A contact invite as held by the client. The user-channel push includes the
/// inviter's username; the REST snapshot does not, so the client resolves it
/// separately before storing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingInvite {
    pub id: InviteId,
    pub from_user_id: UserId,
    #[serde(default)]
    pub from_username: String,
}

/// Raw invite row from the REST snapshot (no username attached).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteRecord {
    pub id: InviteId,
    pub from_user_id: UserId,
    pub to_user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Unread counters exactly as the backend serves them: id-keyed maps with
/// string keys. Replaced wholesale on every reconciliation, never edited.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadCounts {
    #[serde(default)]
    pub direct: std::collections::HashMap<String, u32>,
    #[serde(default)]
    pub groups: std::collections::HashMap<String, u32>,
}

impl UnreadCounts {
    pub fn direct_for(&self, contact: UserId) -> u32 {
        self.direct.get(&contact.to_string()).copied().unwrap_or(0)
    }

    pub fn group_for(&self, group: GroupId) -> u32 {
        self.groups.get(&group.to_string()).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectConversation {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub last_message: Option<String>,
    #[serde(default)]
    pub last_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupConversation {
    pub id: GroupId,
    pub name: String,
    #[serde(default)]
    pub last_message: Option<String>,
    #[serde(default)]
    pub last_timestamp: Option<DateTime<Utc>>,
}

/// Conversation listing: every known peer plus the caller's groups, each with
/// an optional last-message preview.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationsResponse {
    #[serde(default)]
    pub users: Vec<DirectConversation>,
    #[serde(default)]
    pub groups: Vec<GroupConversation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    pub user: UserSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupInfo {
    pub id: GroupId,
    pub name: String,
    pub owner_username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupCreate {
    pub name: String,
    pub member_ids: Vec<UserId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddMemberResponse {
    pub status: String,
    pub group_id: GroupId,
    pub user: UserSummary,
}
