//! The single-owner, in-memory view of conversation state.
//!
//! Only the event dispatcher, the reconciler and user-action methods write
//! here; everything else reads cloned snapshots. Unread counts and previews
//! follow a wholesale-replacement discipline: pushes never edit counts, a
//! reconciliation pass replaces them (the two sanctioned exceptions are the
//! sender-side preview update after a send and the preview recompute after a
//! delete frame).

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use shared::{
    domain::{GroupId, InviteId, MessageId, UserId},
    protocol::{
        ChatMessage, ConversationsResponse, GroupSummary, PendingInvite, UnreadCounts, UserSummary,
    },
};

/// Key for per-conversation bookkeeping such as last-message previews.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversationKey {
    Direct(UserId),
    Group(GroupId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LastMessagePreview {
    pub text: String,
    pub time: DateTime<Utc>,
}

/// At most one conversation is active; selecting one clears the other.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ActiveConversation {
    #[default]
    None,
    Direct(UserSummary),
    Group(GroupSummary),
}

impl ActiveConversation {
    pub fn key(&self) -> Option<ConversationKey> {
        match self {
            ActiveConversation::None => None,
            ActiveConversation::Direct(contact) => Some(ConversationKey::Direct(contact.id)),
            ActiveConversation::Group(group) => Some(ConversationKey::Group(group.id)),
        }
    }

    /// True when the active conversation is a direct one whose remote
    /// participant carries `username`.
    pub fn is_direct_with(&self, username: &str) -> bool {
        matches!(self, ActiveConversation::Direct(contact) if contact.username == username)
    }

    pub fn is_group(&self, group_id: GroupId) -> bool {
        matches!(self, ActiveConversation::Group(group) if group.id == group_id)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConversationStore {
    pub active: ActiveConversation,
    /// Timeline of the active conversation, in strict arrival order.
    pub timeline: Vec<ChatMessage>,
    pub previews: HashMap<ConversationKey, LastMessagePreview>,
    pub unread: UnreadCounts,
    pub online: HashSet<UserId>,
    /// Usernames currently typing in the active conversation.
    pub typing: Vec<String>,
    pub pending_invites: Vec<PendingInvite>,
    pub contacts: Vec<UserSummary>,
    pub groups: Vec<GroupSummary>,
    /// Directory of every known user, refreshed from the conversation listing.
    pub users: Vec<UserSummary>,
    /// Member rosters the UI has opened, keyed by group. Kept current by
    /// `member_added`/`member_removed` frames without further REST traffic.
    pub group_members: HashMap<GroupId, Vec<String>>,
    applied_refresh: u64,
}

impl ConversationStore {
    pub fn select_direct(&mut self, contact: UserSummary) {
        self.active = ActiveConversation::Direct(contact);
        self.timeline.clear();
        self.typing.clear();
    }

    pub fn select_group(&mut self, group: GroupSummary) {
        self.active = ActiveConversation::Group(group);
        self.timeline.clear();
        self.typing.clear();
    }

    pub fn clear_active(&mut self) {
        self.active = ActiveConversation::None;
        self.timeline.clear();
        self.typing.clear();
    }

    pub fn set_timeline(&mut self, messages: Vec<ChatMessage>) {
        self.timeline = messages;
    }

    pub fn clear_timeline(&mut self) {
        self.timeline.clear();
    }

    pub fn append_message(&mut self, message: ChatMessage) {
        self.timeline.push(message);
    }

    /// Remove a message by id and, if it belonged to the active timeline,
    /// recompute the active conversation's preview from the new tail without
    /// waiting for the next reconciliation.
    pub fn remove_message(&mut self, id: MessageId) {
        let before = self.timeline.len();
        self.timeline.retain(|message| message.id != id);
        if self.timeline.len() == before {
            return;
        }
        let Some(key) = self.active.key() else {
            return;
        };
        match self.timeline.last() {
            Some(last) => {
                let text = match &self.active {
                    ActiveConversation::Group(_) => format!("{}: {}", last.from, last.content),
                    _ => last.content.clone(),
                };
                self.previews.insert(
                    key,
                    LastMessagePreview {
                        text,
                        time: last.timestamp,
                    },
                );
            }
            None => {
                self.previews.remove(&key);
            }
        }
    }

    /// Sender-side preview update right after a successful send, covering the
    /// staleness window until the next reconciliation lands.
    pub fn note_sent_preview(&mut self, own_username: &str, content: &str, time: DateTime<Utc>) {
        let (key, text) = match &self.active {
            ActiveConversation::None => return,
            ActiveConversation::Direct(contact) => {
                (ConversationKey::Direct(contact.id), content.to_string())
            }
            ActiveConversation::Group(group) => (
                ConversationKey::Group(group.id),
                format!("{own_username}: {content}"),
            ),
        };
        self.previews.insert(key, LastMessagePreview { text, time });
    }

    /// Apply a reconciliation result. Responses are tagged with a monotonic
    /// sequence number; anything older than the last applied pull is reported
    /// stale and must be discarded by the caller.
    pub fn apply_refresh(
        &mut self,
        seq: u64,
        unread: UnreadCounts,
        conversations: ConversationsResponse,
    ) -> bool {
        if seq < self.applied_refresh {
            return false;
        }
        self.applied_refresh = seq;
        self.unread = unread;

        let mut previews = HashMap::new();
        for user in &conversations.users {
            if let (Some(text), Some(time)) = (&user.last_message, user.last_timestamp) {
                previews.insert(
                    ConversationKey::Direct(user.id),
                    LastMessagePreview {
                        text: text.clone(),
                        time,
                    },
                );
            }
        }
        for group in &conversations.groups {
            if let (Some(text), Some(time)) = (&group.last_message, group.last_timestamp) {
                previews.insert(
                    ConversationKey::Group(group.id),
                    LastMessagePreview {
                        text: text.clone(),
                        time,
                    },
                );
            }
        }
        self.previews = previews;
        self.users = conversations
            .users
            .into_iter()
            .map(|user| UserSummary {
                id: user.id,
                username: user.username,
            })
            .collect();
        true
    }

    pub fn push_user(&mut self, user: UserSummary) {
        if !self.users.iter().any(|known| known.id == user.id) {
            self.users.push(user);
        }
    }

    pub fn push_contact(&mut self, contact: UserSummary) {
        if !self.contacts.iter().any(|known| known.id == contact.id) {
            self.contacts.push(contact);
        }
    }

    pub fn remove_contact(&mut self, contact_id: UserId) {
        self.contacts.retain(|contact| contact.id != contact_id);
    }

    pub fn push_invite(&mut self, invite: PendingInvite) {
        if !self.pending_invites.iter().any(|known| known.id == invite.id) {
            self.pending_invites.push(invite);
        }
    }

    pub fn remove_invite(&mut self, invite_id: InviteId) {
        self.pending_invites.retain(|invite| invite.id != invite_id);
    }

    /// Drop any pending invite originating from `user_id`; used once the
    /// inviter has become a contact.
    pub fn remove_invites_from(&mut self, user_id: UserId) {
        self.pending_invites
            .retain(|invite| invite.from_user_id != user_id);
    }

    pub fn upsert_group(&mut self, group: GroupSummary) {
        if !self.groups.iter().any(|known| known.id == group.id) {
            self.groups.push(group);
        }
    }

    pub fn remove_group(&mut self, group_id: GroupId) {
        self.groups.retain(|group| group.id != group_id);
        self.group_members.remove(&group_id);
    }

    pub fn mark_online(&mut self, user_id: UserId) {
        self.online.insert(user_id);
    }

    pub fn mark_offline(&mut self, user_id: UserId) {
        self.online.remove(&user_id);
    }

    pub fn replace_online(&mut self, user_ids: Vec<UserId>) {
        self.online = user_ids.into_iter().collect();
    }

    /// Direct conversations show at most one remote typer, by replacement.
    pub fn set_typing_exclusive(&mut self, username: String) {
        self.typing = vec![username];
    }

    /// Group conversations accumulate typers, without duplicates.
    pub fn add_typing(&mut self, username: String) {
        if !self.typing.iter().any(|known| known == &username) {
            self.typing.push(username);
        }
    }

    pub fn remove_typing(&mut self, username: &str) {
        self.typing.retain(|known| known != username);
    }

    pub fn clear_typing(&mut self) {
        self.typing.clear();
    }

    pub fn set_group_members(&mut self, group_id: GroupId, members: Vec<String>) {
        self.group_members.insert(group_id, members);
    }

    pub fn member_added(&mut self, group_id: GroupId, username: String) {
        if let Some(members) = self.group_members.get_mut(&group_id) {
            if !members.iter().any(|known| known == &username) {
                members.push(username);
            }
        }
    }

    pub fn member_removed(&mut self, group_id: GroupId, username: &str) {
        if let Some(members) = self.group_members.get_mut(&group_id) {
            members.retain(|known| known != username);
        }
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
