//! Pure event dispatch: one function per channel, `(store, identity, frame)`
//! in, mutations plus an ordered list of [`Command`]s out. The channel tasks
//! execute the commands; the functions themselves touch no sockets and no
//! clock, which is what makes every handler unit-testable.

use shared::{
    domain::{GroupId, UserId},
    protocol::{ChatMessage, GroupFrame, GroupSummary, MessageFrame, UserFrame, UserSummary},
};

use crate::{
    store::{ActiveConversation, ConversationStore},
    Identity,
};

/// Side effects requested by a dispatch pass, executed in order by the
/// channel runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    MarkDirectRead(UserId),
    MarkGroupRead(GroupId),
    Reconcile,
    PlayNotification,
}

pub fn apply_message_frame(
    store: &mut ConversationStore,
    identity: &Identity,
    frame: MessageFrame,
) -> Vec<Command> {
    let mut commands = Vec::new();
    match frame {
        MessageFrame::Direct(message) => {
            handle_chat_message(store, identity, message, false, &mut commands);
        }
        MessageFrame::Group(message) => {
            handle_chat_message(store, identity, message, true, &mut commands);
        }
        MessageFrame::Delete { id, .. } => {
            store.remove_message(id);
            commands.push(Command::Reconcile);
        }
        MessageFrame::ConversationDeleted { .. } => {
            store.clear_timeline();
            commands.push(Command::Reconcile);
        }
        MessageFrame::Typing {
            from_user_id,
            from_username,
        } => {
            if from_user_id != identity.id && store.active.is_direct_with(&from_username) {
                store.set_typing_exclusive(from_username);
            }
        }
        MessageFrame::StopTyping { from_user_id, .. } => {
            // The stop frame carries no username; a direct conversation holds
            // at most one remote typer, so clearing is equivalent.
            if from_user_id != identity.id
                && matches!(store.active, ActiveConversation::Direct(_))
            {
                store.clear_typing();
            }
        }
        MessageFrame::GroupTyping {
            group_id,
            from_user_id,
            from_username,
        } => {
            if from_user_id != identity.id && store.active.is_group(group_id) {
                store.add_typing(from_username);
            }
        }
        MessageFrame::GroupStopTyping {
            group_id,
            from_user_id,
            from_username,
        } => {
            if from_user_id != identity.id && store.active.is_group(group_id) {
                if let Some(username) = from_username {
                    store.remove_typing(&username);
                }
            }
        }
        MessageFrame::Unknown => {}
    }
    commands
}

/// The echo contract lives here: every chat frame, including the sender's own
/// echo, is appended iff it matches the active conversation. A match also
/// marks the conversation read; a miss plays a notification when the frame is
/// addressed to this user. Either way the reconciler runs.
fn handle_chat_message(
    store: &mut ConversationStore,
    identity: &Identity,
    message: ChatMessage,
    is_group: bool,
    commands: &mut Vec<Command>,
) {
    let matches_active = if is_group {
        message.group.is_some_and(|group| store.active.is_group(group))
    } else {
        store.active.is_direct_with(&message.from)
            || message
                .to
                .as_deref()
                .is_some_and(|to| store.active.is_direct_with(to))
    };

    if matches_active {
        store.append_message(message);
        match &store.active {
            ActiveConversation::Direct(contact) => {
                commands.push(Command::MarkDirectRead(contact.id));
            }
            ActiveConversation::Group(group) => {
                commands.push(Command::MarkGroupRead(group.id));
            }
            ActiveConversation::None => {}
        }
    } else {
        let addressed_to_us = if is_group {
            message
                .group_members
                .iter()
                .any(|member| member == &identity.username)
        } else {
            message.to.as_deref() == Some(identity.username.as_str())
        };
        if addressed_to_us {
            commands.push(Command::PlayNotification);
        }
    }

    commands.push(Command::Reconcile);
}

pub fn apply_user_frame(
    store: &mut ConversationStore,
    _identity: &Identity,
    frame: UserFrame,
) -> Vec<Command> {
    match frame {
        UserFrame::UserCreated { id, username } => {
            store.push_user(UserSummary { id, username });
        }
        UserFrame::InviteReceived { invite } => {
            store.push_invite(invite);
        }
        UserFrame::ContactAdded { user } => {
            store.remove_invites_from(user.id);
            store.push_contact(user);
        }
        UserFrame::UserOnline { user_id } => {
            store.mark_online(user_id);
        }
        UserFrame::OnlineUsers { user_ids } => {
            store.replace_online(user_ids);
        }
        UserFrame::UserOffline { user_id } => {
            store.mark_offline(user_id);
        }
        UserFrame::Unknown => {}
    }
    Vec::new()
}

pub fn apply_group_frame(
    store: &mut ConversationStore,
    identity: &Identity,
    frame: GroupFrame,
) -> Vec<Command> {
    match frame {
        GroupFrame::GroupCreated {
            id, name, member_ids, ..
        } => {
            if member_ids.contains(&identity.id) {
                store.upsert_group(GroupSummary { id, name });
            }
        }
        GroupFrame::GroupDeleted { id } => {
            store.remove_group(id);
            if store.active.is_group(id) {
                store.clear_active();
            }
        }
        GroupFrame::GroupLeft { group_id, user_id } => {
            if user_id == identity.id {
                store.remove_group(group_id);
            }
        }
        GroupFrame::GroupJoined {
            group_id,
            group_name,
            username,
        } => {
            if username == identity.username {
                store.upsert_group(GroupSummary {
                    id: group_id,
                    name: group_name,
                });
            }
        }
        GroupFrame::GroupSentoff {
            group_id, username, ..
        } => {
            if username == identity.username {
                store.remove_group(group_id);
            }
        }
        GroupFrame::MemberAdded { group_id, username } => {
            store.member_added(group_id, username);
        }
        GroupFrame::MemberRemoved { group_id, username } => {
            store.member_removed(group_id, &username);
        }
        GroupFrame::Unknown => {}
    }
    Vec::new()
}

#[cfg(test)]
#[path = "tests/dispatch_tests.rs"]
mod tests;
