//! Stateless request functions against the REST surface of the three backend
//! services. Pure request/response with bearer auth; no caching lives here.

use anyhow::{Context, Result};
use reqwest::{
    multipart::{Form, Part},
    Client, RequestBuilder,
};
use serde::Serialize;
use shared::{
    domain::{GroupId, InviteId, MessageId, UserId},
    protocol::{
        AddMemberResponse, ChatMessage, ConversationsResponse, GroupCreate, GroupInfo,
        GroupSummary, InviteRecord, LoginResponse, UnreadCounts, UploadResponse, UserSummary,
    },
};

#[derive(Debug, Serialize)]
struct Credentials<'a> {
    username: &'a str,
    password: &'a str,
}

/// Exchange credentials for a bearer token and the caller's identity. Runs
/// before a [`SnapshotClient`] can exist, hence the free function.
pub async fn login(
    http: &Client,
    base_url: &str,
    username: &str,
    password: &str,
) -> Result<LoginResponse> {
    let response = http
        .post(format!("{base_url}/api/user/login"))
        .json(&Credentials { username, password })
        .send()
        .await?
        .error_for_status()
        .context("login rejected")?;
    response.json().await.context("decoding login response")
}

pub async fn register(
    http: &Client,
    base_url: &str,
    username: &str,
    password: &str,
) -> Result<UserSummary> {
    let response = http
        .post(format!("{base_url}/api/user/register"))
        .json(&Credentials { username, password })
        .send()
        .await?
        .error_for_status()
        .context("registration rejected")?;
    response.json().await.context("decoding registered user")
}

/// Authenticated view of the REST surface for one session.
#[derive(Clone)]
pub struct SnapshotClient {
    http: Client,
    base_url: String,
    token: String,
}

impl SnapshotClient {
    pub(crate) fn new(http: Client, base_url: String, token: String) -> Self {
        Self {
            http,
            base_url,
            token,
        }
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.http
            .get(format!("{}{path}", self.base_url))
            .bearer_auth(&self.token)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.http
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(&self.token)
    }

    fn delete(&self, path: &str) -> RequestBuilder {
        self.http
            .delete(format!("{}{path}", self.base_url))
            .bearer_auth(&self.token)
    }

    // --- message service ---

    pub async fn conversations(&self, user_id: UserId) -> Result<ConversationsResponse> {
        self.get(&format!("/api/message/conversations/{user_id}"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("decoding conversation listing")
    }

    pub async fn unread_counts(&self, user_id: UserId) -> Result<UnreadCounts> {
        self.get(&format!("/api/message/conversations/{user_id}/unread"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("decoding unread counts")
    }

    pub async fn mark_direct_read(&self, user_id: UserId, other: UserId) -> Result<()> {
        self.post(&format!("/api/message/conversations/{user_id}/read/{other}"))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn mark_group_read(&self, user_id: UserId, group: GroupId) -> Result<()> {
        self.post(&format!(
            "/api/message/conversations/{user_id}/groups/{group}/read"
        ))
        .send()
        .await?
        .error_for_status()?;
        Ok(())
    }

    pub async fn direct_history(&self, user_id: UserId, other: UserId) -> Result<Vec<ChatMessage>> {
        self.get(&format!("/api/message/messages/{user_id}/{other}"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("decoding direct history")
    }

    pub async fn group_history(&self, group: GroupId) -> Result<Vec<ChatMessage>> {
        self.get(&format!("/api/message/group_messages/{group}"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("decoding group history")
    }

    pub async fn delete_direct_message(&self, message: MessageId) -> Result<()> {
        self.delete(&format!("/api/message/messages/{message}"))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn delete_group_message(&self, message: MessageId) -> Result<()> {
        self.delete(&format!("/api/message/group_messages/{message}"))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn delete_direct_conversation(&self, user_id: UserId, other: UserId) -> Result<()> {
        self.delete(&format!("/api/message/conversations/{user_id}/{other}"))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn delete_group_conversation(&self, group: GroupId) -> Result<()> {
        self.delete(&format!("/api/message/group_conversations/{group}"))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Upload an image and get back the reference URL to embed in a frame.
    pub async fn upload_image(
        &self,
        filename: &str,
        mime_type: &str,
        bytes: Vec<u8>,
    ) -> Result<String> {
        let part = Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str(mime_type)
            .context("invalid mime type for upload")?;
        let response: UploadResponse = self
            .post("/api/message/upload")
            .multipart(Form::new().part("file", part))
            .send()
            .await?
            .error_for_status()
            .context("image upload rejected")?
            .json()
            .await?;
        Ok(response.url)
    }

    // --- user service ---

    pub async fn users(&self) -> Result<Vec<UserSummary>> {
        self.get("/api/user/users")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("decoding user directory")
    }

    pub async fn user(&self, user_id: UserId) -> Result<UserSummary> {
        self.get(&format!("/api/user/users/{user_id}"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("decoding user")
    }

    pub async fn delete_account(&self, user_id: UserId) -> Result<()> {
        self.delete(&format!("/api/user/users/{user_id}"))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn contacts(&self, user_id: UserId) -> Result<Vec<UserSummary>> {
        self.get(&format!("/api/user/contacts/{user_id}"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("decoding contacts")
    }

    pub async fn remove_contact(&self, user_id: UserId, contact: UserId) -> Result<()> {
        self.delete(&format!("/api/user/contacts/{user_id}/remove/{contact}"))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn send_invite(&self, from: UserId, to: UserId) -> Result<()> {
        self.post("/api/user/contacts/invite")
            .query(&[("from_user_id", from.0), ("to_user_id", to.0)])
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn pending_invites(&self, user_id: UserId) -> Result<Vec<InviteRecord>> {
        self.get(&format!("/api/user/contacts/invites/{user_id}"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("decoding pending invites")
    }

    pub async fn respond_invite(&self, invite: InviteId, accept: bool) -> Result<()> {
        self.post(&format!("/api/user/contacts/invite/{invite}/respond"))
            .query(&[("accept", accept)])
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    // --- group service ---

    pub async fn groups(&self, user_id: UserId) -> Result<Vec<GroupSummary>> {
        self.get(&format!("/api/group/groups/{user_id}"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("decoding groups")
    }

    pub async fn group_info(&self, group: GroupId) -> Result<GroupInfo> {
        self.get(&format!("/api/group/groups/{group}/info"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("decoding group info")
    }

    pub async fn group_members(&self, group: GroupId) -> Result<Vec<UserSummary>> {
        self.get(&format!("/api/group/groups/{group}/members"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("decoding group members")
    }

    pub async fn create_group(&self, name: &str, member_ids: Vec<UserId>) -> Result<GroupSummary> {
        self.post("/api/group/groups")
            .json(&GroupCreate {
                name: name.to_string(),
                member_ids,
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("decoding created group")
    }

    pub async fn add_group_member(&self, group: GroupId, username: &str) -> Result<UserSummary> {
        let response: AddMemberResponse = self
            .post(&format!("/api/group/groups/{group}/members"))
            .query(&[("username", username)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("decoding added member")?;
        Ok(response.user)
    }

    pub async fn remove_group_member(&self, group: GroupId, username: &str) -> Result<()> {
        self.delete(&format!("/api/group/groups/{group}/members/{username}"))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn leave_group(&self, group: GroupId, user_id: UserId) -> Result<()> {
        self.delete(&format!("/api/group/groups/{group}/leave/{user_id}"))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn delete_group(&self, group: GroupId, user_id: UserId) -> Result<()> {
        self.delete(&format!("/api/group/groups/{group}/delete/{user_id}"))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
