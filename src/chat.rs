// src/chat.rs

use std::sync::Arc;

use actix_web::{web, HttpResponse};
use chrono::Utc;
use log::{info, warn};
use mongodb::bson::doc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::auth::AuthUser;
use crate::chat_server::{Notifier, ServerEvent, SupportRequest, ADMINS_TOPIC};
use crate::error::{FieldErrors, MarketplaceError, MarketplaceResult};
use crate::models::{Chat, ChatMessage, ChatStatus, MessageKind, Role, Workflow};
use crate::store::{Collection, DocumentStore, CHATS, CHAT_MESSAGES};

const CONTENT_MAX: usize = 5000;
const SUBJECT_MAX: usize = 200;

#[derive(Debug, Clone, Deserialize)]
pub struct ParticipantRequest {
    pub user: String,
    #[serde(default = "default_role")]
    pub role: Role,
}

fn default_role() -> Role {
    Role::Client
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChatRequest {
    pub participants: Vec<ParticipantRequest>,
    pub subject: Option<String>,
    pub order_id: Option<String>,
    pub quote_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostMessageRequest {
    #[serde(default = "default_kind")]
    pub kind: MessageKind,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<String>,
}

fn default_kind() -> MessageKind {
    MessageKind::Text
}

#[derive(Debug, Deserialize)]
pub struct CloseChatRequest {
    pub reason: String,
}

/// A chat together with its history, as returned by `GET /api/chat/{id}`.
#[derive(Debug, Serialize)]
pub struct ChatThread {
    pub chat: Chat,
    pub messages: Vec<ChatMessage>,
}

fn check_content(content: &str, attachments: &[String], errors: &mut FieldErrors) {
    let len = content.trim().chars().count();
    if len == 0 && attachments.is_empty() {
        errors.push("content", "message cannot be empty");
    }
    if len > CONTENT_MAX {
        errors.push("content", format!("must be at most {} characters", CONTENT_MAX));
    }
}

#[derive(Clone)]
pub struct ChatService {
    chats: Collection<Chat>,
    messages: Collection<ChatMessage>,
    notifier: Arc<dyn Notifier>,
}

impl ChatService {
    pub fn new(store: Arc<dyn DocumentStore>, notifier: Arc<dyn Notifier>) -> Self {
        ChatService {
            chats: Collection::new(store.clone(), CHATS),
            messages: Collection::new(store, CHAT_MESSAGES),
            notifier,
        }
    }

    pub async fn create(
        &self,
        creator: &AuthUser,
        request: CreateChatRequest,
    ) -> MarketplaceResult<Chat> {
        let mut errors = FieldErrors::new();
        if request.participants.iter().all(|p| p.user == creator.id) {
            errors.push("participants", "must name at least one other user");
        }
        if let Some(subject) = &request.subject {
            if subject.chars().count() > SUBJECT_MAX {
                errors.push("subject", format!("must be at most {} characters", SUBJECT_MAX));
            }
        }
        errors.into_result()?;

        // staff roles come from tokens; only staff may label other participants
        let participants = request
            .participants
            .into_iter()
            .map(|p| {
                let role = if creator.is_staff() { p.role } else { Role::Client };
                (p.user, role)
            })
            .collect();
        self.open(creator, participants, request.subject, request.order_id, request.quote_id)
            .await
    }

    async fn open(
        &self,
        creator: &AuthUser,
        participants: Vec<(String, Role)>,
        subject: Option<String>,
        order: Option<String>,
        quote: Option<String>,
    ) -> MarketplaceResult<Chat> {
        let now = Utc::now();
        let mut chat = Chat {
            id: Uuid::new_v4().to_string(),
            subject: subject.map(|s| s.trim().to_string()),
            participants: Vec::new(),
            status: ChatStatus::Active,
            order,
            quote,
            closed_by: None,
            close_reason: None,
            closed_at: None,
            last_activity: now,
            message_count: 0,
            created_at: now,
        };
        chat.add_participant(&creator.id, creator.role, now);
        for (user, role) in &participants {
            chat.add_participant(user, *role, now);
        }
        self.chats.insert(&chat).await?;
        info!("Chat {} created by {}", chat.id, creator.id);
        Ok(chat)
    }

    /// Participants and staff may read a chat.
    pub async fn get(&self, chat_id: &str, actor: &AuthUser) -> MarketplaceResult<Chat> {
        let chat = self.load(chat_id).await?;
        if !actor.is_staff() && !chat.is_participant(&actor.id) {
            return Err(MarketplaceError::Forbidden("not a participant of this chat".into()));
        }
        Ok(chat)
    }

    /// Chats the user takes part in, most recently active first.
    pub async fn list_for_user(&self, actor: &AuthUser) -> MarketplaceResult<Vec<Chat>> {
        let mut chats = self
            .chats
            .find(doc! { "participants.user": actor.id.as_str() })
            .await?;
        chats.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        Ok(chats)
    }

    /// Message history, oldest first.
    pub async fn messages(&self, chat_id: &str, actor: &AuthUser) -> MarketplaceResult<Vec<ChatMessage>> {
        let chat = self.get(chat_id, actor).await?;
        let mut messages = self.messages.find(doc! { "chat": chat.id.as_str() }).await?;
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(messages)
    }

    pub async fn post_message(
        &self,
        chat_id: &str,
        sender: &AuthUser,
        request: PostMessageRequest,
    ) -> MarketplaceResult<ChatMessage> {
        let mut chat = self.load(chat_id).await?;
        if !sender.is_staff() && !chat.is_participant(&sender.id) {
            warn!("User {} tried to post to chat {} uninvited", sender.id, chat_id);
            return Err(MarketplaceError::Forbidden("not a participant of this chat".into()));
        }
        if request.kind == MessageKind::System && !sender.is_staff() {
            return Err(MarketplaceError::invalid("kind", "system messages are staff-only"));
        }
        let message = self
            .append(&mut chat, sender, request.kind, request.content, request.attachments)
            .await?;
        for other in chat.other_participants(&sender.id) {
            self.notifier.push(other, ServerEvent::NewMessage(message.clone()));
        }
        Ok(message)
    }

    /// Direct message between two users. Reuses their open direct chat or
    /// starts one, stores the message, then pushes it to the recipient.
    /// An offline recipient finds it in the chat history later.
    pub async fn send_private_message(
        &self,
        sender: &AuthUser,
        recipient_id: &str,
        content: String,
    ) -> MarketplaceResult<ChatMessage> {
        if recipient_id.trim().is_empty() || recipient_id == sender.id {
            return Err(MarketplaceError::invalid("recipientId", "must name another user"));
        }
        let mut chat = match self.find_direct(&sender.id, recipient_id).await? {
            Some(chat) => chat,
            None => {
                // Clients write to staff; staff write to clients.
                let role = if sender.is_staff() { Role::Client } else { Role::Support };
                self.open(sender, vec![(recipient_id.to_string(), role)], None, None, None)
                    .await?
            }
        };
        let message = self
            .append(&mut chat, sender, MessageKind::Text, content, Vec::new())
            .await?;
        self.notifier
            .push(recipient_id, ServerEvent::PrivateMessage(message.clone()));
        Ok(message)
    }

    /// Relays a support request to connected staff only.
    pub fn send_support_message(
        &self,
        sender: &AuthUser,
        message: String,
    ) -> MarketplaceResult<SupportRequest> {
        let mut errors = FieldErrors::new();
        check_content(&message, &[], &mut errors);
        errors.into_result()?;

        let request = SupportRequest {
            sender_id: sender.id.clone(),
            message: message.trim().to_string(),
            sent_at: Utc::now(),
        };
        self.notifier
            .publish(ADMINS_TOPIC, ServerEvent::SupportMessage(request.clone()));
        Ok(request)
    }

    /// Records a read receipt. Reading the same message again is a no-op.
    pub async fn mark_read(&self, message_id: &str, actor: &AuthUser) -> MarketplaceResult<ChatMessage> {
        let mut message = self
            .messages
            .find_by_id(message_id)
            .await?
            .ok_or_else(|| MarketplaceError::not_found("Message", message_id))?;
        self.get(&message.chat, actor).await?;
        if message.mark_read(&actor.id, Utc::now()) {
            self.messages.replace(&message.id, &message).await?;
        }
        Ok(message)
    }

    pub async fn close(&self, chat_id: &str, actor: &AuthUser, reason: &str) -> MarketplaceResult<Chat> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(MarketplaceError::invalid("reason", "a close reason is required"));
        }
        let mut chat = self.get(chat_id, actor).await?;
        chat.status = chat.status.transition(ChatStatus::Closed)?;
        chat.closed_by = Some(actor.id.clone());
        chat.close_reason = Some(reason.to_string());
        chat.closed_at = Some(Utc::now());
        self.save(&chat).await?;
        info!("Chat {} closed by {}", chat.id, actor.id);
        Ok(chat)
    }

    pub async fn reopen(&self, chat_id: &str, actor: &AuthUser) -> MarketplaceResult<Chat> {
        let mut chat = self.get(chat_id, actor).await?;
        chat.status = chat.status.transition(ChatStatus::Active)?;
        chat.closed_by = None;
        chat.close_reason = None;
        chat.closed_at = None;
        self.save(&chat).await?;
        info!("Chat {} reopened by {}", chat.id, actor.id);
        Ok(chat)
    }

    pub async fn archive(&self, chat_id: &str, actor: &AuthUser) -> MarketplaceResult<Chat> {
        actor.require_staff()?;
        let mut chat = self.load(chat_id).await?;
        chat.status = chat.status.transition(ChatStatus::Archived)?;
        self.save(&chat).await?;
        info!("Chat {} archived", chat.id);
        Ok(chat)
    }

    async fn append(
        &self,
        chat: &mut Chat,
        sender: &AuthUser,
        kind: MessageKind,
        content: String,
        attachments: Vec<String>,
    ) -> MarketplaceResult<ChatMessage> {
        if chat.status != ChatStatus::Active {
            return Err(MarketplaceError::invalid(
                "status",
                format!("cannot post to a {} chat", chat.status),
            ));
        }
        let mut errors = FieldErrors::new();
        check_content(&content, &attachments, &mut errors);
        errors.into_result()?;

        let now = Utc::now();
        chat.add_participant(&sender.id, sender.role, now);
        let at = chat.touch(now);
        chat.message_count += 1;
        chat.mark_seen(&sender.id, at);

        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            chat: chat.id.clone(),
            sender: sender.id.clone(),
            kind,
            content: content.trim().to_string(),
            attachments,
            read_by: Vec::new(),
            created_at: at,
        };
        self.messages.insert(&message).await?;
        self.save(chat).await?;
        Ok(message)
    }

    async fn find_direct(&self, a: &str, b: &str) -> MarketplaceResult<Option<Chat>> {
        let candidates = self
            .chats
            .find(doc! { "participants.user": a, "status": ChatStatus::Active.to_string() })
            .await?;
        Ok(candidates.into_iter().find(|chat| {
            chat.participants.len() == 2
                && chat.is_participant(b)
                && chat.order.is_none()
                && chat.quote.is_none()
        }))
    }

    async fn load(&self, chat_id: &str) -> MarketplaceResult<Chat> {
        self.chats
            .find_by_id(chat_id)
            .await?
            .ok_or_else(|| MarketplaceError::not_found("Chat", chat_id))
    }

    async fn save(&self, chat: &Chat) -> MarketplaceResult<()> {
        if self.chats.replace(&chat.id, chat).await? {
            Ok(())
        } else {
            Err(MarketplaceError::not_found("Chat", chat.id.as_str()))
        }
    }
}

/// POST /api/chat
pub async fn create_chat(
    data: web::Data<AppState>,
    user: AuthUser,
    payload: web::Json<CreateChatRequest>,
) -> MarketplaceResult<HttpResponse> {
    let chat = data.chats().create(&user, payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(chat))
}

/// GET /api/chat
pub async fn list_chats(
    data: web::Data<AppState>,
    user: AuthUser,
) -> MarketplaceResult<HttpResponse> {
    let chats = data.chats().list_for_user(&user).await?;
    Ok(HttpResponse::Ok().json(chats))
}

/// GET /api/chat/{id}
pub async fn get_chat(
    data: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<String>,
) -> MarketplaceResult<HttpResponse> {
    let service = data.chats();
    let chat = service.get(&path, &user).await?;
    let messages = service.messages(&chat.id, &user).await?;
    Ok(HttpResponse::Ok().json(ChatThread { chat, messages }))
}

/// POST /api/chat/{id}/messages
pub async fn post_message(
    data: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<String>,
    payload: web::Json<PostMessageRequest>,
) -> MarketplaceResult<HttpResponse> {
    let message = data
        .chats()
        .post_message(&path, &user, payload.into_inner())
        .await?;
    Ok(HttpResponse::Created().json(message))
}

/// POST /api/chat/messages/{message_id}/read
pub async fn mark_read(
    data: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<String>,
) -> MarketplaceResult<HttpResponse> {
    let message = data.chats().mark_read(&path, &user).await?;
    Ok(HttpResponse::Ok().json(message))
}

/// PATCH /api/chat/{id}/close
pub async fn close_chat(
    data: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<String>,
    payload: web::Json<CloseChatRequest>,
) -> MarketplaceResult<HttpResponse> {
    let chat = data.chats().close(&path, &user, &payload.reason).await?;
    Ok(HttpResponse::Ok().json(chat))
}

/// PATCH /api/chat/{id}/reopen
pub async fn reopen_chat(
    data: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<String>,
) -> MarketplaceResult<HttpResponse> {
    let chat = data.chats().reopen(&path, &user).await?;
    Ok(HttpResponse::Ok().json(chat))
}

/// PATCH /api/chat/{id}/archive
pub async fn archive_chat(
    data: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<String>,
) -> MarketplaceResult<HttpResponse> {
    let chat = data.chats().archive(&path, &user).await?;
    Ok(HttpResponse::Ok().json(chat))
}
