// src/chat_server.rs

use std::collections::HashMap;

use actix::prelude::*;
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::models::{ChatMessage, Role};

/// Topic every staff socket is subscribed to on join.
pub const ADMINS_TOPIC: &str = "admins";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportRequest {
    pub sender_id: String,
    pub message: String,
    pub sent_at: DateTime<Utc>,
}

/// Outbound socket event, serialized as `{"event": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Message)]
#[rtype(result = "()")]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    Joined { user_id: String },
    PrivateMessage(ChatMessage),
    NewMessage(ChatMessage),
    SupportMessage(SupportRequest),
    MessageSent(ChatMessage),
    Error { message: String },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
        }
    }
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Join {
    pub user_id: String,
    pub role: Role,
    pub addr: Recipient<ServerEvent>,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Leave {
    pub user_id: String,
    pub addr: Recipient<ServerEvent>,
}

/// Pushes an event to every socket in one user's room. Resolves to the
/// number of sockets reached; zero means the user is offline.
#[derive(Message)]
#[rtype(result = "usize")]
pub struct Deliver {
    pub user_id: String,
    pub event: ServerEvent,
}

#[derive(Message)]
#[rtype(result = "usize")]
pub struct Publish {
    pub topic: String,
    pub event: ServerEvent,
}

/// Push side of the chat service. Delivery is best-effort: nothing is
/// queued for users who are not connected.
pub trait Notifier: Send + Sync {
    fn push(&self, recipient: &str, event: ServerEvent);
    fn publish(&self, topic: &str, event: ServerEvent);
}

impl Notifier for Addr<ChatServer> {
    fn push(&self, recipient: &str, event: ServerEvent) {
        self.do_send(Deliver {
            user_id: recipient.to_string(),
            event,
        });
    }

    fn publish(&self, topic: &str, event: ServerEvent) {
        self.do_send(Publish {
            topic: topic.to_string(),
            event,
        });
    }
}

#[derive(Default)]
pub struct ChatServer {
    // A user may have several sockets open at once.
    rooms: HashMap<String, Vec<Recipient<ServerEvent>>>,
    topics: HashMap<String, Vec<Recipient<ServerEvent>>>,
}

impl ChatServer {
    pub fn new() -> Self {
        Self::default()
    }

    fn fan_out(sockets: &[Recipient<ServerEvent>], event: &ServerEvent) -> usize {
        sockets
            .iter()
            .filter(|addr| addr.try_send(event.clone()).is_ok())
            .count()
    }
}

fn remove_socket(
    map: &mut HashMap<String, Vec<Recipient<ServerEvent>>>,
    key: &str,
    addr: &Recipient<ServerEvent>,
) {
    if let Some(addrs) = map.get_mut(key) {
        addrs.retain(|a| a != addr);
        if addrs.is_empty() {
            map.remove(key);
        }
    }
}

impl Actor for ChatServer {
    type Context = Context<Self>;
}

impl Handler<Join> for ChatServer {
    type Result = ();

    fn handle(&mut self, msg: Join, _: &mut Context<Self>) {
        info!("User {} joined their room as {}", msg.user_id, msg.role);
        if msg.role.is_staff() {
            self.topics
                .entry(ADMINS_TOPIC.to_string())
                .or_default()
                .push(msg.addr.clone());
        }
        self.rooms.entry(msg.user_id).or_default().push(msg.addr);
    }
}

impl Handler<Leave> for ChatServer {
    type Result = ();

    fn handle(&mut self, msg: Leave, _: &mut Context<Self>) {
        info!("User {} left (WS)", msg.user_id);
        remove_socket(&mut self.rooms, &msg.user_id, &msg.addr);
        remove_socket(&mut self.topics, ADMINS_TOPIC, &msg.addr);
    }
}

impl Handler<Deliver> for ChatServer {
    type Result = usize;

    fn handle(&mut self, msg: Deliver, _: &mut Context<Self>) -> usize {
        let reached = self
            .rooms
            .get(&msg.user_id)
            .map(|sockets| Self::fan_out(sockets, &msg.event))
            .unwrap_or(0);
        debug!("Delivered to {} socket(s) of {}", reached, msg.user_id);
        reached
    }
}

impl Handler<Publish> for ChatServer {
    type Result = usize;

    fn handle(&mut self, msg: Publish, _: &mut Context<Self>) -> usize {
        let reached = self
            .topics
            .get(&msg.topic)
            .map(|sockets| Self::fan_out(sockets, &msg.event))
            .unwrap_or(0);
        debug!("Published to {} socket(s) on {}", reached, msg.topic);
        reached
    }
}
