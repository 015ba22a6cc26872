use std::time::{Duration, Instant};

use actix::prelude::*;
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use log::{debug, error, info, warn};
use serde::Deserialize;

use crate::app_state::AppState;
use crate::auth::{validate_jwt, AuthUser};
use crate::chat::ChatService;
use crate::chat_server::{ChatServer, Join, Leave, ServerEvent};
use crate::error::MarketplaceError;
//web_socket_server.rs

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateMessagePayload {
    pub recipient_id: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct SupportPayload {
    pub message: String,
}

/// Inbound socket event, `{"event": ..., "data": ...}`.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    Join(String),
    PrivateMessage(PrivateMessagePayload),
    SupportMessage(SupportPayload),
}

pub struct WsSession {
    user: AuthUser,
    joined: bool,
    hb: Instant,
    server: Addr<ChatServer>,
    chats: ChatService,
}

impl WsSession {
    pub fn new(user: AuthUser, server: Addr<ChatServer>, chats: ChatService) -> Self {
        WsSession {
            user,
            joined: false,
            hb: Instant::now(),
            server,
            chats,
        }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                info!("WebSocket heartbeat failed for {}, disconnecting", act.user.id);
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn send_event(ctx: &mut ws::WebsocketContext<Self>, event: &ServerEvent) {
        match serde_json::to_string(event) {
            Ok(text) => ctx.text(text),
            Err(e) => error!("Failed to encode socket event: {}", e),
        }
    }

    fn join(&mut self, user_id: String, ctx: &mut ws::WebsocketContext<Self>) {
        if user_id != self.user.id {
            warn!("Socket of {} tried to join room {}", self.user.id, user_id);
            Self::send_event(ctx, &ServerEvent::error("can only join your own room"));
            return;
        }
        if !self.joined {
            self.server.do_send(Join {
                user_id: self.user.id.clone(),
                role: self.user.role,
                addr: ctx.address().recipient(),
            });
            self.joined = true;
        }
        Self::send_event(ctx, &ServerEvent::Joined { user_id });
    }

    fn private_message(&mut self, payload: PrivateMessagePayload, ctx: &mut ws::WebsocketContext<Self>) {
        let chats = self.chats.clone();
        let sender = self.user.clone();
        async move {
            chats
                .send_private_message(&sender, &payload.recipient_id, payload.message)
                .await
        }
        .into_actor(self)
        .map(|result, _act, ctx| {
            let reply = match result {
                Ok(message) => ServerEvent::MessageSent(message),
                Err(e) => ServerEvent::error(e.to_string()),
            };
            Self::send_event(ctx, &reply);
        })
        // keeps replies in the order the client sent them
        .wait(ctx);
    }

    fn support_message(&mut self, payload: SupportPayload, ctx: &mut ws::WebsocketContext<Self>) {
        if let Err(e) = self.chats.send_support_message(&self.user, payload.message) {
            Self::send_event(ctx, &ServerEvent::error(e.to_string()));
        }
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.hb(ctx);
    }

    fn stopped(&mut self, ctx: &mut Self::Context) {
        if self.joined {
            self.server.do_send(Leave {
                user_id: self.user.id.clone(),
                addr: ctx.address().recipient(),
            });
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.hb = Instant::now();
                debug!("Socket event from {}: {}", self.user.id, text);
                match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(ClientEvent::Join(user_id)) => self.join(user_id, ctx),
                    Ok(ClientEvent::PrivateMessage(payload)) => self.private_message(payload, ctx),
                    Ok(ClientEvent::SupportMessage(payload)) => self.support_message(payload, ctx),
                    Err(e) => {
                        Self::send_event(ctx, &ServerEvent::error(format!("malformed event: {}", e)));
                    }
                }
            }
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Err(e) => {
                warn!("WebSocket error for {}: {}", self.user.id, e);
                ctx.stop();
            }
            _ => {}
        }
    }
}

impl Handler<ServerEvent> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: ServerEvent, ctx: &mut ws::WebsocketContext<Self>) {
        Self::send_event(ctx, &msg);
    }
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// GET /ws?token=<jwt>
pub async fn ws_index(
    req: HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
    query: web::Query<WsQuery>,
) -> Result<HttpResponse, Error> {
    let token = query
        .token
        .as_deref()
        .ok_or_else(|| MarketplaceError::Unauthorized("missing token".into()))?;
    let user = validate_jwt(token, &data.config.jwt_secret)?;
    info!("WebSocket upgrade for {}", user.id);
    ws::start(
        WsSession::new(user, data.chat_server.clone(), data.chats()),
        &req,
        stream,
    )
}
