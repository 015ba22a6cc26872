// src/routes.rs

use actix_web::{web, HttpResponse};
use chrono::Utc;
use log::error;
use mongodb::bson::doc;
use serde_json::json;

use crate::app_state::AppState;
use crate::catalog::{
    create_service, deactivate_service, get_service, list_services, reactivate_service,
    update_service,
};
use crate::chat::{
    archive_chat, close_chat, create_chat, get_chat, list_chats, mark_read, post_message,
    reopen_chat,
};
use crate::error::{MarketplaceError, MarketplaceResult};
use crate::order::{
    add_deliverable, add_milestone, complete_milestone, confirm_payment, create_order, get_order,
    list_communications, list_orders, payment_failed, post_communication, submit_review,
    update_order_status,
};
use crate::quote::{
    accept_quote, create_quote, get_quote, list_quotes, reject_quote, respond_quote, revise_quote,
};
use crate::store::SERVICES;
use crate::web_socket_server::ws_index;

/// GET /api/health
pub async fn health(data: web::Data<AppState>) -> HttpResponse {
    // a cheap count doubles as a store round trip
    let store = match data.store.count(SERVICES, doc! {}).await {
        Ok(_) => "up",
        Err(e) => {
            error!("Health check could not reach the store: {}", e);
            "down"
        }
    };
    HttpResponse::Ok().json(json!({
        "status": "OK",
        "timestamp": Utc::now(),
        "uptime": data.started_at.elapsed().as_secs_f64(),
        "store": store,
    }))
}

pub async fn route_not_found() -> MarketplaceResult<HttpResponse> {
    Ok(HttpResponse::NotFound().json(json!({
        "error": "not_found",
        "message": "Route not found",
    })))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _req| {
        MarketplaceError::invalid("body", err.to_string()).into()
    }))
    .app_data(web::QueryConfig::default().error_handler(|err, _req| {
        MarketplaceError::invalid("query", err.to_string()).into()
    }))
    .app_data(web::PathConfig::default().error_handler(|err, _req| {
        MarketplaceError::invalid("path", err.to_string()).into()
    }))
    .service(
        web::scope("/api")
            .route("/health", web::get().to(health))
            // SERVICES
            .service(
                web::scope("/services")
                    .route("", web::get().to(list_services))
                    .route("", web::post().to(create_service))
                    .route("/{id}", web::get().to(get_service))
                    .route("/{id}", web::patch().to(update_service))
                    .route("/{id}", web::delete().to(deactivate_service))
                    .route("/{id}/reactivate", web::post().to(reactivate_service)),
            )
            // QUOTES
            .service(
                web::scope("/quotes")
                    .route("", web::post().to(create_quote))
                    .route("", web::get().to(list_quotes))
                    .route("/{id}", web::get().to(get_quote))
                    .route("/{id}", web::patch().to(revise_quote))
                    .route("/{id}/respond", web::patch().to(respond_quote))
                    .route("/{id}/accept", web::patch().to(accept_quote))
                    .route("/{id}/reject", web::patch().to(reject_quote)),
            )
            // ORDERS
            .service(
                web::scope("/orders")
                    .route("", web::post().to(create_order))
                    .route("", web::get().to(list_orders))
                    .route("/{id}", web::get().to(get_order))
                    .route("/{id}/status", web::patch().to(update_order_status))
                    .route("/{id}/payment", web::post().to(confirm_payment))
                    .route("/{id}/payment/failure", web::post().to(payment_failed))
                    .route("/{id}/deliverables", web::post().to(add_deliverable))
                    .route("/{id}/milestones", web::post().to(add_milestone))
                    .route(
                        "/{id}/milestones/{index}/complete",
                        web::patch().to(complete_milestone),
                    )
                    .route("/{id}/review", web::post().to(submit_review))
                    .route("/{id}/communications", web::get().to(list_communications))
                    .route("/{id}/communications", web::post().to(post_communication)),
            )
            // CHAT
            .service(
                web::scope("/chat")
                    .route("", web::post().to(create_chat))
                    .route("", web::get().to(list_chats))
                    .route("/messages/{message_id}/read", web::post().to(mark_read))
                    .route("/{id}", web::get().to(get_chat))
                    .route("/{id}/messages", web::post().to(post_message))
                    .route("/{id}/close", web::patch().to(close_chat))
                    .route("/{id}/reopen", web::patch().to(reopen_chat))
                    .route("/{id}/archive", web::patch().to(archive_chat)),
            ),
    )
    // WEBSOCKET route for real-time
    .service(web::resource("/ws").route(web::get().to(ws_index)))
    .default_service(web::to(route_not_found));
}
