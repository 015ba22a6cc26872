// src/main.rs

mod app_state;
mod auth;
mod catalog;
mod chat;
mod chat_server;
mod config;
mod error;
mod models;
mod order;
mod quote;
mod routes;
mod store;
mod sweeper;
mod web_socket_server;

use std::io;
use std::sync::Arc;
use std::time::Duration;

use actix::Actor;
use actix_cors::Cors;
use actix_web::{http, middleware::Logger, web, App, HttpServer};
use env_logger::Env;
use log::{error, info, warn};

use crate::app_state::AppState;
use crate::auth::Authentication;
use crate::chat_server::ChatServer;
use crate::config::{Config, StoreBackend};
use crate::store::{DocumentStore, MemoryStore, MongoStore};
use crate::sweeper::QuoteSweeper;

async fn open_store(config: &Config) -> io::Result<Arc<dyn DocumentStore>> {
    match config.store_backend {
        StoreBackend::Mongo => {
            let mongo = MongoStore::init(&config.mongo_uri, &config.database_name)
                .await
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            if let Err(e) = mongo.ensure_indexes().await {
                // Unique number indexes are what make order/quote numbers safe.
                error!("Failed to create indexes: {}", e);
                return Err(io::Error::new(io::ErrorKind::Other, e));
            }
            Ok(Arc::new(mongo))
        }
        StoreBackend::Memory => {
            warn!("Using the in-memory store; data is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = Config::from_env().map_err(|e| {
        error!("Invalid configuration: {}", e);
        io::Error::new(io::ErrorKind::InvalidInput, e)
    })?;
    error::set_expose_internal_detail(config.development);

    let store = open_store(&config).await?;
    let chat_server = ChatServer::new().start();
    let state = AppState::new(chat_server, store, config.clone());

    if config.quote_sweep_interval_secs > 0 {
        QuoteSweeper::new(
            state.quotes(),
            Duration::from_secs(config.quote_sweep_interval_secs),
        )
        .start();
    }

    let frontend_origin = config.frontend_origin.clone();
    let port = config.port;
    info!("Server running at http://0.0.0.0:{}", port);
    info!("Allowed CORS Origin: {}", frontend_origin);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(&frontend_origin)
            .allowed_methods(vec!["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"])
            .allowed_headers(vec![
                http::header::CONTENT_TYPE,
                http::header::ACCEPT,
                http::header::AUTHORIZATION,
            ])
            .supports_credentials()
            .max_age(3600);

        // last wrap is outermost
        App::new()
            .wrap(Authentication::new(&state.config.jwt_secret))
            .wrap(cors)
            .wrap(Logger::default())
            .app_data(web::Data::new(state.clone()))
            .configure(routes::configure)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
