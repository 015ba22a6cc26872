use std::sync::Arc;
use std::time::Instant;

use actix::Addr;

use crate::catalog::CatalogService;
use crate::chat::ChatService;
use crate::chat_server::ChatServer;
use crate::config::Config;
use crate::order::OrderService;
use crate::quote::QuoteService;
use crate::store::DocumentStore;

#[derive(Clone)]
pub struct AppState {
    pub chat_server: Addr<ChatServer>,
    pub store: Arc<dyn DocumentStore>,
    pub config: Config,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(chat_server: Addr<ChatServer>, store: Arc<dyn DocumentStore>, config: Config) -> Self {
        AppState {
            chat_server,
            store,
            config,
            started_at: Instant::now(),
        }
    }

    pub fn catalog(&self) -> CatalogService {
        CatalogService::new(self.store.clone())
    }

    pub fn orders(&self) -> OrderService {
        OrderService::new(self.store.clone(), self.config.tax_rate)
    }

    pub fn quotes(&self) -> QuoteService {
        QuoteService::new(self.store.clone(), self.orders())
    }

    pub fn chats(&self) -> ChatService {
        ChatService::new(self.store.clone(), Arc::new(self.chat_server.clone()))
    }
}
