use std::time::Duration;

use actix::prelude::*;
use chrono::Utc;
use log::{error, info};

use crate::quote::QuoteService;

/// Periodically moves overdue pending quotes to `expired`.
pub struct QuoteSweeper {
    quotes: QuoteService,
    every: Duration,
}

impl QuoteSweeper {
    pub fn new(quotes: QuoteService, every: Duration) -> Self {
        QuoteSweeper { quotes, every }
    }
}

impl Actor for QuoteSweeper {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("Quote sweeper running every {:?}", self.every);
        ctx.run_interval(self.every, |act, ctx| {
            let quotes = act.quotes.clone();
            ctx.spawn(
                async move {
                    if let Err(e) = quotes.expire_overdue(Utc::now()).await {
                        error!("Quote sweep failed: {}", e);
                    }
                }
                .into_actor(act),
            );
        });
    }
}
