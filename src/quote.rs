// src/quote.rs

use std::sync::Arc;

use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use mongodb::bson::{doc, Document};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::auth::AuthUser;
use crate::catalog::CatalogService;
use crate::error::{FieldErrors, MarketplaceError, MarketplaceResult};
use crate::models::{
    format_quote_number, is_quote_number, Order, Quote, QuoteResponse, QuoteStatus, Requirements,
    Workflow, MAX_AMOUNT,
};
use crate::order::OrderService;
use crate::store::{Collection, DocumentStore, QUOTES};

const DESCRIPTION_MIN: usize = 10;
const DESCRIPTION_MAX: usize = 5000;
const RESPONSE_MESSAGE_MAX: usize = 2000;

// ─── REQUEST PAYLOADS ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateQuoteRequest {
    pub service_id: String,
    pub requirements: Requirements,
    pub requested_amount: Option<f64>,
    /// Overrides the default 30 day validity window.
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviseQuoteRequest {
    pub requirements: Requirements,
    pub requested_amount: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RespondQuoteRequest {
    pub quoted_amount: f64,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct QuoteQuery {
    pub status: Option<QuoteStatus>,
}

/// Result of accepting a quote: the updated quote and the order it became.
#[derive(Debug, Serialize)]
pub struct AcceptedQuote {
    pub quote: Quote,
    pub order: Order,
}

fn check_requirements(requirements: &Requirements, errors: &mut FieldErrors) {
    let len = requirements.description.trim().chars().count();
    if !(DESCRIPTION_MIN..=DESCRIPTION_MAX).contains(&len) {
        errors.push(
            "requirements.description",
            format!(
                "must be between {} and {} characters",
                DESCRIPTION_MIN, DESCRIPTION_MAX
            ),
        );
    }
}

fn check_amount(field: &str, amount: Option<f64>, errors: &mut FieldErrors) {
    if let Some(amount) = amount {
        if !amount.is_finite() || !(0.0..=MAX_AMOUNT).contains(&amount) {
            errors.push(field, format!("must be between 0 and {}", MAX_AMOUNT));
        }
    }
}

// ─── SERVICE ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct QuoteService {
    store: Arc<dyn DocumentStore>,
    quotes: Collection<Quote>,
    catalog: CatalogService,
    orders: OrderService,
}

impl QuoteService {
    pub fn new(store: Arc<dyn DocumentStore>, orders: OrderService) -> Self {
        QuoteService {
            quotes: Collection::new(store.clone(), QUOTES),
            catalog: CatalogService::new(store.clone()),
            store,
            orders,
        }
    }

    pub async fn create(
        &self,
        client_id: &str,
        request: CreateQuoteRequest,
    ) -> MarketplaceResult<Quote> {
        let now = Utc::now();
        let mut errors = FieldErrors::new();
        check_requirements(&request.requirements, &mut errors);
        check_amount("requestedAmount", request.requested_amount, &mut errors);
        if let Some(expires_at) = request.expires_at {
            if expires_at <= now {
                errors.push("expiresAt", "must be in the future");
            }
        }
        errors.into_result()?;

        let service = self.catalog.get_active(&request.service_id).await?;
        let sequence = self.store.next_sequence(QUOTES).await?;
        let quote = Quote {
            id: Uuid::new_v4().to_string(),
            quote_number: format_quote_number(sequence),
            client: client_id.to_string(),
            service: service.id,
            requested_amount: request.requested_amount,
            requirements: request.requirements,
            status: QuoteStatus::Pending,
            response: None,
            converted_to_order: None,
            expires_at: request
                .expires_at
                .unwrap_or_else(|| Quote::default_expiry(now)),
            created_at: now,
            updated_at: now,
        };
        self.quotes.insert(&quote).await?;
        info!("Quote created: {} for client {}", quote.quote_number, client_id);
        Ok(quote)
    }

    /// Resolves either an internal id or a public `QTE-` number.
    pub async fn get(&self, id_or_number: &str) -> MarketplaceResult<Quote> {
        let found = if is_quote_number(id_or_number) {
            self.quotes
                .find_one(doc! { "quoteNumber": id_or_number })
                .await?
        } else {
            self.quotes.find_by_id(id_or_number).await?
        };
        found.ok_or_else(|| MarketplaceError::not_found("Quote", id_or_number))
    }

    pub async fn get_for(&self, actor: &AuthUser, id: &str) -> MarketplaceResult<Quote> {
        let quote = self.get(id).await?;
        actor.ensure_can_view(&quote.client)?;
        Ok(quote)
    }

    pub async fn list(
        &self,
        actor: &AuthUser,
        status: Option<QuoteStatus>,
    ) -> MarketplaceResult<Vec<Quote>> {
        let mut filter = Document::new();
        if !actor.is_staff() {
            filter.insert("client", actor.id.as_str());
        }
        if let Some(status) = status {
            filter.insert("status", status.to_string());
        }
        let mut quotes = self.quotes.find(filter).await?;
        quotes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(quotes)
    }

    /// Client edits to a quote that is still open.
    pub async fn revise(
        &self,
        quote_id: &str,
        actor: &AuthUser,
        request: ReviseQuoteRequest,
    ) -> MarketplaceResult<Quote> {
        let mut quote = self.owned_by(quote_id, actor).await?;
        if quote.is_locked() || quote.status != QuoteStatus::Pending {
            return Err(MarketplaceError::invalid(
                "status",
                format!("a {} quote can no longer be edited", quote.status),
            ));
        }
        let mut errors = FieldErrors::new();
        check_requirements(&request.requirements, &mut errors);
        check_amount("requestedAmount", request.requested_amount, &mut errors);
        errors.into_result()?;

        quote.requirements = request.requirements;
        quote.requested_amount = request.requested_amount;
        quote.updated_at = Utc::now();
        self.save(&quote).await?;
        Ok(quote)
    }

    /// Prices the quote. The status stays `pending` until the client decides.
    pub async fn respond(
        &self,
        quote_id: &str,
        admin_id: &str,
        request: RespondQuoteRequest,
    ) -> MarketplaceResult<Quote> {
        let mut errors = FieldErrors::new();
        check_amount("quotedAmount", Some(request.quoted_amount), &mut errors);
        if request.message.chars().count() > RESPONSE_MESSAGE_MAX {
            errors.push(
                "message",
                format!("must be at most {} characters", RESPONSE_MESSAGE_MAX),
            );
        }
        errors.into_result()?;

        let mut quote = self.get(quote_id).await?;
        if quote.status != QuoteStatus::Pending || quote.is_locked() {
            return Err(MarketplaceError::InvalidTransition {
                entity: "Quote",
                from: quote.status.to_string(),
                to: "responded".into(),
            });
        }
        let now = Utc::now();
        quote.response = Some(QuoteResponse {
            responded_by: admin_id.to_string(),
            quoted_amount: request.quoted_amount,
            message: request.message.trim().to_string(),
            responded_at: now,
        });
        quote.updated_at = now;
        self.save(&quote).await?;
        info!(
            "Quote {} priced at {} by {}",
            quote.quote_number, request.quoted_amount, admin_id
        );
        Ok(quote)
    }

    /// Accepts the priced quote and converts it into an order.
    pub async fn accept(&self, quote_id: &str, actor: &AuthUser) -> MarketplaceResult<AcceptedQuote> {
        let quote = self.owned_by(quote_id, actor).await?;
        let now = Utc::now();
        let next = quote.status.transition(QuoteStatus::Accepted)?;
        if quote.response.is_none() {
            return Err(MarketplaceError::invalid(
                "response",
                "quote has not been priced yet",
            ));
        }
        if quote.is_overdue(now) {
            warn!("Client {} tried to accept overdue quote {}", actor.id, quote.quote_number);
            return Err(MarketplaceError::invalid("expiresAt", "quote has expired"));
        }

        // only one accept can move the stored quote off pending
        let mut claimed = quote.clone();
        claimed.status = next;
        claimed.updated_at = now;
        let pending = doc! {
            "_id": quote.id.as_str(),
            "status": QuoteStatus::Pending.to_string(),
        };
        if !self.quotes.replace_where(pending, &claimed).await? {
            let current = self.get(&quote.id).await?;
            warn!("Quote {} was already {}", quote.quote_number, current.status);
            return Err(MarketplaceError::InvalidTransition {
                entity: "Quote",
                from: current.status.to_string(),
                to: next.to_string(),
            });
        }

        let order = match self.orders.create_from_quote(&quote).await {
            Ok(order) => order,
            Err(e) => {
                if let Err(revert) = self.save(&quote).await {
                    error!("Failed to release quote {}: {}", quote.quote_number, revert);
                }
                return Err(e);
            }
        };
        let mut quote = claimed;
        quote.converted_to_order = Some(order.id.clone());
        self.save(&quote).await?;
        info!(
            "Quote {} accepted, converted to order {}",
            quote.quote_number, order.order_number
        );
        Ok(AcceptedQuote { quote, order })
    }

    pub async fn reject(&self, quote_id: &str, actor: &AuthUser) -> MarketplaceResult<Quote> {
        let mut quote = self.owned_by(quote_id, actor).await?;
        quote.status = quote.status.transition(QuoteStatus::Rejected)?;
        quote.updated_at = Utc::now();
        self.save(&quote).await?;
        info!("Quote {} rejected", quote.quote_number);
        Ok(quote)
    }

    /// Marks every pending quote whose validity ended at or before `now` as
    /// expired. Returns how many were changed.
    pub async fn expire_overdue(&self, now: DateTime<Utc>) -> MarketplaceResult<usize> {
        let pending = self
            .quotes
            .find(doc! { "status": QuoteStatus::Pending.to_string() })
            .await?;
        let mut expired = 0;
        for mut quote in pending.into_iter().filter(|q| q.is_overdue(now)) {
            quote.status = quote.status.transition(QuoteStatus::Expired)?;
            quote.updated_at = now;
            self.save(&quote).await?;
            expired += 1;
        }
        if expired > 0 {
            info!("Expired {} overdue quotes", expired);
        }
        Ok(expired)
    }

    async fn owned_by(&self, quote_id: &str, actor: &AuthUser) -> MarketplaceResult<Quote> {
        let quote = self.get(quote_id).await?;
        if quote.client != actor.id {
            return Err(MarketplaceError::Forbidden(
                "only the requesting client may do this".into(),
            ));
        }
        Ok(quote)
    }

    async fn save(&self, quote: &Quote) -> MarketplaceResult<()> {
        if self.quotes.replace(&quote.id, quote).await? {
            Ok(())
        } else {
            Err(MarketplaceError::not_found("Quote", quote.id.as_str()))
        }
    }
}

// ─── ENDPOINTS ────────────────────────────────────────────────────────────────

/// POST /api/quotes
pub async fn create_quote(
    data: web::Data<AppState>,
    user: AuthUser,
    payload: web::Json<CreateQuoteRequest>,
) -> MarketplaceResult<HttpResponse> {
    user.require_client()?;
    let quote = data.quotes().create(&user.id, payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(quote))
}

/// GET /api/quotes
pub async fn list_quotes(
    data: web::Data<AppState>,
    user: AuthUser,
    query: web::Query<QuoteQuery>,
) -> MarketplaceResult<HttpResponse> {
    let quotes = data.quotes().list(&user, query.status).await?;
    Ok(HttpResponse::Ok().json(quotes))
}

/// GET /api/quotes/{id}
pub async fn get_quote(
    data: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<String>,
) -> MarketplaceResult<HttpResponse> {
    let quote = data.quotes().get_for(&user, &path).await?;
    Ok(HttpResponse::Ok().json(quote))
}

/// PATCH /api/quotes/{id}
pub async fn revise_quote(
    data: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<String>,
    payload: web::Json<ReviseQuoteRequest>,
) -> MarketplaceResult<HttpResponse> {
    let quote = data
        .quotes()
        .revise(&path, &user, payload.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(quote))
}

/// PATCH /api/quotes/{id}/respond
pub async fn respond_quote(
    data: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<String>,
    payload: web::Json<RespondQuoteRequest>,
) -> MarketplaceResult<HttpResponse> {
    user.require_admin()?;
    let quote = data
        .quotes()
        .respond(&path, &user.id, payload.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(quote))
}

/// PATCH /api/quotes/{id}/accept
pub async fn accept_quote(
    data: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<String>,
) -> MarketplaceResult<HttpResponse> {
    let accepted = data.quotes().accept(&path, &user).await?;
    Ok(HttpResponse::Ok().json(accepted))
}

/// PATCH /api/quotes/{id}/reject
pub async fn reject_quote(
    data: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<String>,
) -> MarketplaceResult<HttpResponse> {
    let quote = data.quotes().reject(&path, &user).await?;
    Ok(HttpResponse::Ok().json(quote))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::web_dev_request;
    use crate::models::{OrderStatus, Role};
    use crate::store::MemoryStore;
    use chrono::Duration;

    struct Fixture {
        quotes: QuoteService,
        orders: OrderService,
        catalog: CatalogService,
        client: AuthUser,
    }

    fn fixture() -> Fixture {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let orders = OrderService::new(store.clone(), 0.0);
        Fixture {
            quotes: QuoteService::new(store.clone(), orders.clone()),
            orders,
            catalog: CatalogService::new(store),
            client: AuthUser { id: "client-1".into(), role: Role::Client },
        }
    }

    fn request(service_id: &str) -> CreateQuoteRequest {
        CreateQuoteRequest {
            service_id: service_id.to_string(),
            requirements: Requirements {
                description: "Need a five page marketing site".into(),
                attachments: vec!["https://files.example.com/brief.pdf".into()],
            },
            requested_amount: Some(400.0),
            expires_at: None,
        }
    }

    fn respond_with(amount: f64) -> RespondQuoteRequest {
        RespondQuoteRequest {
            quoted_amount: amount,
            message: "We can do it in two weeks".into(),
        }
    }

    #[tokio::test]
    async fn new_quotes_expire_thirty_days_after_creation() {
        let f = fixture();
        let service = f.catalog.create("admin-1", web_dev_request(500.0)).await.unwrap();
        let quote = f.quotes.create(&f.client.id, request(&service.id)).await.unwrap();

        assert_eq!(quote.quote_number, "QTE-000001");
        assert_eq!(quote.status, QuoteStatus::Pending);
        assert_eq!(quote.expires_at - quote.created_at, Duration::days(30));
    }

    #[tokio::test]
    async fn explicit_expiry_overrides_the_default() {
        let f = fixture();
        let service = f.catalog.create("admin-1", web_dev_request(500.0)).await.unwrap();
        let expires_at = Utc::now() + Duration::days(3);
        let mut req = request(&service.id);
        req.expires_at = Some(expires_at);
        let quote = f.quotes.create(&f.client.id, req).await.unwrap();
        assert_eq!(quote.expires_at, expires_at);

        let mut past = request(&service.id);
        past.expires_at = Some(Utc::now() - Duration::days(1));
        assert!(matches!(
            f.quotes.create(&f.client.id, past).await,
            Err(MarketplaceError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn responding_keeps_the_quote_pending() {
        let f = fixture();
        let service = f.catalog.create("admin-1", web_dev_request(500.0)).await.unwrap();
        let quote = f.quotes.create(&f.client.id, request(&service.id)).await.unwrap();
        let responded = f
            .quotes
            .respond(&quote.id, "admin-1", respond_with(450.0))
            .await
            .unwrap();
        assert_eq!(responded.status, QuoteStatus::Pending);
        assert_eq!(responded.response.unwrap().quoted_amount, 450.0);
    }

    #[tokio::test]
    async fn accepting_creates_an_order_at_the_quoted_amount() {
        let f = fixture();
        let service = f.catalog.create("admin-1", web_dev_request(500.0)).await.unwrap();
        let quote = f.quotes.create(&f.client.id, request(&service.id)).await.unwrap();
        f.quotes
            .respond(&quote.id, "admin-1", respond_with(450.0))
            .await
            .unwrap();

        let accepted = f.quotes.accept(&quote.quote_number, &f.client).await.unwrap();
        assert_eq!(accepted.quote.status, QuoteStatus::Accepted);
        assert_eq!(
            accepted.quote.converted_to_order.as_deref(),
            Some(accepted.order.id.as_str())
        );
        assert_eq!(accepted.order.custom_amount, Some(450.0));
        assert_eq!(accepted.order.pricing.total_amount, 450.0);
        assert_eq!(accepted.order.quote.as_deref(), Some(quote.id.as_str()));
        assert_eq!(accepted.order.status, OrderStatus::Pending);

        let stored = f.orders.get(&accepted.order.id).await.unwrap();
        assert_eq!(stored.order_number, "TBX-000001");
    }

    #[tokio::test]
    async fn accepting_a_rejected_quote_is_an_invalid_transition() {
        let f = fixture();
        let service = f.catalog.create("admin-1", web_dev_request(500.0)).await.unwrap();
        let quote = f.quotes.create(&f.client.id, request(&service.id)).await.unwrap();
        f.quotes
            .respond(&quote.id, "admin-1", respond_with(450.0))
            .await
            .unwrap();
        f.quotes.reject(&quote.id, &f.client).await.unwrap();

        let err = f.quotes.accept(&quote.id, &f.client).await.unwrap_err();
        assert!(matches!(err, MarketplaceError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn unpriced_quotes_cannot_be_accepted() {
        let f = fixture();
        let service = f.catalog.create("admin-1", web_dev_request(500.0)).await.unwrap();
        let quote = f.quotes.create(&f.client.id, request(&service.id)).await.unwrap();
        let err = f.quotes.accept(&quote.id, &f.client).await.unwrap_err();
        assert!(matches!(err, MarketplaceError::Validation(_)));
    }

    #[tokio::test]
    async fn converted_quotes_are_locked() {
        let f = fixture();
        let service = f.catalog.create("admin-1", web_dev_request(500.0)).await.unwrap();
        let quote = f.quotes.create(&f.client.id, request(&service.id)).await.unwrap();
        f.quotes
            .respond(&quote.id, "admin-1", respond_with(450.0))
            .await
            .unwrap();
        f.quotes.accept(&quote.id, &f.client).await.unwrap();

        let revise = f
            .quotes
            .revise(
                &quote.id,
                &f.client,
                ReviseQuoteRequest {
                    requirements: Requirements {
                        description: "Actually make it ten pages".into(),
                        attachments: vec![],
                    },
                    requested_amount: None,
                },
            )
            .await;
        assert!(matches!(revise, Err(MarketplaceError::Validation(_))));

        let respond = f.quotes.respond(&quote.id, "admin-1", respond_with(10.0)).await;
        assert!(matches!(respond, Err(MarketplaceError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn sweep_expires_only_overdue_pending_quotes() {
        let f = fixture();
        let service = f.catalog.create("admin-1", web_dev_request(500.0)).await.unwrap();
        let fresh = f.quotes.create(&f.client.id, request(&service.id)).await.unwrap();
        let mut short = request(&service.id);
        short.expires_at = Some(Utc::now() + Duration::days(1));
        let soon = f.quotes.create(&f.client.id, short).await.unwrap();

        let expired = f
            .quotes
            .expire_overdue(Utc::now() + Duration::days(2))
            .await
            .unwrap();
        assert_eq!(expired, 1);
        assert_eq!(f.quotes.get(&soon.id).await.unwrap().status, QuoteStatus::Expired);
        assert_eq!(f.quotes.get(&fresh.id).await.unwrap().status, QuoteStatus::Pending);

        // expired quotes are terminal
        let err = f.quotes.accept(&soon.id, &f.client).await.unwrap_err();
        assert!(matches!(err, MarketplaceError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn overlapping_accepts_create_a_single_order() {
        let f = fixture();
        let service = f.catalog.create("admin-1", web_dev_request(500.0)).await.unwrap();
        let quote = f.quotes.create(&f.client.id, request(&service.id)).await.unwrap();
        f.quotes
            .respond(&quote.id, "admin-1", respond_with(450.0))
            .await
            .unwrap();

        let (first, second) = tokio::join!(
            f.quotes.accept(&quote.id, &f.client),
            f.quotes.accept(&quote.id, &f.client),
        );
        let results = [first, second];
        let won: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(won.len(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(MarketplaceError::InvalidTransition { .. }))));

        let orders = f.orders.list(&f.client, None).await.unwrap();
        assert_eq!(orders.len(), 1);
        let stored = f.quotes.get(&quote.id).await.unwrap();
        assert_eq!(stored.converted_to_order.as_deref(), Some(orders[0].id.as_str()));
        assert_eq!(won[0].order.id, orders[0].id);
    }

    #[tokio::test]
    async fn amounts_above_the_ceiling_are_rejected() {
        let f = fixture();
        let service = f.catalog.create("admin-1", web_dev_request(500.0)).await.unwrap();
        let mut req = request(&service.id);
        req.requested_amount = Some(1e308);
        assert!(matches!(
            f.quotes.create(&f.client.id, req).await,
            Err(MarketplaceError::Validation(_))
        ));

        let quote = f.quotes.create(&f.client.id, request(&service.id)).await.unwrap();
        assert!(matches!(
            f.quotes.respond(&quote.id, "admin-1", respond_with(1e308)).await,
            Err(MarketplaceError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn other_clients_cannot_accept() {
        let f = fixture();
        let service = f.catalog.create("admin-1", web_dev_request(500.0)).await.unwrap();
        let quote = f.quotes.create(&f.client.id, request(&service.id)).await.unwrap();
        let stranger = AuthUser { id: "client-2".into(), role: Role::Client };
        assert!(matches!(
            f.quotes.accept(&quote.id, &stranger).await,
            Err(MarketplaceError::Forbidden(_))
        ));
    }
}
