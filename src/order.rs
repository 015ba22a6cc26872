// src/order.rs

use std::sync::Arc;

use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use log::{info, warn};
use mongodb::bson::{doc, Document};
use serde::Deserialize;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::auth::AuthUser;
use crate::catalog::CatalogService;
use crate::error::{FieldErrors, MarketplaceError, MarketplaceResult};
use crate::models::{
    format_order_number, is_order_number, round_cents, Deliverable, Milestone, Order,
    OrderCommunication, OrderStatus, Payment, PaymentMethod, PaymentStatus, PricingBreakdown,
    PricingType, Quote, Requirements, Review, Role, StatusChange, Workflow, MAX_AMOUNT,
};
use crate::store::{Collection, DocumentStore, ORDERS, ORDER_COMMUNICATIONS};

const MAX_QUANTITY: u32 = 1000;
const REQUIREMENTS_MAX: usize = 5000;
const MESSAGE_MAX: usize = 2000;

// ─── REQUEST PAYLOADS ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub service_id: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    #[serde(default)]
    pub requirements: Requirements,
}

fn default_quantity() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    pub status: OrderStatus,
    /// Optional actor message, logged with the status change.
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmPaymentRequest {
    pub method: PaymentMethod,
    pub transaction_id: String,
}

#[derive(Debug, Deserialize)]
pub struct PaymentFailureRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct DeliverableRequest {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MilestoneRequest {
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    pub rating: u8,
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CommunicationRequest {
    pub message: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct OrderQuery {
    pub status: Option<OrderStatus>,
}

fn check_requirements(requirements: &Requirements, errors: &mut FieldErrors) {
    if requirements.description.chars().count() > REQUIREMENTS_MAX {
        errors.push(
            "requirements.description",
            format!("must be at most {} characters", REQUIREMENTS_MAX),
        );
    }
}

fn check_message(message: &str) -> MarketplaceResult<()> {
    let len = message.trim().chars().count();
    if len == 0 || len > MESSAGE_MAX {
        return Err(MarketplaceError::invalid(
            "message",
            format!("must be 1 to {} characters", MESSAGE_MAX),
        ));
    }
    Ok(())
}

// ─── SERVICE ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct OrderService {
    store: Arc<dyn DocumentStore>,
    orders: Collection<Order>,
    communications: Collection<OrderCommunication>,
    catalog: CatalogService,
    tax_rate: f64,
}

impl OrderService {
    pub fn new(store: Arc<dyn DocumentStore>, tax_rate: f64) -> Self {
        OrderService {
            orders: Collection::new(store.clone(), ORDERS),
            communications: Collection::new(store.clone(), ORDER_COMMUNICATIONS),
            catalog: CatalogService::new(store.clone()),
            store,
            tax_rate,
        }
    }

    /// Draws the next `TBX-NNNNNN` number from the store's order sequence.
    async fn next_order_number(&self) -> MarketplaceResult<String> {
        let sequence = self.store.next_sequence(ORDERS).await?;
        Ok(format_order_number(sequence))
    }

    /// Places an order for a fixed or hourly priced service.
    pub async fn create(
        &self,
        client_id: &str,
        request: CreateOrderRequest,
    ) -> MarketplaceResult<Order> {
        let mut errors = FieldErrors::new();
        if request.quantity == 0 || request.quantity > MAX_QUANTITY {
            errors.push("quantity", format!("must be between 1 and {}", MAX_QUANTITY));
        }
        check_requirements(&request.requirements, &mut errors);
        errors.into_result()?;

        let service = self.catalog.get_active(&request.service_id).await?;
        let unit_price = match (service.pricing.kind, service.pricing.amount) {
            (PricingType::Fixed | PricingType::Hourly, Some(amount)) => amount,
            _ => {
                return Err(MarketplaceError::invalid(
                    "serviceId",
                    "this service is priced by quote; request a quote first",
                ))
            }
        };

        let pricing = PricingBreakdown::compute(
            unit_price,
            request.quantity,
            self.tax_rate,
            &service.pricing.currency,
        );
        if unit_price > MAX_AMOUNT || !pricing.is_finite() {
            return Err(MarketplaceError::invalid(
                "quantity",
                "order total is out of range for this service",
            ));
        }
        let order = self
            .build(
                client_id,
                &service.id,
                None,
                request.quantity,
                None,
                pricing,
                request.requirements,
            )
            .await?;
        self.orders.insert(&order).await?;
        info!("Order created: {} for client {}", order.order_number, client_id);
        Ok(order)
    }

    /// Turns an accepted quote into an order priced at the quoted amount.
    pub async fn create_from_quote(&self, quote: &Quote) -> MarketplaceResult<Order> {
        let response = quote.response.as_ref().ok_or_else(|| {
            MarketplaceError::invalid("response", "quote has not been priced yet")
        })?;
        let service = self.catalog.get(&quote.service).await?;
        let amount = round_cents(response.quoted_amount);
        let pricing = PricingBreakdown::compute(amount, 1, self.tax_rate, &service.pricing.currency);
        if amount > MAX_AMOUNT || !pricing.is_finite() {
            return Err(MarketplaceError::invalid(
                "serviceId",
                "quoted amount is out of range",
            ));
        }
        let order = self
            .build(
                &quote.client,
                &quote.service,
                Some(quote.id.clone()),
                1,
                Some(amount),
                pricing,
                quote.requirements.clone(),
            )
            .await?;
        self.orders.insert(&order).await?;
        info!(
            "Order {} created from quote {}",
            order.order_number, quote.quote_number
        );
        Ok(order)
    }

    #[allow(clippy::too_many_arguments)]
    async fn build(
        &self,
        client_id: &str,
        service_id: &str,
        quote_id: Option<String>,
        quantity: u32,
        custom_amount: Option<f64>,
        pricing: PricingBreakdown,
        requirements: Requirements,
    ) -> MarketplaceResult<Order> {
        let now = Utc::now();
        Ok(Order {
            id: Uuid::new_v4().to_string(),
            order_number: self.next_order_number().await?,
            client: client_id.to_string(),
            service: service_id.to_string(),
            quote: quote_id,
            quantity,
            custom_amount,
            pricing,
            requirements,
            payment: Payment::default(),
            deliverables: Vec::new(),
            milestones: Vec::new(),
            review: None,
            status: OrderStatus::Pending,
            cancellation_reason: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Resolves either an internal id or a public `TBX-` number.
    pub async fn get(&self, id_or_number: &str) -> MarketplaceResult<Order> {
        let found = if is_order_number(id_or_number) {
            self.orders
                .find_one(doc! { "orderNumber": id_or_number })
                .await?
        } else {
            self.orders.find_by_id(id_or_number).await?
        };
        found.ok_or_else(|| MarketplaceError::not_found("Order", id_or_number))
    }

    pub async fn get_for(&self, actor: &AuthUser, id: &str) -> MarketplaceResult<Order> {
        let order = self.get(id).await?;
        actor.ensure_can_view(&order.client)?;
        Ok(order)
    }

    /// Clients see their own orders, staff see every order. Newest first.
    pub async fn list(
        &self,
        actor: &AuthUser,
        status: Option<OrderStatus>,
    ) -> MarketplaceResult<Vec<Order>> {
        let mut filter = Document::new();
        if !actor.is_staff() {
            filter.insert("client", actor.id.as_str());
        }
        if let Some(status) = status {
            filter.insert("status", status.to_string());
        }
        let mut orders = self.orders.find(filter).await?;
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    pub async fn transition(
        &self,
        order_id: &str,
        actor: &AuthUser,
        next: OrderStatus,
        note: Option<String>,
    ) -> MarketplaceResult<Order> {
        let mut order = self.get(order_id).await?;
        match actor.role {
            Role::Admin => {}
            Role::Client
                if order.client == actor.id
                    && order.status == OrderStatus::Pending
                    && next == OrderStatus::Cancelled => {}
            _ => {
                warn!(
                    "User {} ({}) attempted {} -> {} on order {}",
                    actor.id, actor.role, order.status, next, order.order_number
                );
                return Err(MarketplaceError::Forbidden(
                    "only admins may change this order's status".into(),
                ));
            }
        }
        if let Some(note) = &note {
            check_message(note)?;
        }

        let now = Utc::now();
        let previous = order.apply_status(next, note.as_deref(), now)?;
        self.save(&order).await?;
        info!(
            "Order {} moved {} -> {} by {}",
            order.order_number, previous, next, actor.id
        );

        if let Some(message) = note {
            self.append_communication(
                &order.id,
                &actor.id,
                message,
                Some(StatusChange { from: previous, to: next }),
                now,
            )
            .await?;
        }
        Ok(order)
    }

    /// Records a successful gateway payment and advances the order.
    pub async fn confirm_payment(
        &self,
        order_id: &str,
        method: PaymentMethod,
        transaction_id: &str,
    ) -> MarketplaceResult<Order> {
        if transaction_id.trim().is_empty() {
            return Err(MarketplaceError::invalid("transactionId", "is required"));
        }
        let mut order = self.get(order_id).await?;
        let now = Utc::now();
        order.apply_status(OrderStatus::PaymentConfirmed, None, now)?;
        order.payment.method = Some(method);
        order.payment.transaction_id = Some(transaction_id.trim().to_string());
        order.payment.paid_at = Some(now);
        self.save(&order).await?;
        info!(
            "Payment confirmed for order {} ({})",
            order.order_number, transaction_id
        );
        Ok(order)
    }

    pub async fn record_payment_failure(
        &self,
        order_id: &str,
        reason: &str,
    ) -> MarketplaceResult<Order> {
        let mut order = self.get(order_id).await?;
        if order.status != OrderStatus::Pending {
            return Err(MarketplaceError::InvalidTransition {
                entity: "Payment",
                from: order.status.to_string(),
                to: "failed".into(),
            });
        }
        order.payment.status = PaymentStatus::Failed;
        order.payment.failure_reason = Some(reason.trim().to_string());
        order.updated_at = Utc::now();
        self.save(&order).await?;
        warn!("Payment failed for order {}: {}", order.order_number, reason);
        Ok(order)
    }

    pub async fn add_deliverable(
        &self,
        order_id: &str,
        request: DeliverableRequest,
    ) -> MarketplaceResult<Order> {
        let mut errors = FieldErrors::new();
        if request.name.trim().is_empty() {
            errors.push("name", "is required");
        }
        if !(request.url.starts_with("https://") || request.url.starts_with("http://")) {
            errors.push("url", "must be an http(s) URL");
        }
        errors.into_result()?;

        let mut order = self.get(order_id).await?;
        if order.status.is_terminal() {
            return Err(MarketplaceError::invalid(
                "status",
                format!("order is {}", order.status),
            ));
        }
        let now = Utc::now();
        order.deliverables.push(Deliverable {
            name: request.name.trim().to_string(),
            url: request.url,
            uploaded_at: now,
        });
        order.updated_at = now;
        self.save(&order).await?;
        Ok(order)
    }

    pub async fn add_milestone(
        &self,
        order_id: &str,
        request: MilestoneRequest,
    ) -> MarketplaceResult<Order> {
        if request.title.trim().is_empty() {
            return Err(MarketplaceError::invalid("title", "is required"));
        }
        let mut order = self.get(order_id).await?;
        order.milestones.push(Milestone {
            title: request.title.trim().to_string(),
            description: request.description,
            due_date: request.due_date,
            completed: false,
            completed_at: None,
        });
        order.updated_at = Utc::now();
        self.save(&order).await?;
        Ok(order)
    }

    pub async fn complete_milestone(&self, order_id: &str, index: usize) -> MarketplaceResult<Order> {
        let mut order = self.get(order_id).await?;
        let now = Utc::now();
        let milestone = order
            .milestones
            .get_mut(index)
            .ok_or_else(|| MarketplaceError::not_found("Milestone", index.to_string()))?;
        if !milestone.completed {
            milestone.completed = true;
            milestone.completed_at = Some(now);
            order.updated_at = now;
            self.save(&order).await?;
        }
        Ok(order)
    }

    /// One review per completed order; feeds the service rating aggregate.
    pub async fn submit_review(
        &self,
        order_id: &str,
        actor: &AuthUser,
        request: ReviewRequest,
    ) -> MarketplaceResult<Order> {
        if !(1..=5).contains(&request.rating) {
            return Err(MarketplaceError::invalid("rating", "must be between 1 and 5"));
        }
        let mut order = self.get(order_id).await?;
        if order.client != actor.id {
            return Err(MarketplaceError::Forbidden(
                "only the ordering client may review".into(),
            ));
        }
        if order.status != OrderStatus::Completed {
            return Err(MarketplaceError::invalid(
                "status",
                "only completed orders can be reviewed",
            ));
        }
        if order.review.is_some() {
            return Err(MarketplaceError::invalid("review", "already submitted"));
        }
        let now = Utc::now();
        order.review = Some(Review {
            rating: request.rating,
            comment: request.comment,
            created_at: now,
        });
        order.updated_at = now;
        self.save(&order).await?;
        self.catalog.record_rating(&order.service, request.rating).await?;
        info!("Order {} reviewed: {}/5", order.order_number, request.rating);
        Ok(order)
    }

    pub async fn post_communication(
        &self,
        order_id: &str,
        actor: &AuthUser,
        message: String,
    ) -> MarketplaceResult<OrderCommunication> {
        check_message(&message)?;
        let order = self.get_for(actor, order_id).await?;
        self.append_communication(&order.id, &actor.id, message, None, Utc::now())
            .await
    }

    /// Oldest first.
    pub async fn list_communications(
        &self,
        order_id: &str,
        actor: &AuthUser,
    ) -> MarketplaceResult<Vec<OrderCommunication>> {
        let order = self.get_for(actor, order_id).await?;
        let mut entries = self
            .communications
            .find(doc! { "order": order.id.as_str() })
            .await?;
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(entries)
    }

    async fn append_communication(
        &self,
        order_id: &str,
        author: &str,
        message: String,
        status_change: Option<StatusChange>,
        at: DateTime<Utc>,
    ) -> MarketplaceResult<OrderCommunication> {
        let entry = OrderCommunication {
            id: Uuid::new_v4().to_string(),
            order: order_id.to_string(),
            author: author.to_string(),
            message: message.trim().to_string(),
            status_change,
            created_at: at,
        };
        self.communications.insert(&entry).await?;
        Ok(entry)
    }

    async fn save(&self, order: &Order) -> MarketplaceResult<()> {
        if self.orders.replace(&order.id, order).await? {
            Ok(())
        } else {
            Err(MarketplaceError::not_found("Order", order.id.as_str()))
        }
    }
}

// ─── ENDPOINTS ────────────────────────────────────────────────────────────────

/// POST /api/orders
pub async fn create_order(
    data: web::Data<AppState>,
    user: AuthUser,
    payload: web::Json<CreateOrderRequest>,
) -> MarketplaceResult<HttpResponse> {
    user.require_client()?;
    let order = data.orders().create(&user.id, payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(order))
}

/// GET /api/orders
pub async fn list_orders(
    data: web::Data<AppState>,
    user: AuthUser,
    query: web::Query<OrderQuery>,
) -> MarketplaceResult<HttpResponse> {
    let orders = data.orders().list(&user, query.status).await?;
    Ok(HttpResponse::Ok().json(orders))
}

/// GET /api/orders/{id}
pub async fn get_order(
    data: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<String>,
) -> MarketplaceResult<HttpResponse> {
    let order = data.orders().get_for(&user, &path).await?;
    Ok(HttpResponse::Ok().json(order))
}

/// PATCH /api/orders/{id}/status
pub async fn update_order_status(
    data: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<String>,
    payload: web::Json<TransitionRequest>,
) -> MarketplaceResult<HttpResponse> {
    let TransitionRequest { status, note } = payload.into_inner();
    let order = data.orders().transition(&path, &user, status, note).await?;
    Ok(HttpResponse::Ok().json(order))
}

/// POST /api/orders/{id}/payment
pub async fn confirm_payment(
    data: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<String>,
    payload: web::Json<ConfirmPaymentRequest>,
) -> MarketplaceResult<HttpResponse> {
    user.require_admin()?;
    let order = data
        .orders()
        .confirm_payment(&path, payload.method, &payload.transaction_id)
        .await?;
    Ok(HttpResponse::Ok().json(order))
}

/// POST /api/orders/{id}/payment/failure
pub async fn payment_failed(
    data: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<String>,
    payload: web::Json<PaymentFailureRequest>,
) -> MarketplaceResult<HttpResponse> {
    user.require_admin()?;
    let order = data
        .orders()
        .record_payment_failure(&path, &payload.reason)
        .await?;
    Ok(HttpResponse::Ok().json(order))
}

/// POST /api/orders/{id}/deliverables
pub async fn add_deliverable(
    data: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<String>,
    payload: web::Json<DeliverableRequest>,
) -> MarketplaceResult<HttpResponse> {
    user.require_admin()?;
    let order = data
        .orders()
        .add_deliverable(&path, payload.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(order))
}

/// POST /api/orders/{id}/milestones
pub async fn add_milestone(
    data: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<String>,
    payload: web::Json<MilestoneRequest>,
) -> MarketplaceResult<HttpResponse> {
    user.require_admin()?;
    let order = data.orders().add_milestone(&path, payload.into_inner()).await?;
    Ok(HttpResponse::Ok().json(order))
}

/// PATCH /api/orders/{id}/milestones/{index}/complete
pub async fn complete_milestone(
    data: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<(String, usize)>,
) -> MarketplaceResult<HttpResponse> {
    user.require_admin()?;
    let (order_id, index) = path.into_inner();
    let order = data.orders().complete_milestone(&order_id, index).await?;
    Ok(HttpResponse::Ok().json(order))
}

/// POST /api/orders/{id}/review
pub async fn submit_review(
    data: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<String>,
    payload: web::Json<ReviewRequest>,
) -> MarketplaceResult<HttpResponse> {
    let order = data
        .orders()
        .submit_review(&path, &user, payload.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(order))
}

/// GET /api/orders/{id}/communications
pub async fn list_communications(
    data: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<String>,
) -> MarketplaceResult<HttpResponse> {
    let entries = data.orders().list_communications(&path, &user).await?;
    Ok(HttpResponse::Ok().json(entries))
}

/// POST /api/orders/{id}/communications
pub async fn post_communication(
    data: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<String>,
    payload: web::Json<CommunicationRequest>,
) -> MarketplaceResult<HttpResponse> {
    let entry = data
        .orders()
        .post_communication(&path, &user, payload.into_inner().message)
        .await?;
    Ok(HttpResponse::Created().json(entry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::web_dev_request;
    use crate::models::Service;
    use crate::store::{MemoryStore, SERVICES};

    struct Fixture {
        store: Arc<dyn DocumentStore>,
        orders: OrderService,
        catalog: CatalogService,
        admin: AuthUser,
        client: AuthUser,
    }

    fn fixture() -> Fixture {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        Fixture {
            orders: OrderService::new(store.clone(), 0.0),
            catalog: CatalogService::new(store.clone()),
            store,
            admin: AuthUser { id: "admin-1".into(), role: Role::Admin },
            client: AuthUser { id: "client-1".into(), role: Role::Client },
        }
    }

    async fn place_order(f: &Fixture) -> Order {
        let service = f.catalog.create("admin-1", web_dev_request(500.0)).await.unwrap();
        f.orders
            .create(
                &f.client.id,
                CreateOrderRequest {
                    service_id: service.id,
                    quantity: 2,
                    requirements: Requirements {
                        description: "Two landing pages".into(),
                        attachments: vec![],
                    },
                },
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn create_prices_by_quantity_and_numbers_sequentially() {
        let f = fixture();
        let first = place_order(&f).await;
        let second = place_order(&f).await;

        assert_eq!(first.order_number, "TBX-000001");
        assert_eq!(second.order_number, "TBX-000002");
        assert_eq!(first.pricing.subtotal, 1000.0);
        assert_eq!(first.pricing.total_amount, 1000.0);
        assert_eq!(first.status, OrderStatus::Pending);
        assert_eq!(first.payment.status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn order_numbers_are_unique_under_concurrent_creation() {
        let f = fixture();
        let service = f.catalog.create("admin-1", web_dev_request(100.0)).await.unwrap();
        let creations = (0..25).map(|_| {
            f.orders.create(
                "client-1",
                CreateOrderRequest {
                    service_id: service.id.clone(),
                    quantity: 1,
                    requirements: Requirements::default(),
                },
            )
        });
        let orders: Vec<Order> = futures::future::join_all(creations)
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();

        let mut numbers: Vec<&str> = orders.iter().map(|o| o.order_number.as_str()).collect();
        assert!(numbers.iter().all(|n| is_order_number(n)));
        numbers.sort_unstable();
        numbers.dedup();
        assert_eq!(numbers.len(), 25);
    }

    #[tokio::test]
    async fn quote_priced_services_cannot_be_ordered_directly() {
        let f = fixture();
        let mut request = web_dev_request(0.0);
        request.pricing.kind = Some("quote".into());
        let service = f.catalog.create("admin-1", request).await.unwrap();

        let err = f
            .orders
            .create(
                "client-1",
                CreateOrderRequest {
                    service_id: service.id,
                    quantity: 1,
                    requirements: Requirements::default(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MarketplaceError::Validation(_)));
    }

    #[tokio::test]
    async fn out_of_range_prices_never_reach_an_order() {
        let f = fixture();
        let service = f.catalog.create("admin-1", web_dev_request(500.0)).await.unwrap();

        // a service document written before the price ceiling existed
        let raw: Collection<Service> = Collection::new(f.store.clone(), SERVICES);
        let mut legacy = service.clone();
        legacy.pricing.amount = Some(1e308);
        assert!(raw.replace(&legacy.id, &legacy).await.unwrap());

        let err = f
            .orders
            .create(
                "client-1",
                CreateOrderRequest {
                    service_id: service.id,
                    quantity: 2,
                    requirements: Requirements::default(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MarketplaceError::Validation(_)));
        assert!(f.orders.list(&f.admin, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn pending_to_completed_is_rejected() {
        let f = fixture();
        let order = place_order(&f).await;
        let err = f
            .orders
            .transition(&order.id, &f.admin, OrderStatus::Completed, None)
            .await
            .unwrap_err();
        assert!(matches!(err, MarketplaceError::InvalidTransition { .. }));
        assert_eq!(f.orders.get(&order.id).await.unwrap().status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn full_workflow_succeeds_in_sequence() {
        let f = fixture();
        let order = place_order(&f).await;
        for next in [
            OrderStatus::PaymentConfirmed,
            OrderStatus::InProgress,
            OrderStatus::UnderReview,
            OrderStatus::Completed,
        ] {
            let updated = f
                .orders
                .transition(&order.id, &f.admin, next, None)
                .await
                .unwrap();
            assert_eq!(updated.status, next);
        }
        let stored = f.orders.get(&order.order_number).await.unwrap();
        assert_eq!(stored.status, OrderStatus::Completed);
        assert!(stored.status.is_terminal());
    }

    #[tokio::test]
    async fn clients_may_only_cancel_their_pending_orders() {
        let f = fixture();
        let order = place_order(&f).await;

        let err = f
            .orders
            .transition(&order.id, &f.client, OrderStatus::PaymentConfirmed, None)
            .await
            .unwrap_err();
        assert!(matches!(err, MarketplaceError::Forbidden(_)));

        let cancelled = f
            .orders
            .transition(
                &order.id,
                &f.client,
                OrderStatus::Cancelled,
                Some("Changed my mind".into()),
            )
            .await
            .unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(cancelled.cancellation_reason.as_deref(), Some("Changed my mind"));

        let log = f.orders.list_communications(&order.id, &f.client).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(
            log[0].status_change,
            Some(StatusChange {
                from: OrderStatus::Pending,
                to: OrderStatus::Cancelled
            })
        );
    }

    #[tokio::test]
    async fn payment_confirmation_records_gateway_details() {
        let f = fixture();
        let order = place_order(&f).await;
        let paid = f
            .orders
            .confirm_payment(&order.id, PaymentMethod::Stripe, "pi_123")
            .await
            .unwrap();
        assert_eq!(paid.status, OrderStatus::PaymentConfirmed);
        assert_eq!(paid.payment.status, PaymentStatus::Completed);
        assert_eq!(paid.payment.transaction_id.as_deref(), Some("pi_123"));
        assert!(paid.payment.paid_at.is_some());

        let err = f
            .orders
            .confirm_payment(&order.id, PaymentMethod::Stripe, "pi_456")
            .await
            .unwrap_err();
        assert!(matches!(err, MarketplaceError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn payment_failure_keeps_the_order_pending() {
        let f = fixture();
        let order = place_order(&f).await;
        let failed = f
            .orders
            .record_payment_failure(&order.id, "card declined")
            .await
            .unwrap();
        assert_eq!(failed.status, OrderStatus::Pending);
        assert_eq!(failed.payment.status, PaymentStatus::Failed);

        let paid = f
            .orders
            .confirm_payment(&order.id, PaymentMethod::Paypal, "PAY-1")
            .await
            .unwrap();
        assert_eq!(paid.payment.status, PaymentStatus::Completed);
        assert_eq!(paid.payment.failure_reason, None);
    }

    #[tokio::test]
    async fn reviews_require_completion_and_update_the_service_rating() {
        let f = fixture();
        let order = place_order(&f).await;
        let review = || ReviewRequest { rating: 5, comment: Some("Great".into()) };

        let err = f
            .orders
            .submit_review(&order.id, &f.client, review())
            .await
            .unwrap_err();
        assert!(matches!(err, MarketplaceError::Validation(_)));

        for next in [
            OrderStatus::PaymentConfirmed,
            OrderStatus::InProgress,
            OrderStatus::UnderReview,
            OrderStatus::Completed,
        ] {
            f.orders.transition(&order.id, &f.admin, next, None).await.unwrap();
        }
        f.orders.submit_review(&order.id, &f.client, review()).await.unwrap();

        let service = f.catalog.get(&order.service).await.unwrap();
        assert_eq!(service.rating.count, 1);
        assert_eq!(service.rating.average, 5.0);

        let err = f
            .orders
            .submit_review(&order.id, &f.client, review())
            .await
            .unwrap_err();
        assert!(matches!(err, MarketplaceError::Validation(_)));
    }

    #[tokio::test]
    async fn milestones_and_deliverables_accumulate() {
        let f = fixture();
        let order = place_order(&f).await;
        f.orders
            .add_milestone(
                &order.id,
                MilestoneRequest {
                    title: "Wireframes".into(),
                    description: None,
                    due_date: None,
                },
            )
            .await
            .unwrap();
        let done = f.orders.complete_milestone(&order.id, 0).await.unwrap();
        assert!(done.milestones[0].completed);
        assert!(matches!(
            f.orders.complete_milestone(&order.id, 3).await,
            Err(MarketplaceError::NotFound { .. })
        ));

        let delivered = f
            .orders
            .add_deliverable(
                &order.id,
                DeliverableRequest {
                    name: "Mockups".into(),
                    url: "https://files.example.com/mockups.zip".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(delivered.deliverables.len(), 1);
    }

    #[tokio::test]
    async fn other_clients_cannot_read_an_order() {
        let f = fixture();
        let order = place_order(&f).await;
        let stranger = AuthUser { id: "client-2".into(), role: Role::Client };
        assert!(matches!(
            f.orders.get_for(&stranger, &order.id).await,
            Err(MarketplaceError::Forbidden(_))
        ));
        assert!(f.orders.list(&stranger, None).await.unwrap().is_empty());
        assert_eq!(f.orders.list(&f.admin, None).await.unwrap().len(), 1);
    }
}
