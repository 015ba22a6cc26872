use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

use super::{Requirements, Workflow};
use crate::error::MarketplaceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    PaymentConfirmed,
    InProgress,
    UnderReview,
    Completed,
    Cancelled,
    Refunded,
}

impl Workflow for OrderStatus {
    const ENTITY: &'static str = "Order";

    fn successors(self) -> &'static [Self] {
        use OrderStatus::*;
        match self {
            Pending => &[PaymentConfirmed, Cancelled],
            PaymentConfirmed => &[InProgress, Cancelled, Refunded],
            InProgress => &[UnderReview, Cancelled, Refunded],
            UnderReview => &[Completed, Refunded],
            Completed | Cancelled | Refunded => &[],
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Pending => "pending",
            OrderStatus::PaymentConfirmed => "payment_confirmed",
            OrderStatus::InProgress => "in_progress",
            OrderStatus::UnderReview => "under_review",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Refunded => "refunded",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Stripe,
    Paypal,
    BankTransfer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub status: PaymentStatus,
    pub method: Option<PaymentMethod>,
    pub transaction_id: Option<String>,
    pub failure_reason: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
}

impl Default for Payment {
    fn default() -> Self {
        Payment {
            status: PaymentStatus::Pending,
            method: None,
            transaction_id: None,
            failure_reason: None,
            paid_at: None,
            refunded_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingBreakdown {
    pub base_price: f64,
    pub quantity: u32,
    pub subtotal: f64,
    pub discount: f64,
    pub tax: f64,
    pub total_amount: f64,
    pub currency: String,
}

impl PricingBreakdown {
    /// `base_price × quantity`, then tax on the discounted subtotal.
    pub fn compute(base_price: f64, quantity: u32, tax_rate: f64, currency: &str) -> Self {
        let subtotal = round_cents(base_price * f64::from(quantity));
        let discount = 0.0;
        let tax = round_cents((subtotal - discount) * tax_rate);
        PricingBreakdown {
            base_price: round_cents(base_price),
            quantity,
            subtotal,
            discount,
            tax,
            total_amount: round_cents(subtotal - discount + tax),
            currency: currency.to_string(),
        }
    }

    pub fn is_finite(&self) -> bool {
        [self.base_price, self.subtotal, self.tax, self.total_amount]
            .iter()
            .all(|v| v.is_finite())
    }
}

/// Upper bound on any single price a client or admin may enter.
pub const MAX_AMOUNT: f64 = 1_000_000_000.0;

pub fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deliverable {
    pub name: String,
    pub url: String,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Milestone {
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub rating: u8,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    #[serde(rename = "_id")]
    pub id: String,
    pub order_number: String,
    pub client: String,
    pub service: String,
    pub quote: Option<String>,
    pub quantity: u32,
    pub custom_amount: Option<f64>,
    pub pricing: PricingBreakdown,
    pub requirements: Requirements,
    #[serde(default)]
    pub payment: Payment,
    #[serde(default)]
    pub deliverables: Vec<Deliverable>,
    #[serde(default)]
    pub milestones: Vec<Milestone>,
    pub review: Option<Review>,
    pub status: OrderStatus,
    pub cancellation_reason: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Moves the order to `next` and applies the bookkeeping tied to the
    /// target state. Returns the previous status.
    pub fn apply_status(
        &mut self,
        next: OrderStatus,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<OrderStatus, MarketplaceError> {
        let previous = self.status;
        self.status = previous.transition(next)?;
        match next {
            OrderStatus::PaymentConfirmed => {
                self.payment.status = PaymentStatus::Completed;
                self.payment.failure_reason = None;
                self.payment.paid_at.get_or_insert(now);
            }
            OrderStatus::Refunded => {
                self.payment.status = PaymentStatus::Refunded;
                self.payment.refunded_at = Some(now);
            }
            OrderStatus::Completed => self.completed_at = Some(now),
            OrderStatus::Cancelled => {
                self.cancellation_reason = note.map(str::to_string);
            }
            OrderStatus::Pending | OrderStatus::InProgress | OrderStatus::UnderReview => {}
        }
        self.updated_at = now;
        Ok(previous)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub from: OrderStatus,
    pub to: OrderStatus,
}

/// One entry of an order's communication log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCommunication {
    #[serde(rename = "_id")]
    pub id: String,
    pub order: String,
    pub author: String,
    pub message: String,
    pub status_change: Option<StatusChange>,
    pub created_at: DateTime<Utc>,
}

pub fn format_order_number(sequence: u64) -> String {
    format!("TBX-{:06}", sequence)
}

pub fn is_order_number(candidate: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^TBX-\d{6,}$").expect("static pattern"))
        .is_match(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_order() -> Order {
        let now = Utc::now();
        Order {
            id: "o1".into(),
            order_number: format_order_number(1),
            client: "client-1".into(),
            service: "service-1".into(),
            quote: None,
            quantity: 1,
            custom_amount: None,
            pricing: PricingBreakdown::compute(500.0, 1, 0.0, "USD"),
            requirements: Requirements::default(),
            payment: Payment::default(),
            deliverables: vec![],
            milestones: vec![],
            review: None,
            status: OrderStatus::Pending,
            cancellation_reason: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn pending_cannot_jump_to_completed() {
        let mut order = sample_order();
        let err = order
            .apply_status(OrderStatus::Completed, None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, MarketplaceError::InvalidTransition { .. }));
        assert_eq!(order.status, OrderStatus::Pending);
    }

    #[test]
    fn happy_path_walks_the_whole_workflow() {
        let mut order = sample_order();
        for next in [
            OrderStatus::PaymentConfirmed,
            OrderStatus::InProgress,
            OrderStatus::UnderReview,
            OrderStatus::Completed,
        ] {
            order.apply_status(next, None, Utc::now()).unwrap();
        }
        assert_eq!(order.status, OrderStatus::Completed);
        assert_eq!(order.payment.status, PaymentStatus::Completed);
        assert!(order.payment.paid_at.is_some());
        assert!(order.completed_at.is_some());
        assert!(order.status.is_terminal());
    }

    #[test]
    fn refunds_are_not_reachable_before_payment() {
        assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::Refunded));
        assert!(OrderStatus::InProgress.can_transition_to(OrderStatus::Refunded));
        assert!(!OrderStatus::Completed.can_transition_to(OrderStatus::Cancelled));
    }

    #[test]
    fn pricing_applies_tax_after_quantity() {
        let pricing = PricingBreakdown::compute(19.99, 3, 0.1, "USD");
        assert_eq!(pricing.subtotal, 59.97);
        assert_eq!(pricing.tax, 6.0);
        assert_eq!(pricing.total_amount, 65.97);
    }

    #[test]
    fn order_numbers_match_the_public_format() {
        assert_eq!(format_order_number(7), "TBX-000007");
        assert!(is_order_number(&format_order_number(123456)));
        assert!(!is_order_number("TBX-12"));
    }
}
