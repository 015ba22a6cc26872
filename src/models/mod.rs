mod chat;
mod order;
mod quote;
mod service;
mod user;
mod workflow;

use serde::{Deserialize, Serialize};

pub use chat::{Chat, ChatMessage, ChatStatus, MessageKind};
pub use order::{
    format_order_number, is_order_number, round_cents, MAX_AMOUNT, Deliverable, Milestone, Order,
    OrderCommunication, OrderStatus, Payment, PaymentMethod, PaymentStatus, PricingBreakdown,
    Review, StatusChange,
};
pub use quote::{format_quote_number, is_quote_number, Quote, QuoteResponse, QuoteStatus};
pub use service::{PricingType, RatingSummary, Service, ServiceCategory, ServicePricing};
pub use user::Role;
pub use workflow::Workflow;

/// What the client asked for, shared by quotes and orders.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Requirements {
    pub description: String,
    /// Attachment URLs. Upload and storage happen elsewhere.
    #[serde(default)]
    pub attachments: Vec<String>,
}
