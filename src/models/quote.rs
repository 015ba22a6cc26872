use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

use super::{Requirements, Workflow};

/// Quotes left unanswered this long are swept to `expired`.
pub const QUOTE_VALIDITY_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteStatus {
    Pending,
    Accepted,
    Rejected,
    Expired,
}

impl Workflow for QuoteStatus {
    const ENTITY: &'static str = "Quote";

    fn successors(self) -> &'static [Self] {
        match self {
            QuoteStatus::Pending => &[
                QuoteStatus::Accepted,
                QuoteStatus::Rejected,
                QuoteStatus::Expired,
            ],
            QuoteStatus::Accepted | QuoteStatus::Rejected | QuoteStatus::Expired => &[],
        }
    }
}

impl fmt::Display for QuoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QuoteStatus::Pending => "pending",
            QuoteStatus::Accepted => "accepted",
            QuoteStatus::Rejected => "rejected",
            QuoteStatus::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// An admin's priced answer to a quote request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteResponse {
    pub responded_by: String,
    pub quoted_amount: f64,
    pub message: String,
    pub responded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    #[serde(rename = "_id")]
    pub id: String,
    pub quote_number: String,
    pub client: String,
    pub service: String,
    pub requested_amount: Option<f64>,
    pub requirements: Requirements,
    pub status: QuoteStatus,
    pub response: Option<QuoteResponse>,
    pub converted_to_order: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Quote {
    pub fn default_expiry(created_at: DateTime<Utc>) -> DateTime<Utc> {
        created_at + Duration::days(QUOTE_VALIDITY_DAYS)
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Once an order exists for the quote only its status may change.
    pub fn is_locked(&self) -> bool {
        self.converted_to_order.is_some()
    }
}

pub fn format_quote_number(sequence: u64) -> String {
    format!("QTE-{:06}", sequence)
}

pub fn is_quote_number(candidate: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^QTE-\d{6,}$").expect("static pattern"))
        .is_match(candidate)
}
