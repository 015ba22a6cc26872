use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The closed set of catalog categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceCategory {
    #[serde(rename = "Web Development")]
    WebDevelopment,
    #[serde(rename = "Mobile Development")]
    MobileDevelopment,
    #[serde(rename = "UI/UX Design")]
    UiUxDesign,
    #[serde(rename = "Digital Marketing")]
    DigitalMarketing,
    #[serde(rename = "Content Writing")]
    ContentWriting,
    #[serde(rename = "SEO")]
    Seo,
    #[serde(rename = "Consulting")]
    Consulting,
    #[serde(rename = "Other")]
    Other,
}

impl ServiceCategory {
    pub const ALL: [ServiceCategory; 8] = [
        ServiceCategory::WebDevelopment,
        ServiceCategory::MobileDevelopment,
        ServiceCategory::UiUxDesign,
        ServiceCategory::DigitalMarketing,
        ServiceCategory::ContentWriting,
        ServiceCategory::Seo,
        ServiceCategory::Consulting,
        ServiceCategory::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ServiceCategory::WebDevelopment => "Web Development",
            ServiceCategory::MobileDevelopment => "Mobile Development",
            ServiceCategory::UiUxDesign => "UI/UX Design",
            ServiceCategory::DigitalMarketing => "Digital Marketing",
            ServiceCategory::ContentWriting => "Content Writing",
            ServiceCategory::Seo => "SEO",
            ServiceCategory::Consulting => "Consulting",
            ServiceCategory::Other => "Other",
        }
    }
}

impl fmt::Display for ServiceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ServiceCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| {
                let allowed: Vec<&str> = ServiceCategory::ALL.iter().map(|c| c.as_str()).collect();
                format!("must be one of: {}", allowed.join(", "))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PricingType {
    Fixed,
    Hourly,
    Quote,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePricing {
    #[serde(rename = "type")]
    pub kind: PricingType,
    /// Unit price for fixed and hourly services. Always `None` for quote pricing.
    pub amount: Option<f64>,
    pub currency: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RatingSummary {
    pub average: f64,
    pub count: u64,
}

impl RatingSummary {
    /// Folds one more rating into the running average.
    pub fn record(&mut self, rating: u8) {
        let total = self.average * self.count as f64 + f64::from(rating);
        self.count += 1;
        self.average = total / self.count as f64;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub description: String,
    pub category: ServiceCategory,
    pub pricing: ServicePricing,
    #[serde(default)]
    pub features: Vec<String>,
    pub delivery_days: Option<u32>,
    #[serde(default)]
    pub rating: RatingSummary,
    pub is_active: bool,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_round_trip_through_their_labels() {
        let parsed: ServiceCategory = "UI/UX Design".parse().unwrap();
        assert_eq!(parsed, ServiceCategory::UiUxDesign);
        assert_eq!(
            serde_json::to_value(ServiceCategory::WebDevelopment).unwrap(),
            serde_json::json!("Web Development")
        );
        assert!("Plumbing".parse::<ServiceCategory>().is_err());
    }

    #[test]
    fn rating_updates_incrementally() {
        let mut rating = RatingSummary { average: 4.0, count: 3 };
        rating.record(5);
        assert_eq!(rating.count, 4);
        assert!((rating.average - 4.25).abs() < f64::EPSILON);
    }
}
