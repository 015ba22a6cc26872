// src/catalog.rs

use std::sync::Arc;

use actix_web::{web, HttpResponse};
use chrono::Utc;
use log::info;
use mongodb::bson::{doc, Document};
use serde::Deserialize;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::auth::AuthUser;
use crate::error::{FieldErrors, MarketplaceError, MarketplaceResult};
use crate::models::{
    PricingType, RatingSummary, Service, ServiceCategory, ServicePricing, MAX_AMOUNT,
};
use crate::store::{Collection, DocumentStore, SERVICES};

const TITLE_MIN: usize = 3;
const TITLE_MAX: usize = 100;
const DESCRIPTION_MAX: usize = 2000;
const FEATURES_MAX: usize = 20;
const FEATURE_LEN_MAX: usize = 200;

// ─── REQUEST PAYLOADS ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct PricingInput {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub amount: Option<f64>,
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateServiceRequest {
    pub title: String,
    pub description: String,
    pub category: String,
    pub pricing: PricingInput,
    #[serde(default)]
    pub features: Vec<String>,
    pub delivery_days: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateServiceRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub pricing: Option<PricingInput>,
    pub features: Option<Vec<String>>,
    pub delivery_days: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceQuery {
    pub category: Option<String>,
    #[serde(default)]
    pub include_inactive: bool,
}

// ─── VALIDATION ───────────────────────────────────────────────────────────────

fn check_title(title: &str, errors: &mut FieldErrors) {
    let len = title.trim().chars().count();
    if !(TITLE_MIN..=TITLE_MAX).contains(&len) {
        errors.push(
            "title",
            format!("must be between {} and {} characters", TITLE_MIN, TITLE_MAX),
        );
    }
}

fn check_description(description: &str, errors: &mut FieldErrors) {
    let len = description.trim().chars().count();
    if len == 0 {
        errors.push("description", "is required");
    } else if len > DESCRIPTION_MAX {
        errors.push(
            "description",
            format!("must be at most {} characters", DESCRIPTION_MAX),
        );
    }
}

fn check_features(features: &[String], errors: &mut FieldErrors) {
    if features.len() > FEATURES_MAX {
        errors.push("features", format!("at most {} entries", FEATURES_MAX));
    }
    if features
        .iter()
        .any(|f| f.trim().is_empty() || f.chars().count() > FEATURE_LEN_MAX)
    {
        errors.push(
            "features",
            format!("entries must be 1 to {} characters", FEATURE_LEN_MAX),
        );
    }
}

fn parse_category(raw: &str, errors: &mut FieldErrors) -> Option<ServiceCategory> {
    match raw.parse::<ServiceCategory>() {
        Ok(category) => Some(category),
        Err(message) => {
            errors.push("category", message);
            None
        }
    }
}

fn parse_pricing(input: &PricingInput, errors: &mut FieldErrors) -> Option<ServicePricing> {
    let kind = match input.kind.as_deref() {
        Some("fixed") => PricingType::Fixed,
        Some("hourly") => PricingType::Hourly,
        Some("quote") => PricingType::Quote,
        Some(_) => {
            errors.push("pricing.type", "must be one of: fixed, hourly, quote");
            return None;
        }
        None => {
            errors.push("pricing.type", "is required");
            return None;
        }
    };

    let amount = match kind {
        PricingType::Quote => None,
        PricingType::Fixed | PricingType::Hourly => match input.amount {
            Some(amount) if amount.is_finite() && (0.0..=MAX_AMOUNT).contains(&amount) => {
                Some(amount)
            }
            Some(_) => {
                errors.push(
                    "pricing.amount",
                    format!("must be between 0 and {}", MAX_AMOUNT),
                );
                return None;
            }
            None => {
                errors.push("pricing.amount", "is required for fixed and hourly pricing");
                return None;
            }
        },
    };

    let currency = input
        .currency
        .as_deref()
        .unwrap_or("USD")
        .trim()
        .to_ascii_uppercase();
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
        errors.push("pricing.currency", "must be a three-letter currency code");
        return None;
    }

    Some(ServicePricing {
        kind,
        amount,
        currency,
    })
}

// ─── SERVICE ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct CatalogService {
    services: Collection<Service>,
}

impl CatalogService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        CatalogService {
            services: Collection::new(store, SERVICES),
        }
    }

    pub async fn create(
        &self,
        created_by: &str,
        request: CreateServiceRequest,
    ) -> MarketplaceResult<Service> {
        let mut errors = FieldErrors::new();
        check_title(&request.title, &mut errors);
        check_description(&request.description, &mut errors);
        check_features(&request.features, &mut errors);
        let category = parse_category(&request.category, &mut errors);
        let pricing = parse_pricing(&request.pricing, &mut errors);
        errors.into_result()?;
        let (Some(category), Some(pricing)) = (category, pricing) else {
            return Err(MarketplaceError::invalid("body", "invalid service"));
        };

        let now = Utc::now();
        let service = Service {
            id: Uuid::new_v4().to_string(),
            title: request.title.trim().to_string(),
            description: request.description.trim().to_string(),
            category,
            pricing,
            features: request.features,
            delivery_days: request.delivery_days,
            rating: RatingSummary::default(),
            is_active: true,
            created_by: created_by.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.services.insert(&service).await?;
        info!("Service created: {} ({})", service.id, service.category);
        Ok(service)
    }

    pub async fn get(&self, id: &str) -> MarketplaceResult<Service> {
        self.services
            .find_by_id(id)
            .await?
            .ok_or_else(|| MarketplaceError::not_found("Service", id))
    }

    /// Looks up a service that can still be quoted or ordered.
    pub async fn get_active(&self, id: &str) -> MarketplaceResult<Service> {
        let service = self.get(id).await?;
        if !service.is_active {
            return Err(MarketplaceError::invalid(
                "serviceId",
                "service is no longer offered",
            ));
        }
        Ok(service)
    }

    pub async fn list(
        &self,
        category: Option<ServiceCategory>,
        include_inactive: bool,
    ) -> MarketplaceResult<Vec<Service>> {
        let mut filter = Document::new();
        if !include_inactive {
            filter.insert("isActive", true);
        }
        if let Some(category) = category {
            filter.insert("category", category.as_str());
        }
        let mut services = self.services.find(filter).await?;
        services.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(services)
    }

    pub async fn update(&self, id: &str, patch: UpdateServiceRequest) -> MarketplaceResult<Service> {
        let mut service = self.get(id).await?;
        let mut errors = FieldErrors::new();

        if let Some(title) = &patch.title {
            check_title(title, &mut errors);
            service.title = title.trim().to_string();
        }
        if let Some(description) = &patch.description {
            check_description(description, &mut errors);
            service.description = description.trim().to_string();
        }
        if let Some(raw) = &patch.category {
            if let Some(category) = parse_category(raw, &mut errors) {
                service.category = category;
            }
        }
        if let Some(input) = &patch.pricing {
            if let Some(pricing) = parse_pricing(input, &mut errors) {
                service.pricing = pricing;
            }
        }
        if let Some(features) = patch.features {
            check_features(&features, &mut errors);
            service.features = features;
        }
        if patch.delivery_days.is_some() {
            service.delivery_days = patch.delivery_days;
        }
        errors.into_result()?;

        service.updated_at = Utc::now();
        self.save(&service).await?;
        info!("Service updated: {}", service.id);
        Ok(service)
    }

    pub async fn deactivate(&self, id: &str) -> MarketplaceResult<Service> {
        self.set_active(id, false).await
    }

    pub async fn reactivate(&self, id: &str) -> MarketplaceResult<Service> {
        self.set_active(id, true).await
    }

    async fn set_active(&self, id: &str, active: bool) -> MarketplaceResult<Service> {
        let mut service = self.get(id).await?;
        if service.is_active != active {
            service.is_active = active;
            service.updated_at = Utc::now();
            self.save(&service).await?;
            info!("Service {} isActive={}", service.id, active);
        }
        Ok(service)
    }

    /// Folds a review rating into the service's running aggregate.
    pub async fn record_rating(&self, id: &str, rating: u8) -> MarketplaceResult<Service> {
        let mut service = self.get(id).await?;
        service.rating.record(rating);
        self.save(&service).await?;
        Ok(service)
    }

    async fn save(&self, service: &Service) -> MarketplaceResult<()> {
        if self.services.replace(&service.id, service).await? {
            Ok(())
        } else {
            Err(MarketplaceError::not_found("Service", service.id.as_str()))
        }
    }
}

// ─── ENDPOINTS ────────────────────────────────────────────────────────────────

/// GET /api/services
pub async fn list_services(
    data: web::Data<AppState>,
    user: Option<AuthUser>,
    query: web::Query<ServiceQuery>,
) -> MarketplaceResult<HttpResponse> {
    let query = query.into_inner();
    let category = match query.category.as_deref() {
        Some(raw) => {
            let mut errors = FieldErrors::new();
            let parsed = parse_category(raw, &mut errors);
            errors.into_result()?;
            parsed
        }
        None => None,
    };
    if query.include_inactive {
        match &user {
            Some(u) => u.require_staff()?,
            None => return Err(MarketplaceError::Unauthorized("missing bearer token".into())),
        }
    }
    let services = data.catalog().list(category, query.include_inactive).await?;
    Ok(HttpResponse::Ok().json(services))
}

/// GET /api/services/{id}
pub async fn get_service(
    data: web::Data<AppState>,
    user: Option<AuthUser>,
    path: web::Path<String>,
) -> MarketplaceResult<HttpResponse> {
    let service = data.catalog().get(&path).await?;
    let is_staff = user.as_ref().map(AuthUser::is_staff).unwrap_or(false);
    if !service.is_active && !is_staff {
        return Err(MarketplaceError::not_found("Service", path.into_inner()));
    }
    Ok(HttpResponse::Ok().json(service))
}

/// POST /api/services
pub async fn create_service(
    data: web::Data<AppState>,
    user: AuthUser,
    payload: web::Json<CreateServiceRequest>,
) -> MarketplaceResult<HttpResponse> {
    user.require_admin()?;
    let service = data.catalog().create(&user.id, payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(service))
}

/// PATCH /api/services/{id}
pub async fn update_service(
    data: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<String>,
    payload: web::Json<UpdateServiceRequest>,
) -> MarketplaceResult<HttpResponse> {
    user.require_admin()?;
    let service = data.catalog().update(&path, payload.into_inner()).await?;
    Ok(HttpResponse::Ok().json(service))
}

/// DELETE /api/services/{id}
/// Deactivates; services are never physically removed.
pub async fn deactivate_service(
    data: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<String>,
) -> MarketplaceResult<HttpResponse> {
    user.require_admin()?;
    let service = data.catalog().deactivate(&path).await?;
    Ok(HttpResponse::Ok().json(service))
}

/// POST /api/services/{id}/reactivate
pub async fn reactivate_service(
    data: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<String>,
) -> MarketplaceResult<HttpResponse> {
    user.require_admin()?;
    let service = data.catalog().reactivate(&path).await?;
    Ok(HttpResponse::Ok().json(service))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::MemoryStore;

    pub(crate) fn web_dev_request(amount: f64) -> CreateServiceRequest {
        CreateServiceRequest {
            title: "Landing page build".into(),
            description: "A responsive marketing site".into(),
            category: "Web Development".into(),
            pricing: PricingInput {
                kind: Some("fixed".into()),
                amount: Some(amount),
                currency: None,
            },
            features: vec!["Responsive layout".into()],
            delivery_days: Some(14),
        }
    }

    fn catalog() -> CatalogService {
        CatalogService::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn creates_a_fixed_price_service() {
        let catalog = catalog();
        let service = catalog.create("admin-1", web_dev_request(500.0)).await.unwrap();
        assert_eq!(service.category, ServiceCategory::WebDevelopment);
        assert_eq!(service.pricing.amount, Some(500.0));
        assert_eq!(service.pricing.currency, "USD");
        assert!(service.is_active);
        assert_eq!(catalog.get(&service.id).await.unwrap().title, "Landing page build");
    }

    #[tokio::test]
    async fn rejects_unknown_categories_and_missing_amounts() {
        let mut request = web_dev_request(500.0);
        request.category = "Plumbing".into();
        request.pricing.amount = None;

        let err = catalog().create("admin-1", request).await.unwrap_err();
        let MarketplaceError::Validation(fields) = err else {
            panic!("expected validation error");
        };
        let names: Vec<&str> = fields.0.iter().map(|f| f.field.as_str()).collect();
        assert!(names.contains(&"category"));
        assert!(names.contains(&"pricing.amount"));
    }

    #[tokio::test]
    async fn negative_amounts_are_rejected() {
        let err = catalog()
            .create("admin-1", web_dev_request(-1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, MarketplaceError::Validation(_)));
    }

    #[tokio::test]
    async fn amounts_above_the_ceiling_are_rejected() {
        let err = catalog()
            .create("admin-1", web_dev_request(1e308))
            .await
            .unwrap_err();
        assert!(matches!(err, MarketplaceError::Validation(_)));
        assert!(catalog()
            .create("admin-1", web_dev_request(MAX_AMOUNT))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn quote_pricing_drops_the_amount() {
        let mut request = web_dev_request(100.0);
        request.pricing.kind = Some("quote".into());
        let service = catalog().create("admin-1", request).await.unwrap();
        assert_eq!(service.pricing.kind, PricingType::Quote);
        assert_eq!(service.pricing.amount, None);
    }

    #[tokio::test]
    async fn deactivation_hides_but_keeps_the_document() {
        let catalog = catalog();
        let service = catalog.create("admin-1", web_dev_request(500.0)).await.unwrap();
        catalog.deactivate(&service.id).await.unwrap();

        assert!(catalog.list(None, false).await.unwrap().is_empty());
        assert_eq!(catalog.list(None, true).await.unwrap().len(), 1);
        assert!(!catalog.get(&service.id).await.unwrap().is_active);
        assert!(matches!(
            catalog.get_active(&service.id).await,
            Err(MarketplaceError::Validation(_))
        ));

        catalog.reactivate(&service.id).await.unwrap();
        assert!(catalog.get_active(&service.id).await.is_ok());
    }

    #[tokio::test]
    async fn partial_updates_validate_changed_fields() {
        let catalog = catalog();
        let service = catalog.create("admin-1", web_dev_request(500.0)).await.unwrap();

        let updated = catalog
            .update(
                &service.id,
                UpdateServiceRequest {
                    title: Some("Landing page build v2".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.title, "Landing page build v2");
        assert_eq!(updated.pricing.amount, Some(500.0));

        let err = catalog
            .update(
                &service.id,
                UpdateServiceRequest {
                    title: Some("x".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MarketplaceError::Validation(_)));
        assert_eq!(
            catalog.get(&service.id).await.unwrap().title,
            "Landing page build v2"
        );
    }

    #[tokio::test]
    async fn list_filters_by_category() {
        let catalog = catalog();
        catalog.create("admin-1", web_dev_request(500.0)).await.unwrap();
        let mut seo = web_dev_request(200.0);
        seo.category = "SEO".into();
        catalog.create("admin-1", seo).await.unwrap();

        let only_seo = catalog.list(Some(ServiceCategory::Seo), false).await.unwrap();
        assert_eq!(only_seo.len(), 1);
        assert_eq!(only_seo[0].category, ServiceCategory::Seo);
    }

    #[tokio::test]
    async fn ratings_accumulate() {
        let catalog = catalog();
        let service = catalog.create("admin-1", web_dev_request(500.0)).await.unwrap();
        catalog.record_rating(&service.id, 4).await.unwrap();
        let rated = catalog.record_rating(&service.id, 5).await.unwrap();
        assert_eq!(rated.rating.count, 2);
        assert!((rated.rating.average - 4.5).abs() < f64::EPSILON);
    }
}
