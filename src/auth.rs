// src/auth.rs

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use actix_web::{
    body::{BoxBody, MessageBody},
    dev::{Payload, Service, ServiceRequest, ServiceResponse, Transform},
    http, Error, FromRequest, HttpMessage, HttpRequest, ResponseError,
};
use futures::future::{ok, ready, Ready};
use jsonwebtoken::{decode, DecodingKey, Validation};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{MarketplaceError, MarketplaceResult};
use crate::models::Role;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub exp: usize,
}

/// The caller identity attached to a request by [`Authentication`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub id: String,
    pub role: Role,
}

impl AuthUser {
    pub fn is_staff(&self) -> bool {
        self.role.is_staff()
    }

    pub fn require_admin(&self) -> MarketplaceResult<()> {
        if self.role == Role::Admin {
            Ok(())
        } else {
            Err(MarketplaceError::Forbidden("admin role required".into()))
        }
    }

    pub fn require_staff(&self) -> MarketplaceResult<()> {
        if self.is_staff() {
            Ok(())
        } else {
            Err(MarketplaceError::Forbidden("staff role required".into()))
        }
    }

    pub fn require_client(&self) -> MarketplaceResult<()> {
        if self.role == Role::Client {
            Ok(())
        } else {
            Err(MarketplaceError::Forbidden("client role required".into()))
        }
    }

    /// Owners and staff may read a resource.
    pub fn ensure_can_view(&self, owner_id: &str) -> MarketplaceResult<()> {
        if self.is_staff() || self.id == owner_id {
            Ok(())
        } else {
            Err(MarketplaceError::Forbidden("not your resource".into()))
        }
    }
}

impl FromRequest for AuthUser {
    type Error = MarketplaceError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(
            req.extensions()
                .get::<AuthUser>()
                .cloned()
                .ok_or_else(|| MarketplaceError::Unauthorized("missing bearer token".into())),
        )
    }
}

// Tokens are issued by the identity provider; tests sign their own.
#[cfg(test)]
pub fn create_jwt(user_id: &str, role: Role, secret: &str) -> MarketplaceResult<String> {
    use jsonwebtoken::{encode, EncodingKey, Header};

    let expiration = chrono::Utc::now() + chrono::Duration::hours(24);
    let claims = Claims {
        sub: user_id.to_string(),
        role,
        exp: expiration.timestamp() as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_ref()))
        .map_err(|e| MarketplaceError::Unauthorized(format!("cannot sign token: {}", e)))
}

pub fn validate_jwt(token: &str, secret: &str) -> MarketplaceResult<AuthUser> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::default(),
    )
    .map_err(|e| MarketplaceError::Unauthorized(format!("invalid token: {}", e)))?;
    Ok(AuthUser {
        id: token_data.claims.sub,
        role: token_data.claims.role,
    })
}

/// Resolves `Authorization: Bearer <jwt>` into an [`AuthUser`] request
/// extension. Requests without the header pass through anonymously; a
/// malformed or expired token is rejected with 401.
#[derive(Debug, Clone)]
pub struct Authentication {
    secret: Arc<str>,
}

impl Authentication {
    pub fn new(secret: &str) -> Self {
        Authentication {
            secret: Arc::from(secret),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for Authentication
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Transform = AuthMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AuthMiddleware {
            service,
            secret: self.secret.clone(),
        })
    }
}

pub struct AuthMiddleware<S> {
    service: S,
    secret: Arc<str>,
}

impl<S, B> Service<ServiceRequest> for AuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let bearer = req
            .headers()
            .get(http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(|token| token.trim().to_string());

        if let Some(token) = bearer {
            match validate_jwt(&token, &self.secret) {
                Ok(user) => {
                    req.extensions_mut().insert(user);
                }
                Err(e) => {
                    warn!("Rejected request to {}: {}", req.path(), e);
                    let (req_parts, _payload) = req.into_parts();
                    let resp = e.error_response();
                    return Box::pin(async move { Ok(ServiceResponse::new(req_parts, resp)) });
                }
            }
        }

        let fut = self.service.call(req);
        Box::pin(async move {
            let res = fut.await?;
            Ok(res.map_into_boxed_body())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_round_trip_identity_and_role() {
        let token = create_jwt("admin-1", Role::Admin, "test-secret").unwrap();
        let user = validate_jwt(&token, "test-secret").unwrap();
        assert_eq!(user.id, "admin-1");
        assert_eq!(user.role, Role::Admin);
        assert!(user.require_admin().is_ok());
    }

    #[test]
    fn tokens_signed_with_another_secret_are_rejected() {
        let token = create_jwt("client-1", Role::Client, "one").unwrap();
        assert!(matches!(
            validate_jwt(&token, "two"),
            Err(MarketplaceError::Unauthorized(_))
        ));
    }

    #[test]
    fn clients_only_view_their_own_resources() {
        let client = AuthUser { id: "c1".into(), role: Role::Client };
        let support = AuthUser { id: "s1".into(), role: Role::Support };
        assert!(client.ensure_can_view("c1").is_ok());
        assert!(client.ensure_can_view("c2").is_err());
        assert!(support.ensure_can_view("c2").is_ok());
        assert!(support.require_admin().is_err());
    }
}
