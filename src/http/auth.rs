//! Bearer token identity.
//!
//! Tokens are issued elsewhere; this service only verifies the HS256
//! signature and expiry and trusts the `{ id, role }` claims it carries.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::domain::value_objects::UserId;
use crate::EcommerceError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub id: String,
    pub role: String,
    #[serde(default)]
    pub email: Option<String>,
    pub exp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Customer,
    Admin,
}

impl Role {
    pub fn from_claim(role: &str) -> Self {
        if role.eq_ignore_ascii_case("admin") { Self::Admin } else { Self::Customer }
    }
}

#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: UserId,
    pub role: Role,
    pub email: Option<String>,
}

impl CurrentUser {
    pub fn is_admin(&self) -> bool { self.role == Role::Admin }
}

/// A [`CurrentUser`] whose role is `admin`.
#[derive(Debug, Clone)]
pub struct AdminUser(pub CurrentUser);

#[derive(Clone)]
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &SecretString) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.expose_secret().as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    pub fn verify(&self, token: &str) -> Result<CurrentUser, EcommerceError> {
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => EcommerceError::Unauthorized("token expired".to_string()),
            _ => EcommerceError::Unauthorized("invalid token".to_string()),
        })?;
        let claims = data.claims;
        let id = UserId::parse(&claims.id).ok_or_else(|| EcommerceError::Unauthorized("malformed token subject".to_string()))?;
        Ok(CurrentUser { id, role: Role::from_claim(&claims.role), email: claims.email })
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = EcommerceError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<CurrentUser>() {
            return Ok(user.clone());
        }
        let Some(token) = bearer_token(parts) else {
            tracing::debug!(uri = %parts.uri, "Missing bearer token");
            return Err(EcommerceError::Unauthorized("missing bearer token".to_string()));
        };
        let user = state.verifier().verify(token).inspect_err(|e| {
            tracing::warn!(uri = %parts.uri, error = %e, "Token rejected");
        })?;
        parts.extensions.insert(user.clone());
        Ok(user)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = EcommerceError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let user = CurrentUser::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            return Err(EcommerceError::Forbidden);
        }
        Ok(Self(user))
    }
}
